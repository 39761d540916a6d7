// src/acquisition/header.rs

use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;

use crate::error::{Result, SpikeError};

pub const HEADER_MAGIC: u32 = 0xC691_2702;

/// Length prefix marking a null string.
const NULL_STRING: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatVersion {
    pub major: i16,
    pub minor: i16,
}

impl FormatVersion {
    pub fn at_least(&self, major: i16, minor: i16) -> bool {
        self.major > major || (self.major == major && self.minor >= minor)
    }
}

/// Amplifier and DSP settings, kept verbatim from the header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyParameters {
    pub dsp_enabled: i16,
    pub actual_dsp_cutoff_frequency: f32,
    pub actual_lower_bandwidth: f32,
    pub actual_upper_bandwidth: f32,
    pub desired_dsp_cutoff_frequency: f32,
    pub desired_lower_bandwidth: f32,
    pub desired_upper_bandwidth: f32,
    /// Software notch filter frequency in Hz: 0 (off), 50 or 60.
    pub notch_filter_frequency: u16,
    pub desired_impedance_test_frequency: f32,
    pub actual_impedance_test_frequency: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Notes {
    pub note1: String,
    pub note2: String,
    pub note3: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignalKind {
    Amplifier,
    AuxInput,
    SupplyVoltage,
    BoardAdc,
    DigitalIn,
    DigitalOut,
}

impl SignalKind {
    pub const ALL: [SignalKind; 6] = [
        SignalKind::Amplifier,
        SignalKind::AuxInput,
        SignalKind::SupplyVoltage,
        SignalKind::BoardAdc,
        SignalKind::DigitalIn,
        SignalKind::DigitalOut,
    ];

    /// On-disk `signal_type` discriminant.
    pub fn code(self) -> i16 {
        match self {
            SignalKind::Amplifier => 0,
            SignalKind::AuxInput => 1,
            SignalKind::SupplyVoltage => 2,
            SignalKind::BoardAdc => 3,
            SignalKind::DigitalIn => 4,
            SignalKind::DigitalOut => 5,
        }
    }
}

impl TryFrom<i16> for SignalKind {
    type Error = SpikeError;

    fn try_from(code: i16) -> Result<Self> {
        SignalKind::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or_else(|| SpikeError::header("unknown signal type"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpikeTrigger {
    pub voltage_trigger_mode: i16,
    pub voltage_threshold: i16,
    pub digital_trigger_channel: i16,
    pub digital_edge_polarity: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDescriptor {
    pub port_name: String,
    pub port_prefix: String,
    /// 1-based index of the signal group the channel was declared in.
    pub port_number: i16,
    pub native_name: String,
    pub custom_name: String,
    pub native_order: i16,
    pub custom_order: i16,
    pub kind: SignalKind,
    pub chip_channel: i16,
    pub board_stream: i16,
    pub trigger: SpikeTrigger,
    pub impedance_magnitude: f32,
    pub impedance_phase: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalGroup {
    pub name: String,
    pub prefix: String,
    pub enabled: i16,
    pub num_channels: i16,
    pub num_amp_channels: i16,
}

/// Enabled channels routed by signal kind. Order inside each collection is
/// header order and doubles as the on-disk channel index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelRoster {
    pub amplifier: Vec<ChannelDescriptor>,
    pub aux_input: Vec<ChannelDescriptor>,
    pub supply_voltage: Vec<ChannelDescriptor>,
    pub board_adc: Vec<ChannelDescriptor>,
    pub board_dig_in: Vec<ChannelDescriptor>,
    pub board_dig_out: Vec<ChannelDescriptor>,
}

impl ChannelRoster {
    pub fn push(&mut self, channel: ChannelDescriptor) {
        let collection = match channel.kind {
            SignalKind::Amplifier => &mut self.amplifier,
            SignalKind::AuxInput => &mut self.aux_input,
            SignalKind::SupplyVoltage => &mut self.supply_voltage,
            SignalKind::BoardAdc => &mut self.board_adc,
            SignalKind::DigitalIn => &mut self.board_dig_in,
            SignalKind::DigitalOut => &mut self.board_dig_out,
        };
        collection.push(channel);
    }

    pub fn of(&self, kind: SignalKind) -> &[ChannelDescriptor] {
        match kind {
            SignalKind::Amplifier => &self.amplifier,
            SignalKind::AuxInput => &self.aux_input,
            SignalKind::SupplyVoltage => &self.supply_voltage,
            SignalKind::BoardAdc => &self.board_adc,
            SignalKind::DigitalIn => &self.board_dig_in,
            SignalKind::DigitalOut => &self.board_dig_out,
        }
    }

    pub fn count(&self, kind: SignalKind) -> usize {
        self.of(kind).len()
    }

    /// All retained channels, kind by kind.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        SignalKind::ALL.into_iter().flat_map(move |kind| self.of(kind).iter())
    }

    fn check_native_order(&self) -> Result<()> {
        for kind in SignalKind::ALL {
            let mut seen = HashSet::new();
            for channel in self.of(kind) {
                if !seen.insert((channel.port_number, channel.native_order)) {
                    return Err(SpikeError::header(format!(
                        "duplicate native order {} for {:?} channel {}",
                        channel.native_order, kind, channel.native_name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionHeader {
    pub version: FormatVersion,
    pub sample_rate: f32,
    pub frequency: FrequencyParameters,
    pub notes: Notes,
    pub num_temp_sensor_channels: i16,
    pub eval_board_mode: i16,
    /// Digital reference channel name, present from v2.0.
    pub reference_channel: Option<String>,
    pub samples_per_data_block: u32,
    pub signal_groups: Vec<SignalGroup>,
    pub channels: ChannelRoster,
}

impl SessionHeader {
    pub fn sample_rate_hz(&self) -> f64 {
        f64::from(self.sample_rate)
    }

    pub fn notch_filter_hz(&self) -> u16 {
        self.frequency.notch_filter_frequency
    }

    pub fn amplifier_channel_count(&self) -> usize {
        self.channels.count(SignalKind::Amplifier)
    }

    pub fn digital_input_count(&self) -> usize {
        self.channels.count(SignalKind::DigitalIn)
    }

    pub fn amplifier_channels(&self) -> &[ChannelDescriptor] {
        self.channels.of(SignalKind::Amplifier)
    }

    pub fn aux_input_sample_rate(&self) -> f64 {
        self.sample_rate_hz() / 4.0
    }

    pub fn supply_voltage_sample_rate(&self) -> f64 {
        self.sample_rate_hz() / f64::from(self.samples_per_data_block)
    }

    pub fn board_adc_sample_rate(&self) -> f64 {
        self.sample_rate_hz()
    }

    pub fn board_dig_in_sample_rate(&self) -> f64 {
        self.sample_rate_hz()
    }

    /// Fails unless the header agrees with the channel count of the array
    /// metadata.
    pub fn check_channel_count(&self, expected: usize) -> Result<()> {
        let header = self.amplifier_channel_count();
        if header != expected {
            return Err(SpikeError::ChannelCountMismatch {
                header,
                metadata: expected,
            });
        }
        Ok(())
    }
}

/// Reads fields in declared order from a read-only byte cursor.
pub struct HeaderDecoder<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> HeaderDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn decode(mut self) -> Result<SessionHeader> {
        if self.u32()? != HEADER_MAGIC {
            return Err(SpikeError::header("bad magic"));
        }

        let version = FormatVersion {
            major: self.i16()?,
            minor: self.i16()?,
        };

        let sample_rate = self.f32()?;
        let frequency = self.frequency_parameters()?;

        let notes = Notes {
            note1: self.qstring()?,
            note2: self.qstring()?,
            note3: self.qstring()?,
        };

        // Version-gated fields, in file order
        let num_temp_sensor_channels = if version.at_least(1, 1) {
            self.i16()?
        } else {
            0
        };
        let eval_board_mode = if version.at_least(1, 3) {
            self.i16()?
        } else {
            0
        };
        let (reference_channel, samples_per_data_block) = if version.major > 1 {
            (Some(self.qstring()?), 128)
        } else {
            (None, 60)
        };

        let (signal_groups, channels) = self.signal_groups()?;
        channels.check_native_order()?;

        Ok(SessionHeader {
            version,
            sample_rate,
            frequency,
            notes,
            num_temp_sensor_channels,
            eval_board_mode,
            reference_channel,
            samples_per_data_block,
            signal_groups,
            channels,
        })
    }

    fn frequency_parameters(&mut self) -> Result<FrequencyParameters> {
        let dsp_enabled = self.i16()?;
        let actual_dsp_cutoff_frequency = self.f32()?;
        let actual_lower_bandwidth = self.f32()?;
        let actual_upper_bandwidth = self.f32()?;
        let desired_dsp_cutoff_frequency = self.f32()?;
        let desired_lower_bandwidth = self.f32()?;
        let desired_upper_bandwidth = self.f32()?;

        let notch_filter_frequency = match self.i16()? {
            0 => 0,
            1 => 50,
            2 => 60,
            mode => {
                return Err(SpikeError::header(format!(
                    "unknown notch filter mode {}",
                    mode
                )))
            }
        };

        Ok(FrequencyParameters {
            dsp_enabled,
            actual_dsp_cutoff_frequency,
            actual_lower_bandwidth,
            actual_upper_bandwidth,
            desired_dsp_cutoff_frequency,
            desired_lower_bandwidth,
            desired_upper_bandwidth,
            notch_filter_frequency,
            desired_impedance_test_frequency: self.f32()?,
            actual_impedance_test_frequency: self.f32()?,
        })
    }

    fn signal_groups(&mut self) -> Result<(Vec<SignalGroup>, ChannelRoster)> {
        let group_count = self.i16()?;
        let mut groups = Vec::new();
        let mut roster = ChannelRoster::default();

        for port_number in 1..=group_count {
            let group = SignalGroup {
                name: self.qstring()?,
                prefix: self.qstring()?,
                enabled: self.i16()?,
                num_channels: self.i16()?,
                num_amp_channels: self.i16()?,
            };

            if group.num_channels > 0 && group.enabled > 0 {
                for _ in 0..group.num_channels {
                    if let Some(channel) = self.channel(&group, port_number)? {
                        roster.push(channel);
                    }
                }
            }
            groups.push(group);
        }

        Ok((groups, roster))
    }

    /// One channel record; `None` when the channel is disabled.
    fn channel(&mut self, group: &SignalGroup, port_number: i16) -> Result<Option<ChannelDescriptor>> {
        let native_name = self.qstring()?;
        let custom_name = self.qstring()?;
        let native_order = self.i16()?;
        let custom_order = self.i16()?;
        let signal_type = self.i16()?;
        let channel_enabled = self.i16()?;
        let chip_channel = self.i16()?;
        let board_stream = self.i16()?;
        let trigger = SpikeTrigger {
            voltage_trigger_mode: self.i16()?,
            voltage_threshold: self.i16()?,
            digital_trigger_channel: self.i16()?,
            digital_edge_polarity: self.i16()?,
        };
        let impedance_magnitude = self.f32()?;
        let impedance_phase = self.f32()?;

        if channel_enabled == 0 {
            return Ok(None);
        }

        Ok(Some(ChannelDescriptor {
            port_name: group.name.clone(),
            port_prefix: group.prefix.clone(),
            port_number,
            native_name,
            custom_name,
            native_order,
            custom_order,
            kind: SignalKind::try_from(signal_type)?,
            chip_channel,
            board_stream,
            trigger,
            impedance_magnitude,
            impedance_phase,
        }))
    }

    fn remaining(&self) -> u64 {
        (self.cursor.get_ref().len() as u64).saturating_sub(self.cursor.position())
    }

    /// Length-prefixed UTF-16LE string.
    fn qstring(&mut self) -> Result<String> {
        let length = self.u32()?;
        if length == NULL_STRING {
            return Ok(String::new());
        }
        if u64::from(length) > self.remaining() {
            return Err(SpikeError::header("length overflow"));
        }

        let units = (0..length / 2)
            .map(|_| self.u16())
            .collect::<Result<Vec<u16>>>()?;
        Ok(String::from_utf16_lossy(&units))
    }

    fn u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<LittleEndian>().map_err(|_| truncated())
    }

    fn i16(&mut self) -> Result<i16> {
        self.cursor.read_i16::<LittleEndian>().map_err(|_| truncated())
    }

    fn u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(|_| truncated())
    }

    fn f32(&mut self) -> Result<f32> {
        self.cursor.read_f32::<LittleEndian>().map_err(|_| truncated())
    }
}

fn truncated() -> SpikeError {
    SpikeError::header("truncated header")
}

pub fn decode_header(bytes: &[u8]) -> Result<SessionHeader> {
    HeaderDecoder::new(bytes).decode()
}

/// Reads and decodes a session header file (`info.rhd`).
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<SessionHeader> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| SpikeError::io(path, e))?;
    decode_header(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::writer::encode_header;
    use crate::synth::{amplifier_channel, digital_in_channel, session_header};

    fn sample_header() -> SessionHeader {
        session_header(
            20000.0,
            vec![
                amplifier_channel("A", 1, 0),
                amplifier_channel("A", 1, 1),
                amplifier_channel("A", 1, 2),
            ],
            vec![digital_in_channel(2, 0), digital_in_channel(2, 1)],
        )
    }

    #[test]
    fn decodes_what_was_encoded() {
        let header = sample_header();
        let decoded = decode_header(&encode_header(&header).unwrap()).unwrap();

        assert_eq!(decoded, header);
        assert_eq!(decoded.amplifier_channel_count(), 3);
        assert_eq!(decoded.digital_input_count(), 2);
        let names: Vec<_> = decoded
            .amplifier_channels()
            .iter()
            .map(|c| c.native_name.as_str())
            .collect();
        assert_eq!(names, ["A-000", "A-001", "A-002"]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode_header(&sample_header()).unwrap();
        bytes[0] ^= 0xFF;
        match decode_header(&bytes) {
            Err(SpikeError::MalformedHeader(reason)) => assert_eq!(reason, "bad magic"),
            other => panic!("expected bad magic, got {:?}", other),
        }
    }

    #[test]
    fn truncation_is_reported() {
        let bytes = encode_header(&sample_header()).unwrap();
        let result = decode_header(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(SpikeError::MalformedHeader(_))));
    }

    #[test]
    fn null_string_sentinel_reads_as_empty() {
        let mut decoder = HeaderDecoder::new(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decoder.qstring().unwrap(), "");
    }

    #[test]
    fn oversized_string_length_overflows() {
        let bytes = [0x10, 0x00, 0x00, 0x00, b'a', 0x00];
        let mut decoder = HeaderDecoder::new(&bytes);
        match decoder.qstring() {
            Err(SpikeError::MalformedHeader(reason)) => assert_eq!(reason, "length overflow"),
            other => panic!("expected length overflow, got {:?}", other),
        }
    }

    #[test]
    fn utf16_strings_decode() {
        let bytes = [0x04, 0x00, 0x00, 0x00, b'A', 0x00, b'-', 0x00];
        let mut decoder = HeaderDecoder::new(&bytes);
        assert_eq!(decoder.qstring().unwrap(), "A-");
    }

    #[test]
    fn unknown_signal_type_on_enabled_channel_fails() {
        let mut header = sample_header();
        header.channels.amplifier.truncate(1);
        let mut bytes = encode_header(&header).unwrap();
        // signal_type of the first channel record follows its two names and
        // the native/custom order fields.
        let name = "A-000".encode_utf16().count() * 2;
        let offset = find_channel_record(&bytes) + 2 * (4 + name) + 4;
        bytes[offset..offset + 2].copy_from_slice(&9i16.to_le_bytes());
        match decode_header(&bytes) {
            Err(SpikeError::MalformedHeader(reason)) => assert_eq!(reason, "unknown signal type"),
            other => panic!("expected unknown signal type, got {:?}", other),
        }
    }

    #[test]
    fn version_gates_change_layout() {
        let mut header = sample_header();
        header.version = FormatVersion { major: 1, minor: 2 };
        header.reference_channel = None;
        header.samples_per_data_block = 60;
        header.eval_board_mode = 0;
        let decoded = decode_header(&encode_header(&header).unwrap()).unwrap();
        assert_eq!(decoded, header);

        let v3 = encode_header(&header).unwrap().len();
        header.version = FormatVersion { major: 1, minor: 0 };
        header.num_temp_sensor_channels = 0;
        let v1 = encode_header(&header).unwrap().len();
        assert_eq!(v3 - v1, 2);
    }

    #[test]
    fn notch_codes_map_to_hertz() {
        let mut header = sample_header();
        header.frequency.notch_filter_frequency = 60;
        let decoded = decode_header(&encode_header(&header).unwrap()).unwrap();
        assert_eq!(decoded.notch_filter_hz(), 60);
    }

    #[test]
    fn duplicate_native_order_is_rejected() {
        let header = session_header(
            30000.0,
            vec![amplifier_channel("A", 1, 4), amplifier_channel("A", 1, 4)],
            vec![],
        );
        let result = decode_header(&encode_header(&header).unwrap());
        assert!(matches!(result, Err(SpikeError::MalformedHeader(_))));
    }

    #[test]
    fn derived_rates_follow_block_size() {
        let header = sample_header();
        assert_eq!(header.aux_input_sample_rate(), 5000.0);
        assert_eq!(header.supply_voltage_sample_rate(), 20000.0 / 128.0);
    }

    #[test]
    fn channel_count_must_match_metadata() {
        let header = sample_header();
        assert!(header.check_channel_count(3).is_ok());
        assert!(matches!(
            header.check_channel_count(32),
            Err(SpikeError::ChannelCountMismatch { header: 3, metadata: 32 })
        ));
    }

    /// Byte offset of the first channel record in an encoded header.
    fn find_channel_record(bytes: &[u8]) -> usize {
        let needle: Vec<u8> = "A-000"
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        let position = bytes
            .windows(needle.len())
            .position(|window| window == needle.as_slice())
            .unwrap();
        // Back up over the length prefix of the native name.
        position - 4
    }
}
