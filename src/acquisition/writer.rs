// src/acquisition/writer.rs

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use super::header::{ChannelDescriptor, SessionHeader, HEADER_MAGIC};
use crate::error::{Result, SpikeError};

/// Encodes a header in the layout `HeaderDecoder` reads. Enabled groups get
/// one record per retained channel whose `port_number` matches the group.
pub fn encode_header(header: &SessionHeader) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    write_header_to(&mut bytes, header)?;
    Ok(bytes)
}

/// Writes `info.rhd`.
pub fn write_header<P: AsRef<Path>>(path: P, header: &SessionHeader) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| SpikeError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    write_header_to(&mut writer, header)
        .and_then(|()| writer.flush())
        .map_err(|e| SpikeError::io(path, e))
}

fn write_header_to<W: Write>(out: &mut W, header: &SessionHeader) -> io::Result<()> {
    out.write_u32::<LittleEndian>(HEADER_MAGIC)?;
    out.write_i16::<LittleEndian>(header.version.major)?;
    out.write_i16::<LittleEndian>(header.version.minor)?;
    out.write_f32::<LittleEndian>(header.sample_rate)?;

    let freq = &header.frequency;
    out.write_i16::<LittleEndian>(freq.dsp_enabled)?;
    for value in [
        freq.actual_dsp_cutoff_frequency,
        freq.actual_lower_bandwidth,
        freq.actual_upper_bandwidth,
        freq.desired_dsp_cutoff_frequency,
        freq.desired_lower_bandwidth,
        freq.desired_upper_bandwidth,
    ] {
        out.write_f32::<LittleEndian>(value)?;
    }
    out.write_i16::<LittleEndian>(match freq.notch_filter_frequency {
        50 => 1,
        60 => 2,
        _ => 0,
    })?;
    out.write_f32::<LittleEndian>(freq.desired_impedance_test_frequency)?;
    out.write_f32::<LittleEndian>(freq.actual_impedance_test_frequency)?;

    write_qstring(out, &header.notes.note1)?;
    write_qstring(out, &header.notes.note2)?;
    write_qstring(out, &header.notes.note3)?;

    if header.version.at_least(1, 1) {
        out.write_i16::<LittleEndian>(header.num_temp_sensor_channels)?;
    }
    if header.version.at_least(1, 3) {
        out.write_i16::<LittleEndian>(header.eval_board_mode)?;
    }
    if header.version.major > 1 {
        write_qstring(out, header.reference_channel.as_deref().unwrap_or_default())?;
    }

    out.write_i16::<LittleEndian>(header.signal_groups.len() as i16)?;
    for (index, group) in header.signal_groups.iter().enumerate() {
        let port_number = index as i16 + 1;
        let records: Vec<&ChannelDescriptor> = header
            .channels
            .iter()
            .filter(|channel| channel.port_number == port_number)
            .collect();

        write_qstring(out, &group.name)?;
        write_qstring(out, &group.prefix)?;
        out.write_i16::<LittleEndian>(group.enabled)?;
        if group.enabled > 0 {
            out.write_i16::<LittleEndian>(records.len() as i16)?;
        } else {
            out.write_i16::<LittleEndian>(group.num_channels)?;
        }
        out.write_i16::<LittleEndian>(group.num_amp_channels)?;

        if group.enabled > 0 {
            for channel in records {
                write_channel(out, channel)?;
            }
        }
    }
    Ok(())
}

/// Length in bytes, then UTF-16LE units. Empty strings have length 0.
fn write_qstring<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let units: Vec<u16> = value.encode_utf16().collect();
    out.write_u32::<LittleEndian>(units.len() as u32 * 2)?;
    for unit in units {
        out.write_u16::<LittleEndian>(unit)?;
    }
    Ok(())
}

fn write_channel<W: Write>(out: &mut W, channel: &ChannelDescriptor) -> io::Result<()> {
    write_qstring(out, &channel.native_name)?;
    write_qstring(out, &channel.custom_name)?;
    let trigger = &channel.trigger;
    for value in [
        channel.native_order,
        channel.custom_order,
        channel.kind.code(),
        1, // channel enabled
        channel.chip_channel,
        channel.board_stream,
        trigger.voltage_trigger_mode,
        trigger.voltage_threshold,
        trigger.digital_trigger_channel,
        trigger.digital_edge_polarity,
    ] {
        out.write_i16::<LittleEndian>(value)?;
    }
    out.write_f32::<LittleEndian>(channel.impedance_magnitude)?;
    out.write_f32::<LittleEndian>(channel.impedance_phase)
}

/// Writes raw amplifier codes as little-endian i16 (`amp-<name>.dat`).
pub fn write_amplifier_trace<P: AsRef<Path>>(path: P, codes: &[i16]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| SpikeError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for &code in codes {
        writer
            .write_i16::<LittleEndian>(code)
            .map_err(|e| SpikeError::io(path, e))?;
    }
    writer.flush().map_err(|e| SpikeError::io(path, e))
}

/// Writes a digital input line as little-endian u16.
pub fn write_digital_trace<P: AsRef<Path>>(path: P, samples: &[u16]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| SpikeError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for &sample in samples {
        writer
            .write_u16::<LittleEndian>(sample)
            .map_err(|e| SpikeError::io(path, e))?;
    }
    writer.flush().map_err(|e| SpikeError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::traces::{read_amplifier_trace, read_digital_trace};

    #[test]
    fn trace_writers_produce_two_bytes_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let amp = dir.path().join("amp-A-000.dat");
        let din = dir.path().join("board-DIGITAL-IN-02.dat");

        write_amplifier_trace(&amp, &[0, -1, 1000]).unwrap();
        write_digital_trace(&din, &[0, 1, 1, 0]).unwrap();

        assert_eq!(std::fs::metadata(&amp).unwrap().len(), 6);
        let microvolts = read_amplifier_trace(&amp).unwrap();
        for (got, want) in microvolts.iter().zip([0.0, -0.195, 195.0]) {
            assert!((got - want).abs() < 1e-9);
        }
        assert_eq!(read_digital_trace(&din).unwrap(), vec![0, 1, 1, 0]);
    }

    #[test]
    fn empty_strings_are_zero_length() {
        let mut bytes = Vec::new();
        write_qstring(&mut bytes, "").unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);

        bytes.clear();
        write_qstring(&mut bytes, "A").unwrap();
        assert_eq!(bytes, vec![2, 0, 0, 0, b'A', 0]);
    }

    #[test]
    fn written_file_matches_encoded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.rhd");
        let header = crate::synth::session_header(
            20000.0,
            vec![crate::synth::amplifier_channel("A", 1, 0)],
            vec![],
        );

        write_header(&path, &header).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, encode_header(&header).unwrap());
        assert_eq!(&bytes[..4], &HEADER_MAGIC.to_le_bytes());
    }
}
