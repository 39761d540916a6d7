use spike_extraction::acquisition::{
    decode_header, encode_header, read_header, write_header, SignalKind,
};
use spike_extraction::synth::{amplifier_channel, digital_in_channel, session_header};
use spike_extraction::SpikeError;

fn two_port_header() -> spike_extraction::acquisition::SessionHeader {
    let amplifiers = (0..3)
        .map(|i| amplifier_channel("A", 1, i))
        .chain((0..2).map(|i| amplifier_channel("B", 2, i)))
        .collect();
    session_header(30000.0, amplifiers, vec![digital_in_channel(3, 0)])
}

#[test]
fn test_header_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("info.rhd");
    let header = two_port_header();

    write_header(&path, &header).unwrap();
    let decoded = read_header(&path).unwrap();

    assert_eq!(decoded, header);
    assert_eq!(decoded.amplifier_channel_count(), 5);
    assert_eq!(decoded.digital_input_count(), 1);
    let names: Vec<&str> = decoded
        .amplifier_channels()
        .iter()
        .map(|c| c.native_name.as_str())
        .collect();
    assert_eq!(names, ["A-000", "A-001", "A-002", "B-000", "B-001"]);
    assert_eq!(decoded.channels.of(SignalKind::DigitalIn)[0].native_name, "DIGITAL-IN-01");
}

#[test]
fn test_every_truncation_is_an_error() {
    let bytes = encode_header(&two_port_header()).unwrap();
    for len in 0..bytes.len() {
        assert!(
            matches!(decode_header(&bytes[..len]), Err(SpikeError::MalformedHeader(_))),
            "prefix of {} bytes decoded",
            len
        );
    }
}

#[test]
fn test_unknown_notch_mode() {
    let mut bytes = encode_header(&two_port_header()).unwrap();
    // magic, version, sample rate, dsp flag, six bandwidth floats
    let notch = 4 + 4 + 4 + 2 + 6 * 4;
    bytes[notch..notch + 2].copy_from_slice(&7i16.to_le_bytes());

    let err = decode_header(&bytes).unwrap_err();
    assert!(err.to_string().contains("notch"), "{}", err);
}

#[test]
fn test_notch_modes_map_to_hertz() {
    let notch = 4 + 4 + 4 + 2 + 6 * 4;
    for (mode, hz) in [(0i16, 0u16), (1, 50), (2, 60)] {
        let mut bytes = encode_header(&two_port_header()).unwrap();
        bytes[notch..notch + 2].copy_from_slice(&mode.to_le_bytes());
        assert_eq!(decode_header(&bytes).unwrap().notch_filter_hz(), hz);
    }
}

#[test]
fn test_missing_header_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        read_header(dir.path().join("info.rhd")),
        Err(SpikeError::Io { .. })
    ));
}
