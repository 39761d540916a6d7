pub mod header;
pub mod traces;
pub mod writer;

pub use header::{
    decode_header, read_header, ChannelDescriptor, ChannelRoster, FormatVersion,
    FrequencyParameters, HeaderDecoder, Notes, SessionHeader, SignalGroup, SignalKind,
    SpikeTrigger,
};
pub use traces::{
    onset_times, read_amplifier_trace, read_digital_trace, read_stimulus_onsets,
    rising_edge_indices,
};
pub use writer::{encode_header, write_amplifier_trace, write_digital_trace, write_header};
