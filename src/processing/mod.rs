pub mod alignment;
pub mod detectors;
pub mod filters;
pub mod schedule;

pub use alignment::{AlignedSpikeTrain, TrialAligner, TrialSchedule, TrialWindow};
pub use detectors::{SpikeDetector, SpikeDetectorConfig, SpikeTimestampSet};
pub use filters::{BandPassFilter, BandPassFilterConfig};
pub use schedule::{build_schedule, read_behaviour_log, BehaviourRecord};
