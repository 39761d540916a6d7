use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpikeError>;

/// Every failure the extraction pipeline can report. All of them are
/// permanent: they describe malformed input or misconfiguration.
#[derive(Error, Debug)]
pub enum SpikeError {
    /// Bad magic, truncated or overflowing field, unknown discriminant
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Odd byte length or empty sample file
    #[error("malformed trace: {0}")]
    MalformedTrace(String),

    #[error("invalid filter parameters: {0}")]
    InvalidFilterParameters(String),

    #[error("invalid segmentation: {0}")]
    InvalidSegmentation(String),

    /// A (stimulus, trial) pair declared by the schedule has no entry
    #[error("missing trial {trial} for stimulus {stimulus}")]
    MissingTrial { stimulus: u32, trial: u32 },

    /// A schedule entry outside `1..=n_trials`
    #[error("trial {trial} for stimulus {stimulus} is outside 1..={n_trials}")]
    TrialOutOfRange { stimulus: u32, trial: u32, n_trials: u32 },

    #[error("header declares {header} amplifier channels but array metadata lists {metadata}")]
    ChannelCountMismatch { header: usize, metadata: usize },

    #[error("behaviour log has {trials} trials but only {onsets} stimulus onsets were found")]
    TrialCountMismatch { trials: usize, onsets: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl SpikeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SpikeError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn header(reason: impl Into<String>) -> Self {
        SpikeError::MalformedHeader(reason.into())
    }
}
