pub mod acquisition;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod synth;
pub mod utils;

#[cfg(feature = "python")]
pub mod bindings {
    pub mod python;
}

pub use error::{Result, SpikeError};
