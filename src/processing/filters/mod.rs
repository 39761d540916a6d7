pub mod bandpass;
pub mod ellip;

use crate::error::Result;

pub use bandpass::{BandPassFilter, BandPassFilterConfig};

/// A whole-segment filter applied ahead of thresholding.
pub trait FilterInstance: Send + Sync {
    fn id(&self) -> String;
    fn apply(&self, signal: &[f64]) -> Result<Vec<f64>>;
}
