//! Watermark matching configuration

use serde::Serialize;

use crate::error::UnmarkError;

/// Domain whose links mark the watermark
pub const DEFAULT_TARGET_DOMAIN: &str = "gamma.app";

/// Fraction of the page width/height where the corner region starts.
///
/// Tuned by hand against exported decks, not derived from anything.
pub const DEFAULT_CORNER_THRESHOLD: f64 = 0.7;

/// Parameters shared by the detector and the remover.
///
/// The target domain is stored lowercased so matching against lowercased
/// URIs is case-insensitive on both sides.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WatermarkConfig {
    target_domain: String,
    corner_threshold: f64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            target_domain: DEFAULT_TARGET_DOMAIN.to_string(),
            corner_threshold: DEFAULT_CORNER_THRESHOLD,
        }
    }
}

impl WatermarkConfig {
    pub fn new(target_domain: &str, corner_threshold: f64) -> Result<Self, UnmarkError> {
        let target_domain = target_domain.trim().to_lowercase();
        if target_domain.is_empty() {
            return Err(UnmarkError::InvalidConfig(
                "target domain must not be empty".into(),
            ));
        }
        if !corner_threshold.is_finite() || !(0.0..=1.0).contains(&corner_threshold) {
            return Err(UnmarkError::InvalidConfig(format!(
                "corner threshold must be between 0 and 1, got {}",
                corner_threshold
            )));
        }
        Ok(Self {
            target_domain,
            corner_threshold,
        })
    }

    pub fn target_domain(&self) -> &str {
        &self.target_domain
    }

    pub fn corner_threshold(&self) -> f64 {
        self.corner_threshold
    }
}
