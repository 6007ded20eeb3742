use serde::{Deserialize, Serialize};

use crate::chip::TileSize;
use crate::error::PipelineError;
use crate::{
    DEFAULT_CHIP_HEIGHT, DEFAULT_CHIP_WIDTH, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    pub iou_threshold: f64,
    pub confidence_threshold: f64,
    pub max_concurrent_chips: usize,
    /// Upper bound on chips per image; `None` is unlimited.
    pub max_chips: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_CHIP_WIDTH,
            tile_height: DEFAULT_CHIP_HEIGHT,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_concurrent_chips: 4,
            max_chips: None,
        }
    }
}

impl PipelineConfig {
    /// Loads a JSON config document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for malformed JSON or values rejected by `validate`.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidArgument(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// `InvalidArgument` naming the first field that is out of range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(PipelineError::InvalidArgument(
                "tile dimensions must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(PipelineError::InvalidArgument(
                "iou_threshold must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(PipelineError::InvalidArgument(
                "confidence_threshold must be in [0, 1]".into(),
            ));
        }
        if self.max_concurrent_chips == 0 {
            return Err(PipelineError::InvalidArgument(
                "max_concurrent_chips must be > 0".into(),
            ));
        }
        if self.max_chips == Some(0) {
            return Err(PipelineError::InvalidArgument(
                "max_chips must be > 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidArgument` if either tile dimension is zero.
    pub fn tile(&self) -> Result<TileSize, PipelineError> {
        TileSize::new(self.tile_width, self.tile_height)
    }
}
