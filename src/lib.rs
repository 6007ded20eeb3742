//! Chip-based object detection for images larger than the model input.
//!
//! An image is tiled into fixed-size chips, each chip is preprocessed and run
//! through an [`InferenceEngine`], the raw box and class tensors are decoded
//! against the anchor table, and the chip-local boxes are mapped back to image
//! pixels. [`select_observations`] then suppresses duplicates per category,
//! first within each chip and again across the whole image.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]

pub mod analysis;
pub mod anchors;
pub mod cancel;
pub mod category;
pub mod chip;
pub mod config;
pub mod decoder;
pub mod error;
pub mod geometry;
pub mod labels;
pub mod mega_category;
pub mod postprocessing;
pub mod preprocessing;
pub mod resources;
pub mod store;

pub use analysis::{
    analyze, Analysis, ChipAnalyzer, InferenceEngine, ModelChipAnalyzer, Progress,
};
pub use anchors::{Anchor, AnchorTable};
pub use cancel::CancellationToken;
pub use category::{Category, CategoryId, CategoryManager, Observation, ObservationId};
pub use chip::{Chip, ChipRegions, TileSize};
pub use config::PipelineConfig;
pub use decoder::{BoxDecoder, ModelOutput};
pub use error::{EngineError, ErrorKind, PipelineError, PipelineResult, ResourceError};
pub use geometry::{iou, Point, Rect, Region};
pub use labels::{LabelEntry, LabelTable};
pub use mega_category::{MegaCategory, MegaCategoryMap};
pub use postprocessing::{non_maximum_suppression, process_chip_results, select_observations, Selection};
pub use preprocessing::to_input_tensor;
pub use resources::ModelResources;
pub use store::{ImageRecord, ObservationRecord, ObservationStore};
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use store::SqliteStore;

pub const DEFAULT_CHIP_WIDTH: u32 = 300;
pub const DEFAULT_CHIP_HEIGHT: u32 = 300;
pub const DEFAULT_IOU_THRESHOLD: f64 = 0.5;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.1;
