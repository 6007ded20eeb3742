//! Parallel, cancellable per-chip analysis of a whole image.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use metrics::{counter, histogram};
use ndarray::Array5;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

use crate::cancel::CancellationToken;
use crate::category::CategoryManager;
use crate::chip::{validate_image, Chip, ChipRegions, TileSize};
use crate::config::PipelineConfig;
use crate::decoder::{BoxDecoder, ModelOutput};
use crate::error::{EngineError, PipelineError};
use crate::postprocessing::process_chip_results;
use crate::preprocessing::to_input_tensor;
use crate::resources::ModelResources;

// ============================================================================
// Seams
// ============================================================================

/// Turns one chip into image-space observations.
pub trait ChipAnalyzer: Send + Sync {
    fn analyze_chip(&self, chip: &Chip) -> Result<CategoryManager, PipelineError>;
}

impl<F> ChipAnalyzer for F
where
    F: Fn(&Chip) -> Result<CategoryManager, PipelineError> + Send + Sync,
{
    fn analyze_chip(&self, chip: &Chip) -> Result<CategoryManager, PipelineError> {
        self(chip)
    }
}

/// The external detection model.
///
/// Takes a `(1, 1, 3, Th, Tw)` input tensor and returns the raw box and
/// class tensors.
pub trait InferenceEngine: Send + Sync {
    fn infer(&self, input: &Array5<f32>) -> Result<ModelOutput, EngineError>;
}

// ============================================================================
// ModelChipAnalyzer
// ============================================================================

/// Preprocess, infer, decode and map one chip.
///
/// Engine failures degrade to an empty result for the chip. Decoder errors
/// (tensor shape mismatches) propagate.
pub struct ModelChipAnalyzer<E> {
    engine: E,
    decoder: BoxDecoder,
    tile: TileSize,
}

impl<E: InferenceEngine> ModelChipAnalyzer<E> {
    #[must_use]
    pub fn new(engine: E, resources: &ModelResources, tile: TileSize) -> Self {
        Self {
            engine,
            decoder: resources.decoder(),
            tile,
        }
    }

    #[must_use]
    pub fn decoder(&self) -> &BoxDecoder {
        &self.decoder
    }
}

impl<E: InferenceEngine> ChipAnalyzer for ModelChipAnalyzer<E> {
    fn analyze_chip(&self, chip: &Chip) -> Result<CategoryManager, PipelineError> {
        let input = to_input_tensor(chip, self.tile)?;

        let output = match self.engine.infer(&input) {
            Ok(output) => output,
            Err(e) => {
                counter!("chipwise.chips.degraded").increment(1);
                warn!(error = %e, region = ?chip.region(), "Inference failed, chip yields no detections");
                return Ok(CategoryManager::new());
            }
        };

        let mut manager = self.decoder.decode(&output)?;
        process_chip_results(chip.offset(), self.tile, &mut manager);
        Ok(manager)
    }
}

// ============================================================================
// analyze
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Per-chip results of one image.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// One manager per completed chip, in chip order.
    pub managers: Vec<CategoryManager>,
    /// True if cancellation stopped chips from being started.
    pub cancelled: bool,
    pub chips_total: usize,
}

impl Analysis {
    #[must_use]
    pub fn chips_completed(&self) -> usize {
        self.managers.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.managers.len() == self.chips_total
    }
}

/// Tiles `image` and runs `analyzer` on every chip, at most
/// `config.max_concurrent_chips` at a time.
///
/// `cancel` is polled before each chip is started; chips already running
/// finish and their results are kept. `progress` is called from worker
/// threads after each completed chip.
///
/// # Errors
///
/// `InvalidArgument` for an empty image or invalid config, `ImageTooLarge`
/// when the chip count exceeds `config.max_chips`, and the first chip error
/// (in chip order) if any chip fails. No chips are started after a failure.
#[instrument(
    skip_all,
    fields(width = image.width(), height = image.height(), max_concurrent = config.max_concurrent_chips)
)]
pub async fn analyze<A, P>(
    image: Arc<RgbImage>,
    analyzer: Arc<A>,
    config: &PipelineConfig,
    cancel: &CancellationToken,
    progress: P,
) -> Result<Analysis, PipelineError>
where
    A: ChipAnalyzer + ?Sized + 'static,
    P: Fn(Progress) + Send + Sync + 'static,
{
    config.validate()?;
    validate_image(&image)?;

    let tile = config.tile()?;
    let total = tile.chip_count(image.width(), image.height());
    if let Some(max) = config.max_chips {
        if total > max {
            return Err(PipelineError::ImageTooLarge { chips: total, max });
        }
    }

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_chips));
    let completed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicBool::new(false));
    let progress = Arc::new(progress);
    let mut tasks = JoinSet::new();
    let mut cancelled = false;

    for (index, region) in ChipRegions::new(image.width(), image.height(), tile).enumerate() {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?;

        if failed.load(Ordering::SeqCst) {
            break;
        }
        if cancel.is_cancelled() {
            debug!(started = index, total, "Analysis cancelled");
            cancelled = true;
            break;
        }

        let image = Arc::clone(&image);
        let analyzer = Arc::clone(&analyzer);
        let completed = Arc::clone(&completed);
        let failed = Arc::clone(&failed);
        let progress = Arc::clone(&progress);

        tasks.spawn_blocking(move || {
            let _permit = permit;
            let start = Instant::now();
            let chip = Chip::crop(&image, region);
            let result = analyzer.analyze_chip(&chip);
            histogram!("chipwise.chip.duration_ms").record(start.elapsed().as_millis() as f64);

            match &result {
                Ok(_) => {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    counter!("chipwise.chips.completed").increment(1);
                    (*progress)(Progress {
                        completed: done,
                        total,
                    });
                }
                Err(e) => {
                    warn!(error = %e, chip = index, "Chip analysis failed");
                    failed.store(true, Ordering::SeqCst);
                }
            }
            (index, result)
        });
    }

    let mut results = Vec::with_capacity(total);
    let mut worker_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => results.push(entry),
            Err(e) => {
                error!(error = %e, "Chip worker panicked");
                worker_error.get_or_insert(PipelineError::Worker(e.to_string()));
            }
        }
    }
    if let Some(e) = worker_error {
        return Err(e);
    }

    results.sort_by_key(|(index, _)| *index);
    let managers = results
        .into_iter()
        .map(|(_, result)| result)
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        chips_total = total,
        chips_completed = managers.len(),
        cancelled,
        "Analysis finished"
    );

    Ok(Analysis {
        managers,
        cancelled,
        chips_total: total,
    })
}
