//! Coordinate mapping and non-maximum suppression.

use std::collections::BTreeMap;

use metrics::counter;
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::cancel::CancellationToken;
use crate::category::{CategoryId, CategoryManager, Observation};
use crate::chip::TileSize;
use crate::error::PipelineError;
use crate::geometry::{iou, Point};

// ============================================================================
// Coordinate mapping
// ============================================================================

/// Maps chip-local normalised boxes to source-image pixels: scale by the
/// tile size, then translate by the chip offset.
pub fn process_chip_results(offset: Point, tile: TileSize, manager: &mut CategoryManager) {
    let (sx, sy) = (tile.width() as f32, tile.height() as f32);
    let (dx, dy) = (offset.x as f32, offset.y as f32);
    manager.map_boxes(|bbox| bbox.scale(sx, sy).translate(dx, dy));
}

// ============================================================================
// Suppression
// ============================================================================

/// Greedy non-maximum suppression over observations of one category.
///
/// Candidates are visited by descending confidence (ties keep input order).
/// Scanning stops at the first confidence below `confidence_threshold`; a
/// candidate is dropped if its IOU with any kept observation exceeds
/// `iou_threshold`. Observations with a non-finite confidence are ignored.
pub fn non_maximum_suppression<I>(
    observations: I,
    iou_threshold: f64,
    confidence_threshold: f64,
) -> Vec<Observation>
where
    I: IntoIterator<Item = Observation>,
{
    let mut sorted: Vec<Observation> = observations
        .into_iter()
        .filter(|o| o.confidence().is_finite())
        .collect();
    sorted.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

    let mut selected: Vec<Observation> = Vec::new();
    for candidate in sorted {
        if candidate.confidence() < confidence_threshold {
            break;
        }
        let suppressed = selected
            .iter()
            .any(|kept| f64::from(iou(&candidate.bbox(), &kept.bbox())) > iou_threshold);
        if !suppressed {
            selected.push(candidate);
        }
    }
    selected
}

/// Outcome of `select_observations`.
#[derive(Debug, Clone)]
pub enum Selection {
    Completed(CategoryManager),
    Cancelled,
}

impl Selection {
    #[must_use]
    pub fn into_completed(self) -> Option<CategoryManager> {
        match self {
            Self::Completed(manager) => Some(manager),
            Self::Cancelled => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Per-category suppression within each chip's manager, then again per
/// category across the merged survivors of all chips.
///
/// # Errors
///
/// `InvalidArgument` if a threshold is not in `[0, 1]`.
#[instrument(skip(managers, cancel), fields(chips = managers.len()))]
pub fn select_observations(
    managers: &[CategoryManager],
    iou_threshold: f64,
    confidence_threshold: f64,
    cancel: &CancellationToken,
) -> Result<Selection, PipelineError> {
    validate_threshold("iou_threshold", iou_threshold)?;
    validate_threshold("confidence_threshold", confidence_threshold)?;

    let candidates: usize = managers.iter().map(CategoryManager::len).sum();
    counter!("chipwise.nms.candidates").increment(candidates as u64);

    let per_chip: Option<Vec<Vec<(CategoryId, String, Vec<Observation>)>>> = managers
        .par_iter()
        .map(|manager| {
            if cancel.is_cancelled() {
                return None;
            }
            Some(suppress_per_category(
                manager,
                iou_threshold,
                confidence_threshold,
            ))
        })
        .collect();
    let Some(per_chip) = per_chip else {
        debug!("Selection cancelled during per-chip suppression");
        return Ok(Selection::Cancelled);
    };

    let mut merged: BTreeMap<CategoryId, (String, Vec<Observation>)> = BTreeMap::new();
    for (id, label, observations) in per_chip.into_iter().flatten() {
        merged
            .entry(id)
            .or_insert_with(|| (label, Vec::new()))
            .1
            .extend(observations);
    }

    if cancel.is_cancelled() {
        debug!("Selection cancelled before merge");
        return Ok(Selection::Cancelled);
    }

    let groups: Vec<(CategoryId, String, Vec<Observation>)> = merged
        .into_iter()
        .map(|(id, (label, observations))| (id, label, observations))
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(id, label, observations)| {
            let kept = non_maximum_suppression(observations, iou_threshold, confidence_threshold);
            (id, label, kept)
        })
        .collect();

    let mut result = CategoryManager::new();
    for (id, label, observations) in groups {
        for observation in observations {
            result.observe_labeled(id, &label, observation.confidence(), observation.bbox());
        }
    }

    counter!("chipwise.nms.selected").increment(result.len() as u64);
    debug!(candidates, selected = result.len(), "Selection completed");
    Ok(Selection::Completed(result))
}

fn suppress_per_category(
    manager: &CategoryManager,
    iou_threshold: f64,
    confidence_threshold: f64,
) -> Vec<(CategoryId, String, Vec<Observation>)> {
    manager
        .categories()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|category| {
            let kept = non_maximum_suppression(
                manager.observations_of(category.id()).copied(),
                iou_threshold,
                confidence_threshold,
            );
            (category.id(), category.label().to_string(), kept)
        })
        .collect()
}

fn validate_threshold(name: &str, value: f64) -> Result<(), PipelineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::InvalidArgument(format!(
            "{name} must be in [0, 1], got {value}"
        )));
    }
    Ok(())
}
