//! Chip pixels to model input tensor.

use std::sync::LazyLock;

use ndarray::Array5;
use tracing::instrument;

use crate::chip::{Chip, TileSize};
use crate::error::PipelineError;

/// Normalised value `c * 2 / 255 - 1` for every byte `c`.
pub static COLOR_MAPPING: LazyLock<[f32; 256]> = LazyLock::new(|| {
    let mut mapping = [0.0f32; 256];
    for (c, slot) in mapping.iter_mut().enumerate() {
        *slot = normalize_color(c as u8);
    }
    mapping
});

/// Input tensor layout: sequence, batch, channel, height, width.
pub const SEQUENCE_LENGTH: usize = 1;
pub const BATCH_SIZE: usize = 1;
pub const CHANNELS: usize = 3;

fn normalize_color(c: u8) -> f32 {
    (f64::from(c) * 2.0 / f64::from(u8::MAX) - 1.0) as f32
}

/// Linear offset of `(channel, y, x)` inside one `tile`-sized input image.
#[must_use]
pub fn compute_index(tile: TileSize, channel: usize, y: usize, x: usize) -> usize {
    let (w, h) = (tile.width() as usize, tile.height() as usize);
    channel * w * h + y * w + x
}

/// Builds the `(1, 1, 3, Th, Tw)` input tensor for `chip`.
///
/// The tensor is mirrored on both axes: chip pixel `(i, j)` lands at
/// `[.., c, Th - j - 1, Tw - i - 1]`. Positions outside the chip are black.
///
/// # Errors
///
/// Returns `InvalidArgument` if the chip does not fit in `tile`.
#[instrument(skip(chip), fields(chip_w = chip.width(), chip_h = chip.height()))]
pub fn to_input_tensor(chip: &Chip, tile: TileSize) -> Result<Array5<f32>, PipelineError> {
    if chip.width() > tile.width() || chip.height() > tile.height() {
        return Err(PipelineError::InvalidArgument(format!(
            "chip {}x{} does not fit tile {}x{}",
            chip.width(),
            chip.height(),
            tile.width(),
            tile.height()
        )));
    }

    let (tw, th) = (tile.width() as usize, tile.height() as usize);
    let mapping = &*COLOR_MAPPING;
    let mut tensor = Array5::<f32>::from_elem(
        (SEQUENCE_LENGTH, BATCH_SIZE, CHANNELS, th, tw),
        mapping[0],
    );

    for (i, j, pixel) in chip.pixels().enumerate_pixels() {
        let h = th - j as usize - 1;
        let w = tw - i as usize - 1;
        for (c, &value) in pixel.0.iter().enumerate() {
            tensor[[0, 0, c, h, w]] = mapping[usize::from(value)];
        }
    }

    Ok(tensor)
}
