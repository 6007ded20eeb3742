//! Chip tiling: partitioning a source image into fixed-maximum-size tiles.

use image::{GenericImageView, Rgb, RgbImage};

use crate::error::PipelineError;
use crate::geometry::{Point, Region};
use crate::{DEFAULT_CHIP_HEIGHT, DEFAULT_CHIP_WIDTH};

/// Model input tile size. Both dimensions are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSize {
    width: u32,
    height: u32,
}

impl Default for TileSize {
    fn default() -> Self {
        Self {
            width: DEFAULT_CHIP_WIDTH,
            height: DEFAULT_CHIP_HEIGHT,
        }
    }
}

impl TileSize {
    /// # Errors
    ///
    /// `InvalidArgument` if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "tile size must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of tiles along each axis for a `w x h` image.
    #[must_use]
    pub fn grid(&self, w: u32, h: u32) -> (u32, u32) {
        (w.div_ceil(self.width), h.div_ceil(self.height))
    }

    #[must_use]
    pub fn chip_count(&self, w: u32, h: u32) -> usize {
        let (nx, ny) = self.grid(w, h);
        nx as usize * ny as usize
    }
}

// ============================================================================
// Chip regions
// ============================================================================

/// Lazily yields the tile regions of a `w x h` image.
///
/// Regions are produced column-major (all rows of column 0 first), matching
/// the order chips are numbered in. Together they cover `[0, w) x [0, h)`
/// exactly once.
#[derive(Debug, Clone)]
pub struct ChipRegions {
    width: u32,
    height: u32,
    tile: TileSize,
    grid: (u32, u32),
    next: u64,
}

impl ChipRegions {
    #[must_use]
    pub fn new(width: u32, height: u32, tile: TileSize) -> Self {
        Self {
            width,
            height,
            tile,
            grid: tile.grid(width, height),
            next: 0,
        }
    }

    fn total(&self) -> u64 {
        u64::from(self.grid.0) * u64::from(self.grid.1)
    }
}

impl Iterator for ChipRegions {
    type Item = Region;

    fn next(&mut self) -> Option<Region> {
        if self.next >= self.total() {
            return None;
        }
        let ny = u64::from(self.grid.1);
        // both quotients are bounded by the u32 grid dimensions
        let i = (self.next / ny) as u32;
        let j = (self.next % ny) as u32;
        self.next += 1;

        let left = i * self.tile.width;
        let top = j * self.tile.height;
        Some(Region::new(
            left,
            top,
            left.saturating_add(self.tile.width).min(self.width),
            top.saturating_add(self.tile.height).min(self.height),
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.total() - self.next).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChipRegions {}

// ============================================================================
// Chip
// ============================================================================

/// One tile of a source image: its region and the pixels it covers.
#[derive(Debug, Clone)]
pub struct Chip {
    region: Region,
    pixels: RgbImage,
}

impl Chip {
    /// Builds a chip from a region and its pixel grid.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the pixel grid does not match the region.
    pub fn new(region: Region, pixels: RgbImage) -> Result<Self, PipelineError> {
        if pixels.dimensions() != (region.width(), region.height()) {
            return Err(PipelineError::InvalidArgument(format!(
                "chip pixels are {:?} but region is {}x{}",
                pixels.dimensions(),
                region.width(),
                region.height()
            )));
        }
        Ok(Self { region, pixels })
    }

    /// Cuts `region` out of `image`.
    pub(crate) fn crop(image: &RgbImage, region: Region) -> Self {
        let pixels = image
            .view(region.left, region.top, region.width(), region.height())
            .to_image();
        Self { region, pixels }
    }

    /// Tiles `image` into chips of at most `tile` size.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an image with no pixels.
    pub fn from_image(image: &RgbImage, tile: TileSize) -> Result<Chips<'_>, PipelineError> {
        validate_image(image)?;
        Ok(Chips {
            image,
            regions: ChipRegions::new(image.width(), image.height(), tile),
        })
    }

    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    #[must_use]
    pub fn offset(&self) -> Point {
        self.region.location()
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.region.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.region.height()
    }

    /// Pixel at chip-local column `i`, row `j`.
    #[must_use]
    pub fn pixel(&self, i: u32, j: u32) -> Option<&Rgb<u8>> {
        if i < self.width() && j < self.height() {
            Some(self.pixels.get_pixel(i, j))
        } else {
            None
        }
    }

    #[must_use]
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

pub(crate) fn validate_image(image: &RgbImage) -> Result<(), PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::InvalidArgument(format!(
            "image has no pixels: {}x{}",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

/// Lazy chip sequence over a borrowed image.
pub struct Chips<'a> {
    image: &'a RgbImage,
    regions: ChipRegions,
}

impl Iterator for Chips<'_> {
    type Item = Chip;

    fn next(&mut self) -> Option<Chip> {
        self.regions
            .next()
            .map(|region| Chip::crop(self.image, region))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.regions.size_hint()
    }
}

impl ExactSizeIterator for Chips<'_> {}
