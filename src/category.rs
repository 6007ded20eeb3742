//! Category registry: categories, observations, and the manager that owns
//! both.
//!
//! Observations refer to their category by id. The manager owns every
//! category and observation and keeps the membership index; it is the only
//! place membership can change, so an observation always belongs to exactly
//! one category.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use image::Rgb;

use crate::error::PipelineError;
use crate::geometry::Rect;

pub type CategoryId = u32;

// ============================================================================
// Colours
// ============================================================================

/// System colours followed by the recommended colours.
pub const PALETTE: [Rgb<u8>; 22] = [
    Rgb([255, 59, 48]),
    Rgb([255, 149, 0]),
    Rgb([255, 204, 0]),
    Rgb([76, 217, 100]),
    Rgb([90, 200, 250]),
    Rgb([0, 122, 255]),
    Rgb([88, 86, 214]),
    Rgb([255, 45, 85]),
    Rgb([231, 159, 213]),
    Rgb([12, 255, 255]),
    Rgb([1, 69, 12]),
    Rgb([0, 0, 0]),
    Rgb([186, 0, 75]),
    Rgb([203, 251, 211]),
    Rgb([139, 87, 42]),
    Rgb([196, 223, 255]),
    Rgb([255, 204, 145]),
    Rgb([146, 1, 176]),
    Rgb([255, 239, 239]),
    Rgb([74, 74, 74]),
    Rgb([155, 155, 155]),
    Rgb([64, 1, 140]),
];

pub const DEFAULT_BOUNDING_BOX_COLOR: Rgb<u8> = PALETTE[0];

/// Display colour for a category. Best effort only: distinct categories may
/// share a colour.
#[must_use]
pub fn color_for(id: CategoryId, label: &str) -> Rgb<u8> {
    let n = PALETTE.len();
    let index = if id > 0 {
        (id as usize - 1) % n
    } else {
        let digest = blake3::hash(label.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % n as u64) as usize
    };
    PALETTE[index]
}

// ============================================================================
// Category
// ============================================================================

#[derive(Debug, Clone)]
pub struct Category {
    id: CategoryId,
    label: String,
    color: Rgb<u8>,
}

impl Category {
    fn new(id: CategoryId, label: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            color: color_for(id, label),
        }
    }

    #[must_use]
    pub fn id(&self) -> CategoryId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn color(&self) -> Rgb<u8> {
        self.color
    }
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.label == other.label
    }
}

impl Eq for Category {}

impl Hash for Category {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.label.hash(state);
    }
}

// ============================================================================
// Observation
// ============================================================================

/// A single detection. Compared and hashed by exact value.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    category: CategoryId,
    confidence: f64,
    bbox: Rect,
}

impl Observation {
    #[must_use]
    pub fn new(category: CategoryId, confidence: f64, bbox: Rect) -> Self {
        Self {
            category,
            confidence,
            bbox,
        }
    }

    #[must_use]
    pub fn category(&self) -> CategoryId {
        self.category
    }

    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    #[must_use]
    pub fn bbox(&self) -> Rect {
        self.bbox
    }

    fn key(&self) -> (CategoryId, u64, [u32; 4]) {
        (self.category, self.confidence.to_bits(), self.bbox.bits())
    }
}

impl PartialEq for Observation {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Observation {}

impl Hash for Observation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Handle to an observation inside one `CategoryManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationId(usize);

// ============================================================================
// CategoryManager
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CategoryManager {
    categories: BTreeMap<CategoryId, Category>,
    slots: Vec<Option<Observation>>,
    members: BTreeMap<CategoryId, Vec<ObservationId>>,
    lookup: HashMap<Observation, ObservationId>,
}

impl CategoryManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the category registered under `id`, creating it with `label`
    /// if absent. An existing category keeps its original label.
    pub fn get_or_create(&mut self, id: CategoryId, label: &str) -> &Category {
        self.categories
            .entry(id)
            .or_insert_with(|| Category::new(id, label))
    }

    #[must_use]
    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    /// Categories in id order.
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    #[must_use]
    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    /// Registers an observation in `category`.
    ///
    /// Returns the existing handle if an equal observation is already a
    /// member.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `category` was never created in this manager.
    pub fn observe(
        &mut self,
        category: CategoryId,
        confidence: f64,
        bbox: Rect,
    ) -> Result<ObservationId, PipelineError> {
        if !self.categories.contains_key(&category) {
            return Err(PipelineError::InvalidArgument(format!(
                "category {category} is not registered"
            )));
        }
        Ok(self.insert(Observation::new(category, confidence, bbox)))
    }

    /// `get_or_create` followed by `observe`.
    pub fn observe_labeled(
        &mut self,
        category: CategoryId,
        label: &str,
        confidence: f64,
        bbox: Rect,
    ) -> ObservationId {
        self.get_or_create(category, label);
        self.insert(Observation::new(category, confidence, bbox))
    }

    fn insert(&mut self, observation: Observation) -> ObservationId {
        if let Some(&existing) = self.lookup.get(&observation) {
            return existing;
        }
        let id = ObservationId(self.slots.len());
        self.slots.push(Some(observation));
        self.members
            .entry(observation.category)
            .or_default()
            .push(id);
        self.lookup.insert(observation, id);
        id
    }

    #[must_use]
    pub fn observation(&self, id: ObservationId) -> Option<&Observation> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Member handles of `category`, in insertion order.
    #[must_use]
    pub fn members(&self, category: CategoryId) -> &[ObservationId] {
        self.members.get(&category).map_or(&[], Vec::as_slice)
    }

    /// Observations of `category`, in insertion order.
    pub fn observations_of(&self, category: CategoryId) -> impl Iterator<Item = &Observation> {
        self.members(category)
            .iter()
            .filter_map(|id| self.observation(*id))
    }

    /// All observations, grouped by category in id order.
    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.members
            .values()
            .flatten()
            .filter_map(|id| self.observation(*id))
    }

    /// Number of live observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Removes an observation from its category.
    pub fn remove(&mut self, id: ObservationId) -> Option<Observation> {
        let observation = self.slots.get_mut(id.0)?.take()?;
        self.lookup.remove(&observation);
        if let Some(members) = self.members.get_mut(&observation.category) {
            members.retain(|m| *m != id);
        }
        Some(observation)
    }

    /// Moves an observation into `category`.
    ///
    /// Returns the handle now holding the observation: `id` itself, or the
    /// handle of an equal observation already in `category`, in which case
    /// the two are merged.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `id` is not a live observation or `category` is
    /// not registered.
    pub fn reset_category(
        &mut self,
        id: ObservationId,
        category: CategoryId,
    ) -> Result<ObservationId, PipelineError> {
        if !self.categories.contains_key(&category) {
            return Err(PipelineError::InvalidArgument(format!(
                "category {category} is not registered"
            )));
        }
        let observation = self.remove(id).ok_or_else(|| {
            PipelineError::InvalidArgument(format!("observation {id:?} does not exist"))
        })?;

        let moved = Observation { category, ..observation };
        if let Some(&existing) = self.lookup.get(&moved) {
            return Ok(existing);
        }
        self.slots[id.0] = Some(moved);
        self.members.entry(category).or_default().push(id);
        self.lookup.insert(moved, id);
        Ok(id)
    }

    /// Rewrites every bounding box in place. Observations that become equal
    /// are merged into the earliest one.
    pub(crate) fn map_boxes(&mut self, f: impl Fn(Rect) -> Rect) {
        self.lookup.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(observation) = slot else { continue };
            observation.bbox = f(observation.bbox);
            if self.lookup.contains_key(&*observation) {
                *slot = None;
            } else {
                self.lookup.insert(*observation, ObservationId(index));
            }
        }
        let slots = &self.slots;
        for members in self.members.values_mut() {
            members.retain(|id| slots[id.0].is_some());
        }
    }
}
