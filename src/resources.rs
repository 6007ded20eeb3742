//! Immutable model resources: anchors, class labels and mega-categories.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use tracing::{debug, instrument};

use crate::anchors::AnchorTable;
use crate::decoder::BoxDecoder;
use crate::error::ResourceError;
use crate::labels::LabelTable;
use crate::mega_category::MegaCategoryMap;

pub const ANCHORS_FILE: &str = "anchors.csv";
pub const CLASS_LABELS_FILE: &str = "class_labels.txt";
pub const MEGA_CATEGORY_FILE: &str = "mega_category_mapping.json";

const BUNDLED_ANCHORS: &str = include_str!("../resources/anchors.csv");
const BUNDLED_CLASS_LABELS: &str = include_str!("../resources/class_labels.txt");
const BUNDLED_MEGA_CATEGORIES: &str = include_str!("../resources/mega_category_mapping.json");

static BUNDLED: LazyLock<Result<ModelResources, ResourceError>> = LazyLock::new(|| {
    ModelResources::from_parts(
        BUNDLED_ANCHORS,
        BUNDLED_CLASS_LABELS,
        BUNDLED_MEGA_CATEGORIES,
    )
});

/// Shared, read-only resource set. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct ModelResources {
    pub anchors: Arc<AnchorTable>,
    pub labels: Arc<LabelTable>,
    pub mega_categories: Arc<MegaCategoryMap>,
}

impl ModelResources {
    /// The resources shipped with the crate, parsed once per process.
    ///
    /// # Errors
    ///
    /// Returns the parse failure of a bundled file; every call sees the same
    /// error.
    pub fn bundled() -> Result<Self, ResourceError> {
        BUNDLED.clone()
    }

    /// Builds resources from document contents.
    ///
    /// # Errors
    ///
    /// Any resource that fails to parse.
    pub fn from_parts(
        anchors: &str,
        class_labels: &str,
        mega_categories: &str,
    ) -> Result<Self, ResourceError> {
        let resources = Self {
            anchors: Arc::new(AnchorTable::parse(anchors)?),
            labels: Arc::new(LabelTable::parse(class_labels)?),
            mega_categories: Arc::new(MegaCategoryMap::from_json(mega_categories)?),
        };
        debug!(
            anchors = resources.anchors.len(),
            classes = resources.labels.num_classes(),
            "Model resources loaded"
        );
        Ok(resources)
    }

    /// Loads `anchors.csv`, `class_labels.txt` and
    /// `mega_category_mapping.json` from `dir`.
    ///
    /// # Errors
    ///
    /// A missing or unreadable file, or any resource that fails to parse.
    #[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let dir = dir.as_ref();
        Self::from_parts(
            &read(&dir.join(ANCHORS_FILE))?,
            &read(&dir.join(CLASS_LABELS_FILE))?,
            &read(&dir.join(MEGA_CATEGORY_FILE))?,
        )
    }

    #[must_use]
    pub fn decoder(&self) -> BoxDecoder {
        BoxDecoder::new(Arc::clone(&self.anchors), Arc::clone(&self.labels))
    }
}

fn read(path: &Path) -> Result<String, ResourceError> {
    std::fs::read_to_string(path).map_err(|e| ResourceError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bundled_resources_match_the_model() {
        let resources = ModelResources::bundled().unwrap();
        assert_eq!(resources.anchors.len(), 1917);
        assert_eq!(resources.labels.num_classes(), 23);
        assert_eq!(resources.labels.label(0), Some("background"));

        let decoder = resources.decoder();
        assert_eq!(decoder.box_shape(), [4, 1917, 1]);
        assert_eq!(decoder.class_shape(), [1, 1, 23, 1, 1917]);
    }

    #[test]
    fn bundled_labels_resolve_mega_categories() {
        let resources = ModelResources::bundled().unwrap();
        let groups = &resources.mega_categories;
        assert_eq!(groups.lookup("Small Car").label(), "Civilian Vehicles");
        assert_eq!(groups.lookup("Bus").label(), "Civilian Vehicles");
        assert_eq!(groups.lookup("Building").label(), "Structures & Sites");
        assert_eq!(groups.lookup("Apple").label(), "Custom");

        // every bundled class belongs to a named group
        for entry in resources.labels.iter().skip(1) {
            assert!(!groups.lookup(&entry.label).is_custom(), "{}", entry.label);
        }
    }

    #[test]
    fn bundled_classes_get_distinct_colours() {
        use crate::decoder::ModelOutput;
        use ndarray::{Array3, Array5};
        use std::collections::HashSet;

        let resources = ModelResources::bundled().unwrap();
        let decoder = resources.decoder();
        let output = ModelOutput {
            boxes: Array3::<f32>::zeros((4, decoder.num_anchors(), 1)).into_dyn(),
            classes: Array5::<f32>::zeros((1, 1, decoder.num_classes(), 1, decoder.num_anchors()))
                .into_dyn(),
        };

        let cm = decoder.decode(&output).unwrap();
        let ids: Vec<_> = cm.categories().map(|c| c.id()).collect();
        assert_eq!(ids, (1..=22).collect::<Vec<_>>());
        assert_eq!(cm.category(18).unwrap().label(), resources.labels.label(18).unwrap());

        let colours: HashSet<[u8; 3]> = cm.categories().map(|c| c.color().0).collect();
        assert_eq!(colours.len(), 22);
    }

    #[test]
    fn bundled_anchors_lie_in_unit_frame() {
        let resources = ModelResources::bundled().unwrap();
        for anchor in resources.anchors.iter() {
            assert!(anchor.ymin < anchor.ymax && anchor.xmin < anchor.xmax);
            let (cy, cx) = anchor.center();
            assert!((0.0..=1.0).contains(&cy) && (0.0..=1.0).contains(&cx));
        }
    }

    #[test]
    fn from_dir_reads_all_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ANCHORS_FILE), "0.0,0.0,1.0,1.0\n").unwrap();
        std::fs::write(dir.path().join(CLASS_LABELS_FILE), "item {id:1 name:'Plane'}\n").unwrap();
        std::fs::write(dir.path().join(MEGA_CATEGORY_FILE), "[]").unwrap();

        let resources = ModelResources::from_dir(dir.path()).unwrap();
        assert_eq!(resources.anchors.len(), 1);
        assert_eq!(resources.labels.num_classes(), 2);
        assert!(resources.mega_categories.lookup("Plane").is_custom());
    }

    #[test]
    fn from_dir_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            ModelResources::from_dir(dir.path()),
            Err(ResourceError::Read { .. })
        );
    }

    #[test]
    fn from_parts_propagates_parse_errors() {
        assert_matches!(
            ModelResources::from_parts("1,2\n", "id:1 name:'A'", "[]"),
            Err(ResourceError::MalformedAnchor { line: 1, .. })
        );
        assert_matches!(
            ModelResources::from_parts("0,0,1,1", "id:1", "[]"),
            Err(ResourceError::LabelCountMismatch { .. })
        );
    }
}
