//! Raw model output to per-chip observations.

use std::sync::Arc;

use ndarray::{ArrayD, ArrayView3, ArrayView5, Ix3, Ix5};
use tracing::{debug, instrument};

use crate::anchors::{Anchor, AnchorTable};
use crate::category::CategoryManager;
use crate::error::PipelineError;
use crate::geometry::Rect;
use crate::labels::LabelTable;

/// Box-encoding scale factors from the model's training configuration.
pub const Y_SCALE: f64 = 10.0;
pub const X_SCALE: f64 = 10.0;
pub const HEIGHT_SCALE: f64 = 5.0;
pub const WIDTH_SCALE: f64 = 5.0;

/// The two output tensors of one inference call.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Box encodings, `(4, anchors, 1)`.
    pub boxes: ArrayD<f32>,
    /// Class logits, `(1, 1, classes, 1, anchors)`.
    pub classes: ArrayD<f32>,
}

/// Probability distribution over `logits`. Empty in, empty out.
#[must_use]
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Decodes one box encoding `(ty, tx, th, tw)` against `anchor`.
///
/// The result is mirrored on both axes to undo the input tensor mirroring.
#[must_use]
pub fn decode_box(encoding: [f64; 4], anchor: &Anchor) -> Rect {
    let [ty, tx, th, tw] = encoding;
    let ty = ty / Y_SCALE;
    let tx = tx / X_SCALE;
    let th = th / HEIGHT_SCALE;
    let tw = tw / WIDTH_SCALE;

    let (y_a_ctr, x_a_ctr) = anchor.center();
    let (ha, wa) = anchor.size();

    let w = tw.exp() * wa;
    let h = th.exp() * ha;
    let y_ctr = ty * ha + y_a_ctr;
    let x_ctr = tx * wa + x_a_ctr;

    let y_min = y_ctr - h / 2.0;
    let x_min = x_ctr - w / 2.0;
    let y_max = y_ctr + h / 2.0;
    let x_max = x_ctr + w / 2.0;

    Rect::new(
        (1.0 - x_max) as f32,
        (1.0 - y_max) as f32,
        (1.0 - x_min) as f32,
        (1.0 - y_min) as f32,
    )
}

#[derive(Debug, Clone)]
pub struct BoxDecoder {
    anchors: Arc<AnchorTable>,
    labels: Arc<LabelTable>,
}

impl BoxDecoder {
    #[must_use]
    pub fn new(anchors: Arc<AnchorTable>, labels: Arc<LabelTable>) -> Self {
        Self { anchors, labels }
    }

    #[must_use]
    pub fn num_anchors(&self) -> usize {
        self.anchors.len()
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.labels.num_classes()
    }

    /// Expected shape of the box tensor.
    #[must_use]
    pub fn box_shape(&self) -> [usize; 3] {
        [4, self.num_anchors(), 1]
    }

    /// Expected shape of the class tensor.
    #[must_use]
    pub fn class_shape(&self) -> [usize; 5] {
        [1, 1, self.num_classes(), 1, self.num_anchors()]
    }

    /// Decodes one chip's model output into chip-local normalised
    /// observations.
    ///
    /// Every non-background class of every in-frame anchor box becomes an
    /// observation; confidence filtering is left to suppression. Categories
    /// are keyed by class index and named from the label table.
    ///
    /// # Errors
    ///
    /// `ModelShape` if either tensor does not have the expected shape.
    #[instrument(skip(self, output), fields(anchors = self.num_anchors(), classes = self.num_classes()))]
    pub fn decode(&self, output: &ModelOutput) -> Result<CategoryManager, PipelineError> {
        let boxes = self.box_view(&output.boxes)?;
        let classes = self.class_view(&output.classes)?;

        let mut manager = CategoryManager::new();
        let mut logits = Vec::with_capacity(self.num_classes());
        let mut in_frame = 0usize;

        for (ibox, anchor) in self.anchors.iter().enumerate() {
            let encoding = [0, 1, 2, 3].map(|k| f64::from(boxes[[k, ibox, 0]]));
            let bbox = decode_box(encoding, anchor);
            if !bbox.is_within_unit_frame() {
                continue;
            }
            in_frame += 1;

            logits.clear();
            logits.extend((0..self.num_classes()).map(|c| f64::from(classes[[0, 0, c, 0, ibox]])));
            let scores = softmax(&logits);

            let foreground = (0..).zip(self.labels.iter()).zip(&scores).skip(1);
            for ((class, entry), &confidence) in foreground {
                manager.observe_labeled(class, &entry.label, confidence, bbox);
            }
        }

        debug!(
            in_frame,
            observations = manager.len(),
            categories = manager.category_count(),
            "Decoded chip output"
        );
        Ok(manager)
    }

    fn box_view<'a>(&self, boxes: &'a ArrayD<f32>) -> Result<ArrayView3<'a, f32>, PipelineError> {
        let expected = self.box_shape();
        if boxes.shape() != expected {
            return Err(shape_error("box", &expected, boxes.shape()));
        }
        boxes
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|_| shape_error("box", &expected, boxes.shape()))
    }

    fn class_view<'a>(
        &self,
        classes: &'a ArrayD<f32>,
    ) -> Result<ArrayView5<'a, f32>, PipelineError> {
        let expected = self.class_shape();
        if classes.shape() != expected {
            return Err(shape_error("class", &expected, classes.shape()));
        }
        classes
            .view()
            .into_dimensionality::<Ix5>()
            .map_err(|_| shape_error("class", &expected, classes.shape()))
    }
}

fn shape_error(tensor: &'static str, expected: &[usize], got: &[usize]) -> PipelineError {
    PipelineError::ModelShape {
        tensor,
        expected: expected.to_vec(),
        got: got.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ndarray::{Array3, Array5, IxDyn};
    use proptest::prelude::*;

    const TOLERANCE: f64 = 1e-9;

    fn unit_anchor() -> Anchor {
        Anchor {
            ymin: 0.25,
            xmin: 0.25,
            ymax: 0.75,
            xmax: 0.75,
        }
    }

    fn decoder(anchors: &str) -> BoxDecoder {
        let labels = "item {id:18 name:'Small Car'}\nitem {id:70 name:'Building'}\n";
        BoxDecoder::new(
            Arc::new(AnchorTable::parse(anchors).unwrap()),
            Arc::new(LabelTable::parse(labels).unwrap()),
        )
    }

    fn output(boxes: Array3<f32>, classes: Array5<f32>) -> ModelOutput {
        ModelOutput {
            boxes: boxes.into_dyn(),
            classes: classes.into_dyn(),
        }
    }

    #[test]
    fn softmax_of_empty_is_empty() {
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn softmax_of_equal_logits_is_uniform() {
        let p = softmax(&[2.0, 2.0, 2.0, 2.0]);
        for v in p {
            assert!((v - 0.25).abs() < TOLERANCE);
        }
    }

    #[test]
    fn softmax_matches_closed_form() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        let sum = 1f64.exp() + 2f64.exp() + 3f64.exp();
        assert!((p[0] - 1f64.exp() / sum).abs() < TOLERANCE);
        assert!((p[2] - 3f64.exp() / sum).abs() < TOLERANCE);
    }

    #[test]
    fn softmax_survives_large_logits() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < TOLERANCE);
    }

    #[test]
    fn zero_encoding_reproduces_mirrored_anchor() {
        let anchor = Anchor {
            ymin: 0.1,
            xmin: 0.2,
            ymax: 0.3,
            xmax: 0.6,
        };
        let r = decode_box([0.0; 4], &anchor);
        assert!((f64::from(r.left) - 0.4).abs() < 1e-6);
        assert!((f64::from(r.top) - 0.7).abs() < 1e-6);
        assert!((f64::from(r.right) - 0.8).abs() < 1e-6);
        assert!((f64::from(r.bottom) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn encoding_shifts_and_scales_box() {
        // tx = 1 shifts the centre by a tenth of the anchor width; th = 5 ln 2 doubles the height
        let r = decode_box([0.0, 10.0 * 0.1, 5.0 * 2f64.ln(), 0.0], &unit_anchor());
        let width = f64::from(r.right - r.left);
        let height = f64::from(r.bottom - r.top);
        assert!((width - 0.5).abs() < 1e-6);
        assert!((height - 1.0).abs() < 1e-6);
        // centre x moved from 0.5 to 0.55, mirrored to 0.45
        assert!((f64::from(r.left + r.right) / 2.0 - 0.45).abs() < 1e-6);
    }

    #[test]
    fn decode_emits_every_foreground_class() {
        let decoder = decoder("0.25,0.25,0.75,0.75\n");
        let boxes = Array3::<f32>::zeros((4, 1, 1));
        let mut classes = Array5::<f32>::zeros((1, 1, 3, 1, 1));
        classes[[0, 0, 1, 0, 0]] = 2.0;

        let cm = decoder.decode(&output(boxes, classes)).unwrap();
        assert_eq!(cm.len(), 2);
        assert!(cm.category(0).is_none());

        // category ids are class indices, not the ids in the label file
        assert!(cm.category(18).is_none());
        let car: Vec<_> = cm.observations_of(1).collect();
        assert_eq!(car.len(), 1);
        let expected = softmax(&[0.0, 2.0, 0.0]);
        assert!((car[0].confidence() - expected[1]).abs() < TOLERANCE);
        assert_eq!(car[0].bbox(), Rect::new(0.25, 0.25, 0.75, 0.75));

        assert_eq!(cm.category(1).unwrap().label(), "Small Car");
        assert_eq!(cm.category(2).unwrap().label(), "Building");
        assert_eq!(cm.observations_of(2).count(), 1);
    }

    #[test]
    fn out_of_frame_boxes_are_dropped() {
        let decoder = decoder("0.25,0.25,0.75,0.75\n0.0,0.0,1.0,1.0\n");
        let mut boxes = Array3::<f32>::zeros((4, 2, 1));
        // grow the second anchor beyond the frame
        boxes[[2, 1, 0]] = 5.0;
        let classes = Array5::<f32>::zeros((1, 1, 3, 1, 2));

        let cm = decoder.decode(&output(boxes, classes)).unwrap();
        assert_eq!(cm.len(), 2);
        assert!(cm.observations().all(|o| o.bbox().is_within_unit_frame()));
    }

    #[test]
    fn wrong_box_shape_is_an_error() {
        let decoder = decoder("0.25,0.25,0.75,0.75\n");
        let out = ModelOutput {
            boxes: ArrayD::zeros(IxDyn(&[4, 2, 1])),
            classes: ArrayD::zeros(IxDyn(&[1, 1, 3, 1, 1])),
        };
        assert_matches!(
            decoder.decode(&out),
            Err(PipelineError::ModelShape { tensor: "box", .. })
        );
    }

    #[test]
    fn wrong_class_shape_is_an_error() {
        let decoder = decoder("0.25,0.25,0.75,0.75\n");
        let out = ModelOutput {
            boxes: ArrayD::zeros(IxDyn(&[4, 1, 1])),
            classes: ArrayD::zeros(IxDyn(&[1, 3, 1])),
        };
        assert_matches!(
            decoder.decode(&out),
            Err(PipelineError::ModelShape { tensor: "class", .. })
        );
    }

    proptest! {
        #[test]
        fn softmax_sums_to_one(logits in prop::collection::vec(-50.0f64..50.0, 1..30)) {
            let p = softmax(&logits);
            let sum: f64 = p.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-9);
        }

        #[test]
        fn softmax_preserves_order(logits in prop::collection::vec(-50.0f64..50.0, 2..30)) {
            let p = softmax(&logits);
            for i in 0..logits.len() {
                for j in 0..logits.len() {
                    if logits[i] < logits[j] {
                        prop_assert!(p[i] <= p[j]);
                    }
                }
            }
        }
    }
}
