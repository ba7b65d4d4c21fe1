//! Turn raw model outputs into labelled results.

use edge_vision_common::results::{BoundingBox, ResultRecord, UNCERTAIN_LABEL};

use crate::labels::Labels;

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Class {
        class_id: usize,
        label: String,
        score: f32,
    },
    /// The best class scored below the threshold.
    Uncertain { score: f32 },
}

impl Classification {
    pub fn label(&self) -> &str {
        match self {
            Classification::Class { label, .. } => label,
            Classification::Uncertain { .. } => UNCERTAIN_LABEL,
        }
    }

    pub fn score(&self) -> f32 {
        match self {
            Classification::Class { score, .. } | Classification::Uncertain { score } => *score,
        }
    }
}

/// Pick the highest-scoring class. Ties go to the lowest index, NaN scores
/// are ignored. Returns `None` when no score is usable.
pub fn classify(scores: &[f32], threshold: f32, labels: &Labels) -> Option<Classification> {
    let (class_id, score) = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })?;

    Some(if score >= threshold {
        Classification::Class {
            class_id,
            label: labels.resolve(class_id),
            score,
        }
    } else {
        Classification::Uncertain { score }
    })
}

/// The four parallel outputs of an SSD-style detector, already de-quantized.
#[derive(Debug, Clone, Copy)]
pub struct DetectorOutputs<'a> {
    /// `[ymin, xmin, ymax, xmax]` per detection, normalized to `[0, 1]`.
    pub boxes: &'a [f32],
    pub classes: &'a [f32],
    pub scores: &'a [f32],
    pub count: usize,
}

impl DetectorOutputs<'_> {
    /// Entries that are actually backed by data in every output.
    pub fn candidates(&self) -> usize {
        self.count
            .min(self.scores.len())
            .min(self.classes.len())
            .min(self.boxes.len() / 4)
    }
}

/// Keep detections scoring at least `threshold`, with boxes scaled to a
/// `width` x `height` image. Also returns the best candidate score.
pub fn decode_detections(
    outputs: &DetectorOutputs<'_>,
    width: u32,
    height: u32,
    threshold: f32,
    labels: &Labels,
) -> (Vec<ResultRecord>, Option<f32>) {
    let (w, h) = (width as f32, height as f32);
    let mut records = Vec::new();
    let mut top_score: Option<f32> = None;

    for i in 0..outputs.candidates() {
        let score = outputs.scores[i];
        if score.is_nan() {
            continue;
        }
        top_score = Some(top_score.map_or(score, |t| t.max(score)));
        if score < threshold {
            continue;
        }

        let b = &outputs.boxes[i * 4..i * 4 + 4];
        let (ymin, xmin, ymax, xmax) = (
            b[0].clamp(0.0, 1.0),
            b[1].clamp(0.0, 1.0),
            b[2].clamp(0.0, 1.0),
            b[3].clamp(0.0, 1.0),
        );
        records.push(ResultRecord {
            label: detection_label(outputs.classes[i], labels),
            confidence: score,
            bbox: Some(BoundingBox {
                left: xmin * w,
                top: ymin * h,
                right: xmax * w,
                bottom: ymax * h,
            }),
        });
    }

    (records, top_score)
}

/// Detector class ids arrive as floats. Anything that is not a usable
/// index keeps its raw value in the fallback label instead of aliasing
/// class 0.
fn detection_label(raw: f32, labels: &Labels) -> String {
    if raw.is_finite() && raw >= 0.0 {
        labels.resolve(raw as usize)
    } else {
        format!("Class {raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Labels {
        Labels::parse("background\nperiquito\nrobot")
    }

    #[test]
    fn classifier_passes_at_threshold() {
        let result = classify(&[0.1, 0.7, 0.2], 0.7, &labels()).unwrap();
        assert_eq!(
            result,
            Classification::Class {
                class_id: 1,
                label: "periquito".into(),
                score: 0.7
            }
        );
    }

    #[test]
    fn classifier_below_threshold_is_uncertain() {
        let result = classify(&[0.1, 0.6, 0.3], 0.8, &labels()).unwrap();
        assert_eq!(result, Classification::Uncertain { score: 0.6 });
        assert_eq!(result.label(), UNCERTAIN_LABEL);
        assert_eq!(result.score(), 0.6);
    }

    #[test]
    fn classifier_ties_take_lowest_index() {
        let result = classify(&[0.4, 0.4, f32::NAN], 0.0, &labels()).unwrap();
        assert_eq!(result.label(), "background");
    }

    #[test]
    fn classifier_unknown_index_falls_back() {
        let result = classify(&[0.0, 0.0, 0.0, 0.9], 0.5, &labels()).unwrap();
        assert_eq!(result.label(), "Class 3");
    }

    #[test]
    fn classifier_without_scores() {
        assert!(classify(&[], 0.5, &labels()).is_none());
        assert!(classify(&[f32::NAN], 0.5, &labels()).is_none());
    }

    #[test]
    fn detector_box_in_pixels() {
        let labels = Labels::parse("person\nbicycle\ncar");
        let outputs = DetectorOutputs {
            boxes: &[0.1, 0.1, 0.5, 0.5],
            classes: &[2.0],
            scores: &[0.9],
            count: 1,
        };
        let (records, top) = decode_detections(&outputs, 640, 480, 0.5, &labels);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "car");
        assert_eq!(records[0].confidence, 0.9);
        let bbox = records[0].bbox.unwrap();
        assert!((bbox.left - 64.0).abs() < 1e-3);
        assert!((bbox.top - 48.0).abs() < 1e-3);
        assert!((bbox.right - 320.0).abs() < 1e-3);
        assert!((bbox.bottom - 240.0).abs() < 1e-3);
        assert_eq!(top, Some(0.9));
    }

    fn three_candidates() -> DetectorOutputs<'static> {
        DetectorOutputs {
            boxes: &[
                0.0, 0.0, 0.5, 0.5, //
                0.2, 0.2, 0.4, 0.4, //
                0.5, 0.5, 1.0, 1.0,
            ],
            classes: &[0.0, 1.0, 7.0],
            scores: &[0.95, 0.3, 0.0],
            count: 3,
        }
    }

    #[test]
    fn threshold_one_rejects_imperfect_scores() {
        let (records, top) = decode_detections(&three_candidates(), 100, 100, 1.0, &labels());
        assert!(records.is_empty());
        assert_eq!(top, Some(0.95));
    }

    #[test]
    fn threshold_zero_admits_everything() {
        let (records, _) = decode_detections(&three_candidates(), 100, 100, 0.0, &labels());
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].label, "Class 7");
        assert_eq!(records[2].confidence, 0.0);
    }

    #[test]
    fn count_limits_candidates() {
        let mut outputs = three_candidates();
        outputs.count = 1;
        let (records, _) = decode_detections(&outputs, 100, 100, 0.0, &labels());
        assert_eq!(records.len(), 1);

        // A count larger than the tensors is capped by the data
        outputs.count = 10;
        assert_eq!(outputs.candidates(), 3);
    }

    #[test]
    fn invalid_class_ids_do_not_alias_the_first_label() {
        let outputs = DetectorOutputs {
            boxes: &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0],
            classes: &[-1.0, f32::NAN, 1.0],
            scores: &[0.9, 0.9, 0.9],
            count: 3,
        };
        let (records, _) = decode_detections(&outputs, 10, 10, 0.5, &labels());
        let names: Vec<_> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(names, ["Class -1", "Class NaN", "periquito"]);
    }

    #[test]
    fn boxes_clamped_to_image() {
        let outputs = DetectorOutputs {
            boxes: &[-0.1, -0.2, 1.2, 1.5],
            classes: &[0.0],
            scores: &[0.9],
            count: 1,
        };
        let (records, _) = decode_detections(&outputs, 200, 100, 0.5, &labels());
        let bbox = records[0].bbox.unwrap();
        assert_eq!((bbox.left, bbox.top, bbox.right, bbox.bottom), (0.0, 0.0, 200.0, 100.0));
    }
}
