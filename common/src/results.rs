use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};

/// Label reported by a classifier when no class clears the threshold.
pub const UNCERTAIN_LABEL: &str = "Uncertain";

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// Serialized as `[left, top, right, bottom]`, the shape the preview page reads.
impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(4)?;
        tup.serialize_element(&self.left)?;
        tup.serialize_element(&self.top)?;
        tup.serialize_element(&self.right)?;
        tup.serialize_element(&self.bottom)?;
        tup.end()
    }
}

/// One classification or detection result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    #[serde(rename = "class")]
    pub label: String,
    #[serde(rename = "score")]
    pub confidence: f32,
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// The output of one inference pass. Replaced whole, never merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub records: Vec<ResultRecord>,
    /// Best candidate score of the pass, whether or not it cleared `threshold`.
    pub top_score: Option<f32>,
    /// Threshold in force when this snapshot was produced.
    pub threshold: f32,
    pub frame_seq: u64,
    pub produced_at_ms: i64,
}

impl Snapshot {
    pub fn new(
        records: Vec<ResultRecord>,
        top_score: Option<f32>,
        threshold: f32,
        frame_seq: u64,
    ) -> Self {
        Self {
            records,
            top_score,
            threshold,
            frame_seq,
            produced_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Records that carry a bounding box.
    pub fn boxed(&self) -> impl Iterator<Item = (&ResultRecord, &BoundingBox)> {
        self.records
            .iter()
            .filter_map(|r| r.bbox.as_ref().map(|b| (r, b)))
    }
}
