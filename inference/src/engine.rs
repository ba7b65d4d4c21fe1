use edge_vision_common::config::{ModelConfig, ModelFamily};
use edge_vision_common::results::ResultRecord;
use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::backends;
use crate::decode::{classify, decode_detections, Classification, DetectorOutputs};
use crate::labels::Labels;
use crate::model::{InputSpec, Model, OutputTensor, Quantization};
use crate::preprocess::{decode_jpeg, to_input_tensor};
use crate::{InferenceError, ModelLoadError};

/// Which output tensor holds what, for detector models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorLayout {
    pub boxes: usize,
    pub classes: usize,
    pub scores: usize,
    pub count: usize,
}

impl Default for DetectorLayout {
    fn default() -> Self {
        Self {
            boxes: 0,
            classes: 1,
            scores: 2,
            count: 3,
        }
    }
}

impl DetectorLayout {
    fn from_config(config: &ModelConfig) -> Self {
        Self {
            boxes: config.boxes_output,
            classes: config.classes_output,
            scores: config.scores_output,
            count: config.count_output,
        }
    }

    fn required_outputs(&self) -> usize {
        [self.boxes, self.classes, self.scores, self.count]
            .into_iter()
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Result of one pass, before it is stamped into a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub records: Vec<ResultRecord>,
    pub top_score: Option<f32>,
}

pub struct InferenceEngine {
    model: Box<dyn Model>,
    family: ModelFamily,
    labels: Labels,
    input: InputSpec,
    quantization: Vec<Quantization>,
    layout: DetectorLayout,
}

impl InferenceEngine {
    pub fn new(model: Box<dyn Model>, family: ModelFamily, labels: Labels) -> Self {
        let input = model.input_spec();
        let quantization = model.output_quantization();
        Self {
            model,
            family,
            labels,
            input,
            quantization,
            layout: DetectorLayout::default(),
        }
    }

    pub fn with_detector_layout(mut self, layout: DetectorLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Load the model and label table named in the config.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let labels = match &config.labels {
            Some(path) => Labels::load(path)?,
            None => Labels::default(),
        };
        if labels.is_empty() {
            warn!("no class labels, results are reported as `Class <id>`");
        }
        let model = backends::load_model(config)?;
        info!(
            model = model.name(),
            family = ?config.family,
            labels = labels.len(),
            width = config.input_width,
            height = config.input_height,
            "model loaded"
        );
        let layout = DetectorLayout::from_config(config);
        Ok(Self::new(model, config.family, labels).with_detector_layout(layout))
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn input_spec(&self) -> InputSpec {
        self.input
    }

    /// Run one pass over a JPEG frame.
    ///
    /// Empty or undecodable frames yield an empty outcome rather than an
    /// error; model failures are returned to the caller.
    pub fn infer(&mut self, jpeg: &[u8], threshold: f32) -> Result<Outcome, InferenceError> {
        if jpeg.is_empty() {
            debug!("empty frame, nothing to infer");
            return Ok(Outcome::default());
        }
        let image = match decode_jpeg(jpeg) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, bytes = jpeg.len(), "undecodable frame, skipping");
                return Ok(Outcome::default());
            }
        };
        self.infer_image(&image, threshold)
    }

    pub fn infer_image(
        &mut self,
        image: &DynamicImage,
        threshold: f32,
    ) -> Result<Outcome, InferenceError> {
        let tensor = to_input_tensor(image, self.input);
        let outputs = self.model.run(tensor)?;

        match self.family {
            ModelFamily::Classifier => self.decode_classifier(&outputs, threshold),
            ModelFamily::Detector => {
                self.decode_detector(&outputs, image.width(), image.height(), threshold)
            }
        }
    }

    fn real_output(
        &self,
        outputs: &[OutputTensor],
        index: usize,
    ) -> Result<Vec<f32>, InferenceError> {
        let output = outputs.get(index).ok_or(InferenceError::OutputCount {
            expected: index + 1,
            got: outputs.len(),
        })?;
        let q = self
            .quantization
            .get(index)
            .copied()
            .unwrap_or(Quantization::Float);
        Ok(output.data.to_f32(q))
    }

    fn decode_classifier(
        &self,
        outputs: &[OutputTensor],
        threshold: f32,
    ) -> Result<Outcome, InferenceError> {
        let scores = self.real_output(outputs, 0)?;
        let Some(result) = classify(&scores, threshold, &self.labels) else {
            return Ok(Outcome::default());
        };
        let top_score = result.score();
        debug!(label = result.label(), score = top_score, "classified frame");

        let records = match result {
            Classification::Class { label, score, .. } => vec![ResultRecord {
                label,
                confidence: score,
                bbox: None,
            }],
            Classification::Uncertain { .. } => Vec::new(),
        };
        Ok(Outcome {
            records,
            top_score: Some(top_score),
        })
    }

    fn decode_detector(
        &self,
        outputs: &[OutputTensor],
        width: u32,
        height: u32,
        threshold: f32,
    ) -> Result<Outcome, InferenceError> {
        let required = self.layout.required_outputs();
        if outputs.len() < required {
            return Err(InferenceError::OutputCount {
                expected: required,
                got: outputs.len(),
            });
        }

        let boxes = self.real_output(outputs, self.layout.boxes)?;
        if boxes.len() % 4 != 0 {
            return Err(InferenceError::OutputShape(format!(
                "boxes output has {} values, not a multiple of 4",
                boxes.len()
            )));
        }
        let classes = self.real_output(outputs, self.layout.classes)?;
        let scores = self.real_output(outputs, self.layout.scores)?;
        let count = self
            .real_output(outputs, self.layout.count)?
            .first()
            .map_or(scores.len(), |&c| c.max(0.0) as usize);

        let (records, top_score) = decode_detections(
            &DetectorOutputs {
                boxes: &boxes,
                classes: &classes,
                scores: &scores,
                count,
            },
            width,
            height,
            threshold,
            &self.labels,
        );
        debug!(count, kept = records.len(), "detector outputs decoded");
        Ok(Outcome { records, top_score })
    }
}
