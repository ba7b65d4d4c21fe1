use edge_vision_common::config::{InputLayout, InputType, ModelConfig};

use crate::InferenceError;

/// How raw output values map to real numbers. Resolved once when the
/// model is loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantization {
    Float,
    /// `real = (raw - zero_point) * scale`
    Quantized { scale: f32, zero_point: i32 },
}

impl Quantization {
    pub fn dequantize(self, raw: f32) -> f32 {
        match self {
            Quantization::Float => raw,
            Quantization::Quantized { scale, zero_point } => (raw - zero_point as f32) * scale,
        }
    }
}

/// Fixed input the model was built for. Batch size is always 1, channels
/// are always RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub element: InputType,
    pub layout: InputLayout,
}

impl InputSpec {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            width: config.input_width,
            height: config.input_height,
            element: config.input_type,
            layout: config.input_layout,
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.layout {
            InputLayout::Nhwc => [1, h, w, 3],
            InputLayout::Nchw => [1, 3, h, w],
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape().iter().product()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    F32(Vec<f32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::U8(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Real-valued view of the data under `quantization`.
    pub fn to_f32(&self, quantization: Quantization) -> Vec<f32> {
        match self {
            TensorData::U8(v) => v
                .iter()
                .map(|&x| quantization.dequantize(f32::from(x)))
                .collect(),
            TensorData::I8(v) => v
                .iter()
                .map(|&x| quantization.dequantize(f32::from(x)))
                .collect(),
            TensorData::F32(v) => v.iter().map(|&x| quantization.dequantize(x)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub shape: [usize; 4],
    pub data: TensorData,
}

impl InputTensor {
    pub fn check(&self) -> Result<(), InferenceError> {
        let expected: usize = self.shape.iter().product();
        if self.data.len() == expected {
            Ok(())
        } else {
            Err(InferenceError::InputShape {
                expected,
                got: self.data.len(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl OutputTensor {
    pub fn f32(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            shape,
            data: TensorData::F32(data),
        }
    }
}

/// A fixed-shape tensor model with a single image input.
pub trait Model: Send {
    fn name(&self) -> &str;

    fn input_spec(&self) -> InputSpec;

    /// Per-output quantization, in output order.
    fn output_quantization(&self) -> Vec<Quantization>;

    /// Run one forward pass.
    fn run(&mut self, input: InputTensor) -> Result<Vec<OutputTensor>, InferenceError>;
}
