use std::path::Path;

use edge_vision_common::config::InputType;
use tract_onnx::prelude::*;

use crate::model::{InputSpec, InputTensor, Model, OutputTensor, Quantization, TensorData};
use crate::{InferenceError, ModelLoadError};

/// ONNX model run through tract.
///
/// The input shape is pinned at load time, so the optimized plan only ever
/// sees one shape.
pub struct TractModel {
    name: String,
    plan: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input: InputSpec,
    quantization: Vec<Quantization>,
}

impl TractModel {
    pub fn load(path: &Path, input: InputSpec) -> Result<Self, ModelLoadError> {
        let backend = |what: &str, e: TractError| {
            ModelLoadError::Backend(format!("{what} {}: {e}", path.display()))
        };

        let datum = match input.element {
            InputType::U8 => u8::datum_type(),
            InputType::I8 => i8::datum_type(),
            InputType::F32 => f32::datum_type(),
        };
        let [n, a, b, c] = input.shape();
        let fact = InferenceFact::dt_shape(datum, tvec!(n, a, b, c));

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| backend("failed to load ONNX model from", e))?
            .with_input_fact(0, fact)
            .map_err(|e| backend("failed to set input fact for", e))?
            .into_optimized()
            .map_err(|e| backend("failed to optimize", e))?;

        let quantization = (0..model.outputs.len())
            .map(|i| {
                model
                    .output_fact(i)
                    .map(|fact| match fact.datum_type.qparams() {
                        Some(qp) => {
                            let (zero_point, scale) = qp.zp_scale();
                            Quantization::Quantized { scale, zero_point }
                        }
                        None => Quantization::Float,
                    })
                    .map_err(|e| backend("failed to read output facts of", e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let plan = model
            .into_runnable()
            .map_err(|e| backend("failed to build runnable plan for", e))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        Ok(Self {
            name,
            plan,
            input,
            quantization,
        })
    }

    fn to_tensor(input: &InputTensor) -> TractResult<Tensor> {
        match &input.data {
            TensorData::U8(v) => Tensor::from_shape(&input.shape, v),
            TensorData::I8(v) => Tensor::from_shape(&input.shape, v),
            TensorData::F32(v) => Tensor::from_shape(&input.shape, v),
        }
    }

    fn from_tensor(tensor: &Tensor) -> TractResult<OutputTensor> {
        let shape = tensor.shape().to_vec();
        // Quantized outputs keep their raw integers; scale is applied later
        let data = match tensor.datum_type().unquantized() {
            DatumType::U8 => TensorData::U8(tensor.as_slice::<u8>()?.to_vec()),
            DatumType::I8 => TensorData::I8(tensor.as_slice::<i8>()?.to_vec()),
            _ => {
                let cast = tensor.cast_to::<f32>()?;
                TensorData::F32(cast.to_array_view::<f32>()?.iter().copied().collect())
            }
        };
        Ok(OutputTensor { shape, data })
    }
}

impl Model for TractModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_spec(&self) -> InputSpec {
        self.input
    }

    fn output_quantization(&self) -> Vec<Quantization> {
        self.quantization.clone()
    }

    fn run(&mut self, input: InputTensor) -> Result<Vec<OutputTensor>, InferenceError> {
        input.check()?;
        let tensor = Self::to_tensor(&input).map_err(|e| InferenceError::Backend(e.to_string()))?;
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| InferenceError::Backend(format!("ONNX inference failed: {e}")))?;
        outputs
            .iter()
            .map(|t| Self::from_tensor(t))
            .collect::<TractResult<Vec<_>>>()
            .map_err(|e| InferenceError::Backend(e.to_string()))
    }
}
