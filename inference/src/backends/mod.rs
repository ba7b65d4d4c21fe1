#[cfg(feature = "backend-tract")]
pub mod tract;

#[cfg(feature = "backend-tract")]
pub use tract::TractModel;

use edge_vision_common::config::ModelConfig;

use crate::model::Model;
#[cfg(feature = "backend-tract")]
use crate::model::InputSpec;
use crate::ModelLoadError;

/// Load the configured model with whichever backend is compiled in.
pub fn load_model(config: &ModelConfig) -> Result<Box<dyn Model>, ModelLoadError> {
    if !config.path.is_file() {
        return Err(ModelLoadError::NotFound(config.path.clone()));
    }

    #[cfg(feature = "backend-tract")]
    {
        let model = TractModel::load(&config.path, InputSpec::from_config(config))?;
        Ok(Box::new(model))
    }

    #[cfg(not(feature = "backend-tract"))]
    {
        Err(ModelLoadError::BackendUnavailable)
    }
}
