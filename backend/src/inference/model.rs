use ndarray::{Array2, Array4};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{ServerConfig, TensorLayout};
use crate::inference::decision::{self, Decision};
use crate::inference::preprocess::{self, ImageError};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to load model: {0}")]
    #[cfg_attr(not(feature = "torch"), allow(dead_code))]
    Load(String),
    #[error("No inference backend compiled in; rebuild with `--features torch`")]
    #[cfg_attr(feature = "torch", allow(dead_code))]
    BackendUnavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model not loaded.")]
    NotLoaded,
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("{0}")]
    Model(String),
    #[error("model returned an empty output")]
    EmptyOutput,
    #[error("model returned a non-finite probability")]
    NonFinite,
}

/// A loaded binary classifier. `forward` receives a (1, H, W, 3) tensor and
/// returns the raw (batch, classes) output.
pub trait Classifier: Send + Sync {
    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, InferenceError>;
}

#[derive(Clone)]
pub struct Model {
    classifier: Option<Arc<dyn Classifier>>,
    input_size: u32,
    threshold: f64,
}

impl Model {
    pub fn new(classifier: Arc<dyn Classifier>, input_size: u32, threshold: f64) -> Self {
        Self {
            classifier: Some(classifier),
            input_size,
            threshold,
        }
    }

    /// A model slot with nothing loaded. `/predict` answers 503 against it.
    #[cfg(test)]
    pub fn unloaded() -> Self {
        Self {
            classifier: None,
            input_size: 224,
            threshold: decision::DEFAULT_THRESHOLD,
        }
    }

    pub fn load(config: &ServerConfig) -> Result<Self, ModelError> {
        let path = config.model_path.as_path();
        if !path.is_file() {
            return Err(ModelError::NotFound(path.to_path_buf()));
        }
        let classifier = load_backend(path, config.tensor_layout)?;
        log::info!("Model loaded from {}", path.display());
        Ok(Self::new(classifier, config.input_size, config.threshold))
    }

    pub fn is_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    /// Decodes, preprocesses and classifies one uploaded image.
    pub fn inference(&self, image: &[u8]) -> Result<Decision, InferenceError> {
        let classifier = self.classifier.as_ref().ok_or(InferenceError::NotLoaded)?;
        let decoded = preprocess::decode(image)?;
        let tensor = preprocess::to_tensor(&decoded, self.input_size)?;
        let output = classifier.forward(&tensor)?;
        let probability = disease_probability(&output)?;
        Ok(decision::decide(probability, self.threshold))
    }
}

/// Reads P(diseased) from the first row of the model output. A single column
/// is the disease probability itself; with two or more columns, index 1 is
/// assumed to be the diseased class.
pub fn disease_probability(output: &Array2<f32>) -> Result<f64, InferenceError> {
    let row = output.rows().into_iter().next().ok_or(InferenceError::EmptyOutput)?;
    let raw = match row.len() {
        0 => return Err(InferenceError::EmptyOutput),
        1 => row[0],
        _ => row[1],
    };
    if !raw.is_finite() {
        return Err(InferenceError::NonFinite);
    }
    Ok(f64::from(raw).clamp(0.0, 1.0))
}

#[cfg(feature = "torch")]
fn load_backend(path: &Path, layout: TensorLayout) -> Result<Arc<dyn Classifier>, ModelError> {
    Ok(Arc::new(torch::TorchClassifier::load(path, layout)?))
}

#[cfg(not(feature = "torch"))]
fn load_backend(_path: &Path, _layout: TensorLayout) -> Result<Arc<dyn Classifier>, ModelError> {
    Err(ModelError::BackendUnavailable)
}

#[cfg(feature = "torch")]
mod torch {
    use super::{Classifier, InferenceError, ModelError};
    use crate::config::TensorLayout;
    use ndarray::{Array2, Array4};
    use std::path::Path;
    use std::sync::{Mutex, PoisonError};
    use tch::{CModule, Device, Kind, TchError, Tensor};

    fn model_error(e: TchError) -> InferenceError {
        InferenceError::Model(e.to_string())
    }

    pub struct TorchClassifier {
        module: Mutex<CModule>,
        device: Device,
        layout: TensorLayout,
    }

    impl TorchClassifier {
        pub fn load(path: &Path, layout: TensorLayout) -> Result<Self, ModelError> {
            let device = Device::cuda_if_available();
            let module = CModule::load_on_device(path, device)
                .map_err(|e| ModelError::Load(e.to_string()))?;
            log::info!("TorchScript module on {:?}, layout {:?}", device, layout);
            Ok(Self::from_module(module, device, layout))
        }

        pub fn from_module(module: CModule, device: Device, layout: TensorLayout) -> Self {
            Self {
                module: Mutex::new(module),
                device,
                layout,
            }
        }
    }

    impl Classifier for TorchClassifier {
        fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, InferenceError> {
            let (n, h, w, c) = input.dim();
            let data = input
                .as_slice()
                .ok_or_else(|| InferenceError::Model("input tensor is not contiguous".into()))?;
            let mut tensor = Tensor::from_slice(data)
                .f_view([n as i64, h as i64, w as i64, c as i64])
                .map_err(model_error)?;
            if self.layout == TensorLayout::Nchw {
                tensor = tensor.f_permute([0, 3, 1, 2]).map_err(model_error)?;
            }
            let tensor = tensor.f_to_device(self.device).map_err(model_error)?;

            // A failed forward pass leaves the module itself untouched.
            let module = self.module.lock().unwrap_or_else(PoisonError::into_inner);
            let output = tch::no_grad(|| module.forward_ts(&[&tensor]));
            drop(module);

            let output = output
                .and_then(|o| o.f_to_kind(Kind::Float))
                .and_then(|o| o.f_to_device(Device::Cpu))
                .map_err(model_error)?;
            let classes = output.size().last().copied().unwrap_or(0).max(0) as usize;
            let num_elements = output.numel();
            if classes == 0 || num_elements == 0 {
                return Err(InferenceError::EmptyOutput);
            }
            let mut values = vec![0.0f32; num_elements];
            output
                .f_view([-1])
                .and_then(|flat| flat.f_copy_data(&mut values, num_elements))
                .map_err(model_error)?;

            Array2::from_shape_vec((num_elements / classes, classes), values)
                .map_err(|e| InferenceError::Model(e.to_string()))
        }
    }

}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::inference::preprocess::tests::leaf_png;
    use ndarray::array;
    use shared::CropStatus;

    /// Returns a fixed output row, whatever the input.
    pub(crate) struct FixedClassifier(pub Vec<f32>);

    impl Classifier for FixedClassifier {
        fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, InferenceError> {
            assert_eq!(input.shape()[0], 1);
            assert_eq!(input.shape()[3], 3);
            Array2::from_shape_vec((1, self.0.len()), self.0.clone())
                .map_err(|e| InferenceError::Model(e.to_string()))
        }
    }

    pub(crate) struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn forward(&self, _input: &Array4<f32>) -> Result<Array2<f32>, InferenceError> {
            Err(InferenceError::Model("shape mismatch: expected [1, 3, 224, 224]".into()))
        }
    }

    fn model_with(output: Vec<f32>) -> Model {
        Model::new(Arc::new(FixedClassifier(output)), 224, decision::DEFAULT_THRESHOLD)
    }

    #[test]
    fn single_output_is_disease_probability() {
        assert_eq!(disease_probability(&array![[0.83f32]]).unwrap(), f64::from(0.83f32));
    }

    #[test]
    fn second_column_is_disease_probability() {
        let p = disease_probability(&array![[0.9f32, 0.1, 0.0]]).unwrap();
        assert_eq!(p, f64::from(0.1f32));
    }

    #[test]
    fn overshoot_is_clamped() {
        assert_eq!(disease_probability(&array![[1.0000005f32]]).unwrap(), 1.0);
        assert_eq!(disease_probability(&array![[0.5f32, -0.00001]]).unwrap(), 0.0);
    }

    #[test]
    fn empty_and_nan_outputs_fail() {
        let empty = Array2::<f32>::zeros((1, 0));
        assert!(matches!(disease_probability(&empty), Err(InferenceError::EmptyOutput)));
        let no_rows = Array2::<f32>::zeros((0, 2));
        assert!(matches!(disease_probability(&no_rows), Err(InferenceError::EmptyOutput)));
        assert!(matches!(
            disease_probability(&array![[f32::NAN]]),
            Err(InferenceError::NonFinite)
        ));
    }

    #[test]
    fn end_to_end_affected() {
        let decision = model_with(vec![0.2, 0.8]).inference(&leaf_png(120, 90)).unwrap();
        assert_eq!(decision.status, CropStatus::Affected);
        assert!((decision.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn end_to_end_healthy() {
        let decision = model_with(vec![0.25]).inference(&leaf_png(30, 30)).unwrap();
        assert_eq!(decision.status, CropStatus::Healthy);
        assert!((decision.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn configured_threshold_is_applied() {
        let model = Model::new(Arc::new(FixedClassifier(vec![0.55])), 224, 0.5);
        assert_eq!(model.inference(&leaf_png(8, 8)).unwrap().status, CropStatus::Affected);
    }

    #[test]
    fn undecodable_upload_is_an_image_error() {
        let err = model_with(vec![0.1]).inference(b"GIF89a-broken").unwrap_err();
        assert!(matches!(err, InferenceError::Image(ImageError::InvalidImage(_))));
    }

    #[test]
    fn classifier_errors_propagate() {
        let model = Model::new(Arc::new(FailingClassifier), 224, 0.6);
        let err = model.inference(&leaf_png(8, 8)).unwrap_err();
        assert!(err.to_string().contains("shape mismatch"));
    }

    #[test]
    fn missing_model_file_aborts_load() {
        let config = ServerConfig {
            model_path: PathBuf::from("no/such/dir/saved_model.pt"),
            ..ServerConfig::default()
        };
        match Model::load(&config) {
            Err(ModelError::NotFound(path)) => {
                assert_eq!(path, PathBuf::from("no/such/dir/saved_model.pt"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("load must fail without a model file"),
        }
    }

    #[test]
    fn unloaded_model_refuses_inference() {
        assert!(!Model::unloaded().is_loaded());
        assert!(matches!(
            Model::unloaded().inference(&leaf_png(8, 8)),
            Err(InferenceError::NotLoaded)
        ));
        assert!(model_with(vec![0.1]).is_loaded());
    }
}
