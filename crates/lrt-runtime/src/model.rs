//! Parsed models and their signature introspection.

use std::fmt;
use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use lrt_engine::{Engine, ModelHandle, ResourceKind, TensorSlot};
use lrt_tensor::{Quantization, RankedTensorType, TensorTypeId};
use memmap2::Mmap;

use crate::environment::{Environment, ResourceId};
use crate::error::{Checked, Error, Result};

/// Memory a buffer-backed model was parsed from. The engine reads it in
/// place, so it stays allocated and unmoved until the model is destroyed.
enum Source {
    File,
    Owned(Box<[u8]>),
    Shared(Arc<[u8]>),
    Mapped(Mmap),
}

impl Source {
    fn bytes(&self) -> Option<&[u8]> {
        match self {
            Source::File => None,
            Source::Owned(bytes) => Some(&bytes[..]),
            Source::Shared(bytes) => Some(&bytes[..]),
            Source::Mapped(map) => Some(&map[..]),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Source::File => "file",
            Source::Owned(_) => "owned buffer",
            Source::Shared(_) => "shared buffer",
            Source::Mapped(_) => "mapped file",
        }
    }
}

/// Everything the engine reports about one signature input or output.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub type_id: TensorTypeId,
    pub tensor_type: RankedTensorType,
    pub quantization: Quantization,
}

pub struct Model<'env> {
    engine: Arc<dyn Engine>,
    handle: Option<ModelHandle>,
    id: ResourceId,
    source: Source,
    _env: PhantomData<&'env Environment>,
}

impl fmt::Debug for Model<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("source", &self.source.describe())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl<'env> Model<'env> {
    pub fn from_file(env: &'env Environment, path: impl AsRef<Path>) -> Result<Self> {
        env.handle()?;
        let path = path.as_ref();
        let engine = env.engine().clone();
        let handle = engine.create_model_from_file(path).checked(engine.as_ref())?;
        tracing::debug!(path = %path.display(), "model loaded from file");
        Ok(Self::wrap(engine, handle, Source::File))
    }

    /// Parse a model from bytes the model takes ownership of.
    pub fn from_buffer(env: &'env Environment, bytes: impl Into<Box<[u8]>>) -> Result<Self> {
        Self::from_source(env, Source::Owned(bytes.into()))
    }

    /// Parse a model from bytes shared with other owners.
    pub fn from_shared(env: &'env Environment, bytes: Arc<[u8]>) -> Result<Self> {
        Self::from_source(env, Source::Shared(bytes))
    }

    /// Map a model file into memory and parse it in place.
    pub fn from_mapped_file(env: &'env Environment, path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // The mapping is private to this model and read-only.
        let map = unsafe { Mmap::map(&file)? };
        Self::from_source(env, Source::Mapped(map))
    }

    fn from_source(env: &'env Environment, source: Source) -> Result<Self> {
        env.handle()?;
        let bytes = source.bytes().unwrap_or_default();
        if bytes.is_empty() {
            return Err(Error::InvalidArgument("model buffer is empty".into()));
        }
        let engine = env.engine().clone();
        let handle = unsafe { engine.create_model_from_buffer(bytes.as_ptr(), bytes.len()) }
            .checked(engine.as_ref())?;
        tracing::debug!(len = bytes.len(), source = source.describe(), "model parsed from memory");
        Ok(Self::wrap(engine, handle, source))
    }

    fn wrap(engine: Arc<dyn Engine>, handle: ModelHandle, source: Source) -> Self {
        Model {
            engine,
            handle: Some(handle),
            id: ResourceId::next(),
            source,
            _env: PhantomData,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn handle(&self) -> Result<ModelHandle> {
        self.handle.ok_or(Error::Destroyed {
            resource: ResourceKind::Model,
        })
    }

    pub fn num_signatures(&self) -> Result<usize> {
        self.engine.num_signatures(self.handle()?).checked(self.engine.as_ref())
    }

    pub fn signature_key(&self, signature: usize) -> Result<String> {
        self.engine
            .signature_key(self.handle()?, signature)
            .checked(self.engine.as_ref())
    }

    pub fn num_inputs(&self, signature: usize) -> Result<usize> {
        self.engine
            .num_inputs(self.handle()?, signature)
            .checked(self.engine.as_ref())
    }

    pub fn num_outputs(&self, signature: usize) -> Result<usize> {
        self.engine
            .num_outputs(self.handle()?, signature)
            .checked(self.engine.as_ref())
    }

    pub fn input_name(&self, signature: usize, index: usize) -> Result<String> {
        self.tensor_name(signature, TensorSlot::Input(index))
    }

    pub fn output_name(&self, signature: usize, index: usize) -> Result<String> {
        self.tensor_name(signature, TensorSlot::Output(index))
    }

    pub fn input_tensor_type(&self, signature: usize, index: usize) -> Result<RankedTensorType> {
        self.tensor_type(signature, TensorSlot::Input(index))
    }

    pub fn output_tensor_type(&self, signature: usize, index: usize) -> Result<RankedTensorType> {
        self.tensor_type(signature, TensorSlot::Output(index))
    }

    pub fn input_info(&self, signature: usize, index: usize) -> Result<TensorInfo> {
        self.info(signature, TensorSlot::Input(index))
    }

    pub fn output_info(&self, signature: usize, index: usize) -> Result<TensorInfo> {
        self.info(signature, TensorSlot::Output(index))
    }

    pub fn tensor_name(&self, signature: usize, slot: TensorSlot) -> Result<String> {
        self.engine
            .tensor_name(self.handle()?, signature, slot)
            .checked(self.engine.as_ref())
    }

    pub fn tensor_type(&self, signature: usize, slot: TensorSlot) -> Result<RankedTensorType> {
        self.engine
            .ranked_tensor_type(self.handle()?, signature, slot)
            .checked(self.engine.as_ref())
    }

    pub fn info(&self, signature: usize, slot: TensorSlot) -> Result<TensorInfo> {
        let handle = self.handle()?;
        let engine = self.engine.as_ref();
        Ok(TensorInfo {
            name: engine.tensor_name(handle, signature, slot).checked(engine)?,
            type_id: engine.tensor_type_id(handle, signature, slot).checked(engine)?,
            tensor_type: engine.ranked_tensor_type(handle, signature, slot).checked(engine)?,
            quantization: engine.quantization(handle, signature, slot).checked(engine)?,
        })
    }

    /// Release the parsed model and then its source memory. Further calls
    /// are no-ops.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.engine.destroy_model(handle);
            self.source = Source::File;
            tracing::debug!(id = %self.id, "model destroyed");
        }
    }
}

impl Drop for Model<'_> {
    fn drop(&mut self) {
        if self.is_valid() {
            tracing::warn!(id = %self.id, "model dropped without destroy");
            self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrt_engine::{HostEngine, HostGraph, HostSignature, HostTensor, Status, TensorSpec};
    use lrt_tensor::ElementType;

    fn engine() -> Arc<HostEngine> {
        let graph = HostGraph::new().with_signature(HostSignature::new(
            "classify",
            vec![TensorSpec::new("image", ElementType::UInt8, &[1, 224, 224, 3])
                .with_quantization(Quantization::PerTensor {
                    scale: 0.5,
                    zero_point: 128,
                })],
            vec![TensorSpec::new("scores", ElementType::Float32, &[1, 1001])],
            |_| HostTensor::zeros(ElementType::Float32, &[1, 1001]).map(|t| vec![t]),
        ));
        Arc::new(HostEngine::new().with_model("classifier", graph))
    }

    #[test]
    fn test_introspection() {
        let mut env = Environment::new(engine()).unwrap();
        {
            let mut model = Model::from_buffer(&env, b"classifier".to_vec()).unwrap();
            assert_eq!(model.num_signatures().unwrap(), 1);
            assert_eq!(model.signature_key(0).unwrap(), "classify");
            assert_eq!(model.num_inputs(0).unwrap(), 1);
            assert_eq!(model.num_outputs(0).unwrap(), 1);
            assert_eq!(model.input_name(0, 0).unwrap(), "image");
            assert_eq!(
                model.output_tensor_type(0, 0).unwrap().to_string(),
                "f32[1, 1001]"
            );

            let info = model.input_info(0, 0).unwrap();
            assert_eq!(info.type_id, TensorTypeId::Ranked);
            assert_eq!(info.tensor_type.element_type, ElementType::UInt8);
            assert_eq!(info.quantization.dequantize(130), Some(1.0));

            let err = model.output_name(0, 5).unwrap_err();
            assert_eq!(err.status(), Status::ErrorIndexOOB);
            model.destroy();
        }
        env.destroy();
    }

    #[test]
    fn test_empty_buffer_is_rejected_before_engine() {
        let engine = engine();
        let mut env = Environment::new(engine.clone()).unwrap();
        let err = Model::from_buffer(&env, Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(engine.stats().created(ResourceKind::Model), 0);
        env.destroy();
    }

    #[test]
    fn test_sources() {
        let engine = engine();
        let mut env = Environment::new(engine.clone()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.tflite");
        std::fs::write(&path, "classifier").unwrap();
        {
            let mut from_file = Model::from_file(&env, &path).unwrap();
            let mut mapped = Model::from_mapped_file(&env, &path).unwrap();
            let shared: Arc<[u8]> = Arc::from(&b"classifier"[..]);
            let mut from_shared = Model::from_shared(&env, shared.clone()).unwrap();
            assert_eq!(Arc::strong_count(&shared), 2);
            from_shared.destroy();
            assert_eq!(Arc::strong_count(&shared), 1);
            from_file.destroy();
            mapped.destroy();
        }
        env.destroy();
        assert!(engine.stats().is_clean());
    }

    #[test]
    fn test_unknown_model_fails_without_obligation() {
        let engine = engine();
        let mut env = Environment::new(engine.clone()).unwrap();
        let err = Model::from_buffer(&env, b"not a model".to_vec()).unwrap_err();
        assert_eq!(err.status(), Status::ErrorInvalidFlatbuffer);
        env.destroy();
        assert!(engine.stats().is_clean());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let engine = engine();
        let mut env = Environment::new(engine.clone()).unwrap();
        {
            let mut model = Model::from_buffer(&env, b"classifier".to_vec()).unwrap();
            model.destroy();
            model.destroy();
            assert!(!model.is_valid());
            assert!(matches!(
                model.num_signatures(),
                Err(Error::Destroyed { .. })
            ));
        }
        env.destroy();
        let stats = engine.stats();
        assert_eq!(stats.destroyed(ResourceKind::Model), 1);
        assert_eq!(stats.double_destroys, 0);
    }
}
