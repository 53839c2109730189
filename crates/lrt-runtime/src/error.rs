use lrt_engine::{Engine, EngineResult, ResourceKind, Status};
use lrt_tensor::TensorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{resource} used after destroy")]
    Destroyed { resource: ResourceKind },
    #[error("engine call failed with {status}: {message}")]
    Engine { status: Status, message: String },
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The engine status this failure corresponds to.
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidArgument(_) | Error::Destroyed { .. } | Error::Config(_) => {
                Status::ErrorInvalidArgument
            }
            Error::Engine { status, .. } => *status,
            Error::Tensor(TensorError::UnsupportedElementType(_))
            | Error::Tensor(TensorError::UnknownElementCode(_)) => Status::ErrorUnsupported,
            Error::Tensor(_) => Status::ErrorInvalidArgument,
            Error::Io(_) => Status::ErrorFileIO,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == Status::Cancelled
    }

    pub(crate) fn engine(engine: &dyn Engine, status: Status) -> Self {
        let message = match engine.status_string(status) {
            Some(message) => message,
            None => {
                tracing::warn!(%status, engine = engine.name(), "no status description from engine");
                status.description().to_string()
            }
        };
        Error::Engine { status, message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Lifts an engine status into [`Error`], attaching the engine's description.
pub(crate) trait Checked<T> {
    fn checked(self, engine: &dyn Engine) -> Result<T>;
}

impl<T> Checked<T> for EngineResult<T> {
    fn checked(self, engine: &dyn Engine) -> Result<T> {
        self.map_err(|status| Error::engine(engine, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrt_engine::HostEngine;
    use lrt_tensor::ElementType;

    #[test]
    fn test_engine_error_carries_description() {
        let engine = HostEngine::new();
        let err = Err::<(), _>(Status::ErrorNotFound).checked(&engine).unwrap_err();
        assert_eq!(err.status(), Status::ErrorNotFound);
        match err {
            Error::Engine { message, .. } => assert!(!message.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Tensor(TensorError::UnsupportedElementType(ElementType::TfString)).status(),
            Status::ErrorUnsupported
        );
        assert_eq!(
            Error::Destroyed {
                resource: ResourceKind::Model
            }
            .status(),
            Status::ErrorInvalidArgument
        );
        let cancelled = Error::Engine {
            status: Status::Cancelled,
            message: String::new(),
        };
        assert!(cancelled.is_cancelled());
    }
}
