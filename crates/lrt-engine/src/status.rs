use std::fmt;

/// Status codes returned by every engine call.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorMemoryAllocationFailure = 2,
    ErrorRuntimeFailure = 3,
    ErrorMissingInputTensor = 4,
    ErrorUnsupported = 5,
    ErrorNotFound = 6,
    ErrorTimeoutExpired = 7,
    ErrorWrongVersion = 8,
    ErrorUnknown = 9,
    ErrorAlreadyExists = 10,
    Cancelled = 100,
    ErrorFileIO = 500,
    ErrorInvalidFlatbuffer = 501,
    ErrorDynamicLoading = 502,
    ErrorSerialization = 503,
    ErrorCompilation = 504,
    ErrorIndexOOB = 1000,
    ErrorInvalidIrType = 1001,
    ErrorInvalidGraphInvariant = 1002,
    ErrorGraphModification = 1003,
    ErrorInvalidToolConfig = 1500,
}

/// Result of an engine primitive. The error side is never `Status::Ok`.
pub type EngineResult<T> = std::result::Result<T, Status>;

impl Status {
    const ALL: [Status; 22] = [
        Status::Ok,
        Status::ErrorInvalidArgument,
        Status::ErrorMemoryAllocationFailure,
        Status::ErrorRuntimeFailure,
        Status::ErrorMissingInputTensor,
        Status::ErrorUnsupported,
        Status::ErrorNotFound,
        Status::ErrorTimeoutExpired,
        Status::ErrorWrongVersion,
        Status::ErrorUnknown,
        Status::ErrorAlreadyExists,
        Status::Cancelled,
        Status::ErrorFileIO,
        Status::ErrorInvalidFlatbuffer,
        Status::ErrorDynamicLoading,
        Status::ErrorSerialization,
        Status::ErrorCompilation,
        Status::ErrorIndexOOB,
        Status::ErrorInvalidIrType,
        Status::ErrorInvalidGraphInvariant,
        Status::ErrorGraphModification,
        Status::ErrorInvalidToolConfig,
    ];

    /// Convert a raw status code. Codes outside the enumeration become
    /// `ErrorUnknown`.
    pub fn from_raw(code: i32) -> Status {
        Status::ALL
            .iter()
            .copied()
            .find(|s| *s as i32 == code)
            .unwrap_or(Status::ErrorUnknown)
    }

    pub fn as_raw(&self) -> i32 {
        *self as i32
    }

    pub fn is_ok(&self) -> bool {
        *self == Status::Ok
    }

    /// `Ok(())` for `Status::Ok`, `Err(self)` otherwise.
    pub fn check(self) -> EngineResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Built-in description, used when the engine cannot supply one.
    pub fn description(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::ErrorInvalidArgument => "invalid argument",
            Status::ErrorMemoryAllocationFailure => "memory allocation failure",
            Status::ErrorRuntimeFailure => "runtime failure",
            Status::ErrorMissingInputTensor => "missing input tensor",
            Status::ErrorUnsupported => "unsupported",
            Status::ErrorNotFound => "not found",
            Status::ErrorTimeoutExpired => "timeout expired",
            Status::ErrorWrongVersion => "wrong version",
            Status::ErrorUnknown => "unknown error",
            Status::ErrorAlreadyExists => "already exists",
            Status::Cancelled => "cancelled",
            Status::ErrorFileIO => "file I/O error",
            Status::ErrorInvalidFlatbuffer => "invalid flatbuffer",
            Status::ErrorDynamicLoading => "dynamic loading error",
            Status::ErrorSerialization => "serialization error",
            Status::ErrorCompilation => "compilation error",
            Status::ErrorIndexOOB => "index out of bounds",
            Status::ErrorInvalidIrType => "invalid IR type",
            Status::ErrorInvalidGraphInvariant => "invalid graph invariant",
            Status::ErrorGraphModification => "graph modification error",
            Status::ErrorInvalidToolConfig => "invalid tool config",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_codes() {
        assert_eq!(Status::Ok.as_raw(), 0);
        assert_eq!(Status::Cancelled.as_raw(), 100);
        assert_eq!(Status::ErrorCompilation.as_raw(), 504);
        assert_eq!(Status::ErrorIndexOOB.as_raw(), 1000);
        assert_eq!(Status::ErrorInvalidToolConfig.as_raw(), 1500);
    }

    #[test]
    fn test_from_raw_roundtrip_and_unknown() {
        for s in Status::ALL {
            assert_eq!(Status::from_raw(s.as_raw()), s);
        }
        assert_eq!(Status::from_raw(42), Status::ErrorUnknown);
        assert_eq!(Status::from_raw(-7), Status::ErrorUnknown);
    }

    #[test]
    fn test_check() {
        assert_eq!(Status::Ok.check(), Ok(()));
        assert_eq!(Status::ErrorNotFound.check(), Err(Status::ErrorNotFound));
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::ErrorFileIO.to_string(), "ErrorFileIO (500)");
    }
}
