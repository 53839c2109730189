use thiserror::Error;

/// Failures while binding the native engine library.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot load engine library '{path}': {source}")]
    Library {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("engine library '{path}' lacks symbol '{symbol}': {source}")]
    MissingSymbol {
        path: String,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
}

pub type Result<T> = std::result::Result<T, LoadError>;
