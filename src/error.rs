use std::sync::Arc;

use thiserror::Error;

/// A failure raised by user code inside [`Filter::execute`](crate::Filter::execute).
///
/// The error is shared so a single failure can be attached to every output
/// promise of the failing filter and observed by any number of readers.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct FilterError(#[from] pub(crate) Arc<anyhow::Error>);

impl FilterError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// The underlying error reported by the filter.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for FilterError {
    fn from(e: anyhow::Error) -> Self {
        FilterError(Arc::new(e))
    }
}

/// What a failed lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Input,
    Output,
    Executable,
    Future,
    Promise,
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Lookup::Input => "input port",
            Lookup::Output => "output port",
            Lookup::Executable => "executable",
            Lookup::Future => "future",
            Lookup::Promise => "promise",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("No {kind} named '{name}'")]
    NotFound { kind: Lookup, name: String },

    #[error("Name '{0}' is already in use")]
    DuplicateName(String),

    #[error("Type mismatch on '{name}': expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Promise '{0}' has already been set in this generation")]
    AlreadySet(String),

    #[error("Input '{0}' is connected and takes its value from upstream")]
    Connected(String),

    #[error("Value '{0}' is not ready")]
    NotReady(String),

    #[error("Value '{0}' was completed without being set")]
    Unset(String),

    #[error("Filter '{name}' failed:\n{source}")]
    Filter { name: String, source: FilterError },

    #[error("Value '{name}' comes from a failed filter:\n{source}")]
    Upstream { name: String, source: FilterError },

    #[error("Pipeline '{0}' cannot contain itself")]
    Cycle(String),

    #[error("Failed to spawn thread")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(kind: Lookup, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// The filter failure carried by this error, if any.
    pub fn filter_error(&self) -> Option<&FilterError> {
        match self {
            Error::Filter { source, .. } | Error::Upstream { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
