use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Per-field validation detail, keyed by dotted field path
/// (e.g. `planCostShares.deductible`).
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationErrors {
    pub fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.fields.insert(path.into(), message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(path, message);
        errors
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (path, message) in &self.fields {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{path}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authorization token missing or invalid")]
    Unauthenticated,
    #[error("missing or invalid fields: {0}")]
    Validation(ValidationErrors),
    #[error("plan not found")]
    NotFound,
    #[error("plan with id {id} already exists")]
    Conflict { id: String },
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("change feed closed")]
    ChannelClosed,
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Machine-readable status kind for the transport boundary.
    pub fn status(&self) -> StatusKind {
        match self {
            Error::Unauthenticated => StatusKind::Unauthenticated,
            Error::Validation(_) => StatusKind::BadRequest,
            Error::NotFound => StatusKind::NotFound,
            Error::Conflict { .. } => StatusKind::Conflict,
            Error::PreconditionFailed => StatusKind::PreconditionFailed,
            Error::Context { source, .. } => source.status(),
            _ => StatusKind::ServiceUnavailable,
        }
    }
}

/// Response status kinds surfaced to the (external) transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Ok,
    Created,
    NoContent,
    NotModified,
    BadRequest,
    Unauthenticated,
    NotFound,
    Conflict,
    PreconditionFailed,
    ServiceUnavailable,
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait WithContext<T> {
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T> WithContext<T> for Result<T> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: msg.into(),
            source: Box::new(e),
        })
    }
}
