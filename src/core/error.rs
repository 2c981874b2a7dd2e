use std::fmt;

/// Error taxonomy for every public operation in the engine.
///
/// `ParseError`/`TranslateError`/`PlanError` are AQL front-door failures;
/// the remainder surface from the index/store layers. See `spec.md` §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    TranslateError,
    PlanError,
    NotFound,
    UniqueViolation,
    ValidationError,
    StoreError,
    Cancelled,
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ParseError => "ParseError",
            ErrorKind::TranslateError => "TranslateError",
            ErrorKind::PlanError => "PlanError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::UniqueViolation => "UniqueViolation",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::StoreError => "StoreError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::InternalError => "InternalError",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error { kind, context: context.into() }
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, context)
    }

    pub fn unique_violation(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::UniqueViolation, context)
    }

    pub fn validation(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::ValidationError, context)
    }

    pub fn parse(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::ParseError, context)
    }

    pub fn translate(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::TranslateError, context)
    }

    pub fn plan(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::PlanError, context)
    }

    pub fn cancelled() -> Self {
        Error::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InternalError, context)
    }

    pub fn store(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::StoreError, context)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::StoreError, e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::new(ErrorKind::ValidationError, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::new(ErrorKind::ValidationError, e.to_string())
    }
}

impl From<fst::Error> for Error {
    fn from(e: fst::Error) -> Self {
        Error::new(ErrorKind::InternalError, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
