//! Error type shared by the parser and compiler.
//!
//! Modeled as a `Reason` enum carried by a single `Error` struct, rather
//! than a `thiserror`-derived per-variant type: the surface is small and
//! uniform enough that one `Display` impl covers it, and the core crate
//! avoids pulling a derive dependency into its public API.

use std::fmt;

/// The kind of failure that occurred during parsing or compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    /// A stage or expression operator was not recognized.
    UnsupportedOperator(String),
    /// An operator's argument shape, arity, or type violates its contract.
    InvalidArgument(String),
    /// A filter, expression, or facet document was empty where non-empty
    /// input is required.
    EmptyInput(String),
    /// A cross-stage invariant was violated during compilation.
    TranslationError(String),
    /// A CLI-only failure reading or writing a file.
    IoError(String),
}

impl Reason {
    fn kind_str(&self) -> &'static str {
        match self {
            Reason::UnsupportedOperator(_) => "UnsupportedOperator",
            Reason::InvalidArgument(_) => "InvalidArgument",
            Reason::EmptyInput(_) => "EmptyInput",
            Reason::TranslationError(_) => "TranslationError",
            Reason::IoError(_) => "IOError",
        }
    }

    fn message(&self) -> &str {
        match self {
            Reason::UnsupportedOperator(m)
            | Reason::InvalidArgument(m)
            | Reason::EmptyInput(m)
            | Reason::TranslationError(m)
            | Reason::IoError(m) => m,
        }
    }
}

/// An error produced while parsing a pipeline document or compiling a
/// [`Pipeline`](crate::ast::Pipeline) to SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    reason: Reason,
    /// Dotted breadcrumb locating the failure, e.g. `$group > accumulators.total`.
    path: Option<String>,
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error { reason, path: None }
    }

    pub fn unsupported_operator<S: Into<String>>(name: S) -> Self {
        Error::new(Reason::UnsupportedOperator(name.into()))
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::new(Reason::InvalidArgument(msg.into()))
    }

    pub fn empty_input<S: Into<String>>(msg: S) -> Self {
        Error::new(Reason::EmptyInput(msg.into()))
    }

    pub fn translation<S: Into<String>>(msg: S) -> Self {
        Error::new(Reason::TranslationError(msg.into()))
    }

    pub fn io<S: Into<String>>(msg: S) -> Self {
        Error::new(Reason::IoError(msg.into()))
    }

    /// Attach (or overwrite) the breadcrumb locating where this error occurred.
    pub fn with_context<S: Into<String>>(mut self, path: S) -> Self {
        let path = path.into();
        self.path = Some(match self.path.take() {
            Some(existing) => format!("{path} > {existing}"),
            None => path,
        });
        self
    }

    pub fn reason(&self) -> &Reason {
        &self.reason
    }

    /// Exit code this error should map to on the CLI, per the interface spec.
    pub fn exit_code(&self) -> i32 {
        match self.reason {
            Reason::IoError(_) => 2,
            _ => 3,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason.kind_str(), self.reason.message())?;
        if let Some(path) = &self.path {
            write!(f, " [at {path}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Extension trait for attaching a breadcrumb to a `Result`'s error, in the
/// same spirit as a `with_span` builder over a parsed node.
pub trait WithErrorInfo<T> {
    fn with_context<S: Into<String>>(self, path: S) -> Result<T>;
}

impl<T> WithErrorInfo<T> for Result<T> {
    fn with_context<S: Into<String>>(self, path: S) -> Result<T> {
        self.map_err(|e| e.with_context(path))
    }
}
