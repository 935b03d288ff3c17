//! Chained errors for multi-step operations.
//!
//! Operations like destroy keep going after a step fails and report
//! everything that went wrong at the end. [`ChainedError`] carries a
//! message plus an optional cause and renders the whole chain as
//! `"<message> Caused by: <cause>"`, innermost cause last.

use std::error::Error;
use std::fmt;

type BoxError = Box<dyn Error + Send + Sync + 'static>;

#[derive(Debug)]
pub struct ChainedError {
    message: String,
    cause: Option<BoxError>,
}

impl ChainedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), cause: None }
    }

    pub fn because(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Wrap this error as the cause of a new, outer message.
    pub fn wrap(self, message: impl Into<String>) -> Self {
        Self::because(message, self)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Fold a batch of failures into a single chain under `message`.
    ///
    /// Returns `None` when `failures` is empty. The first failure ends
    /// up innermost, so the chain reads in reverse order of occurrence.
    pub fn collect(
        message: impl Into<String>,
        failures: Vec<BoxError>,
    ) -> Option<Self> {
        let mut chain: Option<Self> = None;
        for failure in failures {
            chain = Some(match chain {
                None => Self::because("operation failed", failure),
                Some(inner) => Self::because(failure.to_string(), inner),
            });
        }
        chain.map(|c| c.wrap(message))
    }
}

impl fmt::Display for ChainedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} Caused by: {}", self.message, cause),
            None => f.write_str(&self.message),
        }
    }
}

impl Error for ChainedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_single_message() {
        let err = ChainedError::new("app not found");
        assert_eq!(err.to_string(), "app not found");
    }

    #[test]
    fn renders_chain_innermost_last() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
        let err = ChainedError::because("failed to write entry", io)
            .wrap("failed to destroy app blog");
        assert_eq!(
            err.to_string(),
            "failed to destroy app blog Caused by: failed to write entry \
             Caused by: read-only fs"
        );
    }

    #[test]
    fn source_walks_the_chain() {
        let err = ChainedError::because("outer", ChainedError::new("inner"));
        let source = err.source().expect("has a cause");
        assert_eq!(source.to_string(), "inner");
    }

    #[test]
    fn collect_folds_failures() {
        assert!(ChainedError::collect("destroy", Vec::new()).is_none());

        let failures: Vec<Box<dyn Error + Send + Sync>> = vec![
            Box::new(ChainedError::new("terminate-machine failed")),
            Box::new(ChainedError::new("env entry removal failed")),
        ];
        let err = ChainedError::collect("errors destroying app", failures).unwrap();
        let rendered = err.to_string();
        assert!(rendered.starts_with("errors destroying app"));
        assert!(rendered.ends_with("terminate-machine failed"));
    }
}
