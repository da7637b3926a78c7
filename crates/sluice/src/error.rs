//! # Errors
//!
//! Every fallible operation in sluice returns a [`PipelineError`]. The variants
//! mirror the four failure classes a caller has to tell apart:
//!
//! - [`PipelineError::Precondition`] - the compiled metadata is malformed
//! - [`PipelineError::InvalidArgument`] - the runtime tensors disagree with the metadata
//! - [`PipelineError::Internal`] - a size or pipeline invariant was broken
//! - [`PipelineError::Aborted`] - the device reported a transient abort
//!
//! Anything else the device collaborator reports is carried as
//! [`PipelineError::Device`].

use tracing::warn;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised while validating, planning or driving a sub-batch pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Static metadata is inconsistent, e.g. name/type/shape lists of different lengths.
    #[error("failed precondition: {0}")]
    Precondition(String),

    /// Runtime tensors do not match the declared signature.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A tensor byte size or a pipeline invariant did not hold.
    #[error("internal error: {0}")]
    Internal(String),

    /// The device aborted the operation.
    #[error("aborted: {0}")]
    Aborted(String),

    /// Any other failure surfaced by the device collaborator.
    #[error("device error: {0}")]
    Device(String),
}

/// Discriminant of a [`PipelineError`], used to select errors without
/// matching on their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Precondition,
    InvalidArgument,
    Internal,
    Aborted,
    Device,
}

impl PipelineError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Precondition(_) => ErrorKind::Precondition,
            PipelineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            PipelineError::Internal(_) => ErrorKind::Internal,
            PipelineError::Aborted(_) => ErrorKind::Aborted,
            PipelineError::Device(_) => ErrorKind::Device,
        }
    }

    /// True if this error is of the given kind.
    #[inline]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }
}

/// Swallows an error of the given `kind` and propagates every other error.
///
/// Used after outputs have been allocated, where a transient abort must not
/// leave the caller with a half-written output and no way to roll back.
pub fn ignore_if(result: Result<()>, kind: ErrorKind) -> Result<()> {
    match result {
        Err(err) if err.is(kind) => {
            warn!(error = %err, "ignored error");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(PipelineError::Precondition("x".into()).kind(), ErrorKind::Precondition);
        assert_eq!(PipelineError::InvalidArgument("x".into()).kind(), ErrorKind::InvalidArgument);
        assert_eq!(PipelineError::Internal("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(PipelineError::Aborted("x".into()).kind(), ErrorKind::Aborted);
        assert_eq!(PipelineError::Device("x".into()).kind(), ErrorKind::Device);
    }

    #[test]
    fn test_ignore_if_swallows_selected_kind() {
        let result = ignore_if(Err(PipelineError::Aborted("transient".into())), ErrorKind::Aborted);
        assert!(result.is_ok());
    }

    #[test]
    fn test_ignore_if_propagates_other_kinds() {
        let result = ignore_if(Err(PipelineError::Device("unavailable".into())), ErrorKind::Aborted);
        assert_eq!(result, Err(PipelineError::Device("unavailable".into())));
    }

    #[test]
    fn test_ignore_if_passes_ok_through() {
        assert!(ignore_if(Ok(()), ErrorKind::Aborted).is_ok());
    }

    #[test]
    fn test_display_carries_message() {
        let err = PipelineError::Internal("incorrect queue length".into());
        assert_eq!(err.to_string(), "internal error: incorrect queue length");
    }
}
