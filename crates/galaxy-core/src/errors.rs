//! Fatal error taxonomy.
//!
//! Only the two fatal conditions from the error taxonomy get typed,
//! returnable/panicking variants here. The recoverable half
//! (`UnknownArtist`, `NameUnavailable`, `QualityOutOfRange`, `BatchOverflow`)
//! is absorbed locally and logged through `tracing` at the call site instead
//! of being threaded through `Result` — the renderer is never notified of
//! them, so giving them a public error type would just be dead plumbing.

use thiserror::Error;

/// Errors that abort construction or execution outright.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The packed embedding buffer was malformed: wrong length, duplicate
    /// ids, or a non-finite coordinate.
    #[error("corrupt embedding: {0}")]
    CorruptEmbedding(String),
}

/// Raises a fatal, unrecoverable invariant violation.
///
/// This is a programmer bug, not a runtime condition callers can recover
/// from (e.g. the renderer asked for a position behind an id the embedding
/// store never decoded): log the violated invariant and let the worker
/// crash and restart.
#[allow(clippy::panic)]
#[track_caller]
pub fn invariant_violation(detail: impl std::fmt::Display) -> ! {
    tracing::error!(invariant = %detail, "invariant violation");
    panic!("invariant violation: {detail}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_embedding_message_includes_reason() {
        let err = EngineError::CorruptEmbedding("length not a multiple of record size".into());
        assert!(err.to_string().contains("length not a multiple"));
    }
}
