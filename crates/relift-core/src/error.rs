//! Pipeline error taxonomy with retry classification.
//!
//! Every error the pipeline can surface is represented here. Callers query
//! `is_transient()` / `retry_category()` instead of string matching.
//!
//! ## Retry categories
//!
//! | Category          | Retried by                      |
//! |-------------------|---------------------------------|
//! | TransientService  | resilient client, with backoff  |
//! | Validation        | repair loop, bounded iterations |
//! | everything else   | nobody — propagates             |

use std::fmt;

use thiserror::Error;

/// Classification used to decide which layer (if any) may retry an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Throttling / overload / internal error from the generation service —
    /// the resilient client retries with exponential backoff.
    TransientService,
    /// The external checker rejected the candidate documents — the repair
    /// loop retries by regenerating, bounded by its iteration budget.
    Validation,
    /// Not retriable at any layer.
    Terminal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        !matches!(self, Self::Terminal)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientService => write!(f, "transient_service"),
            Self::Validation => write!(f, "validation"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Unified error type for the generation-and-repair pipeline.
#[derive(Debug, Error)]
pub enum ReliftError {
    // ── Retriable at some layer ───────────────────────────────────────────
    /// Generation service signalled throttling, overload, or an internal
    /// error. Safe to retry the same request after a delay.
    #[error("transient service error: {0}")]
    TransientService(String),

    /// The external validation tool rejected the candidate documents.
    /// Expected and recoverable — drives the repair loop.
    #[error("validation failed during {phase}: {diagnostic}")]
    Validation { phase: String, diagnostic: String },

    // ── Terminal ──────────────────────────────────────────────────────────
    /// Generation service rejected the request itself (malformed payload,
    /// auth failure). Retrying the identical request cannot succeed.
    #[error("permanent service error: {0}")]
    PermanentService(String),

    /// Generated text did not match the expected structural contract.
    /// Content-shape failures are never retried at the transport layer.
    #[error("response parse error: {0}")]
    Parse(String),

    /// The resilient client gave up after its attempt budget.
    #[error("exhausted {attempts} generation attempts; last error: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    /// The validate-repair loop gave up after its iteration budget.
    #[error("exhausted {iterations} repair iterations; last diagnostic: {last_diagnostic}")]
    ExhaustedRepairIterations {
        iterations: u32,
        last_diagnostic: String,
    },

    /// The operation was cancelled by the caller's cancellation token.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Source platform collaborator failed to produce app descriptors.
    #[error("source provider error: {0}")]
    Source(String),

    /// Reference corpus fetcher failed.
    #[error("corpus fetch error: {0}")]
    Corpus(String),

    /// Filesystem or subprocess I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReliftError {
    /// Classify this error for retry logic.
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::TransientService(_) => RetryCategory::TransientService,
            Self::Validation { .. } => RetryCategory::Validation,
            _ => RetryCategory::Terminal,
        }
    }

    /// Whether the resilient client may retry after this error.
    pub fn is_transient(&self) -> bool {
        self.retry_category() == RetryCategory::TransientService
    }

    /// Build a `Validation` variant conveniently.
    pub fn validation(phase: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::Validation {
            phase: phase.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReliftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_service_is_retriable() {
        let err = ReliftError::TransientService("429 too many requests".into());
        assert!(err.is_transient());
        assert_eq!(err.retry_category(), RetryCategory::TransientService);
    }

    #[test]
    fn validation_drives_repair_not_transport_retry() {
        let err = ReliftError::validation("init", "provider not found");
        assert!(!err.is_transient());
        assert_eq!(err.retry_category(), RetryCategory::Validation);
        assert!(err.retry_category().is_retriable());
    }

    #[test]
    fn parse_and_permanent_are_terminal() {
        for err in [
            ReliftError::Parse("missing delimiter".into()),
            ReliftError::PermanentService("401 unauthorized".into()),
            ReliftError::Cancelled("operator abort".into()),
        ] {
            assert_eq!(err.retry_category(), RetryCategory::Terminal);
            assert!(!err.retry_category().is_retriable());
        }
    }

    #[test]
    fn exhaustion_errors_carry_budgets() {
        let err = ReliftError::ExhaustedRetries {
            attempts: 20,
            last_error: "503".into(),
        };
        assert!(err.to_string().contains("20"));

        let err = ReliftError::ExhaustedRepairIterations {
            iterations: 10,
            last_diagnostic: "invalid block".into(),
        };
        assert!(err.to_string().contains("invalid block"));
    }
}
