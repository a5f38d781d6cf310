//! Types and helpers shared by every feedgen crate.
//!
//! Kept deliberately small so the HTTP client, the Bluesky wrapper, the feed
//! core and the server binary can all depend on it without pulling in each
//! other.
//!
//! # Overview
//!
//! - [`FeedgenError`] and [`Result`]: errors that cross crate boundaries
//! - [`observability`]: centralised `tracing` initialisation
//! - [`redact_presence`]: the `(set)` / `(not set)` rendering used when a
//!   secret must be mentioned in logs or status payloads
//!
//! # Examples
//!
//! ```rust
//! use feedgen_common::{redact_presence, FeedgenError};
//!
//! assert_eq!(redact_presence(Some("hunter2")), "(set)");
//! assert_eq!(redact_presence(None), "(not set)");
//!
//! let err = FeedgenError::Authentication("bad password".into());
//! assert!(err.to_string().contains("bad password"));
//! ```

pub mod observability;

/// Errors surfaced across the feed generator.
#[derive(thiserror::Error, Debug)]
pub enum FeedgenError {
    /// The upstream network rejected our credentials or the session call failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// An upstream call failed in a way the caller cannot recover from.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Anything else (task join failures, poisoned state, ...).
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Convenient alias for results that use [`FeedgenError`].
pub type Result<T> = std::result::Result<T, FeedgenError>;

/// Render whether a secret is present without ever echoing it.
pub fn redact_presence(value: Option<&str>) -> &'static str {
    match value {
        Some(v) if !v.trim().is_empty() => "(set)",
        _ => "(not set)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_secret_counts_as_missing() {
        assert_eq!(redact_presence(Some("   ")), "(not set)");
        assert_eq!(redact_presence(Some("")), "(not set)");
    }

    #[test]
    fn upstream_failures_keep_their_message() {
        let err = FeedgenError::Upstream("session request failed: timeout".into());
        assert_eq!(err.to_string(), "upstream error: session request failed: timeout");
    }

    #[test]
    fn internal_wraps_anyhow() {
        let err: FeedgenError = anyhow::anyhow!("join failed").into();
        assert!(matches!(err, FeedgenError::Internal(_)));
        assert_eq!(err.to_string(), "internal error: join failed");
    }
}
