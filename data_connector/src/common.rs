use std::{fmt::Display, time::Duration};

use crate::core::StorageError;

/// Wrap a backend client error.
pub(super) fn backend_error(e: impl Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Wrap a pool checkout error.
pub(super) fn unavailable(e: impl Display) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

/// Whole seconds for an expiry, never zero (`SETEX 0` is rejected by Redis).
pub(super) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Normalize a caller email for use as a lookup key.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
