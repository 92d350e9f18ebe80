//! # lintbridge_cache
//!
//! Memoization of expensive, project-scoped analysis contexts.
//!
//! ## Cache Strategy
//!
//! 1. **Keyed by manifest identity**: one entry per project manifest
//! 2. **Fingerprint-aware**: a changed content fingerprint replaces the entry
//! 3. **Single-flight construction**: concurrent callers for the same key wait
//!    for one construction and observe the same value
//! 4. **No eviction**: entries live until `invalidate` or `clear`

mod entry;
mod manager;

pub use entry::CacheEntry;
pub use manager::{CacheStats, ProgramCache};

/// Computes the BLAKE3 fingerprint of content.
pub fn fingerprint(content: impl AsRef<[u8]>) -> String {
    blake3::hash(content.as_ref()).to_hex().to_string()
}
