//! Centralized configuration for the file-transfer core.
//!
//! Protocol constants live here so they can be reviewed and adjusted in a
//! single place. Wire namespaces stay next to the stanza DOM in
//! `core::stanza`.

use std::path::PathBuf;

// ── Protocol limits ──────────────────────────────────────────────────────────

/// Largest IBB block size a peer may negotiate, per XEP-0047 practice.
/// A `session-initiate` offering a larger (or zero, or unparsable) value
/// has that content skipped during validation.
pub const MAX_BLOCK_SIZE: u32 = 65535;

// ── Downloads ────────────────────────────────────────────────────────────────

/// Base name used when a peer offers a file whose name sanitises to
/// nothing usable (empty, `.`, `..`, or pure path separators).
pub const FALLBACK_FILE_NAME: &str = "download";

// ── Runtime configuration ────────────────────────────────────────────────────

/// Behavioural switches the embedding client hands to the engine.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    /// Accept every incoming file offer immediately instead of holding the
    /// session until the user calls `accept`/`reject`.
    pub auto_accept: bool,
    /// Write downloads under this directory instead of the platform
    /// downloads directory. Used by tests and headless deployments.
    pub downloads_override: Option<PathBuf>,
}
