//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod diagnostics;
pub mod loyalty;

/// Current Unix timestamp in seconds.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
