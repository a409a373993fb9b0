//! Mirroring of change events into the process environment.
//!
//! This is the only code path that mutates process-wide environment state.

use crate::store::record::ChangeEvent;

/// Apply one change event to the process environment.
///
/// Tombstones remove the variable. Keys that cannot be environment variable
/// names (empty, or containing `=` or NUL) are skipped.
pub fn mirror(event: &ChangeEvent) {
    if !is_valid_name(&event.key) || event.value.contains('\0') {
        tracing::debug!(key = %event.key, "Skipping environment mirror for invalid name");
        return;
    }
    if event.is_tombstone() {
        std::env::remove_var(&event.key);
    } else {
        std::env::set_var(&event.key, &event.value);
    }
}

fn is_valid_name(key: &str) -> bool {
    !key.is_empty() && !key.contains('=') && !key.contains('\0')
}
