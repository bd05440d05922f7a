//! Logging for the bridge
//!
//! One subscriber serves the whole process; it is installed through the
//! runtime's logging setup, whose default filter already covers this
//! crate. This module adds the bridge-specific events.

pub use hostbridge_runtime::logging::{init, init_with_config, is_initialized, parse_level, LogConfig};
pub use tracing::{debug, error, info, trace, warn};

use std::time::Duration;

/// Log bridge startup
pub fn log_bridge_start(owner: u64, generation: u64, revision: &str) {
    info!(
        event = "bridge_start",
        owner,
        generation,
        revision,
        "Bridge started"
    );
}

/// Log bridge teardown
pub fn log_bridge_shutdown(owner: u64, types_released: usize, handles_released: usize) {
    info!(
        event = "bridge_shutdown",
        owner,
        types_released,
        handles_released,
        "Bridge shut down"
    );
}

/// Log a produced foreign type
pub fn log_type_created(name: &str, variant: &str, basicsize: usize) {
    debug!(
        event = "type_created",
        type_name = name,
        variant,
        basicsize,
        "Foreign type created"
    );
}

/// Log a slot written into a type
#[inline]
pub fn log_slot_installed(type_name: &str, slot: &str, address: usize) {
    trace!(
        event = "slot_installed",
        type_name,
        slot,
        address = format_args!("{:#x}", address),
        "Slot installed"
    );
}

/// Log a type restored to its default slots
pub fn log_slots_reset(type_name: &str, slots: usize) {
    debug!(
        event = "slots_reset",
        type_name,
        slots,
        "Slots reset to defaults"
    );
}

/// Log a completed drain
pub fn log_drain(objects: usize, derived: usize, buffers: usize, elapsed: Duration) {
    debug!(
        event = "finalizer_drain",
        objects,
        derived,
        buffers,
        elapsed_us = elapsed.as_micros() as u64,
        "Finalizer drained"
    );
}

/// Log a lifecycle problem reported to the error handler
pub fn log_lifecycle_error(message: &str, handled: bool) {
    if handled {
        warn!(event = "lifecycle_error", handled, message, "Finalizer error handled");
    } else {
        error!(event = "lifecycle_error", handled, message, "Finalizer error unhandled");
    }
}

/// Log a new delegate dispatcher type
pub fn log_dispatcher_created(delegate: &str, forwarder: &str) {
    debug!(
        event = "dispatcher_created",
        delegate,
        forwarder,
        "Delegate dispatcher built"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_do_not_require_subscriber() {
        log_type_created("Point", "class", 40);
        log_drain(1, 0, 0, Duration::from_micros(3));
        log_lifecycle_error("stale", true);
    }

    #[test]
    fn test_init_shared_with_runtime() {
        init();
        assert!(is_initialized());
        assert!(hostbridge_runtime::logging::is_initialized());
    }
}
