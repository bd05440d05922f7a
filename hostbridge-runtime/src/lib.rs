//! Hostbridge Runtime - refcounted object runtime for embedding
//!
//! Objects carry a refcount and a type pointer; type objects are word
//! tables whose layout is computed per ABI revision. All runtime memory is
//! guarded by one recursive global lock.

pub mod allocator;
pub mod builtins;
pub mod errors;
pub mod gil;
pub mod layout;
pub mod logging;
pub mod object;
pub mod protocol;
pub mod typeobj;

pub use errors::{ErrState, ErrorSet, ExcKind, RtResult};
pub use layout::{offsets, AbiRevision, TypeOffsets};
pub use object::{decref, incref, ObjPtr, RawObject, SharedPtr};
pub use typeobj::TypeFlags;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Runtime settings fixed at first initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub abi_revision: AbiRevision,
}

/// Initialization failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeInitError {
    /// The process already runs with another layout revision
    RevisionMismatch {
        requested: AbiRevision,
        installed: AbiRevision,
    },
    /// Builtin types could not be brought up
    Bootstrap(String),
}

impl fmt::Display for RuntimeInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeInitError::RevisionMismatch {
                requested,
                installed,
            } => write!(
                f,
                "runtime layout revision {} requested but {} is installed",
                requested, installed
            ),
            RuntimeInitError::Bootstrap(reason) => write!(f, "runtime bootstrap failed: {}", reason),
        }
    }
}

impl std::error::Error for RuntimeInitError {}

/// Bring the runtime up; a no-op if it is already running
///
/// Every start after a [`finalize`] begins a new generation, so objects
/// remembered from an earlier run can be told apart.
pub fn initialize(config: &RuntimeConfig) -> Result<u64, RuntimeInitError> {
    let installed = layout::install(config.abi_revision).map_err(|installed| {
        RuntimeInitError::RevisionMismatch {
            requested: config.abi_revision,
            installed,
        }
    })?;

    let _gil = gil::acquire();
    if let Some(reason) = builtins::bootstrap_failure() {
        return Err(RuntimeInitError::Bootstrap(reason.to_string()));
    }
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return Ok(GENERATION.load(Ordering::Acquire));
    }
    let generation = GENERATION.fetch_add(1, Ordering::AcqRel) + 1;
    logging::log_runtime_init(generation, &installed.revision.to_string());
    Ok(generation)
}

/// Mark the runtime stopped
///
/// Builtin types are immortal and survive; heap objects still referenced
/// from outside stay valid memory but belong to a finished generation.
pub fn finalize() {
    let _gil = gil::acquire();
    if INITIALIZED.swap(false, Ordering::AcqRel) {
        errors::clear();
        logging::log_runtime_shutdown(GENERATION.load(Ordering::Acquire));
    }
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Current runtime generation (0 before the first start)
pub fn generation() -> u64 {
    GENERATION.load(Ordering::Acquire)
}

/// Runtime initialization with default settings
#[no_mangle]
pub extern "C" fn hostbridge_runtime_init() -> i32 {
    match initialize(&RuntimeConfig::default()) {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

/// Runtime cleanup
#[no_mangle]
pub extern "C" fn hostbridge_runtime_finalize() {
    finalize();
}

/// Start the runtime (idempotent) and take the global lock
#[cfg(test)]
pub(crate) fn test_runtime() -> gil::GilGuard {
    let _ = initialize(&RuntimeConfig::default());
    gil::acquire()
}
