//! Error taxonomy of the bridge
//!
//! Construction errors are fatal to one type. Binding and marshaling
//! errors surface to foreign code as `TypeError`. Lifecycle errors go to
//! the finalizer's error-handler hook first.

use crate::handles::HandleError;
use crate::host::HostException;
use hostbridge_runtime::errors::{self, ExcKind};
use hostbridge_runtime::gil;
use std::fmt;
use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Text of a foreign exception captured at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignException {
    pub type_name: String,
    pub message: String,
    pub traceback: Option<String>,
}

impl fmt::Display for ForeignException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if let Some(tb) = &self.traceback {
            write!(f, "\n{}", tb)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Building a foreign type failed; nothing was published
    #[error("cannot construct foreign type '{type_name}': {reason}")]
    Construction { type_name: String, reason: String },

    /// No overload accepted the arguments
    #[error("{0}")]
    Binding(String),

    /// A value could not be converted across the boundary
    #[error("cannot convert {actual} to {expected}")]
    Marshal { expected: String, actual: String },

    /// A foreign call raised
    #[error("foreign exception {0}")]
    Foreign(ForeignException),

    /// A host method threw
    #[error("host exception {}: {}", .0.type_name(), .0.message)]
    Host(HostException),

    /// The foreign error indicator is already set and must stay untouched
    #[error("foreign error indicator already set")]
    Pending,

    /// Releasing a queued object raised
    #[error("releasing object {address:#x} failed: {source}")]
    Finalization {
        address: usize,
        #[source]
        source: Box<BridgeError>,
    },

    /// More releases were queued for an object than it has references
    #[error(
        "object {address:#x} enqueued {enqueued} times but holds {refcount} references"
    )]
    IncorrectRefCount {
        address: usize,
        enqueued: usize,
        refcount: isize,
    },

    /// A queued object belongs to an earlier runtime generation
    #[error("object {address:#x} belongs to runtime generation {enqueued}, now {current}")]
    StaleGeneration {
        address: usize,
        enqueued: u64,
        current: u64,
    },

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error("{0}")]
    Attribute(String),

    #[error("{0}")]
    Index(String),

    /// The bridge was not started or is already shut down
    #[error("bridge is not running")]
    NotRunning,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn construction(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Construction {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    pub fn marshal(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        BridgeError::Marshal {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Take the pending foreign exception as a bridge error
    ///
    /// Falls back to a `SystemError` description when nothing is pending.
    pub fn fetch_foreign() -> Self {
        let _gil = gil::acquire();
        match errors::fetch() {
            Some(state) => {
                let captured = ForeignException {
                    type_name: state.type_name(),
                    message: state.message(),
                    traceback: state.traceback(),
                };
                unsafe { state.release() };
                BridgeError::Foreign(captured)
            }
            None => BridgeError::Foreign(ForeignException {
                type_name: String::from("SystemError"),
                message: String::from("error return without exception set"),
                traceback: None,
            }),
        }
    }

    /// Replace `Pending` by the exception it stands for
    ///
    /// Host-called paths use this so the error outlives the indicator.
    pub fn capture(self) -> Self {
        match self {
            BridgeError::Pending => Self::fetch_foreign(),
            other => other,
        }
    }

    /// Foreign exception kind this error surfaces as
    pub fn foreign_kind(&self) -> ExcKind {
        match self {
            BridgeError::Binding(_) | BridgeError::Marshal { .. } => ExcKind::TypeError,
            BridgeError::Attribute(_) => ExcKind::AttributeError,
            BridgeError::Index(_) => ExcKind::IndexError,
            BridgeError::Construction { .. } => ExcKind::TypeError,
            BridgeError::Host(_) => ExcKind::Exception,
            BridgeError::Foreign(f) => ExcKind::from_name(&f.type_name).unwrap_or(ExcKind::Exception),
            _ => ExcKind::SystemError,
        }
    }

    /// Put this error into the foreign error indicator
    ///
    /// `Pending` leaves the indicator as it is. Must run on a thread that
    /// holds the global lock.
    pub fn restore(self) {
        debug_assert!(gil::is_held(), "error restored without the global lock");
        match self {
            BridgeError::Pending => {
                if !errors::occurred() {
                    errors::raise(ExcKind::SystemError, "error return without exception set");
                }
            }
            BridgeError::Foreign(f) => unsafe {
                let kind = ExcKind::from_name(&f.type_name).unwrap_or(ExcKind::Exception);
                errors::set_with_traceback(kind.type_object(), &f.message, f.traceback.as_deref());
            },
            BridgeError::Host(exc) => unsafe {
                errors::set_with_traceback(
                    ExcKind::Exception.type_object(),
                    &exc.message,
                    exc.trace.as_deref(),
                );
            },
            other => {
                let kind = other.foreign_kind();
                errors::raise(kind, &other.to_string());
            }
        }
    }
}

impl From<errors::ErrorSet> for BridgeError {
    fn from(_: errors::ErrorSet) -> Self {
        BridgeError::Pending
    }
}
