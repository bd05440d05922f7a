//! Type and lifetime bridge between a managed host object model and the
//! embedded runtime
//!
//! A [`Bridge`] produces one foreign type per host type on demand, wraps
//! host objects as instances of those types, turns foreign callables into
//! host delegates and releases foreign references dropped from host
//! threads through its [`Finalizer`].

// Host side
pub mod host;
pub mod handles;

// Foreign type machinery
pub mod interop;
pub mod type_manager;
pub mod descriptors;
pub mod members;
pub mod class_manager;

// Binding and conversion
pub mod binder;
pub mod operators;
pub mod convert;
pub mod delegates;

// Lifetime
pub mod wrappers;
pub mod finalizer;

// Ambient
pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used items
pub use bridge::{Bridge, BridgeBuilder, ShutdownReport};
pub use class_manager::{BaseTypeProvider, ClassManager};
pub use config::{BridgeConfig, FinalizerConfig};
pub use convert::{Converter, DefaultConverter};
pub use delegates::{DelegateManager, Dispatcher};
pub use error::{BridgeError, BridgeResult, ForeignException};
pub use finalizer::{Finalizer, StatsSnapshot};
pub use handles::{OwnerTag, OwnershipHandle};
pub use host::{HostException, HostMember, HostObject, HostType, HostTypeRef, HostValue, Param, Signature};
pub use type_manager::TypeManager;
pub use wrappers::{BufferView, ForeignObject};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::bridge::Bridge;
    use hostbridge_runtime::gil::{self, GilGuard};
    use hostbridge_runtime::RuntimeConfig;
    use std::sync::Arc;

    /// Start the runtime (idempotent) and take the global lock
    pub fn runtime() -> GilGuard {
        let _ = hostbridge_runtime::initialize(&RuntimeConfig::default());
        gil::acquire()
    }

    /// A running bridge with default settings
    pub fn bridge() -> Arc<Bridge> {
        Bridge::start().unwrap()
    }
}
