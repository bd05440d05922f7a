//! The bridge: one running connection between host code and the runtime
//!
//! Design: Every cache the bridge fills lives on one [`Bridge`] value with
//! a defined start and teardown, so tests and embedders can run isolated
//! bridges side by side. Only the handle table and the thunk registry are
//! process-global, as the runtime and its lock are.
//!
//! Teardown order:
//! 1. stop accepting work
//! 2. drain the finalizer
//! 3. release produced classes, then extension types and the metatype
//! 4. release the root module
//! 5. free every handle this bridge still owns
//!
//! Instances that outlive the teardown keep working through the runtime's
//! default slots and never call back into host code.

use crate::class_manager::{BaseTypeProvider, ClassManager};
use crate::config::BridgeConfig;
use crate::convert::{Converter, DefaultConverter};
use crate::delegates::DelegateManager;
use crate::descriptors::{self, host_object_of};
use crate::error::{BridgeError, BridgeResult};
use crate::finalizer::{BeforeCollect, ErrorHandler, Finalizer, RefCountResolver};
use crate::handles::{self, OwnerTag};
use crate::host::{HostException, HostObject, HostTypeRef, HostValue};
use crate::logging::{self, warn};
use crate::members::RootModule;
use crate::type_manager::{metatype, TypeManager};
use crate::wrappers::ForeignObject;
use dashmap::DashMap;
use hostbridge_runtime::object::{decref, incref, ObjPtr, SharedPtr};
use hostbridge_runtime::{errors, gil, protocol, RuntimeConfig};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// What a teardown released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drained: usize,
    pub classes_released: usize,
    pub types_released: usize,
    pub handles_released: usize,
}

/// Settings and hooks of a bridge about to start
pub struct BridgeBuilder {
    config: BridgeConfig,
    converter: Option<Box<dyn Converter>>,
    base_provider: Option<BaseTypeProvider>,
    error_handler: Option<ErrorHandler>,
    refcount_resolver: Option<RefCountResolver>,
    before_collect: Option<BeforeCollect>,
    exports: Vec<HostTypeRef>,
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            converter: None,
            base_provider: None,
            error_handler: None,
            refcount_resolver: None,
            before_collect: None,
            exports: Vec::new(),
        }
    }

    pub fn converter(mut self, converter: impl Converter + 'static) -> Self {
        self.converter = Some(Box::new(converter));
        self
    }

    pub fn base_type_provider(mut self, provider: BaseTypeProvider) -> Self {
        self.base_provider = Some(provider);
        self
    }

    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn refcount_resolver(mut self, resolver: RefCountResolver) -> Self {
        self.refcount_resolver = Some(resolver);
        self
    }

    pub fn before_collect(mut self, hook: BeforeCollect) -> Self {
        self.before_collect = Some(hook);
        self
    }

    /// Make `ty` reachable as an attribute of the root module
    pub fn export(mut self, ty: HostTypeRef) -> Self {
        self.exports.push(ty);
        self
    }

    /// Start the runtime if needed and bring the bridge up
    pub fn start(self) -> BridgeResult<Arc<Bridge>> {
        let revision = self.config.abi_revision()?;
        let generation = hostbridge_runtime::initialize(&RuntimeConfig { abi_revision: revision })
            .map_err(|err| BridgeError::Config(err.to_string()))?;
        let _gil = gil::acquire();

        let finalizer = Arc::new(Finalizer::new(&self.config.finalizer));
        finalizer.set_error_handler(self.error_handler);
        finalizer.set_refcount_resolver(self.refcount_resolver);
        finalizer.set_before_collect(self.before_collect);

        let owner = OwnerTag::next();
        let converter = self.converter.unwrap_or_else(|| Box::new(DefaultConverter));
        let config = self.config;
        let bridge = Arc::new_cyclic(|this| Bridge {
            this: this.clone(),
            owner,
            generation,
            types: TypeManager::new(owner, &config.module_name),
            config,
            running: AtomicBool::new(false),
            converter,
            finalizer,
            classes: ClassManager::new(),
            delegates: DelegateManager::new(),
            exports: DashMap::new(),
            root: Mutex::new(SharedPtr::NULL),
        });
        bridge.classes.set_base_provider(self.base_provider);
        for ty in self.exports {
            bridge.export(ty);
        }

        unsafe { bridge.types.start()? };
        bridge.finalizer.start();
        bridge.running.store(true, Ordering::Release);
        match unsafe { RootModule::create(&bridge, &bridge.config.module_name) } {
            Ok(root) => *bridge.root.lock() = SharedPtr(root),
            Err(err) => {
                let _ = bridge.shutdown();
                return Err(err);
            }
        }
        logging::log_bridge_start(owner.0, generation, &revision.to_string());
        Ok(bridge)
    }
}

pub struct Bridge {
    this: Weak<Bridge>,
    owner: OwnerTag,
    generation: u64,
    config: BridgeConfig,
    running: AtomicBool,
    converter: Box<dyn Converter>,
    finalizer: Arc<Finalizer>,
    types: TypeManager,
    classes: ClassManager,
    delegates: DelegateManager,
    exports: DashMap<String, HostTypeRef>,
    root: Mutex<SharedPtr>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("owner", &self.owner)
            .field("generation", &self.generation)
            .field("running", &self.is_running())
            .field("classes", &self.classes.len())
            .field("exports", &self.exports.len())
            .finish()
    }
}

impl Bridge {
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    /// Start a bridge with default settings
    pub fn start() -> BridgeResult<Arc<Bridge>> {
        BridgeBuilder::default().start()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> BridgeResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BridgeError::NotRunning)
        }
    }

    pub(crate) fn weak(&self) -> Weak<Bridge> {
        self.this.clone()
    }

    pub fn owner(&self) -> OwnerTag {
        self.owner
    }

    /// Runtime generation this bridge started in
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn converter(&self) -> &dyn Converter {
        &*self.converter
    }

    pub fn finalizer(&self) -> &Arc<Finalizer> {
        &self.finalizer
    }

    pub fn types(&self) -> &TypeManager {
        &self.types
    }

    pub fn classes(&self) -> &ClassManager {
        &self.classes
    }

    pub fn delegates(&self) -> &DelegateManager {
        &self.delegates
    }

    // ------------------------------------------------------------------
    // Exports and types
    // ------------------------------------------------------------------

    pub fn export(&self, ty: HostTypeRef) {
        self.exports.insert(ty.name().to_string(), ty);
    }

    /// Exported host type named `name`
    pub fn exported(&self, name: &str) -> Option<HostTypeRef> {
        self.exports.get(name).map(|e| Arc::clone(e.value()))
    }

    /// The root module object
    pub fn root_module(&self) -> BridgeResult<ForeignObject> {
        self.ensure_running()?;
        let _gil = gil::acquire();
        let root = self.root.lock().get();
        if root.is_null() {
            return Err(BridgeError::NotRunning);
        }
        Ok(unsafe { ForeignObject::from_borrowed(root, &self.finalizer) })
    }

    /// Produced type of `host` (borrowed)
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn get_class(&self, host: &HostTypeRef) -> BridgeResult<ObjPtr> {
        self.ensure_running()?;
        self.classes.get_or_create(self, host)
    }

    /// Produced type of `host`
    pub fn class_of(&self, host: &HostTypeRef) -> BridgeResult<ForeignObject> {
        let _gil = gil::acquire();
        unsafe {
            let tp = self.get_class(host).map_err(BridgeError::capture)?;
            Ok(ForeignObject::from_borrowed(tp, &self.finalizer))
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// New reference to the foreign object standing for `obj`
    ///
    /// A derived-type object that already has a peer gets that peer back;
    /// `as_type` picks an interface type to wrap through.
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn wrap_ptr(&self, obj: &Arc<HostObject>, as_type: Option<&HostTypeRef>) -> BridgeResult<ObjPtr> {
        self.ensure_running()?;
        {
            let mut slot = obj.peer();
            if let Some(link) = slot.as_mut().filter(|l| l.is_current()) {
                let peer = link.peer();
                if link.is_owned() {
                    // The link's reference goes to the caller
                    if let Some(handle) = metatype::instance_handle(peer) {
                        handles::make_strong(handle)?;
                    }
                    link.set_owned(false);
                } else {
                    incref(peer);
                }
                return Ok(peer);
            }
        }
        let host_type = as_type.unwrap_or_else(|| obj.host_type());
        let tp = self.get_class(host_type)?;
        let desc = descriptors::descriptor_of(tp).ok_or_else(|| {
            BridgeError::construction(host_type.name(), "produced type lost its descriptor")
        })?;
        descriptors::instantiate(self, &desc, tp, obj)
    }

    pub fn wrap(&self, obj: &Arc<HostObject>) -> BridgeResult<ForeignObject> {
        let _gil = gil::acquire();
        unsafe {
            let ptr = self.wrap_ptr(obj, None).map_err(BridgeError::capture)?;
            Ok(ForeignObject::from_owned(ptr, &self.finalizer))
        }
    }

    pub fn to_foreign(&self, value: &HostValue) -> BridgeResult<ForeignObject> {
        self.ensure_running()?;
        let _gil = gil::acquire();
        unsafe {
            let ptr = self
                .converter
                .to_foreign(self, value, None)
                .map_err(BridgeError::capture)?;
            Ok(ForeignObject::from_owned(ptr, &self.finalizer))
        }
    }

    pub fn to_host(&self, obj: &ForeignObject, target: &HostTypeRef) -> BridgeResult<HostValue> {
        self.ensure_running()?;
        let _gil = gil::acquire();
        unsafe {
            let value = self
                .converter
                .to_host(self, obj.as_ptr(), target, true)
                .map_err(BridgeError::capture)?;
            Ok(value.unwrap_or_default())
        }
    }

    /// Host object behind a bridged foreign object
    pub fn host_object(&self, obj: &ForeignObject) -> Option<Arc<HostObject>> {
        let _gil = gil::acquire();
        unsafe { host_object_of(obj.as_ptr()) }
    }

    // ------------------------------------------------------------------
    // Calls from host code
    // ------------------------------------------------------------------

    unsafe fn convert_args(&self, args: &[HostValue]) -> BridgeResult<Vec<ObjPtr>> {
        let mut items = Vec::with_capacity(args.len());
        for value in args {
            match self.converter.to_foreign(self, value, None) {
                Ok(obj) => items.push(obj),
                Err(err) => {
                    for obj in items {
                        decref(obj);
                    }
                    return Err(err);
                }
            }
        }
        Ok(items)
    }

    /// `callable(*args)`
    pub fn call(&self, callable: &ForeignObject, args: &[HostValue]) -> BridgeResult<ForeignObject> {
        self.ensure_running()?;
        let _gil = gil::acquire();
        unsafe {
            let items = self.convert_args(args).map_err(BridgeError::capture)?;
            let result = protocol::call(callable.as_ptr(), &items);
            for obj in items {
                decref(obj);
            }
            let result = result.map_err(|e| BridgeError::from(e).capture())?;
            Ok(ForeignObject::from_owned(result, &self.finalizer))
        }
    }

    /// `obj.name`
    pub fn getattr(&self, obj: &ForeignObject, name: &str) -> BridgeResult<ForeignObject> {
        self.ensure_running()?;
        let _gil = gil::acquire();
        unsafe {
            let value = protocol::getattr(obj.as_ptr(), name).map_err(|e| BridgeError::from(e).capture())?;
            Ok(ForeignObject::from_owned(value, &self.finalizer))
        }
    }

    /// `obj.name(*args)`
    pub fn call_method(&self, obj: &ForeignObject, name: &str, args: &[HostValue]) -> BridgeResult<ForeignObject> {
        let method = self.getattr(obj, name)?;
        self.call(&method, args)
    }

    /// Exported type through the root module
    pub fn import(&self, name: &str) -> BridgeResult<ForeignObject> {
        let root = self.root_module()?;
        self.getattr(&root, name)
    }

    /// Raise `exc` as a foreign exception
    ///
    /// The foreign exception is an instance of the produced type of the
    /// host exception type when that type can be built; otherwise the
    /// error carries the host exception as is.
    pub fn raise_host_exception(&self, exc: &HostException) -> BridgeError {
        if !self.is_running() {
            return BridgeError::Host(exc.clone());
        }
        let _gil = gil::acquire();
        unsafe {
            let raised = (|| {
                let tp = self.get_class(&exc.ty)?;
                let desc = descriptors::descriptor_of(tp)
                    .ok_or_else(|| BridgeError::construction(exc.ty.name(), "produced type lost its descriptor"))?;
                descriptors::instantiate(self, &desc, tp, &exc.to_object())
            })();
            match raised {
                Ok(obj) => {
                    let _ = errors::set_object(obj);
                    decref(obj);
                    BridgeError::Pending
                }
                Err(err) => {
                    if errors::occurred() {
                        errors::clear();
                    }
                    warn!(
                        event = "host_exception_unwrapped",
                        type_name = %exc.type_name(),
                        error = %err
                    );
                    BridgeError::Host(exc.clone())
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Drain the finalizer now
    pub fn collect(&self) -> BridgeResult<usize> {
        self.ensure_running()?;
        self.finalizer.collect()
    }

    /// Count a release request and drain past the threshold
    pub fn throttled_collect(&self) -> BridgeResult<usize> {
        self.finalizer.throttled_collect()
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    pub fn shutdown(&self) -> BridgeResult<ShutdownReport> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(BridgeError::NotRunning);
        }
        let _gil = gil::acquire();
        let drained = self.finalizer.collect().unwrap_or_else(|err| {
            warn!(event = "shutdown_drain_failed", error = %err, "Finalizer drain failed during shutdown");
            0
        });

        let root = std::mem::replace(&mut *self.root.lock(), SharedPtr::NULL);
        let (classes_released, types_released) = unsafe {
            let classes = self.classes.remove_classes(&self.types);
            let types = self.types.shutdown();
            if !root.is_null() {
                decref(root.get());
            }
            (classes, types)
        };
        self.delegates.clear();
        self.exports.clear();
        let handles_released = handles::free_owned_by(self.owner);
        self.finalizer.stop();

        logging::log_bridge_shutdown(self.owner.0, types_released, handles_released);
        Ok(ShutdownReport {
            drained,
            classes_released,
            types_released,
            handles_released,
        })
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.shutdown();
        }
    }
}
