//! Host delegates backed by foreign callables
//!
//! Design: Each delegate type gets one [`DispatcherType`], built on first
//! request and cached by the type's identity: the invoke signature plus a
//! [`Forwarder`] chosen by arity and by-ref shape. Every request then makes
//! a fresh [`Dispatcher`] owning the callable; the host delegate object
//! keeps the dispatcher as its target, so dropping the delegate releases
//! the callable through the finalizer.
//!
//! By-ref convention of a dispatch:
//! - no by-ref parameters: the call result is the return value
//! - void with exactly one by-ref parameter: the call result is that
//!   parameter's new value
//! - otherwise a tuple of the return value (if any) followed by every
//!   by-ref parameter in declaration order

mod forwarders;

#[cfg(test)]
mod tests;

pub use forwarders::{Forwarder, MAX_FIXED_ARITY};

use crate::bridge::Bridge;
use crate::convert;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostException, HostObject, HostTypeRef, HostValue, Signature};
use crate::logging::{self, trace};
use crate::wrappers::ForeignObject;
use dashmap::DashMap;
use hostbridge_runtime::builtins::tuple;
use hostbridge_runtime::object::{decref, type_of, ObjPtr};
use hostbridge_runtime::{gil, protocol, typeobj};
use smallvec::SmallVec;
use std::fmt;
use std::sync::{Arc, Weak};

/// Dispatch shape of one delegate type
#[derive(Debug)]
pub struct DispatcherType {
    delegate: HostTypeRef,
    sig: Signature,
    forwarder: Forwarder,
}

impl DispatcherType {
    pub fn delegate(&self) -> &HostTypeRef {
        &self.delegate
    }

    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }
}

/// Result of one dispatch, already converted to host values
#[derive(Debug)]
pub struct Dispatched {
    pub ret: HostValue,
    /// New values of the by-ref parameters, in declaration order
    pub by_ref: Vec<HostValue>,
}

/// Forwards host delegate calls to one foreign callable
pub struct Dispatcher {
    ty: Arc<DispatcherType>,
    callable: ForeignObject,
    bridge: Weak<Bridge>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("delegate", &self.ty.delegate.name())
            .field("forwarder", &self.ty.forwarder)
            .field("callable", &format_args!("{:#x}", self.callable.addr()))
            .finish()
    }
}

impl Dispatcher {
    /// The foreign callable (borrowed)
    pub fn callable(&self) -> ObjPtr {
        self.callable.as_ptr()
    }

    pub fn signature(&self) -> &Signature {
        &self.ty.sig
    }

    pub fn delegate_type(&self) -> &HostTypeRef {
        &self.ty.delegate
    }

    /// Call the foreign callable with host arguments
    ///
    /// Takes the global lock. Each argument converts with its formal
    /// parameter type as the hint. Failures, foreign ones included, come
    /// back as host exceptions carrying the foreign traceback.
    pub fn dispatch(&self, args: &[HostValue]) -> Result<Dispatched, HostException> {
        let bridge = self
            .bridge
            .upgrade()
            .ok_or_else(|| HostException::general("bridge is not running"))?;
        let _gil = gil::acquire();
        trace!(event = "dispatch", delegate = %self.ty.delegate.name(), args = args.len());
        unsafe { self.dispatch_locked(&bridge, args) }.map_err(|err| to_host_exception(err.capture()))
    }

    unsafe fn dispatch_locked(&self, bridge: &Bridge, args: &[HostValue]) -> BridgeResult<Dispatched> {
        if !self.callable.is_current() {
            return Err(BridgeError::Binding(format!(
                "{} targets a callable from a finished runtime",
                self.ty.delegate.name()
            )));
        }
        let converter = bridge.converter();
        let mut items: SmallVec<[ObjPtr; MAX_FIXED_ARITY]> = SmallVec::with_capacity(args.len());
        for (param, value) in self.ty.sig.params.iter().zip(args) {
            match converter.to_foreign(bridge, value, Some(&param.ty)) {
                Ok(obj) => items.push(obj),
                Err(err) => {
                    for obj in items {
                        decref(obj);
                    }
                    return Err(err);
                }
            }
        }
        let result = protocol::call(self.callable.as_ptr(), &items);
        for obj in items {
            decref(obj);
        }
        let result = result?;
        let unpacked = self.unpack(bridge, result);
        decref(result);
        unpacked
    }

    unsafe fn unpack(&self, bridge: &Bridge, result: ObjPtr) -> BridgeResult<Dispatched> {
        let sig = &self.ty.sig;
        let converter = bridge.converter();
        let convert = |obj: ObjPtr, ty: &HostTypeRef| -> BridgeResult<HostValue> {
            Ok(converter.to_host(bridge, obj, ty, true)?.unwrap_or_default())
        };
        let ref_types: Vec<HostTypeRef> = sig
            .by_ref_positions()
            .into_iter()
            .map(|i| sig.params[i].ty.clone())
            .collect();

        if ref_types.is_empty() {
            let ret = if sig.has_return() { convert(result, &sig.ret)? } else { HostValue::Null };
            return Ok(Dispatched { ret, by_ref: Vec::new() });
        }
        if !sig.has_return() && ref_types.len() == 1 {
            return Ok(Dispatched {
                ret: HostValue::Null,
                by_ref: vec![convert(result, &ref_types[0])?],
            });
        }

        let expected = ref_types.len() + usize::from(sig.has_return());
        if !tuple::is_tuple(result) || tuple::items(result).len() != expected {
            let actual = if tuple::is_tuple(result) {
                format!("tuple of {} item(s)", tuple::items(result).len())
            } else {
                typeobj::name(type_of(result))
            };
            return Err(BridgeError::marshal(self.expected_shape(), actual));
        }
        let items = tuple::items(result);
        let (ret, rest) = if sig.has_return() {
            (convert(items[0], &sig.ret)?, &items[1..])
        } else {
            (HostValue::Null, items)
        };
        let mut by_ref = Vec::with_capacity(ref_types.len());
        for (&item, ty) in rest.iter().zip(&ref_types) {
            by_ref.push(convert(item, ty)?);
        }
        Ok(Dispatched { ret, by_ref })
    }

    /// Every slot the result tuple must have, e.g.
    /// `tuple (return Int32, ref Int32 count)`
    fn expected_shape(&self) -> String {
        let sig = &self.ty.sig;
        let mut slots = Vec::new();
        if sig.has_return() {
            slots.push(format!("return {}", sig.ret.name()));
        }
        for i in sig.by_ref_positions() {
            let param = &sig.params[i];
            slots.push(format!("ref {} {}", param.ty.name(), param.name));
        }
        format!("tuple ({})", slots.join(", "))
    }
}

fn to_host_exception(err: BridgeError) -> HostException {
    match err {
        BridgeError::Host(exc) => exc,
        BridgeError::Foreign(foreign) => {
            let exc = HostException::general(format!("{}: {}", foreign.type_name, foreign.message));
            match foreign.traceback {
                Some(tb) => exc.with_trace(tb),
                None => exc,
            }
        }
        other => HostException::general(other.to_string()),
    }
}

/// Builds and caches dispatcher types
#[derive(Debug, Default)]
pub struct DelegateManager {
    types: DashMap<u64, Arc<DispatcherType>>,
}

impl DelegateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dispatcher types built so far
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Dispatcher type of a delegate type, built once
    pub fn dispatcher_type(&self, delegate: &HostTypeRef) -> BridgeResult<Arc<DispatcherType>> {
        if let Some(existing) = self.types.get(&delegate.id()) {
            return Ok(Arc::clone(existing.value()));
        }
        let sig = delegate.invoke_signature().cloned().ok_or_else(|| {
            BridgeError::Binding(format!("{} is not a delegate type", delegate.name()))
        })?;
        let forwarder = Forwarder::for_signature(&sig);
        logging::log_dispatcher_created(delegate.name(), &forwarder.name());
        let built = Arc::new(DispatcherType {
            delegate: Arc::clone(delegate),
            sig,
            forwarder,
        });
        Ok(Arc::clone(self.types.entry(delegate.id()).or_insert(built).value()))
    }

    /// New host delegate of type `delegate` that calls `callable`
    ///
    /// # Safety
    /// The global lock must be held; `callable` is borrowed.
    pub unsafe fn get_delegate(
        &self,
        bridge: &Bridge,
        delegate: &HostTypeRef,
        callable: ObjPtr,
    ) -> BridgeResult<Arc<HostObject>> {
        if callable.is_null() || !convert::is_callable(callable) {
            let actual = if callable.is_null() {
                String::from("NULL")
            } else {
                typeobj::name(type_of(callable))
            };
            return Err(BridgeError::Binding(format!(
                "{} needs a callable, got '{}'",
                delegate.name(),
                actual
            )));
        }
        let ty = self.dispatcher_type(delegate)?;
        let dispatcher = Arc::new(Dispatcher {
            ty: Arc::clone(&ty),
            callable: ForeignObject::from_borrowed(callable, bridge.finalizer()),
            bridge: bridge.weak(),
        });
        let body = ty.forwarder.body(Arc::clone(&dispatcher));
        Ok(HostObject::new_delegate_with_target(delegate, body, dispatcher))
    }

    pub(crate) fn clear(&self) {
        self.types.clear();
    }
}
