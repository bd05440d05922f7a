//! Error indicator - per-thread pending exception
//!
//! Design: Runtime calls report failure C-style (null / -1) and leave the
//! exception in a thread-local indicator. On the Rust side that maps to
//! `RtResult<T> = Result<T, ErrorSet>` where `ErrorSet` only says "the
//! indicator is set"; the exception itself stays in the indicator until
//! someone fetches it.

#[cfg(test)]
mod tests;

use crate::builtins::{self, exceptions};
use crate::logging::log_error_set;
use crate::object::{decref, type_of, ObjPtr};
use crate::typeobj;
use std::cell::RefCell;
use std::ffi::c_int;
use std::fmt;
use std::ptr;

/// Marker: the current thread's error indicator is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorSet;

impl fmt::Display for ErrorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "foreign error indicator set")
    }
}

impl std::error::Error for ErrorSet {}

pub type RtResult<T> = Result<T, ErrorSet>;

/// Builtin exception kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    BaseException,
    Exception,
    TypeError,
    AttributeError,
    IndexError,
    KeyError,
    ValueError,
    RuntimeError,
    SystemError,
    MemoryError,
    OverflowError,
}

impl ExcKind {
    pub const ALL: [ExcKind; 11] = [
        ExcKind::BaseException,
        ExcKind::Exception,
        ExcKind::TypeError,
        ExcKind::AttributeError,
        ExcKind::IndexError,
        ExcKind::KeyError,
        ExcKind::ValueError,
        ExcKind::RuntimeError,
        ExcKind::SystemError,
        ExcKind::MemoryError,
        ExcKind::OverflowError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::Exception => "Exception",
            ExcKind::TypeError => "TypeError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::ValueError => "ValueError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::SystemError => "SystemError",
            ExcKind::MemoryError => "MemoryError",
            ExcKind::OverflowError => "OverflowError",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Builtin type object for this kind (borrowed)
    pub fn type_object(self) -> ObjPtr {
        exceptions::type_for(self)
    }
}

/// A fetched exception: owned references to type, value and traceback
#[derive(Debug)]
pub struct ErrState {
    pub ptype: ObjPtr,
    pub pvalue: ObjPtr,
    pub ptraceback: ObjPtr,
}

impl ErrState {
    /// Name of the exception type
    pub fn type_name(&self) -> String {
        if self.ptype.is_null() {
            return String::from("?");
        }
        unsafe { typeobj::name(self.ptype) }
    }

    /// Message carried by the exception value
    pub fn message(&self) -> String {
        if self.pvalue.is_null() {
            return String::new();
        }
        unsafe { exceptions::message(self.pvalue) }.unwrap_or_default()
    }

    /// Traceback text, if any
    pub fn traceback(&self) -> Option<String> {
        if !self.ptraceback.is_null() {
            if let Some(text) = unsafe { builtins::string::as_str(self.ptraceback) } {
                return Some(text.to_string());
            }
        }
        if self.pvalue.is_null() {
            return None;
        }
        unsafe { exceptions::traceback(self.pvalue) }
    }

    /// True if the exception is an instance of `kind`
    pub fn matches(&self, kind: ExcKind) -> bool {
        !self.ptype.is_null() && unsafe { typeobj::is_subtype(self.ptype, kind.type_object()) }
    }

    /// Drop the references without restoring
    ///
    /// # Safety
    /// The global lock must be held.
    pub unsafe fn release(self) {
        decref(self.ptype);
        decref(self.pvalue);
        decref(self.ptraceback);
    }
}

thread_local! {
    static INDICATOR: RefCell<Option<ErrState>> = const { RefCell::new(None) };
}

/// Take the pending exception, clearing the indicator
pub fn fetch() -> Option<ErrState> {
    INDICATOR.with(|cell| cell.borrow_mut().take())
}

/// Install `state` as the pending exception (`None` clears)
///
/// A previously pending exception is released.
pub fn restore(state: Option<ErrState>) {
    let previous = INDICATOR.with(|cell| std::mem::replace(&mut *cell.borrow_mut(), state));
    if let Some(prev) = previous {
        unsafe { prev.release() };
    }
}

/// Is an exception pending on this thread?
pub fn occurred() -> bool {
    INDICATOR.with(|cell| cell.borrow().is_some())
}

/// Type of the pending exception (borrowed, null if none)
pub fn occurred_type() -> ObjPtr {
    INDICATOR.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|s| s.ptype)
            .unwrap_or(ptr::null_mut())
    })
}

/// Discard the pending exception
pub fn clear() {
    restore(None);
}

/// Raise `exc_type(message)`
///
/// # Safety
/// `exc_type` must be an exception type; the global lock must be held.
pub unsafe fn set_string(exc_type: ObjPtr, message: &str) -> ErrorSet {
    set_with_traceback(exc_type, message, None)
}

/// Raise `exc_type(message)` carrying a traceback text
///
/// # Safety
/// `exc_type` must be an exception type; the global lock must be held.
pub unsafe fn set_with_traceback(exc_type: ObjPtr, message: &str, traceback: Option<&str>) -> ErrorSet {
    log_error_set(&typeobj::name(exc_type), message);
    match exceptions::new_instance(exc_type, message, traceback) {
        Ok(value) => {
            crate::object::incref(exc_type);
            restore(Some(ErrState {
                ptype: exc_type,
                pvalue: value,
                ptraceback: ptr::null_mut(),
            }));
        }
        // Creating the exception failed and set MemoryError already
        Err(ErrorSet) => {}
    }
    ErrorSet
}

/// Raise an existing exception instance (references are borrowed)
///
/// # Safety
/// `value` must be a live exception instance.
pub unsafe fn set_object(value: ObjPtr) -> ErrorSet {
    let tp = type_of(value);
    crate::object::incref(tp);
    crate::object::incref(value);
    restore(Some(ErrState {
        ptype: tp,
        pvalue: value,
        ptraceback: ptr::null_mut(),
    }));
    ErrorSet
}

/// Raise a builtin exception kind
pub fn raise(kind: ExcKind, message: &str) -> ErrorSet {
    unsafe { set_string(kind.type_object(), message) }
}

/// Map a C-style object result to `RtResult`
pub fn check_ptr(obj: ObjPtr) -> RtResult<ObjPtr> {
    if obj.is_null() {
        if !occurred() {
            return Err(raise(
                ExcKind::SystemError,
                "error return without exception set",
            ));
        }
        Err(ErrorSet)
    } else {
        Ok(obj)
    }
}

/// Map a C-style status to `RtResult`
pub fn check_status(rc: c_int) -> RtResult<()> {
    if rc < 0 {
        if !occurred() {
            return Err(raise(
                ExcKind::SystemError,
                "error return without exception set",
            ));
        }
        Err(ErrorSet)
    } else {
        Ok(())
    }
}

/// Map `RtResult` back to a C-style object result
pub fn ptr_or_null(result: RtResult<ObjPtr>) -> ObjPtr {
    result.unwrap_or(ptr::null_mut())
}

/// Map `RtResult` back to a C-style status
pub fn status(result: RtResult<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(ErrorSet) => -1,
    }
}
