//! Host values and objects

use super::{HostType, HostTypeRef, TypeCode};
use crate::wrappers::{ForeignObject, PeerLink};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A value as host code sees it
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(Arc<HostObject>),
    /// Foreign object held by host code as an opaque reference
    Foreign(ForeignObject),
}

impl HostValue {
    /// Zero value of a type (null for reference types)
    pub fn default_for(ty: &HostType) -> Self {
        match ty.code() {
            TypeCode::Boolean => HostValue::Bool(false),
            TypeCode::Int32 | TypeCode::Int64 => HostValue::Int(0),
            TypeCode::Float64 => HostValue::Float(0.0),
            _ => HostValue::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            HostValue::Float(f) => Some(*f),
            HostValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<HostObject>> {
        match self {
            HostValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Name of the value's runtime type, for messages
    pub fn type_name(&self) -> String {
        match self {
            HostValue::Null => String::from("null"),
            HostValue::Bool(_) => String::from("Boolean"),
            HostValue::Int(_) => String::from("Int64"),
            HostValue::Float(_) => String::from("Double"),
            HostValue::Str(_) => String::from("String"),
            HostValue::Object(o) => o.host_type().name().to_string(),
            HostValue::Foreign(_) => String::from("foreign object"),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Null, HostValue::Null) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Str(a), HostValue::Str(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => Arc::ptr_eq(a, b),
            (HostValue::Foreign(a), HostValue::Foreign(b)) => a.addr() == b.addr(),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => f.write_str("Null"),
            HostValue::Bool(b) => write!(f, "Bool({})", b),
            HostValue::Int(i) => write!(f, "Int({})", i),
            HostValue::Float(x) => write!(f, "Float({})", x),
            HostValue::Str(s) => write!(f, "Str({:?})", s),
            HostValue::Object(o) => write!(f, "Object({})", o.host_type().name()),
            HostValue::Foreign(o) => write!(f, "Foreign({:#x})", o.addr()),
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        HostValue::Int(i)
    }
}

impl From<i32> for HostValue {
    fn from(i: i32) -> Self {
        HostValue::Int(i as i64)
    }
}

impl From<f64> for HostValue {
    fn from(x: f64) -> Self {
        HostValue::Float(x)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Str(s.to_string())
    }
}

impl From<Arc<HostObject>> for HostValue {
    fn from(o: Arc<HostObject>) -> Self {
        HostValue::Object(o)
    }
}

/// Exception thrown by host code
#[derive(Debug, Clone, Error)]
#[error("{}: {}", .ty.name(), .message)]
pub struct HostException {
    pub ty: HostTypeRef,
    pub message: String,
    pub trace: Option<String>,
}

impl HostException {
    pub fn new(ty: HostTypeRef, message: impl Into<String>) -> Self {
        Self {
            ty,
            message: message.into(),
            trace: None,
        }
    }

    /// Plain exception of the host exception root type
    pub fn general(message: impl Into<String>) -> Self {
        Self::new(super::exception_type(), message)
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::general(message)
    }

    pub fn null_reference(context: &str) -> Self {
        Self::general(format!("{}: object reference not set to an instance", context))
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    /// Host object carrying this exception
    pub fn to_object(&self) -> Arc<HostObject> {
        HostObject::new_exception(&self.ty, &self.message, self.trace.as_deref())
    }
}

/// Delegate body; by-ref arguments are updated in place
pub type DelegateFn = Arc<dyn Fn(&mut [HostValue]) -> Result<HostValue, HostException> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionData {
    pub message: String,
    pub trace: Option<String>,
}

/// Element storage of a host array, row-major
pub enum ArrayData {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Values(Vec<HostValue>),
}

impl ArrayData {
    fn len(&self) -> usize {
        match self {
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
            ArrayData::Values(v) => v.len(),
        }
    }
}

pub struct ArrayStorage {
    shape: Vec<usize>,
    data: RwLock<ArrayData>,
}

impl ArrayStorage {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major position of `indices`; negative indices count from the end
    pub fn flat_index(&self, indices: &[i64]) -> Option<usize> {
        if indices.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0usize;
        for (&i, &dim) in indices.iter().zip(&self.shape) {
            let i = if i < 0 { i + dim as i64 } else { i };
            if i < 0 || i as usize >= dim {
                return None;
            }
            flat = flat * dim + i as usize;
        }
        Some(flat)
    }

    pub fn get(&self, flat: usize) -> Option<HostValue> {
        let data = self.data.read();
        Some(match &*data {
            ArrayData::Int32(v) => HostValue::Int(*v.get(flat)? as i64),
            ArrayData::Int64(v) => HostValue::Int(*v.get(flat)?),
            ArrayData::Float64(v) => HostValue::Float(*v.get(flat)?),
            ArrayData::Values(v) => v.get(flat)?.clone(),
        })
    }

    /// Store an already converted element
    pub fn set(&self, flat: usize, value: HostValue) -> Result<(), HostException> {
        let mut data = self.data.write();
        let out_of_range = || HostException::argument(format!("index {} out of range", flat));
        match (&mut *data, value) {
            (ArrayData::Int32(v), HostValue::Int(i)) => {
                let narrowed = i32::try_from(i)
                    .map_err(|_| HostException::argument(format!("{} does not fit Int32", i)))?;
                *v.get_mut(flat).ok_or_else(out_of_range)? = narrowed;
            }
            (ArrayData::Int64(v), HostValue::Int(i)) => *v.get_mut(flat).ok_or_else(out_of_range)? = i,
            (ArrayData::Float64(v), value) => {
                let x = value
                    .as_float()
                    .ok_or_else(|| HostException::argument("array element must be a number"))?;
                *v.get_mut(flat).ok_or_else(out_of_range)? = x;
            }
            (ArrayData::Values(v), value) => *v.get_mut(flat).ok_or_else(out_of_range)? = value,
            (_, value) => {
                return Err(HostException::argument(format!(
                    "cannot store {} in this array",
                    value.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Contiguous memory of a primitive array: (address, item size, format)
    ///
    /// The storage never reallocates, so the address stays valid for the
    /// life of the array.
    pub fn raw_parts(&self) -> Option<(*mut u8, usize, &'static str)> {
        let mut data = self.data.write();
        match &mut *data {
            ArrayData::Int32(v) => Some((v.as_mut_ptr() as *mut u8, 4, "i")),
            ArrayData::Int64(v) => Some((v.as_mut_ptr() as *mut u8, 8, "q")),
            ArrayData::Float64(v) => Some((v.as_mut_ptr() as *mut u8, 8, "d")),
            ArrayData::Values(_) => None,
        }
    }
}

enum Payload {
    Plain,
    Array(ArrayStorage),
    Delegate {
        body: DelegateFn,
        target: Option<Arc<dyn Any + Send + Sync>>,
    },
    Exception(ExceptionData),
}

/// A live host object
pub struct HostObject {
    ty: HostTypeRef,
    fields: Mutex<HashMap<String, HostValue>>,
    events: Mutex<HashMap<String, Vec<HostValue>>>,
    payload: Payload,
    peer: Mutex<Option<PeerLink>>,
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("type", &self.ty.name())
            .finish()
    }
}

impl HostObject {
    fn with_payload(ty: &HostTypeRef, payload: Payload) -> Arc<Self> {
        Arc::new(Self {
            ty: Arc::clone(ty),
            fields: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            payload,
            peer: Mutex::new(None),
        })
    }

    pub fn new(ty: &HostTypeRef) -> Arc<Self> {
        Self::with_payload(ty, Payload::Plain)
    }

    /// Zero-filled array of `element` with the given shape
    pub fn new_array(element: &HostTypeRef, shape: &[usize]) -> Arc<Self> {
        let ty = HostType::array_of(element, shape.len());
        let count: usize = shape.iter().product();
        let data = match element.code() {
            TypeCode::Int32 => ArrayData::Int32(vec![0; count]),
            TypeCode::Int64 => ArrayData::Int64(vec![0; count]),
            TypeCode::Float64 => ArrayData::Float64(vec![0.0; count]),
            _ => ArrayData::Values(vec![HostValue::default_for(element); count]),
        };
        Self::with_payload(
            &ty,
            Payload::Array(ArrayStorage {
                shape: shape.to_vec(),
                data: RwLock::new(data),
            }),
        )
    }

    pub fn new_delegate(ty: &HostTypeRef, body: DelegateFn) -> Arc<Self> {
        Self::with_payload(ty, Payload::Delegate { body, target: None })
    }

    /// Delegate that remembers what it forwards to
    pub fn new_delegate_with_target(
        ty: &HostTypeRef,
        body: DelegateFn,
        target: Arc<dyn Any + Send + Sync>,
    ) -> Arc<Self> {
        Self::with_payload(
            ty,
            Payload::Delegate {
                body,
                target: Some(target),
            },
        )
    }

    pub fn new_exception(ty: &HostTypeRef, message: &str, trace: Option<&str>) -> Arc<Self> {
        Self::with_payload(
            ty,
            Payload::Exception(ExceptionData {
                message: message.to_string(),
                trace: trace.map(str::to_string),
            }),
        )
    }

    pub fn host_type(&self) -> &HostTypeRef {
        &self.ty
    }

    /// Instance field value, `Null` when never written
    pub fn field(&self, name: &str) -> HostValue {
        self.fields.lock().get(name).cloned().unwrap_or_default()
    }

    /// Instance field value, defaulted from its declared type
    pub fn field_or_default(&self, name: &str, ty: &HostType) -> HostValue {
        self.fields
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| HostValue::default_for(ty))
            .clone()
    }

    pub fn set_field(&self, name: &str, value: HostValue) {
        self.fields.lock().insert(name.to_string(), value);
    }

    pub fn array(&self) -> Option<&ArrayStorage> {
        match &self.payload {
            Payload::Array(storage) => Some(storage),
            _ => None,
        }
    }

    pub fn exception_data(&self) -> Option<&ExceptionData> {
        match &self.payload {
            Payload::Exception(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_delegate(&self) -> bool {
        matches!(self.payload, Payload::Delegate { .. })
    }

    pub fn delegate_target(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        match &self.payload {
            Payload::Delegate { target, .. } => target.as_ref(),
            _ => None,
        }
    }

    /// Invoke a delegate object
    pub fn invoke(&self, args: &mut [HostValue]) -> Result<HostValue, HostException> {
        match &self.payload {
            Payload::Delegate { body, .. } => {
                let body = Arc::clone(body);
                body(args)
            }
            _ => Err(HostException::argument(format!(
                "{} is not a delegate",
                self.ty.name()
            ))),
        }
    }

    /// Subscribe a delegate to an event
    pub fn add_handler(&self, event: &str, handler: HostValue) {
        self.events
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Unsubscribe the first matching delegate; false if it was not subscribed
    pub fn remove_handler(&self, event: &str, handler: &HostValue) -> bool {
        self.remove_handler_where(event, |h| h == handler)
    }

    /// Unsubscribe the first delegate accepted by `matches`
    pub fn remove_handler_where<F>(&self, event: &str, matches: F) -> bool
    where
        F: Fn(&HostValue) -> bool,
    {
        let mut events = self.events.lock();
        let Some(list) = events.get_mut(event) else {
            return false;
        };
        match list.iter().position(|h| matches(h)) {
            Some(i) => {
                list.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.events.lock().get(event).map(Vec::len).unwrap_or(0)
    }

    /// Invoke every handler of `event` in subscription order
    pub fn raise_event(&self, event: &str, args: &[HostValue]) -> Result<(), HostException> {
        let handlers = self.events.lock().get(event).cloned().unwrap_or_default();
        for handler in handlers {
            if let HostValue::Object(delegate) = handler {
                let mut call_args = args.to_vec();
                delegate.invoke(&mut call_args)?;
            }
        }
        Ok(())
    }

    /// Link to the foreign peer of a derived-type instance
    pub(crate) fn peer(&self) -> MutexGuard<'_, Option<PeerLink>> {
        self.peer.lock()
    }
}

impl Drop for HostObject {
    fn drop(&mut self) {
        if let Some(link) = self.peer.get_mut().take() {
            link.release();
        }
    }
}
