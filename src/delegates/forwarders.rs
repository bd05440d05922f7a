//! Forwarding bodies for host delegates backed by foreign callables
//!
//! A forwarder does no conversion. It packs the host arguments into one
//! uniform list, hands that to [`Dispatcher::dispatch`] and writes by-ref
//! results back into the caller's argument slots. Small arities pack into
//! inline storage; anything else takes the generic path.

use super::{Dispatched, Dispatcher};
use crate::host::{DelegateFn, HostException, HostValue, Signature};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Largest arity served by the inline templates
pub const MAX_FIXED_ARITY: usize = 4;

type Packed = SmallVec<[HostValue; MAX_FIXED_ARITY]>;

/// Forwarding shape picked per delegate signature
#[derive(Clone, PartialEq, Eq)]
pub enum Forwarder {
    /// No by-ref parameters, up to [`MAX_FIXED_ARITY`] arguments
    Fixed(usize),
    /// By-ref parameters at these positions, up to [`MAX_FIXED_ARITY`]
    /// arguments
    ByRef(SmallVec<[usize; MAX_FIXED_ARITY]>),
    /// Any arity, any by-ref shape
    Dynamic { arity: usize, by_ref: Vec<usize> },
}

impl fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Forwarder {
    pub fn for_signature(sig: &Signature) -> Self {
        let arity = sig.arity();
        let by_ref = sig.by_ref_positions();
        if arity > MAX_FIXED_ARITY {
            Forwarder::Dynamic { arity, by_ref }
        } else if by_ref.is_empty() {
            Forwarder::Fixed(arity)
        } else {
            Forwarder::ByRef(by_ref.into_iter().collect())
        }
    }

    pub fn name(&self) -> String {
        match self {
            Forwarder::Fixed(n) => format!("fixed{}", n),
            Forwarder::ByRef(positions) => format!("byref{:?}", positions.as_slice()),
            Forwarder::Dynamic { arity, .. } => format!("dynamic{}", arity),
        }
    }

    pub fn arity(&self, sig: &Signature) -> usize {
        match self {
            Forwarder::Fixed(n) => *n,
            Forwarder::ByRef(_) => sig.arity(),
            Forwarder::Dynamic { arity, .. } => *arity,
        }
    }

    /// Delegate body forwarding to `dispatcher`
    pub fn body(&self, dispatcher: Arc<Dispatcher>) -> DelegateFn {
        match self.clone() {
            Forwarder::Fixed(n) => Arc::new(move |args: &mut [HostValue]| {
                check_arity(&dispatcher, n, args.len())?;
                let packed: Packed = args.iter().cloned().collect();
                Ok(dispatcher.dispatch(&packed)?.ret)
            }),
            Forwarder::ByRef(positions) => Arc::new(move |args: &mut [HostValue]| {
                check_arity(&dispatcher, dispatcher.signature().arity(), args.len())?;
                let packed: Packed = args.iter().cloned().collect();
                let result = dispatcher.dispatch(&packed)?;
                Ok(write_back(args, &positions, result))
            }),
            Forwarder::Dynamic { arity, by_ref } => Arc::new(move |args: &mut [HostValue]| {
                check_arity(&dispatcher, arity, args.len())?;
                let packed: Vec<HostValue> = args.to_vec();
                let result = dispatcher.dispatch(&packed)?;
                Ok(write_back(args, &by_ref, result))
            }),
        }
    }
}

fn check_arity(dispatcher: &Dispatcher, expected: usize, given: usize) -> Result<(), HostException> {
    if expected == given {
        return Ok(());
    }
    Err(HostException::argument(format!(
        "{} takes {} argument(s), {} given",
        dispatcher.delegate_type().name(),
        expected,
        given
    )))
}

fn write_back(args: &mut [HostValue], positions: &[usize], result: Dispatched) -> HostValue {
    for (&pos, value) in positions.iter().zip(result.by_ref) {
        if let Some(slot) = args.get_mut(pos) {
            *slot = value;
        }
    }
    result.ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{self, Param};

    fn sig(params: Vec<Param>) -> Signature {
        Signature::new(params, host::void_type())
    }

    #[test]
    fn test_shape_selection() {
        let int = host::int32_type();
        assert_eq!(Forwarder::for_signature(&Signature::action()), Forwarder::Fixed(0));
        assert_eq!(
            Forwarder::for_signature(&sig(vec![Param::new("a", int.clone()), Param::by_ref("b", int.clone())])),
            Forwarder::ByRef(SmallVec::from_slice(&[1]))
        );
        let wide: Vec<Param> = (0..6).map(|i| Param::new(&format!("p{}", i), int.clone())).collect();
        assert!(matches!(
            Forwarder::for_signature(&sig(wide)),
            Forwarder::Dynamic { arity: 6, .. }
        ));
    }

    #[test]
    fn test_write_back_follows_positions() {
        let mut args = vec![HostValue::Int(1), HostValue::Int(2), HostValue::Int(3)];
        let ret = write_back(
            &mut args,
            &[0, 2],
            Dispatched {
                ret: HostValue::Bool(true),
                by_ref: vec![HostValue::Int(10), HostValue::Int(30)],
            },
        );
        assert_eq!(ret, HostValue::Bool(true));
        assert_eq!(args, vec![HostValue::Int(10), HostValue::Int(2), HostValue::Int(30)]);
    }
}
