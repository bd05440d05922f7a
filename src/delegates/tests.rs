use super::*;
use crate::host::{self, HostType, Param};
use crate::test_support::{bridge, runtime};
use hostbridge_runtime::builtins::{function, numbers};
use hostbridge_runtime::errors::{self, ExcKind};
use hostbridge_runtime::RtResult;

fn counter_type() -> HostTypeRef {
    let int = host::int32_type();
    HostType::delegate(
        "Counter",
        Signature::new(vec![Param::new("a", int.clone()), Param::by_ref("count", int.clone())], int),
    )
    .build()
}

fn int_arg(args: &[ObjPtr], i: usize) -> i64 {
    unsafe { numbers::as_i64(args[i]).unwrap_or(0) }
}

fn closure<F>(name: &str, f: F) -> ObjPtr
where
    F: Fn(&[ObjPtr]) -> RtResult<ObjPtr> + Send + Sync + 'static,
{
    unsafe { function::new_closure(name, f).unwrap() }
}

#[test]
fn test_dispatcher_type_is_built_once_per_delegate() {
    let manager = DelegateManager::new();
    let ty = counter_type();
    let a = manager.dispatcher_type(&ty).unwrap();
    let b = manager.dispatcher_type(&ty).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(manager.len(), 1);
    assert_eq!(a.forwarder(), &Forwarder::ByRef(SmallVec::from_slice(&[1])));

    let plain = HostType::class("NotADelegate").build();
    assert!(matches!(manager.dispatcher_type(&plain), Err(BridgeError::Binding(_))));
    assert_eq!(manager.len(), 1);
}

#[test]
fn test_non_callable_is_refused() {
    let _gil = runtime();
    let bridge = bridge();
    unsafe {
        let number = numbers::int_new(3).unwrap();
        let err = bridge
            .delegates()
            .get_delegate(&bridge, &counter_type(), number)
            .unwrap_err();
        assert!(err.to_string().contains("needs a callable"));
        decref(number);
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_by_ref_results_are_written_back() {
    let _gil = runtime();
    let bridge = bridge();
    let func = closure("count_up", |args| unsafe {
        let doubled = numbers::int_new(int_arg(args, 0) * 2)?;
        let next = numbers::int_new(int_arg(args, 1) + 1)?;
        tuple::new(vec![doubled, next])
    });
    let delegate = unsafe { bridge.delegates().get_delegate(&bridge, &counter_type(), func).unwrap() };
    unsafe { decref(func) };

    let mut args = vec![HostValue::Int(21), HostValue::Int(4)];
    let ret = delegate.invoke(&mut args).unwrap();
    assert_eq!(ret, HostValue::Int(42));
    assert_eq!(args[1], HostValue::Int(5));
    assert_eq!(args[0], HostValue::Int(21));
    bridge.shutdown().unwrap();
}

#[test]
fn test_single_by_ref_of_void_takes_the_bare_result() {
    let _gil = runtime();
    let bridge = bridge();
    let int = host::int32_type();
    let ty = HostType::delegate(
        "Bump",
        Signature::new(vec![Param::by_ref("value", int)], host::void_type()),
    )
    .build();
    let func = closure("bump", |args| unsafe { numbers::int_new(int_arg(args, 0) + 10) });
    let delegate = unsafe { bridge.delegates().get_delegate(&bridge, &ty, func).unwrap() };
    unsafe { decref(func) };

    let mut args = vec![HostValue::Int(1)];
    assert_eq!(delegate.invoke(&mut args).unwrap(), HostValue::Null);
    assert_eq!(args[0], HostValue::Int(11));
    bridge.shutdown().unwrap();
}

#[test]
fn test_tuple_mismatch_names_every_slot() {
    let _gil = runtime();
    let bridge = bridge();
    let func = closure("wrong_shape", |_| unsafe { numbers::int_new(0) });
    let delegate = unsafe { bridge.delegates().get_delegate(&bridge, &counter_type(), func).unwrap() };
    unsafe { decref(func) };

    let mut args = vec![HostValue::Int(1), HostValue::Int(2)];
    let err = delegate.invoke(&mut args).unwrap_err();
    assert!(
        err.message.contains("tuple (return Int32, ref Int32 count)"),
        "{}",
        err.message
    );
    assert_eq!(args[1], HostValue::Int(2));
    assert!(!errors::occurred());
    bridge.shutdown().unwrap();
}

#[test]
fn test_foreign_exception_keeps_its_traceback() {
    let _gil = runtime();
    let bridge = bridge();
    let func = closure("explode", |_| unsafe {
        Err(errors::set_with_traceback(
            ExcKind::ValueError.type_object(),
            "bad input",
            Some("  in explode"),
        ))
    });
    let delegate = unsafe { bridge.delegates().get_delegate(&bridge, &counter_type(), func).unwrap() };
    unsafe { decref(func) };

    let mut args = vec![HostValue::Int(1), HostValue::Int(2)];
    let err = delegate.invoke(&mut args).unwrap_err();
    assert_eq!(err.message, "ValueError: bad input");
    assert_eq!(err.trace.as_deref(), Some("  in explode"));
    assert!(!errors::occurred());
    bridge.shutdown().unwrap();
}

#[test]
fn test_wrong_arity_fails_before_the_call() {
    let _gil = runtime();
    let bridge = bridge();
    let func = closure("never", |_| Err(errors::raise(ExcKind::RuntimeError, "called")));
    let delegate = unsafe { bridge.delegates().get_delegate(&bridge, &counter_type(), func).unwrap() };
    unsafe { decref(func) };

    let mut args = vec![HostValue::Int(1)];
    let err = delegate.invoke(&mut args).unwrap_err();
    assert!(err.message.contains("takes 2 argument(s), 1 given"), "{}", err.message);
    bridge.shutdown().unwrap();
}
