use hostbridge::host::{self, HostTypeRef};
use hostbridge::{
    Bridge, BridgeConfig, BridgeError, ForeignObject, HostException, HostMember, HostObject, HostType, HostValue,
    Param, Signature,
};
use hostbridge_runtime::builtins::{function, numbers, string};
use hostbridge_runtime::object::{decref, refcount};
use hostbridge_runtime::{gil, protocol};
use std::io::Write;
use std::sync::Arc;
use std::thread;

fn counter_type() -> HostTypeRef {
    let int = host::int32_type();
    HostType::class("Counter")
        .namespace("Demo")
        .member(HostMember::field("Total", int.clone()))
        .member(HostMember::method(
            "Add",
            Signature::new(vec![Param::new("amount", int.clone())], int),
            |this, args| {
                let this = this.ok_or_else(|| HostException::null_reference("Add"))?;
                let total = this.field("Total").as_int().unwrap_or(0) + args[0].as_int().unwrap_or(0);
                this.set_field("Total", HostValue::Int(total));
                Ok(HostValue::Int(total))
            },
        ))
        .build()
}

#[test]
fn test_host_method_called_from_foreign_code() {
    let bridge = Bridge::start().unwrap();
    let ty = counter_type();
    let counter = HostObject::new(&ty);
    let wrapped = bridge.wrap(&counter).unwrap();

    bridge.call_method(&wrapped, "Add", &[HostValue::Int(5)]).unwrap();
    let result = bridge.call_method(&wrapped, "Add", &[HostValue::Int(7)]).unwrap();
    assert_eq!(bridge.to_host(&result, &host::int32_type()).unwrap(), HostValue::Int(12));
    assert_eq!(counter.field("Total"), HostValue::Int(12));

    let same = bridge.host_object(&wrapped).unwrap();
    assert!(Arc::ptr_eq(&same, &counter));
    bridge.shutdown().unwrap();
}

#[test]
fn test_binding_error_is_a_foreign_type_error() {
    let bridge = Bridge::start().unwrap();
    let counter = HostObject::new(&counter_type());
    let wrapped = bridge.wrap(&counter).unwrap();

    let err = bridge
        .call_method(&wrapped, "Add", &[HostValue::Str(String::from("seven"))])
        .unwrap_err();
    match err {
        BridgeError::Foreign(foreign) => assert_eq!(foreign.type_name, "TypeError"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(counter.field("Total"), HostValue::Null);
    bridge.shutdown().unwrap();
}

#[test]
fn test_exported_type_is_importable() {
    let ty = counter_type();
    let bridge = Bridge::builder().export(ty.clone()).start().unwrap();
    assert!(bridge.exported("Counter").is_some());

    let imported = bridge.import("Counter").unwrap();
    let class = bridge.class_of(&ty).unwrap();
    assert_eq!(imported.addr(), class.addr());
    assert!(bridge.import("Missing").is_err());
    bridge.shutdown().unwrap();
}

#[test]
fn test_host_exception_reaches_foreign_code_with_trace() {
    let bridge = Bridge::start().unwrap();
    let parse_error = HostType::class("ParseError").base(host::exception_type()).build();
    let exc = HostException::new(parse_error, "bad token").with_trace("   at Lexer.Next()");

    assert!(matches!(bridge.raise_host_exception(&exc), BridgeError::Pending));
    match BridgeError::fetch_foreign() {
        BridgeError::Foreign(foreign) => {
            assert_eq!(foreign.type_name, "ParseError");
            assert_eq!(foreign.message, "bad token");
            assert_eq!(foreign.traceback.as_deref(), Some("   at Lexer.Next()"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_exception_str_shows_message_then_trace() {
    let bridge = Bridge::start().unwrap();
    let parse_error = HostType::class("ParseError").base(host::exception_type()).build();
    let obj = HostObject::new_exception(&parse_error, "bad token", Some("   at Lexer.Next()"));
    let wrapped = bridge.wrap(&obj).unwrap();
    let text = {
        let _gil = gil::acquire();
        unsafe { protocol::str_string(wrapped.as_ptr()).unwrap() }
    };
    assert_eq!(text, "bad token\n   at Lexer.Next()");
    bridge.shutdown().unwrap();
}

#[test]
fn test_foreign_callable_becomes_host_delegate() {
    let bridge = Bridge::start().unwrap();
    let int = host::int32_type();
    let delegate_type = HostType::delegate(
        "Combine",
        Signature::new(vec![Param::new("a", int.clone()), Param::new("b", int.clone())], int),
    )
    .build();
    let callable = {
        let _gil = gil::acquire();
        unsafe {
            let func = function::new_closure("combine", |args| {
                let a = numbers::as_i64(args[0]).unwrap_or(0);
                let b = numbers::as_i64(args[1]).unwrap_or(0);
                numbers::int_new(a * 10 + b)
            })
            .unwrap();
            ForeignObject::from_owned(func, bridge.finalizer())
        }
    };

    let value = bridge.to_host(&callable, &delegate_type).unwrap();
    let delegate = value.as_object().unwrap().clone();
    assert!(delegate.is_delegate());
    let mut args = vec![HostValue::Int(4), HostValue::Int(2)];
    assert_eq!(delegate.invoke(&mut args).unwrap(), HostValue::Int(42));
    assert_eq!(bridge.delegates().len(), 1);

    // The delegate goes back across as the original callable
    let back = bridge.to_foreign(&value).unwrap();
    assert_eq!(back.addr(), callable.addr());
    bridge.shutdown().unwrap();
}

#[test]
fn test_release_from_another_thread_is_deferred() {
    let bridge = Bridge::start().unwrap();
    let (raw, wrapper) = {
        let _gil = gil::acquire();
        unsafe {
            let raw = string::new("payload").unwrap();
            (raw, ForeignObject::from_borrowed(raw, bridge.finalizer()))
        }
    };

    thread::spawn(move || drop(wrapper)).join().unwrap();
    assert_eq!(bridge.finalizer().pending().0, 1);

    assert_eq!(bridge.collect().unwrap(), 1);
    assert_eq!(bridge.finalizer().pending().0, 0);
    {
        let _gil = gil::acquire();
        unsafe {
            assert_eq!(refcount(raw), 1);
            decref(raw);
        }
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_threshold_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[finalizer]\nthreshold = 3\n").unwrap();
    let config = BridgeConfig::load(file.path()).unwrap();
    assert_eq!(config.finalizer.threshold, 3);

    let bridge = hostbridge::BridgeBuilder::new(config).start().unwrap();
    let before = bridge.finalizer().stats().drains;
    assert_eq!(bridge.throttled_collect().unwrap(), 0);
    assert_eq!(bridge.throttled_collect().unwrap(), 0);
    bridge.throttled_collect().unwrap();
    assert_eq!(bridge.finalizer().stats().drains, before + 1);
    bridge.shutdown().unwrap();
}
