use super::*;
use crate::host::{self, Access, HostMember, HostObject, HostType, HostValue, MethodInfo, Param, PropertyInfo, Signature};
use crate::members::{self, MethodObject};
use crate::test_support::{bridge, runtime};
use hostbridge_runtime::builtins::{dict, numbers};
use hostbridge_runtime::{protocol, typeobj};

fn method(name: &str, param: host::HostTypeRef) -> HostMember {
    HostMember::method(name, Signature::new(vec![Param::new("x", param)], host::void_type()), |_, _| {
        Ok(HostValue::Null)
    })
}

unsafe fn own_entry(tp: ObjPtr, name: &str) -> ObjPtr {
    dict::get_item_str(typeobj::type_dict(tp), name)
}

#[test]
fn test_get_or_create_is_idempotent() {
    let _gil = runtime();
    let bridge = bridge();
    let base = HostType::class("Shape").build();
    let ty = HostType::class("Circle").base(base.clone()).build();
    let first = bridge.class_of(&ty).unwrap();
    let second = bridge.class_of(&ty).unwrap();
    assert_eq!(first.addr(), second.addr());
    assert!(bridge.classes().lookup(&base).is_some());
    unsafe {
        let base_tp = bridge.classes().lookup(&base).unwrap().type_ptr();
        assert!(typeobj::is_subtype(first.as_ptr(), base_tp));
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_overloads_merge_along_the_chain() {
    let _gil = runtime();
    let bridge = bridge();
    let base = HostType::class("Printer")
        .member(method("f", host::int32_type()))
        .member(method("f", host::string_type()))
        .build();
    let derived = HostType::class("FancyPrinter")
        .base(base)
        .member(method("f", host::boolean_type()))
        .build();
    let cls = bridge.class_of(&derived).unwrap();
    unsafe {
        let entry = own_entry(cls.as_ptr(), "f");
        assert!(!entry.is_null());
        let target = members::target_of::<MethodObject>(entry).unwrap();
        assert_eq!(target.set().len(), 3);
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_interface_members_are_flattened() {
    let _gil = runtime();
    let bridge = bridge();
    let readable = HostType::interface("IReadable")
        .member(method("Read", host::int32_type()))
        .build();
    let stream = HostType::interface("IStream")
        .implements(readable)
        .member(method("Seek", host::int64_type()))
        .build();
    let cls = bridge.class_of(&stream).unwrap();
    unsafe {
        for name in ["Seek", "Read", "ToString"] {
            assert!(!own_entry(cls.as_ptr(), name).is_null(), "{} missing", name);
        }
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_hidden_members_are_omitted() {
    let _gil = runtime();
    let bridge = bridge();
    let ty = HostType::class("Vault")
        .member(method("Open", host::int32_type()))
        .member(method("Secret", host::int32_type()).security_denied())
        .member(method("Hidden", host::int32_type()).with_access(Access::Private))
        .build();
    let cls = bridge.class_of(&ty).unwrap();
    unsafe {
        assert!(!own_entry(cls.as_ptr(), "Open").is_null());
        assert!(own_entry(cls.as_ptr(), "Secret").is_null());
        assert!(own_entry(cls.as_ptr(), "Hidden").is_null());
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_constructor_and_indexer() {
    let _gil = runtime();
    let bridge = bridge();
    let int = host::int32_type();
    let point = HostType::class("Point")
        .member(HostMember::field("X", int.clone()))
        .member(HostMember::field("Y", int.clone()))
        .member(HostMember::property(
            "Item",
            PropertyInfo {
                ty: int.clone(),
                getter: Some(MethodInfo::native(
                    Signature::new(vec![Param::new("i", int.clone())], int.clone()),
                    |this, args| {
                        let this = this.ok_or_else(|| host::HostException::null_reference("Item"))?;
                        match args[0].as_int() {
                            Some(0) => Ok(this.field("X")),
                            Some(1) => Ok(this.field("Y")),
                            _ => Err(host::HostException::argument("index out of range")),
                        }
                    },
                )),
                setter: None,
                index_params: vec![Param::new("i", int.clone())],
            },
        ))
        .build();
    let weak = Arc::downgrade(&point);
    point.add_member(HostMember::constructor(
        vec![Param::new("x", int.clone()), Param::new("y", int.clone())],
        move |args| {
            let ty = weak.upgrade().ok_or_else(|| host::HostException::general("type dropped"))?;
            let obj = HostObject::new(&ty);
            obj.set_field("X", args[0].clone());
            obj.set_field("Y", args[1].clone());
            Ok(HostValue::Object(obj))
        },
    ));

    let cls = bridge.class_of(&point).unwrap();
    let instance = bridge.call(&cls, &[HostValue::Int(1), HostValue::Int(2)]).unwrap();
    unsafe {
        let key = numbers::int_new(0).unwrap();
        let item = protocol::getitem(instance.as_ptr(), key).unwrap();
        assert_eq!(numbers::as_i64(item), Some(1));
        decref(item);
        decref(key);
    }
    let host_obj = bridge.host_object(&instance).unwrap();
    assert_eq!(host_obj.field("Y"), HostValue::Int(2));
    bridge.shutdown().unwrap();
}

#[test]
fn test_closed_generics_are_distinct_and_stable() {
    let _gil = runtime();
    let bridge = bridge();
    let boxed = HostType::generic_definition("Box", &["T"], |_, args| {
        HostType::class(&format!("Box[{}]", args[0].name()))
    });
    let def = bridge.class_of(&boxed).unwrap();
    unsafe {
        let of_int = protocol::getitem(def.as_ptr(), builtins::int_type()).unwrap();
        let again = protocol::getitem(def.as_ptr(), builtins::int_type()).unwrap();
        let of_str = protocol::getitem(def.as_ptr(), builtins::str_type()).unwrap();
        assert_eq!(of_int, again);
        assert_ne!(of_int, of_str);
        for tp in [of_int, again, of_str] {
            decref(tp);
        }
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_exception_roots_derive_from_the_foreign_exception() {
    let _gil = runtime();
    let bridge = bridge();
    let ty = HostType::class("ParseError").base(host::exception_type()).build();
    let cls = bridge.class_of(&ty).unwrap();
    unsafe {
        assert!(typeobj::is_subtype(cls.as_ptr(), ExcKind::Exception.type_object()));
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_failed_type_is_not_cached() {
    let _gil = runtime();
    let bridge = crate::bridge::Bridge::builder()
        .base_type_provider(Arc::new(|_, _| Vec::new()))
        .start()
        .unwrap();
    let ty = HostType::class("Unbuildable").build();
    let err = bridge.class_of(&ty).unwrap_err();
    assert!(matches!(err, BridgeError::Construction { .. }));
    assert!(bridge.classes().lookup(&ty).is_none());
    bridge.shutdown().unwrap();
}

#[test]
fn test_concurrent_first_lookups_build_one_type() {
    let bridge = bridge();
    let ty = HostType::class("Contended").build();
    let addrs: Vec<usize> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| bridge.class_of(&ty).unwrap().addr()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    assert!(addrs.windows(2).all(|pair| pair[0] == pair[1]));
    let cached = bridge.classes().lookup(&ty).unwrap();
    assert_eq!(cached.type_ptr() as usize, addrs[0]);
    bridge.shutdown().unwrap();
}

fn count_property(body: Option<fn(&Arc<HostObject>) -> i64>) -> HostMember {
    let int = host::int32_type();
    let sig = Signature::new(Vec::new(), int.clone());
    let getter = match body {
        Some(f) => MethodInfo::native(sig, move |this, _| {
            let this = this.ok_or_else(|| host::HostException::null_reference("Count"))?;
            Ok(HostValue::Int(f(this)))
        }),
        None => MethodInfo::abstract_(sig),
    };
    HostMember::property(
        "Count",
        PropertyInfo {
            ty: int,
            getter: Some(getter),
            setter: None,
            index_params: Vec::new(),
        },
    )
}

#[test]
fn test_count_property_gives_len() {
    let _gil = runtime();
    let bridge = bridge();
    let bag = HostType::class("Bag")
        .member(count_property(Some(|this| this.field("Size").as_int().unwrap_or(0))))
        .build();
    let obj = HostObject::new(&bag);
    obj.set_field("Size", HostValue::Int(3));
    let wrapped = bridge.wrap(&obj).unwrap();
    unsafe {
        assert_eq!(protocol::len(wrapped.as_ptr()).unwrap(), 3);
    }
    obj.set_field("Size", HostValue::Int(5));
    unsafe {
        assert_eq!(protocol::len(wrapped.as_ptr()).unwrap(), 5);
    }

    let plain = bridge.wrap(&HostObject::new(&HostType::class("NoCount").build())).unwrap();
    unsafe {
        assert!(protocol::len(plain.as_ptr()).is_err());
        hostbridge_runtime::errors::clear();
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_count_declared_on_interface_resolves_on_the_class() {
    let _gil = runtime();
    let bridge = bridge();
    let collection = HostType::interface("ISized").member(count_property(None)).build();
    let list = HostType::class("Pair")
        .implements(collection)
        .member(count_property(Some(|_| 2)))
        .build();
    let wrapped = bridge.wrap(&HostObject::new(&list)).unwrap();
    unsafe {
        assert_eq!(protocol::len(wrapped.as_ptr()).unwrap(), 2);
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_unbound_unary_minus_is_a_type_error() {
    let _gil = runtime();
    let bridge = bridge();
    let other = HostType::class("Ledger").build();
    let money = HostType::class("Money").build();
    money.add_member(HostMember::operator(
        "op_UnaryNegation",
        Signature::new(vec![Param::new("value", other.clone())], other.clone()),
        |args| Ok(args[0].clone()),
    ));
    let wrapped = bridge.wrap(&HostObject::new(&money)).unwrap();
    unsafe {
        let tp = hostbridge_runtime::object::type_of(wrapped.as_ptr());
        let negate = typeobj::slot::<typeobj::UnaryFunc>(tp, hostbridge_runtime::offsets().nb_negative).unwrap();
        assert!(negate(wrapped.as_ptr()).is_null());
        let err = hostbridge_runtime::errors::fetch().unwrap();
        assert!(err.matches(hostbridge_runtime::ExcKind::TypeError));
        assert!(err.message().contains("bad operand type for unary -"));
        err.release();
    }
    bridge.shutdown().unwrap();
}
