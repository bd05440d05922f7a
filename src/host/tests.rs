use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn int_sig(ret: HostTypeRef) -> Signature {
    Signature::new(vec![Param::new("x", int32_type())], ret)
}

#[test]
fn test_well_known_types_are_shared() {
    assert!(object_type().same(&object_type()));
    assert_eq!(int32_type().code(), TypeCode::Int32);
    assert_eq!(string_type().full_name(), "System.String");
    assert!(string_type().attributes().contains(TypeAttributes::SEALED));
    assert!(exception_type().is_exception());
}

#[test]
fn test_chain_and_assignability() {
    let animal = HostType::class("Animal").build();
    let dog = HostType::class("Dog").base(animal.clone()).build();
    let names: Vec<&str> = dog.chain().map(|t| t.name()).collect();
    assert_eq!(names, ["Dog", "Animal", "Object"]);
    assert!(dog.is_assignable_to(&animal));
    assert!(dog.is_assignable_to(&object_type()));
    assert!(!animal.is_assignable_to(&dog));
}

#[test]
fn test_interfaces_are_flattened() {
    let parent = HostType::interface("IParent").build();
    let child = HostType::interface("IChild").implements(parent.clone()).build();
    let impl_ty = HostType::class("Impl").implements(child.clone()).build();
    let all: Vec<String> = impl_ty
        .all_interfaces()
        .iter()
        .map(|i| i.name().to_string())
        .collect();
    assert_eq!(all.len(), 2);
    assert!(all.contains(&"IParent".to_string()));
    assert!(impl_ty.is_assignable_to(&parent));
}

#[test]
fn test_members_record_declaring_type() {
    let ty = HostType::class("Calc")
        .member(HostMember::method("Twice", int_sig(int32_type()), |_, args| {
            Ok(HostValue::Int(args[0].as_int().unwrap_or(0) * 2))
        }))
        .member(HostMember::method("Twice", Signature::new(Vec::new(), int32_type()), |_, _| {
            Ok(HostValue::Int(0))
        }))
        .build();
    let twice = ty.members_named("Twice");
    assert_eq!(twice.len(), 2);
    assert!(twice[0].declaring_type().unwrap().same(&ty));
    assert!(!twice[0]
        .method_info()
        .unwrap()
        .sig
        .same_shape(&twice[1].method_info().unwrap().sig));
}

#[test]
fn test_signature_describe() {
    let sig = Signature::new(
        vec![Param::new("a", int32_type()), Param::by_ref("b", float64_type())],
        boolean_type(),
    );
    assert_eq!(sig.describe("Try"), "Try(Int32 a, ref Double b) -> Boolean");
    assert_eq!(sig.by_ref_positions(), vec![1]);
    assert!(!Signature::action().has_return());
}

#[test]
fn test_generic_instances_are_memoized() {
    let boxed = HostType::generic_definition("Box", &["T"], |_, args| {
        HostType::class("Box").member(auto_property("Value", args[0].clone()))
    });
    let of_int = boxed.make_generic(&[int32_type()]).unwrap();
    let of_int_again = boxed.make_generic(&[int32_type()]).unwrap();
    let of_str = boxed.make_generic(&[string_type()]).unwrap();
    assert!(of_int.same(&of_int_again));
    assert!(!of_int.same(&of_str));
    assert_eq!(of_int.name(), "Box[Int32]");
    assert!(of_int.generic_definition_of().unwrap().same(&boxed));
    assert!(boxed.make_generic(&[]).is_err());
    assert!(of_int.make_generic(&[int32_type()]).is_err());
}

#[test]
fn test_array_storage_indexing() {
    let grid = HostObject::new_array(&int32_type(), &[2, 3]);
    let storage = grid.array().unwrap();
    assert_eq!(storage.rank(), 2);
    assert_eq!(storage.len(), 6);
    assert_eq!(storage.flat_index(&[1, 2]), Some(5));
    assert_eq!(storage.flat_index(&[-1, 0]), Some(3));
    assert_eq!(storage.flat_index(&[2, 0]), None);
    storage.set(5, HostValue::Int(9)).unwrap();
    assert_eq!(storage.get(5), Some(HostValue::Int(9)));
    assert!(storage.set(0, HostValue::Int(i64::MAX)).is_err());
    assert_eq!(grid.host_type().name(), "Int32[,]");
    assert!(HostType::array_of(&int32_type(), 2).same(grid.host_type()));
}

#[test]
fn test_auto_property_round_trip() {
    let ty = HostType::class("Holder")
        .member(auto_property("Name", string_type()))
        .build();
    let obj = HostObject::new(&ty);
    let member = &ty.members_named("Name")[0];
    let MemberKind::Property(info) = &member.kind else {
        panic!("expected a property");
    };
    let setter = info.setter.as_ref().unwrap();
    let MethodBody::Native(set) = &setter.body else {
        panic!("expected a native setter");
    };
    set(Some(&obj), &mut [HostValue::from("x")]).unwrap();
    let getter = info.getter.as_ref().unwrap();
    let MethodBody::Native(get) = &getter.body else {
        panic!("expected a native getter");
    };
    assert_eq!(get(Some(&obj), &mut []).unwrap(), HostValue::from("x"));
}

#[test]
fn test_events_dispatch_in_order() {
    let handler_ty = HostType::delegate("Handler", Signature::action()).build();
    let source_ty = HostType::class("Source").build();
    let source = HostObject::new(&source_ty);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let first = HostObject::new_delegate(
        &handler_ty,
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HostValue::Null)
        }),
    );
    source.add_handler("Changed", HostValue::Object(first.clone()));
    source.add_handler("Changed", HostValue::Object(first.clone()));
    assert_eq!(source.handler_count("Changed"), 2);
    source.raise_event("Changed", &[]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(source.remove_handler("Changed", &HostValue::Object(first)));
    assert_eq!(source.handler_count("Changed"), 1);
    assert!(!source.remove_handler("Other", &HostValue::Null));
}

#[test]
fn test_exception_members() {
    let err = HostException::general("bad").with_trace("at Main");
    let obj = err.to_object();
    let data = obj.exception_data().unwrap();
    assert_eq!(data.message, "bad");
    assert_eq!(data.trace.as_deref(), Some("at Main"));
    assert_eq!(err.to_string(), "Exception: bad");
    assert!(!exception_type().members_named("Message").is_empty());
}

#[test]
fn test_exception_constructor_returns_void() {
    let ctors = exception_type().members_named(".ctor");
    assert_eq!(ctors.len(), 1);
    let info = ctors[0].method_info().unwrap();
    assert!(!info.sig.has_return());
    assert!(info.sig.ret.same(&void_type()));
}
