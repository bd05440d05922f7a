use super::*;
use crate::binder::Overload;
use crate::host::{HostMember, HostType, HostValue, Param, Signature};
use crate::operators;

fn level_names(desc: &ClassDescriptor) -> Vec<&'static str> {
    desc.slot_levels().iter().map(|l| l.name).collect()
}

#[test]
fn test_variant_priority() {
    let int = host::int32_type();
    assert_eq!(Variant::for_type(&HostType::class("Plain").build()), Variant::Class);
    assert_eq!(Variant::for_type(&HostType::array_of(&int, 1)), Variant::Array);
    assert_eq!(
        Variant::for_type(&HostType::delegate("Handler", Signature::action()).build()),
        Variant::Delegate
    );
    assert_eq!(Variant::for_type(&HostType::interface("IShape").build()), Variant::Interface);
    let error = HostType::class("ParseError").base(host::exception_type()).build();
    assert_eq!(Variant::for_type(&error), Variant::Exception);
    let peer = HostType::class("Widget").with_peer_field().build();
    assert_eq!(Variant::for_type(&peer), Variant::Derived);
    let boxed = HostType::generic_definition("Box", &["T"], |_, _| HostType::class("Box"));
    assert_eq!(Variant::for_type(&boxed), Variant::GenericDefinition);
}

#[test]
fn test_exception_with_peer_field_stays_exception() {
    let ty = HostType::class("Fault")
        .base(host::exception_type())
        .with_peer_field()
        .build();
    assert_eq!(Variant::for_type(&ty), Variant::Exception);
}

#[test]
fn test_sealed_types() {
    let open = ClassDescriptor::new(HostType::class("Open").build(), Weak::new());
    assert!(!open.is_sealed());
    let sealed = ClassDescriptor::new(HostType::class("Closed").sealed().build(), Weak::new());
    assert!(sealed.is_sealed());
    let value = ClassDescriptor::new(HostType::structure("Pair").build(), Weak::new());
    assert!(value.is_sealed());
    let array = ClassDescriptor::new(HostType::array_of(&host::float64_type(), 2), Weak::new());
    assert!(array.is_sealed());
}

#[test]
fn test_generated_doc_lists_constructors() {
    let ty = HostType::class("Point").namespace("Geometry").build();
    let desc = ClassDescriptor::new(ty.clone(), Weak::new());
    assert_eq!(desc.doc(), "class Geometry.Point");

    let ctor = HostMember::constructor(
        vec![
            Param::new("x", host::int32_type()),
            Param::new("y", host::int32_type()),
        ],
        |_| Ok(HostValue::Null),
    );
    let mut ctors = MethodSet::new("Point");
    ctors.push(Overload {
        name: String::from("Point"),
        info: ctor.method_info().cloned().unwrap(),
        is_static: false,
        is_ctor: true,
        declaring: ty,
    });
    desc.set_ctors(ctors);
    let doc = desc.doc();
    assert!(doc.starts_with("class Geometry.Point\n\n"));
    assert!(doc.contains("Point("));
}

#[test]
fn test_host_doc_wins() {
    let ty = HostType::class("Documented").doc("A documented type").build();
    let desc = ClassDescriptor::new(ty, Weak::new());
    assert_eq!(desc.doc(), "A documented type");
}

#[test]
fn test_slot_levels_put_variant_first_and_class_last() {
    let plain = ClassDescriptor::new(HostType::class("Plain").build(), Weak::new());
    assert_eq!(level_names(&plain), ["class"]);

    let array = ClassDescriptor::new(HostType::array_of(&host::int32_type(), 1), Weak::new());
    assert_eq!(level_names(&array), ["array", "class"]);

    let peer = ClassDescriptor::new(HostType::class("Widget").with_peer_field().build(), Weak::new());
    assert_eq!(level_names(&peer), ["derived", "class"]);
    let sized = HostType::class("Sized")
        .member(HostMember::property(
            "Count",
            crate::host::PropertyInfo {
                ty: host::int32_type(),
                getter: Some(crate::host::MethodInfo::native(
                    Signature::new(Vec::new(), host::int32_type()),
                    |_, _| Ok(HostValue::Int(0)),
                )),
                setter: None,
                index_params: Vec::new(),
            },
        ))
        .build();
    let sized = ClassDescriptor::new(sized, Weak::new());
    assert_eq!(level_names(&sized), ["length", "class"]);
}

#[test]
fn test_slot_levels_include_indexer_and_operators() {
    let ty = HostType::class("Money").build();
    let add = HostMember::operator(
        "op_Addition",
        Signature::new(
            vec![Param::new("a", ty.clone()), Param::new("b", ty.clone())],
            ty.clone(),
        ),
        |args| Ok(args[0].clone()),
    );
    let mut set = MethodSet::new("op_Addition");
    set.push(Overload {
        name: String::from("op_Addition"),
        info: add.method_info().cloned().unwrap(),
        is_static: true,
        is_ctor: false,
        declaring: ty.clone(),
    });
    let mut table = OperatorTable::default();
    table.add(operators::lookup("op_Addition").unwrap(), &set, &ty);

    let desc = ClassDescriptor::new(ty.clone(), Weak::new());
    desc.set_operators(table);
    assert_eq!(level_names(&desc), ["op_add", "class"]);

    let getter = crate::host::MethodInfo::native(
        Signature::new(vec![Param::new("i", host::int32_type())], host::int32_type()),
        |_, _| Ok(HostValue::Int(0)),
    );
    let mut indexer = Indexer::new();
    indexer.add(
        &crate::host::PropertyInfo {
            ty: host::int32_type(),
            getter: Some(getter),
            setter: None,
            index_params: vec![Param::new("i", host::int32_type())],
        },
        crate::host::MemberFlags::empty(),
        &ty,
    );
    desc.set_indexer(Some(indexer));
    assert_eq!(level_names(&desc), ["indexer", "op_add", "class"]);
}

#[test]
fn test_empty_indexer_is_not_kept() {
    let desc = ClassDescriptor::new(HostType::class("Plain").build(), Weak::new());
    desc.set_indexer(Some(Indexer::new()));
    assert!(desc.indexer().is_none());
}

#[test]
fn test_descriptor_without_bridge_reports_not_running() {
    let desc = ClassDescriptor::new(HostType::class("Orphan").build(), Weak::new());
    assert!(matches!(desc.bridge(), Err(BridgeError::NotRunning)));
    assert!(desc.type_ptr().is_null());
}
