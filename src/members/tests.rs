use super::*;
use std::collections::HashSet;
use std::ptr;

#[test]
fn test_extension_type_names_are_distinct() {
    let names: HashSet<&str> = ExtensionKind::ALL.iter().map(|k| k.type_name()).collect();
    assert_eq!(names.len(), ExtensionKind::ALL.len());
}

#[test]
fn test_every_kind_ends_with_the_shared_deallocator() {
    for kind in ExtensionKind::ALL {
        let levels = kind.levels();
        let last = levels.last().unwrap();
        assert_eq!(last.name, "extension", "{:?}", kind);
        assert!(last.slots.iter().any(|(slot, _)| *slot == "tp_dealloc"));
    }
}

#[test]
fn test_descriptor_kinds_bind_descr_get() {
    for kind in [ExtensionKind::Method, ExtensionKind::Property, ExtensionKind::Field, ExtensionKind::Event] {
        let first = &kind.levels()[0];
        assert!(
            first.slots.iter().any(|(slot, _)| *slot == "tp_descr_get"),
            "{:?} has no tp_descr_get",
            kind
        );
    }
}

#[test]
fn test_only_data_members_bind_descr_set() {
    for kind in [ExtensionKind::Property, ExtensionKind::Field, ExtensionKind::Event] {
        assert!(kind.levels()[0].slots.iter().any(|(slot, _)| *slot == "tp_descr_set"));
    }
    assert!(!ExtensionKind::Method.levels()[0]
        .slots
        .iter()
        .any(|(slot, _)| *slot == "tp_descr_set"));
}

#[test]
fn test_null_is_not_an_extension() {
    unsafe {
        assert_eq!(kind_of(ptr::null_mut()), None);
        assert!(target_of::<MethodObject>(ptr::null_mut()).is_none());
    }
}
