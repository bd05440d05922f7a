use super::*;
use crate::interop::SlotFn;
use crate::test_support::runtime;
use hostbridge_runtime::builtins;
use std::sync::Weak;

unsafe extern "C" fn derived_repr(_obj: ObjPtr) -> ObjPtr {
    std::ptr::null_mut()
}

unsafe extern "C" fn base_repr(_obj: ObjPtr) -> ObjPtr {
    std::ptr::null_mut()
}

unsafe extern "C" fn base_str(_obj: ObjPtr) -> ObjPtr {
    std::ptr::null_mut()
}

static DERIVED_LEVEL: &[(&str, SlotFn)] = &[("tp_repr", SlotFn::Unary(derived_repr))];
static BASE_LEVEL: &[(&str, SlotFn)] = &[
    ("tp_repr", SlotFn::Unary(base_repr)),
    ("tp_str", SlotFn::Unary(base_str)),
];

fn started(module: &str) -> TypeManager {
    let types = TypeManager::new(OwnerTag::next(), module);
    unsafe { types.start().unwrap() };
    types
}

#[test]
fn test_layout_appends_missing_words_once() {
    let _gil = runtime();
    let types = started("layout_types");
    unsafe {
        let object = builtins::object_type();
        let base = typeobj::basicsize(object);
        assert_eq!(typeobj::dictoffset(object), 0);
        let first = Layout::derive(object);
        assert_eq!(first.basicsize, base + 3 * WORD);
        assert_eq!(first.dictoffset, base);
        assert_eq!(first.weaklistoffset, base + WORD);
        assert_eq!(first.handle_offset, base + 2 * WORD);
        assert_eq!(first.itemsize, 0);

        // A bridge base already has every word
        let ext = types.create_type(ExtensionKind::Property).unwrap();
        let second = Layout::derive(ext);
        assert_eq!(second.basicsize, typeobj::basicsize(ext));
        assert_eq!(second.dictoffset, first.dictoffset);
        assert_eq!(second.weaklistoffset, first.weaklistoffset);
        assert_eq!(second.handle_offset, first.handle_offset);
        types.shutdown();
    }
}

#[test]
fn test_most_derived_level_wins() {
    let _gil = runtime();
    let types = started("level_types");
    unsafe {
        let object = builtins::object_type();
        let tp = typeobj::new_heap_type("LevelTarget", object).unwrap();
        let defaults = SlotDefaults::new();
        let holder = SlotsHolder::new(tp, defaults.for_base(object).unwrap(), None, &[]);
        let levels = [
            SlotLevel { name: "level_derived", slots: DERIVED_LEVEL },
            SlotLevel { name: "level_base", slots: BASE_LEVEL },
        ];
        assert_eq!(types.install_levels(&holder, &levels).unwrap(), 2);
        let off = offsets();
        assert_eq!(typeobj::get(tp, off.tp_repr), derived_repr as usize);
        assert_eq!(typeobj::get(tp, off.tp_str), base_str as usize);
        holder.reset();
        decref(tp);
        types.shutdown();
    }
}

#[test]
fn test_slot_if_empty_keeps_existing_value() {
    let _gil = runtime();
    let types = started("slot_types");
    unsafe {
        let tp = typeobj::new_heap_type("SlotTarget", builtins::object_type()).unwrap();
        let off = offsets();
        typeobj::set(tp, off.tp_repr, 0);
        assert!(types.initialize_slot_if_empty(tp, "tp_repr", base_repr as usize).unwrap());
        assert!(!types.initialize_slot_if_empty(tp, "tp_repr", derived_repr as usize).unwrap());
        assert_eq!(typeobj::get(tp, off.tp_repr), base_repr as usize);
        assert!(types.initialize_slot_if_empty(tp, "tp_nonsense", 1).is_err());
        decref(tp);
        types.shutdown();
    }
}

#[test]
fn test_extension_types_are_built_once() {
    let _gil = runtime();
    let types = started("ext_types");
    unsafe {
        let a = types.create_type(ExtensionKind::Method).unwrap();
        let b = types.create_type(ExtensionKind::Method).unwrap();
        assert_eq!(a, b);
        assert_eq!(typeobj::name(a), "ext_types.MethodObject");
        assert!(metatype::is_bridge_type(a));
        assert_eq!(types.type_count(), 1);
        assert_eq!(types.shutdown(), 1);
        assert!(types.metatype().is_null());
    }
}

#[test]
fn test_release_is_idempotent() {
    let _gil = runtime();
    let types = started("release_types");
    unsafe {
        let desc = Arc::new(ClassDescriptor::new(crate::host::HostType::class("Plain").build(), Weak::new()));
        let tp = types
            .initialize_class_core(&desc, &[builtins::object_type()])
            .unwrap();
        types.initialize_class(&desc, tp, &[]).unwrap();
        assert_eq!(desc.type_ptr(), tp);
        assert!(types.release_type(tp));
        assert!(!types.release_type(tp));
        assert_eq!(types.type_count(), 0);
        types.shutdown();
    }
}

#[test]
fn test_class_core_rejects_bad_bases() {
    let _gil = runtime();
    let types = started("bases_types");
    unsafe {
        let desc = Arc::new(ClassDescriptor::new(crate::host::HostType::class("Orphan").build(), Weak::new()));
        assert!(matches!(
            types.initialize_class_core(&desc, &[]),
            Err(BridgeError::Construction { .. })
        ));

        let sealed = Arc::new(ClassDescriptor::new(
            crate::host::HostType::class("Closed").sealed().build(),
            Weak::new(),
        ));
        let closed = types
            .initialize_class_core(&sealed, &[builtins::object_type()])
            .unwrap();
        assert!(!typeobj::flags(closed).contains(TypeFlags::BASETYPE));
        assert!(types.initialize_class_core(&desc, &[closed]).is_err());
        types.shutdown();
    }
}
