//! Fresh-process startup; builtins are bootstrapped by this test alone

use hostbridge_runtime::builtins;
use hostbridge_runtime::typeobj::{self, TypeFlags};
use hostbridge_runtime::{gil, RuntimeConfig};

#[test]
fn test_first_initialize_readies_every_builtin() {
    let generation = hostbridge_runtime::initialize(&RuntimeConfig::default()).unwrap();
    assert!(generation >= 1);
    assert!(builtins::bootstrap_failure().is_none());

    let _gil = gil::acquire();
    unsafe {
        for tp in [builtins::int_type(), builtins::bool_type(), builtins::module_type()] {
            assert!(typeobj::flags(tp).contains(TypeFlags::READY), "{}", typeobj::name(tp));
        }
        assert!(typeobj::flags(builtins::int_type()).contains(TypeFlags::BASETYPE));
        assert!(!typeobj::flags(builtins::bool_type()).contains(TypeFlags::BASETYPE));
    }
}
