//! Well-known host types resolved first thing in a fresh process

use hostbridge::host;
use hostbridge::HostType;

#[test]
fn test_object_type_resolves_first() {
    let object = host::object_type();
    assert_eq!(object.full_name(), "System.Object");
    assert!(!host::exception_type().members_named(".ctor").is_empty());

    let ty = HostType::class("Fresh").build();
    assert!(ty.base().is_some_and(|base| base.same(&object)));
}
