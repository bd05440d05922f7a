use super::*;
use proptest::prelude::*;

fn target(value: u32) -> Target {
    Arc::new(value)
}

#[test]
fn test_strong_round_trip() {
    let owner = OwnerTag::next();
    let handle = alloc_strong(owner, target(7));
    assert_eq!(*get_as::<u32>(handle).unwrap(), 7);
    assert!(get_as::<String>(handle).is_none());
    assert!(is_strong(handle));
    free(handle).unwrap();
    assert!(get(handle).is_none());
}

#[test]
fn test_double_free_is_reported() {
    let handle = alloc_strong(OwnerTag::next(), target(1));
    free(handle).unwrap();
    assert_eq!(free(handle), Err(HandleError::Stale(handle)));
}

#[test]
fn test_recycled_slot_rejects_old_handle() {
    let owner = OwnerTag::next();
    let old = alloc_strong(owner, target(1));
    free(old).unwrap();
    let fresh = alloc_strong(owner, target(2));
    assert!(get(old).is_none());
    assert_eq!(*get_as::<u32>(fresh).unwrap(), 2);
    free(fresh).unwrap();
}

#[test]
fn test_weak_follows_target() {
    let owner = OwnerTag::next();
    let value = target(3);
    let handle = alloc_weak(owner, &value);
    assert!(get(handle).is_some());
    drop(value);
    assert!(get(handle).is_none());
    assert!(is_live(handle));
    assert_eq!(make_strong(handle), Err(HandleError::Collected(handle)));
    free(handle).unwrap();
}

#[test]
fn test_make_weak_then_strong() {
    let owner = OwnerTag::next();
    let value = target(4);
    let handle = alloc_strong(owner, Arc::clone(&value));
    make_weak(handle).unwrap();
    assert!(!is_strong(handle));
    assert_eq!(Arc::strong_count(&value), 1);
    make_strong(handle).unwrap();
    assert!(is_strong(handle));
    assert_eq!(Arc::strong_count(&value), 2);
    free(handle).unwrap();
}

#[test]
fn test_replace_keeps_handle() {
    let handle = alloc_strong(OwnerTag::next(), target(5));
    replace(handle, target(6)).unwrap();
    assert_eq!(*get_as::<u32>(handle).unwrap(), 6);
    free(handle).unwrap();
}

#[test]
fn test_free_owned_by_only_touches_owner() {
    let mine = OwnerTag::next();
    let other = OwnerTag::next();
    let a = alloc_strong(mine, target(1));
    let b = alloc_strong(mine, target(2));
    let c = alloc_strong(other, target(3));
    assert_eq!(live_count_for(mine), 2);
    assert_eq!(free_owned_by(mine), 2);
    assert!(get(a).is_none() && get(b).is_none());
    assert!(get(c).is_some());
    free(c).unwrap();
}

#[test]
fn test_raw_round_trip() {
    let handle = alloc_strong(OwnerTag::next(), target(9));
    assert_eq!(OwnershipHandle::from_raw(handle.to_raw()), Some(handle));
    assert_eq!(OwnershipHandle::from_raw(0), None);
    free(handle).unwrap();
}

proptest! {
    #[test]
    fn prop_each_handle_frees_exactly_once(count in 1usize..64, order in proptest::collection::vec(any::<u16>(), 1..64)) {
        let owner = OwnerTag::next();
        let handles: Vec<_> = (0..count).map(|i| alloc_strong(owner, target(i as u32))).collect();
        for (i, h) in handles.iter().enumerate() {
            prop_assert_eq!(*get_as::<u32>(*h).unwrap(), i as u32);
        }
        let mut freed = vec![false; count];
        for pick in order {
            let i = pick as usize % count;
            let result = free(handles[i]);
            prop_assert_eq!(result.is_ok(), !freed[i]);
            freed[i] = true;
        }
        for (i, h) in handles.iter().enumerate() {
            prop_assert_eq!(get(*h).is_some(), !freed[i]);
        }
        free_owned_by(owner);
        prop_assert_eq!(live_count_for(owner), 0);
    }
}
