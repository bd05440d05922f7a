use super::*;

#[test]
fn test_header_fields_are_stable() {
    let v1 = TypeOffsets::compute(AbiRevision::V1);
    assert_eq!(v1.ob_refcnt, 0);
    assert_eq!(v1.ob_type, WORD);
    assert_eq!(v1.tp_name, 3 * WORD);
}

#[test]
fn test_revision_shifts_offsets() {
    let v1 = TypeOffsets::compute(AbiRevision::V1);
    let v2 = TypeOffsets::compute(AbiRevision::V2);

    // Fields before the inserted word keep their place
    assert_eq!(v1.tp_dealloc, v2.tp_dealloc);
    // Everything behind it moves by one word
    assert_eq!(v1.tp_repr + WORD, v2.tp_repr);
    assert_eq!(v1.tp_version_tag + WORD, v2.tp_version_tag);
    assert_eq!(v1.nb_add + 2 * WORD, v2.nb_add);
    assert_eq!(v1.type_basicsize + 2 * WORD, v2.type_basicsize);

    assert!(v1.tp_vectorcall_offset.is_none());
    assert!(v2.tp_watched.is_some());
}

#[test]
fn test_slot_lookup() {
    let offsets = TypeOffsets::compute(AbiRevision::V1);
    assert_eq!(offsets.slot("tp_repr"), Some(offsets.tp_repr));
    assert_eq!(offsets.slot("mp_subscript"), Some(offsets.mp_subscript));
    assert_eq!(offsets.slot("tp_frobnicate"), None);
    assert_eq!(offsets.slot_offsets().count(), SLOT_NAMES.len());
}

#[test]
fn test_embedded_tables_follow_type_fields() {
    let offsets = TypeOffsets::compute(AbiRevision::V2);
    assert!(offsets.as_number > offsets.tp_version_tag);
    assert_eq!(offsets.as_number, offsets.nb_add);
    assert_eq!(offsets.as_mapping, offsets.mp_length);
    assert!(offsets.ht_qualname < offsets.type_basicsize);
}

#[test]
fn test_revision_numbers() {
    assert_eq!(AbiRevision::from_number(2), Some(AbiRevision::V2));
    assert_eq!(AbiRevision::from_number(7), None);
    assert_eq!(AbiRevision::V1.to_string(), "v1");
}
