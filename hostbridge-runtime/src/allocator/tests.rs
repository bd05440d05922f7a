use super::*;

#[test]
fn test_alloc_is_zeroed_and_aligned() {
    let ptr = mem_alloc(64);
    assert!(!ptr.is_null());
    assert_eq!(ptr as usize % BLOCK_ALIGN, 0);

    unsafe {
        let bytes = std::slice::from_raw_parts(ptr, 64);
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(block_size(ptr), 64);
        mem_free(ptr);
    }
}

#[test]
fn test_free_null_is_noop() {
    unsafe { mem_free(std::ptr::null_mut()) };
}

#[test]
fn test_zero_sized_block() {
    let ptr = mem_alloc(0);
    assert!(!ptr.is_null());
    unsafe {
        assert_eq!(block_size(ptr), 0);
        mem_free(ptr);
    }
}

#[test]
fn test_header_size() {
    assert_eq!(BlockHeader::SIZE, 16);
}
