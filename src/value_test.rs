use super::*;

#[test]
fn set_flag_and_offset_in_place() {
    let mut v = IndexValue::new(10, 20, TTL_NEVER);
    assert!(!v.is_deleted());

    v.set_flag(DELETE_INDEX_FLAG);
    v.set_new_offset(100);
    v.set_new_size(5);

    assert!(v.is_deleted());
    assert_eq!(v.offset, 100);
    assert_eq!(v.size, 5);
}

#[test]
fn never_expires_on_sentinel() {
    let v = IndexValue::new(0, 1, TTL_NEVER);
    assert!(!v.is_expired());
}

#[test]
fn expired_when_ttl_in_past() {
    let v = IndexValue::new(0, 1, 1);
    assert!(v.is_expired());
}

#[test]
fn round_trips_through_bytes() {
    let mut v = IndexValue::new(123, 456, 789);
    v.set_flag(DELETE_INDEX_FLAG);
    let bytes = v.to_bytes();
    let back = IndexValue::from_bytes(&bytes);
    assert_eq!(v, back);
}
