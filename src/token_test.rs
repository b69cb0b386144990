use super::*;
use crate::key::test_key::TestKey;
use crate::key::DefaultKeyFactory;

#[test]
fn empty_token_is_uninitialized_and_journal_shaped() {
    let token: StoreFindToken<TestKey> = StoreFindToken::empty();
    assert!(token.is_uninitialized());
    assert!(token.is_journal_shape());
}

#[test]
fn journal_shape_round_trips_through_wire_format() {
    let session_id = Uuid::new_v4();
    let token: StoreFindToken<TestKey> = StoreFindToken::journal_shape(session_id, 150, 150);
    let bytes = token.to_bytes();

    let factory = DefaultKeyFactory;
    let decoded = StoreFindToken::<TestKey>::from_bytes(&bytes, &factory, 8).unwrap();

    assert_eq!(decoded.session_id, session_id);
    assert_eq!(decoded.offset, 150);
    assert_eq!(decoded.index_start_offset, UNINITIALIZED_OFFSET);
    assert!(decoded.store_key.is_none());
}

#[test]
fn segment_shape_round_trips_with_store_key() {
    let session_id = Uuid::new_v4();
    let token = StoreFindToken::segment_shape(session_id, 100, TestKey(42), 142);
    let bytes = token.to_bytes();

    let factory = DefaultKeyFactory;
    let decoded = StoreFindToken::<TestKey>::from_bytes(&bytes, &factory, 8).unwrap();

    assert_eq!(decoded.index_start_offset, 100);
    assert_eq!(decoded.store_key, Some(TestKey(42)));
    assert_eq!(decoded.offset, UNINITIALIZED_OFFSET);
}

#[test]
fn session_id_length_prefix_matches_actual_uuid_byte_length() {
    // Regression guard for the undersized-fixed-length bug this format
    // fixes (§9 Open Question #2): the prefix must equal the hyphenated
    // UUID string's byte length (36), not a stale fixed constant.
    let token: StoreFindToken<TestKey> = StoreFindToken::journal_shape(Uuid::new_v4(), 0, 0);
    let bytes = token.to_bytes();
    let len_prefix = u32::from_be_bytes(bytes[2..6].try_into().unwrap());
    assert_eq!(len_prefix, 36);
}

#[test]
fn rejects_truncated_buffer() {
    let factory = DefaultKeyFactory;
    assert!(StoreFindToken::<TestKey>::from_bytes(&[0, 1], &factory, 8).is_err());
}
