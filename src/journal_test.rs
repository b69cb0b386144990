use super::*;
use crate::key::test_key::TestKey;

fn journal(capacity: usize) -> Journal<TestKey> {
    Journal::new(capacity, 100)
}

#[test]
fn returns_entries_from_offset_inclusive() {
    let mut j = journal(10);
    j.add_entry(0, TestKey(1));
    j.add_entry(50, TestKey(2));
    j.add_entry(100, TestKey(3));

    let entries = j.get_entries_since(50, true).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].offset, 50);
    assert_eq!(entries[1].offset, 100);
}

#[test]
fn excludes_offset_when_not_inclusive() {
    let mut j = journal(10);
    j.add_entry(0, TestKey(1));
    j.add_entry(50, TestKey(2));

    let entries = j.get_entries_since(0, false).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].offset, 50);
}

#[test]
fn evicts_oldest_at_capacity() {
    let mut j = journal(2);
    assert!(!j.add_entry(0, TestKey(1)));
    assert!(!j.add_entry(50, TestKey(2)));
    assert!(j.add_entry(100, TestKey(3)));

    assert_eq!(j.oldest_offset(), Some(50));
}

#[test]
fn signals_fallback_when_offset_too_old() {
    let mut j = journal(2);
    j.add_entry(50, TestKey(1));
    j.add_entry(100, TestKey(2));

    assert!(j.get_entries_since(0, true).is_none());
}

#[test]
fn caps_returned_entries_at_max_return() {
    let mut j = Journal::new(10, 2);
    for i in 0..5u64 {
        j.add_entry(i * 10, TestKey(i));
    }

    let entries = j.get_entries_since(0, true).unwrap();
    assert_eq!(entries.len(), 2);
}
