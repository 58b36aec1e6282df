use super::*;
use quickcheck_macros::quickcheck;

crate::define_idx!(TestId, "t");

#[test]
fn test_push_hands_out_dense_ids() {
    let mut vec: IndexVec<TestId, i32> = IndexVec::new();
    assert_eq!(vec.push(10), TestId(0));
    assert_eq!(vec.push(20), TestId(1));
    assert_eq!(vec.push(30), TestId(2));
    assert_eq!(vec.len(), 3);
}

#[test]
fn test_indexing() {
    let mut vec: IndexVec<TestId, &str> = IndexVec::new();
    let a = vec.push("a");
    let b = vec.push("b");
    assert_eq!(vec[a], "a");
    assert_eq!(vec[b], "b");

    vec[a] = "z";
    assert_eq!(vec[a], "z");
}

#[test]
fn test_get_never_issued_id() {
    let vec: IndexVec<TestId, i32> = IndexVec::new();
    assert_eq!(vec.get(TestId(0)), None);
}

#[test]
#[should_panic(expected = "no such t7")]
fn test_index_panics_with_dump_spelling() {
    let vec: IndexVec<TestId, i32> = IndexVec::new();
    let _ = vec[TestId(7)];
}

#[test]
fn test_next_index_names_the_upcoming_slot() {
    let mut vec: IndexVec<TestId, i32> = IndexVec::new();
    assert_eq!(vec.next_index(), TestId(0));
    vec.push(1);
    assert_eq!(vec.next_index(), TestId(1));
}

#[test]
fn test_display_uses_prefix() {
    assert_eq!(format!("{}", TestId(4)), "t4");
    // Debug stays structural for logs that want the type name
    assert_eq!(format!("{:?}", TestId(4)), "TestId(4)");
}

#[test]
fn test_iter_enumerated() {
    let mut vec: IndexVec<TestId, i32> = IndexVec::new();
    vec.push(10);
    vec.push(20);

    let pairs: Vec<_> = vec.iter_enumerated().map(|(i, v)| (i, *v)).collect();
    assert_eq!(pairs, vec![(TestId(0), 10), (TestId(1), 20)]);
}

#[test]
fn test_equality_is_by_contents() {
    let mut a: IndexVec<TestId, i32> = IndexVec::new();
    let mut b: IndexVec<TestId, i32> = IndexVec::new();
    a.push(1);
    b.push(1);
    assert_eq!(a, b);
    b.push(2);
    assert_ne!(a, b);
}

#[quickcheck]
fn prop_push_then_get_roundtrips(values: Vec<u32>) -> bool {
    let mut vec: IndexVec<TestId, u32> = IndexVec::new();
    let ids: Vec<_> = values.iter().map(|&v| vec.push(v)).collect();
    ids.iter()
        .zip(values.iter())
        .all(|(id, v)| vec.get(*id) == Some(v))
}

#[quickcheck]
fn prop_enumeration_is_dense_and_ordered(len: u8) -> bool {
    let mut vec: IndexVec<TestId, u8> = IndexVec::new();
    for i in 0..len {
        vec.push(i);
    }
    vec.iter_enumerated()
        .enumerate()
        .all(|(pos, (id, _))| id.index() == pos)
}
