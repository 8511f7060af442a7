use ydelta_core::update_codec::decode_state_vector;
use ydelta_core::{DeleteSet, Doc, DocOptions, Id};

#[test]
fn state_vector_diff_carries_only_missing_structs() {
    let mut a = Doc::new();
    let ta = a.get_text("content");
    a.transact(|txn| txn.text_insert(ta, 0, "abc")).expect("seed");

    let mut b = Doc::new();
    let tb = b.get_text("content");
    let full = a
        .encode_state_as_update_v2(&Default::default())
        .expect("full encode");
    b.apply_update_v2(&full, None).expect("apply full");

    a.transact(|txn| txn.text_insert(ta, 3, "defghijklmnop")).expect("append");

    let sv_b = decode_state_vector(&b.encode_state_vector_v2()).expect("state vector");
    let diff = a.encode_state_as_update_v2(&sv_b).expect("diff encode");
    let full_now = a
        .encode_state_as_update_v2(&Default::default())
        .expect("full encode");
    assert!(
        diff.len() < full_now.len(),
        "diff ({}) should be smaller than full state ({})",
        diff.len(),
        full_now.len()
    );

    b.apply_update_v2(&diff, None).expect("apply diff");
    assert_eq!(b.state().text_of(tb), "abcdefghijklmnop");
}

#[test]
fn truncated_update_is_rejected_without_side_effects() {
    let mut a = Doc::new();
    let ta = a.get_text("content");
    a.transact(|txn| txn.text_insert(ta, 0, "payload")).expect("seed");
    let full = a
        .encode_state_as_update_v2(&Default::default())
        .expect("encode");

    let mut b = Doc::new();
    let tb = b.get_text("content");
    let truncated = &full[..full.len() / 2];
    assert!(b.apply_update_v2(truncated, None).is_err());
    assert_eq!(b.state().text_of(tb), "");
    assert_eq!(b.state().store.state_vector().len(), 0);

    // A failed apply must not poison the document.
    b.apply_update_v2(&full, None).expect("valid apply still works");
    assert_eq!(b.state().text_of(tb), "payload");
}

#[test]
fn collected_deletions_survive_as_tombstones() {
    let mut a = Doc::new();
    let ta = a.get_text("content");
    a.transact(|txn| txn.text_insert(ta, 0, "abcdef")).expect("seed");
    a.transact(|txn| txn.list_remove(ta, 2, 2)).expect("delete middle");

    assert_eq!(a.state().text_of(ta), "abef");

    let ds = DeleteSet::from_store(&a.state().store);
    assert!(ds.is_deleted(Id::new(a.client_id(), 2)));
    assert!(ds.is_deleted(Id::new(a.client_id(), 3)));
    assert!(!ds.is_deleted(Id::new(a.client_id(), 0)));

    let mut c = Doc::new();
    let tc = c.get_text("content");
    let full = a
        .encode_state_as_update_v2(&Default::default())
        .expect("encode");
    c.apply_update_v2(&full, None).expect("apply");
    assert_eq!(c.state().text_of(tc), "abef");
    assert!(DeleteSet::from_store(&c.state().store).is_deleted(Id::new(a.client_id(), 2)));
}

#[test]
fn disabling_gc_keeps_replication_intact() {
    let mut a = Doc::with_options(DocOptions {
        gc: false,
        ..Default::default()
    });
    let ta = a.get_text("content");
    a.transact(|txn| txn.text_insert(ta, 0, "keep me around")).expect("seed");
    a.transact(|txn| txn.list_remove(ta, 4, 3)).expect("delete");
    assert_eq!(a.state().text_of(ta), "keep around");

    let mut b = Doc::new();
    let tb = b.get_text("content");
    let full = a
        .encode_state_as_update_v2(&Default::default())
        .expect("encode");
    b.apply_update_v2(&full, None).expect("apply");
    assert_eq!(b.state().text_of(tb), "keep around");
}
