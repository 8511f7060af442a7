use std::cell::RefCell;
use std::rc::Rc;

use ydelta_core::update_codec::decode_state_vector;
use ydelta_core::{Content, Doc};

fn exchange(a: &mut Doc, b: &mut Doc) {
    for _ in 0..2 {
        let sv_b = decode_state_vector(&b.encode_state_vector_v2()).expect("state vector");
        let to_b = a.encode_state_as_update_v2(&sv_b).expect("encode a");
        b.apply_update_v2(&to_b, None).expect("apply at b");

        let sv_a = decode_state_vector(&a.encode_state_vector_v2()).expect("state vector");
        let to_a = b.encode_state_as_update_v2(&sv_a).expect("encode b");
        a.apply_update_v2(&to_a, None).expect("apply at a");
    }
}

fn capture_updates(doc: &mut Doc) -> Rc<RefCell<Vec<Vec<u8>>>> {
    let updates = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&updates);
    doc.on_update(Box::new(move |event| {
        sink.borrow_mut().push(event.update.clone());
        Ok(())
    }));
    updates
}

#[test]
fn concurrent_inserts_at_origin_order_by_client_id() {
    let mut a = Doc::new();
    let mut b = Doc::new();
    let ta = a.get_text("content");
    let tb = b.get_text("content");

    a.transact(|txn| txn.text_insert(ta, 0, "aaa")).expect("insert at a");
    b.transact(|txn| txn.text_insert(tb, 0, "bbb")).expect("insert at b");

    exchange(&mut a, &mut b);

    let expected = if a.client_id() < b.client_id() {
        "aaabbb"
    } else {
        "bbbaaa"
    };
    assert_eq!(a.state().text_of(ta), expected);
    assert_eq!(b.state().text_of(tb), expected);
}

#[test]
fn reapplying_the_same_update_changes_nothing() {
    let mut a = Doc::new();
    let ta = a.get_text("content");
    a.transact(|txn| txn.text_insert(ta, 0, "stable")).expect("insert");

    let full = a
        .encode_state_as_update_v2(&Default::default())
        .expect("encode");

    let mut b = Doc::new();
    let tb = b.get_text("content");
    b.apply_update_v2(&full, None).expect("first apply");
    b.apply_update_v2(&full, None).expect("second apply");
    b.apply_update_v2(&full, None).expect("third apply");

    assert_eq!(b.state().text_of(tb), "stable");
    assert_eq!(b.state().list_len(tb), 6);
}

#[test]
fn updates_integrate_once_dependencies_arrive() {
    let mut a = Doc::new();
    let ta = a.get_text("content");
    let updates = capture_updates(&mut a);

    a.transact(|txn| txn.text_insert(ta, 0, "hello")).expect("first insert");
    a.transact(|txn| txn.text_insert(ta, 5, " world")).expect("second insert");

    let captured = updates.borrow().clone();
    assert_eq!(captured.len(), 2);

    let mut b = Doc::new();
    let tb = b.get_text("content");

    // The second update depends on clocks only the first one carries.
    b.apply_update_v2(&captured[1], None).expect("apply out of order");
    assert_eq!(b.state().text_of(tb), "");

    b.apply_update_v2(&captured[0], None).expect("apply dependency");
    assert_eq!(b.state().text_of(tb), "hello world");
}

#[test]
fn deletions_propagate_between_replicas() {
    let mut a = Doc::new();
    let ta = a.get_text("content");
    a.transact(|txn| txn.text_insert(ta, 0, "hello world")).expect("insert");

    let mut b = Doc::new();
    let tb = b.get_text("content");
    exchange(&mut a, &mut b);
    assert_eq!(b.state().text_of(tb), "hello world");

    let updates = capture_updates(&mut a);
    a.transact(|txn| txn.list_remove(ta, 5, 6)).expect("delete");
    let delete_update = updates.borrow().last().expect("delete update").clone();

    b.apply_update_v2(&delete_update, None).expect("apply delete");
    assert_eq!(a.state().text_of(ta), "hello");
    assert_eq!(b.state().text_of(tb), "hello");
    assert_eq!(b.state().list_len(tb), 5);
}

#[test]
fn delete_ranges_wait_for_their_structs() {
    let mut a = Doc::new();
    let ta = a.get_text("content");
    let updates = capture_updates(&mut a);

    a.transact(|txn| txn.text_insert(ta, 0, "abc")).expect("insert");
    a.transact(|txn| txn.list_remove(ta, 1, 1)).expect("delete");

    let captured = updates.borrow().clone();
    assert_eq!(captured.len(), 2);

    let mut b = Doc::new();
    let tb = b.get_text("content");

    // The delete refers to clocks b has never seen; it must stay parked.
    b.apply_update_v2(&captured[1], None).expect("apply delete first");
    assert_eq!(b.state().text_of(tb), "");

    b.apply_update_v2(&captured[0], None).expect("apply structs");
    assert_eq!(b.state().text_of(tb), "ac");
}

#[test]
fn concurrent_insert_and_delete_converge() {
    let mut a = Doc::new();
    let mut b = Doc::new();
    let ta = a.get_text("content");
    let tb = b.get_text("content");

    a.transact(|txn| txn.text_insert(ta, 0, "shared base")).expect("seed");
    exchange(&mut a, &mut b);

    a.transact(|txn| txn.list_remove(ta, 0, 7)).expect("delete at a");
    b.transact(|txn| txn.text_insert(tb, 11, "!")).expect("append at b");
    exchange(&mut a, &mut b);

    assert_eq!(a.state().text_of(ta), "base!");
    assert_eq!(b.state().text_of(tb), "base!");
}

#[test]
fn concurrent_map_writes_pick_one_winner() {
    let mut a = Doc::new();
    let mut b = Doc::new();
    let ma = a.get_map("meta");
    let mb = b.get_map("meta");

    a.transact(|txn| txn.map_set(ma, "color", Content::Any(vec!["red".into()])))
        .expect("set at a");
    b.transact(|txn| txn.map_set(mb, "color", Content::Any(vec!["blue".into()])))
        .expect("set at b");

    exchange(&mut a, &mut b);

    let winner = a.state().map_get(ma, "color").expect("value survives");
    assert_eq!(b.state().map_get(mb, "color"), Some(winner.clone()));
    assert!(winner == "red" || winner == "blue");
    assert_eq!(a.state().map_keys(ma), vec!["color".to_string()]);
}
