//! End-to-end ring behavior over real UDP sockets.

use std::time::{Duration, Instant};

use ringline::{Bytes, Dht, Id, PutError, Testnet, TESTNET_M_BITS};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// True when every node's successor is the next-greater id cyclically and
/// every predecessor mirrors it.
fn converged(nodes: &[Dht]) -> bool {
    let mut infos: Vec<_> = nodes
        .iter()
        .map(|node| node.info().expect("info"))
        .collect();
    infos.sort_by_key(|info| info.id().0);

    infos.iter().enumerate().all(|(i, info)| {
        let next = &infos[(i + 1) % infos.len()];
        info.successor().id == next.id() && next.predecessor().map(|p| p.id) == Some(info.id())
    })
}

fn wait_for_convergence(nodes: &[Dht]) {
    let deadline = Duration::from_secs(30);
    let start = Instant::now();

    while !converged(nodes) {
        assert!(
            start.elapsed() < deadline,
            "ring did not converge within {:?}",
            deadline
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// The node that should own `target`: the first one clockwise from it.
fn expected_owner(nodes: &[Dht], target: Id) -> Id {
    let mut ids: Vec<Id> = nodes
        .iter()
        .map(|node| node.info().expect("info").id())
        .collect();
    ids.sort();

    *ids.iter()
        .find(|id| **id >= target)
        .unwrap_or(&ids[0])
}

#[test]
fn two_node_ring_is_symmetric() {
    init_logging();

    let testnet = Testnet::new(2).expect("testnet");
    wait_for_convergence(&testnet.nodes);

    let a = testnet.nodes[0].info().expect("info");
    let b = testnet.nodes[1].info().expect("info");

    assert_eq!(a.successor().id, b.id());
    assert_eq!(b.successor().id, a.id());
    assert_eq!(a.predecessor().map(|p| p.id), Some(b.id()));
    assert_eq!(b.predecessor().map(|p| p.id), Some(a.id()));
}

#[test]
fn successors_follow_the_ring_order() {
    init_logging();

    let testnet = Testnet::new(3).expect("testnet");
    wait_for_convergence(&testnet.nodes);

    // wait_for_convergence already asserts the cyclic order; spot-check
    // that the finger tables kept their size through all of it.
    for node in &testnet.nodes {
        let info = node.info().expect("info");
        assert_eq!(info.fingers().len(), TESTNET_M_BITS as usize);
    }
}

#[test]
fn put_get_roundtrip_from_any_entry_point() {
    init_logging();

    let testnet = Testnet::new(3).expect("testnet");
    wait_for_convergence(&testnet.nodes);

    testnet.nodes[0]
        .put("answer", Bytes::from("42"))
        .expect("first put is acked");

    // A put for an existing key is refused, whichever node it enters
    // through, and the stored value is untouched.
    for node in &testnet.nodes {
        match node.put("answer", Bytes::from("43")) {
            Err(PutError::KeyExists) => {}
            other => panic!("expected KeyExists, got {:?}", other),
        }
    }

    for node in &testnet.nodes {
        assert_eq!(
            node.get("answer").expect("get"),
            Some(Bytes::from("42")),
            "the key must be readable from any entry point"
        );
    }

    assert_eq!(testnet.nodes[1].get("missing").expect("get"), None);
}

#[test]
fn lookups_agree_from_every_entry_point() {
    init_logging();

    let testnet = Testnet::new(4).expect("testnet");
    wait_for_convergence(&testnet.nodes);

    for _ in 0..8 {
        let target = Id::random(TESTNET_M_BITS);
        let expected = expected_owner(&testnet.nodes, target);

        for node in &testnet.nodes {
            let owner = node.find_successor(target).expect("lookup");
            assert_eq!(
                owner.id, expected,
                "every entry point must resolve {:?} to the same owner",
                target
            );
        }
    }
}

// Keys are not handed off when membership changes: a node joining between
// a key and its old owner takes over the interval but not the data, so the
// key becomes unreachable through ring routing. This is an inherited
// limitation of the design; the test documents it instead of asserting
// strong consistency.
#[test]
fn keys_are_not_migrated_when_ownership_moves() {
    init_logging();

    let testnet = Testnet::new(2).expect("testnet");
    wait_for_convergence(&testnet.nodes);

    let entry = &testnet.nodes[0];

    let keys: Vec<String> = (0..64).map(|i| format!("key-{}", i)).collect();
    for key in &keys {
        entry
            .put(key, Bytes::from(format!("value for {}", key)))
            .expect("put");
    }

    let owner_before: Vec<Id> = keys
        .iter()
        .map(|key| {
            entry
                .find_successor(Id::hash(key, TESTNET_M_BITS))
                .expect("lookup")
                .id
        })
        .collect();

    // Grow the ring; the new nodes capture slices of the id space.
    let mut nodes = testnet.nodes.clone();
    for _ in 0..2 {
        let node = Dht::builder()
            .bootstrap(entry.local_addr())
            .recv_timeout(Duration::from_millis(25))
            .m_bits(TESTNET_M_BITS)
            .build()
            .expect("node");
        node.bootstrapped().expect("join");
        nodes.push(node);
    }
    wait_for_convergence(&nodes);

    let mut moved = 0;
    let mut lost = 0;
    for (key, before) in keys.iter().zip(owner_before) {
        let after = entry
            .find_successor(Id::hash(key, TESTNET_M_BITS))
            .expect("lookup")
            .id;
        let value = entry.get(key).expect("get");

        if after == before {
            // Ownership unchanged: the key is still served.
            assert_eq!(value, Some(Bytes::from(format!("value for {}", key))));
        } else {
            // Ownership moved but the data did not follow.
            moved += 1;
            if value.is_none() {
                lost += 1;
            }
        }
    }

    // Nothing was deleted, the data just became unreachable through the
    // ring's routing.
    let stored: usize = nodes
        .iter()
        .map(|node| node.info().expect("info").stored_keys())
        .sum();
    assert_eq!(stored, keys.len());

    if moved == 0 {
        // The new nodes happened to capture none of the 64 keys; nothing
        // to observe this run.
        eprintln!("no key changed ownership; the migration gap was not exercised");
        return;
    }

    assert_eq!(
        lost, moved,
        "every key whose ownership moved must now be unreachable"
    );
}
