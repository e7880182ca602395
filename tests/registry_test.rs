// Registry invariants under concurrent admission, banning and fan-out

use moderated_chat::core::session::{SessionRegistry, SessionState};
use moderated_chat::core::Teardown;
use moderated_chat::error::RelayError;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread;

fn ip(last: u8) -> IpAddr {
    IpAddr::from([192, 168, 1, last])
}

#[test]
fn test_banned_address_never_in_snapshot() {
    let registry = Arc::new(SessionRegistry::new());
    let target = ip(7);
    let mut handles = Vec::new();

    for worker in 0..8u8 {
        let registry = registry.clone();
        handles.push(thread::spawn(move || {
            let mut ends = Vec::new();
            for round in 0..50u8 {
                let address = if round % 2 == 0 { target } else { ip(100 + worker) };
                match registry.admit(address) {
                    Ok((_, end)) => ends.push(end),
                    Err(RelayError::AddressBanned(banned)) => assert_eq!(banned, target),
                    Err(e) => panic!("unexpected admission error: {}", e),
                }
                if registry.is_banned(target).unwrap() {
                    // Once the ban is visible no snapshot may contain the address
                    let snapshot = registry.snapshot().unwrap();
                    assert!(snapshot.iter().all(|s| s.address != target));
                }
            }
            ends
        }));
    }

    let banner = {
        let registry = registry.clone();
        thread::spawn(move || {
            thread::yield_now();
            registry.ban(target, "test").unwrap()
        })
    };

    let outcome = banner.join().unwrap();
    assert!(outcome.newly_banned);
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = registry.snapshot().unwrap();
    assert!(snapshot.iter().all(|s| s.address != target));
    assert!(registry.admit(target).is_err());
}

#[test]
fn test_ids_unique_across_threads() {
    let registry = Arc::new(SessionRegistry::new());
    let handles: Vec<_> = (0..4u8)
        .map(|worker| {
            let registry = registry.clone();
            thread::spawn(move || {
                (0..100)
                    .map(|_| {
                        let (session, _ends) = registry.admit(ip(worker)).unwrap();
                        registry.remove(session.id, Teardown::Disconnected).unwrap();
                        session.id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "session id {} issued twice", id);
            assert_eq!(registry.state_of(id).unwrap(), SessionState::TornDown);
        }
    }
    assert_eq!(seen.len(), 400);
    assert_eq!(registry.client_count().unwrap(), 0);
}

#[test]
fn test_fan_out_preserves_order_per_recipient() {
    let registry = SessionRegistry::with_queue_capacity(64);
    let (_a, mut a_ends) = registry.admit(ip(1)).unwrap();
    let (_b, mut b_ends) = registry.admit(ip(2)).unwrap();

    for i in 0..20 {
        let payload: Arc<str> = Arc::from(format!("event {}", i));
        let result = registry.fan_out(&payload, None, None).unwrap();
        assert_eq!(result.delivered, 2);
        assert!(result.failed.is_empty());
    }

    for ends in [&mut a_ends, &mut b_ends] {
        for i in 0..20 {
            let payload = ends.outbound.try_recv().unwrap();
            assert_eq!(&*payload, format!("event {}", i));
        }
    }
}

#[test]
fn test_full_queue_retires_recipient() {
    let registry = SessionRegistry::with_queue_capacity(1);
    let (slow, slow_ends) = registry.admit(ip(1)).unwrap();
    let (_fast, mut fast_ends) = registry.admit(ip(2)).unwrap();

    let first: Arc<str> = Arc::from("one");
    let second: Arc<str> = Arc::from("two");

    registry.fan_out(&first, None, None).unwrap();
    fast_ends.outbound.try_recv().unwrap();

    let result = registry.fan_out(&second, None, None).unwrap();
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].id, slow.id);
    assert_eq!(registry.state_of(slow.id).unwrap(), SessionState::TornDown);
    assert_eq!(*slow_ends.teardown.borrow(), Some(Teardown::DeliveryFailed));

    // Later fan-outs no longer see the retired session
    let third: Arc<str> = Arc::from("three");
    let result = registry.fan_out(&third, None, None).unwrap();
    assert_eq!(result.attempted, 1);
}

#[test]
fn test_repeat_ban_not_new() {
    let registry = SessionRegistry::new();
    let (session, ends) = registry.admit(ip(3)).unwrap();

    let first = registry.ban(ip(3), "policy").unwrap();
    assert!(first.newly_banned);
    assert_eq!(first.removed, vec![session]);
    assert_eq!(
        *ends.teardown.borrow(),
        Some(Teardown::Banned {
            reason: "policy".to_string()
        })
    );

    let second = registry.ban(ip(3), "policy").unwrap();
    assert!(!second.newly_banned);
    assert!(second.removed.is_empty());
    assert!(registry.is_banned(ip(3)).unwrap());
}
