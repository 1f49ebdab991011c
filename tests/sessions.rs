use padbridge_lib::bus::simulated::{SimulatedBus, SimulatedBusProbe};
use padbridge_lib::bus::BusClient;
use padbridge_lib::error::BusError;
use padbridge_lib::report::XusbReport;
use padbridge_lib::session::SessionManager;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn manager(slots: usize) -> (Arc<SessionManager>, SimulatedBusProbe) {
    let driver = SimulatedBus::new(slots);
    let probe = driver.probe();
    let bus = BusClient::connect(Box::new(driver)).unwrap();
    (Arc::new(SessionManager::new(Arc::new(bus))), probe)
}

#[test]
fn concurrent_connections_get_distinct_controllers() {
    let (manager, probe) = manager(16);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut session = manager.open(format!("peer-{}", i)).unwrap();
                for _ in 0..50 {
                    session
                        .handle_message(r#"{"lx": 0.5, "rightTrigger": 1, "a": true}"#)
                        .unwrap();
                }
                (session.id(), session.target().unwrap(), session)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ids: HashSet<_> = results.iter().map(|(id, _, _)| *id).collect();
    let targets: HashSet<_> = results.iter().map(|(_, t, _)| *t).collect();
    assert_eq!(ids.len(), 8);
    assert_eq!(targets.len(), 8);
    assert_eq!(probe.attached_count(), 8);
    assert_eq!(manager.active_count(), 8);

    for (_, target, session) in results {
        assert_eq!(probe.update_count(target), 50);
        session.close().unwrap();
    }
    assert_eq!(probe.attached_count(), 0);
    assert_eq!(probe.allocated_count(), 0);
    assert_eq!(manager.active_count(), 0);
}

#[test]
fn full_bus_refuses_the_next_connection() {
    let (manager, probe) = manager(2);
    let first = manager.open("a").unwrap();
    let _second = manager.open("b").unwrap();

    assert_eq!(manager.open("c").err(), Some(BusError::NoFreeSlot));
    assert_eq!(probe.attached_count(), 2);
    assert_eq!(manager.active_count(), 2);

    first.close().unwrap();
    assert!(manager.open("d").is_ok());
}

#[test]
fn full_left_stick_with_a_pressed() {
    let (manager, probe) = manager(4);
    let mut session = manager.open("peer").unwrap();
    let target = session.target().unwrap();

    session
        .handle_message(r#"{"lx": 1.0, "ly": 0, "rx": 0, "ry": 0, "leftTrigger": 0, "rightTrigger": 0, "a": true}"#)
        .unwrap();

    let expected = XusbReport {
        buttons: 0x1000,
        thumb_lx: 32767,
        ..Default::default()
    };
    assert_eq!(probe.last_report(target), Some(expected));
    session.close().unwrap();
}

#[test]
fn negative_trigger_and_dpad_diagonal() {
    let (manager, probe) = manager(4);
    let mut session = manager.open("peer").unwrap();
    let target = session.target().unwrap();

    session
        .handle_message(r#"{"leftTrigger": -0.5, "rightTrigger": 0.5, "rx": -1, "dpadUp": true, "dpadLeft": true}"#)
        .unwrap();

    let report = probe.last_report(target).unwrap();
    assert_eq!(report.buttons, 0x0005);
    assert_eq!(report.left_trigger, 0);
    assert_eq!(report.right_trigger, 64);
    assert_eq!(report.thumb_rx, -32767);
    session.close().unwrap();
}

#[test]
fn failed_removal_is_reported_and_target_still_freed() {
    let (manager, probe) = manager(4);
    let session = manager.open("peer").unwrap();
    probe.fail_next_remove(BusError::RemovalFailed.code());

    assert_eq!(session.close(), Err(BusError::RemovalFailed));
    assert_eq!(probe.allocated_count(), 0);
    assert_eq!(manager.active_count(), 0);
}
