//! Discovery, binding, sheet tracking and teardown against the in-memory host.

use std::sync::{Arc, Mutex};

use excel_link::memory::Op;
use excel_link::{
    BindOutcome, Candidate, ConnectionManager, LinkConfig, LinkEvent, LinkSnapshot, MemoryHost,
};
use pretty_assertions::assert_eq;

fn two_workbooks() -> MemoryHost {
    MemoryHost::new()
        .with_workbook("A.xlsx", &["Sheet1", "Sheet2"])
        .with_workbook("B.xlsx", &["Sheet1", "Sheet2", "Sheet3"])
}

fn manager(host: &MemoryHost) -> ConnectionManager<MemoryHost> {
    ConnectionManager::new(host.clone(), LinkConfig::default())
}

fn recording(host: &MemoryHost) -> (ConnectionManager<MemoryHost>, Arc<Mutex<Vec<LinkEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let manager = ConnectionManager::with_observer(
        host.clone(),
        LinkConfig::default(),
        move |event: &LinkEvent| sink.lock().unwrap().push(event.clone()),
    );
    (manager, events)
}

fn assert_clean(host: &MemoryHost) {
    assert_eq!(host.live_handles(), 0, "handles leaked");
    assert_eq!(host.double_releases(), 0, "handles released twice");
    assert_eq!(host.listener_count(), 0, "listener left registered");
}

#[test]
fn test_no_running_instance() {
    let host = MemoryHost::new();
    let mut manager = manager(&host);

    assert!(manager.discover().is_empty());
    assert_eq!(manager.bind_path("A.xlsx").unwrap(), BindOutcome::NotFound);
    assert!(!manager.is_connected());

    drop(manager);
    assert_clean(&host);
}

#[test]
fn test_no_open_workbooks_yields_sentinel() {
    let host = MemoryHost::new().with_running_instance();
    let mut manager = manager(&host);

    let candidates = manager.discover().clone();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates.get(0), Some(&Candidate::NoOpenWorkbooks));

    assert_eq!(
        manager.bind(&Candidate::NoOpenWorkbooks).unwrap(),
        BindOutcome::NoSelection
    );
    assert_eq!(manager.bind_path("").unwrap(), BindOutcome::NoSelection);
    assert!(!manager.is_connected());

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_discover_and_bind() {
    let host = two_workbooks();
    let mut manager = manager(&host);

    assert_eq!(manager.discover().paths(), vec!["A.xlsx", "B.xlsx"]);

    let outcome = manager.bind_path("B.xlsx").unwrap();
    assert_eq!(
        outcome,
        BindOutcome::Bound {
            workbook: "B.xlsx".into(),
            sheet: "Sheet1".into()
        }
    );
    assert!(manager.is_connected());
    assert_eq!(manager.workbook_name().as_deref(), Some("B.xlsx"));
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet1"));
    // Binding brings the workbook to the front.
    assert_eq!(host.open_workbooks()[0], "B.xlsx");
    assert_eq!(host.listener_count(), 1);

    manager.disconnect();
    assert!(!manager.is_connected());
    assert_eq!(manager.workbook_name(), None);
    assert_eq!(manager.sheet_name(), None);
    assert!(manager.candidates().is_empty());
    assert_clean(&host);
}

#[test]
fn test_bind_unknown_workbook_leaves_state_unchanged() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    manager.discover();
    manager.bind_path("A.xlsx").unwrap();

    let before = manager.snapshot();
    assert_eq!(manager.bind_path("C.xlsx").unwrap(), BindOutcome::NotFound);
    assert_eq!(manager.snapshot(), before);

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_bind_without_discovery_is_not_found() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    assert_eq!(manager.bind_path("A.xlsx").unwrap(), BindOutcome::NotFound);
    assert_eq!(host.acquired_handles(), 0);
}

#[test]
fn test_rebind_replaces_subscription() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    manager.discover();

    manager.bind_path("A.xlsx").unwrap();
    manager.bind_path("B.xlsx").unwrap();
    manager.bind_path("B.xlsx").unwrap();
    assert_eq!(host.listener_count(), 1);
    assert_eq!(manager.workbook_name().as_deref(), Some("B.xlsx"));

    // Only the latest binding reacts to events.
    host.activate_sheet("A.xlsx", "Sheet2");
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet1"));

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_activation_tracking() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    manager.discover();
    manager.bind_path("B.xlsx").unwrap();

    assert!(host.activate_sheet("B.xlsx", "Sheet2"));
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet2"));

    assert!(host.activate_sheet("A.xlsx", "Sheet1"));
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet2"));

    // Re-activating the tracked sheet changes nothing.
    assert!(host.activate_sheet("B.xlsx", "Sheet2"));
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet2"));

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_tracking_follows_save_as() {
    let host = MemoryHost::new().with_workbook("Book1", &["Sheet1", "Sheet2", "Sheet3"]);
    let (mut manager, events) = recording(&host);
    manager.discover();
    manager.bind_path("Book1").unwrap();

    assert!(host.save_as("Book1", r"C:\Quotes\Saved.xlsx"));
    assert!(host.activate_sheet(r"C:\Quotes\Saved.xlsx", "Sheet2"));
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet2"));
    assert_eq!(manager.workbook_name().as_deref(), Some("Saved.xlsx"));

    // The new name is reported once.
    assert!(host.activate_sheet(r"C:\Quotes\Saved.xlsx", "Sheet3"));
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet3"));

    let tail = events.lock().unwrap()[2..].to_vec();
    assert_eq!(
        tail,
        vec![
            LinkEvent::WorkbookRenamed {
                workbook: "Saved.xlsx".into()
            },
            LinkEvent::SheetChanged {
                sheet: "Sheet2".into()
            },
            LinkEvent::SheetChanged {
                sheet: "Sheet3".into()
            },
        ]
    );

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_other_workbook_saved_as_bound_name_is_still_ignored() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    manager.discover();
    manager.bind_path("A.xlsx").unwrap();

    // A's path moves away; B's events never match A's current path.
    assert!(host.save_as("A.xlsx", r"C:\Moved\A.xlsx"));
    assert!(host.activate_sheet("B.xlsx", "Sheet2"));
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet1"));
    assert!(host.activate_sheet(r"C:\Moved\A.xlsx", "Sheet2"));
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet2"));

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_events_after_disconnect_are_ignored() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    manager.discover();
    manager.bind_path("B.xlsx").unwrap();
    manager.disconnect();

    host.activate_sheet("B.xlsx", "Sheet3");
    assert_eq!(manager.sheet_name(), None);
    assert_clean(&host);
}

#[test]
fn test_disconnect_is_idempotent() {
    let host = two_workbooks();
    let (mut manager, events) = recording(&host);
    manager.discover();
    manager.bind_path("A.xlsx").unwrap();
    let acquired = host.acquired_handles();

    manager.disconnect();
    let once = manager.snapshot();
    manager.disconnect();
    assert_eq!(manager.snapshot(), once);
    assert_eq!(once, LinkSnapshot::default());
    assert_eq!(host.acquired_handles(), acquired);

    let disconnects = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| **e == LinkEvent::Disconnected)
        .count();
    assert_eq!(disconnects, 1);
    assert_clean(&host);
}

#[test]
fn test_discover_replaces_candidates() {
    let host = MemoryHost::new().with_workbook("A.xlsx", &["Sheet1"]);
    let mut manager = manager(&host);
    assert_eq!(manager.discover().paths(), vec!["A.xlsx"]);

    host.shut_down();
    assert!(manager.discover().is_empty());

    let host2 = host.clone().with_workbook("C.xlsx", &["Sheet1"]);
    assert_eq!(manager.discover().paths(), vec!["C.xlsx"]);
    assert_eq!(manager.discover().paths(), vec!["C.xlsx"]);

    drop(manager);
    assert_clean(&host2);
}

#[test]
fn test_discover_while_connected_tears_down() {
    let host = two_workbooks();
    let (mut manager, events) = recording(&host);
    manager.discover();
    manager.bind_path("A.xlsx").unwrap();

    manager.discover();
    assert!(!manager.is_connected());
    assert_eq!(host.listener_count(), 0);
    // Application and collection handles of the fresh discovery.
    assert_eq!(host.live_handles(), 2);

    let events = events.lock().unwrap();
    assert!(matches!(events[0], LinkEvent::CandidatesChanged(_)));
    assert!(matches!(events[1], LinkEvent::Connected { .. }));
    assert_eq!(events[2], LinkEvent::Disconnected);
    assert!(matches!(events[3], LinkEvent::CandidatesChanged(_)));
}

#[test]
fn test_enumeration_failure_is_listed() {
    let host = two_workbooks();
    host.fail_on(Op::WorkbookPaths);
    let mut manager = manager(&host);

    let candidates = manager.discover().clone();
    assert_eq!(candidates.len(), 1);
    assert!(matches!(candidates.get(0), Some(Candidate::Unavailable(_))));
    assert!(candidates.paths().is_empty());

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_attach_failure_is_listed() {
    let host = two_workbooks();
    host.fail_on(Op::Attach);
    let mut manager = manager(&host);

    let candidates = manager.discover().clone();
    assert!(matches!(candidates.get(0), Some(Candidate::Unavailable(_))));
    assert_eq!(host.acquired_handles(), 0);
}

#[test]
fn test_failed_rediscover_releases_previous_application() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    manager.discover();
    assert_eq!(host.live_handles(), 2);

    host.fail_on(Op::Attach);
    let candidates = manager.discover().clone();
    assert!(matches!(candidates.get(0), Some(Candidate::Unavailable(_))));
    assert_eq!(host.live_handles(), 0);

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_bind_failure_releases_handles() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    manager.discover();
    host.fail_on(Op::ActiveSheet);

    assert!(manager.bind_path("A.xlsx").is_err());
    assert!(!manager.is_connected());

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_subscribe_failure_drops_previous_connection() {
    let host = two_workbooks();
    let (mut manager, events) = recording(&host);
    manager.discover();
    manager.bind_path("A.xlsx").unwrap();
    host.fail_on(Op::Subscribe);

    assert!(manager.bind_path("B.xlsx").is_err());
    assert!(!manager.is_connected());
    assert_eq!(events.lock().unwrap().last(), Some(&LinkEvent::Disconnected));

    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_failed_release_still_clears_slots() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    manager.discover();
    manager.bind_path("A.xlsx").unwrap();
    host.fail_on(Op::Release);

    manager.disconnect();
    assert!(!manager.is_connected());
    host.clear_failures();
    manager.disconnect();
    assert_clean(&host);
}

#[test]
fn test_observer_sees_lifecycle() {
    let host = two_workbooks();
    let (mut manager, events) = recording(&host);

    manager.discover();
    manager.bind_path("B.xlsx").unwrap();
    host.activate_sheet("B.xlsx", "Sheet3");
    host.activate_sheet("A.xlsx", "Sheet2");
    manager.disconnect();

    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 4);
    match &events[0] {
        LinkEvent::CandidatesChanged(list) => assert_eq!(list.paths(), vec!["A.xlsx", "B.xlsx"]),
        other => panic!("unexpected first event: {other:?}"),
    }
    assert_eq!(
        events[1..],
        [
            LinkEvent::Connected {
                workbook: "B.xlsx".into(),
                sheet: "Sheet1".into()
            },
            LinkEvent::SheetChanged {
                sheet: "Sheet3".into()
            },
            LinkEvent::Disconnected,
        ]
    );
}

#[test]
fn test_drop_disconnects() {
    let host = two_workbooks();
    {
        let mut manager = manager(&host);
        manager.discover();
        manager.bind_path("A.xlsx").unwrap();
        host.activate_sheet("A.xlsx", "Sheet2");
    }
    assert_clean(&host);
    // The application itself stays open: only our references are gone.
    assert!(host.is_running());
}

#[test]
fn test_activation_from_another_thread() {
    let host = two_workbooks();
    let mut manager = manager(&host);
    manager.discover();
    manager.bind_path("B.xlsx").unwrap();

    let remote = host.clone();
    std::thread::spawn(move || {
        for sheet in ["Sheet2", "Sheet3", "Sheet2"] {
            remote.activate_sheet("B.xlsx", sheet);
            remote.activate_sheet("A.xlsx", "Sheet1");
        }
    })
    .join()
    .unwrap();

    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet2"));
    manager.disconnect();
    assert_clean(&host);
}
