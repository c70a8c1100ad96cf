//! Creating a workbook from a template, and cleaning up when that fails.

use std::path::{Path, PathBuf};

use excel_link::memory::Op;
use excel_link::{ConnectionManager, LinkConfig, LinkError, MemoryHost};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const TEMPLATE_SHEETS: &[&str] = &["Quote", "Items", "Sheet1"];

/// A template file on disk plus a host that knows its contents.
fn template_host(dir: &TempDir, host: MemoryHost) -> (MemoryHost, PathBuf) {
    let path = dir.path().join("S2BTemplate.xlsx");
    std::fs::write(&path, b"template").unwrap();
    let host = host.with_file(&path, TEMPLATE_SHEETS);
    (host, path)
}

fn manager(host: &MemoryHost, template: Option<&Path>) -> ConnectionManager<MemoryHost> {
    let config = LinkConfig {
        template_path: template.map(Path::to_path_buf),
        ..Default::default()
    };
    ConnectionManager::new(host.clone(), config)
}

#[test]
fn test_launch_starts_instance_and_binds_copy() {
    let dir = TempDir::new().unwrap();
    let (host, path) = template_host(&dir, MemoryHost::new());
    let mut manager = manager(&host, Some(&path));

    manager.launch_from_default_template().unwrap();

    assert_eq!(host.launches(), 1);
    assert!(host.is_visible());
    assert!(manager.is_connected());
    assert_eq!(manager.workbook_name().as_deref(), Some("Book1"));
    // Template closed, only the new workbook remains.
    assert_eq!(host.open_workbooks(), vec!["Book1"]);
    // The placeholder sheet is gone; the template's own "Sheet1" was copied as "Sheet1 (2)".
    assert_eq!(
        host.sheets_of("Book1").unwrap(),
        vec!["Quote", "Items", "Sheet1 (2)"]
    );
    assert_eq!(manager.sheet_name().as_deref(), Some("Sheet1 (2)"));
    assert_eq!(host.listener_count(), 1);

    host.activate_sheet("Book1", "Quote");
    assert_eq!(manager.sheet_name().as_deref(), Some("Quote"));

    manager.disconnect();
    assert_eq!(host.live_handles(), 0);
    assert_eq!(host.double_releases(), 0);
    // Disconnecting does not close the user's application.
    assert!(host.is_running());
}

#[test]
fn test_launched_workbook_tracked_after_first_save() {
    let dir = TempDir::new().unwrap();
    let (host, path) = template_host(&dir, MemoryHost::new());
    let mut manager = manager(&host, Some(&path));
    manager.launch_from_default_template().unwrap();

    let saved = dir.path().join("Quote-0001.xlsx").display().to_string();
    assert!(host.save_as("Book1", &saved));
    assert!(host.activate_sheet(&saved, "Items"));
    assert_eq!(manager.sheet_name().as_deref(), Some("Items"));
    assert_eq!(manager.workbook_name().as_deref(), Some("Quote-0001.xlsx"));

    manager.disconnect();
    assert_eq!(host.live_handles(), 0);
    assert_eq!(host.double_releases(), 0);
}

#[test]
fn test_launch_reuses_running_instance() {
    let dir = TempDir::new().unwrap();
    let (host, path) = template_host(&dir, MemoryHost::new().with_workbook("A.xlsx", &["Sheet1"]));
    let mut manager = manager(&host, None);

    manager.launch_from_template(&path).unwrap();

    assert_eq!(host.launches(), 0);
    assert_eq!(host.open_workbooks(), vec!["A.xlsx", "Book1"]);

    // Activity in the user's other workbook is not tracked.
    let tracked = manager.sheet_name();
    host.activate_sheet("A.xlsx", "Sheet1");
    assert_eq!(manager.sheet_name(), tracked);

    drop(manager);
    assert_eq!(host.live_handles(), 0);
}

#[test]
fn test_launch_replaces_existing_connection() {
    let dir = TempDir::new().unwrap();
    let (host, path) = template_host(&dir, MemoryHost::new().with_workbook("A.xlsx", &["Sheet1"]));
    let mut manager = manager(&host, Some(&path));
    manager.discover();
    manager.bind_path("A.xlsx").unwrap();

    manager.launch_from_default_template().unwrap();
    assert_eq!(manager.workbook_name().as_deref(), Some("Book1"));
    assert_eq!(host.listener_count(), 1);

    manager.disconnect();
    assert_eq!(host.live_handles(), 0);
}

#[test]
fn test_missing_template_is_fatal_without_side_effects() {
    let dir = TempDir::new().unwrap();
    let host = MemoryHost::new();
    let missing = dir.path().join("nope.xlsx");
    let mut manager = manager(&host, Some(&missing));

    let err = manager.launch_from_default_template().unwrap_err();
    assert!(matches!(err, LinkError::TemplateMissing(ref p) if p == &missing));
    assert_eq!(host.launches(), 0);
    assert_eq!(host.acquired_handles(), 0);
    assert!(!manager.is_connected());
}

#[test]
fn test_failure_after_launch_quits_instance() {
    let dir = TempDir::new().unwrap();
    let (host, path) = template_host(&dir, MemoryHost::new());
    host.fail_on(Op::CopySheets);
    let mut manager = manager(&host, Some(&path));

    let err = manager.launch_from_default_template().unwrap_err();
    assert!(matches!(err, LinkError::Host(_)));

    assert_eq!(host.launches(), 1);
    assert_eq!(host.quits(), 1);
    assert!(!host.is_running());
    assert!(!manager.is_connected());
    assert_eq!(host.live_handles(), 0);
    assert_eq!(host.double_releases(), 0);
}

#[test]
fn test_failure_at_every_step_cleans_up() {
    let steps = [
        Op::Workbooks,
        Op::OpenWorkbook,
        Op::AddWorkbook,
        Op::CopySheets,
        Op::DeleteSheet,
        Op::CloseWorkbook,
        Op::ActiveSheet,
        Op::Subscribe,
    ];
    for step in steps {
        let dir = TempDir::new().unwrap();
        let (host, path) = template_host(&dir, MemoryHost::new());
        host.fail_on(step);
        let mut manager = manager(&host, Some(&path));

        assert!(manager.launch_from_default_template().is_err(), "{step:?}");
        assert!(!manager.is_connected(), "{step:?}");
        assert!(!host.is_running(), "{step:?}: launched instance left running");
        assert_eq!(host.live_handles(), 0, "{step:?}: handles leaked");
        assert_eq!(host.double_releases(), 0, "{step:?}");
        assert_eq!(host.listener_count(), 0, "{step:?}");
    }
}

#[test]
fn test_failure_in_running_instance_keeps_it_open() {
    let dir = TempDir::new().unwrap();
    let (host, path) = template_host(&dir, MemoryHost::new().with_workbook("A.xlsx", &["Sheet1"]));
    host.fail_on(Op::CopySheets);
    let mut manager = manager(&host, Some(&path));

    assert!(manager.launch_from_default_template().is_err());
    assert!(host.is_running());
    assert_eq!(host.quits(), 0);
    // Both the template and the half-built workbook were closed unsaved.
    assert_eq!(host.open_workbooks(), vec!["A.xlsx"]);
    assert_eq!(host.live_handles(), 0);
}
