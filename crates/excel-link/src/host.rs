//! The contract between the connection manager and a spreadsheet application.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::HostResult;
use crate::handle::{kind, Handle, RawHandle};

/// Identifies one activation-listener registration on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Display name and full path of an open workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookName {
    /// Short name, e.g. `B.xlsx`.
    pub name: String,
    /// Full path, e.g. `C:\Reports\B.xlsx`. Unsaved workbooks report their name.
    pub full_name: String,
}

/// A sheet became active somewhere in the application.
///
/// The event owns a fresh handle to the activated sheet; whoever receives it
/// is responsible for releasing it.
#[derive(Debug)]
pub struct SheetActivation {
    pub sheet: Handle<kind::Sheet>,
    pub sheet_name: String,
    /// Full path of the workbook that owns the sheet.
    pub workbook: String,
}

/// Callback invoked by the host, possibly on another thread, for every
/// `SheetActivate` notification.
pub type ActivationListener = Arc<dyn Fn(SheetActivation) + Send + Sync>;

/// A running (or launchable) spreadsheet application.
///
/// Every `Handle` a method returns is owned by the caller and must come back
/// through [`ExcelHost::release`] exactly once.
pub trait ExcelHost: Send + Sync + 'static {
    /// Attach to an already-running instance. `Ok(None)` when none is running.
    fn attach(&self) -> HostResult<Option<Handle<kind::App>>>;

    /// Start a new instance.
    fn launch(&self, visible: bool) -> HostResult<Handle<kind::App>>;

    /// The instance's open-workbook collection.
    fn workbooks(&self, app: &Handle<kind::App>) -> HostResult<Handle<kind::Books>>;

    /// Full paths of every open workbook, in the application's order.
    fn workbook_paths(&self, books: &Handle<kind::Books>) -> HostResult<Vec<String>>;

    /// Find an open workbook by full path.
    fn find_workbook(
        &self,
        books: &Handle<kind::Books>,
        full_name: &str,
    ) -> HostResult<Option<Handle<kind::Book>>>;

    fn open_workbook(
        &self,
        books: &Handle<kind::Books>,
        path: &Path,
        read_only: bool,
    ) -> HostResult<Handle<kind::Book>>;

    /// Create a new blank workbook.
    fn add_workbook(&self, books: &Handle<kind::Books>) -> HostResult<Handle<kind::Book>>;

    /// Bring the workbook to the front inside the application.
    fn activate_workbook(&self, book: &Handle<kind::Book>) -> HostResult<()>;

    fn workbook_name(&self, book: &Handle<kind::Book>) -> HostResult<WorkbookName>;

    fn active_sheet(&self, book: &Handle<kind::Book>) -> HostResult<Handle<kind::Sheet>>;

    fn sheet_name(&self, sheet: &Handle<kind::Sheet>) -> HostResult<String>;

    /// Worksheet names in tab order.
    fn sheet_names(&self, book: &Handle<kind::Book>) -> HostResult<Vec<String>>;

    /// Copy every worksheet of `from` to the end of `to`.
    fn copy_sheets(&self, from: &Handle<kind::Book>, to: &Handle<kind::Book>) -> HostResult<()>;

    fn delete_sheet(&self, book: &Handle<kind::Book>, name: &str) -> HostResult<()>;

    fn close_workbook(&self, book: &Handle<kind::Book>, save: bool) -> HostResult<()>;

    /// Register a `SheetActivate` listener on the application.
    fn subscribe(
        &self,
        app: &Handle<kind::App>,
        listener: ActivationListener,
    ) -> HostResult<SubscriptionId>;

    /// Remove a listener. Once this returns, the listener is not invoked again.
    fn unsubscribe(&self, app: &Handle<kind::App>, id: SubscriptionId) -> HostResult<()>;

    /// Terminate the application instance.
    fn quit(&self, app: &Handle<kind::App>) -> HostResult<()>;

    /// Drop the host's reference to a native object.
    fn release(&self, raw: RawHandle) -> HostResult<()>;

    /// Let the host deliver pending notifications for up to `timeout`.
    ///
    /// Hosts that deliver notifications on their own threads can keep the
    /// default, which just sleeps.
    fn pump_events(&self, timeout: Duration) -> HostResult<()> {
        std::thread::sleep(timeout);
        Ok(())
    }
}
