//! [`ExcelHost`] over COM automation of `Excel.Application`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use excel_link::handle::HandleKind;
use excel_link::{
    kind, ActivationListener, ExcelHost, Handle, HostError, HostResult, RawHandle,
    SheetActivation, SubscriptionId, WorkbookName,
};
use tracing::{debug, error, info, warn};
use windows::{
    core::Interface,
    Win32::{
        System::Com::{
            CoInitializeEx, CoUninitialize, IConnectionPoint, IConnectionPointContainer,
            COINIT_APARTMENTTHREADED,
        },
        UI::WindowsAndMessaging::{DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE},
    },
};

use crate::dispatch::{
    variant_bool, variant_dispatch, variant_i32, variant_missing, variant_str, DispatchObject,
};
use crate::sink::{sheet_activate_sink, APP_EVENTS_IID};

/// ProgID of the Excel automation server.
pub const EXCEL_PROG_ID: &str = "Excel.Application";

const PUMP_INTERVAL: Duration = Duration::from_millis(10);

struct Subscription {
    point: IConnectionPoint,
    cookie: u32,
}

/// Handle table: every COM reference handed out as a [`Handle`] lives here
/// until it is released.
#[derive(Default)]
struct ComState {
    objects: HashMap<u64, DispatchObject>,
    next_handle: u64,
    subscriptions: HashMap<u64, Subscription>,
    next_subscription: u64,
}

impl ComState {
    fn insert<K: HandleKind>(&mut self, object: DispatchObject) -> Handle<K> {
        self.next_handle += 1;
        self.objects.insert(self.next_handle, object);
        Handle::from_raw(RawHandle(self.next_handle))
    }
}

/// Drives a local Excel instance through `IDispatch`.
///
/// COM is initialized as a single-threaded apartment on the thread that calls
/// [`ComHost::new`]. Every call must come from that thread, and that thread
/// must pump messages for `SheetActivate` to be delivered. Calls from any
/// other thread fail without touching COM.
pub struct ComHost {
    prog_id: String,
    state: Arc<Mutex<ComState>>,
    owner: ThreadId,
}

// SAFETY: COM references are only touched on `owner`; `check_thread` guards
// every entry point and `Drop` leaks rather than releasing off-thread.
unsafe impl Send for ComHost {}
unsafe impl Sync for ComHost {}

impl ComHost {
    pub fn new() -> HostResult<Self> {
        Self::with_prog_id(EXCEL_PROG_ID)
    }

    /// Automate a different server, e.g. a version-specific `Excel.Application.16`.
    pub fn with_prog_id(prog_id: impl Into<String>) -> HostResult<Self> {
        unsafe {
            CoInitializeEx(None, COINIT_APARTMENTTHREADED)
                .ok()
                .map_err(|e| HostError::Unavailable(format!("CoInitializeEx failed: {e}")))?;
        }
        debug!("COM initialized (STA)");
        Ok(Self {
            prog_id: prog_id.into(),
            state: Arc::new(Mutex::new(ComState::default())),
            owner: thread::current().id(),
        })
    }

    fn check_thread(&self) -> HostResult<()> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(HostError::Unavailable(
                "COM host used off the thread that created it".into(),
            ))
        }
    }

    fn state(&self) -> HostResult<MutexGuard<'_, ComState>> {
        self.check_thread()?;
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// A new reference to the object behind `handle`.
    ///
    /// Callers make COM calls on the clone after the table lock is gone: an
    /// outgoing STA call can dispatch `SheetActivate`, which needs the table.
    fn object<K>(&self, handle: &Handle<K>) -> HostResult<DispatchObject>
    where
        K: HandleKind,
    {
        let raw = handle.raw();
        self.state()?
            .objects
            .get(&raw.0)
            .cloned()
            .ok_or(HostError::InvalidHandle(raw.0))
    }

    fn adopt<K: HandleKind>(&self, object: DispatchObject) -> HostResult<Handle<K>> {
        Ok(self.state()?.insert(object))
    }

    fn adopt_with<K, F>(&self, operation: &'static str, f: F) -> HostResult<Handle<K>>
    where
        K: HandleKind,
        F: FnOnce() -> Result<DispatchObject, String>,
    {
        let object = f().map_err(failed(operation))?;
        self.adopt(object)
    }
}

fn failed(operation: &'static str) -> impl FnOnce(String) -> HostError {
    move |message| HostError::operation(operation, message)
}

impl ExcelHost for ComHost {
    fn attach(&self) -> HostResult<Option<Handle<kind::App>>> {
        self.check_thread()?;
        match DispatchObject::get_active(&self.prog_id).map_err(HostError::Unavailable)? {
            Some(app) => {
                debug!(prog_id = %self.prog_id, "Attached to running instance");
                self.adopt(app).map(Some)
            }
            None => Ok(None),
        }
    }

    fn launch(&self, visible: bool) -> HostResult<Handle<kind::App>> {
        self.check_thread()?;
        let app =
            DispatchObject::create_from_progid(&self.prog_id).map_err(HostError::Unavailable)?;
        if let Err(e) = app.set_property("Visible", variant_bool(visible)) {
            let _ = app.invoke_method("Quit", &[]);
            return Err(HostError::operation("launch", e));
        }
        info!(prog_id = %self.prog_id, visible, "Started new Excel instance");
        self.adopt(app)
    }

    fn workbooks(&self, app: &Handle<kind::App>) -> HostResult<Handle<kind::Books>> {
        let app = self.object(app)?;
        self.adopt_with("Application.Workbooks", || app.get_child("Workbooks"))
    }

    fn workbook_paths(&self, books: &Handle<kind::Books>) -> HostResult<Vec<String>> {
        let books = self.object(books)?;
        books
            .items()
            .and_then(|items| items.iter().map(|wb| wb.get_string("FullName")).collect())
            .map_err(failed("enumerate workbooks"))
    }

    fn find_workbook(
        &self,
        books: &Handle<kind::Books>,
        full_name: &str,
    ) -> HostResult<Option<Handle<kind::Book>>> {
        let books = self.object(books)?;
        let find = || -> Result<Option<DispatchObject>, String> {
            for wb in books.items()? {
                if wb.get_string("FullName")? == full_name {
                    return Ok(Some(wb));
                }
            }
            Ok(None)
        };
        match find().map_err(failed("find workbook"))? {
            Some(wb) => self.adopt(wb).map(Some),
            None => Ok(None),
        }
    }

    fn open_workbook(
        &self,
        books: &Handle<kind::Books>,
        path: &Path,
        read_only: bool,
    ) -> HostResult<Handle<kind::Book>> {
        let books = self.object(books)?;
        let path = path.to_string_lossy();
        self.adopt_with("Workbooks.Open", || {
            // Open(Filename, UpdateLinks, ReadOnly)
            books.invoke_child(
                "Open",
                &[variant_str(&path), variant_missing(), variant_bool(read_only)],
            )
        })
    }

    fn add_workbook(&self, books: &Handle<kind::Books>) -> HostResult<Handle<kind::Book>> {
        let books = self.object(books)?;
        self.adopt_with("Workbooks.Add", || books.invoke_child("Add", &[]))
    }

    fn activate_workbook(&self, book: &Handle<kind::Book>) -> HostResult<()> {
        self.object(book)?
            .invoke_method("Activate", &[])
            .map(drop)
            .map_err(failed("Workbook.Activate"))
    }

    fn workbook_name(&self, book: &Handle<kind::Book>) -> HostResult<WorkbookName> {
        let book = self.object(book)?;
        let read = || -> Result<WorkbookName, String> {
            Ok(WorkbookName {
                name: book.get_string("Name")?,
                full_name: book.get_string("FullName")?,
            })
        };
        read().map_err(failed("read workbook name"))
    }

    fn active_sheet(&self, book: &Handle<kind::Book>) -> HostResult<Handle<kind::Sheet>> {
        let book = self.object(book)?;
        self.adopt_with("Workbook.ActiveSheet", || book.get_child("ActiveSheet"))
    }

    fn sheet_name(&self, sheet: &Handle<kind::Sheet>) -> HostResult<String> {
        self.object(sheet)?
            .get_string("Name")
            .map_err(failed("read sheet name"))
    }

    fn sheet_names(&self, book: &Handle<kind::Book>) -> HostResult<Vec<String>> {
        let book = self.object(book)?;
        book.get_child("Worksheets")
            .and_then(|sheets| sheets.items())
            .and_then(|items| items.iter().map(|ws| ws.get_string("Name")).collect())
            .map_err(failed("list worksheets"))
    }

    fn copy_sheets(&self, from: &Handle<kind::Book>, to: &Handle<kind::Book>) -> HostResult<()> {
        let source = self.object(from)?;
        let target = self.object(to)?;
        let copy = || -> Result<(), String> {
            for sheet in source.get_child("Worksheets")?.items()? {
                let target_sheets = target.get_child("Sheets")?;
                let count = target_sheets.get_i32("Count")?;
                let last = target_sheets.get_indexed("Item", &variant_i32(count))?;
                // Copy(Before, After)
                sheet.invoke_method("Copy", &[variant_missing(), variant_dispatch(&last)])?;
            }
            Ok(())
        };
        copy().map_err(failed("Worksheet.Copy"))
    }

    fn delete_sheet(&self, book: &Handle<kind::Book>, name: &str) -> HostResult<()> {
        let book = self.object(book)?;
        let delete = || -> Result<(), String> {
            // Delete asks for confirmation unless alerts are off.
            let app = book.get_child("Application")?;
            app.set_property("DisplayAlerts", variant_bool(false))?;
            let result = book
                .get_child("Worksheets")
                .and_then(|sheets| sheets.get_indexed("Item", &variant_str(name)))
                .and_then(|sheet| sheet.invoke_method("Delete", &[]))
                .map(drop);
            let restored = app.set_property("DisplayAlerts", variant_bool(true));
            result.and(restored)
        };
        delete().map_err(failed("Worksheet.Delete"))
    }

    fn close_workbook(&self, book: &Handle<kind::Book>, save: bool) -> HostResult<()> {
        self.object(book)?
            .invoke_method("Close", &[variant_bool(save)])
            .map(drop)
            .map_err(failed("Workbook.Close"))
    }

    fn subscribe(
        &self,
        app: &Handle<kind::App>,
        listener: ActivationListener,
    ) -> HostResult<SubscriptionId> {
        let app = self.object(app)?;
        let com = |e: windows::core::Error| HostError::operation("subscribe", e.to_string());

        let container: IConnectionPointContainer = app.as_idispatch().cast().map_err(com)?;
        let point = unsafe { container.FindConnectionPoint(&APP_EVENTS_IID) }.map_err(com)?;

        let state = Arc::clone(&self.state);
        let sink = sheet_activate_sink(move |sheet: DispatchObject| {
            let details = sheet
                .get_string("Name")
                .and_then(|name| Ok((name, sheet.get_child("Parent")?.get_string("FullName")?)));
            let (sheet_name, workbook) = match details {
                Ok(details) => details,
                Err(e) => {
                    warn!(error = %e, "Ignoring SheetActivate for unreadable sheet");
                    return;
                }
            };
            let handle = state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(sheet);
            listener(SheetActivation {
                sheet: handle,
                sheet_name,
                workbook,
            });
        });
        let cookie = unsafe { point.Advise(&sink) }.map_err(com)?;

        let mut state = self.state()?;
        state.next_subscription += 1;
        let id = state.next_subscription;
        state.subscriptions.insert(id, Subscription { point, cookie });
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&self, _app: &Handle<kind::App>, id: SubscriptionId) -> HostResult<()> {
        let subscription = self
            .state()?
            .subscriptions
            .remove(&id.0)
            .ok_or(HostError::InvalidHandle(id.0))?;
        unsafe { subscription.point.Unadvise(subscription.cookie) }
            .map_err(|e| HostError::operation("unsubscribe", e.to_string()))
    }

    fn quit(&self, app: &Handle<kind::App>) -> HostResult<()> {
        self.object(app)?
            .invoke_method("Quit", &[])
            .map(drop)
            .map_err(failed("Application.Quit"))?;
        info!("Quit Excel instance");
        Ok(())
    }

    fn release(&self, raw: RawHandle) -> HostResult<()> {
        // Dropped after the guard: a proxy's Release is an outgoing call.
        let object = self.state()?.objects.remove(&raw.0);
        object.map(drop).ok_or(HostError::InvalidHandle(raw.0))
    }

    fn pump_events(&self, timeout: Duration) -> HostResult<()> {
        self.check_thread()?;
        let deadline = Instant::now() + timeout;
        loop {
            unsafe {
                let mut msg = MSG::default();
                while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                    let _ = TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(PUMP_INTERVAL));
        }
    }
}

impl Drop for ComHost {
    fn drop(&mut self) {
        if self.check_thread().is_err() {
            error!("COM host dropped off its apartment thread; leaking its references");
            std::mem::forget(Arc::clone(&self.state));
            return;
        }

        let (objects, subscriptions) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (
                std::mem::take(&mut state.objects),
                std::mem::take(&mut state.subscriptions),
            )
        };
        if !objects.is_empty() || !subscriptions.is_empty() {
            warn!(
                objects = objects.len(),
                subscriptions = subscriptions.len(),
                "Releasing COM references still held at shutdown"
            );
        }
        for subscription in subscriptions.into_values() {
            let _ = unsafe { subscription.point.Unadvise(subscription.cookie) };
        }
        drop(objects);

        unsafe { CoUninitialize() };
        debug!("COM uninitialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_unknown_handle_is_rejected() {
        let host = ComHost::new().unwrap();
        assert!(matches!(
            host.release(RawHandle(42)),
            Err(HostError::InvalidHandle(42))
        ));
    }

    #[test]
    fn test_calls_off_apartment_thread_fail() {
        let host = Arc::new(ComHost::new().unwrap());
        let remote = Arc::clone(&host);
        let result = thread::spawn(move || remote.attach().map(|app| app.is_some()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(HostError::Unavailable(_))));
    }
}
