//! In-memory [`ExcelHost`] for tests and dry runs.
//!
//! Models just enough of a spreadsheet application to exercise the
//! connection manager: a running or stopped instance, open workbooks with
//! ordered sheets and an active sheet, workbook files on "disk", a handle
//! table that counts live handles and catches double releases, and
//! `SheetActivate` listeners.
//!
//! Clones share the same application, so a test can keep one clone for
//! inspection after handing another to the manager.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{HostError, HostResult};
use crate::handle::{kind, Handle, HandleKind, RawHandle};
use crate::host::{ActivationListener, ExcelHost, SheetActivation, SubscriptionId, WorkbookName};

/// Host operations that can be made to fail with [`MemoryHost::fail_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Attach,
    Launch,
    Workbooks,
    WorkbookPaths,
    FindWorkbook,
    OpenWorkbook,
    AddWorkbook,
    ActivateWorkbook,
    ActiveSheet,
    CopySheets,
    DeleteSheet,
    CloseWorkbook,
    Subscribe,
    Unsubscribe,
    Quit,
    Release,
}

#[derive(Debug, Clone)]
enum Target {
    App,
    Books,
    Book(String),
    Sheet { name: String },
}

impl Target {
    fn label(&self) -> &'static str {
        match self {
            Target::App => kind::App::LABEL,
            Target::Books => kind::Books::LABEL,
            Target::Book(_) => kind::Book::LABEL,
            Target::Sheet { .. } => kind::Sheet::LABEL,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryWorkbook {
    full_name: String,
    sheets: Vec<String>,
    active: usize,
}

impl MemoryWorkbook {
    fn new(full_name: impl Into<String>, sheets: &[&str]) -> Self {
        Self {
            full_name: full_name.into(),
            sheets: sheets.iter().map(|s| s.to_string()).collect(),
            active: 0,
        }
    }

    fn active_sheet(&self) -> Option<&str> {
        self.sheets.get(self.active).map(String::as_str)
    }

    /// Name for a copy of `name`, following the `Sheet1 (2)` convention.
    fn unique_sheet_name(&self, name: &str) -> String {
        if !self.sheets.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            return name.to_string();
        }
        (2..)
            .map(|n| format!("{name} ({n})"))
            .find(|candidate| !self.sheets.iter().any(|s| s.eq_ignore_ascii_case(candidate)))
            .unwrap_or_else(|| name.to_string())
    }
}

#[derive(Default)]
struct World {
    running: bool,
    visible: bool,
    workbooks: Vec<MemoryWorkbook>,
    files: HashMap<PathBuf, Vec<String>>,
    untitled: usize,
    handles: HashMap<u64, Target>,
    next_handle: u64,
    acquired: usize,
    release_log: Vec<RawHandle>,
    double_releases: usize,
    listeners: Vec<(SubscriptionId, ActivationListener)>,
    next_subscription: u64,
    failures: HashSet<Op>,
    launches: usize,
    quits: usize,
}

impl World {
    fn check(&self, op: Op) -> HostResult<()> {
        if self.failures.contains(&op) {
            return Err(HostError::operation(op_name(op), "injected failure"));
        }
        Ok(())
    }

    fn issue<K: HandleKind>(&mut self, target: Target) -> Handle<K> {
        self.next_handle += 1;
        self.acquired += 1;
        self.handles.insert(self.next_handle, target);
        Handle::from_raw(RawHandle(self.next_handle))
    }

    fn target(&self, raw: RawHandle) -> HostResult<&Target> {
        self.handles.get(&raw.0).ok_or(HostError::InvalidHandle(raw.0))
    }

    fn expect_app(&self, raw: RawHandle) -> HostResult<()> {
        match self.target(raw)? {
            Target::App if self.running => Ok(()),
            Target::App => Err(HostError::Unavailable("application has quit".into())),
            other => Err(wrong_kind(raw, other)),
        }
    }

    fn expect_books(&self, raw: RawHandle) -> HostResult<()> {
        match self.target(raw)? {
            Target::Books if self.running => Ok(()),
            Target::Books => Err(HostError::Unavailable("application has quit".into())),
            other => Err(wrong_kind(raw, other)),
        }
    }

    fn book_index(&self, raw: RawHandle) -> HostResult<usize> {
        match self.target(raw)? {
            Target::Book(full_name) => self
                .workbooks
                .iter()
                .position(|wb| &wb.full_name == full_name)
                .ok_or_else(|| {
                    HostError::operation("Workbook", format!("'{full_name}' is no longer open"))
                }),
            other => Err(wrong_kind(raw, other)),
        }
    }

    fn book(&self, raw: RawHandle) -> HostResult<&MemoryWorkbook> {
        let idx = self.book_index(raw)?;
        Ok(&self.workbooks[idx])
    }

    fn book_mut(&mut self, raw: RawHandle) -> HostResult<&mut MemoryWorkbook> {
        let idx = self.book_index(raw)?;
        Ok(&mut self.workbooks[idx])
    }
}

fn wrong_kind(raw: RawHandle, target: &Target) -> HostError {
    HostError::operation(
        "handle",
        format!("{raw} refers to a {}", target.label()),
    )
}

fn op_name(op: Op) -> &'static str {
    match op {
        Op::Attach => "GetActiveObject",
        Op::Launch => "CreateObject",
        Op::Workbooks => "Application.Workbooks",
        Op::WorkbookPaths => "Workbooks enumeration",
        Op::FindWorkbook => "Workbooks lookup",
        Op::OpenWorkbook => "Workbooks.Open",
        Op::AddWorkbook => "Workbooks.Add",
        Op::ActivateWorkbook => "Workbook.Activate",
        Op::ActiveSheet => "Workbook.ActiveSheet",
        Op::CopySheets => "Worksheet.Copy",
        Op::DeleteSheet => "Worksheet.Delete",
        Op::CloseWorkbook => "Workbook.Close",
        Op::Subscribe => "Advise",
        Op::Unsubscribe => "Unadvise",
        Op::Quit => "Application.Quit",
        Op::Release => "Release",
    }
}

/// Short name of a workbook from its full path.
fn short_name(full_name: &str) -> &str {
    full_name
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(full_name)
}

/// A simulated spreadsheet application.
#[derive(Clone, Default)]
pub struct MemoryHost {
    world: Arc<Mutex<World>>,
}

impl MemoryHost {
    /// No instance running, no files.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the application as running.
    pub fn with_running_instance(self) -> Self {
        self.lock().running = true;
        self
    }

    /// Open a workbook in the running instance (starting it if needed).
    /// The first sheet is active.
    pub fn with_workbook(self, full_name: &str, sheets: &[&str]) -> Self {
        {
            let mut world = self.lock();
            world.running = true;
            world.workbooks.push(MemoryWorkbook::new(full_name, sheets));
        }
        self
    }

    /// Register a workbook file that `open_workbook` can load.
    pub fn with_file(self, path: impl Into<PathBuf>, sheets: &[&str]) -> Self {
        self.lock().files.insert(
            path.into(),
            sheets.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Make every later call of `op` fail.
    pub fn fail_on(&self, op: Op) {
        self.lock().failures.insert(op);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    /// Simulate the user closing the application.
    pub fn shut_down(&self) {
        let mut world = self.lock();
        world.running = false;
        world.workbooks.clear();
        world.listeners.clear();
    }

    /// Full paths of the open workbooks.
    pub fn open_workbooks(&self) -> Vec<String> {
        self.lock()
            .workbooks
            .iter()
            .map(|wb| wb.full_name.clone())
            .collect()
    }

    /// Sheet names of an open workbook.
    pub fn sheets_of(&self, full_name: &str) -> Option<Vec<String>> {
        self.lock()
            .workbooks
            .iter()
            .find(|wb| wb.full_name == full_name)
            .map(|wb| wb.sheets.clone())
    }

    /// Number of handles issued and not yet released.
    pub fn live_handles(&self) -> usize {
        self.lock().handles.len()
    }

    /// Number of handles ever issued.
    pub fn acquired_handles(&self) -> usize {
        self.lock().acquired
    }

    /// Every successfully released handle, in release order.
    pub fn release_log(&self) -> Vec<RawHandle> {
        self.lock().release_log.clone()
    }

    /// Number of `release` calls for handles that were not live.
    pub fn double_releases(&self) -> usize {
        self.lock().double_releases
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn launches(&self) -> usize {
        self.lock().launches
    }

    pub fn quits(&self) -> usize {
        self.lock().quits
    }

    /// Simulate the user saving an open workbook under a new path.
    ///
    /// Handles to the workbook stay valid. Returns false if it is not open.
    pub fn save_as(&self, full_name: &str, new_full_name: &str) -> bool {
        let mut world = self.lock();
        let Some(wb) = world
            .workbooks
            .iter_mut()
            .find(|wb| wb.full_name == full_name)
        else {
            return false;
        };
        wb.full_name = new_full_name.to_string();
        for target in world.handles.values_mut() {
            if let Target::Book(name) = target {
                if name == full_name {
                    *name = new_full_name.to_string();
                }
            }
        }
        true
    }

    /// Simulate the user clicking a sheet tab.
    ///
    /// Makes the sheet active and notifies every listener on the calling
    /// thread. Returns false if the workbook or sheet does not exist.
    pub fn activate_sheet(&self, workbook: &str, sheet: &str) -> bool {
        let deliveries = {
            let mut world = self.lock();
            let Some(wb) = world
                .workbooks
                .iter_mut()
                .find(|wb| wb.full_name == workbook)
            else {
                return false;
            };
            let Some(idx) = wb.sheets.iter().position(|s| s == sheet) else {
                return false;
            };
            wb.active = idx;

            let listeners: Vec<ActivationListener> = world
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            listeners
                .into_iter()
                .map(|listener| {
                    let handle = world.issue::<kind::Sheet>(Target::Sheet {
                        name: sheet.to_string(),
                    });
                    (listener, handle)
                })
                .collect::<Vec<_>>()
        };

        for (listener, handle) in deliveries {
            listener(SheetActivation {
                sheet: handle,
                sheet_name: sheet.to_string(),
                workbook: workbook.to_string(),
            });
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExcelHost for MemoryHost {
    fn attach(&self) -> HostResult<Option<Handle<kind::App>>> {
        let mut world = self.lock();
        if world.failures.contains(&Op::Attach) {
            return Err(HostError::Unavailable("injected failure".into()));
        }
        if !world.running {
            return Ok(None);
        }
        Ok(Some(world.issue(Target::App)))
    }

    fn launch(&self, visible: bool) -> HostResult<Handle<kind::App>> {
        let mut world = self.lock();
        world.check(Op::Launch)?;
        world.running = true;
        world.visible = visible;
        world.launches += 1;
        Ok(world.issue(Target::App))
    }

    fn workbooks(&self, app: &Handle<kind::App>) -> HostResult<Handle<kind::Books>> {
        let mut world = self.lock();
        world.check(Op::Workbooks)?;
        world.expect_app(app.raw())?;
        Ok(world.issue(Target::Books))
    }

    fn workbook_paths(&self, books: &Handle<kind::Books>) -> HostResult<Vec<String>> {
        let world = self.lock();
        world.check(Op::WorkbookPaths)?;
        world.expect_books(books.raw())?;
        Ok(world.workbooks.iter().map(|wb| wb.full_name.clone()).collect())
    }

    fn find_workbook(
        &self,
        books: &Handle<kind::Books>,
        full_name: &str,
    ) -> HostResult<Option<Handle<kind::Book>>> {
        let mut world = self.lock();
        world.check(Op::FindWorkbook)?;
        world.expect_books(books.raw())?;
        if !world.workbooks.iter().any(|wb| wb.full_name == full_name) {
            return Ok(None);
        }
        Ok(Some(world.issue(Target::Book(full_name.to_string()))))
    }

    fn open_workbook(
        &self,
        books: &Handle<kind::Books>,
        path: &Path,
        _read_only: bool,
    ) -> HostResult<Handle<kind::Book>> {
        let mut world = self.lock();
        world.check(Op::OpenWorkbook)?;
        world.expect_books(books.raw())?;
        let full_name = path.display().to_string();
        if !world.workbooks.iter().any(|wb| wb.full_name == full_name) {
            let sheets = world.files.get(path).cloned().ok_or_else(|| {
                HostError::operation(op_name(Op::OpenWorkbook), format!("'{full_name}' not found"))
            })?;
            world.workbooks.push(MemoryWorkbook {
                full_name: full_name.clone(),
                sheets,
                active: 0,
            });
        }
        Ok(world.issue(Target::Book(full_name)))
    }

    fn add_workbook(&self, books: &Handle<kind::Books>) -> HostResult<Handle<kind::Book>> {
        let mut world = self.lock();
        world.check(Op::AddWorkbook)?;
        world.expect_books(books.raw())?;
        world.untitled += 1;
        let full_name = format!("Book{}", world.untitled);
        world
            .workbooks
            .push(MemoryWorkbook::new(full_name.clone(), &["Sheet1"]));
        Ok(world.issue(Target::Book(full_name)))
    }

    fn activate_workbook(&self, book: &Handle<kind::Book>) -> HostResult<()> {
        let mut world = self.lock();
        world.check(Op::ActivateWorkbook)?;
        let idx = world.book_index(book.raw())?;
        let wb = world.workbooks.remove(idx);
        world.workbooks.insert(0, wb);
        Ok(())
    }

    fn workbook_name(&self, book: &Handle<kind::Book>) -> HostResult<WorkbookName> {
        let world = self.lock();
        let wb = world.book(book.raw())?;
        Ok(WorkbookName {
            name: short_name(&wb.full_name).to_string(),
            full_name: wb.full_name.clone(),
        })
    }

    fn active_sheet(&self, book: &Handle<kind::Book>) -> HostResult<Handle<kind::Sheet>> {
        let mut world = self.lock();
        world.check(Op::ActiveSheet)?;
        let name = world
            .book(book.raw())?
            .active_sheet()
            .map(str::to_string)
            .ok_or_else(|| HostError::operation(op_name(Op::ActiveSheet), "workbook has no sheets"))?;
        Ok(world.issue(Target::Sheet { name }))
    }

    fn sheet_name(&self, sheet: &Handle<kind::Sheet>) -> HostResult<String> {
        let world = self.lock();
        match world.target(sheet.raw())? {
            Target::Sheet { name } => Ok(name.clone()),
            other => Err(wrong_kind(sheet.raw(), other)),
        }
    }

    fn sheet_names(&self, book: &Handle<kind::Book>) -> HostResult<Vec<String>> {
        let world = self.lock();
        Ok(world.book(book.raw())?.sheets.clone())
    }

    fn copy_sheets(&self, from: &Handle<kind::Book>, to: &Handle<kind::Book>) -> HostResult<()> {
        let mut world = self.lock();
        world.check(Op::CopySheets)?;
        let source = world.book(from.raw())?.sheets.clone();
        let target = world.book_mut(to.raw())?;
        for name in source {
            let copy = target.unique_sheet_name(&name);
            target.sheets.push(copy);
            target.active = target.sheets.len() - 1;
        }
        Ok(())
    }

    fn delete_sheet(&self, book: &Handle<kind::Book>, name: &str) -> HostResult<()> {
        let mut world = self.lock();
        world.check(Op::DeleteSheet)?;
        let wb = world.book_mut(book.raw())?;
        let idx = wb
            .sheets
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| HostError::operation(op_name(Op::DeleteSheet), format!("no sheet '{name}'")))?;
        if wb.sheets.len() == 1 {
            return Err(HostError::operation(
                op_name(Op::DeleteSheet),
                "a workbook must contain at least one visible worksheet",
            ));
        }
        wb.sheets.remove(idx);
        if wb.active >= wb.sheets.len() || wb.active > idx {
            wb.active = wb.active.saturating_sub(1);
        }
        Ok(())
    }

    fn close_workbook(&self, book: &Handle<kind::Book>, _save: bool) -> HostResult<()> {
        let mut world = self.lock();
        world.check(Op::CloseWorkbook)?;
        let idx = world.book_index(book.raw())?;
        world.workbooks.remove(idx);
        Ok(())
    }

    fn subscribe(
        &self,
        app: &Handle<kind::App>,
        listener: ActivationListener,
    ) -> HostResult<SubscriptionId> {
        let mut world = self.lock();
        world.check(Op::Subscribe)?;
        world.expect_app(app.raw())?;
        world.next_subscription += 1;
        let id = SubscriptionId(world.next_subscription);
        world.listeners.push((id, listener));
        Ok(id)
    }

    fn unsubscribe(&self, app: &Handle<kind::App>, id: SubscriptionId) -> HostResult<()> {
        let mut world = self.lock();
        world.check(Op::Unsubscribe)?;
        world.target(app.raw())?;
        let before = world.listeners.len();
        world.listeners.retain(|(sub, _)| *sub != id);
        if world.listeners.len() == before && world.running {
            return Err(HostError::operation(
                op_name(Op::Unsubscribe),
                format!("no subscription {id}"),
            ));
        }
        Ok(())
    }

    fn quit(&self, app: &Handle<kind::App>) -> HostResult<()> {
        let mut world = self.lock();
        world.check(Op::Quit)?;
        world.expect_app(app.raw())?;
        world.running = false;
        world.workbooks.clear();
        world.listeners.clear();
        world.quits += 1;
        Ok(())
    }

    fn release(&self, raw: RawHandle) -> HostResult<()> {
        let mut world = self.lock();
        if world.handles.remove(&raw.0).is_none() {
            world.double_releases += 1;
            return Err(HostError::InvalidHandle(raw.0));
        }
        world.release_log.push(raw);
        // The reference is gone even when the release call reports a failure.
        world.check(Op::Release)
    }
}
