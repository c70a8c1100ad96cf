//! The connection manager: discovery, binding, active-sheet tracking and teardown.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::candidate::{Candidate, CandidateList};
use crate::config::LinkConfig;
use crate::error::{HostError, HostResult, LinkError, Result};
use crate::handle::{kind, release_slot, Handle};
use crate::host::{ActivationListener, ExcelHost, SheetActivation, SubscriptionId, WorkbookName};
use crate::observer::{LinkEvent, LinkObserver, LinkSnapshot, NoopObserver};

/// Outcome of [`ConnectionManager::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The workbook is now bound.
    Bound { workbook: String, sheet: String },
    /// The selection does not name a workbook.
    NoSelection,
    /// No open workbook has that path. State is unchanged.
    NotFound,
}

/// The bound workbook and its tracked sheet. Present iff connected.
struct Connection {
    book: Handle<kind::Book>,
    workbook: WorkbookName,
    sheet: Handle<kind::Sheet>,
    sheet_name: String,
}

impl Connection {
    fn release<H: ExcelHost>(self, host: &H) {
        self.sheet.release_logged(host);
        self.book.release_logged(host);
    }
}

/// State shared with the activation listener.
struct Shared<H> {
    host: H,
    connection: Mutex<Option<Connection>>,
    observer: Box<dyn LinkObserver>,
}

impl<H: ExcelHost> Shared<H> {
    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: LinkEvent) {
        self.observer.on_event(&event);
    }

    /// Handle a `SheetActivate` notification.
    ///
    /// Runs on the host's notification context. Host calls happen outside the
    /// lock, since a host may deliver another notification re-entrantly while
    /// servicing a call.
    fn on_activation(&self, event: SheetActivation) {
        let SheetActivation {
            sheet,
            sheet_name,
            workbook,
        } = event;

        // The bound workbook's path changes on Save As.
        let bound = self.lock().as_ref().map(|conn| conn.book.alias());
        let Some(book) = bound else {
            self.reject("not connected", sheet, &sheet_name, &workbook);
            return;
        };
        let current = match self.host.workbook_name(&book) {
            Ok(current) => current,
            Err(e) => {
                let reason = format!("bound workbook unreadable: {e}");
                self.reject(&reason, sheet, &sheet_name, &workbook);
                return;
            }
        };

        let mut guard = self.lock();
        let (outcome, renamed) = match guard.as_mut() {
            None => (Err(("not connected", sheet)), None),
            Some(conn) if conn.book.raw() != book.raw() => (Err(("binding changed", sheet)), None),
            Some(conn) => {
                let renamed = (conn.workbook != current).then(|| current.name.clone());
                conn.workbook = current;
                let outcome = if conn.workbook.full_name != workbook {
                    Err(("different workbook", sheet))
                } else if conn.sheet_name == sheet_name {
                    Err(("already tracked", sheet))
                } else {
                    conn.sheet_name = sheet_name.clone();
                    Ok(std::mem::replace(&mut conn.sheet, sheet))
                };
                (outcome, renamed)
            }
        };
        drop(guard);

        if let Some(name) = renamed {
            tracing::info!("Bound workbook is now '{name}'");
            self.notify(LinkEvent::WorkbookRenamed { workbook: name });
        }
        match outcome {
            Ok(previous) => {
                tracing::debug!("Tracking sheet '{sheet_name}'");
                previous.release_logged(&self.host);
                self.notify(LinkEvent::SheetChanged { sheet: sheet_name });
            }
            Err((reason, sheet)) => self.reject(reason, sheet, &sheet_name, &workbook),
        }
    }

    /// Drop an activation event, giving its sheet handle back.
    fn reject(&self, reason: &str, sheet: Handle<kind::Sheet>, sheet_name: &str, workbook: &str) {
        tracing::debug!("Ignoring activation of '{sheet_name}' in '{workbook}': {reason}");
        sheet.release_logged(&self.host);
    }
}

/// Owns the link to one running spreadsheet application.
///
/// At most one application, one bound workbook and one tracked sheet are
/// held at a time. Every handle acquired is released exactly once, by
/// [`disconnect`](Self::disconnect) at the latest, which also runs on drop.
pub struct ConnectionManager<H: ExcelHost> {
    shared: Arc<Shared<H>>,
    app: Option<Handle<kind::App>>,
    books: Option<Handle<kind::Books>>,
    subscription: Option<SubscriptionId>,
    candidates: CandidateList,
    config: LinkConfig,
}

impl<H: ExcelHost> ConnectionManager<H> {
    pub fn new(host: H, config: LinkConfig) -> Self {
        Self::with_observer(host, config, NoopObserver)
    }

    /// Create a manager that pushes state changes to `observer`.
    pub fn with_observer(host: H, config: LinkConfig, observer: impl LinkObserver + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                host,
                connection: Mutex::new(None),
                observer: Box::new(observer),
            }),
            app: None,
            books: None,
            subscription: None,
            candidates: CandidateList::new(),
            config,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().is_some()
    }

    /// Display name of the bound workbook.
    pub fn workbook_name(&self) -> Option<String> {
        self.shared.lock().as_ref().map(|c| c.workbook.name.clone())
    }

    /// Name of the tracked sheet.
    pub fn sheet_name(&self) -> Option<String> {
        self.shared.lock().as_ref().map(|c| c.sheet_name.clone())
    }

    pub fn candidates(&self) -> &CandidateList {
        &self.candidates
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        let guard = self.shared.lock();
        LinkSnapshot {
            connected: guard.is_some(),
            workbook_name: guard.as_ref().map(|c| c.workbook.name.clone()),
            sheet_name: guard.as_ref().map(|c| c.sheet_name.clone()),
            candidates: self.candidates.clone(),
        }
    }

    /// Let the host deliver pending notifications for up to `timeout`.
    pub fn pump_events(&self, timeout: std::time::Duration) -> Result<()> {
        self.shared.host.pump_events(timeout)?;
        Ok(())
    }

    /// Find the running application and list its open workbooks.
    ///
    /// Whatever the manager held before is released first, including a
    /// bound workbook. No running application is not an error: the list is
    /// simply empty.
    pub fn discover(&mut self) -> &CandidateList {
        self.teardown();

        self.candidates = match self.attach_and_list() {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("Listing Excel workbooks failed: {e}");
                CandidateList::unavailable(e.to_string())
            }
        };
        tracing::info!("Discovered {} workbook candidate(s)", self.candidates.paths().len());
        self.shared
            .notify(LinkEvent::CandidatesChanged(self.candidates.clone()));
        &self.candidates
    }

    fn attach_and_list(&mut self) -> HostResult<CandidateList> {
        let host = &self.shared.host;
        let Some(app) = host.attach()? else {
            tracing::debug!("No running Excel instance");
            return Ok(CandidateList::new());
        };
        let books = match host.workbooks(&app) {
            Ok(books) => books,
            Err(e) => {
                app.release_logged(host);
                return Err(e);
            }
        };
        let paths = host.workbook_paths(&books);
        self.app = Some(app);
        self.books = Some(books);
        Ok(CandidateList::from_paths(paths?))
    }

    /// Bind the workbook named by `selection` and start tracking its active sheet.
    pub fn bind(&mut self, selection: &Candidate) -> Result<BindOutcome> {
        let Some(path) = selection.path() else {
            tracing::debug!("Ignoring bind to non-workbook entry '{selection}'");
            return Ok(BindOutcome::NoSelection);
        };
        // The collection handle is only ever held together with the application.
        let Some(books) = self.books.as_ref() else {
            tracing::debug!("Cannot bind '{path}': not attached to Excel");
            return Ok(BindOutcome::NotFound);
        };

        let shared = Arc::clone(&self.shared);
        let host = &shared.host;
        let Some(book) = host.find_workbook(books, path)? else {
            tracing::debug!("Workbook '{path}' is not open");
            return Ok(BindOutcome::NotFound);
        };
        let (workbook, sheet, sheet_name) =
            match host.activate_workbook(&book).and_then(|()| capture(host, &book)) {
                Ok(captured) => captured,
                Err(e) => {
                    book.release_logged(host);
                    return Err(e.into());
                }
            };

        let listener = self.listener();
        let had_connection = self.drop_connection();
        let subscribed = match self.app.as_ref() {
            Some(app) => host.subscribe(app, listener),
            None => Err(HostError::Unavailable("application handle lost".into())),
        };
        let subscription = match subscribed {
            Ok(id) => id,
            Err(e) => {
                sheet.release_logged(host);
                book.release_logged(host);
                if had_connection {
                    shared.notify(LinkEvent::Disconnected);
                }
                return Err(e.into());
            }
        };

        tracing::info!("Bound workbook '{}' (sheet '{sheet_name}')", workbook.full_name);
        let outcome = BindOutcome::Bound {
            workbook: workbook.name.clone(),
            sheet: sheet_name.clone(),
        };
        self.install(
            Connection {
                book,
                workbook,
                sheet,
                sheet_name,
            },
            subscription,
        );
        Ok(outcome)
    }

    /// Bind a workbook by full path.
    pub fn bind_path(&mut self, path: &str) -> Result<BindOutcome> {
        self.bind(&Candidate::from(path))
    }

    /// Start from a fresh copy of the configured template.
    pub fn launch_from_default_template(&mut self) -> Result<()> {
        let template = self.config.resolved_template_path();
        self.launch_from_template(&template)
    }

    /// Create a new workbook from `template` in a running or freshly
    /// launched application and bind it.
    ///
    /// If this call launched the application and any step fails, the
    /// application is quit again before the error is returned.
    pub fn launch_from_template(&mut self, template: &Path) -> Result<()> {
        if !template.is_file() {
            return Err(LinkError::TemplateMissing(template.to_path_buf()));
        }
        self.teardown();

        let shared = Arc::clone(&self.shared);
        let host = &shared.host;
        let (app, launched) = match host.attach()? {
            Some(app) => (app, false),
            None => {
                tracing::info!("No running Excel instance, launching one");
                (host.launch(self.config.launch_visible)?, true)
            }
        };
        let books = match host.workbooks(&app) {
            Ok(books) => books,
            Err(e) => {
                abandon(host, app, launched);
                return Err(e.into());
            }
        };

        match build_from_template(host, &app, &books, template, self.listener()) {
            Ok((connection, subscription)) => {
                tracing::info!(
                    "Created '{}' from template {}",
                    connection.workbook.name,
                    template.display()
                );
                self.app = Some(app);
                self.books = Some(books);
                self.install(connection, subscription);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Launching from template {} failed: {e}", template.display());
                books.release_logged(host);
                abandon(host, app, launched);
                Err(e)
            }
        }
    }

    /// Stop tracking and release every handle. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        let torn_down = self.teardown();
        self.candidates.clear();
        if torn_down {
            tracing::info!("Disconnected from Excel");
        }
    }

    /// Release the connection, then the application. Returns whether
    /// anything was held.
    fn teardown(&mut self) -> bool {
        let had_connection = self.drop_connection();
        let had_app = self.app.is_some() || self.books.is_some();
        let host = &self.shared.host;
        release_slot(&mut self.books, host);
        release_slot(&mut self.app, host);
        if had_connection {
            self.shared.notify(LinkEvent::Disconnected);
        }
        had_connection || had_app
    }

    /// Mark the manager disconnected, remove the listener, then release the
    /// sheet and workbook. Returns whether a connection existed.
    fn drop_connection(&mut self) -> bool {
        let connection = self.shared.lock().take();
        let host = &self.shared.host;
        if let Some(id) = self.subscription.take() {
            match self.app.as_ref() {
                Some(app) => {
                    if let Err(e) = host.unsubscribe(app, id) {
                        tracing::warn!("Failed to remove activation listener {id}: {e}");
                    }
                }
                None => tracing::warn!("Activation listener {id} outlived its application"),
            }
        }
        match connection {
            Some(connection) => {
                connection.release(host);
                true
            }
            None => false,
        }
    }

    fn install(&mut self, connection: Connection, subscription: SubscriptionId) {
        let event = LinkEvent::Connected {
            workbook: connection.workbook.name.clone(),
            sheet: connection.sheet_name.clone(),
        };
        *self.shared.lock() = Some(connection);
        self.subscription = Some(subscription);
        self.shared.notify(event);
    }

    fn listener(&self) -> ActivationListener {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |event: SheetActivation| match shared.upgrade() {
            Some(shared) => shared.on_activation(event),
            None => tracing::debug!(
                "Activation of '{}' arrived after the manager was dropped",
                event.sheet_name
            ),
        })
    }
}

impl<H: ExcelHost> Drop for ConnectionManager<H> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Read the workbook's name and active sheet.
fn capture<H: ExcelHost>(
    host: &H,
    book: &Handle<kind::Book>,
) -> HostResult<(WorkbookName, Handle<kind::Sheet>, String)> {
    let workbook = host.workbook_name(book)?;
    let sheet = host.active_sheet(book)?;
    match host.sheet_name(&sheet) {
        Ok(name) => Ok((workbook, sheet, name)),
        Err(e) => {
            sheet.release_logged(host);
            Err(e)
        }
    }
}

/// Open the template, copy it into a new workbook, close the template, and
/// subscribe to activation events. On failure every workbook this opened is
/// closed unsaved and its handle released.
fn build_from_template<H: ExcelHost>(
    host: &H,
    app: &Handle<kind::App>,
    books: &Handle<kind::Books>,
    template_path: &Path,
    listener: ActivationListener,
) -> Result<(Connection, SubscriptionId)> {
    let template = host.open_workbook(books, template_path, true)?;
    let book = match host.add_workbook(books) {
        Ok(book) => book,
        Err(e) => {
            discard_workbook(host, template);
            return Err(e.into());
        }
    };

    let copied = copy_template(host, &template, &book);
    let closed = host.close_workbook(&template, false);
    template.release_logged(host);
    if let Err(e) = copied.and(closed) {
        discard_workbook(host, book);
        return Err(e.into());
    }

    let (workbook, sheet, sheet_name) = match capture(host, &book) {
        Ok(captured) => captured,
        Err(e) => {
            discard_workbook(host, book);
            return Err(e.into());
        }
    };
    match host.subscribe(app, listener) {
        Ok(subscription) => Ok((
            Connection {
                book,
                workbook,
                sheet,
                sheet_name,
            },
            subscription,
        )),
        Err(e) => {
            sheet.release_logged(host);
            discard_workbook(host, book);
            Err(e.into())
        }
    }
}

/// Append the template's sheets to `book`, then delete the sheets `book`
/// started with.
fn copy_template<H: ExcelHost>(
    host: &H,
    template: &Handle<kind::Book>,
    book: &Handle<kind::Book>,
) -> HostResult<()> {
    let placeholders = host.sheet_names(book)?;
    let template_sheets = host.sheet_names(template)?;
    host.copy_sheets(template, book)?;
    if template_sheets.is_empty() {
        return Ok(());
    }
    for name in &placeholders {
        host.delete_sheet(book, name)?;
    }
    Ok(())
}

/// Close without saving and release.
fn discard_workbook<H: ExcelHost>(host: &H, book: Handle<kind::Book>) {
    if let Err(e) = host.close_workbook(&book, false) {
        tracing::warn!("Failed to close workbook {}: {e}", book.raw());
    }
    book.release_logged(host);
}

/// Release an application handle, quitting the instance first if we started it.
fn abandon<H: ExcelHost>(host: &H, app: Handle<kind::App>, launched: bool) {
    if launched {
        tracing::info!("Quitting the Excel instance started for the template");
        if let Err(e) = host.quit(&app) {
            tracing::warn!("Failed to quit Excel: {e}");
        }
    }
    app.release_logged(host);
}
