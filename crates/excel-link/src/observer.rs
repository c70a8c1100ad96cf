//! Push notifications for whoever displays the connection state.

use crate::candidate::CandidateList;

/// A change in the manager's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Discovery finished and replaced the candidate list.
    CandidatesChanged(CandidateList),
    /// A workbook was bound.
    Connected { workbook: String, sheet: String },
    /// The bound workbook was saved under a new name.
    WorkbookRenamed { workbook: String },
    /// The tracked sheet of the bound workbook changed.
    SheetChanged { sheet: String },
    /// The connection was torn down.
    Disconnected,
}

/// Receives [`LinkEvent`]s.
///
/// Called without any manager lock held, but possibly from the host's
/// notification thread.
pub trait LinkObserver: Send + Sync {
    fn on_event(&self, event: &LinkEvent);
}

impl<F> LinkObserver for F
where
    F: Fn(&LinkEvent) + Send + Sync,
{
    fn on_event(&self, event: &LinkEvent) {
        self(event)
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LinkObserver for NoopObserver {
    fn on_event(&self, _event: &LinkEvent) {}
}

/// Point-in-time copy of the observable state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub connected: bool,
    pub workbook_name: Option<String>,
    pub sheet_name: Option<String>,
    pub candidates: CandidateList,
}
