//! Windows COM backend for `excel-link`.
//!
//! [`ComHost`] drives `Excel.Application` through late-bound `IDispatch`
//! calls and receives `SheetActivate` through the application's `AppEvents`
//! connection point. Events arrive only while the owning thread pumps
//! messages, see [`excel_link::ExcelHost::pump_events`].
//!
//! On other platforms this crate is empty; use `excel_link::MemoryHost`.

#[cfg(windows)]
mod dispatch;
#[cfg(windows)]
mod host;
#[cfg(windows)]
mod sink;

#[cfg(windows)]
pub use host::{ComHost, EXCEL_PROG_ID};
