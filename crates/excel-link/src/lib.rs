//! Attach to a running Excel instance, follow the sheet the user has active,
//! and release every COM reference on the way out.
//!
//! The [`ConnectionManager`] is the whole lifecycle: it discovers the running
//! application, binds one of its open workbooks, tracks `SheetActivate`
//! notifications for that workbook only, and tears everything down in a fixed
//! order. It talks to the application through the [`ExcelHost`] trait;
//! `excel-link-com` implements it over COM on Windows and [`MemoryHost`]
//! simulates it everywhere else.
//!
//! # Architecture
//!
//! ```text
//! UI shell
//!     └── ConnectionManager (this crate)     ── LinkEvent ──> LinkObserver
//!           └── ExcelHost
//!                 ├── ComHost (excel-link-com): Excel.Application over IDispatch
//!                 └── MemoryHost: in-process simulation
//! ```
//!
//! # Example
//!
//! ```rust
//! use excel_link::{BindOutcome, ConnectionManager, LinkConfig, MemoryHost};
//!
//! let host = MemoryHost::new()
//!     .with_workbook("A.xlsx", &["Sheet1"])
//!     .with_workbook("B.xlsx", &["Sheet1", "Sheet2"]);
//! let mut manager = ConnectionManager::new(host.clone(), LinkConfig::default());
//!
//! let candidates = manager.discover().clone();
//! assert_eq!(candidates.paths(), vec!["A.xlsx", "B.xlsx"]);
//!
//! let outcome = manager.bind_path("B.xlsx")?;
//! assert!(matches!(outcome, BindOutcome::Bound { .. }));
//!
//! host.activate_sheet("B.xlsx", "Sheet2");
//! assert_eq!(manager.sheet_name().as_deref(), Some("Sheet2"));
//!
//! manager.disconnect();
//! assert_eq!(host.live_handles(), 0);
//! # Ok::<(), excel_link::LinkError>(())
//! ```

pub mod candidate;
pub mod config;
pub mod error;
pub mod handle;
pub mod host;
pub mod manager;
pub mod memory;
pub mod observer;

pub use candidate::{Candidate, CandidateList};
pub use config::LinkConfig;
pub use error::{HostError, HostResult, LinkError, Result};
pub use handle::{kind, Handle, RawHandle};
pub use host::{ActivationListener, ExcelHost, SheetActivation, SubscriptionId, WorkbookName};
pub use manager::{BindOutcome, ConnectionManager};
pub use memory::MemoryHost;
pub use observer::{LinkEvent, LinkObserver, LinkSnapshot, NoopObserver};
