//! Owned references to objects living in the external application.
//!
//! A host hands out a [`Handle`] for every object the manager asks for. The
//! handle is move-only and is consumed by [`Handle::release`], so a handle can
//! be released at most once. Dropping one that was never released is a leak
//! and gets logged.

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;

use crate::error::HostResult;
use crate::host::ExcelHost;

/// Host-assigned identifier of a native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(pub u64);

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marker types for the kinds of native object a [`Handle`] can refer to.
pub mod kind {
    /// The application instance (`Excel.Application`).
    #[derive(Debug)]
    pub enum App {}
    /// The application's open-document collection (`Application.Workbooks`).
    #[derive(Debug)]
    pub enum Books {}
    /// One open workbook.
    #[derive(Debug)]
    pub enum Book {}
    /// One worksheet inside a workbook.
    #[derive(Debug)]
    pub enum Sheet {}
}

/// Label used in log output for each handle kind.
pub trait HandleKind {
    const LABEL: &'static str;
}

impl HandleKind for kind::App {
    const LABEL: &'static str = "application";
}

impl HandleKind for kind::Books {
    const LABEL: &'static str = "workbook collection";
}

impl HandleKind for kind::Book {
    const LABEL: &'static str = "workbook";
}

impl HandleKind for kind::Sheet {
    const LABEL: &'static str = "worksheet";
}

/// An owned reference to a native object of kind `K`.
#[must_use = "native handles must be released through the host"]
pub struct Handle<K: HandleKind> {
    raw: RawHandle,
    _kind: PhantomData<fn() -> K>,
}

impl<K: HandleKind> Handle<K> {
    /// Wrap a host-assigned identifier. Only host backends should call this,
    /// once per acquired native reference.
    pub fn from_raw(raw: RawHandle) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Give the underlying reference back to the host.
    pub fn release<H: ExcelHost + ?Sized>(self, host: &H) -> HostResult<()> {
        let raw = self.into_raw();
        tracing::trace!("Releasing {} {raw}", K::LABEL);
        host.release(raw)
    }

    /// Release, logging instead of returning a failure. The handle is gone
    /// either way.
    pub(crate) fn release_logged<H: ExcelHost + ?Sized>(self, host: &H) {
        let raw = self.raw;
        if let Err(e) = self.release(host) {
            tracing::warn!("Failed to release {} {raw}: {e}", K::LABEL);
        }
    }

    /// A non-owning view for a host call made after the owner's lock is
    /// gone. It is never released and must not outlive the owner.
    pub(crate) fn alias(&self) -> ManuallyDrop<Self> {
        ManuallyDrop::new(Self::from_raw(self.raw))
    }

    fn into_raw(self) -> RawHandle {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }
}

impl<K: HandleKind> Drop for Handle<K> {
    fn drop(&mut self) {
        tracing::warn!("Leaked {} handle {}", K::LABEL, self.raw);
    }
}

impl<K: HandleKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({})", K::LABEL, self.raw)
    }
}

/// Release an optional slot, leaving it empty.
pub(crate) fn release_slot<K: HandleKind, H: ExcelHost + ?Sized>(
    slot: &mut Option<Handle<K>>,
    host: &H,
) {
    if let Some(handle) = slot.take() {
        handle.release_logged(host);
    }
}
