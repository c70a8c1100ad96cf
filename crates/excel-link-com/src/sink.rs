//! Event sink for Excel's `AppEvents` dispinterface.
//!
//! Excel calls `IDispatch::Invoke` on the sink with the event's DISPID. Only
//! `SheetActivate(Sh)` is handled; every other event is acknowledged and
//! ignored.

#![allow(non_snake_case)]

use windows::{
    core::{implement, interface, IUnknown, Interface, Result as WinResult, GUID, PCWSTR},
    Win32::{
        Foundation::E_NOTIMPL,
        System::{
            Com::{IDispatch, IDispatch_Impl, ITypeInfo, DISPATCH_FLAGS, DISPPARAMS, EXCEPINFO},
            Variant::VARIANT,
        },
    },
};

use crate::dispatch::{variant_get_dispatch, DispatchObject};

/// `Application.SheetActivate(ByVal Sh As Object)`
const DISPID_SHEET_ACTIVATE: i32 = 0x619;

#[interface("00024413-0000-0000-C000-000000000046")]
pub(crate) unsafe trait AppEvents: IDispatch {}

/// Interface ID of the connection point to advise on.
pub(crate) const APP_EVENTS_IID: GUID = AppEvents::IID;

#[implement(AppEvents)]
struct SheetActivateSink {
    on_activate: Box<dyn Fn(DispatchObject)>,
}

/// Build a sink that hands every activated sheet to `on_activate`.
pub(crate) fn sheet_activate_sink(on_activate: impl Fn(DispatchObject) + 'static) -> IUnknown {
    let sink: AppEvents = SheetActivateSink {
        on_activate: Box::new(on_activate),
    }
    .into();
    sink.into()
}

impl IDispatch_Impl for SheetActivateSink_Impl {
    fn GetTypeInfoCount(&self) -> WinResult<u32> {
        Ok(0)
    }

    fn GetTypeInfo(&self, _itinfo: u32, _lcid: u32) -> WinResult<ITypeInfo> {
        Err(E_NOTIMPL.into())
    }

    fn GetIDsOfNames(
        &self,
        _riid: *const GUID,
        _names: *const PCWSTR,
        _count: u32,
        _lcid: u32,
        _dispids: *mut i32,
    ) -> WinResult<()> {
        Err(E_NOTIMPL.into())
    }

    fn Invoke(
        &self,
        dispid: i32,
        _riid: *const GUID,
        _lcid: u32,
        _flags: DISPATCH_FLAGS,
        params: *const DISPPARAMS,
        _result: *mut VARIANT,
        _excepinfo: *mut EXCEPINFO,
        _argerr: *mut u32,
    ) -> WinResult<()> {
        if dispid != DISPID_SHEET_ACTIVATE || params.is_null() {
            return Ok(());
        }
        // SAFETY: Excel passes a valid DISPPARAMS for the duration of the call.
        let params = unsafe { &*params };
        if params.cArgs < 1 || params.rgvarg.is_null() {
            return Ok(());
        }
        let sheet = unsafe { &*params.rgvarg };
        if let Some(disp) = variant_get_dispatch(sheet) {
            (self.on_activate)(DispatchObject::from_idispatch(disp));
        }
        Ok(())
    }
}

impl AppEvents_Impl for SheetActivateSink_Impl {}
