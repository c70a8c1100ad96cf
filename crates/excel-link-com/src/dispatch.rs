//! Late-bound COM automation through `IDispatch`.
//!
//! Excel's object model is reached the way VBScript reaches it: look up a
//! member's DISPID by name, then `Invoke` it.

use std::mem::ManuallyDrop;
use std::ptr;

use windows::{
    core::{Interface, BSTR, GUID, HSTRING, PCWSTR},
    Win32::{
        Foundation::{DISP_E_EXCEPTION, DISP_E_PARAMNOTFOUND, MK_E_UNAVAILABLE, VARIANT_BOOL},
        Globalization::GetSystemDefaultLCID,
        System::{
            Com::{
                CLSIDFromProgID, CoCreateInstance, IDispatch, CLSCTX_LOCAL_SERVER, DISPATCH_FLAGS,
                DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS, EXCEPINFO,
            },
            Ole::{GetActiveObject, DISPID_PROPERTYPUT},
            Variant::{VARIANT, VT_BOOL, VT_BSTR, VT_DISPATCH, VT_EMPTY, VT_ERROR, VT_I2, VT_I4, VT_NULL},
        },
    },
};

// VARIANT wraps its unions in ManuallyDrop, so fields are set with ptr::write.

pub fn variant_bool(val: bool) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BOOL);
        ptr::write(
            &mut inner.Anonymous.boolVal,
            VARIANT_BOOL(if val { -1 } else { 0 }),
        );
        v
    }
}

pub fn variant_i32(val: i32) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_I4);
        ptr::write(&mut inner.Anonymous.lVal, val);
        v
    }
}

pub fn variant_str(val: &str) -> VARIANT {
    unsafe {
        let bstr = BSTR::from(val);
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BSTR);
        ptr::write(&mut inner.Anonymous.bstrVal, ManuallyDrop::new(bstr));
        v
    }
}

/// An object argument.
pub fn variant_dispatch(obj: &DispatchObject) -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_DISPATCH);
        ptr::write(
            &mut inner.Anonymous.pdispVal,
            ManuallyDrop::new(Some(obj.inner.clone())),
        );
        v
    }
}

/// An omitted optional argument (VB's `Type.Missing`).
pub fn variant_missing() -> VARIANT {
    unsafe {
        let mut v = VARIANT::default();
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_ERROR);
        ptr::write(&mut inner.Anonymous.scode, DISP_E_PARAMNOTFOUND.0);
        v
    }
}

pub fn variant_vt(v: &VARIANT) -> u16 {
    unsafe { v.Anonymous.Anonymous.vt.0 }
}

pub fn variant_get_i32(v: &VARIANT) -> Option<i32> {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        let anon = &v.Anonymous.Anonymous.Anonymous;
        if vt == VT_I4 {
            Some(anon.lVal)
        } else if vt == VT_I2 {
            Some(anon.iVal as i32)
        } else {
            None
        }
    }
}

pub fn variant_get_string(v: &VARIANT) -> Option<String> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_BSTR {
            let bstr = &v.Anonymous.Anonymous.Anonymous.bstrVal;
            Some(bstr.to_string())
        } else {
            None
        }
    }
}

pub fn variant_get_dispatch(v: &VARIANT) -> Option<IDispatch> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_DISPATCH {
            let opt_disp: &Option<IDispatch> = &v.Anonymous.Anonymous.Anonymous.pdispVal;
            opt_disp.clone()
        } else {
            None
        }
    }
}

pub fn variant_is_empty(v: &VARIANT) -> bool {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        vt == VT_EMPTY || vt == VT_NULL
    }
}

/// One COM reference. Dropping it calls `Release`.
#[derive(Clone)]
pub struct DispatchObject {
    inner: IDispatch,
}

impl DispatchObject {
    /// Start a new server instance for a ProgID (e.g. "Excel.Application").
    pub fn create_from_progid(progid: &str) -> Result<Self, String> {
        unsafe {
            let clsid = clsid_from_progid(progid)?;
            let disp: IDispatch = CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER)
                .map_err(|e| format!("CoCreateInstance failed for '{progid}': {e}"))?;
            Ok(Self { inner: disp })
        }
    }

    /// The instance registered in the running object table, if any.
    pub fn get_active(progid: &str) -> Result<Option<Self>, String> {
        unsafe {
            let clsid = clsid_from_progid(progid)?;
            let mut unknown = None;
            match GetActiveObject(&clsid, None, &mut unknown) {
                Ok(()) => {}
                Err(e) if e.code() == MK_E_UNAVAILABLE => return Ok(None),
                Err(e) => return Err(format!("GetActiveObject failed for '{progid}': {e}")),
            }
            let Some(unknown) = unknown else {
                return Ok(None);
            };
            let disp: IDispatch = unknown
                .cast()
                .map_err(|e| format!("'{progid}' does not expose IDispatch: {e}"))?;
            Ok(Some(Self { inner: disp }))
        }
    }

    pub fn from_idispatch(disp: IDispatch) -> Self {
        Self { inner: disp }
    }

    pub fn as_idispatch(&self) -> &IDispatch {
        &self.inner
    }

    fn get_dispid(&self, name: &str) -> Result<i32, String> {
        unsafe {
            let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
            let names = [PCWSTR(wide.as_ptr())];
            let mut dispid = 0i32;
            self.inner
                .GetIDsOfNames(
                    &GUID::zeroed(),
                    names.as_ptr(),
                    1,
                    GetSystemDefaultLCID(),
                    &mut dispid,
                )
                .map_err(|e| format!("GetIDsOfNames('{name}') failed: {e}"))?;
            Ok(dispid)
        }
    }

    fn invoke(
        &self,
        name: &str,
        flags: DISPATCH_FLAGS,
        params: &DISPPARAMS,
    ) -> Result<VARIANT, String> {
        let dispid = self.get_dispid(name)?;
        unsafe {
            let mut result = VARIANT::default();
            let mut except = EXCEPINFO::default();
            self.inner
                .Invoke(
                    dispid,
                    &GUID::zeroed(),
                    GetSystemDefaultLCID(),
                    flags,
                    params,
                    Some(&mut result),
                    Some(&mut except),
                    None,
                )
                .map_err(|e| format_invoke_error(e, &except, name))?;
            Ok(result)
        }
    }

    /// `obj.Name`
    pub fn get_property(&self, name: &str) -> Result<VARIANT, String> {
        self.invoke(name, DISPATCH_PROPERTYGET, &DISPPARAMS::default())
    }

    /// `obj.Name = value`
    pub fn set_property(&self, name: &str, value: VARIANT) -> Result<(), String> {
        let mut args = [value];
        let mut named_args = [DISPID_PROPERTYPUT];
        let params = DISPPARAMS {
            rgvarg: args.as_mut_ptr(),
            rgdispidNamedArgs: named_args.as_mut_ptr(),
            cArgs: 1,
            cNamedArgs: 1,
        };
        self.invoke(name, DISPATCH_PROPERTYPUT, &params)?;
        Ok(())
    }

    /// Call a method. Arguments are in natural order.
    pub fn invoke_method(&self, name: &str, args: &[VARIANT]) -> Result<VARIANT, String> {
        // DISPPARAMS takes arguments last-to-first.
        let mut reversed: Vec<VARIANT> = args.iter().rev().cloned().collect();
        let params = DISPPARAMS {
            rgvarg: if reversed.is_empty() {
                ptr::null_mut()
            } else {
                reversed.as_mut_ptr()
            },
            rgdispidNamedArgs: ptr::null_mut(),
            cArgs: reversed.len() as u32,
            cNamedArgs: 0,
        };
        self.invoke(name, DISPATCH_METHOD, &params)
    }

    /// A property that returns an object, e.g. `Application.Workbooks`.
    pub fn get_child(&self, name: &str) -> Result<DispatchObject, String> {
        let variant = self.get_property(name)?;
        extract_dispatch(&variant, name)
    }

    /// A method that returns an object, e.g. `Workbooks.Add()`.
    pub fn invoke_child(&self, name: &str, args: &[VARIANT]) -> Result<DispatchObject, String> {
        let variant = self.invoke_method(name, args)?;
        extract_dispatch(&variant, name)
    }

    /// An indexed property, e.g. `Worksheets.Item(1)`.
    pub fn get_indexed(&self, name: &str, index: &VARIANT) -> Result<DispatchObject, String> {
        let mut args = [index.clone()];
        let params = DISPPARAMS {
            rgvarg: args.as_mut_ptr(),
            rgdispidNamedArgs: ptr::null_mut(),
            cArgs: 1,
            cNamedArgs: 0,
        };
        let result = self.invoke(name, DISPATCH_PROPERTYGET, &params)?;
        extract_dispatch(&result, name)
    }

    pub fn get_string(&self, name: &str) -> Result<String, String> {
        let variant = self.get_property(name)?;
        variant_get_string(&variant).ok_or_else(|| {
            format!("'{name}' returned VT={}, expected a string", variant_vt(&variant))
        })
    }

    pub fn get_i32(&self, name: &str) -> Result<i32, String> {
        let variant = self.get_property(name)?;
        variant_get_i32(&variant).ok_or_else(|| {
            format!("'{name}' returned VT={}, expected an integer", variant_vt(&variant))
        })
    }

    /// Items `1..=Count` of a collection object.
    pub fn items(&self) -> Result<Vec<DispatchObject>, String> {
        let count = self.get_i32("Count")?;
        (1..=count)
            .map(|i| self.get_indexed("Item", &variant_i32(i)))
            .collect()
    }
}

fn clsid_from_progid(progid: &str) -> Result<GUID, String> {
    unsafe {
        let hstr = HSTRING::from(progid);
        CLSIDFromProgID(&hstr).map_err(|e| format!("CLSIDFromProgID('{progid}') failed: {e}"))
    }
}

fn extract_dispatch(variant: &VARIANT, context: &str) -> Result<DispatchObject, String> {
    if let Some(disp) = variant_get_dispatch(variant) {
        Ok(DispatchObject::from_idispatch(disp))
    } else if variant_is_empty(variant) {
        Err(format!("'{context}' returned empty/null"))
    } else {
        let vt = variant_vt(variant);
        Err(format!(
            "'{context}' returned non-object VARIANT (VT={vt}), expected VT_DISPATCH"
        ))
    }
}

/// Include EXCEPINFO details when Excel raised an exception.
fn format_invoke_error(err: windows::core::Error, except: &EXCEPINFO, member_name: &str) -> String {
    if err.code() == DISP_E_EXCEPTION {
        let desc = if !except.bstrDescription.is_empty() {
            except.bstrDescription.to_string()
        } else {
            String::from("(no description)")
        };
        format!("COM exception in '{member_name}': {desc}")
    } else {
        format!("Invoke('{member_name}') failed: {err}")
    }
}
