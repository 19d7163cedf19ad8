//! C-compatible boundary between the loader and model libraries.
//!
//! Only `#[repr(C)]` structs, raw pointers and `extern "C"` functions cross a
//! library boundary. A library built with another compiler or against another
//! release of this crate can therefore be read far enough to be rejected: the
//! interface version is the first field of [`RawPluginInfo`] and is compared
//! before anything else is touched.
//!
//! A constructed model travels as a [`RawModel`], an opaque handle plus a
//! table of functions compiled into the library. Parameters cross as
//! `(name, type tag, text)` triples of NUL-terminated strings; the library
//! owns every string it passes out and the host owns every string it passes in.
//!
//! The library side is generated by [`declare_plugin!`](crate::declare_plugin);
//! the host side is [`read_info`] and [`ForeignModel`].

use super::{CRATE_VERSION, INTERFACE_VERSION, PluginInfo, ScatteringFunction};
use crate::core::models::params::ParamValue;
use std::ffi::{CStr, CString, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::ptr;
use tracing::warn;

/// Identification exported by `tasfit_plugin_info`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawPluginInfo {
    /// Stays the first field in every interface version.
    pub interface_version: *const c_char,
    pub crate_version: *const c_char,
    pub name: *const c_char,
    pub description: *const c_char,
}

/// Receives one `(name, type tag, text)` parameter triple.
pub type ParameterSink = unsafe extern "C" fn(
    context: *mut c_void,
    name: *const c_char,
    tag: *const c_char,
    text: *const c_char,
);

/// Functions operating on a model handle, all compiled into the library
/// that created the handle.
#[repr(C)]
pub struct RawModelVTable {
    pub evaluate: unsafe extern "C" fn(*mut c_void, f64, f64, f64, f64) -> f64,
    pub parameters: unsafe extern "C" fn(*const c_void, ParameterSink, *mut c_void),
    pub set_parameter:
        unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, *const c_char) -> bool,
    pub copy: unsafe extern "C" fn(*const c_void) -> RawModel,
    pub is_valid: unsafe extern "C" fn(*const c_void) -> bool,
    pub destroy: unsafe extern "C" fn(*mut c_void),
}

/// An owned model handle with its function table. Both pointers are null
/// when construction failed.
#[repr(C)]
#[derive(Debug)]
pub struct RawModel {
    pub handle: *mut c_void,
    pub vtable: *const RawModelVTable,
}

impl RawModel {
    pub fn null() -> Self {
        Self {
            handle: ptr::null_mut(),
            vtable: ptr::null(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.handle.is_null() || self.vtable.is_null()
    }

    /// Moves `model` behind a handle served by this compilation's vtable.
    pub fn wrap(model: Box<dyn ScatteringFunction>) -> Self {
        let handle: *mut Handle = Box::into_raw(Box::new(model));
        Self {
            handle: handle.cast(),
            vtable: &BOXED_VTABLE,
        }
    }
}

/// Identification strings owned by a library for the lifetime of the process,
/// with the raw view that `tasfit_plugin_info` hands out.
#[derive(Debug)]
pub struct ExportedInfo {
    raw: RawPluginInfo,
    _interface_version: CString,
    _crate_version: CString,
    _name: CString,
    _description: CString,
}

// SAFETY: the raw pointers refer to the immutable strings owned by the same
// value, which are never modified or freed while it is alive.
unsafe impl Send for ExportedInfo {}
unsafe impl Sync for ExportedInfo {}

impl ExportedInfo {
    pub fn new(name: &str, description: &str) -> Self {
        let interface_version = c_string(INTERFACE_VERSION);
        let crate_version = c_string(CRATE_VERSION);
        let name = c_string(name);
        let description = c_string(description);
        Self {
            raw: RawPluginInfo {
                interface_version: interface_version.as_ptr(),
                crate_version: crate_version.as_ptr(),
                name: name.as_ptr(),
                description: description.as_ptr(),
            },
            _interface_version: interface_version,
            _crate_version: crate_version,
            _name: name,
            _description: description,
        }
    }

    pub fn as_raw(&self) -> *const RawPluginInfo {
        &self.raw
    }
}

/// Reads an exported identification, rejecting a foreign interface version
/// before any other field is read.
///
/// # Safety
///
/// `raw` must be null or point to a `RawPluginInfo` whose first field is null
/// or a NUL-terminated string. When that string equals [`INTERFACE_VERSION`],
/// the remaining fields must follow the layout of this version.
pub unsafe fn read_info(raw: *const RawPluginInfo) -> Result<PluginInfo, String> {
    if raw.is_null() {
        return Err("library exported no identification".to_string());
    }
    let version_ptr = unsafe { ptr::addr_of!((*raw).interface_version).read() };
    let interface_version = unsafe { read_c_str(version_ptr) }
        .ok_or_else(|| "library exported no interface version".to_string())?;
    if interface_version != INTERFACE_VERSION {
        return Err(format!(
            "interface version '{interface_version}' does not match '{INTERFACE_VERSION}'"
        ));
    }

    let raw = unsafe { &*raw };
    let (crate_version, name, description) = unsafe {
        (
            read_c_str(raw.crate_version),
            read_c_str(raw.name),
            read_c_str(raw.description),
        )
    };
    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "library exported no model name".to_string())?;
    Ok(PluginInfo {
        interface_version,
        crate_version: crate_version.unwrap_or_default(),
        name,
        description: description.unwrap_or_default(),
    })
}

/// Body of the generated `tasfit_plugin_construct`: decodes the configuration
/// path and hands the constructed model out as a [`RawModel`]. A constructor
/// that panics yields a null model.
///
/// # Safety
///
/// `config` must be null or a NUL-terminated UTF-8 path.
pub unsafe fn export_model(
    config: *const c_char,
    construct: fn(Option<&Path>) -> Box<dyn ScatteringFunction>,
) -> RawModel {
    let path = unsafe { read_c_str(config) }.map(PathBuf::from);
    match catch_unwind(AssertUnwindSafe(|| construct(path.as_deref()))) {
        Ok(model) => RawModel::wrap(model),
        Err(_) => RawModel::null(),
    }
}

/// Encodes a configuration path for `tasfit_plugin_construct`.
pub fn config_argument(config: Option<&Path>) -> Result<Option<CString>, String> {
    let Some(path) = config else {
        return Ok(None);
    };
    let text = path
        .to_str()
        .ok_or_else(|| format!("configuration path {} is not valid UTF-8", path.display()))?;
    CString::new(text)
        .map(Some)
        .map_err(|_| format!("configuration path {} contains a NUL byte", path.display()))
}

/// A model reached only through a [`RawModel`].
///
/// Calls go through the library's function table; the host never sees the
/// model's Rust type. The code behind the table must stay loaded for as long
/// as the value and its copies live.
#[derive(Debug)]
pub struct ForeignModel {
    raw: RawModel,
}

// SAFETY: the handle is owned exclusively by this value. The library side is
// a `Box<dyn ScatteringFunction>`, which is `Send + Sync`, and mutation only
// happens through `&mut self`.
unsafe impl Send for ForeignModel {}
unsafe impl Sync for ForeignModel {}

impl ForeignModel {
    /// Takes ownership of `raw`; `None` when it is null.
    ///
    /// # Safety
    ///
    /// `raw` must come from a library exporting the current interface version,
    /// and that library must outlive the returned model and its copies.
    pub unsafe fn from_raw(raw: RawModel) -> Option<Self> {
        if raw.is_null() {
            None
        } else {
            Some(Self { raw })
        }
    }

    fn vtable(&self) -> &RawModelVTable {
        // SAFETY: non-null by construction and kept alive by the caller of `from_raw`.
        unsafe { &*self.raw.vtable }
    }
}

impl ScatteringFunction for ForeignModel {
    fn evaluate(&mut self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        unsafe { (self.vtable().evaluate)(self.raw.handle, h, k, l, e) }
    }

    fn parameters(&self) -> Vec<(String, ParamValue)> {
        let mut collected: Vec<(String, ParamValue)> = Vec::new();
        let context: *mut Vec<(String, ParamValue)> = &mut collected;
        unsafe { (self.vtable().parameters)(self.raw.handle, collect_parameter, context.cast()) };
        collected
    }

    fn set_parameter_if_present(&mut self, name: &str, value: &ParamValue) -> bool {
        let name = c_string(name);
        let tag = c_string(value.type_tag());
        let text = c_string(&value.to_text());
        unsafe {
            (self.vtable().set_parameter)(self.raw.handle, name.as_ptr(), tag.as_ptr(), text.as_ptr())
        }
    }

    fn copy(&self) -> Box<dyn ScatteringFunction> {
        let raw = unsafe { (self.vtable().copy)(self.raw.handle) };
        Box::new(ForeignModel { raw })
    }

    fn is_valid(&self) -> bool {
        unsafe { (self.vtable().is_valid)(self.raw.handle) }
    }
}

impl Drop for ForeignModel {
    fn drop(&mut self) {
        unsafe { (self.vtable().destroy)(self.raw.handle) }
    }
}

unsafe extern "C" fn collect_parameter(
    context: *mut c_void,
    name: *const c_char,
    tag: *const c_char,
    text: *const c_char,
) {
    let collected = unsafe { &mut *context.cast::<Vec<(String, ParamValue)>>() };
    let (name, tag, text) = unsafe { (read_c_str(name), read_c_str(tag), read_c_str(text)) };
    let (Some(name), Some(tag), Some(text)) = (name, tag, text) else {
        return;
    };
    match ParamValue::parse(&tag, &text) {
        Ok(value) => collected.push((name, value)),
        Err(e) => warn!(parameter = %name, "Ignoring parameter reported by model library: {}", e),
    }
}

type Handle = Box<dyn ScatteringFunction>;

static BOXED_VTABLE: RawModelVTable = RawModelVTable {
    evaluate: boxed_evaluate,
    parameters: boxed_parameters,
    set_parameter: boxed_set_parameter,
    copy: boxed_copy,
    is_valid: boxed_is_valid,
    destroy: boxed_destroy,
};

unsafe fn handle_ref<'a>(handle: *const c_void) -> &'a Handle {
    unsafe { &*handle.cast::<Handle>() }
}

unsafe fn handle_mut<'a>(handle: *mut c_void) -> &'a mut Handle {
    unsafe { &mut *handle.cast::<Handle>() }
}

/// A panicking model evaluates to NaN, which the fit reports as non-finite.
unsafe extern "C" fn boxed_evaluate(handle: *mut c_void, h: f64, k: f64, l: f64, e: f64) -> f64 {
    let model = unsafe { handle_mut(handle) };
    catch_unwind(AssertUnwindSafe(|| model.evaluate(h, k, l, e))).unwrap_or(f64::NAN)
}

unsafe extern "C" fn boxed_parameters(
    handle: *const c_void,
    sink: ParameterSink,
    context: *mut c_void,
) {
    let model = unsafe { handle_ref(handle) };
    for (name, tag, text) in model.parameters_text() {
        let (name, tag, text) = (c_string(&name), c_string(tag), c_string(&text));
        unsafe { sink(context, name.as_ptr(), tag.as_ptr(), text.as_ptr()) };
    }
}

unsafe extern "C" fn boxed_set_parameter(
    handle: *mut c_void,
    name: *const c_char,
    tag: *const c_char,
    text: *const c_char,
) -> bool {
    let model = unsafe { handle_mut(handle) };
    let (name, tag, text) = unsafe { (read_c_str(name), read_c_str(tag), read_c_str(text)) };
    let (Some(name), Some(tag), Some(text)) = (name, tag, text) else {
        return false;
    };
    ParamValue::parse(&tag, &text).is_ok_and(|value| model.set_parameter_if_present(&name, &value))
}

unsafe extern "C" fn boxed_copy(handle: *const c_void) -> RawModel {
    RawModel::wrap(unsafe { handle_ref(handle) }.copy())
}

unsafe extern "C" fn boxed_is_valid(handle: *const c_void) -> bool {
    unsafe { handle_ref(handle) }.is_valid()
}

unsafe extern "C" fn boxed_destroy(handle: *mut c_void) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle.cast::<Handle>()) });
    }
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn read_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}
