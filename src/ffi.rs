//! C ABI for the configuration UI
//!
//! One engine per process. Strings returned to the caller are owned by
//! this library and must be released with [`poq_free_string`]. Functions
//! that can fail return an error message, or null on success.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;

use crate::engine::{Engine, EnginePlatform};
use crate::library::Library;
use crate::settings::Settings;
use crate::state::{Feature, RuntimeState};

static ENGINE: Lazy<Mutex<Option<Engine>>> = Lazy::new(|| Mutex::new(None));

fn to_c_string(s: impl Into<String>) -> *mut c_char {
    let s: String = s.into();
    match CString::new(s.replace('\0', "")) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Optional path argument; null means "use defaults"
fn path_arg(ptr: *const c_char) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }
    let s = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    if s.is_empty() {
        None
    } else {
        Some(PathBuf::from(s))
    }
}

fn init(settings_path: Option<PathBuf>, library_path: Option<PathBuf>) -> Result<(), String> {
    let settings = match settings_path {
        Some(path) => Settings::load(&path).map_err(|e| e.to_string())?,
        None => Settings::default(),
    };
    let library = match library_path {
        Some(path) => Library::load(&path).map_err(|e| e.to_string())?,
        None => Library::default(),
    };
    let platform = EnginePlatform::native().map_err(|e| e.to_string())?;
    let engine = Engine::new(settings, library, platform).map_err(|e| e.to_string())?;
    *ENGINE.lock() = Some(engine);
    Ok(())
}

/// Create the engine from a TOML settings file and a JSON library file.
/// Either path may be null for defaults. Replaces a previous engine.
#[no_mangle]
pub extern "C" fn poq_init(settings_path: *const c_char, library_path: *const c_char) -> *mut c_char {
    let settings_path = path_arg(settings_path);
    let library_path = path_arg(library_path);
    if let Some(mut previous) = ENGINE.lock().take() {
        previous.stop();
    }
    match init(settings_path, library_path) {
        Ok(()) => {
            log::info!("poq engine initialized");
            std::ptr::null_mut()
        }
        Err(e) => {
            log::error!("poq_init failed: {}", e);
            to_c_string(e)
        }
    }
}

#[no_mangle]
pub extern "C" fn poq_start() -> *mut c_char {
    let mut guard = ENGINE.lock();
    let Some(engine) = guard.as_mut() else {
        return to_c_string("Engine not initialized");
    };
    match engine.start() {
        Ok(()) => std::ptr::null_mut(),
        Err(e) => to_c_string(e.to_string()),
    }
}

#[no_mangle]
pub extern "C" fn poq_stop() {
    if let Some(engine) = ENGINE.lock().as_mut() {
        engine.stop();
    }
}

/// Stop and drop the engine, destroying its overlays
#[no_mangle]
pub extern "C" fn poq_shutdown() {
    let engine = ENGINE.lock().take();
    drop(engine);
}

#[no_mangle]
pub extern "C" fn poq_is_running() -> bool {
    ENGINE
        .lock()
        .as_ref()
        .map(|e| e.is_running())
        .unwrap_or(false)
}

/// Runtime state as JSON
#[no_mangle]
pub extern "C" fn poq_state_json() -> *mut c_char {
    let state = ENGINE
        .lock()
        .as_ref()
        .map(|e| e.state())
        .unwrap_or_else(RuntimeState::default);
    let json = serde_json::to_string(&state).unwrap_or_else(|_| "{}".to_string());
    to_c_string(json)
}

/// Toggle a feature by name ("scanning", "copy_areas", "quick_craft",
/// "wheel_keys", "double_ctrl"). Returns false for unknown names or when
/// no engine exists.
#[no_mangle]
pub extern "C" fn poq_set_feature(name: *const c_char, enabled: bool) -> bool {
    if name.is_null() {
        return false;
    }
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy();
    let feature = match name.parse::<Feature>() {
        Ok(feature) => feature,
        Err(e) => {
            log::warn!("poq_set_feature: {}", e);
            return false;
        }
    };
    match ENGINE.lock().as_ref() {
        Some(engine) => {
            engine.set_feature(feature, enabled);
            true
        }
        None => false,
    }
}

/// Re-read the library file at `library_path`
#[no_mangle]
pub extern "C" fn poq_reload_library(library_path: *const c_char) -> *mut c_char {
    let Some(path) = path_arg(library_path) else {
        return to_c_string("Null pointer passed");
    };
    let library = match Library::load(&path) {
        Ok(library) => library,
        Err(e) => return to_c_string(e.to_string()),
    };
    match ENGINE.lock().as_ref() {
        Some(engine) => match engine.reload_library(library) {
            Ok(()) => std::ptr::null_mut(),
            Err(e) => to_c_string(e.to_string()),
        },
        None => to_c_string("Engine not initialized"),
    }
}

/// Enter or leave positioning mode. Leaving returns a JSON object of
/// overlay key to moved region; entering returns `{}`.
#[no_mangle]
pub extern "C" fn poq_set_positioning(on: bool) -> *mut c_char {
    let moved = ENGINE
        .lock()
        .as_ref()
        .map(|e| e.set_positioning(on))
        .unwrap_or_default();
    let map: std::collections::BTreeMap<String, _> = moved
        .into_iter()
        .map(|(entity, region)| (entity.to_string(), region))
        .collect();
    to_c_string(serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string()))
}

/// Free a string returned by this library
#[no_mangle]
pub extern "C" fn poq_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

#[no_mangle]
pub extern "C" fn poq_version() -> *const c_char {
    static VERSION: &[u8] = b"0.1.0\0";
    VERSION.as_ptr() as *const c_char
}
