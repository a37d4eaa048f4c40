//! FFI bindings for pathflux
//!
//! This module provides C-compatible functions for calling pathflux from other languages.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `pathflux_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::PipelineConfig;
use crate::encoder::ArtifactEncoder;
use crate::error::PathError;
use crate::normalizer::EventNormalizer;
use crate::pipeline::{records_to_artifacts, Pipeline};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Record a pipeline error as `CODE: message`
fn set_error(err: &PathError) {
    set_last_error(&format!("{}: {}", err.code(), err));
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Convert a Rust string to a C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Build graph and vector artifacts from a JSON array of records.
///
/// # Safety
/// - `records_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL or empty to use the default configuration.
/// - Returns a newly allocated string that must be freed with `pathflux_free_string`.
/// - Returns NULL on error; call `pathflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pathflux_build(
    records_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let records = match cstr_to_string(records_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid records string pointer");
            return ptr::null_mut();
        }
    };
    let config = if config_json.is_null() {
        String::new()
    } else {
        match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        }
    };

    match records_to_artifacts(&records, &config) {
        Ok(artifact) => string_to_cstr(&artifact),
        Err(e) => {
            set_error(&e);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Pipeline handle API
// ============================================================================

/// Opaque handle to a configured pipeline
pub struct PathfluxPipelineHandle {
    pipeline: Pipeline,
    encoder: ArtifactEncoder,
}

/// Create a pipeline from a JSON configuration.
///
/// # Safety
/// - `config_json` may be NULL or empty to use the default configuration.
/// - Must be freed with `pathflux_pipeline_free`.
/// - Returns NULL on an invalid configuration; call `pathflux_last_error`.
#[no_mangle]
pub unsafe extern "C" fn pathflux_pipeline_new(
    config_json: *const c_char,
) -> *mut PathfluxPipelineHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        PipelineConfig::default()
    } else {
        match cstr_to_string(config_json) {
            Some(s) if s.trim().is_empty() => PipelineConfig::default(),
            Some(s) => match PipelineConfig::from_json(&s) {
                Ok(config) => config,
                Err(e) => {
                    set_error(&e);
                    return ptr::null_mut();
                }
            },
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        }
    };

    match Pipeline::new(config) {
        Ok(pipeline) => Box::into_raw(Box::new(PathfluxPipelineHandle {
            pipeline,
            encoder: ArtifactEncoder::new(),
        })),
        Err(e) => {
            set_error(&e);
            ptr::null_mut()
        }
    }
}

/// Free a pipeline handle.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `pathflux_pipeline_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn pathflux_pipeline_free(handle: *mut PathfluxPipelineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Run a configured pipeline over a JSON array of records.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `pathflux_pipeline_new`.
/// - `records_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `pathflux_free_string`.
/// - Returns NULL on error; call `pathflux_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pathflux_pipeline_run(
    handle: *mut PathfluxPipelineHandle,
    records_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null pipeline handle");
        return ptr::null_mut();
    }
    let handle = &*handle;

    let records_str = match cstr_to_string(records_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid records string pointer");
            return ptr::null_mut();
        }
    };

    let result = EventNormalizer::parse_array(&records_str)
        .and_then(|records| handle.pipeline.run(&records))
        .and_then(|output| {
            handle
                .encoder
                .encode_to_json(&output, handle.pipeline.config())
        });

    match result {
        Ok(artifact) => string_to_cstr(&artifact),
        Err(e) => {
            set_error(&e);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by pathflux functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a pathflux function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn pathflux_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next pathflux call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn pathflux_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn pathflux_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
