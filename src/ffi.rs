//! FFI bindings for Synheart Ingest
//!
//! This module provides C-compatible functions for calling Ingest from other languages.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `ingest_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::config::ExtractConfig;
use crate::error::IngestError;
use crate::extractor::Extractor;
use crate::integrity;
use crate::store::ResultStore;
use crate::types::{ExtractionResult, IntegrityDigest};

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

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

#[derive(Serialize)]
struct SealedResult<'a> {
    result: &'a ExtractionResult,
    digest: &'a IntegrityDigest,
}

/// Optional JSON settings; NULL selects the defaults
unsafe fn extractor_from(config_json: *const c_char) -> Result<Extractor, IngestError> {
    let config = if config_json.is_null() {
        ExtractConfig::default()
    } else {
        let json = cstr_to_string(config_json)
            .ok_or_else(|| IngestError::Config("config is not valid UTF-8".to_string()))?;
        ExtractConfig::from_json(&json)?
    };
    Extractor::new(config)
}

fn extract_and_stamp(
    extractor: &Extractor,
    root: &str,
) -> Result<(ExtractionResult, IntegrityDigest), IngestError> {
    let result = extractor.extract(root)?;
    let digest = IntegrityDigest::of_result(&result)?;
    Ok((result, digest))
}

// ============================================================================
// Stateless API
// ============================================================================

/// Extract an unpacked export directory and return `{"result", "digest"}` JSON.
///
/// # Safety
/// - `root` must be a valid null-terminated C string.
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `ingest_free_string`.
/// - Returns NULL on error; call `ingest_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ingest_extract_dir(
    root: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let root_str = match cstr_to_string(root) {
        Some(s) => s,
        None => {
            set_last_error("Invalid root path pointer");
            return ptr::null_mut();
        }
    };

    let extractor = match extractor_from(config_json) {
        Ok(extractor) => extractor,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let sealed = extract_and_stamp(&extractor, &root_str).and_then(|(result, digest)| {
        serde_json::to_string(&SealedResult {
            result: &result,
            digest: &digest,
        })
        .map_err(IngestError::from)
    });

    match sealed {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Check an artifact against a hex digest.
///
/// Returns 1 if it matches, 0 if it does not, -1 on invalid arguments.
///
/// # Safety
/// - `digest_hex` and `artifact` must be valid null-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn ingest_verify(digest_hex: *const c_char, artifact: *const c_char) -> i32 {
    clear_last_error();

    let Some(digest) = cstr_to_string(digest_hex) else {
        set_last_error("Invalid digest string pointer");
        return -1;
    };
    if artifact.is_null() {
        set_last_error("Invalid artifact pointer");
        return -1;
    }

    let bytes = CStr::from_ptr(artifact).to_bytes();
    i32::from(integrity::verify(&digest, bytes))
}

// ============================================================================
// Result store API
// ============================================================================

/// Opaque handle to a result store
pub struct IngestStoreHandle {
    extractor: Extractor,
    store: ResultStore,
}

/// Create a result store.
///
/// # Safety
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - Returns a handle that must be freed with `ingest_store_free`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn ingest_store_new(config_json: *const c_char) -> *mut IngestStoreHandle {
    clear_last_error();

    match extractor_from(config_json) {
        Ok(extractor) => Box::into_raw(Box::new(IngestStoreHandle {
            extractor,
            store: ResultStore::default(),
        })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a result store.
///
/// # Safety
/// - `store` must be a valid pointer returned by `ingest_store_new`.
/// - After calling this function, `store` must not be used.
#[no_mangle]
pub unsafe extern "C" fn ingest_store_free(store: *mut IngestStoreHandle) {
    if !store.is_null() {
        drop(Box::from_raw(store));
    }
}

/// Extract a directory into the store and return the key it was stored under.
///
/// The key is the digest hex.
///
/// # Safety
/// - `store` must be a valid pointer returned by `ingest_store_new`.
/// - `root` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `ingest_free_string`.
/// - Returns NULL on error; call `ingest_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ingest_store_extract(
    store: *mut IngestStoreHandle,
    root: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return ptr::null_mut();
    }
    let handle = &mut *store;

    let root_str = match cstr_to_string(root) {
        Some(s) => s,
        None => {
            set_last_error("Invalid root path pointer");
            return ptr::null_mut();
        }
    };

    match extract_and_stamp(&handle.extractor, &root_str) {
        Ok((result, digest)) => string_to_cstr(&handle.store.put(result, digest)),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Return the stored `{"result", "digest", "stored_at"}` JSON for a key.
///
/// # Safety
/// - `store` must be a valid pointer returned by `ingest_store_new`.
/// - `key` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `ingest_free_string`.
/// - Returns NULL if the key is unknown or expired.
#[no_mangle]
pub unsafe extern "C" fn ingest_store_get(
    store: *const IngestStoreHandle,
    key: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return ptr::null_mut();
    }
    let handle = &*store;

    let Some(key_str) = cstr_to_string(key) else {
        set_last_error("Invalid key string pointer");
        return ptr::null_mut();
    };

    let Some(entry) = handle.store.get(&key_str) else {
        set_last_error("No stored result for key");
        return ptr::null_mut();
    };

    match serde_json::to_string(entry) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Re-hash a stored result and compare it with its digest.
///
/// Returns 1 if intact, 0 if altered, -1 if the key is unknown or arguments are invalid.
///
/// # Safety
/// - `store` must be a valid pointer returned by `ingest_store_new`.
/// - `key` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn ingest_store_verify(
    store: *const IngestStoreHandle,
    key: *const c_char,
) -> i32 {
    clear_last_error();

    if store.is_null() {
        set_last_error("Null store pointer");
        return -1;
    }
    let handle = &*store;

    let Some(key_str) = cstr_to_string(key) else {
        set_last_error("Invalid key string pointer");
        return -1;
    };

    match handle.store.get(&key_str) {
        Some(entry) => i32::from(entry.verify()),
        None => {
            set_last_error("No stored result for key");
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Ingest functions.
///
/// # Safety
/// - `ptr` must be a pointer returned by an Ingest function, or NULL.
/// - After calling this function, `ptr` must not be used.
#[no_mangle]
pub unsafe extern "C" fn ingest_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Ingest function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn ingest_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Ingest library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn ingest_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
