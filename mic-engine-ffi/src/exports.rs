//! C ABI functions that operate on a live engine handle.
//!
//! The handle from `mic_engine_create` points at a mutex-wrapped
//! [`MicEngine`], so callers may invoke these functions from any thread.
//! Every function clears the thread-local error first and runs its body
//! under `catch_unwind`; JSON-returning functions yield null on failure
//! and leave the reason in the last-error pair.

use crate::{
    alloc_c_string, clear_last_error, init_logging, parse_c_str, set_last_error, DeviceEventDto,
    DeviceListResponse, DeviceResponse, EngineConfig, ErrorCode, EventListResponse, MeterResponse,
    MicEngineHandle, OperationResult,
};
use mic_engine::{AudioError, DeviceRole, MicEngine};
use std::ffi::c_char;
use std::panic;
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type EngineCell = Mutex<MicEngine>;

/// # Safety
/// `handle` must have come from `mic_engine_create` and must not have
/// been passed to `mic_engine_destroy`.
unsafe fn engine_from<'a>(handle: MicEngineHandle) -> Option<&'a EngineCell> {
    if handle.is_null() {
        None
    } else {
        Some(&*(handle as *const EngineCell))
    }
}

fn lock_engine(cell: &EngineCell) -> MutexGuard<'_, MicEngine> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Record the error for the caller and hand back its code.
fn report(err: AudioError) -> ErrorCode {
    let code = ErrorCode::from(err.clone());
    set_last_error(code, err.to_string());
    code
}

fn to_json<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => alloc_c_string(&json),
        Err(e) => {
            set_last_error(ErrorCode::JsonError, format!("serialization failed: {e}"));
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Engine Lifecycle
// ============================================================================

/// Create a new mic engine instance.
///
/// Registers the OS device callbacks and seeds the device snapshot before
/// returning, so a null result means the engine could not start.
///
/// # Arguments
/// * `config_json` - Optional JSON [`EngineConfig`] (can be null for defaults)
///
/// # Returns
/// Handle to the engine, or null on failure. Free with mic_engine_destroy().
#[no_mangle]
pub extern "C" fn mic_engine_create(config_json: *const c_char) -> MicEngineHandle {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let config = if config_json.is_null() {
            EngineConfig::default()
        } else {
            let Some(json) = (unsafe { parse_c_str(config_json) }) else {
                set_last_error(ErrorCode::InvalidArgument, "config is not valid UTF-8");
                return ptr::null_mut();
            };
            match serde_json::from_str::<EngineConfig>(json) {
                Ok(config) => config,
                Err(e) => {
                    set_last_error(ErrorCode::InvalidArgument, format!("bad config JSON: {e}"));
                    return ptr::null_mut();
                }
            }
        };

        init_logging(config.log_level.as_deref());

        let mut core = mic_engine::EngineConfig::default();
        if let Some(ms) = config.suppression_linger_ms {
            core.suppression_linger = Duration::from_millis(ms);
        }
        if let Some(ms) = config.publish_interval_ms {
            core.meter.publish_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = config.peak_hold_ms {
            core.meter.peak_hold = Duration::from_millis(ms);
        }
        if let Some(decay) = config.decay_per_sec {
            core.meter.decay_per_sec = decay;
        }

        match MicEngine::new(core) {
            Ok(engine) => Box::into_raw(Box::new(Mutex::new(engine))) as MicEngineHandle,
            Err(e) => {
                report(e);
                ptr::null_mut()
            }
        }
    });

    match result {
        Ok(handle) => handle,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_create");
            ptr::null_mut()
        }
    }
}

/// Destroy a mic engine instance. Stops metering, unregisters every
/// callback, and joins the worker thread before returning.
///
/// # Safety
/// The handle must not be used after this call.
#[no_mangle]
pub extern "C" fn mic_engine_destroy(handle: MicEngineHandle) {
    clear_last_error();

    if handle.is_null() {
        return;
    }

    let result = panic::catch_unwind(|| {
        drop(unsafe { Box::from_raw(handle as *mut EngineCell) });
    });

    if result.is_err() {
        set_last_error(ErrorCode::Panic, "panic in mic_engine_destroy");
    }
}

// ============================================================================
// Device Queries
// ============================================================================

/// Get all active capture devices from the engine's snapshot. Does not
/// touch the OS; the snapshot is kept current by the change callbacks.
///
/// # Returns
/// JSON string of DeviceListResponse, or null on error.
/// Caller must free with mic_engine_free_string().
#[no_mangle]
pub extern "C" fn mic_engine_get_devices(handle: MicEngineHandle) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ptr::null_mut();
        };
        let devices = lock_engine(cell).devices();
        to_json(&DeviceListResponse {
            devices: devices.into_iter().map(Into::into).collect(),
        })
    });

    match result {
        Ok(ptr) => ptr,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_get_devices");
            ptr::null_mut()
        }
    }
}

/// Get a single device by its endpoint ID.
///
/// # Returns
/// JSON string of DeviceResponse, or null on error.
/// Caller must free with mic_engine_free_string().
#[no_mangle]
pub extern "C" fn mic_engine_get_device(
    handle: MicEngineHandle,
    device_id: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ptr::null_mut();
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ptr::null_mut();
        };
        match lock_engine(cell).device(device_id) {
            Ok(device) => to_json(&DeviceResponse {
                device: device.into(),
            }),
            Err(e) => {
                report(e);
                ptr::null_mut()
            }
        }
    });

    match result {
        Ok(ptr) => ptr,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_get_device");
            ptr::null_mut()
        }
    }
}

/// Get the default capture device for a role.
///
/// # Arguments
/// * `role` - 0 = Console, 1 = Multimedia, 2 = Communications
///
/// # Returns
/// JSON string of DeviceResponse, or null on error.
/// Caller must free with mic_engine_free_string().
#[no_mangle]
pub extern "C" fn mic_engine_get_default_device(
    handle: MicEngineHandle,
    role: u32,
) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ptr::null_mut();
        };
        let Some(role) = DeviceRole::from_raw(role) else {
            set_last_error(ErrorCode::InvalidArgument, format!("unknown role: {role}"));
            return ptr::null_mut();
        };
        match lock_engine(cell).default_device(role) {
            Ok(device) => to_json(&DeviceResponse {
                device: device.into(),
            }),
            Err(e) => {
                report(e);
                ptr::null_mut()
            }
        }
    });

    match result {
        Ok(ptr) => ptr,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_get_default_device");
            ptr::null_mut()
        }
    }
}

/// Re-enumerate devices from the OS and replace the snapshot.
///
/// # Returns
/// JSON string of DeviceListResponse, or null on error.
/// Caller must free with mic_engine_free_string().
#[no_mangle]
pub extern "C" fn mic_engine_refresh_devices(handle: MicEngineHandle) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ptr::null_mut();
        };
        match lock_engine(cell).refresh() {
            Ok(devices) => to_json(&DeviceListResponse {
                devices: devices.into_iter().map(Into::into).collect(),
            }),
            Err(e) => {
                report(e);
                ptr::null_mut()
            }
        }
    });

    match result {
        Ok(ptr) => ptr,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_refresh_devices");
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Default Device Control
// ============================================================================

/// Set the default capture device for one role.
///
/// # Arguments
/// * `role` - 0 = Console, 1 = Multimedia, 2 = Communications
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mic_engine_set_default_device(
    handle: MicEngineHandle,
    device_id: *const c_char,
    role: u32,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ErrorCode::InvalidArgument as i32;
        };
        let Some(role) = DeviceRole::from_raw(role) else {
            set_last_error(ErrorCode::InvalidArgument, format!("unknown role: {role}"));
            return ErrorCode::InvalidArgument as i32;
        };
        match lock_engine(cell).set_default_device(device_id, role) {
            Ok(()) => ErrorCode::Success as i32,
            Err(e) => report(e) as i32,
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_set_default_device");
            ErrorCode::Panic as i32
        }
    }
}

/// Set the default capture device for both Console and Communications.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mic_engine_set_default_device_all_roles(
    handle: MicEngineHandle,
    device_id: *const c_char,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ErrorCode::InvalidArgument as i32;
        };
        match lock_engine(cell).set_default_device_all_roles(device_id) {
            Ok(()) => ErrorCode::Success as i32,
            Err(e) => report(e) as i32,
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(
                ErrorCode::Panic,
                "panic in mic_engine_set_default_device_all_roles",
            );
            ErrorCode::Panic as i32
        }
    }
}

// ============================================================================
// Volume and Mute Control
// ============================================================================

/// Read a device's master volume scalar from the OS.
///
/// # Arguments
/// * `out_volume` - Receives the volume in [0.0, 1.0]
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mic_engine_get_volume(
    handle: MicEngineHandle,
    device_id: *const c_char,
    out_volume: *mut f32,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ErrorCode::InvalidArgument as i32;
        };
        if out_volume.is_null() {
            set_last_error(ErrorCode::InvalidArgument, "out_volume is null");
            return ErrorCode::InvalidArgument as i32;
        }
        match lock_engine(cell).get_volume(device_id) {
            Ok(volume) => {
                unsafe { *out_volume = volume };
                ErrorCode::Success as i32
            }
            Err(e) => report(e) as i32,
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_get_volume");
            ErrorCode::Panic as i32
        }
    }
}

/// Set a device's master volume scalar. Values outside [0.0, 1.0] are
/// clamped. The change is applied to the snapshot immediately and its OS
/// echo is suppressed from the event queue.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mic_engine_set_volume(
    handle: MicEngineHandle,
    device_id: *const c_char,
    volume: f32,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ErrorCode::InvalidArgument as i32;
        };
        match lock_engine(cell).set_volume(device_id, volume) {
            Ok(_) => ErrorCode::Success as i32,
            Err(e) => report(e) as i32,
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_set_volume");
            ErrorCode::Panic as i32
        }
    }
}

/// Read a device's mute state from the OS.
///
/// # Arguments
/// * `out_muted` - Receives 1 if muted, 0 if not
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mic_engine_get_mute(
    handle: MicEngineHandle,
    device_id: *const c_char,
    out_muted: *mut i32,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ErrorCode::InvalidArgument as i32;
        };
        if out_muted.is_null() {
            set_last_error(ErrorCode::InvalidArgument, "out_muted is null");
            return ErrorCode::InvalidArgument as i32;
        }
        match lock_engine(cell).get_mute(device_id) {
            Ok(muted) => {
                unsafe { *out_muted = i32::from(muted) };
                ErrorCode::Success as i32
            }
            Err(e) => report(e) as i32,
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_get_mute");
            ErrorCode::Panic as i32
        }
    }
}

/// Set a device's mute state.
///
/// # Arguments
/// * `muted` - 1 to mute, 0 to unmute
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mic_engine_set_mute(
    handle: MicEngineHandle,
    device_id: *const c_char,
    muted: i32,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ErrorCode::InvalidArgument as i32;
        };
        match lock_engine(cell).set_mute(device_id, muted != 0) {
            Ok(()) => ErrorCode::Success as i32,
            Err(e) => report(e) as i32,
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_set_mute");
            ErrorCode::Panic as i32
        }
    }
}

/// Toggle a device's mute state.
///
/// # Returns
/// JSON string of OperationResult with the new mute state, or null on
/// invalid arguments. Caller must free with mic_engine_free_string().
#[no_mangle]
pub extern "C" fn mic_engine_toggle_mute(
    handle: MicEngineHandle,
    device_id: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ptr::null_mut();
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ptr::null_mut();
        };
        let outcome = match lock_engine(cell).toggle_mute(device_id) {
            Ok(is_muted) => OperationResult {
                success: true,
                error: None,
                is_muted: Some(is_muted),
            },
            Err(e) => {
                let message = e.to_string();
                report(e);
                OperationResult {
                    success: false,
                    error: Some(message),
                    is_muted: None,
                }
            }
        };
        to_json(&outcome)
    });

    match result {
        Ok(ptr) => ptr,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_toggle_mute");
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Level Metering
// ============================================================================

/// Start level metering on a device. Opens a shared-mode capture session;
/// blocks until the session is running.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mic_engine_start_metering(
    handle: MicEngineHandle,
    device_id: *const c_char,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ErrorCode::InvalidArgument as i32;
        };
        match lock_engine(cell).start_metering(device_id) {
            Ok(()) => ErrorCode::Success as i32,
            Err(e) => report(e) as i32,
        }
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_start_metering");
            ErrorCode::Panic as i32
        }
    }
}

/// Stop level metering on a device. Unmetered devices are a no-op.
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn mic_engine_stop_metering(
    handle: MicEngineHandle,
    device_id: *const c_char,
) -> i32 {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ErrorCode::InvalidArgument as i32;
        };
        lock_engine(cell).stop_metering(device_id);
        ErrorCode::Success as i32
    });

    match result {
        Ok(code) => code,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_stop_metering");
            ErrorCode::Panic as i32
        }
    }
}

/// Get the latest meter reading for a metered device.
///
/// # Returns
/// JSON string of MeterResponse, or null on error.
/// Caller must free with mic_engine_free_string().
#[no_mangle]
pub extern "C" fn mic_engine_get_meter(
    handle: MicEngineHandle,
    device_id: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ptr::null_mut();
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "device_id is null or not UTF-8");
            return ptr::null_mut();
        };
        match lock_engine(cell).meter(device_id) {
            Ok(snapshot) => to_json(&MeterResponse {
                meter: snapshot.into(),
            }),
            Err(e) => {
                report(e);
                ptr::null_mut()
            }
        }
    });

    match result {
        Ok(ptr) => ptr,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_get_meter");
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Event Queue
// ============================================================================

/// Drain pending device events, oldest first. Engine-caused echoes never
/// appear here.
///
/// # Arguments
/// * `max_events` - Maximum number of events to return; 0 means all pending
///
/// # Returns
/// JSON string of EventListResponse, or null on error.
/// Caller must free with mic_engine_free_string().
#[no_mangle]
pub extern "C" fn mic_engine_poll_events(handle: MicEngineHandle, max_events: u32) -> *mut c_char {
    clear_last_error();

    let result = panic::catch_unwind(|| {
        let Some(cell) = (unsafe { engine_from(handle) }) else {
            set_last_error(ErrorCode::InvalidHandle, "null engine handle");
            return ptr::null_mut();
        };
        let limit = if max_events == 0 {
            usize::MAX
        } else {
            max_events as usize
        };
        let engine = lock_engine(cell);
        let mut events: Vec<DeviceEventDto> = Vec::new();
        while events.len() < limit {
            match engine.poll_event() {
                Some(event) => events.push(event.into()),
                None => break,
            }
        }
        drop(engine);
        to_json(&EventListResponse { events })
    });

    match result {
        Ok(ptr) => ptr,
        Err(_) => {
            set_last_error(ErrorCode::Panic, "panic in mic_engine_poll_events");
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mic_engine_free_string, mic_engine_last_error_code};
    use std::ffi::CString;

    #[test]
    fn test_null_handle_is_rejected() {
        let json = mic_engine_get_devices(ptr::null_mut());
        assert!(json.is_null());
        assert_eq!(
            mic_engine_last_error_code(),
            ErrorCode::InvalidHandle as i32
        );
    }

    #[test]
    fn test_destroy_null_is_a_no_op() {
        mic_engine_destroy(ptr::null_mut());
        assert_eq!(mic_engine_last_error_code(), 0);
    }

    #[test]
    fn test_malformed_config_is_rejected() {
        let config = CString::new("{not json").unwrap();
        let handle = mic_engine_create(config.as_ptr());
        assert!(handle.is_null());
        assert_eq!(
            mic_engine_last_error_code(),
            ErrorCode::InvalidArgument as i32
        );
    }

    // Runs the whole surface against the live audio subsystem when one is
    // present; otherwise the constructor error path is all we can check.
    #[test]
    fn test_create_query_destroy() {
        let handle = mic_engine_create(ptr::null());
        if handle.is_null() {
            assert_ne!(mic_engine_last_error_code(), 0);
            return;
        }

        let devices = mic_engine_get_devices(handle);
        assert!(!devices.is_null());
        mic_engine_free_string(devices);

        let events = mic_engine_poll_events(handle, 16);
        assert!(!events.is_null());
        mic_engine_free_string(events);

        mic_engine_destroy(handle);
    }
}
