//! FFI bindings for the Windows microphone engine.
//!
//! This crate provides C ABI functions for use from C# via P/Invoke.
//! All functions use panic::catch_unwind to prevent Rust panics from
//! unwinding across the FFI boundary. The handle returned by
//! `mic_engine_create` owns a live engine: callbacks registered, device
//! mirror seeded, event queue running. Structured data crosses the
//! boundary as JSON strings that the caller frees with
//! `mic_engine_free_string`.

use mic_engine::{
    AudioError, AudioFormat, DeviceEvent, LevelZone, MeterSnapshot, MicrophoneDevice,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;
use std::sync::Once;

#[cfg(windows)]
mod exports;

// ============================================================================
// Error Handling
// ============================================================================

/// Error codes returned by FFI functions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidArgument = -2,
    DeviceNotFound = -3,
    ComError = -4,
    JsonError = -5,
    ControlSurfaceError = -6,
    NoDefaultDevice = -7,
    MeterUnavailable = -8,
    NotificationRegistrationFailed = -9,
    Panic = -99,
}

impl From<AudioError> for ErrorCode {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::DeviceNotFound { .. } => ErrorCode::DeviceNotFound,
            AudioError::NoDefaultDevice { .. } => ErrorCode::NoDefaultDevice,
            AudioError::ControlSurface { .. } => ErrorCode::ControlSurfaceError,
            AudioError::MeterUnavailable { .. } => ErrorCode::MeterUnavailable,
            AudioError::NotificationRegistration { .. } => {
                ErrorCode::NotificationRegistrationFailed
            }
            AudioError::ComInit { .. } | AudioError::Enumeration { .. } => ErrorCode::ComError,
            AudioError::StringConversion(_) => ErrorCode::JsonError,
            AudioError::Unknown(_) => ErrorCode::ComError,
        }
    }
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorCode, String)>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

// ============================================================================
// Data Types for JSON Serialization
// ============================================================================

/// Configuration for engine creation. All fields are optional; absent
/// fields keep the engine defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log filter (e.g. "info", "mic_engine=debug"). Applied on first
    /// engine creation; the RUST_LOG environment variable wins if set.
    #[serde(default)]
    pub log_level: Option<String>,

    /// Echo suppression window after a control write, in milliseconds.
    #[serde(default)]
    pub suppression_linger_ms: Option<u64>,

    /// How often level events are published per metered device, in
    /// milliseconds.
    #[serde(default)]
    pub publish_interval_ms: Option<u64>,

    /// Peak hold duration for level meters, in milliseconds.
    #[serde(default)]
    pub peak_hold_ms: Option<u64>,

    /// Peak decay speed once the hold expires, in percent per second.
    #[serde(default)]
    pub decay_per_sec: Option<f32>,
}

/// Audio format information.
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFormatDto {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
}

impl From<AudioFormat> for AudioFormatDto {
    fn from(f: AudioFormat) -> Self {
        Self {
            sample_rate: f.sample_rate,
            bit_depth: f.bit_depth,
            channels: f.channels,
        }
    }
}

/// A microphone device with its current state.
#[derive(Debug, Serialize, Deserialize)]
pub struct MicrophoneDeviceDto {
    pub id: String,
    pub name: String,
    pub is_default_console: bool,
    pub is_default_communications: bool,
    pub is_muted: bool,
    pub volume: f32,
    pub input_level_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormatDto>,
}

impl From<MicrophoneDevice> for MicrophoneDeviceDto {
    fn from(device: MicrophoneDevice) -> Self {
        Self {
            id: device.id,
            name: device.name,
            is_default_console: device.is_default_console,
            is_default_communications: device.is_default_communications,
            is_muted: device.is_muted,
            volume: device.volume,
            input_level_percent: device.input_level_percent,
            format: device.format.map(Into::into),
        }
    }
}

/// Response containing a list of devices.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<MicrophoneDeviceDto>,
}

/// Response containing a single device.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub device: MicrophoneDeviceDto,
}

/// Response containing operation result.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
}

/// A meter reading. `level_dbfs` is absent for digital silence.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeterDto {
    pub level_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_dbfs: Option<f32>,
    pub peak_percent: f32,
    pub zone: String,
}

impl From<MeterSnapshot> for MeterDto {
    fn from(m: MeterSnapshot) -> Self {
        let zone = match m.zone {
            LevelZone::Green => "green",
            LevelZone::Yellow => "yellow",
            LevelZone::Red => "red",
        };
        Self {
            level_percent: m.level_percent,
            level_dbfs: (m.level_dbfs != f32::NEG_INFINITY).then_some(m.level_dbfs),
            peak_percent: m.peak_percent,
            zone: zone.to_string(),
        }
    }
}

/// Response containing a meter reading.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeterResponse {
    pub meter: MeterDto,
}

/// A device change event. `dbfs` is absent for digital silence.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEventDto {
    DeviceAdded {
        device_id: String,
    },
    DeviceRemoved {
        device_id: String,
    },
    DefaultChanged {
        role: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
    },
    VolumeChanged {
        device_id: String,
        volume: f32,
        muted: bool,
    },
    FormatChanged {
        device_id: String,
        format: AudioFormatDto,
    },
    LevelUpdated {
        device_id: String,
        percent: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        dbfs: Option<f32>,
    },
}

impl From<DeviceEvent> for DeviceEventDto {
    fn from(event: DeviceEvent) -> Self {
        match event {
            DeviceEvent::DeviceAdded { device_id } => DeviceEventDto::DeviceAdded { device_id },
            DeviceEvent::DeviceRemoved { device_id } => {
                DeviceEventDto::DeviceRemoved { device_id }
            }
            DeviceEvent::DefaultChanged { role, device_id } => DeviceEventDto::DefaultChanged {
                role: role as u32,
                device_id,
            },
            DeviceEvent::VolumeChanged {
                device_id,
                volume,
                muted,
            } => DeviceEventDto::VolumeChanged {
                device_id,
                volume,
                muted,
            },
            DeviceEvent::FormatChanged { device_id, format } => DeviceEventDto::FormatChanged {
                device_id,
                format: format.into(),
            },
            DeviceEvent::LevelUpdated {
                device_id,
                percent,
                dbfs,
            } => DeviceEventDto::LevelUpdated {
                device_id,
                percent,
                dbfs: (dbfs != f32::NEG_INFINITY).then_some(dbfs),
            },
        }
    }
}

/// Response containing pending events, oldest first.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventListResponse {
    pub events: Vec<DeviceEventDto>,
}

// ============================================================================
// Engine Handle Type
// ============================================================================

/// Opaque handle to the mic engine.
pub type MicEngineHandle = *mut c_void;

// ============================================================================
// Helper Functions
// ============================================================================

/// Allocate a C string from a Rust string. Caller must free with
/// mic_engine_free_string.
fn alloc_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => {
            // String contained a null byte, replace with empty
            CString::new("").unwrap().into_raw()
        }
    }
}

/// Parse a C string to a Rust string slice.
unsafe fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Install the global log subscriber once. The RUST_LOG environment
/// variable overrides `level` when present.
fn init_logging(level: Option<&str>) {
    static INIT: Once = Once::new();
    let level = level.unwrap_or("info").to_string();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        tracing::debug!(version = env!("CARGO_PKG_VERSION"), "mic engine ffi ready");
    });
}

// ============================================================================
// FFI Functions - Logging
// ============================================================================

/// Install the log subscriber without creating an engine.
///
/// # Arguments
/// * `level` - Log filter string (can be null for "info")
#[no_mangle]
pub extern "C" fn mic_engine_init_logging(level: *const c_char) {
    clear_last_error();

    let result = std::panic::catch_unwind(|| {
        let level = unsafe { parse_c_str(level) };
        init_logging(level);
    });

    if result.is_err() {
        set_last_error(ErrorCode::Panic, "panic in mic_engine_init_logging");
    }
}

// ============================================================================
// FFI Functions - Memory Management
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the mic_engine_* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub extern "C" fn mic_engine_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = std::panic::catch_unwind(|| unsafe {
        let _ = CString::from_raw(ptr);
    });
}

// ============================================================================
// FFI Functions - Error Handling
// ============================================================================

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "C" fn mic_engine_last_error_code() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as i32)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with mic_engine_free_string().
/// Returns null if no error.
#[no_mangle]
pub extern "C" fn mic_engine_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

// ============================================================================
// FFI Functions - Utility
// ============================================================================

/// Get the library version.
///
/// # Returns
/// Version string. Caller must free with mic_engine_free_string().
#[no_mangle]
pub extern "C" fn mic_engine_version() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mic_engine::DeviceRole;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(
            ErrorCode::from(AudioError::DeviceNotFound {
                device_id: "test".to_string()
            }),
            ErrorCode::DeviceNotFound
        );
        assert_eq!(
            ErrorCode::from(AudioError::NoDefaultDevice {
                role: DeviceRole::Console
            }),
            ErrorCode::NoDefaultDevice
        );
        assert_eq!(
            ErrorCode::from(AudioError::MeterUnavailable {
                device_id: "test".to_string(),
                reason: "no session".to_string()
            }),
            ErrorCode::MeterUnavailable
        );
    }

    #[test]
    fn test_device_dto_json_shape() {
        let mut device = MicrophoneDevice::new("mic-1", "Blue Yeti");
        device.is_default_console = true;
        device.volume = 0.75;

        let json = serde_json::to_string(&DeviceListResponse {
            devices: vec![device.into()],
        })
        .unwrap();

        assert!(json.contains("\"is_default_console\":true"));
        assert!(json.contains("\"volume\":0.75"));
        // No format read yet: the field is omitted entirely.
        assert!(!json.contains("\"format\""));
    }

    #[test]
    fn test_event_dto_tagging() {
        let event = DeviceEvent::DefaultChanged {
            role: DeviceRole::Communications,
            device_id: Some("mic-1".to_string()),
        };
        let json = serde_json::to_string(&DeviceEventDto::from(event)).unwrap();
        assert!(json.contains("\"type\":\"default_changed\""));
        assert!(json.contains("\"role\":2"));
    }

    #[test]
    fn test_silence_serializes_without_dbfs() {
        let event = DeviceEvent::LevelUpdated {
            device_id: "mic-1".to_string(),
            percent: 0.0,
            dbfs: f32::NEG_INFINITY,
        };
        let json = serde_json::to_string(&DeviceEventDto::from(event)).unwrap();
        assert!(!json.contains("dbfs"));
    }

    #[test]
    fn test_engine_config_parses_with_missing_fields() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert!(config.log_level.is_none());

        let config: EngineConfig =
            serde_json::from_str(r#"{"log_level":"debug","suppression_linger_ms":100}"#).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.suppression_linger_ms, Some(100));
    }

    #[test]
    fn test_version() {
        let version = mic_engine_version();
        assert!(!version.is_null());
        unsafe {
            let s = CStr::from_ptr(version).to_str().unwrap();
            assert!(!s.is_empty());
        }
        mic_engine_free_string(version);
    }

    #[test]
    fn test_last_error_round_trip() {
        clear_last_error();
        assert_eq!(mic_engine_last_error_code(), 0);
        set_last_error(ErrorCode::DeviceNotFound, "device not found: mic-9");
        assert_eq!(
            mic_engine_last_error_code(),
            ErrorCode::DeviceNotFound as i32
        );
        let msg = mic_engine_last_error_message();
        assert!(!msg.is_null());
        mic_engine_free_string(msg);
    }
}
