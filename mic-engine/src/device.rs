//! Audio device data models.
//!
//! Defines the core data structures for representing microphone devices,
//! default-device roles, normalized change events, and engine errors.

use thiserror::Error;

/// A microphone device snapshot with its current state.
///
/// Snapshots are immutable once produced; a fresh enumeration or an applied
/// [`DeviceEvent`] yields a new value. The `id` is the only valid key;
/// display names are not unique.
#[derive(Debug, Clone, PartialEq)]
pub struct MicrophoneDevice {
    /// Opaque Windows endpoint ID (from IMMDevice::GetId). Stable across
    /// reboots; may change after a driver reinstall.
    pub id: String,

    /// Human-readable device name (from device properties). Display only.
    pub name: String,

    /// Whether this is the default device for the Console role
    /// (games, system sounds, most applications).
    pub is_default_console: bool,

    /// Whether this is the default device for the Communications role
    /// (Teams, Zoom, VoIP). Independent of the Console role.
    pub is_default_communications: bool,

    /// Current mute state, independent of the volume scalar.
    pub is_muted: bool,

    /// Volume as a scalar in [0.0, 1.0].
    pub volume: f32,

    /// Audio format, when the device reports one.
    pub format: Option<AudioFormat>,

    /// Latest smoothed meter value (0–100). Only meaningful while a capture
    /// session is metering this device; stays at the last known value (or 0)
    /// otherwise.
    pub input_level_percent: f32,
}

impl MicrophoneDevice {
    /// Create a device snapshot with default state.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_default_console: false,
            is_default_communications: false,
            is_muted: false,
            volume: 1.0,
            format: None,
            input_level_percent: 0.0,
        }
    }

    /// True if the device holds either default role.
    pub fn is_default_any(&self) -> bool {
        self.is_default_console || self.is_default_communications
    }

    /// True if the device holds the given role.
    pub fn is_default_for(&self, role: DeviceRole) -> bool {
        match role {
            DeviceRole::Console => self.is_default_console,
            DeviceRole::Communications => self.is_default_communications,
            DeviceRole::Multimedia => false,
        }
    }

    /// Volume as a rounded percentage (0–100).
    pub fn volume_percent(&self) -> u8 {
        (self.volume * 100.0).round() as u8
    }
}

/// Clamp a volume scalar into [0.0, 1.0]. Out-of-range input is clamped,
/// never rejected; NaN becomes 0.0.
pub fn clamp_scalar(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Audio format (sample rate, bit depth, channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 44100, 48000, 96000)
    pub sample_rate: u32,

    /// Bits per sample (e.g., 16, 24, 32)
    pub bit_depth: u16,

    /// Number of audio channels (typically 1 or 2 for microphones)
    pub channels: u16,
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rate_khz = self.sample_rate as f64 / 1000.0;
        if rate_khz.fract() == 0.0 {
            write!(f, "{}kHz/{}-bit", rate_khz as u32, self.bit_depth)
        } else {
            write!(f, "{:.1}kHz/{}-bit", rate_khz, self.bit_depth)
        }
    }
}

/// Default-device role (maps to the Windows ERole enum).
///
/// Console and Communications are independently assignable; Multimedia
/// exists in the OS model but is never targeted by the engine's composite
/// role operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DeviceRole {
    /// Games, system sounds, most general applications
    Console = 0,

    /// Music players, video players
    Multimedia = 1,

    /// Teams, Zoom, Discord, and other VoIP applications
    Communications = 2,
}

impl DeviceRole {
    /// Decode the wire value used by the FFI boundary and the OS enum.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(DeviceRole::Console),
            1 => Some(DeviceRole::Multimedia),
            2 => Some(DeviceRole::Communications),
            _ => None,
        }
    }
}

/// Normalized events from the Windows audio system.
///
/// Per-device ordering follows the order the OS raised the underlying
/// notifications; no ordering is guaranteed across devices.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A capture device became active (hot-plug or re-enabled).
    DeviceAdded { device_id: String },

    /// A capture device left the active state (unplug, disable, removal).
    DeviceRemoved { device_id: String },

    /// The default device changed for a role. `device_id` is `None` when the
    /// role has no assignment left (e.g., last microphone unplugged).
    DefaultChanged {
        role: DeviceRole,
        device_id: Option<String>,
    },

    /// Volume or mute state changed on a device.
    VolumeChanged {
        device_id: String,
        volume: f32,
        muted: bool,
    },

    /// Audio format changed on a device.
    FormatChanged {
        device_id: String,
        format: AudioFormat,
    },

    /// New meter reading for a device. `dbfs` is `f32::NEG_INFINITY` for
    /// true digital silence.
    LevelUpdated {
        device_id: String,
        percent: f32,
        dbfs: f32,
    },
}

impl DeviceEvent {
    /// The device this event concerns, when it names exactly one.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            DeviceEvent::DeviceAdded { device_id }
            | DeviceEvent::DeviceRemoved { device_id }
            | DeviceEvent::VolumeChanged { device_id, .. }
            | DeviceEvent::FormatChanged { device_id, .. }
            | DeviceEvent::LevelUpdated { device_id, .. } => Some(device_id),
            DeviceEvent::DefaultChanged { device_id, .. } => device_id.as_deref(),
        }
    }
}

/// Engine error types.
///
/// Native failures carry the raw HRESULT so the enum stays comparable and
/// platform-free; the Windows modules construct these from
/// `windows::core::Error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("no default capture device for role {role:?}")]
    NoDefaultDevice { role: DeviceRole },

    #[error("control surface call {operation} failed ({code:#010x})")]
    ControlSurface { operation: &'static str, code: i32 },

    #[error("level metering unavailable for {device_id}: {reason}")]
    MeterUnavailable { device_id: String, reason: String },

    #[error("notification registration failed ({code:#010x})")]
    NotificationRegistration { code: i32 },

    #[error("COM initialization failed ({code:#010x})")]
    ComInit { code: i32 },

    #[error("device enumeration failed ({code:#010x})")]
    Enumeration { code: i32 },

    #[error("string conversion failed: {0}")]
    StringConversion(String),

    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl AudioError {
    pub fn device_not_found(device_id: impl Into<String>) -> Self {
        AudioError::DeviceNotFound {
            device_id: device_id.into(),
        }
    }

    pub fn meter_unavailable(device_id: impl Into<String>, reason: impl Into<String>) -> Self {
        AudioError::MeterUnavailable {
            device_id: device_id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(windows)]
impl AudioError {
    pub(crate) fn control_surface(operation: &'static str, err: windows::core::Error) -> Self {
        AudioError::ControlSurface {
            operation,
            code: err.code().0,
        }
    }

    pub(crate) fn notification_registration(err: windows::core::Error) -> Self {
        AudioError::NotificationRegistration { code: err.code().0 }
    }

    pub(crate) fn com_init(err: windows::core::Error) -> Self {
        AudioError::ComInit { code: err.code().0 }
    }

    pub(crate) fn enumeration(err: windows::core::Error) -> Self {
        AudioError::Enumeration { code: err.code().0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_scalar_limits_range() {
        assert_eq!(clamp_scalar(1.5), 1.0);
        assert_eq!(clamp_scalar(-0.25), 0.0);
        assert_eq!(clamp_scalar(0.5), 0.5);
        assert_eq!(clamp_scalar(f32::NAN), 0.0);
    }

    #[test]
    fn role_raw_round_trip() {
        for role in [
            DeviceRole::Console,
            DeviceRole::Multimedia,
            DeviceRole::Communications,
        ] {
            assert_eq!(DeviceRole::from_raw(role as u32), Some(role));
        }
        assert_eq!(DeviceRole::from_raw(3), None);
    }

    #[test]
    fn format_display() {
        let f = AudioFormat {
            sample_rate: 48000,
            bit_depth: 24,
            channels: 2,
        };
        assert_eq!(f.to_string(), "48kHz/24-bit");

        let f = AudioFormat {
            sample_rate: 44100,
            bit_depth: 16,
            channels: 1,
        };
        assert_eq!(f.to_string(), "44.1kHz/16-bit");
    }

    #[test]
    fn error_display_includes_hresult() {
        let err = AudioError::ControlSurface {
            operation: "SetDefaultEndpoint",
            code: 0x80070005u32 as i32,
        };
        let text = err.to_string();
        assert!(text.contains("SetDefaultEndpoint"));
        assert!(text.contains("0x80070005"));
    }

    #[test]
    fn event_device_id_extraction() {
        let e = DeviceEvent::VolumeChanged {
            device_id: "mic-a".into(),
            volume: 0.5,
            muted: false,
        };
        assert_eq!(e.device_id(), Some("mic-a"));

        let e = DeviceEvent::DefaultChanged {
            role: DeviceRole::Console,
            device_id: None,
        };
        assert_eq!(e.device_id(), None);
    }
}
