//! Windows Microphone Engine - Library
//!
//! Core engine for managing microphone capture endpoints on Windows.
//!
//! ## Features
//!
//! - Enumerate active capture devices with name, volume, mute, format, and
//!   default-role state
//! - Set the default device for the Console and Communications roles,
//!   together or independently
//! - Per-device volume and mute control with clamped scalars
//! - Normalized change events for hot-plug, default-role, volume, and
//!   format changes
//! - Real-time input level metering with dBFS conversion, color zones, and
//!   a held peak that decays
//! - Feedback suppression so the engine's own writes do not come back as
//!   external change events
//!
//! The data model, meter math, device mirror, and suppression logic are
//! portable; the modules that talk to the OS are Windows-only.

pub mod device;
pub mod meter;
pub mod state;
pub mod suppression;

#[cfg(windows)]
pub mod capture;
#[cfg(windows)]
pub mod com;
#[cfg(windows)]
pub mod engine;
#[cfg(windows)]
pub mod enumerator;
#[cfg(windows)]
pub mod notifications;
#[cfg(windows)]
pub mod policy;
#[cfg(windows)]
pub mod volume;

pub use device::{AudioError, AudioFormat, DeviceEvent, DeviceRole, MicrophoneDevice};
pub use meter::{LevelZone, MeterConfig, MeterSnapshot, MeterState};
pub use state::DeviceSet;
pub use suppression::{ControlField, SuppressionGuard, SuppressionRegistry};

#[cfg(windows)]
pub use engine::{EngineConfig, MicEngine};
#[cfg(windows)]
pub use enumerator::DeviceEnumerator;
