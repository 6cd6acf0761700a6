//! Volume and mute control using IAudioEndpointVolume.
//!
//! Volume is a scalar in [0.0, 1.0]; out-of-range requests are clamped,
//! never rejected. Mute is a separate flag and leaves the scalar untouched.

use crate::device::{clamp_scalar, AudioError};
use windows::Win32::Media::Audio::{Endpoints::IAudioEndpointVolume, IMMDevice};
use windows::Win32::System::Com::CLSCTX_ALL;

/// Volume controller bound to one device's endpoint volume interface.
pub struct VolumeController {
    endpoint_volume: IAudioEndpointVolume,
}

impl VolumeController {
    pub fn new(device: &IMMDevice) -> Result<Self, AudioError> {
        unsafe {
            let endpoint_volume: IAudioEndpointVolume = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| AudioError::control_surface("IAudioEndpointVolume activate", e))?;

            Ok(Self { endpoint_volume })
        }
    }

    pub fn get_mute(&self) -> Result<bool, AudioError> {
        unsafe {
            let muted = self
                .endpoint_volume
                .GetMute()
                .map_err(|e| AudioError::control_surface("GetMute", e))?;
            Ok(muted.as_bool())
        }
    }

    pub fn set_mute(&self, muted: bool) -> Result<(), AudioError> {
        unsafe {
            self.endpoint_volume
                .SetMute(muted, std::ptr::null())
                .map_err(|e| AudioError::control_surface("SetMute", e))?;
            Ok(())
        }
    }

    /// Flip the mute state and return the new state.
    pub fn toggle_mute(&self) -> Result<bool, AudioError> {
        let new_state = !self.get_mute()?;
        self.set_mute(new_state)?;
        Ok(new_state)
    }

    pub fn get_volume(&self) -> Result<f32, AudioError> {
        unsafe {
            self.endpoint_volume
                .GetMasterVolumeLevelScalar()
                .map_err(|e| AudioError::control_surface("GetMasterVolumeLevelScalar", e))
        }
    }

    /// Set the volume scalar. The request is clamped into [0.0, 1.0] and
    /// the clamped value is what lands on the device.
    pub fn set_volume(&self, level: f32) -> Result<f32, AudioError> {
        let level = clamp_scalar(level);
        unsafe {
            self.endpoint_volume
                .SetMasterVolumeLevelScalar(level, std::ptr::null())
                .map_err(|e| AudioError::control_surface("SetMasterVolumeLevelScalar", e))?;
        }
        Ok(level)
    }
}
