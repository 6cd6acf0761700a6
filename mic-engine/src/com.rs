//! COM apartment lifetime management.
//!
//! Every thread that touches the audio APIs brackets its work with a
//! [`ComGuard`]. Consumer-facing calls use the apartment-threaded model;
//! capture and notification worker threads use the multithreaded model.

use crate::device::AudioError;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::Com::{
    CoInitializeEx, CoUninitialize, COINIT, COINIT_APARTMENTTHREADED, COINIT_MULTITHREADED,
};

/// COM initialization guard that uninitializes COM on drop.
///
/// A host that already initialized the thread in a different apartment
/// model is left alone: `RPC_E_CHANGED_MODE` counts as success, and the
/// guard skips the matching `CoUninitialize`.
pub struct ComGuard {
    needs_uninit: bool,
}

impl ComGuard {
    /// Initialize the apartment-threaded model for the current thread.
    pub fn apartment_threaded() -> Result<Self, AudioError> {
        Self::init(COINIT_APARTMENTTHREADED)
    }

    /// Initialize the multithreaded model for the current thread. Used by
    /// the engine's worker and capture threads, which never pump messages.
    pub fn multithreaded() -> Result<Self, AudioError> {
        Self::init(COINIT_MULTITHREADED)
    }

    fn init(model: COINIT) -> Result<Self, AudioError> {
        unsafe {
            let hr = CoInitializeEx(None, model);
            if hr == RPC_E_CHANGED_MODE {
                return Ok(Self {
                    needs_uninit: false,
                });
            }
            hr.ok().map_err(AudioError::com_init)?;
        }
        Ok(Self { needs_uninit: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.needs_uninit {
            unsafe {
                CoUninitialize();
            }
        }
    }
}
