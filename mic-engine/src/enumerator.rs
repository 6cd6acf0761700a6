//! Device enumeration using the Windows MMDevice API.
//!
//! Produces complete [`MicrophoneDevice`] snapshots: identity, default-role
//! flags, live volume and mute state, and the shared-mode mix format. A
//! device that fails any per-device read is skipped, never fatal; only the
//! enumeration itself failing is an error.

use crate::device::{AudioError, AudioFormat, DeviceRole, MicrophoneDevice};
use windows::core::PCWSTR;
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::Media::Audio::{
    eCapture, eCommunications, eConsole, eMultimedia, IAudioClient, IMMDevice, IMMDeviceEnumerator,
    MMDeviceEnumerator, DEVICE_STATE_ACTIVE, WAVEFORMATEX,
};
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL, STGM};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

/// Encode a device ID as a null-terminated wide string for PCWSTR calls.
/// The returned buffer must outlive the PCWSTR built from it.
pub(crate) fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Device enumerator over active capture endpoints.
///
/// COM must be initialized on the calling thread before construction, and
/// the value must not leave that thread.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    pub fn new() -> Result<Self, AudioError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(AudioError::enumeration)?;

            Ok(Self { enumerator })
        }
    }

    /// Snapshot all active microphone devices.
    pub fn get_devices(&self) -> Result<Vec<MicrophoneDevice>, AudioError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(AudioError::enumeration)?;

            let count = collection.GetCount().map_err(AudioError::enumeration)?;

            let default_console = self.default_device_id(DeviceRole::Console)?;
            let default_comm = self.default_device_id(DeviceRole::Communications)?;

            let mut devices = Vec::with_capacity(count as usize);

            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(index = i, "skipping unreadable endpoint: {e}");
                        continue;
                    }
                };

                match self.device_to_microphone(&device, &default_console, &default_comm) {
                    Ok(mic) => devices.push(mic),
                    Err(e) => {
                        tracing::warn!(index = i, "skipping endpoint: {e}");
                    }
                }
            }

            Ok(devices)
        }
    }

    /// Snapshot one device by ID.
    pub fn get_device(&self, device_id: &str) -> Result<MicrophoneDevice, AudioError> {
        unsafe {
            let wide = to_wide(device_id);
            let device = self
                .enumerator
                .GetDevice(PCWSTR::from_raw(wide.as_ptr()))
                .map_err(|_| AudioError::device_not_found(device_id))?;

            let default_console = self.default_device_id(DeviceRole::Console)?;
            let default_comm = self.default_device_id(DeviceRole::Communications)?;

            self.device_to_microphone(&device, &default_console, &default_comm)
        }
    }

    /// Resolve the raw IMMDevice for a device ID. Used by the control and
    /// capture layers.
    pub fn raw_device(&self, device_id: &str) -> Result<IMMDevice, AudioError> {
        unsafe {
            let wide = to_wide(device_id);
            self.enumerator
                .GetDevice(PCWSTR::from_raw(wide.as_ptr()))
                .map_err(|_| AudioError::device_not_found(device_id))
        }
    }

    /// The default capture device ID for a role, or `None` when the role has
    /// no assignment (no active capture devices at all, typically).
    pub fn default_device_id(&self, role: DeviceRole) -> Result<Option<String>, AudioError> {
        unsafe {
            let erole = match role {
                DeviceRole::Console => eConsole,
                DeviceRole::Multimedia => eMultimedia,
                DeviceRole::Communications => eCommunications,
            };

            let device = match self.enumerator.GetDefaultAudioEndpoint(eCapture, erole) {
                Ok(d) => d,
                Err(_) => return Ok(None),
            };

            let id = device.GetId().map_err(AudioError::enumeration)?;
            let id_string = id
                .to_string()
                .map_err(|e| AudioError::StringConversion(e.to_string()))?;

            Ok(Some(id_string))
        }
    }

    /// The raw IMMDeviceEnumerator, for notification registration.
    pub fn raw_enumerator(&self) -> &IMMDeviceEnumerator {
        &self.enumerator
    }

    fn device_to_microphone(
        &self,
        device: &IMMDevice,
        default_console: &Option<String>,
        default_comm: &Option<String>,
    ) -> Result<MicrophoneDevice, AudioError> {
        unsafe {
            let id = device.GetId().map_err(AudioError::enumeration)?;
            let id_string = id
                .to_string()
                .map_err(|e| AudioError::StringConversion(e.to_string()))?;

            let props: IPropertyStore = device
                .OpenPropertyStore(STGM(0))
                .map_err(AudioError::enumeration)?;

            let name = self
                .device_name(&props)
                .unwrap_or_else(|| "Unknown".to_string());

            let is_default_console = default_console.as_deref() == Some(id_string.as_str());
            let is_default_communications = default_comm.as_deref() == Some(id_string.as_str());

            // Volume and mute are read live so the snapshot is complete;
            // a device without an endpoint volume interface keeps defaults.
            let (volume, is_muted) = self.volume_state(device).unwrap_or((1.0, false));

            let format = self.audio_format(device);

            Ok(MicrophoneDevice {
                id: id_string,
                name,
                is_default_console,
                is_default_communications,
                is_muted,
                volume,
                format,
                input_level_percent: 0.0,
            })
        }
    }

    /// Friendly name from the device property store.
    fn device_name(&self, props: &IPropertyStore) -> Option<String> {
        unsafe {
            // DEVPROPKEY and PROPERTYKEY share layout but not type
            let key = PROPERTYKEY {
                fmtid: DEVPKEY_Device_FriendlyName.fmtid,
                pid: DEVPKEY_Device_FriendlyName.pid,
            };

            let prop = match props.GetValue(&key) {
                Ok(p) => p,
                Err(_) => return None,
            };

            let s = prop.to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
    }

    fn volume_state(&self, device: &IMMDevice) -> Option<(f32, bool)> {
        unsafe {
            let endpoint: IAudioEndpointVolume = device.Activate(CLSCTX_ALL, None).ok()?;
            let volume = endpoint.GetMasterVolumeLevelScalar().ok()?;
            let muted = endpoint.GetMute().ok()?.as_bool();
            Some((volume, muted))
        }
    }

    /// Shared-mode mix format for a device, if it reports one.
    pub fn audio_format(&self, device: &IMMDevice) -> Option<AudioFormat> {
        unsafe {
            let audio_client: IAudioClient = match device.Activate(CLSCTX_ALL, None) {
                Ok(client) => client,
                Err(_) => return None,
            };

            let format_ptr = match audio_client.GetMixFormat() {
                Ok(ptr) => ptr,
                Err(_) => return None,
            };

            if format_ptr.is_null() {
                return None;
            }

            let format: &WAVEFORMATEX = &*format_ptr;
            let audio_format = AudioFormat {
                sample_rate: format.nSamplesPerSec,
                bit_depth: format.wBitsPerSample,
                channels: format.nChannels,
            };

            CoTaskMemFree(Some(format_ptr as *const _));

            Some(audio_format)
        }
    }

    /// Mix format for a device by ID.
    pub fn audio_format_by_id(&self, device_id: &str) -> Option<AudioFormat> {
        let device = self.raw_device(device_id).ok()?;
        self.audio_format(&device)
    }
}
