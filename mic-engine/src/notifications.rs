//! Change notifications from the Windows audio system.
//!
//! Two COM callback implementations forward into one channel:
//! [`DeviceNotificationClient`] (IMMNotificationClient) for device arrival,
//! removal, state, default-role, and property changes, and
//! [`VolumeNotificationClient`] (IAudioEndpointVolumeCallback) for per-device
//! volume and mute changes. Callbacks run on OS threads; they only translate
//! and send, never touch COM, block, or decide suppression. Everything else
//! happens on the engine's worker thread.

use crate::device::{AudioError, DeviceEvent, DeviceRole};
use std::sync::mpsc::{Receiver, Sender};
use windows::core::{implement, PCWSTR};
use windows::Win32::Media::Audio::Endpoints::{
    IAudioEndpointVolume, IAudioEndpointVolumeCallback, IAudioEndpointVolumeCallback_Impl,
};
use windows::Win32::Media::Audio::{
    eCapture, eCommunications, eConsole, EDataFlow, ERole, IMMDevice, IMMDeviceEnumerator,
    IMMNotificationClient, IMMNotificationClient_Impl, AUDIO_VOLUME_NOTIFICATION_DATA,
    DEVICE_STATE, DEVICE_STATE_ACTIVE, PKEY_AudioEngine_DeviceFormat,
};
use windows::Win32::System::Com::CLSCTX_ALL;
// Re-export windows_core so the implement macro can find it
#[allow(unused_imports)]
use windows_core;

/// Raw notification forwarded off the COM callback threads.
pub enum Notification {
    /// A fully formed event. Volume data arrives complete in the callback
    /// payload, so those come through here too.
    Event(DeviceEvent),

    /// The device format property changed. Reading the new format takes COM
    /// calls, so the callback only hints and the worker does the read.
    FormatHint { device_id: String },
}

/// Create the channel the callback clients send into.
pub fn notification_channel() -> (Sender<Notification>, Receiver<Notification>) {
    std::sync::mpsc::channel()
}

/// Notification client that forwards device-level changes to a channel.
#[implement(IMMNotificationClient)]
pub struct DeviceNotificationClient {
    sender: Sender<Notification>,
}

impl DeviceNotificationClient {
    pub fn new(sender: Sender<Notification>) -> Self {
        Self { sender }
    }

    /// Register with an enumerator. Takes ownership of self because the COM
    /// interface needs to own the data; the returned interface is the handle
    /// for [`unregister_device_client`].
    pub fn register(
        self,
        enumerator: &IMMDeviceEnumerator,
    ) -> Result<IMMNotificationClient, AudioError> {
        unsafe {
            let client: IMMNotificationClient = self.into();
            enumerator
                .RegisterEndpointNotificationCallback(&client)
                .map_err(AudioError::notification_registration)?;
            Ok(client)
        }
    }

    fn convert_role(role: ERole) -> DeviceRole {
        if role == eConsole {
            DeviceRole::Console
        } else if role == eCommunications {
            DeviceRole::Communications
        } else {
            DeviceRole::Multimedia
        }
    }
}

/// Unregister a client previously returned by
/// [`DeviceNotificationClient::register`].
pub fn unregister_device_client(
    enumerator: &IMMDeviceEnumerator,
    client: &IMMNotificationClient,
) -> Result<(), AudioError> {
    unsafe {
        enumerator
            .UnregisterEndpointNotificationCallback(client)
            .map_err(AudioError::notification_registration)
    }
}

impl IMMNotificationClient_Impl for DeviceNotificationClient_Impl {
    fn OnDeviceStateChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        dwnewstate: DEVICE_STATE,
    ) -> windows::core::Result<()> {
        unsafe {
            if let Ok(id) = pwstrdeviceid.to_string() {
                // Becoming active is an arrival; disabled, not-present and
                // unplugged all read as a removal.
                let event = if dwnewstate == DEVICE_STATE_ACTIVE {
                    DeviceEvent::DeviceAdded { device_id: id }
                } else {
                    DeviceEvent::DeviceRemoved { device_id: id }
                };
                let _ = self.sender.send(Notification::Event(event));
            }
        }
        Ok(())
    }

    fn OnDeviceAdded(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        unsafe {
            if let Ok(id) = pwstrdeviceid.to_string() {
                let _ = self
                    .sender
                    .send(Notification::Event(DeviceEvent::DeviceAdded {
                        device_id: id,
                    }));
            }
        }
        Ok(())
    }

    fn OnDeviceRemoved(&self, pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        unsafe {
            if let Ok(id) = pwstrdeviceid.to_string() {
                let _ = self
                    .sender
                    .send(Notification::Event(DeviceEvent::DeviceRemoved {
                        device_id: id,
                    }));
            }
        }
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        role: ERole,
        pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        // Render-side default changes are not ours
        if flow != eCapture {
            return Ok(());
        }

        unsafe {
            let device_id = if pwstrdefaultdeviceid.is_null() {
                None
            } else {
                pwstrdefaultdeviceid.to_string().ok().filter(|s| !s.is_empty())
            };

            let _ = self
                .sender
                .send(Notification::Event(DeviceEvent::DefaultChanged {
                    role: DeviceNotificationClient::convert_role(role),
                    device_id,
                }));
        }
        Ok(())
    }

    fn OnPropertyValueChanged(
        &self,
        pwstrdeviceid: &PCWSTR,
        key: &windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY,
    ) -> windows::core::Result<()> {
        // Only the engine format key matters; everything else is icon and
        // naming churn.
        if key.fmtid != PKEY_AudioEngine_DeviceFormat.fmtid
            || key.pid != PKEY_AudioEngine_DeviceFormat.pid
        {
            return Ok(());
        }

        unsafe {
            if let Ok(id) = pwstrdeviceid.to_string() {
                let _ = self
                    .sender
                    .send(Notification::FormatHint { device_id: id });
            }
        }
        Ok(())
    }
}

/// Volume-change callback bound to one device.
#[implement(IAudioEndpointVolumeCallback)]
pub struct VolumeNotificationClient {
    device_id: String,
    sender: Sender<Notification>,
}

impl VolumeNotificationClient {
    pub fn new(device_id: impl Into<String>, sender: Sender<Notification>) -> Self {
        Self {
            device_id: device_id.into(),
            sender,
        }
    }
}

impl IAudioEndpointVolumeCallback_Impl for VolumeNotificationClient_Impl {
    fn OnNotify(
        &self,
        pnotify: *mut AUDIO_VOLUME_NOTIFICATION_DATA,
    ) -> windows::core::Result<()> {
        unsafe {
            if pnotify.is_null() {
                return Ok(());
            }
            let data = &*pnotify;
            let _ = self
                .sender
                .send(Notification::Event(DeviceEvent::VolumeChanged {
                    device_id: self.device_id.clone(),
                    volume: data.fMasterVolume,
                    muted: data.bMuted.as_bool(),
                }));
        }
        Ok(())
    }
}

/// A live volume watch: the endpoint volume interface plus the registered
/// callback. Kept per device by the engine; dropping without
/// [`unregister`](Self::unregister) leaves the registration to die with the
/// interface.
pub struct VolumeWatch {
    endpoint: IAudioEndpointVolume,
    callback: IAudioEndpointVolumeCallback,
}

impl VolumeWatch {
    /// Activate the endpoint volume interface on `device` and register a
    /// change callback that reports under `device_id`.
    pub fn register(
        device: &IMMDevice,
        device_id: &str,
        sender: Sender<Notification>,
    ) -> Result<Self, AudioError> {
        unsafe {
            let endpoint: IAudioEndpointVolume = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| AudioError::control_surface("IAudioEndpointVolume activate", e))?;

            let callback: IAudioEndpointVolumeCallback =
                VolumeNotificationClient::new(device_id, sender).into();
            endpoint
                .RegisterControlChangeNotify(&callback)
                .map_err(AudioError::notification_registration)?;

            Ok(Self { endpoint, callback })
        }
    }

    pub fn unregister(self) {
        unsafe {
            let _ = self.endpoint.UnregisterControlChangeNotify(&self.callback);
        }
    }
}
