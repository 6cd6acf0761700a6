//! In-memory mirror of the capture device set.
//!
//! The engine keeps one [`DeviceSet`] per session, seeded by a full
//! enumeration and then advanced by applying normalized [`DeviceEvent`]s.
//! Hosts read snapshots from here instead of hitting the OS on every query.

use crate::device::{clamp_scalar, DeviceEvent, DeviceRole, MicrophoneDevice};

/// Ordered collection of microphone snapshots, keyed by device ID.
#[derive(Debug, Default, Clone)]
pub struct DeviceSet {
    devices: Vec<MicrophoneDevice>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &[MicrophoneDevice] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, device_id: &str) -> Option<&MicrophoneDevice> {
        self.devices.iter().find(|d| d.id == device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.get(device_id).is_some()
    }

    /// The device currently holding `role`, if any.
    pub fn default_for(&self, role: DeviceRole) -> Option<&MicrophoneDevice> {
        self.devices.iter().find(|d| d.is_default_for(role))
    }

    /// Whether the Console default is muted. False when no device holds the
    /// role; hosts use this for the "am I muted" indicator.
    pub fn is_default_muted(&self) -> bool {
        self.default_for(DeviceRole::Console)
            .map(|d| d.is_muted)
            .unwrap_or(false)
    }

    /// Replace the whole set from a fresh enumeration. Meter levels carry
    /// over for devices that survive the refresh so an enumeration does not
    /// blank active meters.
    pub fn replace_all(&mut self, mut devices: Vec<MicrophoneDevice>) {
        for device in &mut devices {
            if let Some(old) = self.get(&device.id) {
                device.input_level_percent = old.input_level_percent;
            }
        }
        self.devices = devices;
    }

    /// Insert a device, or replace the existing snapshot with the same ID.
    pub fn upsert(&mut self, device: MicrophoneDevice) {
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(slot) => *slot = device,
            None => self.devices.push(device),
        }
    }

    /// Apply one event to the mirror. Returns true if anything changed.
    ///
    /// `DeviceAdded` is not handled here: an add carries no state beyond the
    /// ID, so the engine answers it with a fresh enumeration and
    /// [`upsert`](Self::upsert).
    pub fn apply(&mut self, event: &DeviceEvent) -> bool {
        match event {
            DeviceEvent::DeviceAdded { .. } => false,

            DeviceEvent::DeviceRemoved { device_id } => {
                let before = self.devices.len();
                self.devices.retain(|d| d.id != *device_id);
                self.devices.len() != before
            }

            DeviceEvent::DefaultChanged { role, device_id } => {
                let mut changed = false;
                for device in &mut self.devices {
                    let holds = device_id.as_deref() == Some(device.id.as_str());
                    let flag = match role {
                        DeviceRole::Console => &mut device.is_default_console,
                        DeviceRole::Communications => &mut device.is_default_communications,
                        // Multimedia is tracked by the OS but not mirrored.
                        DeviceRole::Multimedia => continue,
                    };
                    if *flag != holds {
                        *flag = holds;
                        changed = true;
                    }
                }
                changed
            }

            DeviceEvent::VolumeChanged {
                device_id,
                volume,
                muted,
            } => match self.devices.iter_mut().find(|d| d.id == *device_id) {
                Some(device) => {
                    device.volume = clamp_scalar(*volume);
                    device.is_muted = *muted;
                    true
                }
                None => false,
            },

            DeviceEvent::FormatChanged { device_id, format } => {
                match self.devices.iter_mut().find(|d| d.id == *device_id) {
                    Some(device) => {
                        device.format = Some(*format);
                        true
                    }
                    None => false,
                }
            }

            DeviceEvent::LevelUpdated {
                device_id, percent, ..
            } => match self.devices.iter_mut().find(|d| d.id == *device_id) {
                Some(device) => {
                    device.input_level_percent = *percent;
                    true
                }
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AudioFormat;

    fn mic(id: &str) -> MicrophoneDevice {
        MicrophoneDevice::new(id, format!("Microphone {id}"))
    }

    fn two_device_set() -> DeviceSet {
        let mut set = DeviceSet::new();
        let mut a = mic("mic-a");
        a.is_default_console = true;
        a.is_default_communications = true;
        set.upsert(a);
        set.upsert(mic("mic-b"));
        set
    }

    #[test]
    fn roles_change_independently() {
        let mut set = two_device_set();

        // Move only the console role to B; A keeps communications.
        let changed = set.apply(&DeviceEvent::DefaultChanged {
            role: DeviceRole::Console,
            device_id: Some("mic-b".into()),
        });
        assert!(changed);

        let a = set.get("mic-a").unwrap();
        let b = set.get("mic-b").unwrap();
        assert!(!a.is_default_console);
        assert!(a.is_default_communications);
        assert!(b.is_default_console);
        assert!(!b.is_default_communications);
    }

    #[test]
    fn default_cleared_when_no_device_holds_role() {
        let mut set = two_device_set();
        set.apply(&DeviceEvent::DefaultChanged {
            role: DeviceRole::Console,
            device_id: None,
        });
        assert!(set.default_for(DeviceRole::Console).is_none());
        assert_eq!(
            set.default_for(DeviceRole::Communications).map(|d| d.id.as_str()),
            Some("mic-a")
        );
    }

    #[test]
    fn default_muted_tracks_console_holder() {
        let mut set = two_device_set();
        assert!(!set.is_default_muted());

        set.apply(&DeviceEvent::VolumeChanged {
            device_id: "mic-a".into(),
            volume: 1.0,
            muted: true,
        });
        assert!(set.is_default_muted());

        // Muting a non-default device does not trip the indicator.
        set.apply(&DeviceEvent::DefaultChanged {
            role: DeviceRole::Console,
            device_id: Some("mic-b".into()),
        });
        assert!(!set.is_default_muted());
    }

    #[test]
    fn volume_and_mute_are_independent() {
        let mut set = two_device_set();
        set.apply(&DeviceEvent::VolumeChanged {
            device_id: "mic-a".into(),
            volume: 0.8,
            muted: false,
        });
        set.apply(&DeviceEvent::VolumeChanged {
            device_id: "mic-a".into(),
            volume: 0.8,
            muted: true,
        });

        let a = set.get("mic-a").unwrap();
        assert!(a.is_muted);
        // Muting preserves the volume scalar.
        assert!((a.volume - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn volume_events_are_clamped() {
        let mut set = two_device_set();
        set.apply(&DeviceEvent::VolumeChanged {
            device_id: "mic-a".into(),
            volume: 1.5,
            muted: false,
        });
        assert_eq!(set.get("mic-a").unwrap().volume, 1.0);
    }

    #[test]
    fn removal_drops_device_and_roles() {
        let mut set = two_device_set();
        let changed = set.apply(&DeviceEvent::DeviceRemoved {
            device_id: "mic-a".into(),
        });
        assert!(changed);
        assert!(set.get("mic-a").is_none());
        assert!(set.default_for(DeviceRole::Console).is_none());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn events_for_unknown_devices_are_ignored() {
        let mut set = two_device_set();
        let changed = set.apply(&DeviceEvent::VolumeChanged {
            device_id: "mic-zz".into(),
            volume: 0.3,
            muted: false,
        });
        assert!(!changed);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn format_change_applies() {
        let mut set = two_device_set();
        let format = AudioFormat {
            sample_rate: 96000,
            bit_depth: 32,
            channels: 2,
        };
        set.apply(&DeviceEvent::FormatChanged {
            device_id: "mic-b".into(),
            format,
        });
        assert_eq!(set.get("mic-b").unwrap().format, Some(format));
    }

    #[test]
    fn refresh_preserves_meter_levels() {
        let mut set = two_device_set();
        set.apply(&DeviceEvent::LevelUpdated {
            device_id: "mic-a".into(),
            percent: 62.0,
            dbfs: -36.0,
        });

        // Re-enumeration returns fresh snapshots without meter state.
        set.replace_all(vec![mic("mic-a"), mic("mic-c")]);
        assert_eq!(set.get("mic-a").unwrap().input_level_percent, 62.0);
        assert_eq!(set.get("mic-c").unwrap().input_level_percent, 0.0);
        assert!(set.get("mic-b").is_none());
    }
}
