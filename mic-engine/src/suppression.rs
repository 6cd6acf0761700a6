//! Feedback suppression for engine-initiated control writes.
//!
//! Every control write (volume, mute, default role) lands back on the
//! process as an OS change notification. The registry brackets each write
//! with an RAII guard keyed by device and field; the event pump asks
//! [`SuppressionRegistry::is_echo`] before forwarding a notification and
//! drops the ones the engine caused itself. Genuine external changes on
//! other devices or other fields pass through untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Which control surface a write touches. Volume and mute arrive through
/// the same OS callback but are bracketed separately so an external mute
/// during an engine volume write still gets through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlField {
    Volume,
    Mute,
    DefaultRole,
}

#[derive(Default)]
struct Entry {
    active: u32,
    ended_at: Option<Instant>,
}

/// Shared registry of in-flight and recently finished control writes.
///
/// Cloning is cheap; all clones share one map. The guard returned by
/// [`begin`](Self::begin) clears its bracket on drop, so suppression state
/// is released even when the write errors out.
#[derive(Clone)]
pub struct SuppressionRegistry {
    inner: Arc<Mutex<HashMap<(String, ControlField), Entry>>>,
    linger: Duration,
}

impl Default for SuppressionRegistry {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl SuppressionRegistry {
    /// `linger` is how long after a write completes its echo is still
    /// expected; OS notifications arrive asynchronously and can land after
    /// the guard has dropped.
    pub fn new(linger: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            linger,
        }
    }

    // Suppression state must stay consistent even if a guard holder panicked.
    fn lock(&self) -> MutexGuard<'_, HashMap<(String, ControlField), Entry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a suppression bracket for a write the engine is about to make.
    pub fn begin(&self, device_id: &str, field: ControlField) -> SuppressionGuard {
        let key = (device_id.to_string(), field);
        self.lock().entry(key.clone()).or_default().active += 1;
        SuppressionGuard {
            registry: self.clone(),
            key,
        }
    }

    /// Whether a notification for this device and field is an echo of an
    /// engine write: a bracket is open, or one closed within the linger
    /// window.
    pub fn is_echo(&self, device_id: &str, field: ControlField) -> bool {
        self.is_echo_at(device_id, field, Instant::now())
    }

    fn is_echo_at(&self, device_id: &str, field: ControlField, now: Instant) -> bool {
        let map = self.lock();
        match map.get(&(device_id.to_string(), field)) {
            Some(entry) if entry.active > 0 => true,
            Some(entry) => match entry.ended_at {
                Some(ended) => now.duration_since(ended) < self.linger,
                None => false,
            },
            None => false,
        }
    }

    /// Decide whether a combined volume/mute notification is an echo.
    ///
    /// The OS reports volume and mute together, so the caller first compares
    /// the payload against its mirror. A field that differs and has no
    /// bracket makes the whole event genuine; an event where nothing differs
    /// is a duplicate of an engine write when any bracket is open.
    pub fn volume_event_is_echo(
        &self,
        device_id: &str,
        volume_differs: bool,
        mute_differs: bool,
    ) -> bool {
        if volume_differs || mute_differs {
            (!volume_differs || self.is_echo(device_id, ControlField::Volume))
                && (!mute_differs || self.is_echo(device_id, ControlField::Mute))
        } else {
            self.is_echo(device_id, ControlField::Volume)
                || self.is_echo(device_id, ControlField::Mute)
        }
    }

    /// Drop all brackets for a device. Called when the device is removed;
    /// no further notifications can arrive for it.
    pub fn clear_device(&self, device_id: &str) {
        self.lock().retain(|(id, _), _| id != device_id);
    }

    fn end(&self, key: &(String, ControlField)) {
        let mut map = self.lock();
        if let Some(entry) = map.get_mut(key) {
            entry.active = entry.active.saturating_sub(1);
            if entry.active == 0 {
                entry.ended_at = Some(Instant::now());
            }
        }
    }
}

/// RAII bracket for one control write. Dropping it closes the bracket and
/// starts the linger window.
pub struct SuppressionGuard {
    registry: SuppressionRegistry,
    key: (String, ControlField),
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.registry.end(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_while_bracket_open() {
        let reg = SuppressionRegistry::default();
        let _guard = reg.begin("mic-a", ControlField::Volume);
        assert!(reg.is_echo("mic-a", ControlField::Volume));
    }

    #[test]
    fn other_device_and_field_pass_through() {
        let reg = SuppressionRegistry::default();
        let _guard = reg.begin("mic-a", ControlField::Volume);
        assert!(!reg.is_echo("mic-b", ControlField::Volume));
        assert!(!reg.is_echo("mic-a", ControlField::Mute));
    }

    #[test]
    fn echo_lingers_after_guard_drops() {
        let reg = SuppressionRegistry::new(Duration::from_millis(250));
        {
            let _guard = reg.begin("mic-a", ControlField::Mute);
        }
        // Just dropped: still within the linger window.
        assert!(reg.is_echo("mic-a", ControlField::Mute));
    }

    #[test]
    fn linger_window_expires() {
        let reg = SuppressionRegistry::new(Duration::from_millis(250));
        {
            let _guard = reg.begin("mic-a", ControlField::Volume);
        }
        let later = Instant::now() + Duration::from_millis(500);
        assert!(!reg.is_echo_at("mic-a", ControlField::Volume, later));
    }

    #[test]
    fn bracket_cleared_on_panic() {
        let reg = SuppressionRegistry::new(Duration::from_millis(0));
        let reg2 = reg.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = reg2.begin("mic-a", ControlField::Volume);
            panic!("write failed");
        });
        assert!(result.is_err());
        let later = Instant::now() + Duration::from_millis(1);
        assert!(!reg.is_echo_at("mic-a", ControlField::Volume, later));
    }

    #[test]
    fn overlapping_brackets_stay_open_until_last_drop() {
        let reg = SuppressionRegistry::new(Duration::from_millis(0));
        let g1 = reg.begin("mic-a", ControlField::Volume);
        let g2 = reg.begin("mic-a", ControlField::Volume);
        drop(g1);
        assert!(reg.is_echo("mic-a", ControlField::Volume));
        drop(g2);
        let later = Instant::now() + Duration::from_millis(1);
        assert!(!reg.is_echo_at("mic-a", ControlField::Volume, later));
    }

    #[test]
    fn clear_device_removes_brackets() {
        let reg = SuppressionRegistry::default();
        let _guard = reg.begin("mic-a", ControlField::Volume);
        reg.clear_device("mic-a");
        assert!(!reg.is_echo("mic-a", ControlField::Volume));
    }

    #[test]
    fn external_mute_passes_during_volume_write() {
        let reg = SuppressionRegistry::default();
        let _guard = reg.begin("mic-a", ControlField::Volume);
        // Someone muted the device in the OS UI while our volume write was
        // in flight: only the mute field differs, and mute has no bracket.
        assert!(!reg.volume_event_is_echo("mic-a", false, true));
    }

    #[test]
    fn own_volume_write_is_echo() {
        let reg = SuppressionRegistry::default();
        let _guard = reg.begin("mic-a", ControlField::Volume);
        assert!(reg.volume_event_is_echo("mic-a", true, false));
    }

    #[test]
    fn duplicate_notification_counts_as_echo_only_under_bracket() {
        let reg = SuppressionRegistry::default();
        assert!(!reg.volume_event_is_echo("mic-a", false, false));
        let _guard = reg.begin("mic-a", ControlField::Mute);
        assert!(reg.volume_event_is_echo("mic-a", false, false));
    }

    #[test]
    fn combined_change_needs_both_brackets() {
        let reg = SuppressionRegistry::default();
        let _volume = reg.begin("mic-a", ControlField::Volume);
        // Both fields differ but only volume is bracketed.
        assert!(!reg.volume_event_is_echo("mic-a", true, true));
        let _mute = reg.begin("mic-a", ControlField::Mute);
        assert!(reg.volume_event_is_echo("mic-a", true, true));
    }
}
