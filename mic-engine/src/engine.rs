//! Engine facade: one owned handle over enumeration, default-role control,
//! volume, notifications, and metering.
//!
//! A `MicEngine` owns a worker thread that registers the OS callbacks,
//! keeps the device mirror current, decides feedback suppression, and
//! forwards genuine changes to the consumer event queue. Control calls run
//! on the caller's thread with per-call COM initialization; nothing global
//! is shared between engine instances, and dropping the engine tears all
//! of it down.

use crate::capture::MeterEngine;
use crate::com::ComGuard;
use crate::device::{AudioError, DeviceEvent, DeviceRole, MicrophoneDevice};
use crate::enumerator::DeviceEnumerator;
use crate::meter::{MeterConfig, MeterSnapshot};
use crate::notifications::{
    notification_channel, unregister_device_client, DeviceNotificationClient, Notification,
    VolumeWatch,
};
use crate::policy;
use crate::state::DeviceSet;
use crate::suppression::{ControlField, SuppressionRegistry};
use crate::volume::VolumeController;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Engine construction knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub meter: MeterConfig,

    /// How long after an engine write its OS echo is still suppressed.
    pub suppression_linger: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            meter: MeterConfig::default(),
            suppression_linger: Duration::from_millis(250),
        }
    }
}

/// Owned handle over the Windows microphone subsystem.
///
/// Construction registers the device notification callback and seeds the
/// device mirror; a registration failure fails construction. Dropping the
/// handle (or calling [`shutdown`](Self::shutdown)) stops metering,
/// unregisters every callback, and joins the worker; no events are
/// delivered afterwards.
pub struct MicEngine {
    state: Arc<Mutex<DeviceSet>>,
    suppression: SuppressionRegistry,
    meters: Arc<Mutex<MeterEngine>>,
    consumer_rx: Receiver<DeviceEvent>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MicEngine {
    pub fn new(config: EngineConfig) -> Result<Self, AudioError> {
        let (hub_tx, hub_rx) = notification_channel();
        let (consumer_tx, consumer_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let state = Arc::new(Mutex::new(DeviceSet::new()));
        let suppression = SuppressionRegistry::new(config.suppression_linger);
        let meters = Arc::new(Mutex::new(MeterEngine::new(config.meter, hub_tx.clone())));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_state = Arc::clone(&state);
        let worker_suppression = suppression.clone();
        let worker_meters = Arc::clone(&meters);
        let worker_shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("mic-engine".into())
            .spawn(move || {
                worker_main(
                    hub_tx,
                    hub_rx,
                    consumer_tx,
                    worker_state,
                    worker_suppression,
                    worker_meters,
                    worker_shutdown,
                    ready_tx,
                );
            })
            .map_err(|e| AudioError::Unknown(format!("failed to spawn engine worker: {e}")))?;

        // The worker reports back once callbacks are registered and the
        // mirror is seeded, so construction failures surface here.
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                state,
                suppression,
                meters,
                consumer_rx,
                shutdown,
                worker: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Unknown(
                    "engine worker exited during startup".into(),
                ))
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceSet> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_meters(&self) -> MutexGuard<'_, MeterEngine> {
        self.meters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Queries (served from the mirror)
    // ------------------------------------------------------------------

    /// Snapshot of all tracked microphones.
    pub fn devices(&self) -> Vec<MicrophoneDevice> {
        self.lock_state().devices().to_vec()
    }

    /// Snapshot of one microphone.
    pub fn device(&self, device_id: &str) -> Result<MicrophoneDevice, AudioError> {
        self.lock_state()
            .get(device_id)
            .cloned()
            .ok_or_else(|| AudioError::device_not_found(device_id))
    }

    /// The device holding `role`.
    pub fn default_device(&self, role: DeviceRole) -> Result<MicrophoneDevice, AudioError> {
        self.lock_state()
            .default_for(role)
            .cloned()
            .ok_or(AudioError::NoDefaultDevice { role })
    }

    /// Re-enumerate from the OS and replace the mirror. Normally the event
    /// stream keeps the mirror current; this is the manual escape hatch.
    pub fn refresh(&self) -> Result<Vec<MicrophoneDevice>, AudioError> {
        let _com = ComGuard::apartment_threaded()?;
        let enumerator = DeviceEnumerator::new()?;
        let devices = enumerator.get_devices()?;
        self.lock_state().replace_all(devices.clone());
        Ok(devices)
    }

    // ------------------------------------------------------------------
    // Default-role control
    // ------------------------------------------------------------------

    /// Make the device the default for one role. The matching OS
    /// notification is suppressed; consumers learn about the change from
    /// the return of this call, not from an event.
    pub fn set_default_device(
        &self,
        device_id: &str,
        role: DeviceRole,
    ) -> Result<(), AudioError> {
        let _com = ComGuard::apartment_threaded()?;
        let enumerator = DeviceEnumerator::new()?;
        enumerator.raw_device(device_id)?;

        {
            let _bracket = self.suppression.begin(device_id, ControlField::DefaultRole);
            policy::set_default_device(device_id, role)?;
        }

        self.lock_state().apply(&DeviceEvent::DefaultChanged {
            role,
            device_id: Some(device_id.to_string()),
        });
        tracing::info!(device_id, ?role, "default device set");
        Ok(())
    }

    /// Make the device the default for both Console and Communications.
    pub fn set_default_device_all_roles(&self, device_id: &str) -> Result<(), AudioError> {
        let _com = ComGuard::apartment_threaded()?;
        let enumerator = DeviceEnumerator::new()?;
        enumerator.raw_device(device_id)?;

        {
            let _bracket = self.suppression.begin(device_id, ControlField::DefaultRole);
            policy::set_default_device_for_all_roles(device_id)?;
        }

        let mut state = self.lock_state();
        for role in [DeviceRole::Console, DeviceRole::Communications] {
            state.apply(&DeviceEvent::DefaultChanged {
                role,
                device_id: Some(device_id.to_string()),
            });
        }
        drop(state);
        tracing::info!(device_id, "default device set for all roles");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Volume and mute
    // ------------------------------------------------------------------

    fn with_volume<T>(
        &self,
        device_id: &str,
        f: impl FnOnce(&VolumeController) -> Result<T, AudioError>,
    ) -> Result<T, AudioError> {
        let _com = ComGuard::apartment_threaded()?;
        let enumerator = DeviceEnumerator::new()?;
        let device = enumerator.raw_device(device_id)?;
        let controller = VolumeController::new(&device)?;
        f(&controller)
    }

    pub fn get_volume(&self, device_id: &str) -> Result<f32, AudioError> {
        self.with_volume(device_id, |v| v.get_volume())
    }

    pub fn get_mute(&self, device_id: &str) -> Result<bool, AudioError> {
        self.with_volume(device_id, |v| v.get_mute())
    }

    /// Set the volume scalar; the request is clamped into [0.0, 1.0] and
    /// the applied value is returned.
    pub fn set_volume(&self, device_id: &str, level: f32) -> Result<f32, AudioError> {
        let applied = {
            let _bracket = self.suppression.begin(device_id, ControlField::Volume);
            self.with_volume(device_id, |v| v.set_volume(level))?
        };

        let mut state = self.lock_state();
        let muted = state.get(device_id).map(|d| d.is_muted).unwrap_or(false);
        state.apply(&DeviceEvent::VolumeChanged {
            device_id: device_id.to_string(),
            volume: applied,
            muted,
        });
        drop(state);
        tracing::debug!(device_id, volume = applied, "volume set");
        Ok(applied)
    }

    pub fn set_mute(&self, device_id: &str, muted: bool) -> Result<(), AudioError> {
        {
            let _bracket = self.suppression.begin(device_id, ControlField::Mute);
            self.with_volume(device_id, |v| v.set_mute(muted))?;
        }
        self.apply_mute(device_id, muted);
        tracing::debug!(device_id, muted, "mute set");
        Ok(())
    }

    /// Flip the mute state and return the new state.
    pub fn toggle_mute(&self, device_id: &str) -> Result<bool, AudioError> {
        let new_state = {
            let _bracket = self.suppression.begin(device_id, ControlField::Mute);
            self.with_volume(device_id, |v| v.toggle_mute())?
        };
        self.apply_mute(device_id, new_state);
        tracing::debug!(device_id, muted = new_state, "mute toggled");
        Ok(new_state)
    }

    fn apply_mute(&self, device_id: &str, muted: bool) {
        let mut state = self.lock_state();
        let volume = state.get(device_id).map(|d| d.volume).unwrap_or(1.0);
        state.apply(&DeviceEvent::VolumeChanged {
            device_id: device_id.to_string(),
            volume,
            muted,
        });
    }

    // ------------------------------------------------------------------
    // Metering
    // ------------------------------------------------------------------

    /// Start level metering on a device. Blocks until the capture session
    /// is up; a device that cannot be opened reports `MeterUnavailable`
    /// and is left unmetered, with no internal retry.
    pub fn start_metering(&self, device_id: &str) -> Result<(), AudioError> {
        self.lock_meters().start(device_id)
    }

    /// Stop metering a device. Unknown or unmetered devices are a no-op.
    pub fn stop_metering(&self, device_id: &str) {
        self.lock_meters().stop(device_id)
    }

    pub fn is_metering(&self, device_id: &str) -> bool {
        self.lock_meters().is_metering(device_id)
    }

    /// Latest meter reading for a device being metered.
    pub fn meter(&self, device_id: &str) -> Result<MeterSnapshot, AudioError> {
        self.lock_meters()
            .reading(device_id)
            .ok_or_else(|| AudioError::meter_unavailable(device_id, "metering not active"))
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Next pending event, if any. Engine-caused echoes never appear here.
    pub fn poll_event(&self) -> Option<DeviceEvent> {
        self.consumer_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn wait_event(&self, timeout: Duration) -> Option<DeviceEvent> {
        self.consumer_rx.recv_timeout(timeout).ok()
    }

    /// Stop metering, unregister callbacks, and join the worker. After this
    /// returns no callback or event activity remains.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.lock_meters().stop_all();
            self.shutdown.store(true, Ordering::SeqCst);
            let _ = handle.join();
            tracing::info!("engine shut down");
        }
    }
}

impl Drop for MicEngine {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// How often the worker wakes to check the shutdown flag when no
/// notifications arrive.
const WORKER_TICK: Duration = Duration::from_millis(100);

#[allow(clippy::too_many_arguments)]
fn worker_main(
    hub_tx: Sender<Notification>,
    hub_rx: Receiver<Notification>,
    consumer_tx: Sender<DeviceEvent>,
    state: Arc<Mutex<DeviceSet>>,
    suppression: SuppressionRegistry,
    meters: Arc<Mutex<MeterEngine>>,
    shutdown: Arc<AtomicBool>,
    ready_tx: Sender<Result<(), AudioError>>,
) {
    let _com = match ComGuard::multithreaded() {
        Ok(guard) => guard,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let enumerator = match DeviceEnumerator::new() {
        Ok(e) => e,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let client = match DeviceNotificationClient::new(hub_tx.clone()).register(enumerator.raw_enumerator()) {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let initial = match enumerator.get_devices() {
        Ok(d) => d,
        Err(e) => {
            let _ = unregister_device_client(enumerator.raw_enumerator(), &client);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut worker = Worker {
        enumerator,
        watches: HashMap::new(),
        state,
        suppression,
        meters,
        consumer_tx,
        hub_tx,
    };

    for device in &initial {
        worker.watch_volume(&device.id);
    }
    worker.lock_state().replace_all(initial);

    let _ = ready_tx.send(Ok(()));
    tracing::debug!("engine worker running");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match hub_rx.recv_timeout(WORKER_TICK) {
            Ok(notification) => worker.handle(notification),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for (_, watch) in worker.watches.drain() {
        watch.unregister();
    }
    let _ = unregister_device_client(worker.enumerator.raw_enumerator(), &client);
}

/// Worker-thread state: the enumerator, live volume watches, and the shared
/// pieces it updates on behalf of the engine.
struct Worker {
    enumerator: DeviceEnumerator,
    watches: HashMap<String, VolumeWatch>,
    state: Arc<Mutex<DeviceSet>>,
    suppression: SuppressionRegistry,
    meters: Arc<Mutex<MeterEngine>>,
    consumer_tx: Sender<DeviceEvent>,
    hub_tx: Sender<Notification>,
}

impl Worker {
    fn lock_state(&self) -> MutexGuard<'_, DeviceSet> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forward(&self, event: DeviceEvent) {
        let _ = self.consumer_tx.send(event);
    }

    fn handle(&mut self, notification: Notification) {
        match notification {
            Notification::Event(event) => self.handle_event(event),
            Notification::FormatHint { device_id } => self.handle_format_hint(device_id),
        }
    }

    fn handle_event(&mut self, event: DeviceEvent) {
        match &event {
            DeviceEvent::DeviceAdded { device_id } => {
                // Arrival callbacks fire for every endpoint class and can
                // fire twice per device; a full refresh answers both.
                let already = self.lock_state().contains(device_id);
                match self.enumerator.get_devices() {
                    Ok(devices) => {
                        let known = devices.iter().any(|d| d.id == *device_id);
                        self.lock_state().replace_all(devices);
                        if known {
                            self.watch_volume(device_id);
                            if !already {
                                tracing::info!(device_id, "device added");
                                self.forward(event);
                            }
                        }
                    }
                    Err(e) => tracing::warn!("device refresh after arrival failed: {e}"),
                }
            }

            DeviceEvent::DeviceRemoved { device_id } => {
                if !self.lock_state().contains(device_id) {
                    return;
                }
                let id = device_id.clone();
                self.unwatch_volume(&id);
                self.meters
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .stop(&id);
                self.suppression.clear_device(&id);
                self.lock_state().apply(&event);
                tracing::info!(device_id = %id, "device removed");
                self.forward(event);
            }

            DeviceEvent::DefaultChanged { device_id, .. } => {
                let suppressed = device_id
                    .as_deref()
                    .map(|id| self.suppression.is_echo(id, ControlField::DefaultRole))
                    .unwrap_or(false);
                self.lock_state().apply(&event);
                if suppressed {
                    tracing::trace!(?event, "suppressed default-change echo");
                } else {
                    self.forward(event);
                }
            }

            DeviceEvent::VolumeChanged {
                device_id,
                volume,
                muted,
            } => {
                let (volume_differs, mute_differs) = {
                    let state = self.lock_state();
                    match state.get(device_id) {
                        Some(d) => (
                            (d.volume - volume).abs() > 1e-4,
                            d.is_muted != *muted,
                        ),
                        None => return,
                    }
                };
                let suppressed =
                    self.suppression
                        .volume_event_is_echo(device_id, volume_differs, mute_differs);
                // The mirror always takes the OS values; suppression only
                // decides whether consumers hear about them.
                self.lock_state().apply(&event);
                if suppressed {
                    tracing::trace!(?event, "suppressed volume echo");
                } else {
                    self.forward(event);
                }
            }

            DeviceEvent::FormatChanged { .. } | DeviceEvent::LevelUpdated { .. } => {
                self.lock_state().apply(&event);
                self.forward(event);
            }
        }
    }

    fn handle_format_hint(&mut self, device_id: String) {
        if !self.lock_state().contains(&device_id) {
            return;
        }
        let Some(format) = self.enumerator.audio_format_by_id(&device_id) else {
            return;
        };
        let changed = self
            .lock_state()
            .get(&device_id)
            .map(|d| d.format != Some(format))
            .unwrap_or(false);
        if changed {
            let event = DeviceEvent::FormatChanged { device_id, format };
            self.lock_state().apply(&event);
            self.forward(event);
        }
    }

    fn watch_volume(&mut self, device_id: &str) {
        if self.watches.contains_key(device_id) {
            return;
        }
        let registered = self
            .enumerator
            .raw_device(device_id)
            .and_then(|device| VolumeWatch::register(&device, device_id, self.hub_tx.clone()));
        match registered {
            Ok(watch) => {
                self.watches.insert(device_id.to_string(), watch);
            }
            // Not fatal: the device stays usable, its volume just will not
            // push change events.
            Err(e) => tracing::warn!(device_id, "volume watch failed: {e}"),
        }
    }

    fn unwatch_volume(&mut self, device_id: &str) {
        if let Some(watch) = self.watches.remove(device_id) {
            watch.unregister();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.suppression_linger, Duration::from_millis(250));
        assert_eq!(config.meter.peak_hold, Duration::from_secs(5));
    }

    // Exercises the full lifecycle against the live audio subsystem when
    // one is present; environments without a working audio service just
    // see the constructor error path.
    #[test]
    fn engine_lifecycle_does_not_hang() {
        match MicEngine::new(EngineConfig::default()) {
            Ok(engine) => {
                let _ = engine.devices();
                let _ = engine.poll_event();
                engine.shutdown();
            }
            Err(e) => {
                tracing::debug!("engine unavailable in this environment: {e}");
            }
        }
    }
}
