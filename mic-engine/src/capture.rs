//! Level metering via WASAPI shared-mode capture.
//!
//! Each metered device gets a dedicated capture thread that opens the
//! endpoint in shared mode, polls packets at 10 ms, and folds per-buffer
//! peaks into a [`MeterState`]. Readings land in a shared map for polling
//! and are also emitted as throttled `LevelUpdated` events.

use crate::com::ComGuard;
use crate::device::{AudioError, DeviceEvent};
use crate::enumerator::to_wide;
use crate::meter::{MeterConfig, MeterSnapshot, MeterState};
use crate::notifications::Notification;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use windows::core::PCWSTR;
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, IMMDeviceEnumerator, MMDeviceEnumerator,
    AUDCLNT_BUFFERFLAGS_SILENT, AUDCLNT_E_DEVICE_INVALIDATED, AUDCLNT_SHAREMODE_SHARED,
    AUDCLNT_STREAMFLAGS_NOPERSIST,
};
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL};

/// Packet poll cadence inside the capture loop.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Shared-mode capture buffer length, in 100-nanosecond units (100 ms).
const BUFFER_DURATION: i64 = 1_000_000;

type Readings = Arc<Mutex<HashMap<String, MeterSnapshot>>>;

struct MeterSession {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the capture threads and current readings for all metered devices.
///
/// Start and stop are idempotent per device. Stopping joins the capture
/// thread, so no readings or events for that device arrive afterwards.
pub struct MeterEngine {
    config: MeterConfig,
    notify: Sender<Notification>,
    readings: Readings,
    sessions: HashMap<String, MeterSession>,
}

impl MeterEngine {
    pub fn new(config: MeterConfig, notify: Sender<Notification>) -> Self {
        Self {
            config,
            notify,
            readings: Arc::new(Mutex::new(HashMap::new())),
            sessions: HashMap::new(),
        }
    }

    fn lock_readings(readings: &Readings) -> MutexGuard<'_, HashMap<String, MeterSnapshot>> {
        readings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start metering a device. Blocks until the capture session is running
    /// or has failed to open; a failure reports why metering is unavailable
    /// and the device is left unmetered. No retry happens internally.
    pub fn start(&mut self, device_id: &str) -> Result<(), AudioError> {
        if let Some(session) = self.sessions.get_mut(device_id) {
            if session.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            // Previous session ended on its own; reap it before restarting.
            if let Some(handle) = session.handle.take() {
                let _ = handle.join();
            }
            self.sessions.remove(device_id);
        }

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_running = Arc::clone(&running);
        let thread_readings = Arc::clone(&self.readings);
        let thread_notify = self.notify.clone();
        let config = self.config;
        let id = device_id.to_string();

        let handle = thread::Builder::new()
            .name("mic-meter".into())
            .spawn(move || {
                meter_loop(id, thread_running, thread_readings, thread_notify, config, ready_tx);
            })
            .map_err(|e| {
                AudioError::meter_unavailable(device_id, format!("spawn failed: {e}"))
            })?;

        // Wait for the session to open so failures surface to the caller.
        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.sessions.insert(
                    device_id.to_string(),
                    MeterSession {
                        running,
                        handle: Some(handle),
                    },
                );
                tracing::debug!(device_id, "meter started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::meter_unavailable(
                    device_id,
                    "capture thread exited during startup",
                ))
            }
        }
    }

    /// Stop metering a device and join its capture thread. A device that is
    /// not being metered is a no-op.
    pub fn stop(&mut self, device_id: &str) {
        if let Some(mut session) = self.sessions.remove(device_id) {
            session.running.store(false, Ordering::SeqCst);
            if let Some(handle) = session.handle.take() {
                let _ = handle.join();
            }
            Self::lock_readings(&self.readings).remove(device_id);
            tracing::debug!(device_id, "meter stopped");
        }
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.stop(&id);
        }
    }

    /// Latest reading for a device, if it is being metered and the session
    /// is still alive.
    pub fn reading(&self, device_id: &str) -> Option<MeterSnapshot> {
        Self::lock_readings(&self.readings).get(device_id).copied()
    }

    pub fn is_metering(&self, device_id: &str) -> bool {
        self.sessions
            .get(device_id)
            .map(|s| s.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn metered_devices(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }
}

impl Drop for MeterEngine {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Capture thread entry point. Reports startup through `ready` exactly once,
/// then runs until stopped or the device goes away.
fn meter_loop(
    device_id: String,
    running: Arc<AtomicBool>,
    readings: Readings,
    notify: Sender<Notification>,
    config: MeterConfig,
    ready: Sender<Result<(), AudioError>>,
) {
    let result = run_capture(&device_id, &running, &readings, &notify, config, &ready);
    if let Err(e) = result {
        tracing::warn!(device_id = %device_id, "meter capture ended: {e}");
        // If startup never completed this unblocks the caller; otherwise the
        // receiver is gone and the send is a no-op.
        let _ = ready.send(Err(e));
    }
    MeterEngine::lock_readings(&readings).remove(&device_id);
    running.store(false, Ordering::SeqCst);
}

fn run_capture(
    device_id: &str,
    running: &AtomicBool,
    readings: &Readings,
    notify: &Sender<Notification>,
    config: MeterConfig,
    ready: &Sender<Result<(), AudioError>>,
) -> Result<(), AudioError> {
    let unavailable = |stage: &str, e: windows::core::Error| {
        AudioError::meter_unavailable(device_id, format!("{stage} failed ({:#010x})", e.code().0))
    };

    unsafe {
        let _com = ComGuard::multithreaded()?;

        let enumerator: IMMDeviceEnumerator =
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| unavailable("enumerator create", e))?;

        let wide = to_wide(device_id);
        let device = enumerator
            .GetDevice(PCWSTR::from_raw(wide.as_ptr()))
            .map_err(|_| AudioError::device_not_found(device_id))?;

        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| unavailable("IAudioClient activate", e))?;

        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(|e| unavailable("GetMixFormat", e))?;

        // The shared-mode mix is 32-bit float, channels interleaved. Anything
        // else would make the sample reads below garbage, so refuse it.
        let channels = (*mix_format_ptr).nChannels as usize;
        let bits = (*mix_format_ptr).wBitsPerSample;
        if bits != 32 {
            CoTaskMemFree(Some(mix_format_ptr as *const _));
            return Err(AudioError::meter_unavailable(
                device_id,
                format!("mix format is {bits}-bit, expected 32-bit float"),
            ));
        }

        let init_result = audio_client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_NOPERSIST,
            BUFFER_DURATION,
            0,
            mix_format_ptr,
            None,
        );
        CoTaskMemFree(Some(mix_format_ptr as *const _));
        init_result.map_err(|e| unavailable("IAudioClient initialize", e))?;

        let capture_client: IAudioCaptureClient = audio_client
            .GetService()
            .map_err(|e| unavailable("IAudioCaptureClient service", e))?;

        audio_client
            .Start()
            .map_err(|e| unavailable("IAudioClient start", e))?;

        let _ = ready.send(Ok(()));

        let mut meter = MeterState::new(config);
        let mut last_event = Instant::now() - config.publish_interval;

        while running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);

            let mut buffer_peak = 0.0f32;
            let mut saw_data = false;

            loop {
                let packet_length = match capture_client.GetNextPacketSize() {
                    Ok(n) => n,
                    Err(e) if e.code() == AUDCLNT_E_DEVICE_INVALIDATED => {
                        tracing::info!(device_id, "device invalidated, meter thread exiting");
                        let _ = audio_client.Stop();
                        return Ok(());
                    }
                    Err(e) => {
                        let _ = audio_client.Stop();
                        return Err(unavailable("GetNextPacketSize", e));
                    }
                };
                if packet_length == 0 {
                    break;
                }

                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                if let Err(e) =
                    capture_client.GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                {
                    let _ = audio_client.Stop();
                    if e.code() == AUDCLNT_E_DEVICE_INVALIDATED {
                        return Ok(());
                    }
                    return Err(unavailable("GetBuffer", e));
                }

                if num_frames > 0 && !buffer_ptr.is_null() {
                    saw_data = true;
                    if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) == 0 {
                        let total = num_frames as usize * channels;
                        let samples = std::slice::from_raw_parts(buffer_ptr as *const f32, total);
                        for &s in samples {
                            let a = s.abs();
                            if a > buffer_peak {
                                buffer_peak = a;
                            }
                        }
                    }
                }

                if let Err(e) = capture_client.ReleaseBuffer(num_frames) {
                    let _ = audio_client.Stop();
                    return Err(unavailable("ReleaseBuffer", e));
                }
            }

            if !saw_data {
                continue;
            }

            let now = Instant::now();
            meter.update(buffer_peak, now);
            MeterEngine::lock_readings(readings).insert(device_id.to_string(), meter.snapshot());

            if now.duration_since(last_event) >= config.publish_interval {
                last_event = now;
                let _ = notify.send(Notification::Event(DeviceEvent::LevelUpdated {
                    device_id: device_id.to_string(),
                    percent: meter.level_percent,
                    dbfs: meter.level_dbfs,
                }));
            }
        }

        let _ = audio_client.Stop();
    }

    Ok(())
}
