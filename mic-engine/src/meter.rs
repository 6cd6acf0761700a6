//! Level meter math: dBFS conversion, display mapping, and peak hold.
//!
//! All types here are plain data with no OS dependencies. The capture layer
//! feeds per-buffer peak amplitudes into [`MeterState`]; everything else
//! (dBFS, percent, zone, held peak) is derived.

use std::time::{Duration, Instant};

/// Meter floor in dBFS. Readings below this clamp to the floor; the percent
/// scale maps the floor to 0.
pub const DBFS_FLOOR: f32 = -96.0;

/// Convert a linear peak amplitude (0.0..=1.0) to dBFS.
///
/// Returns `f32::NEG_INFINITY` for true digital silence (peak <= 0).
/// Non-silent values clamp into `[DBFS_FLOOR, 0.0]`.
pub fn dbfs_from_peak(peak: f32) -> f32 {
    if peak <= 0.0 {
        f32::NEG_INFINITY
    } else {
        (20.0 * peak.log10()).clamp(DBFS_FLOOR, 0.0)
    }
}

/// Map a dBFS value to a display percentage (0–100).
///
/// The scale is linear in dB: `DBFS_FLOOR` maps to 0, full scale to 100.
/// Negative infinity (silence) maps to 0.
pub fn percent_from_dbfs(dbfs: f32) -> f32 {
    if dbfs == f32::NEG_INFINITY {
        0.0
    } else {
        ((dbfs - DBFS_FLOOR) / -DBFS_FLOOR * 100.0).clamp(0.0, 100.0)
    }
}

/// Display color zone for a level reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelZone {
    /// Normal speech range
    Green,
    /// Loud, approaching clipping
    Yellow,
    /// Clipping risk
    Red,
}

impl LevelZone {
    /// Zone for a dBFS reading. Boundaries are inclusive at the lower edge:
    /// -20 dBFS is Yellow, -9 dBFS is Red.
    pub fn from_dbfs(dbfs: f32) -> Self {
        if dbfs >= -9.0 {
            LevelZone::Red
        } else if dbfs >= -20.0 {
            LevelZone::Yellow
        } else {
            LevelZone::Green
        }
    }
}

/// Meter behavior knobs. The defaults match the visual behavior the engine
/// is tuned for; they are exposed so hosts can shorten the hold in tests.
#[derive(Debug, Clone, Copy)]
pub struct MeterConfig {
    /// How often `LevelUpdated` events are published while metering. The
    /// polled reading refreshes faster than this.
    pub publish_interval: Duration,

    /// How long a held peak stays pinned after it was last raised.
    pub peak_hold: Duration,

    /// Decay speed once the hold expires, in percentage points per second.
    pub decay_per_sec: f32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_millis(50),
            peak_hold: Duration::from_secs(5),
            decay_per_sec: 40.0,
        }
    }
}

/// A point-in-time copy of a device's meter, as handed to hosts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterSnapshot {
    pub level_percent: f32,
    pub level_dbfs: f32,
    pub peak_percent: f32,
    pub zone: LevelZone,
}

/// Rolling meter state for one device.
///
/// The held peak rises immediately whenever the current level exceeds it.
/// Once `peak_hold` has elapsed since the last rise, the held peak decays
/// linearly toward the current level; it never falls below it.
#[derive(Debug, Clone)]
pub struct MeterState {
    /// Most recent level in percent (0–100).
    pub level_percent: f32,

    /// Most recent level in dBFS; `NEG_INFINITY` for silence.
    pub level_dbfs: f32,

    /// Held peak in percent (0–100).
    pub peak_percent: f32,

    config: MeterConfig,
    peak_raised_at: Instant,
    last_update: Instant,
}

impl MeterState {
    pub fn new(config: MeterConfig) -> Self {
        let now = Instant::now();
        Self {
            level_percent: 0.0,
            level_dbfs: f32::NEG_INFINITY,
            peak_percent: 0.0,
            config,
            peak_raised_at: now,
            last_update: now,
        }
    }

    /// Current zone, derived from the most recent dBFS reading.
    pub fn zone(&self) -> LevelZone {
        LevelZone::from_dbfs(self.level_dbfs)
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            level_percent: self.level_percent,
            level_dbfs: self.level_dbfs,
            peak_percent: self.peak_percent,
            zone: self.zone(),
        }
    }

    /// Feed a linear peak amplitude sampled at `now`.
    ///
    /// Updates the current level and either raises the held peak or, once
    /// the hold window has expired, decays it toward the current level.
    pub fn update(&mut self, peak_amplitude: f32, now: Instant) {
        self.level_dbfs = dbfs_from_peak(peak_amplitude);
        self.level_percent = percent_from_dbfs(self.level_dbfs);

        if self.level_percent >= self.peak_percent {
            self.peak_percent = self.level_percent;
            self.peak_raised_at = now;
        } else if now.duration_since(self.peak_raised_at) >= self.config.peak_hold {
            let dt = now.duration_since(self.last_update).as_secs_f32();
            let step = self.config.decay_per_sec * dt;
            self.peak_percent = (self.peak_percent - step).max(self.level_percent);
        }

        self.last_update = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbfs_conversion() {
        assert_eq!(dbfs_from_peak(1.0), 0.0);
        assert!((dbfs_from_peak(0.5) - (-6.0206)).abs() < 0.01);
        assert_eq!(dbfs_from_peak(0.0), f32::NEG_INFINITY);
        assert_eq!(dbfs_from_peak(-0.1), f32::NEG_INFINITY);
        // Below the floor clamps rather than running off the scale.
        assert_eq!(dbfs_from_peak(1e-9), DBFS_FLOOR);
    }

    #[test]
    fn percent_mapping() {
        assert_eq!(percent_from_dbfs(0.0), 100.0);
        assert_eq!(percent_from_dbfs(DBFS_FLOOR), 0.0);
        assert_eq!(percent_from_dbfs(f32::NEG_INFINITY), 0.0);
        assert!((percent_from_dbfs(-48.0) - 50.0).abs() < 0.001);
    }

    #[test]
    fn zone_boundaries_lower_edge_inclusive() {
        assert_eq!(LevelZone::from_dbfs(-30.0), LevelZone::Green);
        assert_eq!(LevelZone::from_dbfs(-20.0), LevelZone::Yellow);
        assert_eq!(LevelZone::from_dbfs(-10.0), LevelZone::Yellow);
        assert_eq!(LevelZone::from_dbfs(-9.0), LevelZone::Red);
        assert_eq!(LevelZone::from_dbfs(0.0), LevelZone::Red);
        assert_eq!(LevelZone::from_dbfs(f32::NEG_INFINITY), LevelZone::Green);
    }

    #[test]
    fn peak_rises_immediately() {
        let mut m = MeterState::new(MeterConfig::default());
        let t0 = Instant::now();
        m.update(0.1, t0);
        let first_peak = m.peak_percent;
        m.update(0.9, t0 + Duration::from_millis(10));
        assert!(m.peak_percent > first_peak);
        assert_eq!(m.peak_percent, m.level_percent);
    }

    #[test]
    fn peak_holds_within_window() {
        let mut m = MeterState::new(MeterConfig::default());
        let t0 = Instant::now();
        m.update(0.9, t0);
        let held = m.peak_percent;
        // Quiet input for less than the hold duration: peak must not move.
        m.update(0.01, t0 + Duration::from_secs(2));
        m.update(0.01, t0 + Duration::from_secs(4));
        assert_eq!(m.peak_percent, held);
    }

    #[test]
    fn peak_decays_after_hold_expires() {
        let config = MeterConfig {
            peak_hold: Duration::from_secs(5),
            decay_per_sec: 40.0,
            ..MeterConfig::default()
        };
        let mut m = MeterState::new(config);
        let t0 = Instant::now();
        m.update(0.9, t0);
        let held = m.peak_percent;
        m.update(0.01, t0 + Duration::from_secs(5));
        m.update(0.01, t0 + Duration::from_secs(6));
        assert!(m.peak_percent < held);
        // Decay stops at the current level, never below it.
        for i in 7..30 {
            m.update(0.01, t0 + Duration::from_secs(i));
        }
        assert_eq!(m.peak_percent, m.level_percent);
    }

    #[test]
    fn loud_input_during_decay_repins_peak() {
        let config = MeterConfig {
            peak_hold: Duration::from_millis(100),
            decay_per_sec: 40.0,
            ..MeterConfig::default()
        };
        let mut m = MeterState::new(config);
        let t0 = Instant::now();
        m.update(0.5, t0);
        m.update(0.01, t0 + Duration::from_millis(200));
        m.update(0.95, t0 + Duration::from_millis(300));
        assert_eq!(m.peak_percent, m.level_percent);
        assert!(m.peak_percent > 99.0);
    }
}
