//! Desktop simulator for the zen-motion control core.
//!
//! Drives `zen-core` with a virtual clock, a synthetic IMU and a scripted
//! button timeline, persisting records to plain files so that state survives
//! between runs. Every intent the core emits is logged, which makes the
//! simulator a quick way to exercise the whole device without hardware.
//!
//! # Daily script
//!
//! | Offset | Gesture      | Effect                              |
//! |--------|--------------|-------------------------------------|
//! | 0 s    | Click        | Wake, if the device fell asleep     |
//! | 0 s    | LongPress    | Back to the menu, if idle           |
//! | 15 s   | DoubleClick  | Start practice                      |
//! | 120 s  | Click        | Pause                               |
//! | 150 s  | Click        | Resume                              |
//! | 200 s  | DoubleClick  | Session details                     |
//!
//! The practice then runs until the configured practice time elapses. An
//! uncalibrated device is calibrated from the main menu at 5 s first.
//!
//! Run with `RUST_LOG=info` (or `debug`) to see the log output.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::NaiveDate;
use clap::Parser;
use embassy_time::{Duration, Instant};
use log::{debug, error, info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use zen_core::clock::{ClockPort, ManualClock};
use zen_core::device::{TickInput, ZenDevice};
use zen_core::input::{ButtonEvent, ButtonGesture};
use zen_core::sensors::{ImuSensor, RawSample, SensorError};
use zen_core::state_machine::{DisplayIntent, Intent, MenuOption, PowerIntent, SystemState};
use zen_core::stats::CalendarDate;
use zen_core::storage::{PersistencePort, RecordKey, StorageError};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "zen-simulator")]
#[command(about = "Run the zen-motion core against a synthetic IMU", long_about = None)]
struct Args {
    /// Simulated minutes per day
    #[arg(short, long, default_value = "10")]
    minutes: u64,

    /// Virtual time advanced per tick, in milliseconds
    #[arg(short, long, default_value = "50", value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,

    /// Number of consecutive days to simulate
    #[arg(short, long, default_value = "1")]
    days: u32,

    /// Calendar date of the first day (YYYY-MM-DD)
    #[arg(long, default_value = "2024-06-01", value_parser = parse_date)]
    start_date: CalendarDate,

    /// Directory holding the persisted records
    #[arg(short, long, default_value = "zen-data")]
    storage_dir: PathBuf,

    /// Seed of the synthetic motion generator
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Probability that a sensor poll fails
    #[arg(long, default_value = "0.0")]
    dropout: f32,

    /// Battery voltage lost per simulated day
    #[arg(long, default_value = "0.05")]
    battery_drain: f32,

    /// Pace the simulation in wall-clock time
    #[arg(long, default_value_t = false)]
    realtime: bool,
}

fn parse_date(s: &str) -> Result<CalendarDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(CalendarDate::from)
        .map_err(|e| format!("'{s}' is not a calendar date: {e}"))
}

// ---------------------------------------------------------------------------
// Synthetic IMU
// ---------------------------------------------------------------------------

/// Mostly still device with occasional motion bursts.
struct SyntheticImu {
    rng: SmallRng,
    /// Samples left in the current burst
    burst_left: u32,
    dropout: f32,
    /// Constant sensor bias, removed by calibration
    accel_bias: [f32; 3],
    gyro_bias: [f32; 3],
}

impl SyntheticImu {
    /// Chance per sample that a motion burst begins.
    const BURST_PROBABILITY: f32 = 0.004;

    fn new(seed: u64, dropout: f32) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let accel_bias: [f32; 3] = core::array::from_fn(|_| rng.random_range(-0.03..0.03));
        let gyro_bias: [f32; 3] = core::array::from_fn(|_| rng.random_range(-1.5..1.5));
        Self {
            rng,
            burst_left: 0,
            dropout: dropout.clamp(0.0, 1.0),
            accel_bias,
            gyro_bias,
        }
    }
}

impl ImuSensor for SyntheticImu {
    fn read(&mut self, now: Instant) -> Result<RawSample, SensorError> {
        if self.rng.random::<f32>() < self.dropout {
            return Err(SensorError::NoData);
        }

        if self.burst_left == 0 && self.rng.random::<f32>() < Self::BURST_PROBABILITY {
            self.burst_left = self.rng.random_range(10..40);
            debug!("Motion burst of {} samples at {} ms", self.burst_left, now.as_millis());
        }

        let (accel_amp, gyro_amp): (f32, f32) = if self.burst_left > 0 {
            self.burst_left -= 1;
            (0.6, 80.0)
        } else {
            (0.01, 0.5)
        };

        let rng = &mut self.rng;
        let accel = [
            self.accel_bias[0] + rng.random_range(-accel_amp..accel_amp),
            self.accel_bias[1] + rng.random_range(-accel_amp..accel_amp),
            1.0 + self.accel_bias[2] + rng.random_range(-accel_amp..accel_amp),
        ];
        let gyro = [
            self.gyro_bias[0] + rng.random_range(-gyro_amp..gyro_amp),
            self.gyro_bias[1] + rng.random_range(-gyro_amp..gyro_amp),
            self.gyro_bias[2] + rng.random_range(-gyro_amp..gyro_amp),
        ];
        Ok(RawSample::new(accel, gyro, now))
    }
}

// ---------------------------------------------------------------------------
// File-backed persistence
// ---------------------------------------------------------------------------

/// One file per record key inside `dir`.
struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    fn open(dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: RecordKey) -> PathBuf {
        self.dir.join(format!("{}.bin", key.name()))
    }
}

impl PersistencePort for FileStore {
    fn read(&mut self, key: RecordKey, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        let bytes = match fs::read(self.path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                error!("Reading {} failed: {}", self.path(key).display(), e);
                return Err(StorageError::Port);
            }
        };
        let dst = buf
            .get_mut(..bytes.len())
            .ok_or(StorageError::BufferTooSmall)?;
        dst.copy_from_slice(&bytes);
        Ok(Some(bytes.len()))
    }

    fn write(&mut self, key: RecordKey, bytes: &[u8]) -> Result<(), StorageError> {
        fs::write(self.path(key), bytes).map_err(|e| {
            error!("Writing {} failed: {}", self.path(key).display(), e);
            StorageError::Port
        })
    }
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

/// Button gestures of one simulated day, as (offset ms, gesture).
const DAILY_SCRIPT: &[(u64, ButtonGesture)] = &[
    (15_000, ButtonGesture::DoubleClick),
    (120_000, ButtonGesture::Click),
    (150_000, ButtonGesture::Click),
    (200_000, ButtonGesture::DoubleClick),
];

/// Offset at which an uncalibrated device is sent to calibration.
const CALIBRATION_AT_MS: u64 = 5_000;

/// Battery voltage at the start of the first day.
const BATTERY_START_VOLTAGE: f32 = 4.1;

type SimDevice<'a> = ZenDevice<&'a ManualClock, SyntheticImu, FileStore>;

/// Feed one gesture at the current instant and log the outcome.
fn press(device: &mut SimDevice<'_>, clock: &ManualClock, gesture: ButtonGesture, date: CalendarDate) {
    let now = clock.now();
    let input = TickInput {
        button: Some(ButtonEvent::instant(gesture, now)),
        date: Some(date),
        battery_voltage: None,
    };
    for intent in device.tick(input) {
        log_intent(now, &intent);
    }
}

/// Return to the main menu from wherever the previous day ended.
fn back_to_menu(device: &mut SimDevice<'_>, clock: &ManualClock, date: CalendarDate) {
    match device.state() {
        SystemState::Sleep => press(device, clock, ButtonGesture::Click, date),
        SystemState::MainMenu | SystemState::Boot => {}
        _ => press(device, clock, ButtonGesture::LongPress, date),
    }
}

/// Cycle the menu to "Calibration" and confirm it.
fn start_calibration(device: &mut SimDevice<'_>, clock: &ManualClock, date: CalendarDate) {
    if device.state() != SystemState::MainMenu {
        warn!("Not in the main menu, skipping calibration");
        return;
    }
    while device.machine().menu_option() != MenuOption::Calibration {
        press(device, clock, ButtonGesture::Click, date);
    }
    press(device, clock, ButtonGesture::LongPress, date);
}

fn log_intent(at: Instant, intent: &Intent) {
    let ms = at.as_millis();
    match intent {
        Intent::Display(DisplayIntent::SetPage(page)) => info!("[{ms:>9}] page    {page:?}"),
        Intent::Display(DisplayIntent::ShowMessage { text, duration_ms }) => {
            info!("[{ms:>9}] message \"{text}\" ({duration_ms} ms)")
        }
        Intent::Audio(tone) => info!("[{ms:>9}] tone    {tone:?}"),
        Intent::Power(PowerIntent::RequestSleep(reason)) => {
            info!("[{ms:>9}] sleep   {reason:?}")
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    let args = Args::parse();
    info!("Starting zen-motion simulator: {:?}", args);

    let store = match FileStore::open(args.storage_dir.clone()) {
        Ok(store) => store,
        Err(e) => {
            error!(
                "Cannot open storage directory {}: {}",
                args.storage_dir.display(),
                e
            );
            std::process::exit(1);
        }
    };

    let clock = ManualClock::new(0);
    let imu = SyntheticImu::new(args.seed, args.dropout);
    let mut device = ZenDevice::boot(&clock, imu, store, args.start_date);
    for intent in device.take_intents() {
        log_intent(clock.now(), &intent);
    }

    let day_length = Duration::from_secs(args.minutes * 60);
    let tick = Duration::from_millis(args.tick_ms);
    let mut voltage = BATTERY_START_VOLTAGE;

    for day in 0..args.days {
        let Some(date) = args.start_date.add_days(day) else {
            error!("Day {} is past the end of the calendar", day + 1);
            break;
        };
        let day_start = clock.now();
        info!("=== Day {} ({}) ===", day + 1, date);

        back_to_menu(&mut device, &clock, date);

        let mut script = DAILY_SCRIPT.iter().peekable();
        while clock.now().saturating_duration_since(day_start) < day_length {
            clock.advance(tick);
            let now = clock.now();
            let offset = now.saturating_duration_since(day_start).as_millis();

            if offset >= CALIBRATION_AT_MS
                && offset < CALIBRATION_AT_MS + args.tick_ms
                && !device.app().calibration.calibrated
            {
                start_calibration(&mut device, &clock, date);
            }

            let button = script.next_if(|(at, _)| *at <= offset).map(|(_, gesture)| {
                let pressed = Instant::from_millis(now.as_millis().saturating_sub(100));
                ButtonEvent::new(*gesture, pressed, now)
            });

            let input = TickInput {
                button,
                date: Some(date),
                battery_voltage: Some(voltage),
            };
            for intent in device.tick(input) {
                log_intent(now, &intent);
            }

            if args.realtime {
                std::thread::sleep(StdDuration::from_millis(args.tick_ms));
            }
        }

        voltage -= args.battery_drain;
        let stats = device.app().stats.today();
        info!(
            "Day {} done: {} sessions, {} s practiced, avg {:.1}, best {:.1}, {} breaks",
            date,
            stats.session_count,
            stats.total_duration_ms / 1000,
            stats.avg_score,
            stats.best_score,
            stats.total_breaks
        );
    }

    if let Err(e) = device.save_all() {
        warn!("Final save failed: {}", e);
    }

    let summary = device.app().stats.weekly_summary();
    info!(
        "Last 7 days: {} sessions over {} days, {} min, avg {:.1}, best {:.1}, {} breaks",
        summary.total_sessions,
        summary.days,
        summary.total_duration_ms / 60_000,
        summary.avg_score,
        summary.best_score,
        summary.total_breaks
    );
    info!("Simulator exiting");
}
