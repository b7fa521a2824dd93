//! Poll-driven device runtime.
//!
//! [`ZenDevice`] owns the [`AppState`] context, the [`StateMachine`] and the
//! three platform ports. The platform calls [`ZenDevice::tick`] in its main
//! loop; each tick:
//!
//! 1. repairs any state/component mismatch left by the previous tick
//! 2. processes the battery reading
//! 3. dispatches the button gesture
//! 4. polls the IMU when the sensor interval has elapsed
//! 5. evaluates timers (boot animation, practice time, calibration,
//!    inactivity)
//! 6. checks the calendar date for a day rollover
//! 7. flushes dirty records to the persistence port
//!
//! and returns the intents produced along the way.

use embassy_time::Instant;
use heapless::Vec;
use log::{debug, error, info, warn};

use crate::app_state::{AppState, ZenError};
use crate::clock::ClockPort;
use crate::config::{
    BOOT_ANIMATION_DURATION, MESSAGE_COMPLETE_MS, MESSAGE_LONG_MS, MESSAGE_MEDIUM_MS,
    MESSAGE_SHORT_MS, SENSOR_READ_INTERVAL,
};
use crate::input::ButtonEvent;
use crate::power::BatteryEvent;
use crate::sensors::{CalibrationProfile, ImuSensor};
use crate::settings::SystemSettings;
use crate::state_machine::{
    INTENT_CAPACITY, Intent, IntentBuffer, Resolved, SleepReason, StateMachine, SystemState, Tone,
    Trigger,
};
use crate::stats::{CalendarDate, DailyStats, HistoryRing, Rollover};
use crate::storage::{PersistencePort, RecordKey, load_or_default, save_record};

/// Everything the platform observed since the previous tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickInput {
    pub button: Option<ButtonEvent>,
    /// Current calendar date from the RTC, if known
    pub date: Option<CalendarDate>,
    /// Raw battery voltage reading
    pub battery_voltage: Option<f32>,
}

impl TickInput {
    pub fn button(event: ButtonEvent) -> Self {
        Self {
            button: Some(event),
            ..Self::default()
        }
    }
}

pub struct ZenDevice<C, S, P>
where
    C: ClockPort,
    S: ImuSensor,
    P: PersistencePort,
{
    clock: C,
    sensor: S,
    port: P,
    app: AppState,
    machine: StateMachine,
    intents: IntentBuffer,
    next_sample_at: Instant,
    needs_reconcile: bool,
}

impl<C, S, P> ZenDevice<C, S, P>
where
    C: ClockPort,
    S: ImuSensor,
    P: PersistencePort,
{
    /// Load persisted state and enter the boot animation.
    ///
    /// `today` is the calendar date at power-on, used when no daily record
    /// exists and to detect days that passed while the device was off.
    pub fn boot(clock: C, sensor: S, mut port: P, today: CalendarDate) -> Self {
        let now = clock.now();
        info!("Booting at {} ms, date {}", now.as_millis(), today);

        let settings = load_or_default(&mut port, RecordKey::Settings, SystemSettings::default);
        let daily = load_or_default(&mut port, RecordKey::TodayStats, || {
            DailyStats::empty(today)
        });
        let history = load_or_default(&mut port, RecordKey::History, HistoryRing::new);
        let calibration =
            load_or_default(&mut port, RecordKey::Calibration, CalibrationProfile::default);

        let mut app = AppState::new(
            settings.value.sanitized(),
            daily.value,
            history.value,
            calibration.value,
            now,
        );
        if settings.fresh {
            app.settings.mark_dirty(now);
        }
        if daily.fresh || history.fresh {
            app.stats.mark_dirty();
        }
        app.calibration_dirty = calibration.fresh;
        info!(
            "Loaded: settings {}, today {}, {} history days, calibrated {}",
            if settings.fresh { "default" } else { "stored" },
            app.stats.today().date,
            app.stats.history().len(),
            app.calibration.calibrated
        );

        let mut device = Self {
            clock,
            sensor,
            port,
            app,
            machine: StateMachine::new(now),
            intents: IntentBuffer::new(),
            next_sample_at: now,
            needs_reconcile: false,
        };
        device.intents.push(Intent::page(SystemState::Boot.page()));
        device.check_date(today, now);
        device
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SystemState {
        self.machine.state()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn app(&self) -> &AppState {
        &self.app
    }

    /// Direct access to the context. Changes that break the state invariants
    /// are repaired on the next tick.
    pub fn app_mut(&mut self) -> &mut AppState {
        self.needs_reconcile = true;
        &mut self.app
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    pub fn tick(&mut self, input: TickInput) -> Vec<Intent, INTENT_CAPACITY> {
        let now = self.clock.now();

        if self.needs_reconcile {
            self.reconcile(now);
        }

        if let Some(voltage) = input.battery_voltage {
            self.handle_battery(voltage, now);
        }

        if let Some(event) = input.button {
            self.handle_button(event, now);
        }

        if self.state() != SystemState::Sleep {
            self.poll_sensor(now);
            self.check_timers(now);
        }

        if let Some(date) = input.date {
            self.check_date(date, now);
        }

        self.flush(now);
        self.intents.drain()
    }

    /// Fire `trigger` immediately, outside the tick flow.
    pub fn trigger(&mut self, trigger: Trigger) -> Result<SystemState, ZenError> {
        let now = self.clock.now();
        self.fire(trigger, now)?;
        Ok(self.state())
    }

    /// Intents produced by [`ZenDevice::trigger`] calls since the last tick.
    pub fn take_intents(&mut self) -> Vec<Intent, INTENT_CAPACITY> {
        self.intents.drain()
    }

    /// Write every record now, regardless of dirty flags.
    pub fn save_all(&mut self) -> Result<(), ZenError> {
        let now = self.clock.now();
        let stats = self.app.stats.save(&mut self.port, now);
        let settings = self.app.settings.save(&mut self.port);
        let calibration = self.save_calibration();
        stats?;
        settings?;
        calibration?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tick stages
    // -----------------------------------------------------------------------

    fn handle_battery(&mut self, voltage: f32, now: Instant) {
        match self.app.battery.update(voltage) {
            Some(BatteryEvent::Low) => {
                let percent = self.app.battery.percent().unwrap_or(0);
                self.intents.push(Intent::message_fmt(
                    format_args!("Battery low ({}%)", percent),
                    MESSAGE_LONG_MS,
                ));
            }
            Some(BatteryEvent::Critical) => {
                if let Err(e) = self.fire(Trigger::LowBatteryCritical, now) {
                    error!("Critical battery handling failed: {}", e);
                }
            }
            None => {}
        }
    }

    fn handle_button(&mut self, event: ButtonEvent, now: Instant) {
        debug!(
            "Button {:?} held {} ms",
            event.gesture,
            event.duration().as_millis()
        );
        self.app.activity.record(now);

        let trigger = if self.state() == SystemState::Sleep {
            Trigger::Wake
        } else {
            Trigger::from(event.gesture)
        };
        // Rejections are logged by the machine and have no effect.
        let _ = self.fire(trigger, now);
    }

    fn poll_sensor(&mut self, now: Instant) {
        if now < self.next_sample_at {
            return;
        }
        self.next_sample_at = now + SENSOR_READ_INTERVAL;

        let result = self.sensor.read(now);
        let Some(raw) = self.app.record_sensor_result(result) else {
            return;
        };

        let practicing = self.state() == SystemState::Practicing;
        let Some(update) = self.app.process_sample(&raw, now, practicing) else {
            return;
        };

        if update.break_detected && practicing {
            self.play(Tone::BreakWarning);
        }
    }

    fn check_timers(&mut self, now: Instant) {
        let state = self.state();
        let trigger = match state {
            SystemState::Boot
                if now.saturating_duration_since(self.machine.entered_at())
                    >= BOOT_ANIMATION_DURATION =>
            {
                Some(Trigger::BootAnimationDone)
            }
            SystemState::Practicing
                if self.app.session.current_duration(now)
                    >= self.app.settings.get().practice_time() =>
            {
                Some(Trigger::PracticeTimeElapsed)
            }
            SystemState::Calibrating if self.app.calibrator.is_complete() => {
                Some(Trigger::CalibrationDone)
            }
            SystemState::Idle if self.inactivity_expired(now) => Some(Trigger::InactivityTimeout),
            _ => None,
        };

        if let Some(trigger) = trigger {
            let _ = self.fire(trigger, now);
        }
    }

    fn inactivity_expired(&self, now: Instant) -> bool {
        let settings = self.app.settings.get();
        if !settings.auto_sleep {
            return false;
        }
        let since = self
            .app
            .activity
            .last_activity()
            .max(self.machine.entered_at());
        now.saturating_duration_since(since) >= settings.sleep_timeout()
    }

    fn check_date(&mut self, date: CalendarDate, now: Instant) {
        match self.app.stats.prepare_rollover(date) {
            Rollover::SameDay => {}
            Rollover::ClockWentBack(date) => self.app.stats.adopt_earlier_date(date),
            Rollover::NewDay(prepared) => {
                // Persist the new records before committing them in memory.
                let written = save_record(&mut self.port, RecordKey::History, &prepared.history)
                    .and_then(|()| {
                        save_record(&mut self.port, RecordKey::TodayStats, &prepared.today)
                    });
                self.app.stats.apply_rollover(prepared);
                match written {
                    Ok(()) => self.app.stats.mark_saved(now),
                    Err(e) => error!("Rollover save failed, will retry: {}", e),
                }
            }
        }
    }

    fn flush(&mut self, now: Instant) {
        if self.app.stats.needs_save(now) {
            if let Err(e) = self.app.stats.save(&mut self.port, now) {
                error!("Statistics save failed: {}", e);
            }
        }

        if let Err(e) = self.app.settings.save_if_due(&mut self.port, now) {
            error!("Settings save failed: {}", e);
        }

        if self.app.calibration_dirty {
            if let Err(e) = self.save_calibration() {
                error!("Calibration save failed: {}", e);
            }
        }
    }

    fn save_calibration(&mut self) -> Result<(), ZenError> {
        save_record(&mut self.port, RecordKey::Calibration, &self.app.calibration)?;
        self.app.calibration_dirty = false;
        Ok(())
    }

    fn reconcile(&mut self, now: Instant) {
        self.needs_reconcile = false;
        let state = self.state();
        if self.app.check_consistency(state).is_some() {
            self.app.reconcile(state, now);
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn fire(&mut self, trigger: Trigger, now: Instant) -> Result<(), ZenError> {
        let state = self.state();
        let resolved = self
            .machine
            .resolve(trigger)
            .ok_or(ZenError::InvalidTransition { state, trigger })?;

        if resolved.is_self_loop() {
            self.run_in_place(resolved, now);
        } else {
            self.run_transition(resolved, now)?;
            self.machine.enter(resolved.to, now);
        }
        self.intents.push(Intent::page(self.state().page()));

        if let Some(problem) = self.app.check_consistency(self.state()) {
            error!("Inconsistent after {:?}: {:?}", trigger, problem);
            self.needs_reconcile = true;
        }
        Ok(())
    }

    /// Actions of triggers that keep the current state.
    fn run_in_place(&mut self, resolved: Resolved, now: Instant) {
        match (resolved.from, resolved.trigger) {
            (SystemState::MainMenu, Trigger::Click) => {
                let option = self.machine.next_menu_option();
                self.intents
                    .push(Intent::message(option.label(), MESSAGE_SHORT_MS));
            }
            (SystemState::Calibrating, Trigger::Click) => {
                self.intents.push(Intent::message_fmt(
                    format_args!("Calibrating {}%", self.app.calibrator.progress_percent()),
                    MESSAGE_SHORT_MS,
                ));
            }
            (SystemState::Practicing | SystemState::Paused, Trigger::DoubleClick) => {
                let session = self.app.session.session();
                let secs = self.app.session.current_duration(now).as_secs();
                self.intents.push(Intent::message_fmt(
                    format_args!(
                        "{}:{:02} avg {:.0} breaks {}",
                        secs / 60,
                        secs % 60,
                        session.avg_score,
                        session.break_count
                    ),
                    MESSAGE_MEDIUM_MS,
                ));
            }
            (SystemState::LegacyMenu, Trigger::Click) => {
                self.machine.next_legacy_page();
            }
            (SystemState::Settings, Trigger::Click) => {
                let item = self.machine.next_settings_item();
                self.intents
                    .push(Intent::message(item.label(), MESSAGE_SHORT_MS));
            }
            (SystemState::Settings, Trigger::DoubleClick) => {
                let item = self.machine.settings_item();
                self.app.settings.adjust(item, now);
            }
            (SystemState::History, Trigger::Click) => {
                let pages = self.app.stats.history().len() + 1;
                self.machine.next_history_page(pages);
            }
            _ => debug!("No action for {:?} in {:?}", resolved.trigger, resolved.from),
        }
    }

    /// Exit and entry actions of a state change. An error aborts the change.
    fn run_transition(&mut self, resolved: Resolved, now: Instant) -> Result<(), ZenError> {
        use SystemState as S;

        match (resolved.from, resolved.to, resolved.trigger) {
            (_, S::Sleep, Trigger::LowBatteryCritical) => {
                self.prepare_for_sleep(now);
                self.intents
                    .push(Intent::message("Battery critical", MESSAGE_LONG_MS));
                self.intents.push(Intent::sleep(SleepReason::BatteryCritical));
            }
            (_, S::Sleep, _) => {
                self.prepare_for_sleep(now);
                self.intents.push(Intent::sleep(SleepReason::Inactivity));
            }
            (S::Sleep, _, _) => {
                info!("Waking up");
                self.app.activity.record(now);
            }
            (_, S::Calibrating, _) => {
                if let Err(e) = self.app.begin_calibration() {
                    warn!("Calibration could not start: {}", e);
                    self.play(Tone::Error);
                    self.intents
                        .push(Intent::message("Calibration failed", MESSAGE_MEDIUM_MS));
                    return Err(e.into());
                }
                self.intents
                    .push(Intent::message("Hold still", MESSAGE_MEDIUM_MS));
            }
            (S::Calibrating, _, Trigger::CalibrationDone) => {
                match self.app.complete_calibration(now) {
                    Ok(()) => {
                        self.play(Tone::Success);
                        self.intents
                            .push(Intent::message("Calibration done", MESSAGE_MEDIUM_MS));
                    }
                    Err(e) => {
                        error!("Calibration could not finish: {}", e);
                        self.app.calibrator.cancel();
                        self.play(Tone::Error);
                        self.intents
                            .push(Intent::message("Calibration failed", MESSAGE_MEDIUM_MS));
                    }
                }
            }
            (S::Calibrating, _, _) => {
                self.app.calibrator.cancel();
                self.intents
                    .push(Intent::message("Calibration cancelled", MESSAGE_MEDIUM_MS));
            }
            (S::Practicing, S::Paused, _) => {
                self.app.session.pause(now);
                self.intents
                    .push(Intent::message("Paused", MESSAGE_MEDIUM_MS));
            }
            (S::Paused, S::Practicing, _) => {
                self.app.session.resume(now);
                self.intents
                    .push(Intent::message("Resumed", MESSAGE_MEDIUM_MS));
            }
            (_, S::Practicing, _) => {
                self.app.session.start(now);
                self.play(Tone::Start);
                self.intents
                    .push(Intent::message("Practice started", MESSAGE_MEDIUM_MS));
            }
            (S::Practicing, S::Idle, Trigger::PracticeTimeElapsed) => {
                self.app.finish_session(now);
                self.play(Tone::Success);
                self.intents
                    .push(Intent::message("Practice complete", MESSAGE_COMPLETE_MS));
            }
            (S::Practicing | S::Paused, _, _) => {
                self.app.finish_session(now);
                self.play(Tone::Stop);
                self.intents
                    .push(Intent::message("Practice ended", MESSAGE_MEDIUM_MS));
            }
            (S::MainMenu, S::Settings | S::History, _) => {
                self.intents.push(Intent::message(
                    self.machine.menu_option().label(),
                    MESSAGE_MEDIUM_MS,
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// End whatever is running and write everything out.
    fn prepare_for_sleep(&mut self, now: Instant) {
        if self.app.session.is_active() {
            self.app.finish_session(now);
        }
        if self.app.calibrator.is_in_progress() {
            self.app.calibrator.cancel();
        }
        if let Err(e) = self.save_all() {
            error!("Save before sleep failed: {}", e);
        }
    }

    fn play(&mut self, tone: Tone) {
        if self.app.settings.get().sound_enabled {
            self.intents.push(Intent::tone(tone));
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::input::ButtonGesture;
    use crate::sensors::{RawSample, SensorError};
    use crate::settings::SettingsItem;
    use crate::state_machine::{DisplayIntent, MenuOption, PageId, PowerIntent};
    use crate::storage::{MemoryStore, load_record};

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Motion {
        Still,
        Shaking,
        Offline,
    }

    struct FakeImu {
        motion: Motion,
        reads: u32,
    }

    impl FakeImu {
        fn new() -> Self {
            Self {
                motion: Motion::Still,
                reads: 0,
            }
        }
    }

    impl ImuSensor for FakeImu {
        fn read(&mut self, now: Instant) -> Result<RawSample, SensorError> {
            self.reads += 1;
            match self.motion {
                Motion::Still => Ok(RawSample::at_rest(now)),
                Motion::Shaking => Ok(RawSample::new([0.8, 0.5, 1.7], [60.0, 30.0, 10.0], now)),
                Motion::Offline => Err(SensorError::NoData),
            }
        }
    }

    type Device<'a> = ZenDevice<&'a ManualClock, FakeImu, MemoryStore>;

    fn date(d: u8) -> CalendarDate {
        CalendarDate::new(2024, 6, d).unwrap()
    }

    fn boot(clock: &ManualClock) -> Device<'_> {
        ZenDevice::boot(clock, FakeImu::new(), MemoryStore::new(), date(1))
    }

    fn press(device: &mut Device<'_>, clock: &ManualClock, gesture: ButtonGesture) -> Vec<Intent, INTENT_CAPACITY> {
        let now = clock.now();
        device.tick(TickInput::button(ButtonEvent::instant(gesture, now)))
    }

    /// Advance the clock in sensor-sized steps, ticking without input.
    fn run_for(device: &mut Device<'_>, clock: &ManualClock, ms: u64) -> Vec<Intent, 64> {
        let mut all = Vec::new();
        let steps = ms / SENSOR_READ_INTERVAL.as_millis();
        for _ in 0..steps {
            clock.advance(SENSOR_READ_INTERVAL);
            for intent in device.tick(TickInput::default()) {
                let _ = all.push(intent);
            }
        }
        all
    }

    fn boot_to_menu(clock: &ManualClock) -> Device<'_> {
        let mut device = boot(clock);
        run_for(&mut device, clock, BOOT_ANIMATION_DURATION.as_millis());
        assert_eq!(device.state(), SystemState::MainMenu);
        device
    }

    fn has_tone(intents: &[Intent], tone: Tone) -> bool {
        intents.contains(&Intent::tone(tone))
    }

    fn has_page(intents: &[Intent], page: PageId) -> bool {
        intents.contains(&Intent::Display(DisplayIntent::SetPage(page)))
    }

    // -----------------------------------------------------------------------
    // Boot
    // -----------------------------------------------------------------------

    #[test]
    fn test_boot_animation_then_menu() {
        let clock = ManualClock::new(0);
        let mut device = boot(&clock);
        assert_eq!(device.state(), SystemState::Boot);

        // Buttons are ignored during the animation.
        press(&mut device, &clock, ButtonGesture::Click);
        assert_eq!(device.state(), SystemState::Boot);

        let intents = run_for(&mut device, &clock, 4_000);
        assert_eq!(device.state(), SystemState::MainMenu);
        assert!(has_page(&intents, PageId::MainMenu));
    }

    #[test]
    fn test_first_boot_writes_defaults() {
        let clock = ManualClock::new(0);
        let mut device = boot(&clock);
        run_for(&mut device, &clock, 2_500);

        let port = device.port_mut();
        assert!(port.contains(RecordKey::TodayStats));
        assert!(port.contains(RecordKey::History));
        assert!(port.contains(RecordKey::Settings));
        let today: Option<DailyStats> = load_record(port, RecordKey::TodayStats).unwrap();
        assert_eq!(today, Some(DailyStats::empty(date(1))));
    }

    #[test]
    fn test_reboot_restores_persisted_state() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);

        press(&mut device, &clock, ButtonGesture::DoubleClick);
        run_for(&mut device, &clock, 5_000);
        press(&mut device, &clock, ButtonGesture::LongPress);
        device.app_mut().settings.adjust(SettingsItem::Sound, clock.now());
        device.save_all().unwrap();

        let port = device.port().clone();
        let clock2 = ManualClock::new(0);
        let rebooted = ZenDevice::boot(&clock2, FakeImu::new(), port, date(1));
        assert_eq!(rebooted.app().stats.today().session_count, 1);
        assert!(!rebooted.app().settings.get().sound_enabled);
        assert!(!rebooted.app().stats.is_dirty());
    }

    #[test]
    fn test_boot_after_days_off_rolls_over() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        run_for(&mut device, &clock, 2_000);
        press(&mut device, &clock, ButtonGesture::LongPress);
        device.save_all().unwrap();

        let port = device.port().clone();
        let rebooted = ZenDevice::boot(&clock, FakeImu::new(), port, date(4));
        let stats = &rebooted.app().stats;
        assert_eq!(stats.today().date, date(4));
        assert_eq!(stats.history().len(), 2);
        assert_eq!(stats.history().get(1).unwrap().session_count, 1);
    }

    // -----------------------------------------------------------------------
    // Practice
    // -----------------------------------------------------------------------

    #[test]
    fn test_practice_pause_resume_stop() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);

        let intents = press(&mut device, &clock, ButtonGesture::LongPress);
        assert_eq!(device.state(), SystemState::Practicing);
        assert!(has_tone(&intents, Tone::Start));
        assert!(has_page(&intents, PageId::Practice));
        assert!(device.app().session.is_running());

        run_for(&mut device, &clock, 10_000);
        press(&mut device, &clock, ButtonGesture::Click);
        assert_eq!(device.state(), SystemState::Paused);
        assert!(!device.app().session.is_running());

        run_for(&mut device, &clock, 30_000);
        press(&mut device, &clock, ButtonGesture::Click);
        assert_eq!(device.state(), SystemState::Practicing);

        run_for(&mut device, &clock, 5_000);
        let intents = press(&mut device, &clock, ButtonGesture::LongPress);
        assert_eq!(device.state(), SystemState::MainMenu);
        assert!(has_tone(&intents, Tone::Stop));

        let today = device.app().stats.today();
        assert_eq!(today.session_count, 1);
        assert_eq!(today.total_duration_ms, 15_000);
        assert!(today.avg_score > 99.0);
        assert_eq!(device.app().check_consistency(device.state()), None);
    }

    #[test]
    fn test_practice_time_elapsed_goes_idle() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        device
            .app_mut()
            .settings
            .update(clock.now(), |s| s.practice_time_ms = 60_000);

        press(&mut device, &clock, ButtonGesture::DoubleClick);
        let intents = run_for(&mut device, &clock, 60_000);
        assert_eq!(device.state(), SystemState::Idle);
        assert!(has_tone(&intents, Tone::Success));
        assert_eq!(device.app().stats.today().session_count, 1);
        assert_eq!(device.app().stats.today().total_duration_ms, 60_000);
    }

    #[test]
    fn test_break_while_practicing_is_counted_once() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        run_for(&mut device, &clock, 1_000);

        device.sensor_mut().motion = Motion::Shaking;
        let intents = run_for(&mut device, &clock, 500);
        assert!(has_tone(&intents, Tone::BreakWarning));

        device.sensor_mut().motion = Motion::Still;
        run_for(&mut device, &clock, 1_000);
        press(&mut device, &clock, ButtonGesture::LongPress);

        assert_eq!(device.app().stats.today().total_breaks, 1);
    }

    #[test]
    fn test_break_outside_practice_is_credited_silently() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        run_for(&mut device, &clock, 500);
        device.sensor_mut().motion = Motion::Shaking;
        let intents = run_for(&mut device, &clock, 500);

        assert!(!has_tone(&intents, Tone::BreakWarning));
        assert_eq!(device.app().stats.today().total_breaks, 1);
        assert_eq!(device.app().engine.current().break_count, 1);
        assert!(!device.app().session.is_active());
    }

    #[test]
    fn test_break_while_paused_is_credited_to_session() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        run_for(&mut device, &clock, 1_000);
        press(&mut device, &clock, ButtonGesture::Click);
        assert_eq!(device.state(), SystemState::Paused);

        device.sensor_mut().motion = Motion::Shaking;
        let intents = run_for(&mut device, &clock, 500);

        assert!(!has_tone(&intents, Tone::BreakWarning));
        assert_eq!(device.app().session.session().break_count, 1);
        assert_eq!(device.app().stats.today().total_breaks, 1);
    }

    #[test]
    fn test_sound_disabled_mutes_tones() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        device
            .app_mut()
            .settings
            .update(clock.now(), |s| s.sound_enabled = false);

        let intents = press(&mut device, &clock, ButtonGesture::DoubleClick);
        assert!(!intents.iter().any(|i| matches!(i, Intent::Audio(_))));
    }

    #[test]
    fn test_session_details_message() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        run_for(&mut device, &clock, 65_000);

        let intents = press(&mut device, &clock, ButtonGesture::DoubleClick);
        assert_eq!(device.state(), SystemState::Practicing);
        let details = intents.iter().find_map(|i| match i {
            Intent::Display(DisplayIntent::ShowMessage { text, .. }) => Some(text.clone()),
            _ => None,
        });
        assert!(details.unwrap().starts_with("1:05"));
    }

    // -----------------------------------------------------------------------
    // Calibration
    // -----------------------------------------------------------------------

    #[test]
    fn test_calibration_from_menu_completes() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        for _ in 0..3 {
            press(&mut device, &clock, ButtonGesture::Click);
        }
        assert_eq!(device.machine().menu_option(), MenuOption::Calibration);

        press(&mut device, &clock, ButtonGesture::LongPress);
        assert_eq!(device.state(), SystemState::Calibrating);

        let intents = run_for(&mut device, &clock, 5_100);
        assert_eq!(device.state(), SystemState::MainMenu);
        assert!(has_tone(&intents, Tone::Success));
        assert!(device.app().calibration.calibrated);
        assert!(device.port().contains(RecordKey::Calibration));
    }

    #[test]
    fn test_calibration_guard_failure_stays_in_menu() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        for _ in 0..3 {
            press(&mut device, &clock, ButtonGesture::Click);
        }

        device.sensor_mut().motion = Motion::Offline;
        run_for(&mut device, &clock, 100);
        assert!(device.app().sensor_error);

        let intents = press(&mut device, &clock, ButtonGesture::LongPress);
        assert_eq!(device.state(), SystemState::MainMenu);
        assert!(has_tone(&intents, Tone::Error));
        assert!(!device.app().calibrator.is_in_progress());
    }

    #[test]
    fn test_calibration_cancel_keeps_profile() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        let previous = CalibrationProfile::calibrated([0.1, 0.2, 0.3], [1.0; 3], Instant::from_millis(1));
        device.app_mut().calibration = previous;

        for _ in 0..3 {
            press(&mut device, &clock, ButtonGesture::Click);
        }
        press(&mut device, &clock, ButtonGesture::LongPress);
        run_for(&mut device, &clock, 2_500);
        assert_eq!(device.app().calibrator.collected(), 50);

        press(&mut device, &clock, ButtonGesture::LongPress);
        assert_eq!(device.state(), SystemState::MainMenu);
        assert_eq!(device.app().calibration, previous);
        assert!(!device.app().calibration_dirty);
    }

    #[test]
    fn test_idle_double_click_quick_calibration() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        device
            .app_mut()
            .settings
            .update(clock.now(), |s| s.practice_time_ms = 60_000);
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        run_for(&mut device, &clock, 60_000);
        assert_eq!(device.state(), SystemState::Idle);

        press(&mut device, &clock, ButtonGesture::DoubleClick);
        assert_eq!(device.state(), SystemState::Calibrating);
    }

    // -----------------------------------------------------------------------
    // Menus
    // -----------------------------------------------------------------------

    #[test]
    fn test_settings_editing_is_persisted_after_debounce() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::Click);
        press(&mut device, &clock, ButtonGesture::Click);
        press(&mut device, &clock, ButtonGesture::LongPress);
        assert_eq!(device.state(), SystemState::Settings);

        // Threshold is the first item: 50 -> 55
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        assert_eq!(device.app().settings.get().stability_threshold, 55.0);

        // Sound toggle
        press(&mut device, &clock, ButtonGesture::Click);
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        assert!(!device.app().settings.get().sound_enabled);
        assert!(device.app().settings.is_dirty());

        run_for(&mut device, &clock, 2_000);
        assert!(!device.app().settings.is_dirty());
        let stored: Option<SystemSettings> =
            load_record(device.port_mut(), RecordKey::Settings).unwrap();
        assert_eq!(stored.unwrap().stability_threshold, 55.0);

        press(&mut device, &clock, ButtonGesture::LongPress);
        assert_eq!(device.state(), SystemState::MainMenu);
    }

    #[test]
    fn test_settings_reset_item_restores_defaults() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::Click);
        press(&mut device, &clock, ButtonGesture::Click);
        press(&mut device, &clock, ButtonGesture::LongPress);
        assert_eq!(device.state(), SystemState::Settings);

        press(&mut device, &clock, ButtonGesture::DoubleClick);
        assert_eq!(device.app().settings.get().stability_threshold, 55.0);

        for _ in 0..3 {
            press(&mut device, &clock, ButtonGesture::Click);
        }
        let intents = press(&mut device, &clock, ButtonGesture::Click);
        assert_eq!(device.machine.settings_item(), SettingsItem::ResetDefaults);
        assert!(intents.contains(&Intent::message("Reset to defaults", MESSAGE_SHORT_MS)));

        press(&mut device, &clock, ButtonGesture::DoubleClick);
        assert_eq!(*device.app().settings.get(), SystemSettings::default());
        assert!(device.app().settings.is_dirty());
    }

    #[test]
    fn test_history_pages_and_rejected_gesture() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::Click);
        press(&mut device, &clock, ButtonGesture::LongPress);
        assert_eq!(device.state(), SystemState::History);

        let rejected_before = device.machine().rejected();
        let intents = press(&mut device, &clock, ButtonGesture::DoubleClick);
        assert_eq!(device.state(), SystemState::History);
        assert_eq!(device.machine().rejected(), rejected_before + 1);
        assert!(intents.is_empty());

        press(&mut device, &clock, ButtonGesture::Click);
        // Only today exists, so the page wraps back to 0.
        assert_eq!(device.machine().history_index(), 0);
    }

    #[test]
    fn test_trigger_reports_invalid_transition() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        assert_eq!(
            device.trigger(Trigger::CalibrationDone),
            Err(ZenError::InvalidTransition {
                state: SystemState::MainMenu,
                trigger: Trigger::CalibrationDone
            })
        );
        assert_eq!(device.state(), SystemState::MainMenu);
        assert!(device.take_intents().is_empty());
    }

    // -----------------------------------------------------------------------
    // Power
    // -----------------------------------------------------------------------

    #[test]
    fn test_critical_battery_saves_and_sleeps() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        run_for(&mut device, &clock, 3_000);

        let intents = device.tick(TickInput {
            battery_voltage: Some(2.9),
            ..TickInput::default()
        });
        assert_eq!(device.state(), SystemState::Sleep);
        assert!(intents.contains(&Intent::Power(PowerIntent::RequestSleep(
            SleepReason::BatteryCritical
        ))));
        let stored: Option<DailyStats> =
            load_record(device.port_mut(), RecordKey::TodayStats).unwrap();
        assert_eq!(stored.unwrap().session_count, 1);

        let intents = press(&mut device, &clock, ButtonGesture::Click);
        assert_eq!(device.state(), SystemState::MainMenu);
        assert!(has_page(&intents, PageId::MainMenu));
    }

    #[test]
    fn test_low_battery_warns_once() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        let input = TickInput {
            battery_voltage: Some(3.25),
            ..TickInput::default()
        };
        let first = device.tick(input);
        let second = device.tick(input);
        let warning = Intent::message("Battery low (20%)", MESSAGE_LONG_MS);
        assert!(first.contains(&warning));
        assert!(!second.contains(&warning));
        assert_eq!(device.state(), SystemState::MainMenu);
    }

    #[test]
    fn test_auto_sleep_from_idle() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        device.app_mut().settings.update(clock.now(), |s| {
            s.practice_time_ms = 60_000;
            s.sleep_timeout_ms = 10_000;
        });
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        run_for(&mut device, &clock, 60_000);
        assert_eq!(device.state(), SystemState::Idle);

        let intents = run_for(&mut device, &clock, 10_000);
        assert_eq!(device.state(), SystemState::Sleep);
        assert!(intents.contains(&Intent::sleep(SleepReason::Inactivity)));

        // Sensor is not polled while asleep.
        let reads = device.sensor_mut().reads;
        run_for(&mut device, &clock, 1_000);
        assert_eq!(device.sensor_mut().reads, reads);
    }

    #[test]
    fn test_no_auto_sleep_outside_idle() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        device
            .app_mut()
            .settings
            .update(clock.now(), |s| s.sleep_timeout_ms = 1_000);
        run_for(&mut device, &clock, 5_000);
        assert_eq!(device.state(), SystemState::MainMenu);
    }

    // -----------------------------------------------------------------------
    // Rollover and robustness
    // -----------------------------------------------------------------------

    #[test]
    fn test_rollover_persists_before_commit() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::DoubleClick);
        run_for(&mut device, &clock, 2_000);
        press(&mut device, &clock, ButtonGesture::LongPress);

        clock.advance(Duration::from_millis(50));
        device.tick(TickInput {
            date: Some(date(2)),
            ..TickInput::default()
        });

        assert_eq!(device.app().stats.today().date, date(2));
        assert!(!device.app().stats.is_dirty());
        let history: Option<HistoryRing> =
            load_record(device.port_mut(), RecordKey::History).unwrap();
        let history = history.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().session_count, 1);
    }

    #[test]
    fn test_rollover_write_failure_retried_later() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        device.port_mut().set_fail_writes(true);
        device.tick(TickInput {
            date: Some(date(4)),
            ..TickInput::default()
        });

        // Committed in memory even though nothing reached the port.
        assert_eq!(device.app().stats.today().date, date(4));
        assert_eq!(device.app().stats.history().len(), 2);

        device.port_mut().set_fail_writes(false);
        run_for(&mut device, &clock, 61_000);
        let stored: Option<DailyStats> =
            load_record(device.port_mut(), RecordKey::TodayStats).unwrap();
        assert_eq!(stored.unwrap().date, date(4));
    }

    #[test]
    fn test_sensor_failure_keeps_last_score() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        let before = *device.app().engine.current();
        let window = device.app().engine.window().len();

        device.sensor_mut().motion = Motion::Offline;
        run_for(&mut device, &clock, 500);
        assert!(device.app().sensor_error);
        assert_eq!(*device.app().engine.current(), before);
        assert_eq!(device.app().engine.window().len(), window);

        device.sensor_mut().motion = Motion::Still;
        run_for(&mut device, &clock, 100);
        assert!(!device.app().sensor_error);
    }

    #[test]
    fn test_inconsistency_is_repaired_next_tick() {
        let clock = ManualClock::new(0);
        let mut device = boot_to_menu(&clock);
        press(&mut device, &clock, ButtonGesture::DoubleClick);

        let now = clock.now();
        device.app_mut().session.pause(now);
        assert!(device.app().check_consistency(device.state()).is_some());

        run_for(&mut device, &clock, 50);
        assert_eq!(device.state(), SystemState::Practicing);
        assert!(device.app().session.is_running());
    }
}
