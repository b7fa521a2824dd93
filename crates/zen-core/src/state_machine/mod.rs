//! Top-level system state machine.
//!
//! Transitions are data: [`TRANSITIONS`] maps `(state, trigger)` to a
//! [`Target`]. Anything not listed is rejected and leaves the state alone.
//! The single exception is [`Trigger::LowBatteryCritical`], which moves any
//! state to [`SystemState::Sleep`].
//!
//! The machine itself only tracks the current state and the navigation
//! cursors of the menu pages. Guards and side effects (starting sessions,
//! calibration, sounds) belong to the runtime that drives it, which asks
//! [`StateMachine::resolve`] where a trigger would lead, runs its guards, and
//! then commits with [`StateMachine::enter`].

pub mod intents;

pub use intents::*;

use embassy_time::Instant;
use log::{info, warn};

use crate::settings::SettingsItem;

// ---------------------------------------------------------------------------
// States and triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemState {
    #[default]
    Boot,
    MainMenu,
    Idle,
    Calibrating,
    Practicing,
    Paused,
    LegacyMenu,
    Settings,
    History,
    Sleep,
}

impl SystemState {
    pub const ALL: [SystemState; 10] = [
        Self::Boot,
        Self::MainMenu,
        Self::Idle,
        Self::Calibrating,
        Self::Practicing,
        Self::Paused,
        Self::LegacyMenu,
        Self::Settings,
        Self::History,
        Self::Sleep,
    ];

    /// Screen shown while in this state.
    pub const fn page(self) -> PageId {
        match self {
            Self::Boot => PageId::Boot,
            Self::MainMenu => PageId::MainMenu,
            Self::Idle => PageId::Idle,
            Self::Calibrating => PageId::Calibration,
            Self::Practicing => PageId::Practice,
            Self::Paused => PageId::Paused,
            Self::LegacyMenu => PageId::Legacy,
            Self::Settings => PageId::Settings,
            Self::History => PageId::History,
            Self::Sleep => PageId::Sleep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Click,
    DoubleClick,
    LongPress,
    BootAnimationDone,
    PracticeTimeElapsed,
    CalibrationDone,
    LowBatteryCritical,
    InactivityTimeout,
    Wake,
}

impl Trigger {
    pub const ALL: [Trigger; 9] = [
        Self::Click,
        Self::DoubleClick,
        Self::LongPress,
        Self::BootAnimationDone,
        Self::PracticeTimeElapsed,
        Self::CalibrationDone,
        Self::LowBatteryCritical,
        Self::InactivityTimeout,
        Self::Wake,
    ];
}

impl From<crate::input::ButtonGesture> for Trigger {
    fn from(gesture: crate::input::ButtonGesture) -> Self {
        use crate::input::ButtonGesture;
        match gesture {
            ButtonGesture::Click => Self::Click,
            ButtonGesture::DoubleClick => Self::DoubleClick,
            ButtonGesture::LongPress => Self::LongPress,
        }
    }
}

/// Entries of the main menu, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MenuOption {
    #[default]
    StartPractice,
    History,
    Settings,
    Calibration,
}

impl MenuOption {
    pub const fn next(self) -> Self {
        match self {
            Self::StartPractice => Self::History,
            Self::History => Self::Settings,
            Self::Settings => Self::Calibration,
            Self::Calibration => Self::StartPractice,
        }
    }

    pub const fn target(self) -> SystemState {
        match self {
            Self::StartPractice => SystemState::Practicing,
            Self::History => SystemState::History,
            Self::Settings => SystemState::Settings,
            Self::Calibration => SystemState::Calibrating,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::StartPractice => "Start practice",
            Self::History => "History",
            Self::Settings => "Settings",
            Self::Calibration => "Calibration",
        }
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    To(SystemState),
    /// Accepted without leaving the state; the runtime runs the action.
    Stay,
    /// Main menu confirmation, resolved from the highlighted option.
    MenuSelection,
}

use SystemState as S;
use Trigger as T;

pub const TRANSITIONS: &[(SystemState, Trigger, Target)] = &[
    (S::Boot, T::BootAnimationDone, Target::To(S::MainMenu)),
    (S::MainMenu, T::Click, Target::Stay),
    (S::MainMenu, T::LongPress, Target::MenuSelection),
    (S::MainMenu, T::DoubleClick, Target::To(S::Practicing)),
    (S::Idle, T::Click, Target::To(S::MainMenu)),
    (S::Idle, T::LongPress, Target::To(S::MainMenu)),
    (S::Idle, T::DoubleClick, Target::To(S::Calibrating)),
    (S::Idle, T::InactivityTimeout, Target::To(S::Sleep)),
    (S::Calibrating, T::CalibrationDone, Target::To(S::MainMenu)),
    (S::Calibrating, T::LongPress, Target::To(S::MainMenu)),
    (S::Calibrating, T::Click, Target::Stay),
    (S::Practicing, T::Click, Target::To(S::Paused)),
    (S::Practicing, T::LongPress, Target::To(S::MainMenu)),
    (S::Practicing, T::DoubleClick, Target::Stay),
    (S::Practicing, T::PracticeTimeElapsed, Target::To(S::Idle)),
    (S::Paused, T::Click, Target::To(S::Practicing)),
    (S::Paused, T::LongPress, Target::To(S::MainMenu)),
    (S::Paused, T::DoubleClick, Target::Stay),
    (S::LegacyMenu, T::Click, Target::Stay),
    (S::LegacyMenu, T::LongPress, Target::To(S::MainMenu)),
    (S::LegacyMenu, T::DoubleClick, Target::To(S::MainMenu)),
    (S::Settings, T::Click, Target::Stay),
    (S::Settings, T::DoubleClick, Target::Stay),
    (S::Settings, T::LongPress, Target::To(S::MainMenu)),
    (S::History, T::Click, Target::Stay),
    (S::History, T::LongPress, Target::To(S::MainMenu)),
    (S::Sleep, T::Wake, Target::To(S::MainMenu)),
];

/// Table lookup, including the critical-battery override.
pub fn lookup(state: SystemState, trigger: Trigger) -> Option<Target> {
    if trigger == Trigger::LowBatteryCritical {
        return Some(Target::To(SystemState::Sleep));
    }
    TRANSITIONS
        .iter()
        .find(|(s, t, _)| *s == state && *t == trigger)
        .map(|(_, _, target)| *target)
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// Where a trigger leads from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub from: SystemState,
    pub to: SystemState,
    pub trigger: Trigger,
}

impl Resolved {
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

/// Number of pages cycled by the legacy status menu.
pub const LEGACY_PAGE_COUNT: u8 = 3;

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: SystemState,
    entered_at: Instant,
    menu_option: MenuOption,
    settings_item: SettingsItem,
    history_index: usize,
    legacy_page: u8,
    rejected: u32,
}

impl StateMachine {
    pub fn new(now: Instant) -> Self {
        Self::with_state(SystemState::Boot, now)
    }

    pub fn with_state(state: SystemState, now: Instant) -> Self {
        Self {
            state,
            entered_at: now,
            menu_option: MenuOption::default(),
            settings_item: SettingsItem::default(),
            history_index: 0,
            legacy_page: 0,
            rejected: 0,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    pub fn menu_option(&self) -> MenuOption {
        self.menu_option
    }

    pub fn settings_item(&self) -> SettingsItem {
        self.settings_item
    }

    pub fn history_index(&self) -> usize {
        self.history_index
    }

    pub fn legacy_page(&self) -> u8 {
        self.legacy_page
    }

    /// Number of triggers rejected so far.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Resolve `trigger` without committing. Rejections are logged and
    /// counted.
    pub fn resolve(&mut self, trigger: Trigger) -> Option<Resolved> {
        let to = match lookup(self.state, trigger) {
            Some(Target::To(to)) => to,
            Some(Target::Stay) => self.state,
            Some(Target::MenuSelection) => self.menu_option.target(),
            None => {
                self.rejected += 1;
                warn!(
                    "Rejected transition: {:?} in state {:?}",
                    trigger, self.state
                );
                return None;
            }
        };

        Some(Resolved {
            from: self.state,
            to,
            trigger,
        })
    }

    /// Commit a state change. Entering a page resets its cursor.
    pub fn enter(&mut self, to: SystemState, now: Instant) {
        if to == self.state {
            return;
        }

        info!("State {:?} -> {:?}", self.state, to);
        self.state = to;
        self.entered_at = now;

        match to {
            SystemState::Settings => self.settings_item = SettingsItem::default(),
            SystemState::History => self.history_index = 0,
            SystemState::LegacyMenu => self.legacy_page = 0,
            _ => {}
        }
    }

    pub fn next_menu_option(&mut self) -> MenuOption {
        self.menu_option = self.menu_option.next();
        self.menu_option
    }

    pub fn next_settings_item(&mut self) -> SettingsItem {
        self.settings_item = self.settings_item.next();
        self.settings_item
    }

    /// Advance the history page, wrapping over `pages` entries.
    pub fn next_history_page(&mut self, pages: usize) -> usize {
        self.history_index = if pages == 0 {
            0
        } else {
            (self.history_index + 1) % pages
        };
        self.history_index
    }

    pub fn next_legacy_page(&mut self) -> u8 {
        self.legacy_page = (self.legacy_page + 1) % LEGACY_PAGE_COUNT;
        self.legacy_page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn test_boot_only_exits_on_animation_done() {
        for trigger in Trigger::ALL {
            let expected = match trigger {
                Trigger::BootAnimationDone => Some(Target::To(SystemState::MainMenu)),
                Trigger::LowBatteryCritical => Some(Target::To(SystemState::Sleep)),
                _ => None,
            };
            assert_eq!(lookup(SystemState::Boot, trigger), expected, "{trigger:?}");
        }
    }

    #[test]
    fn test_critical_battery_reaches_sleep_from_everywhere() {
        for state in SystemState::ALL {
            assert_eq!(
                lookup(state, Trigger::LowBatteryCritical),
                Some(Target::To(SystemState::Sleep))
            );
        }
    }

    #[test]
    fn test_table_has_no_duplicate_rows() {
        for (i, (s, t, _)) in TRANSITIONS.iter().enumerate() {
            let dupes = TRANSITIONS[i + 1..]
                .iter()
                .filter(|(s2, t2, _)| s2 == s && t2 == t)
                .count();
            assert_eq!(dupes, 0, "duplicate row {s:?} {t:?}");
        }
    }

    #[test]
    fn test_table_targets_are_consistent() {
        for (from, trigger, target) in TRANSITIONS {
            if let Target::To(to) = target {
                assert_ne!(from, to, "{from:?} {trigger:?} should be Stay");
            }
            if *target == Target::To(SystemState::Sleep) {
                assert_eq!(*trigger, Trigger::InactivityTimeout);
            }
        }
    }

    #[test]
    fn test_main_menu_selection_follows_option() {
        let mut sm = StateMachine::with_state(SystemState::MainMenu, at(0));
        let expected = [
            SystemState::Practicing,
            SystemState::History,
            SystemState::Settings,
            SystemState::Calibrating,
        ];
        for target in expected {
            let resolved = sm.resolve(Trigger::LongPress).unwrap();
            assert_eq!(resolved.to, target);
            sm.next_menu_option();
        }
        assert_eq!(sm.menu_option(), MenuOption::StartPractice);
    }

    #[test]
    fn test_resolve_does_not_commit() {
        let mut sm = StateMachine::with_state(SystemState::Practicing, at(0));
        let resolved = sm.resolve(Trigger::Click).unwrap();
        assert_eq!(resolved.to, SystemState::Paused);
        assert_eq!(sm.state(), SystemState::Practicing);

        sm.enter(resolved.to, at(10));
        assert_eq!(sm.state(), SystemState::Paused);
        assert_eq!(sm.entered_at(), at(10));
    }

    #[test]
    fn test_invalid_trigger_is_rejected() {
        let mut sm = StateMachine::with_state(SystemState::History, at(0));
        assert!(sm.resolve(Trigger::DoubleClick).is_none());
        assert!(sm.resolve(Trigger::CalibrationDone).is_none());
        assert_eq!(sm.state(), SystemState::History);
        assert_eq!(sm.rejected(), 2);
    }

    #[test]
    fn test_self_loops() {
        let mut sm = StateMachine::with_state(SystemState::Settings, at(0));
        assert!(sm.resolve(Trigger::Click).unwrap().is_self_loop());
        assert!(sm.resolve(Trigger::DoubleClick).unwrap().is_self_loop());
        assert!(!sm.resolve(Trigger::LongPress).unwrap().is_self_loop());
    }

    #[test]
    fn test_entering_pages_resets_cursors() {
        let mut sm = StateMachine::with_state(SystemState::History, at(0));
        sm.next_history_page(5);
        sm.next_history_page(5);
        assert_eq!(sm.history_index(), 2);

        sm.enter(SystemState::MainMenu, at(1));
        sm.enter(SystemState::History, at(2));
        assert_eq!(sm.history_index(), 0);
        assert_eq!(sm.next_history_page(0), 0);
    }

    #[test]
    fn test_legacy_pages_wrap() {
        let mut sm = StateMachine::with_state(SystemState::LegacyMenu, at(0));
        for _ in 0..LEGACY_PAGE_COUNT {
            sm.next_legacy_page();
        }
        assert_eq!(sm.legacy_page(), 0);
    }

    #[test]
    fn test_every_state_has_a_page() {
        assert_eq!(SystemState::Calibrating.page(), PageId::Calibration);
        assert_eq!(SystemState::Practicing.page(), PageId::Practice);
        assert_eq!(SystemState::default(), SystemState::Boot);
    }
}
