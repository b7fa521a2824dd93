//! Side-effect requests produced by the core.
//!
//! The core never draws, beeps or sleeps by itself. Each tick it fills an
//! [`IntentBuffer`] which the platform drains and executes.

use core::fmt::Write;

use heapless::{String, Vec};
use log::warn;

/// Maximum number of intents produced by a single tick.
pub const INTENT_CAPACITY: usize = 16;

/// Longest message text; longer text is truncated.
pub const MESSAGE_CAPACITY: usize = 48;

pub type MessageText = String<MESSAGE_CAPACITY>;

/// Screens the display collaborator knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageId {
    Boot,
    MainMenu,
    Idle,
    Calibration,
    Practice,
    Paused,
    Legacy,
    Settings,
    History,
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    BreakWarning,
    Start,
    Stop,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepReason {
    BatteryCritical,
    Inactivity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayIntent {
    ShowMessage { text: MessageText, duration_ms: u32 },
    SetPage(PageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerIntent {
    RequestSleep(SleepReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Display(DisplayIntent),
    Audio(Tone),
    Power(PowerIntent),
}

impl Intent {
    pub fn message(text: &str, duration_ms: u32) -> Self {
        let mut buf = MessageText::new();
        for c in text.chars() {
            if buf.push(c).is_err() {
                break;
            }
        }
        Self::Display(DisplayIntent::ShowMessage {
            text: buf,
            duration_ms,
        })
    }

    /// Message built from format arguments, truncated to fit.
    pub fn message_fmt(args: core::fmt::Arguments<'_>, duration_ms: u32) -> Self {
        let mut buf = MessageText::new();
        // Overflow only truncates.
        let _ = buf.write_fmt(args);
        Self::Display(DisplayIntent::ShowMessage {
            text: buf,
            duration_ms,
        })
    }

    pub const fn page(page: PageId) -> Self {
        Self::Display(DisplayIntent::SetPage(page))
    }

    pub const fn tone(tone: Tone) -> Self {
        Self::Audio(tone)
    }

    pub const fn sleep(reason: SleepReason) -> Self {
        Self::Power(PowerIntent::RequestSleep(reason))
    }
}

/// Intents accumulated during one tick.
#[derive(Debug, Default)]
pub struct IntentBuffer {
    intents: Vec<Intent, INTENT_CAPACITY>,
    dropped: u32,
}

impl IntentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, intent: Intent) {
        if let Err(intent) = self.intents.push(intent) {
            self.dropped += 1;
            warn!("Intent buffer full, dropping {:?}", intent);
        }
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intent> {
        self.intents.iter()
    }

    /// Intents lost to overflow since creation.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Hand out everything collected so far and start empty.
    pub fn drain(&mut self) -> Vec<Intent, INTENT_CAPACITY> {
        core::mem::take(&mut self.intents)
    }
}
