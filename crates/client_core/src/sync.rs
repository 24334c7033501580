use std::time::Duration;

use shared::domain::{Message, ServerTime};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_LIST_REFRESH_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WARM_UP_CYCLES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    /// Confirmed poll cycles fetched from the beginning of the chat after it
    /// is opened. Zero starts strictly incremental.
    pub warm_up_cycles: u32,
    pub list_refresh_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            warm_up_cycles: DEFAULT_WARM_UP_CYCLES,
            list_refresh_interval: DEFAULT_LIST_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    WarmingUp { remaining: u32 },
    Steady,
}

/// Per-chat polling state: `WarmingUp(n) -> Steady`, plus the cursor.
///
/// The cursor never moves backwards, whatever order poll results and send
/// confirmations arrive in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSync {
    cursor: ServerTime,
    phase: SyncPhase,
    confirmed_cycles: u64,
}

impl ChatSync {
    pub fn new(seed_cursor: ServerTime, warm_up_cycles: u32) -> Self {
        let phase = if warm_up_cycles == 0 {
            SyncPhase::Steady
        } else {
            SyncPhase::WarmingUp {
                remaining: warm_up_cycles,
            }
        };
        Self {
            cursor: seed_cursor,
            phase,
            confirmed_cycles: 0,
        }
    }

    pub fn cursor(&self) -> ServerTime {
        self.cursor
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn confirmed_cycles(&self) -> u64 {
        self.confirmed_cycles
    }

    /// Lower bound for the next fetch.
    pub fn fetch_since(&self) -> ServerTime {
        match self.phase {
            SyncPhase::WarmingUp { .. } => ServerTime::ZERO,
            SyncPhase::Steady => self.cursor,
        }
    }

    /// Records a successful poll. `raw` is the response before dedup: the
    /// cursor follows its newest timestamp even when every entry was known.
    pub fn on_poll_success(&mut self, raw: &[Message]) {
        if let Some(newest) = raw.iter().map(|message| message.timestamp).max() {
            self.advance(newest);
        }
        self.confirmed_cycles += 1;
        if let SyncPhase::WarmingUp { remaining } = self.phase {
            self.phase = match remaining.saturating_sub(1) {
                0 => SyncPhase::Steady,
                remaining => SyncPhase::WarmingUp { remaining },
            };
        }
    }

    pub fn on_send_confirmed(&mut self, timestamp: ServerTime) {
        self.advance(timestamp);
    }

    fn advance(&mut self, timestamp: ServerTime) {
        self.cursor = self.cursor.max(timestamp);
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
