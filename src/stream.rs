//! Log polling and differencing.
//!
//! [`LogPoller`] repeatedly queries a trailing block window and reports what
//! changed since its previous successful query as a sequence of [`LogEvent`]s,
//! so chain reorganizations within the window show up as removed logs.

use std::collections::HashSet;

use alloy::primitives::Address;
use tracing::{debug, trace};

use crate::{
    chain::{ChainState, LogFilter},
    error::ProviderError,
    types::{LogEvent, RawLog},
};

/// Default number of most recent blocks re-queried on every poll.
pub const DEFAULT_REORG_WINDOW: u64 = 5;

/// Logs present in `previous` but not in `next` tagged as removed, followed by
/// logs present in `next` but not in `previous` tagged as added, each in the
/// order they were encountered.
pub fn diff_logs(previous: &[RawLog], next: &[RawLog]) -> Vec<LogEvent> {
    let previous_set: HashSet<&RawLog> = previous.iter().collect();
    let next_set: HashSet<&RawLog> = next.iter().collect();

    let removed = previous
        .iter()
        .filter(|log| !next_set.contains(log))
        .cloned()
        .map(LogEvent::removed);
    let added = next
        .iter()
        .filter(|log| !previous_set.contains(log))
        .cloned()
        .map(LogEvent::added);

    removed.chain(added).collect()
}

/// Poller tuning.
#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    /// Number of most recent blocks queried on every poll.
    pub reorg_window: u64,

    /// Number of blocks behind the head to stay.
    pub confirmations: u64,

    /// Skip empty responses instead of treating them as every log being removed.
    /// Some nodes intermittently return nothing while rebuilding their
    /// pending state.
    pub ignore_empty_polls: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            reorg_window: DEFAULT_REORG_WINDOW,
            confirmations: 0,
            ignore_empty_polls: false,
        }
    }
}

/// Owns the snapshot of the previous successful poll and the block cursor.
#[derive(Debug)]
pub struct LogPoller {
    config: PollerConfig,
    start_block: Option<u64>,
    next_block: Option<u64>,
    previous: Vec<RawLog>,
}

impl LogPoller {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            start_block: None,
            next_block: None,
            previous: Vec::new(),
        }
    }

    /// Logs of the previous successful poll.
    pub fn snapshot(&self) -> &[RawLog] {
        &self.previous
    }

    /// Queries logs of the given contracts and returns the difference with
    /// the previous successful poll.
    ///
    /// On error the snapshot and the cursor stay untouched, so the next
    /// successful poll is diffed against the last known-good state.
    pub async fn poll<S: ChainState>(
        &mut self,
        state: &S,
        addresses: Vec<Address>,
    ) -> Result<Vec<LogEvent>, ProviderError> {
        let head = state.block_number().await?;
        let to_block = head.saturating_sub(self.config.confirmations);
        let window_start = to_block.saturating_sub(self.config.reorg_window.saturating_sub(1));
        let start_block = *self.start_block.get_or_insert(window_start);
        let from_block = self
            .next_block
            .map_or(window_start, |next| next.min(window_start))
            .max(start_block);

        if from_block > to_block {
            trace!(from_block, to_block, "Head has not advanced");
            return Ok(Vec::new());
        }

        let filter = LogFilter {
            addresses,
            from_block,
            to_block,
        };
        let logs = state.logs(&filter).await?;

        if logs.is_empty() && self.config.ignore_empty_polls {
            debug!(from_block, to_block, "Ignoring empty poll");
            return Ok(Vec::new());
        }

        // Logs below the queried range slid out of the window, they are
        // neither confirmed nor removed
        let previous: Vec<RawLog> = self
            .previous
            .iter()
            .filter(|log| log.block_number.is_none_or(|n| n >= from_block))
            .cloned()
            .collect();
        let events = diff_logs(&previous, &logs);

        debug!(
            from_block,
            to_block,
            logs = logs.len(),
            events = events.len(),
            "Polled logs"
        );

        self.previous = logs;
        self.next_block = Some(to_block + 1);
        Ok(events)
    }
}
