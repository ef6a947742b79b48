//! Ingestion of level reports from the device link into the sample store.
//!
//! Reports arrive as a byte stream of fixed-size records. Each complete
//! record is turned into a 64-bit tick, compared against the last stored
//! level and, if it is a real transition, appended and run through the
//! trigger engine.

use std::time::Duration;

use crate::sample_store::{SampleStore, StoreError};
use crate::tick_clock::TickClock;
use crate::trigger_engine::{Matched, TriggerEngine};

/// Size of one report on the wire: seqno u16, flags u16, tick u32, level u32.
pub const REPORT_SIZE: usize = 12;

/// Budget used before any throughput has been measured.
pub const INITIAL_REPORT_BUDGET: usize = 2000;

/// Fewer reports than this in one pass say nothing about throughput.
const MIN_REPORTS_FOR_TUNING: usize = 500;

/// Share of the time slot the input pass may fill, in percent.
const SLOT_USAGE_PERCENT: u128 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub seqno: u16,
    pub flags: u16,
    pub tick: u32,
    pub level: u32,
}

impl Report {
    pub fn from_bytes(bytes: &[u8; REPORT_SIZE]) -> Self {
        Self {
            seqno: u16::from_le_bytes([bytes[0], bytes[1]]),
            flags: u16::from_le_bytes([bytes[2], bytes[3]]),
            tick: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            level: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; REPORT_SIZE] {
        let mut bytes = [0u8; REPORT_SIZE];
        bytes[0..2].copy_from_slice(&self.seqno.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.flags.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.tick.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.level.to_le_bytes());
        bytes
    }
}

/// Splits a byte stream into reports, holding back any partial record
/// until the rest of it arrives.
#[derive(Debug, Default)]
pub struct ReportDecoder {
    pending: Vec<u8>,
}

impl ReportDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Report> {
        self.pending.extend_from_slice(bytes);

        let complete = self.pending.len() / REPORT_SIZE * REPORT_SIZE;
        let reports = self.pending[..complete]
            .chunks_exact(REPORT_SIZE)
            .filter_map(|chunk| <&[u8; REPORT_SIZE]>::try_from(chunk).ok())
            .map(Report::from_bytes)
            .collect();

        self.pending.drain(..complete);
        reports
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestState {
    /// Connected, waiting for the first input pass.
    #[default]
    Uninitialized,
    Running,
    /// Device link gone; nothing is ingested until a fresh connection.
    Dormant,
    Quit,
}

/// What happened to one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// First record of an empty store; became the tick origin.
    Origin,
    /// Same level as the last stored record.
    Unchanged,
    /// Store full outside live capture; the report was dropped.
    Dropped,
    Stored {
        matched: Matched,
        /// The post-trigger countdown ran out on this record.
        capture_complete: bool,
    },
}

/// Session state of the ingestion pipeline.
#[derive(Debug, Default)]
pub struct Ingestor {
    state: IngestState,
    clock: TickClock,
    countdown: Option<i64>,
    decoder: ReportDecoder,
    dropping: bool,
}

impl Ingestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// A fresh connection: forget everything from the previous session.
    pub fn connect(&mut self) {
        self.state = IngestState::Uninitialized;
        self.clock.reset();
        self.decoder.clear();
        self.countdown = None;
        self.dropping = false;
    }

    /// First input pass after a connection.
    pub fn start(&mut self) {
        if self.state == IngestState::Uninitialized {
            self.state = IngestState::Running;
        }
    }

    pub fn go_dormant(&mut self) {
        if self.state != IngestState::Quit {
            self.state = IngestState::Dormant;
        }
    }

    pub fn quit(&mut self) {
        self.state = IngestState::Quit;
    }

    pub fn is_running(&self) -> bool {
        self.state == IngestState::Running
    }

    /// Remaining post-trigger records, if a live capture is armed.
    pub fn countdown(&self) -> Option<i64> {
        self.countdown
    }

    pub fn disarm(&mut self) {
        self.countdown = None;
    }

    pub fn decoder(&mut self) -> &mut ReportDecoder {
        &mut self.decoder
    }

    /// Run one report through the pipeline.
    ///
    /// `live` selects the overflow policy: in live capture the oldest record
    /// is evicted, otherwise the new one is dropped so the history under
    /// review stays intact.
    pub fn on_report(
        &mut self,
        raw_tick: u32,
        level: u32,
        store: &mut SampleStore,
        triggers: &mut TriggerEngine,
        live: bool,
    ) -> Ingested {
        let Some(previous) = store.last() else {
            self.clock.reset();
            let tick = self.clock.advance(raw_tick);
            if store.append(tick, level).is_err() {
                return Ingested::Dropped;
            }
            return Ingested::Origin;
        };

        let tick = self.clock.advance(raw_tick);

        if level == previous.level {
            return Ingested::Unchanged;
        }

        match store.append(tick, level) {
            Ok(_) => {}
            Err(StoreError::Overflow) if live => {
                store.evict_oldest();
                if store.append(tick, level).is_err() {
                    return Ingested::Dropped;
                }
            }
            Err(_) => {
                if !self.dropping {
                    log::warn!("Sample buffer full, ignoring new samples until it is cleared");
                    self.dropping = true;
                }
                return Ingested::Dropped;
            }
        }
        self.dropping = false;

        let outcome = triggers.fire(level, previous.level, live);
        if let Some(samples) = outcome.countdown {
            self.countdown = Some(self.countdown.map_or(samples, |c| c.max(samples)));
        }

        let mut capture_complete = false;
        if live {
            if let Some(remaining) = self.countdown.as_mut() {
                *remaining -= 1;
                if *remaining < 0 {
                    capture_complete = true;
                    self.countdown = None;
                }
            }
        }

        Ingested::Stored {
            matched: outcome.matched,
            capture_complete,
        }
    }
}

/// Input-pass report budget for the next cycle.
///
/// When the last pass handled enough reports to be meaningful, scale the
/// measured rate to 80% of the time slot and raise the budget if that is
/// more than the current one. The budget never shrinks.
pub fn next_report_budget(current: usize, reports: usize, elapsed: Duration, time_slot: Duration) -> usize {
    if reports < MIN_REPORTS_FOR_TUNING || elapsed.is_zero() {
        return current;
    }

    let fit = time_slot.as_micros() * reports as u128 / elapsed.as_micros().max(1);
    let target = usize::try_from(fit * SLOT_USAGE_PERCENT / 100).unwrap_or(usize::MAX);

    target.max(current)
}
