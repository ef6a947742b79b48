//! The capture context: one owner for the sample store, trigger engine,
//! view window, marks and ingestion session.

use std::io::{BufRead, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};

use crate::channels::{self, BoardRevision};
use crate::device_link::{DeviceLink, DeviceLinkError};
use crate::ingest::{next_report_budget, IngestState, Ingested, Ingestor, INITIAL_REPORT_BUDGET, REPORT_SIZE};
use crate::marks::{seconds_label, Marks};
use crate::navigation::{self, Direction};
use crate::sample_store::{Sample, SampleStore, StoreError};
use crate::settings::{RuntimeConfig, Settings, SettingsError};
use crate::tick_clock::Tick;
use crate::trigger_config::{TriggerConfigError, CHANNELS};
use crate::trigger_engine::TriggerEngine;
use crate::view_window::{ViewFrame, ViewMode, ViewWindow};
use crate::waveform_file::{self, Loaded, WaveformFileError, WaveformFormat};

/// Reports read from the link per read call.
const READ_CHUNK_REPORTS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Trigger configuration error: {0}")]
    TriggerConfig(#[from] TriggerConfigError),

    #[error("Waveform file error: {0}")]
    WaveformFile(#[from] WaveformFileError),

    #[error("Device link error: {0}")]
    DeviceLink(#[from] DeviceLinkError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Live capture needs a connection to the pigpio daemon")]
    NotConnected,

    #[error("Failed to start the capture thread: {0}")]
    Spawn(std::io::Error),

    #[error("Capture thread has stopped")]
    Stopped,
}

/// Work done by one input pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollStats {
    pub reports: usize,
    pub stored: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct Engine {
    config: RuntimeConfig,
    store: SampleStore,
    triggers: TriggerEngine,
    view: ViewWindow,
    marks: Marks,
    ingest: Ingestor,
    highlighted: u32,
    revision: BoardRevision,
    active_channels: Option<Vec<u8>>,
    time_origin: NaiveDateTime,
    connected: bool,
    report_budget: usize,
    read_buf: Vec<u8>,
}

impl Engine {
    pub fn new(config: RuntimeConfig) -> Self {
        let mut view = ViewWindow::new(config.width_px, config.output_hz);
        view.set_mode(ViewMode::Pause);

        Self {
            config,
            store: SampleStore::new(config.capacity),
            triggers: TriggerEngine::new(),
            view,
            marks: Marks::new(),
            ingest: Ingestor::new(),
            highlighted: 0,
            revision: BoardRevision::Unknown,
            active_channels: None,
            time_origin: Local::now().naive_local(),
            connected: false,
            report_budget: INITIAL_REPORT_BUDGET,
            read_buf: vec![0; REPORT_SIZE * READ_CHUNK_REPORTS],
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn triggers(&self) -> &TriggerEngine {
        &self.triggers
    }

    pub fn triggers_mut(&mut self) -> &mut TriggerEngine {
        &mut self.triggers
    }

    pub fn view(&self) -> &ViewWindow {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ViewWindow {
        &mut self.view
    }

    pub fn marks(&self) -> &Marks {
        &self.marks
    }

    pub fn marks_mut(&mut self) -> &mut Marks {
        &mut self.marks
    }

    pub fn mode(&self) -> ViewMode {
        self.view.mode()
    }

    pub fn ingest_state(&self) -> IngestState {
        self.ingest.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn revision(&self) -> BoardRevision {
        self.revision
    }

    /// Wall-clock time of the tick origin.
    pub fn time_origin(&self) -> NaiveDateTime {
        self.time_origin
    }

    pub fn report_budget(&self) -> usize {
        self.report_budget
    }

    /// Start a session on a freshly opened link: read the board revision,
    /// subscribe to the active channels and go live.
    pub fn attach(&mut self, link: &mut dyn DeviceLink) -> Result<(), EngineError> {
        let hwver = link.hardware_version()?;
        self.on_connected(hwver);
        link.set_notify_mask(self.notify_mask())?;
        Ok(())
    }

    /// A new connection starts from an empty buffer.
    pub fn on_connected(&mut self, hardware_version: i32) {
        self.revision = BoardRevision::from_hardware_version(hardware_version);
        log::info!(
            "Connected, hardware version {:x} ({})",
            hardware_version,
            self.revision.as_str()
        );

        self.store.clear();
        self.marks.clear();
        self.ingest.connect();
        self.connected = true;
        self.report_budget = INITIAL_REPORT_BUDGET;
        self.triggers.reset();
        self.view.set_mode(ViewMode::Live);
    }

    pub fn on_disconnected(&mut self) {
        if self.connected {
            log::info!("Disconnected, keeping {} buffered records", self.store.count());
        }
        self.connected = false;
        self.ingest.go_dormant();
        if self.view.mode() == ViewMode::Live {
            self.view.set_mode(ViewMode::Pause);
        }
    }

    pub fn quit(&mut self) {
        self.ingest.quit();
    }

    pub fn active_channels(&self) -> Option<&[u8]> {
        self.active_channels.as_deref()
    }

    pub fn set_active_channels(&mut self, channels: Option<Vec<u8>>) {
        self.active_channels = channels;
    }

    /// Channels to subscribe to on the current board.
    pub fn notify_mask(&self) -> u32 {
        channels::notify_mask(self.revision, self.active_channels.as_deref())
    }

    /// Switch playback mode. Going live needs a connection and restarts
    /// trigger bookkeeping.
    pub fn set_mode(&mut self, mode: ViewMode) -> Result<(), EngineError> {
        if mode == ViewMode::Live {
            if !self.connected {
                return Err(EngineError::NotConnected);
            }
            self.triggers.reset();
            self.ingest.disarm();
        }
        self.view.set_mode(mode);
        Ok(())
    }

    /// Run one raw report through ingestion, applying its effects on the
    /// rest of the context.
    pub fn on_report(&mut self, raw_tick: u32, level: u32) -> Ingested {
        let live = self.view.mode() == ViewMode::Live;
        let ingested = self
            .ingest
            .on_report(raw_tick, level, &mut self.store, &mut self.triggers, live);

        match ingested {
            Ingested::Origin => {
                self.time_origin = Local::now().naive_local();
                self.marks.gold = self.store.tick_origin();
            }
            Ingested::Stored {
                capture_complete: true,
                ..
            } => {
                log::info!("Trigger capture complete, pausing");
                self.view.set_mode(ViewMode::Pause);
            }
            _ => {}
        }
        ingested
    }

    /// Input pass: drain available reports from `link`, up to the report
    /// budget, then retune the budget from the measured throughput. A
    /// failing link ends the session.
    pub fn poll_link(&mut self, link: &mut dyn DeviceLink) -> Result<PollStats, EngineError> {
        self.ingest.start();
        if !self.ingest.is_running() {
            return Ok(PollStats::default());
        }

        let started = Instant::now();
        let mut stats = PollStats::default();

        while stats.reports < self.report_budget {
            let n = match link.read_available(&mut self.read_buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.on_disconnected();
                    return Err(e.into());
                }
            };

            let reports = self.ingest.decoder().feed(&self.read_buf[..n]);
            for report in reports {
                stats.reports += 1;
                if matches!(
                    self.on_report(report.tick, report.level),
                    Ingested::Origin | Ingested::Stored { .. }
                ) {
                    stats.stored += 1;
                }
            }
        }

        stats.elapsed = started.elapsed();
        let budget = next_report_budget(
            self.report_budget,
            stats.reports,
            stats.elapsed,
            self.config.time_slot(),
        );
        if budget != self.report_budget {
            log::debug!("Report budget {} -> {}", self.report_budget, budget);
            self.report_budget = budget;
        }
        Ok(stats)
    }

    /// Output pass: recompute the view window.
    pub fn refresh_view(&mut self) -> Option<ViewFrame> {
        self.view.compute(&self.store)
    }

    /// Copies of the records a frame covers, oldest first.
    pub fn visible_samples(&self, frame: &ViewFrame) -> Vec<Sample> {
        let from = self.store.logical(frame.start_sample);
        let to = self.store.logical(frame.end_sample);
        (from..=to).filter_map(|p| self.store.get(p)).collect()
    }

    fn cursor(&self) -> Tick {
        self.marks.blue.unwrap_or_else(|| self.view.center_tick())
    }

    fn move_cursor(&mut self, found: Option<Tick>) -> Option<Tick> {
        let tick = found?;
        self.view.set_mode(ViewMode::Pause);
        self.marks.blue = Some(tick);
        self.view.recenter_on(tick);
        Some(tick)
    }

    /// Move the blue cursor to the next level change on the highlighted
    /// channels (all channels when none are highlighted).
    pub fn search_edge(&mut self, direction: Direction) -> Option<Tick> {
        let found = navigation::search_edge(&self.store, self.cursor(), self.highlighted, direction);
        self.move_cursor(found)
    }

    /// Move the blue cursor to the next transition matching a configured
    /// trigger.
    pub fn search_trigger(&mut self, direction: Direction) -> Option<Tick> {
        let found = navigation::search_trigger(&self.store, &self.triggers, self.cursor(), direction);
        self.move_cursor(found)
    }

    pub fn highlighted(&self) -> u32 {
        self.highlighted
    }

    pub fn toggle_highlight(&mut self, channel: usize) {
        if channel < CHANNELS {
            self.highlighted ^= 1 << channel;
        }
    }

    /// Pointer over pixel `x`: moves the blue cursor while paused.
    pub fn pointer_moved(&mut self, x: i64) {
        if self.view.mode() == ViewMode::Pause {
            self.marks.blue = Some(self.view.pixel_to_tick(x));
        }
    }

    /// Click at pixel `x` moves the gold mark, never before the origin.
    pub fn pointer_clicked(&mut self, x: i64) {
        self.marks.gold = self.view.pixel_to_tick(x).max(self.store.tick_origin());
    }

    pub fn pointer_double_clicked(&mut self, x: i64) {
        let tick = self.view.pixel_to_tick(x);
        self.view.set_mode(ViewMode::Pause);
        self.view.set_center_tick(tick);
    }

    /// Pause with the oldest record at the left edge.
    pub fn view_first(&mut self) {
        self.view.first(&self.store);
    }

    /// Pause with the newest record at the right edge.
    pub fn view_last(&mut self) {
        self.view.last(&self.store);
    }

    /// Buffer overview click.
    pub fn jump_to_fraction(&mut self, fraction: f64) -> Option<Tick> {
        let tick = self.view.jump_to_fraction(&self.store, fraction)?;
        self.marks.gold = tick;
        Some(tick)
    }

    /// Empty the buffer. The next report becomes the new tick origin.
    pub fn clear_buffer(&mut self) {
        log::info!("Clearing {} buffered records", self.store.count());
        self.store.clear();
        self.marks.clear();
        self.ingest.disarm();
    }

    /// Replace the buffer with a text capture and pause on it.
    pub fn load_capture<R: BufRead>(&mut self, input: R) -> Result<Loaded, EngineError> {
        let loaded = waveform_file::load(input, &mut self.store)?;
        self.time_origin = loaded.time_origin;
        self.marks.clear();
        self.ingest.disarm();
        self.view.set_mode(ViewMode::Pause);
        if let Some(first) = self.store.first() {
            self.view.set_center_tick(first.tick + self.view.view_ticks() / 2);
        }
        Ok(loaded)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<Loaded, EngineError> {
        let file = std::fs::File::open(path).map_err(WaveformFileError::from)?;
        self.load_capture(std::io::BufReader::new(file))
    }

    /// Write the buffer, or only the marked selection when `selection_only`
    /// is set and both marks are placed.
    pub fn save_capture<W: Write>(
        &self,
        out: &mut W,
        format: WaveformFormat,
        selection_only: bool,
    ) -> Result<usize, EngineError> {
        let selection = if selection_only { self.marks.selection() } else { None };
        Ok(waveform_file::save(out, &self.store, format, self.time_origin, selection)?)
    }

    pub fn save_file(&self, path: &Path, format: WaveformFormat, selection_only: bool) -> Result<usize, EngineError> {
        let selection = if selection_only { self.marks.selection() } else { None };
        let written = waveform_file::save_to_path(path, &self.store, format, self.time_origin, selection)?;
        log::info!("Saved {} records to {}", written, path.display());
        Ok(written)
    }

    pub fn apply_settings(&mut self, settings: &Settings) -> Result<(), EngineError> {
        self.triggers.load(settings)?;
        self.active_channels = settings.active_channels.clone();
        Ok(())
    }

    /// `base` with this engine's triggers and channel selection.
    pub fn to_settings(&self, base: &Settings) -> Settings {
        let (triggers, trigger_samples) = self.triggers.to_settings();
        Settings {
            active_channels: self.active_channels.clone(),
            trigger_samples,
            triggers,
            ..base.clone()
        }
    }

    pub fn counts_label(&self) -> String {
        self.triggers.counts_label()
    }

    pub fn mode_label(&self) -> String {
        self.view.mode_label()
    }

    pub fn gold_label(&self) -> String {
        seconds_label(self.marks.gold, self.store.tick_origin())
    }

    pub fn delta_label(&self) -> Option<String> {
        self.marks.delta_label()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_link::MemoryLink;
    use crate::ingest::Report;
    use crate::trigger_config::TriggerSpec;
    use chrono::Timelike;
    use std::io::Cursor;

    fn small_engine() -> Engine {
        Engine::new(RuntimeConfig {
            capacity: 64,
            ..RuntimeConfig::default()
        })
    }

    fn report_bytes(reports: &[(u32, u32)]) -> Vec<u8> {
        reports
            .iter()
            .enumerate()
            .flat_map(|(i, &(tick, level))| {
                Report {
                    seqno: i as u16,
                    flags: 0,
                    tick,
                    level,
                }
                .to_bytes()
            })
            .collect()
    }

    #[test]
    fn test_live_requires_connection() {
        let mut engine = small_engine();
        assert!(matches!(engine.set_mode(ViewMode::Live), Err(EngineError::NotConnected)));
        assert_eq!(engine.mode(), ViewMode::Pause);

        engine.on_connected(-1);
        engine.set_mode(ViewMode::Live).unwrap();
        assert_eq!(engine.mode(), ViewMode::Live);
    }

    #[test]
    fn test_attach_subscribes_to_channels() {
        let mut engine = small_engine();
        engine.set_active_channels(Some(vec![4, 17]));
        let mut link = MemoryLink::new(0xa02082);

        engine.attach(&mut link).unwrap();
        assert!(engine.is_connected());
        assert_eq!(engine.revision(), BoardRevision::Rev3);
        assert_eq!(link.notify_mask(), (1 << 4) | (1 << 17));
        assert_eq!(engine.mode(), ViewMode::Live);
    }

    #[test]
    fn test_poll_link_ingests_reports() {
        let mut engine = small_engine();
        let mut link = MemoryLink::new(-1);
        engine.attach(&mut link).unwrap();

        let bytes = report_bytes(&[(100, 0), (200, 1), (300, 1), (400, 0)]);
        link.push(bytes[..30].to_vec());
        link.push(bytes[30..].to_vec());

        let stats = engine.poll_link(&mut link).unwrap();
        assert_eq!(stats.reports, 4);
        assert_eq!(stats.stored, 3);
        assert_eq!(engine.store().count(), 3);
        assert_eq!(engine.ingest_state(), IngestState::Running);
    }

    #[test]
    fn test_link_failure_goes_dormant() {
        let mut engine = small_engine();
        let mut link = MemoryLink::new(-1).hang_up_when_drained();
        engine.attach(&mut link).unwrap();
        link.push(report_bytes(&[(100, 1)]));

        assert!(engine.poll_link(&mut link).is_err());
        assert_eq!(engine.ingest_state(), IngestState::Dormant);
        assert!(!engine.is_connected());
        assert_eq!(engine.mode(), ViewMode::Pause);
        assert_eq!(engine.store().count(), 1);

        assert_eq!(engine.poll_link(&mut link).unwrap(), PollStats::default());
    }

    #[test]
    fn test_trigger_capture_pauses_view() {
        let mut engine = small_engine();
        engine.on_connected(-1);
        engine
            .triggers_mut()
            .configure(0, TriggerSpec::when_channels().rising(3).sample_to())
            .unwrap();
        engine.triggers_mut().set_enabled(0, true).unwrap();

        engine.on_report(10, 0);
        engine.on_report(20, 0x1);
        assert_eq!(engine.mode(), ViewMode::Live);
        engine.on_report(30, 0x9);
        assert_eq!(engine.mode(), ViewMode::Pause);
    }

    #[test]
    fn test_search_moves_blue_cursor_and_pauses() {
        let mut engine = small_engine();
        engine.on_connected(-1);
        for (tick, level) in [(1_000, 0), (2_000, 1), (3_000, 3), (4_000, 2)] {
            engine.on_report(tick, level);
        }
        engine.refresh_view();

        engine.marks_mut().blue = Some(1_500);
        engine.toggle_highlight(1);
        assert_eq!(engine.search_edge(Direction::Forward), Some(3_000));
        assert_eq!(engine.marks().blue, Some(3_000));
        assert_eq!(engine.mode(), ViewMode::Pause);

        assert_eq!(engine.search_edge(Direction::Backward), None);
        assert_eq!(engine.marks().blue, Some(3_000));
    }

    #[test]
    fn test_pointer_click_clamps_gold_to_origin() {
        let mut engine = small_engine();
        engine.on_connected(-1);
        engine.on_report(1_000_000, 0);
        engine.on_report(1_100_000, 1);
        engine.set_mode(ViewMode::Pause).unwrap();
        engine.view_mut().set_center_tick(1_000_000);
        engine.refresh_view();

        engine.pointer_clicked(0);
        assert_eq!(engine.marks().gold, 1_000_000);

        engine.pointer_moved(300);
        assert!(engine.marks().blue.is_some());
    }

    #[test]
    fn test_clear_buffer_resets_marks_and_origin() {
        let mut engine = small_engine();
        engine.on_connected(-1);
        engine.on_report(500, 1);
        engine.on_report(600, 0);
        engine.marks_mut().blue = Some(550);
        engine.marks_mut().set_mark1();

        engine.clear_buffer();
        assert!(engine.store().is_empty());
        assert_eq!(engine.marks(), &Marks::default());

        engine.on_report(900, 1);
        assert_eq!(engine.store().tick_origin(), 900);
    }

    #[test]
    fn test_save_and_load_capture() {
        let mut engine = small_engine();
        engine.on_connected(-1);
        for (tick, level) in [(1_000, 0), (2_000, 1), (3_000, 0)] {
            engine.on_report(tick, level);
        }

        let mut out = Vec::new();
        assert_eq!(engine.save_capture(&mut out, WaveformFormat::Text, false).unwrap(), 3);

        let mut other = small_engine();
        let loaded = other.load_capture(Cursor::new(out)).unwrap();
        assert_eq!(loaded.records, 3);
        assert_eq!(loaded.time_origin, engine.time_origin().with_nanosecond(0).unwrap());
        assert_eq!(other.store().first().map(|s| s.tick), Some(0));
        assert_eq!(other.mode(), ViewMode::Pause);
    }

    #[test]
    fn test_settings_conversion() {
        let mut settings = Settings::default();
        settings.active_channels = Some(vec![2, 3]);
        settings.triggers[1].enabled = true;
        settings.triggers[1].channel_types = vec![0, 2];

        let mut engine = small_engine();
        engine.apply_settings(&settings).unwrap();
        assert_eq!(engine.active_channels(), Some(&[2u8, 3][..]));
        assert!(engine.triggers().spec(1).unwrap().enabled());

        let base = Settings {
            server_port: 9000,
            ..Settings::default()
        };
        let stored = engine.to_settings(&base);
        assert_eq!(stored.server_port, 9000);
        assert_eq!(stored.active_channels, Some(vec![2, 3]));
        assert_eq!(stored.triggers[1].channel_types[1], 2);
    }
}
