//! The visible time window: playback mode, zoom, play speed and the
//! mapping from a window in ticks to record indices in the store.

use crate::navigation::bsearch;
use crate::sample_store::SampleStore;
use crate::tick_clock::Tick;

/// Deci-microseconds per pixel for each zoom level.
pub const ZOOM_DECI_MICROS_PER_PIXEL: [i64; 30] = [
    1,
    2,
    5,
    10,
    20,
    50,
    100,
    200,
    500,
    1_000,
    2_000,
    5_000,
    10_000,
    20_000,
    50_000,
    100_000,
    200_000,
    500_000,
    1_000_000,
    2_000_000,
    5_000_000,
    10_000_000,
    20_000_000,
    50_000_000,
    100_000_000,
    200_000_000,
    500_000_000,
    1_000_000_000,
    2_000_000_000,
    4_000_000_000,
];

pub const DEFAULT_ZOOM_LEVEL: usize = 13;
pub const DEFAULT_WIDTH_PX: u32 = 400;

/// Play speed offsets: negative is faster than real time, positive slower,
/// each step a factor of two.
pub const FASTEST_PLAY_SPEED: i32 = -6;
pub const SLOWEST_PLAY_SPEED: i32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    /// Follow the newest record.
    #[default]
    Live,
    /// Advance through history at the play speed.
    Play,
    /// Frozen for inspection.
    Pause,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Live => "LIVE",
            ViewMode::Play => "PLAY",
            ViewMode::Pause => "PAUSE",
        }
    }
}

/// One computed window, ready for a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewFrame {
    pub mode: ViewMode,
    pub start_tick: Tick,
    pub center_tick: Tick,
    pub end_tick: Tick,
    /// Physical index of the first record to draw, one before the window
    /// start unless that would leave the stored range.
    pub start_sample: usize,
    /// Physical index of the last record to draw.
    pub end_sample: usize,
}

#[derive(Debug, Clone)]
pub struct ViewWindow {
    mode: ViewMode,
    zoom_level: usize,
    play_speed: i32,
    center_tick: Tick,
    width_px: u32,
    refresh_ticks: Tick,
    frame: Option<ViewFrame>,
}

impl ViewWindow {
    /// `output_hz` is the rate `compute` is called at; it sets both the live
    /// refresh grid and the real-time play step.
    pub fn new(width_px: u32, output_hz: u32) -> Self {
        Self {
            mode: ViewMode::Live,
            zoom_level: DEFAULT_ZOOM_LEVEL,
            play_speed: 0,
            center_tick: 0,
            width_px: width_px.max(1),
            refresh_ticks: 1_000_000 / Tick::from(output_hz.max(1)),
            frame: None,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ViewMode) {
        if self.mode != mode {
            log::debug!("View mode {} -> {}", self.mode.as_str(), mode.as_str());
        }
        self.mode = mode;
    }

    pub fn width_px(&self) -> u32 {
        self.width_px
    }

    pub fn set_width_px(&mut self, width_px: u32) {
        self.width_px = width_px.max(1);
    }

    pub fn refresh_ticks(&self) -> Tick {
        self.refresh_ticks
    }

    pub fn center_tick(&self) -> Tick {
        self.center_tick
    }

    pub fn set_center_tick(&mut self, tick: Tick) {
        self.center_tick = tick;
    }

    pub fn zoom_level(&self) -> usize {
        self.zoom_level
    }

    pub fn zoom_in(&mut self) {
        self.zoom_level = self.zoom_level.saturating_sub(1);
    }

    pub fn zoom_out(&mut self) {
        self.zoom_level = (self.zoom_level + 1).min(ZOOM_DECI_MICROS_PER_PIXEL.len() - 1);
    }

    pub fn zoom_default(&mut self) {
        self.zoom_level = DEFAULT_ZOOM_LEVEL;
    }

    /// Window width in ticks, never zero.
    pub fn view_ticks(&self) -> Tick {
        (Tick::from(self.width_px).saturating_mul(ZOOM_DECI_MICROS_PER_PIXEL[self.zoom_level]) / 10).max(1)
    }

    pub fn play_speed(&self) -> i32 {
        self.play_speed
    }

    pub fn faster(&mut self) {
        self.play_speed = (self.play_speed - 1).max(FASTEST_PLAY_SPEED);
    }

    pub fn slower(&mut self) {
        self.play_speed = (self.play_speed + 1).min(SLOWEST_PLAY_SPEED);
    }

    pub fn speed_default(&mut self) {
        self.play_speed = 0;
    }

    /// Ticks the centre advances per output pass in Play.
    pub fn play_step_ticks(&self) -> Tick {
        if self.play_speed <= 0 {
            self.refresh_ticks << -self.play_speed
        } else {
            self.refresh_ticks >> self.play_speed
        }
    }

    /// `8X`, `1X`, `1/4`...
    pub fn play_speed_label(&self) -> String {
        if self.play_speed <= 0 {
            format!("{}X", 1u32 << -self.play_speed)
        } else {
            format!("1/{}", 1u32 << self.play_speed)
        }
    }

    /// Mode with the play speed appended while playing.
    pub fn mode_label(&self) -> String {
        match self.mode {
            ViewMode::Play => format!("{} {}", self.mode.as_str(), self.play_speed_label()),
            mode => mode.as_str().to_string(),
        }
    }

    /// Tick under pixel column `x` of the last computed window.
    pub fn pixel_to_tick(&self, x: i64) -> Tick {
        let center = self.frame.map_or(self.center_tick, |f| f.center_tick);
        let width = i64::from(self.width_px);
        let offset = x.saturating_sub(width / 2);
        center.saturating_add(offset.saturating_mul(self.view_ticks()) / width)
    }

    /// Centre on the oldest record.
    pub fn first(&mut self, store: &SampleStore) {
        if let Some(first) = store.first() {
            self.set_mode(ViewMode::Pause);
            self.center_tick = first.tick + self.view_ticks() / 2;
        }
    }

    /// Centre on the newest record.
    pub fn last(&mut self, store: &SampleStore) {
        if let Some(last) = store.last() {
            self.set_mode(ViewMode::Pause);
            self.center_tick = last.tick - self.view_ticks() / 2;
        }
    }

    pub fn page_back(&mut self) {
        self.set_mode(ViewMode::Pause);
        self.center_tick -= self.view_ticks() * 9 / 10;
    }

    pub fn page_forward(&mut self) {
        self.set_mode(ViewMode::Pause);
        self.center_tick += self.view_ticks() * 9 / 10;
    }

    /// Centre on the record at `fraction` (0.0 oldest, 1.0 newest) of the
    /// stored range and pause. Returns its tick.
    pub fn jump_to_fraction(&mut self, store: &SampleStore, fraction: f64) -> Option<Tick> {
        if store.is_empty() {
            return None;
        }
        let position = (fraction.clamp(0.0, 1.0) * (store.count() - 1) as f64).round() as usize;
        let tick = store.get(position)?.tick;
        self.set_mode(ViewMode::Pause);
        self.center_tick = tick;
        Some(tick)
    }

    /// Re-centre so `cursor` is visible again, placing it 40% of a window
    /// in from the edge it left by.
    pub fn recenter_on(&mut self, cursor: Tick) {
        let Some(frame) = self.frame else {
            self.center_tick = cursor;
            return;
        };
        let offset = self.view_ticks() * 4 / 10;
        if cursor < frame.start_tick {
            self.center_tick = cursor + offset;
        } else if cursor > frame.end_tick {
            self.center_tick = cursor - offset;
        }
    }

    /// Work out the window for this output pass.
    ///
    /// Live snaps the window end to the refresh grid under the newest tick,
    /// Play advances the centre by one play step and Pause keeps it. The
    /// window is then clamped to the stored range at either end. Returns
    /// `None` for an empty store.
    pub fn compute(&mut self, store: &SampleStore) -> Option<ViewFrame> {
        let (first, last) = (store.first()?.tick, store.last()?.tick);
        let view = self.view_ticks();

        let (mut start, mut end) = match self.mode {
            ViewMode::Live => {
                let end = last.div_euclid(self.refresh_ticks) * self.refresh_ticks;
                (end - view, end)
            }
            ViewMode::Play => {
                self.center_tick += self.play_step_ticks();
                (self.center_tick - view / 2, self.center_tick + view / 2)
            }
            ViewMode::Pause => (self.center_tick - view / 2, self.center_tick + view / 2),
        };

        if start <= first {
            start = first;
            end = first + view;
        }
        if end >= last {
            end = last;
            start = last - view;
        }

        let center = start + view / 2;
        self.center_tick = center;

        let read = store.read_pos();
        let write = store.write_pos();

        let start_sample = if start <= first {
            read
        } else {
            let index = bsearch(store, read, write, start);
            if index == read {
                index
            } else {
                store.prev_index(index)
            }
        };

        let end_sample = if end >= last { write } else { bsearch(store, read, write, end) };

        let frame = ViewFrame {
            mode: self.mode,
            start_tick: start,
            center_tick: center,
            end_tick: end,
            start_sample,
            end_sample,
        };
        self.frame = Some(frame);
        Some(frame)
    }
}

impl Default for ViewWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH_PX, 20)
    }
}
