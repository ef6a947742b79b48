//! Background capture thread.
//!
//! One worker thread owns the [`Engine`] and the device link. It runs the
//! input pass (drain reports) and the output pass (recompute the view and
//! publish a frame) on their own deadlines, and applies [`Command`]s sent
//! from other threads between passes. An output pass therefore always sees
//! every append of the input passes that finished before it, and frames
//! are copies, so no consumer ever observes a partial append.
//!
//! Frames go through a one-slot channel: while the previous frame has not
//! been taken, new ones are skipped. Other events are never dropped.
//!
//! ```no_run
//! use piscope_rs::device_link::PigpioLink;
//! use piscope_rs::engine::Engine;
//! use piscope_rs::runtime::{Capture, Command, RuntimeEvent};
//!
//! let link = PigpioLink::connect_from_env()?;
//! let capture = Capture::spawn(Engine::default(), Some(Box::new(link)))?;
//!
//! while let Ok(frame) = capture.frames().recv() {
//!     println!("{} {} records", frame.mode_label, frame.samples.len());
//!     if let Some(RuntimeEvent::Disconnected(reason)) = capture.poll() {
//!         println!("link lost: {}", reason);
//!         break;
//!     }
//! }
//! capture.send(Command::Quit)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::device_link::DeviceLink;
use crate::engine::{Engine, EngineError};
use crate::navigation::Direction;
use crate::sample_store::Sample;
use crate::settings::Settings;
use crate::tick_clock::Tick;
use crate::trigger_config::TriggerSpec;
use crate::view_window::{ViewFrame, ViewMode};
use crate::waveform_file::{Loaded, WaveformFormat};

/// Requests to the capture thread.
#[derive(Debug)]
pub enum Command {
    /// Start a session on a freshly opened link, replacing any current one.
    Connect(BoxedLink),
    SetMode(ViewMode),
    /// Renderer width in pixels.
    Resize(u32),
    ZoomIn,
    ZoomOut,
    ZoomDefault,
    Faster,
    Slower,
    SpeedDefault,
    First,
    Last,
    PageBack,
    PageForward,
    JumpToFraction(f64),
    PointerMoved(i64),
    PointerClicked(i64),
    PointerDoubleClicked(i64),
    SetMark1,
    SetMark2,
    GoldFromBlue,
    SearchEdge(Direction),
    SearchTrigger(Direction),
    ToggleHighlight(usize),
    ConfigureTrigger { index: usize, spec: TriggerSpec },
    SetTriggerSamples(usize),
    ClearTriggerCounts,
    ClearBuffer,
    ApplySettings(Box<Settings>),
    Save {
        path: PathBuf,
        format: WaveformFormat,
        selection_only: bool,
    },
    Load(PathBuf),
    Disconnect,
    Quit,
}

/// What a renderer needs for one frame.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub view: ViewFrame,
    /// Records from `view.start_sample` to `view.end_sample`.
    pub samples: Vec<Sample>,
    pub tick_origin: Tick,
    pub highlighted: u32,
    pub gold: Tick,
    pub blue: Option<Tick>,
    pub mode_label: String,
    pub counts_label: String,
    pub gold_label: String,
    pub delta_label: Option<String>,
    pub buffered: usize,
    pub capacity: usize,
}

impl RenderFrame {
    fn capture(engine: &Engine, view: ViewFrame) -> Self {
        Self {
            view,
            samples: engine.visible_samples(&view),
            tick_origin: engine.store().tick_origin(),
            highlighted: engine.highlighted(),
            gold: engine.marks().gold,
            blue: engine.marks().blue,
            mode_label: engine.mode_label(),
            counts_label: engine.counts_label(),
            gold_label: engine.gold_label(),
            delta_label: engine.delta_label(),
            buffered: engine.store().count(),
            capacity: engine.store().capacity(),
        }
    }
}

#[derive(Debug)]
pub enum RuntimeEvent {
    ModeChanged(ViewMode),
    Saved { path: PathBuf, records: usize },
    Loaded { path: PathBuf, loaded: Loaded },
    Disconnected(String),
    Error(String),
    Stopped,
}

pub type BoxedLink = Box<dyn DeviceLink + Send>;

/// Handle to the capture thread. Dropping it stops the thread.
pub struct Capture {
    commands: Sender<Command>,
    events: Receiver<RuntimeEvent>,
    frames: Receiver<RenderFrame>,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<Engine>>,
}

impl Capture {
    /// Move `engine` and `link` into a new capture thread. The link, when
    /// given, is attached first so the session starts live.
    pub fn spawn(mut engine: Engine, mut link: Option<BoxedLink>) -> Result<Self, EngineError> {
        if let Some(link) = link.as_mut() {
            engine.attach(link.as_mut())?;
        }

        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let (frame_tx, frame_rx) = mpsc::sync_channel(1);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();

        let handle = thread::Builder::new()
            .name("piscope-capture".to_string())
            .spawn(move || {
                let mut worker = Worker {
                    engine,
                    link,
                    commands: command_rx,
                    events: event_tx,
                    frames: frame_tx,
                    stop_flag: stop_flag_clone,
                };
                worker.run();
                worker.engine
            })
            .map_err(EngineError::Spawn)?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            frames: frame_rx,
            stop_flag,
            handle: Some(handle),
        })
    }

    pub fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands.send(command).map_err(|_| EngineError::Stopped)
    }

    /// Next event, if one is waiting.
    pub fn poll(&self) -> Option<RuntimeEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn events(&self) -> &Receiver<RuntimeEvent> {
        &self.events
    }

    /// Rendered frames. At most one waits here at a time.
    pub fn frames(&self) -> &Receiver<RenderFrame> {
        &self.frames
    }

    /// The waiting frame, if any.
    pub fn latest_frame(&self) -> Option<RenderFrame> {
        self.frames.try_recv().ok()
    }

    /// Stop the thread and take the engine back.
    pub fn stop(mut self) -> Option<Engine> {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.handle.take()?.join().ok()
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Worker {
    engine: Engine,
    link: Option<BoxedLink>,
    commands: Receiver<Command>,
    events: Sender<RuntimeEvent>,
    frames: SyncSender<RenderFrame>,
    stop_flag: Arc<AtomicBool>,
}

impl Worker {
    fn run(&mut self) {
        let input_period = self.engine.config().input_period();
        let output_period = self.engine.config().output_period();
        let mut next_input = Instant::now();
        let mut next_output = next_input;

        tracing::info!(
            "Capture thread running, input every {:?}, output every {:?}",
            input_period,
            output_period
        );

        while !self.stop_flag.load(Ordering::Relaxed) {
            if !self.drain_commands() {
                break;
            }

            let now = Instant::now();
            if now >= next_input {
                self.input_pass();
                next_input += input_period;
                if next_input < now {
                    next_input = now + input_period;
                }
            }

            let now = Instant::now();
            if now >= next_output {
                if !self.output_pass() {
                    break;
                }
                next_output += output_period;
                if next_output < now {
                    next_output = now + output_period;
                }
            }

            let wake = next_input.min(next_output);
            let now = Instant::now();
            if wake > now {
                thread::sleep(wake - now);
            }
        }

        self.engine.quit();
        if let Some(link) = self.link.as_mut() {
            link.disconnect();
        }
        let _ = self.events.send(RuntimeEvent::Stopped);
        tracing::info!("Capture thread stopped");
    }

    fn input_pass(&mut self) {
        let _span = tracing::trace_span!("input_pass").entered();
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|c| c.span(tracy_client::span_location!("input_pass"), 0));

        let Some(link) = self.link.as_mut() else {
            return;
        };

        if let Err(e) = self.engine.poll_link(link.as_mut()) {
            log::warn!("Device link lost: {}", e);
            link.disconnect();
            self.link = None;
            let _ = self.events.send(RuntimeEvent::Disconnected(e.to_string()));
            let _ = self.events.send(RuntimeEvent::ModeChanged(self.engine.mode()));
        }
    }

    /// Skips the frame while the previous one is still waiting. Returns
    /// false once nobody listens for frames any more.
    fn output_pass(&mut self) -> bool {
        let _span = tracing::trace_span!("output_pass").entered();
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|c| c.span(tracy_client::span_location!("output_pass"), 0));

        let Some(view) = self.engine.refresh_view() else {
            return true;
        };
        let frame = RenderFrame::capture(&self.engine, view);
        match self.frames.try_send(frame) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Apply every queued command. Returns false on `Quit` or when every
    /// sender is gone.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Quit) => return false,
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn apply(&mut self, command: Command) {
        let mode_before = self.engine.mode();
        if let Err(e) = self.execute(command) {
            log::warn!("{}", e);
            let _ = self.events.send(RuntimeEvent::Error(e.to_string()));
        }
        let mode = self.engine.mode();
        if mode != mode_before {
            let _ = self.events.send(RuntimeEvent::ModeChanged(mode));
        }
    }

    fn execute(&mut self, command: Command) -> Result<(), EngineError> {
        let engine = &mut self.engine;
        match command {
            Command::Connect(mut link) => {
                if let Some(mut old) = self.link.take() {
                    old.disconnect();
                }
                engine.attach(link.as_mut())?;
                self.link = Some(link);
            }
            Command::SetMode(mode) => engine.set_mode(mode)?,
            Command::Resize(width_px) => engine.view_mut().set_width_px(width_px),
            Command::ZoomIn => engine.view_mut().zoom_in(),
            Command::ZoomOut => engine.view_mut().zoom_out(),
            Command::ZoomDefault => engine.view_mut().zoom_default(),
            Command::Faster => engine.view_mut().faster(),
            Command::Slower => engine.view_mut().slower(),
            Command::SpeedDefault => engine.view_mut().speed_default(),
            Command::First => engine.view_first(),
            Command::Last => engine.view_last(),
            Command::PageBack => engine.view_mut().page_back(),
            Command::PageForward => engine.view_mut().page_forward(),
            Command::JumpToFraction(fraction) => {
                engine.jump_to_fraction(fraction);
            }
            Command::PointerMoved(x) => engine.pointer_moved(x),
            Command::PointerClicked(x) => engine.pointer_clicked(x),
            Command::PointerDoubleClicked(x) => engine.pointer_double_clicked(x),
            Command::SetMark1 => engine.marks_mut().set_mark1(),
            Command::SetMark2 => engine.marks_mut().set_mark2(),
            Command::GoldFromBlue => engine.marks_mut().gold_from_blue(),
            Command::SearchEdge(direction) => {
                engine.search_edge(direction);
            }
            Command::SearchTrigger(direction) => {
                engine.search_trigger(direction);
            }
            Command::ToggleHighlight(channel) => engine.toggle_highlight(channel),
            Command::ConfigureTrigger { index, spec } => engine.triggers_mut().configure(index, spec)?,
            Command::SetTriggerSamples(index) => engine.triggers_mut().set_trigger_samples_index(index)?,
            Command::ClearTriggerCounts => engine.triggers_mut().clear_counts(),
            Command::ClearBuffer => engine.clear_buffer(),
            Command::ApplySettings(settings) => {
                engine.apply_settings(&settings)?;
                let mask = engine.notify_mask();
                if let Some(link) = self.link.as_mut() {
                    link.set_notify_mask(mask)?;
                }
            }
            Command::Save {
                path,
                format,
                selection_only,
            } => {
                let records = engine.save_file(&path, format, selection_only)?;
                let _ = self.events.send(RuntimeEvent::Saved { path, records });
            }
            Command::Load(path) => {
                let loaded = engine.load_file(&path)?;
                let _ = self.events.send(RuntimeEvent::Loaded { path, loaded });
            }
            Command::Disconnect => {
                if let Some(mut link) = self.link.take() {
                    link.disconnect();
                }
                engine.on_disconnected();
            }
            Command::Quit => {}
        }
        Ok(())
    }
}
