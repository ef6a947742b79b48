//! # piscope-rs
//!
//! Capture core for a digital waveform viewer fed by the pigpio daemon.
//!
//! Level changes on up to 32 channels stream in from the daemon, are kept
//! in a fixed-size transition buffer, run through four configurable
//! triggers and are mapped onto a time window for a renderer to draw. The
//! window can follow the live data, play back history or stay paused for
//! inspection. Captures can be saved and loaded in the piscope text format
//! and exported as VCD or as a polars `DataFrame`.
//!
//! ## Features
//!
//! - **Transition buffer**: fixed-capacity ring of `(tick, level)` records with 64-bit ticks
//! - **Triggers**: per-channel low/high/edge/falling/rising conditions with builder patterns
//! - **View window**: live / play / pause modes, zoom, play speed, paging and binary search
//! - **Navigation**: jump the cursor to the next edge or trigger match
//! - **Files**: piscope text load/save, VCD export, `polars` DataFrame and CSV export
//! - **Runtime**: a capture thread running the input and output passes, driven by commands
//!
//! ## Examples
//!
//! ### Live capture
//!
//! ```rust,no_run
//! use piscope_rs::{Capture, Engine, PigpioLink, RuntimeEvent};
//!
//! let link = PigpioLink::connect("localhost", 8888)?;
//! let capture = Capture::spawn(Engine::default(), Some(Box::new(link)))?;
//!
//! if let Ok(frame) = capture.frames().recv() {
//!     println!("{} records buffered", frame.buffered);
//! }
//! while let Some(event) = capture.poll() {
//!     if let RuntimeEvent::Disconnected(reason) = event {
//!         println!("link lost: {}", reason);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Trigger
//!
//! ```rust
//! use piscope_rs::{TriggerEngine, TriggerSpec};
//!
//! let mut triggers = TriggerEngine::new();
//! triggers
//!     .configure(0, TriggerSpec::when_channels().rising(4).high(17).sample_from())
//!     .unwrap();
//! assert!(triggers.set_enabled(0, true).unwrap());
//! println!("{}", triggers.counts_label());
//! ```
//!
//! ### Converting a capture
//!
//! ```rust,no_run
//! use piscope_rs::{waveform_file, SampleStore, WaveformFormat};
//! use std::path::Path;
//!
//! let mut store = SampleStore::default();
//! let loaded = waveform_file::load_from_path(Path::new("run.piscope"), &mut store)?;
//! waveform_file::save_to_path(Path::new("run.vcd"), &store, WaveformFormat::Vcd, loaded.time_origin, None)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod channels;
pub mod dataframe;
pub mod device_link;
pub mod engine;
pub mod ingest;
pub mod marks;
pub mod navigation;
pub mod runtime;
pub mod sample_store;
pub mod settings;
pub mod tick_clock;
pub mod trigger_config;
pub mod trigger_engine;
pub mod view_window;
pub mod waveform_file;

// Re-export the main types for convenience
pub use trigger_config::{ChannelState, TriggerBuilder, TriggerConfigError, TriggerSpec, TriggerWhen};

pub use trigger_engine::{Matched, TriggerEngine};

pub use sample_store::{Sample, SampleStore, StoreError};

pub use tick_clock::Tick;

pub use view_window::{ViewFrame, ViewMode, ViewWindow};

pub use device_link::{DeviceLink, DeviceLinkError, MemoryLink, PigpioLink};

pub use engine::{Engine, EngineError};

pub use runtime::{Capture, Command, RenderFrame, RuntimeEvent};

pub use settings::{RuntimeConfig, Settings, SettingsError};

pub use waveform_file::{WaveformFileError, WaveformFormat};
