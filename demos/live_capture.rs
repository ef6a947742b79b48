// Live capture example
//
// Connects to a pigpio daemon, captures level changes for a while and prints
// what a renderer would draw, optionally saving the capture at the end.

use clap::Parser;
use piscope_rs::waveform_file::WaveformFormat;
use piscope_rs::{Capture, Command, Engine, PigpioLink, RuntimeEvent, Settings, ViewMode};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "live_capture", about = "Capture GPIO level changes from pigpiod")]
struct Args {
    /// Daemon address, overrides the settings file and PIGPIO_ADDR
    #[arg(short, long)]
    address: Option<String>,

    /// Daemon port, overrides the settings file and PIGPIO_PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// YAML settings file with triggers and channels
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Seconds to capture before stopping
    #[arg(short, long, default_value_t = 5)]
    duration: u64,

    /// Save the capture here when done (.vcd for VCD, anything else for text)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let mut settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    }
    .with_env_overrides();
    if let Some(address) = args.address {
        settings.server_address = address;
    }
    if let Some(port) = args.port {
        settings.server_port = port;
    }

    println!("piscope live capture");
    println!("====================\n");
    println!("Connecting to {}:{}...", settings.server_address, settings.server_port);

    let link = PigpioLink::connect(&settings.server_address, settings.server_port)?;

    let mut engine = Engine::default();
    engine.apply_settings(&settings)?;
    let capture = Capture::spawn(engine, Some(Box::new(link)))?;
    println!("Connected, capturing for {}s\n", args.duration);

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut frames = 0usize;
    'capture: while Instant::now() < deadline {
        if let Ok(frame) = capture.frames().recv_timeout(Duration::from_millis(100)) {
            frames += 1;
            // One status line per second at the default output rate.
            if frames % 20 == 0 {
                println!(
                    "{:>6} | {:>7}/{} | {} | {} | {} visible",
                    frame.mode_label,
                    frame.buffered,
                    frame.capacity,
                    frame.gold_label,
                    frame.counts_label,
                    frame.samples.len()
                );
            }
        }

        while let Some(event) = capture.poll() {
            match event {
                RuntimeEvent::ModeChanged(mode) => println!("Mode changed to {}", mode.as_str()),
                RuntimeEvent::Disconnected(reason) => {
                    println!("Disconnected: {}", reason);
                    break 'capture;
                }
                RuntimeEvent::Error(message) => println!("Error: {}", message),
                RuntimeEvent::Stopped => break 'capture,
                RuntimeEvent::Saved { .. } | RuntimeEvent::Loaded { .. } => {}
            }
        }
    }

    let _ = capture.send(Command::SetMode(ViewMode::Pause));
    let Some(engine) = capture.stop() else {
        return Err("capture thread panicked".into());
    };
    println!("\nCaptured {} transitions", engine.store().count());

    if let Some(path) = args.output {
        let format = WaveformFormat::from_path(&path);
        let records = engine.save_file(&path, format, false)?;
        println!("Saved {} records to {} ({})", records, path.display(), format.as_str());
    }

    Ok(())
}
