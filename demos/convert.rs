// Capture conversion example
//
// Loads a piscope text capture and writes it back out as VCD, CSV or text.

use clap::{Parser, ValueEnum};
use piscope_rs::{dataframe, waveform_file, SampleStore, WaveformFormat};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Target {
    Text,
    Vcd,
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "convert", about = "Convert a piscope capture to another format")]
struct Args {
    /// piscope text capture to read
    input: PathBuf,

    /// File to write
    output: PathBuf,

    /// Output format, guessed from the output extension when omitted
    #[arg(short, long, value_enum)]
    to: Option<Target>,

    /// Channels to include as columns in CSV output
    #[arg(short, long, value_delimiter = ',', default_value = "0,1,2,3,4,5,6,7")]
    channels: Vec<usize>,

    /// Store capacity in records
    #[arg(long, default_value_t = 1_000_000)]
    capacity: usize,

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

    let mut store = SampleStore::new(args.capacity);
    let loaded = waveform_file::load_from_path(&args.input, &mut store)?;
    println!(
        "Loaded {} records from {} (captured {})",
        loaded.records,
        args.input.display(),
        loaded.time_origin
    );
    if loaded.truncated > 0 {
        println!("Warning: {} records did not fit and were dropped", loaded.truncated);
    }

    let target = args.to.unwrap_or_else(|| {
        match args.output.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Target::Csv,
            _ => match WaveformFormat::from_path(&args.output) {
                WaveformFormat::Vcd => Target::Vcd,
                WaveformFormat::Text => Target::Text,
            },
        }
    });

    let written = match target {
        Target::Csv => {
            let out = BufWriter::new(File::create(&args.output)?);
            dataframe::write_csv(out, &store, None, &args.channels)?
        }
        Target::Vcd => waveform_file::save_to_path(
            &args.output,
            &store,
            WaveformFormat::Vcd,
            loaded.time_origin,
            None,
        )?,
        Target::Text => waveform_file::save_to_path(
            &args.output,
            &store,
            WaveformFormat::Text,
            loaded.time_origin,
            None,
        )?,
    };

    println!("Wrote {} records to {} ({:?})", written, args.output.display(), target);
    Ok(())
}
