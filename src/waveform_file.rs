//! Reading and writing captures: the line-based piscope text format, which
//! round-trips, and VCD export for other waveform viewers.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use chrono::NaiveDateTime;

use crate::sample_store::{Sample, SampleStore, StoreError};
use crate::tick_clock::Tick;
use crate::trigger_config::CHANNELS;

pub const TEXT_MAGIC: &str = "#piscope";
const DATE_PREFIX: &str = "#date ";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum WaveformFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a piscope file, unexpected header line {line}")]
    MalformedHeader { line: usize },

    #[error("Malformed date line: {0}")]
    MalformedDate(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveformFormat {
    #[default]
    Text,
    Vcd,
}

impl WaveformFormat {
    /// Pick the format from a file extension; anything but `.vcd` is text.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("vcd") => WaveformFormat::Vcd,
            _ => WaveformFormat::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WaveformFormat::Text => "piscope",
            WaveformFormat::Vcd => "vcd",
        }
    }
}

/// What a text load put into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loaded {
    pub time_origin: NaiveDateTime,
    pub records: usize,
    /// Records beyond the store capacity that were left out.
    pub truncated: usize,
}

/// VCD identifier for a channel: `A`..`Z` then `a`..`f`.
pub fn vcd_symbol(channel: usize) -> char {
    if channel < 26 {
        char::from(b'A' + channel as u8)
    } else {
        char::from(b'a' + (channel - 26) as u8)
    }
}

fn selected<'a>(
    store: &'a SampleStore,
    selection: Option<(Tick, Tick)>,
) -> impl Iterator<Item = Sample> + 'a {
    store
        .iter()
        .filter(move |s| selection.map_or(true, |(from, to)| s.tick >= from && s.tick <= to))
}

/// Write the stored records, or only those inside the inclusive
/// `selection`, with ticks relative to the store's tick origin. Returns the
/// number of records written.
pub fn save<W: Write>(
    out: &mut W,
    store: &SampleStore,
    format: WaveformFormat,
    time_origin: NaiveDateTime,
    selection: Option<(Tick, Tick)>,
) -> Result<usize, WaveformFileError> {
    let written = match format {
        WaveformFormat::Text => save_text(out, store, time_origin, selection)?,
        WaveformFormat::Vcd => save_vcd(out, store, time_origin, selection)?,
    };
    out.flush()?;
    log::debug!("Saved {} records as {}", written, format.as_str());
    Ok(written)
}

fn save_text<W: Write>(
    out: &mut W,
    store: &SampleStore,
    time_origin: NaiveDateTime,
    selection: Option<(Tick, Tick)>,
) -> Result<usize, WaveformFileError> {
    writeln!(out, "{}", TEXT_MAGIC)?;
    writeln!(out, "{}{}", DATE_PREFIX, time_origin.format(DATE_FORMAT))?;

    let origin = store.tick_origin();
    let mut written = 0;
    for sample in selected(store, selection) {
        writeln!(out, "{} {:08X}", sample.tick - origin, sample.level)?;
        written += 1;
    }
    Ok(written)
}

fn save_vcd<W: Write>(
    out: &mut W,
    store: &SampleStore,
    time_origin: NaiveDateTime,
    selection: Option<(Tick, Tick)>,
) -> Result<usize, WaveformFileError> {
    writeln!(out, "$date {} $end", time_origin.format(DATE_FORMAT))?;
    writeln!(out, "$version piscope V1 $end")?;
    writeln!(out, "$timescale 1 us $end")?;
    writeln!(out, "$scope module top $end")?;
    for channel in 0..CHANNELS {
        writeln!(out, "$var wire 1 {} {} $end", vcd_symbol(channel), channel)?;
    }
    writeln!(out, "$upscope $end")?;
    writeln!(out, "$enddefinitions $end")?;

    let origin = store.tick_origin();
    let mut last_level: Option<u32> = None;
    let mut written = 0;

    for sample in selected(store, selection) {
        writeln!(out, "#{}", sample.tick - origin)?;

        // First record dumps every channel.
        let changed = last_level.map_or(u32::MAX, |last| last ^ sample.level);
        for channel in (0..CHANNELS).filter(|&ch| changed & (1 << ch) != 0) {
            let value = (sample.level >> channel) & 1;
            writeln!(out, "{}{}", value, vcd_symbol(channel))?;
        }

        last_level = Some(sample.level);
        written += 1;
    }
    Ok(written)
}

fn parse_record(line: &str) -> Option<Sample> {
    let mut fields = line.split_whitespace();
    let tick = fields.next()?.parse::<Tick>().ok()?;
    let level = u32::from_str_radix(fields.next()?, 16).ok()?;
    Some(Sample::new(tick, level))
}

/// One line without its terminator, or `None` when it is not text.
fn decode_line(raw: &[u8]) -> Option<&str> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw).ok()
}

/// Parse a text capture into `store`.
///
/// Both header lines are checked before anything is touched; a bad header
/// leaves the store as it was. Records are then read until the first line
/// that does not parse. Records beyond the store capacity are counted in
/// `truncated` but never held in memory.
pub fn load<R: BufRead>(input: R, store: &mut SampleStore) -> Result<Loaded, WaveformFileError> {
    let mut lines = input.split(b'\n');

    let magic = lines.next().transpose()?;
    if magic.as_deref().and_then(decode_line).map(str::trim_end) != Some(TEXT_MAGIC) {
        return Err(WaveformFileError::MalformedHeader { line: 1 });
    }

    let date_line = lines
        .next()
        .transpose()?
        .ok_or(WaveformFileError::MalformedHeader { line: 2 })?;
    let date = decode_line(&date_line)
        .and_then(|line| line.trim_end().strip_prefix(DATE_PREFIX))
        .ok_or(WaveformFileError::MalformedHeader { line: 2 })?;
    let time_origin = NaiveDateTime::parse_from_str(date.trim(), DATE_FORMAT)
        .map_err(|e| WaveformFileError::MalformedDate(format!("{}: {}", date, e)))?;

    let capacity = store.capacity();
    let mut records = Vec::new();
    let mut truncated = 0usize;
    for raw in lines {
        let raw = raw?;
        let Some(line) = decode_line(&raw) else {
            log::debug!("Stopping at non-text record line ({} bytes)", raw.len());
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_record(line) {
            Some(_) if records.len() == capacity => truncated += 1,
            Some(sample) => records.push(sample),
            None => {
                log::debug!("Stopping at unparsable record '{}'", line);
                break;
            }
        }
    }

    if truncated > 0 {
        log::warn!(
            "Capture holds {} records, keeping the first {}",
            records.len() + truncated,
            capacity
        );
    }

    let count = store.bulk_load(&records)?;
    log::info!("Loaded {} records captured at {}", count, time_origin);

    Ok(Loaded {
        time_origin,
        records: count,
        truncated,
    })
}

pub fn save_to_path(
    path: &Path,
    store: &SampleStore,
    format: WaveformFormat,
    time_origin: NaiveDateTime,
    selection: Option<(Tick, Tick)>,
) -> Result<usize, WaveformFileError> {
    let mut out = BufWriter::new(File::create(path)?);
    save(&mut out, store, format, time_origin, selection)
}

pub fn load_from_path(path: &Path, store: &mut SampleStore) -> Result<Loaded, WaveformFileError> {
    load(BufReader::new(File::open(path)?), store)
}
