//! Tabular view of stored transitions for analysis with polars.

use std::io::Write;

use polars::prelude::*;

use crate::sample_store::SampleStore;
use crate::tick_clock::Tick;
use crate::trigger_config::CHANNELS;

pub const TICK_COLUMN_NAME: &str = "tick";
pub const LEVEL_COLUMN_NAME: &str = "level";
pub const TIME_COLUMN_NAME: &str = "time";

/// One row per stored transition: `tick` (µs), `level` (channel bitmask)
/// and `time` in seconds since the tick origin.
pub fn to_dataframe(store: &SampleStore, selection: Option<(Tick, Tick)>) -> PolarsResult<DataFrame> {
    #[cfg(feature = "cpu-profiling")]
    let _zone = tracy_client::Client::running()
        .map(|c| c.span(tracy_client::span_location!("to_dataframe"), 0));

    let (ticks, levels): (Vec<i64>, Vec<u32>) = store
        .iter()
        .filter(|s| selection.map_or(true, |(from, to)| s.tick >= from && s.tick <= to))
        .map(|s| (s.tick, s.level))
        .unzip();

    let origin = store.tick_origin();

    DataFrame::new(vec![
        Series::new(TICK_COLUMN_NAME.into(), ticks).into(),
        Series::new(LEVEL_COLUMN_NAME.into(), levels).into(),
    ])?
    .lazy()
    .with_columns([((col(TICK_COLUMN_NAME) - lit(origin)).cast(DataType::Float64)
        / lit(1_000_000.0))
    .alias(TIME_COLUMN_NAME)])
    .select([col(TIME_COLUMN_NAME), col(TICK_COLUMN_NAME), col(LEVEL_COLUMN_NAME)])
    .collect()
}

/// Add a boolean `ch_<n>` column per requested channel, decoded from the
/// level mask.
pub fn extract_channels<'a>(
    df: &'a mut DataFrame,
    channels: &[usize],
) -> PolarsResult<&'a DataFrame> {
    let channels: Vec<usize> = channels.iter().copied().filter(|&ch| ch < CHANNELS).collect();

    let levels = df.column(LEVEL_COLUMN_NAME)?.u32()?;
    let mut channel_columns: Vec<Vec<bool>> = vec![Vec::with_capacity(levels.len()); channels.len()];

    for level in levels.into_iter() {
        let level = level.unwrap_or(0);
        for (column, &channel) in channel_columns.iter_mut().zip(channels.iter()) {
            column.push((level >> channel) & 1 == 1);
        }
    }

    for (channel, values) in channels.iter().zip(channel_columns) {
        let column: Column = Series::new(format!("ch_{}", channel).into(), values).into();
        df.with_column(column)?;
    }

    Ok(df)
}

/// Write the selected transitions as CSV, one boolean column per channel in
/// `channels`.
pub fn write_csv<W: Write>(
    out: W,
    store: &SampleStore,
    selection: Option<(Tick, Tick)>,
    channels: &[usize],
) -> PolarsResult<usize> {
    let mut df = to_dataframe(store, selection)?;
    extract_channels(&mut df, channels)?;
    let rows = df.height();
    CsvWriter::new(out).include_header(true).finish(&mut df)?;
    Ok(rows)
}
