use std::io::Cursor;

use piscope_rs::navigation::bsearch;
use piscope_rs::{
    ChannelState, Engine, RuntimeConfig, Sample, SampleStore, TriggerEngine, TriggerSpec, ViewMode,
    WaveformFormat,
};

fn engine_with_capacity(capacity: usize) -> Engine {
    let mut engine = Engine::new(RuntimeConfig {
        capacity,
        ..RuntimeConfig::default()
    });
    engine.on_connected(-1);
    engine
}

fn stored(engine: &Engine) -> Vec<(i64, u32)> {
    engine.store().iter().map(|s| (s.tick, s.level)).collect()
}

#[test]
fn test_no_two_consecutive_records_share_a_level() {
    let mut engine = engine_with_capacity(1024);
    let mut seed: u32 = 0x1234_5678;
    for i in 0..2000u32 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        engine.on_report(i * 10, (seed >> 16) & 0x7);
    }

    let records = stored(&engine);
    assert!(!records.is_empty());
    for pair in records.windows(2) {
        assert_ne!(pair[0].1, pair[1].1);
    }
}

#[test]
fn test_ticks_keep_increasing_across_counter_wrap() {
    let mut engine = engine_with_capacity(64);
    let raw = [0xEFFF_FF00u32, 0xF800_0000, 0xFFFF_FFF0, 0x0000_0010, 0x0800_0000, 0x2000_0000];
    for (i, tick) in raw.into_iter().enumerate() {
        engine.on_report(tick, i as u32 % 2);
    }

    let ticks: Vec<i64> = stored(&engine).into_iter().map(|(t, _)| t).collect();
    assert_eq!(ticks.len(), raw.len());
    for pair in ticks.windows(2) {
        assert!(pair[1] > pair[0], "{:x} !> {:x}", pair[1], pair[0]);
    }
    assert_eq!(ticks[3], (1 << 32) | 0x10);
}

#[test]
fn test_text_round_trip_keeps_relative_ticks_and_levels() {
    let mut engine = engine_with_capacity(128);
    for i in 0..100u32 {
        engine.on_report(5_000 + i * 37, if i % 3 == 0 { 0xA5 } else { i });
    }
    let origin = engine.store().tick_origin();
    let expected: Vec<(i64, u32)> = stored(&engine)
        .into_iter()
        .map(|(t, l)| (t - origin, l))
        .collect();

    let mut out = Vec::new();
    engine.save_capture(&mut out, WaveformFormat::Text, false).unwrap();

    let mut other = engine_with_capacity(128);
    other.load_capture(Cursor::new(out)).unwrap();
    assert_eq!(stored(&other), expected);
}

#[test]
fn test_setting_channel_types_twice_gives_same_masks() {
    let mut triggers = TriggerEngine::new();
    let mut channels = [ChannelState::DontCare; 32];
    channels[0] = ChannelState::Rising;
    channels[9] = ChannelState::Low;
    channels[31] = ChannelState::Edge;

    triggers.set_channel_types(2, channels).unwrap();
    let first = triggers.spec(2).unwrap().masks();
    triggers.set_channel_types(2, channels).unwrap();
    assert_eq!(triggers.spec(2).unwrap().masks(), first);
}

#[test]
fn test_bsearch_bounds_over_the_store() {
    let mut store = SampleStore::new(8);
    for (i, tick) in [10, 20, 30, 40, 50].into_iter().enumerate() {
        store.append(tick, i as u32).unwrap();
    }
    let (lo, hi) = (store.read_pos(), store.write_pos());

    assert_eq!(bsearch(&store, lo, hi, 0), lo);
    assert_eq!(store.at(bsearch(&store, lo, hi, 35)).tick, 40);
    assert_eq!(bsearch(&store, lo, hi, 51), (hi + 1) % store.capacity());
}

#[test]
fn test_repeated_tick_with_level_change_is_kept() {
    let mut engine = engine_with_capacity(16);
    for (tick, level) in [(100, 0x1), (150, 0x1), (150, 0x3), (200, 0x3)] {
        engine.on_report(tick, level);
    }
    assert_eq!(stored(&engine), vec![(100, 0x1), (150, 0x3)]);
}

#[test]
fn test_rising_trigger_on_channel_zero() {
    let mut triggers = TriggerEngine::new();
    triggers
        .configure(0, TriggerSpec::when_channels().rising(0).count())
        .unwrap();
    triggers.set_enabled(0, true).unwrap();

    assert!(triggers.evaluate(0x1, 0x0).contains(0));
    assert!(triggers.evaluate(0x0, 0x1).is_empty());
}

#[test]
fn test_live_overflow_keeps_newest_records() {
    let mut engine = engine_with_capacity(4);
    assert_eq!(engine.mode(), ViewMode::Live);
    for (i, level) in [1u32, 2, 3, 4, 5].into_iter().enumerate() {
        engine.on_report(i as u32 * 10, level);
    }

    assert_eq!(engine.store().count(), 4);
    assert_eq!(engine.store().read_pos(), 1);
    assert_eq!(stored(&engine).first(), Some(&(10, 2)));
}

#[test]
fn test_overflow_while_paused_drops_new_samples() {
    let mut engine = engine_with_capacity(4);
    engine.set_mode(ViewMode::Pause).unwrap();
    for (i, level) in [1u32, 2, 3, 4, 5].into_iter().enumerate() {
        engine.on_report(i as u32 * 10, level);
    }

    assert_eq!(stored(&engine), vec![(0, 1), (10, 2), (20, 3), (30, 4)]);
}

#[test]
fn test_pause_before_first_sample_clamps_window() {
    let mut engine = engine_with_capacity(1024);
    for i in 1..=200u32 {
        engine.on_report(1_000_000 + i * 10_000, i % 2);
    }
    engine.set_mode(ViewMode::Pause).unwrap();
    engine.view_mut().set_center_tick(0);

    let frame = engine.refresh_view().unwrap();
    let first = engine.store().first().unwrap().tick;
    let width = engine.view().view_ticks();

    assert_eq!(frame.start_tick, first);
    assert_eq!(frame.end_tick, first + width);
    assert_eq!(frame.center_tick, first + width / 2);
    assert!(frame.end_tick > frame.start_tick);
    assert_eq!(frame.start_sample, engine.store().read_pos());
}

#[test]
fn test_overflow_while_playing_drops_new_samples() {
    let mut engine = engine_with_capacity(4);
    for (i, level) in [1u32, 2, 3, 4].into_iter().enumerate() {
        engine.on_report(i as u32 * 10, level);
    }
    assert!(engine.store().is_full());
    let before = stored(&engine);

    engine.set_mode(ViewMode::Play).unwrap();
    engine.on_report(40, 5);

    assert_eq!(engine.store().count(), 4);
    assert_eq!(engine.store().first(), Some(Sample::new(0, 1)));
    assert_eq!(engine.store().last(), Some(Sample::new(30, 4)));
    assert_eq!(stored(&engine), before);
}
