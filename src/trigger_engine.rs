//! Evaluation of the four triggers against every stored transition.

use crate::trigger_config::{
    ChannelState, TriggerConfigError, TriggerSpec, TriggerWhen, CHANNELS, TRIGGERS,
    TRIGGER_SAMPLES,
};

/// Set of trigger indices, bit `i` standing for trigger `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Matched(u8);

impl Matched {
    pub const NONE: Self = Self(0);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & ((1 << TRIGGERS) - 1))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, index: usize) -> bool {
        index < TRIGGERS && self.0 & (1 << index) != 0
    }

    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..TRIGGERS).filter(move |&i| self.contains(i))
    }

    fn insert(&mut self, index: usize) {
        self.0 |= 1 << index;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerState {
    /// Lifetime match count.
    pub count: u64,
    /// Matched once during the current live capture.
    pub fired: bool,
}

/// Result of running one transition through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FireOutcome {
    pub matched: Matched,
    /// Largest post-trigger countdown among triggers that fired for the
    /// first time on this transition.
    pub countdown: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TriggerEngine {
    specs: [TriggerSpec; TRIGGERS],
    states: [TriggerState; TRIGGERS],
    samples_index: usize,
}

impl TriggerEngine {
    pub fn new() -> Self {
        Self {
            specs: Default::default(),
            states: [TriggerState::default(); TRIGGERS],
            samples_index: 0,
        }
    }

    fn check_index(index: usize) -> Result<(), TriggerConfigError> {
        if index < TRIGGERS {
            Ok(())
        } else {
            Err(TriggerConfigError::IndexOutOfRange(index))
        }
    }

    pub fn spec(&self, index: usize) -> Result<&TriggerSpec, TriggerConfigError> {
        Self::check_index(index)?;
        Ok(&self.specs[index])
    }

    pub fn specs(&self) -> &[TriggerSpec; TRIGGERS] {
        &self.specs
    }

    pub fn state(&self, index: usize) -> Result<TriggerState, TriggerConfigError> {
        Self::check_index(index)?;
        Ok(self.states[index])
    }

    /// Replace a whole trigger. The enabled flag of `spec` is honoured
    /// only if the trigger is legal.
    pub fn configure(&mut self, index: usize, spec: TriggerSpec) -> Result<(), TriggerConfigError> {
        Self::check_index(index)?;
        let enable = spec.enabled();
        self.specs[index] = spec;
        self.specs[index].set_enabled(enable);
        Ok(())
    }

    pub fn set_channel_types(
        &mut self,
        index: usize,
        channels: [ChannelState; CHANNELS],
    ) -> Result<(), TriggerConfigError> {
        Self::check_index(index)?;
        self.specs[index].set_channels(channels);
        Ok(())
    }

    pub fn set_when(&mut self, index: usize, when: TriggerWhen) -> Result<(), TriggerConfigError> {
        Self::check_index(index)?;
        self.specs[index].when = when;
        Ok(())
    }

    /// Returns whether the trigger ended up enabled.
    pub fn set_enabled(&mut self, index: usize, on: bool) -> Result<bool, TriggerConfigError> {
        Self::check_index(index)?;
        let enabled = self.specs[index].set_enabled(on);
        if on && !enabled {
            log::info!("Trigger {} has no channel condition, not enabling it", index + 1);
        }
        Ok(enabled)
    }

    pub fn trigger_samples(&self) -> u32 {
        TRIGGER_SAMPLES[self.samples_index]
    }

    pub fn trigger_samples_index(&self) -> usize {
        self.samples_index
    }

    pub fn set_trigger_samples_index(&mut self, index: usize) -> Result<(), TriggerConfigError> {
        if index >= TRIGGER_SAMPLES.len() {
            return Err(TriggerConfigError::UnknownSampleCount(index));
        }
        self.samples_index = index;
        Ok(())
    }

    /// Enabled triggers matching the transition `old_level -> new_level`.
    pub fn evaluate(&self, new_level: u32, old_level: u32) -> Matched {
        let mut matched = Matched::NONE;
        for (i, spec) in self.specs.iter().enumerate() {
            if spec.enabled() && spec.masks().matches(new_level, old_level) {
                matched.insert(i);
            }
        }
        matched
    }

    /// Legal triggers matching the transition, whether enabled or not.
    /// Counters and fire state are left alone.
    pub fn matches_configured(&self, new_level: u32, old_level: u32) -> Matched {
        let mut matched = Matched::NONE;
        for (i, spec) in self.specs.iter().enumerate() {
            let masks = spec.masks();
            if masks.is_legal() && masks.matches(new_level, old_level) {
                matched.insert(i);
            }
        }
        matched
    }

    /// Evaluate a stored transition, count the matches and, in live
    /// capture, arm the post-trigger countdown for triggers that have not
    /// fired yet.
    pub fn fire(&mut self, new_level: u32, old_level: u32, live: bool) -> FireOutcome {
        let matched = self.evaluate(new_level, old_level);
        let mut countdown: Option<i64> = None;

        for i in matched.iter() {
            self.states[i].count += 1;

            if !live || self.states[i].fired {
                continue;
            }

            let samples = match self.specs[i].when {
                TriggerWhen::Count => continue,
                TriggerWhen::SampleFrom => i64::from(self.trigger_samples()),
                TriggerWhen::SampleAround => i64::from(self.trigger_samples() / 2),
                TriggerWhen::SampleTo => 0,
            };

            self.states[i].fired = true;
            log::debug!(
                "Trigger {} fired ({}), {} samples to go",
                i + 1,
                self.specs[i].when.as_str(),
                samples
            );
            countdown = Some(countdown.map_or(samples, |c| c.max(samples)));
        }

        FireOutcome { matched, countdown }
    }

    /// Clear fire flags and lifetime counters.
    pub fn reset(&mut self) {
        self.states = [TriggerState::default(); TRIGGERS];
    }

    pub fn clear_counts(&mut self) {
        for state in &mut self.states {
            state.count = 0;
        }
    }

    /// `1#12  2>0  3 0  4<3`: action symbol when enabled, blank otherwise.
    pub fn counts_label(&self) -> String {
        self.specs
            .iter()
            .zip(self.states.iter())
            .enumerate()
            .map(|(i, (spec, state))| {
                let symbol = if spec.enabled() { spec.when.symbol() } else { ' ' };
                format!("{}{}{}", i + 1, symbol, state.count)
            })
            .collect::<Vec<_>>()
            .join("  ")
    }
}

impl Default for TriggerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(index: usize, spec: TriggerSpec) -> TriggerEngine {
        let mut engine = TriggerEngine::new();
        engine.configure(index, spec).unwrap();
        engine.set_enabled(index, true).unwrap();
        engine
    }

    #[test]
    fn test_rising_edge_on_channel_zero() {
        let engine = engine_with(0, TriggerSpec::when_channels().rising(0).count());
        assert_eq!(engine.evaluate(0x1, 0x0), Matched::from_bits(0b1));
        assert!(engine.evaluate(0x0, 0x1).is_empty());
    }

    #[test]
    fn test_disabled_trigger_does_not_match() {
        let mut engine = engine_with(1, TriggerSpec::when_channels().high(3).count());
        engine.set_enabled(1, false).unwrap();
        assert!(engine.evaluate(0x8, 0x0).is_empty());
        assert!(engine.matches_configured(0x8, 0x0).contains(1));
    }

    #[test]
    fn test_all_matches_reported_and_counted() {
        let mut engine = engine_with(0, TriggerSpec::when_channels().edge(2).count());
        engine.configure(3, TriggerSpec::when_channels().high(2).count()).unwrap();
        engine.set_enabled(3, true).unwrap();

        let outcome = engine.fire(0x4, 0x0, false);
        assert_eq!(outcome.matched.iter().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(engine.state(0).unwrap().count, 1);
        assert_eq!(engine.state(3).unwrap().count, 1);
        assert_eq!(outcome.countdown, None);
    }

    #[test]
    fn test_fire_policy_countdowns() {
        let mut engine = engine_with(0, TriggerSpec::when_channels().rising(0).sample_from());
        engine.configure(1, TriggerSpec::when_channels().rising(0).sample_around()).unwrap();
        engine.set_enabled(1, true).unwrap();
        engine.set_trigger_samples_index(3).unwrap();

        let outcome = engine.fire(0x1, 0x0, true);
        assert_eq!(outcome.countdown, Some(1000));
        assert!(engine.state(0).unwrap().fired);
        assert!(engine.state(1).unwrap().fired);

        let again = engine.fire(0x1, 0x0, true);
        assert_eq!(again.countdown, None);
        assert_eq!(engine.state(0).unwrap().count, 2);
    }

    #[test]
    fn test_sample_to_publishes_zero() {
        let mut engine = engine_with(2, TriggerSpec::when_channels().falling(5).sample_to());
        let outcome = engine.fire(0x0, 0x20, true);
        assert_eq!(outcome.countdown, Some(0));
    }

    #[test]
    fn test_count_action_never_arms() {
        let mut engine = engine_with(0, TriggerSpec::when_channels().edge(1).count());
        let outcome = engine.fire(0x2, 0x0, true);
        assert_eq!(outcome.countdown, None);
        assert!(!engine.state(0).unwrap().fired);
    }

    #[test]
    fn test_paused_capture_counts_without_arming() {
        let mut engine = engine_with(0, TriggerSpec::when_channels().rising(0).sample_from());
        let outcome = engine.fire(0x1, 0x0, false);
        assert_eq!(outcome.countdown, None);
        assert_eq!(engine.state(0).unwrap().count, 1);
        assert!(!engine.state(0).unwrap().fired);
    }

    #[test]
    fn test_reset_clears_fired_and_counts() {
        let mut engine = engine_with(0, TriggerSpec::when_channels().rising(0).sample_to());
        engine.fire(0x1, 0x0, true);
        engine.reset();
        assert_eq!(engine.state(0).unwrap(), TriggerState::default());
    }

    #[test]
    fn test_counts_label() {
        let mut engine = engine_with(0, TriggerSpec::when_channels().rising(0).count());
        engine.configure(3, TriggerSpec::when_channels().low(1).sample_to()).unwrap();
        engine.set_enabled(3, true).unwrap();
        engine.fire(0x1, 0x0, false);
        assert_eq!(engine.counts_label(), "1#1  2 0  3 0  4<1");
    }

    #[test]
    fn test_index_out_of_range() {
        let mut engine = TriggerEngine::new();
        assert_eq!(
            engine.set_enabled(4, true),
            Err(TriggerConfigError::IndexOutOfRange(4))
        );
    }
}
