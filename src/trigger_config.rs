//! Trigger specifications: per-channel conditions and the capture action
//! taken when they match.

/// Number of independently configurable triggers.
pub const TRIGGERS: usize = 4;

/// Number of channels a level mask covers.
pub const CHANNELS: usize = 32;

/// Post-trigger sample counts selectable for `SampleFrom`/`SampleAround`.
pub const TRIGGER_SAMPLES: [u32; 9] = [100, 200, 500, 1000, 2000, 5000, 10000, 20000, 50000];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TriggerConfigError {
    #[error("Trigger index {0} out of range, must be below {TRIGGERS}")]
    IndexOutOfRange(usize),

    #[error("Unknown channel trigger type {0}")]
    UnknownChannelState(i32),

    #[error("Unknown trigger action {0}")]
    UnknownWhen(i32),

    #[error("Unknown trigger sample count index {0}")]
    UnknownSampleCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    DontCare,
    Low,
    High,
    Edge,
    Falling,
    Rising,
}

impl ChannelState {
    pub fn as_char(&self) -> char {
        match self {
            ChannelState::DontCare => '-',
            ChannelState::Low => '0',
            ChannelState::High => '1',
            ChannelState::Edge => 'E',
            ChannelState::Falling => 'F',
            ChannelState::Rising => 'R',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::DontCare => "-",
            ChannelState::Low => "Low",
            ChannelState::High => "High",
            ChannelState::Edge => "Edge",
            ChannelState::Falling => "Falling",
            ChannelState::Rising => "Rising",
        }
    }

    pub fn index(&self) -> i32 {
        *self as i32
    }
}

impl TryFrom<i32> for ChannelState {
    type Error = TriggerConfigError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::DontCare),
            1 => Ok(Self::Low),
            2 => Ok(Self::High),
            3 => Ok(Self::Edge),
            4 => Ok(Self::Falling),
            5 => Ok(Self::Rising),
            other => Err(TriggerConfigError::UnknownChannelState(other)),
        }
    }
}

/// What a matching trigger does to a live capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerWhen {
    /// Only count matches.
    #[default]
    Count,
    /// Keep capturing the configured number of samples after the match.
    SampleFrom,
    /// Keep capturing half the configured number of samples.
    SampleAround,
    /// Stop capturing at the match.
    SampleTo,
}

impl TriggerWhen {
    pub fn symbol(&self) -> char {
        match self {
            TriggerWhen::Count => '#',
            TriggerWhen::SampleFrom => '>',
            TriggerWhen::SampleAround => '~',
            TriggerWhen::SampleTo => '<',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerWhen::Count => "count",
            TriggerWhen::SampleFrom => "sample from",
            TriggerWhen::SampleAround => "sample around",
            TriggerWhen::SampleTo => "sample to",
        }
    }

    pub fn index(&self) -> i32 {
        *self as i32
    }
}

impl TryFrom<i32> for TriggerWhen {
    type Error = TriggerConfigError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Count),
            1 => Ok(Self::SampleFrom),
            2 => Ok(Self::SampleAround),
            3 => Ok(Self::SampleTo),
            other => Err(TriggerConfigError::UnknownWhen(other)),
        }
    }
}

/// Masks derived from a channel type vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerMasks {
    /// Channels whose level after the transition matters.
    pub level_mask: u32,
    /// Required levels under `level_mask`.
    pub level_value: u32,
    /// Channels that must have just changed.
    pub changed_mask: u32,
}

impl TriggerMasks {
    pub fn from_channels(channels: &[ChannelState; CHANNELS]) -> Self {
        let mut masks = Self::default();

        for (i, state) in channels.iter().enumerate() {
            let bit = 1u32 << i;
            match state {
                ChannelState::DontCare => {}
                ChannelState::Low => masks.level_mask |= bit,
                ChannelState::High => {
                    masks.level_mask |= bit;
                    masks.level_value |= bit;
                }
                ChannelState::Edge => masks.changed_mask |= bit,
                ChannelState::Falling => {
                    masks.level_mask |= bit;
                    masks.changed_mask |= bit;
                }
                ChannelState::Rising => {
                    masks.level_mask |= bit;
                    masks.level_value |= bit;
                    masks.changed_mask |= bit;
                }
            }
        }

        masks
    }

    /// A trigger with no condition at all would match everything.
    pub fn is_legal(&self) -> bool {
        self.level_mask | self.changed_mask != 0
    }

    pub fn matches(&self, new_level: u32, old_level: u32) -> bool {
        (new_level & self.level_mask) == self.level_value
            && (self.changed_mask & (new_level ^ old_level)) == self.changed_mask
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TriggerSpec {
    enabled: bool,
    pub when: TriggerWhen,
    channels: [ChannelState; CHANNELS],
    masks: TriggerMasks,
}

impl TriggerSpec {
    pub fn new(channels: [ChannelState; CHANNELS], when: TriggerWhen) -> Self {
        Self {
            enabled: false,
            when,
            channels,
            masks: TriggerMasks::from_channels(&channels),
        }
    }

    pub fn when_channels() -> TriggerBuilder {
        TriggerBuilder::new()
    }

    /// Replace the channel types and recompute the masks. A trigger that
    /// becomes illegal is switched off.
    pub fn set_channels(&mut self, channels: [ChannelState; CHANNELS]) {
        self.channels = channels;
        self.masks = TriggerMasks::from_channels(&channels);
        if !self.masks.is_legal() {
            self.enabled = false;
        }
    }

    /// Switch the trigger on or off. Enabling an illegal trigger is
    /// refused; the returned value is the resulting state.
    pub fn set_enabled(&mut self, on: bool) -> bool {
        if on && !self.masks.is_legal() {
            log::debug!("Refusing to enable trigger without any channel condition");
            return self.enabled;
        }
        self.enabled = on;
        self.enabled
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn channels(&self) -> &[ChannelState; CHANNELS] {
        &self.channels
    }

    pub fn masks(&self) -> TriggerMasks {
        self.masks
    }

    /// One character per channel, channel 0 first.
    pub fn channel_label(&self) -> String {
        self.channels.iter().map(ChannelState::as_char).collect()
    }
}

#[derive(Debug)]
pub struct TriggerBuilder {
    channels: [ChannelState; CHANNELS],
}

impl TriggerBuilder {
    pub fn new() -> Self {
        Self {
            channels: [ChannelState::DontCare; CHANNELS],
        }
    }

    pub fn set_channel(mut self, channel: usize, state: ChannelState) -> Self {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = state;
        } else {
            log::warn!(
                "Channel index {} out of range, must be between 0 and {}",
                channel,
                CHANNELS - 1
            );
        }
        self
    }

    pub fn low(self, channel: usize) -> Self {
        self.set_channel(channel, ChannelState::Low)
    }

    pub fn high(self, channel: usize) -> Self {
        self.set_channel(channel, ChannelState::High)
    }

    pub fn edge(self, channel: usize) -> Self {
        self.set_channel(channel, ChannelState::Edge)
    }

    pub fn falling(self, channel: usize) -> Self {
        self.set_channel(channel, ChannelState::Falling)
    }

    pub fn rising(self, channel: usize) -> Self {
        self.set_channel(channel, ChannelState::Rising)
    }

    pub fn count(self) -> TriggerSpec {
        TriggerSpec::new(self.channels, TriggerWhen::Count)
    }

    pub fn sample_from(self) -> TriggerSpec {
        TriggerSpec::new(self.channels, TriggerWhen::SampleFrom)
    }

    pub fn sample_around(self) -> TriggerSpec {
        TriggerSpec::new(self.channels, TriggerWhen::SampleAround)
    }

    pub fn sample_to(self) -> TriggerSpec {
        TriggerSpec::new(self.channels, TriggerWhen::SampleTo)
    }
}

impl Default for TriggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_mapping() {
        let spec = TriggerSpec::when_channels()
            .low(0)
            .high(1)
            .edge(2)
            .falling(3)
            .rising(4)
            .count();

        let masks = spec.masks();
        assert_eq!(masks.level_mask, 0b11011);
        assert_eq!(masks.level_value, 0b10010);
        assert_eq!(masks.changed_mask, 0b11100);
    }

    #[test]
    fn test_set_channels_is_idempotent() {
        let channels = *TriggerSpec::when_channels().rising(7).high(31).count().channels();
        let mut spec = TriggerSpec::default();

        spec.set_channels(channels);
        let first = spec.masks();
        spec.set_channels(channels);
        assert_eq!(spec.masks(), first);
    }

    #[test]
    fn test_illegal_trigger_cannot_be_enabled() {
        let mut spec = TriggerSpec::when_channels().count();
        assert!(!spec.set_enabled(true));
        assert!(!spec.enabled());
    }

    #[test]
    fn test_clearing_channels_disables_trigger() {
        let mut spec = TriggerSpec::when_channels().high(0).count();
        assert!(spec.set_enabled(true));

        spec.set_channels([ChannelState::DontCare; CHANNELS]);
        assert!(!spec.enabled());
    }

    #[test]
    fn test_rising_match() {
        let masks = TriggerSpec::when_channels().rising(0).count().masks();
        assert!(masks.matches(0x1, 0x0));
        assert!(!masks.matches(0x0, 0x1));
        assert!(!masks.matches(0x3, 0x1));
    }

    #[test]
    fn test_channel_label() {
        let spec = TriggerSpec::when_channels().rising(0).low(2).count();
        let label = spec.channel_label();
        assert_eq!(label.len(), CHANNELS);
        assert!(label.starts_with("R-0-"));
    }

    #[test]
    fn test_out_of_range_channel_is_ignored() {
        let spec = TriggerSpec::when_channels().high(40).count();
        assert!(!spec.masks().is_legal());
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(ChannelState::try_from(5), Ok(ChannelState::Rising));
        assert_eq!(ChannelState::Falling.index(), 4);
        assert_eq!(ChannelState::try_from(9), Err(TriggerConfigError::UnknownChannelState(9)));
        assert_eq!(TriggerWhen::try_from(2), Ok(TriggerWhen::SampleAround));
        assert_eq!(TriggerWhen::SampleTo.symbol(), '<');
    }
}
