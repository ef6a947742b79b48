//! Reconstruction of 64-bit ticks from the daemon's wrapping 32-bit
//! microsecond counter.

/// Reconstructed microsecond timestamp.
pub type Tick = i64;

const WRAP_FROM: u32 = 0xF000_0000;
const WRAP_TO: u32 = 0x1000_0000;

/// Combine a raw counter value with the wrap state seen so far.
///
/// A wrap is counted when the previous raw value was above `0xF0000000`
/// and the new one is below `0x10000000`. Returns the tick together with
/// the updated wrap count.
pub fn reconstruct(raw: u32, prior_raw: u32, wrap_count: u32) -> (Tick, u32) {
    let wraps = if prior_raw > WRAP_FROM && raw < WRAP_TO {
        wrap_count + 1
    } else {
        wrap_count
    };

    ((i64::from(wraps) << 32) | i64::from(raw), wraps)
}

/// Wrap-tracking state for one capture session.
#[derive(Debug, Clone, Default)]
pub struct TickClock {
    last_raw: Option<u32>,
    wrap_count: u32,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next raw counter value and get its reconstructed tick.
    pub fn advance(&mut self, raw: u32) -> Tick {
        let (tick, wraps) = match self.last_raw {
            Some(prior) => reconstruct(raw, prior, self.wrap_count),
            None => (i64::from(raw), 0),
        };
        self.last_raw = Some(raw);
        self.wrap_count = wraps;
        tick
    }

    /// Forget all wrap history; the next value starts a new epoch.
    pub fn reset(&mut self) {
        self.last_raw = None;
        self.wrap_count = 0;
    }

    pub fn wrap_count(&self) -> u32 {
        self.wrap_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruct_without_wrap() {
        assert_eq!(reconstruct(200, 100, 0), (200, 0));
        assert_eq!(reconstruct(0x2000_0000, 0xF800_0000, 3), ((3 << 32) | 0x2000_0000, 3));
    }

    #[test]
    fn test_reconstruct_detects_wrap() {
        let (tick, wraps) = reconstruct(0x10, 0xFFFF_FFF0, 0);
        assert_eq!(wraps, 1);
        assert_eq!(tick, (1 << 32) | 0x10);
    }

    #[test]
    fn test_clock_is_monotonic_across_wraps() {
        let mut clock = TickClock::new();
        let raws = [0xFFFF_0000, 0xFFFF_FFFF, 0x0000_0005, 0x0FFF_FFFF, 0xF000_0001, 0x0000_0001];
        let mut last = i64::MIN;
        for raw in raws {
            let tick = clock.advance(raw);
            assert!(tick > last, "tick {tick} not after {last}");
            last = tick;
        }
        assert_eq!(clock.wrap_count(), 2);
    }

    #[test]
    fn test_reset_clears_wrap_history() {
        let mut clock = TickClock::new();
        clock.advance(0xFFFF_FFF0);
        clock.advance(0x10);
        assert_eq!(clock.wrap_count(), 1);

        clock.reset();
        assert_eq!(clock.advance(0x10), 0x10);
        assert_eq!(clock.wrap_count(), 0);
    }
}
