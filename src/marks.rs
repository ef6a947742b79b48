//! Cursor marks: the gold reference, the blue scrub cursor and the two
//! selection bounds used when saving part of a capture.

use crate::tick_clock::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Marks {
    /// Reference point for relative time readouts.
    pub gold: Tick,
    /// Scrub cursor, follows the pointer while paused.
    pub blue: Option<Tick>,
    pub mark1: Option<Tick>,
    pub mark2: Option<Tick>,
}

impl Marks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Copy the blue cursor into the gold mark.
    pub fn gold_from_blue(&mut self) {
        if let Some(blue) = self.blue {
            self.gold = blue;
        }
    }

    /// Set the lower selection bound at the blue cursor. A cursor past
    /// `mark2` moves `mark2` down to become the lower bound instead.
    pub fn set_mark1(&mut self) {
        let Some(blue) = self.blue else {
            return;
        };

        if self.mark1.is_none() {
            self.mark1 = Some(blue);
        }

        match self.mark2 {
            None => self.mark2 = Some(blue),
            Some(mark2) if blue <= mark2 => self.mark1 = Some(blue),
            Some(mark2) => {
                self.mark1 = Some(mark2);
                self.mark2 = Some(blue);
            }
        }
    }

    /// Set the upper selection bound at the blue cursor. A cursor before
    /// `mark1` moves `mark1` up to become the upper bound instead.
    pub fn set_mark2(&mut self) {
        let Some(blue) = self.blue else {
            return;
        };

        if self.mark2.is_none() {
            self.mark2 = Some(blue);
        }

        match self.mark1 {
            None => self.mark1 = Some(blue),
            Some(mark1) if blue >= mark1 => self.mark2 = Some(blue),
            Some(mark1) => {
                self.mark2 = Some(mark1);
                self.mark1 = Some(blue);
            }
        }
    }

    /// Inclusive `[mark1, mark2]` range, once both bounds are set.
    pub fn selection(&self) -> Option<(Tick, Tick)> {
        match (self.mark1, self.mark2) {
            (Some(from), Some(to)) => Some((from.min(to), from.max(to))),
            _ => None,
        }
    }

    /// Blue cursor relative to gold, e.g. `+0.001250`.
    pub fn delta_label(&self) -> Option<String> {
        self.blue.map(|blue| signed_seconds(blue - self.gold))
    }
}

/// `s.uuuuuu` seconds of `tick` past `origin`.
pub fn seconds_label(tick: Tick, origin: Tick) -> String {
    let relative = tick - origin;
    let sign = if relative < 0 { "-" } else { "" };
    let abs = relative.unsigned_abs();
    format!("{}{}.{:06}", sign, abs / 1_000_000, abs % 1_000_000)
}

fn signed_seconds(delta: Tick) -> String {
    let label = seconds_label(delta, 0);
    if delta < 0 {
        label
    } else {
        format!("+{}", label)
    }
}
