//! Which channels exist on a given board revision, what they are called,
//! and which of them a capture subscribes to.

use crate::trigger_config::CHANNELS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardRevision {
    /// Hardware version not known; every channel is offered, unnamed.
    Unknown,
    Rev1,
    Rev2,
    Rev3,
}

impl BoardRevision {
    pub fn from_hardware_version(hwver: i32) -> Self {
        match hwver {
            v if v < 0 => BoardRevision::Unknown,
            v if v < 4 => BoardRevision::Rev1,
            v if v < 16 => BoardRevision::Rev2,
            _ => BoardRevision::Rev3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BoardRevision::Unknown => "unknown",
            BoardRevision::Rev1 => "rev 1",
            BoardRevision::Rev2 => "rev 2",
            BoardRevision::Rev3 => "rev 3",
        }
    }

    fn table(self) -> Option<&'static [(bool, &'static str); CHANNELS]> {
        match self {
            BoardRevision::Unknown => None,
            BoardRevision::Rev1 => Some(&REV1),
            BoardRevision::Rev2 => Some(&REV2),
            BoardRevision::Rev3 => Some(&REV3),
        }
    }
}

const N: (bool, &str) = (false, "");
const U: (bool, &str) = (true, "");

#[rustfmt::skip]
const REV1: [(bool, &str); CHANNELS] = [
    (true, "SDA"), (true, "SCL"), N, N, U, N, N, (true, "CE1"),
    (true, "CE0"), (true, "MISO"), (true, "MOSI"), (true, "SCLK"), N, N, (true, "TXD"), (true, "RXD"),
    N, U, U, N, N, U, U, U,
    U, U, N, N, N, N, N, N,
];

#[rustfmt::skip]
const REV2: [(bool, &str); CHANNELS] = [
    N, N, (true, "SDA"), (true, "SCL"), U, N, N, (true, "CE1"),
    (true, "CE0"), (true, "MISO"), (true, "MOSI"), (true, "SCLK"), N, N, (true, "TXD"), (true, "RXD"),
    N, U, U, N, N, N, U, U,
    U, U, N, U, U, U, U, U,
];

#[rustfmt::skip]
const REV3: [(bool, &str); CHANNELS] = [
    (false, "ID_SD"), (false, "ID_SC"), (true, "SDA"), (true, "SCL"), U, U, U, (true, "CE1"),
    (true, "CE0"), (true, "MISO"), (true, "MOSI"), (true, "SCLK"), U, U, (true, "TXD"), (true, "RXD"),
    (true, "ce2"), (true, "ce1"), (true, "ce0"), (true, "miso"), (true, "mosi"), (true, "sclk"), U, U,
    U, U, U, U, N, N, N, N,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelUsage {
    pub usable: bool,
    pub name: Option<&'static str>,
}

pub fn usage(revision: BoardRevision, channel: usize) -> ChannelUsage {
    if channel >= CHANNELS {
        return ChannelUsage { usable: false, name: None };
    }
    match revision.table() {
        None => ChannelUsage { usable: true, name: None },
        Some(table) => {
            let (usable, name) = table[channel];
            ChannelUsage {
                usable,
                name: (!name.is_empty()).then_some(name),
            }
        }
    }
}

/// Display label for a channel, e.g. `14 TXD` or `5`.
pub fn label(revision: BoardRevision, channel: usize) -> String {
    match usage(revision, channel).name {
        Some(name) => format!("{} {}", channel, name),
        None => channel.to_string(),
    }
}

/// Bitmask of usable channels on `revision`.
pub fn usable_mask(revision: BoardRevision) -> u32 {
    (0..CHANNELS)
        .filter(|&ch| usage(revision, ch).usable)
        .fold(0, |mask, ch| mask | (1 << ch))
}

/// Channels to subscribe to: the usable channels, narrowed to `active`
/// when given. An empty result falls back to channel 0 so the daemon still
/// sends reports.
pub fn notify_mask(revision: BoardRevision, active: Option<&[u8]>) -> u32 {
    let mut mask = usable_mask(revision);

    if let Some(active) = active {
        let selected = active
            .iter()
            .filter(|&&ch| usize::from(ch) < CHANNELS)
            .fold(0u32, |m, &ch| m | (1 << ch));
        mask &= selected;
    }

    if mask == 0 {
        log::debug!("No channels selected, falling back to channel 0");
        mask = 1;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_from_hardware_version() {
        assert_eq!(BoardRevision::from_hardware_version(-1), BoardRevision::Unknown);
        assert_eq!(BoardRevision::from_hardware_version(3), BoardRevision::Rev1);
        assert_eq!(BoardRevision::from_hardware_version(15), BoardRevision::Rev2);
        assert_eq!(BoardRevision::from_hardware_version(0xa02082), BoardRevision::Rev3);
    }

    #[test]
    fn test_unknown_revision_shows_everything() {
        assert_eq!(usable_mask(BoardRevision::Unknown), u32::MAX);
        assert_eq!(usage(BoardRevision::Unknown, 7).name, None);
    }

    #[test]
    fn test_names_and_usability() {
        assert_eq!(
            usage(BoardRevision::Rev1, 0),
            ChannelUsage { usable: true, name: Some("SDA") }
        );
        assert!(!usage(BoardRevision::Rev2, 0).usable);
        assert!(!usage(BoardRevision::Rev3, 0).usable);
        assert_eq!(label(BoardRevision::Rev3, 14), "14 TXD");
        assert_eq!(label(BoardRevision::Rev3, 5), "5");
        assert!(!usage(BoardRevision::Rev3, 32).usable);
    }

    #[test]
    fn test_rev3_usable_mask() {
        assert_eq!(usable_mask(BoardRevision::Rev3), 0x0FFF_FFFC);
    }

    #[test]
    fn test_notify_mask_selection() {
        assert_eq!(notify_mask(BoardRevision::Rev3, Some(&[2, 3, 40])), 0b1100);
        assert_eq!(notify_mask(BoardRevision::Rev3, Some(&[0, 1])), 1);
        assert_eq!(notify_mask(BoardRevision::Rev3, Some(&[])), 1);
        assert_eq!(notify_mask(BoardRevision::Rev3, None), 0x0FFF_FFFC);
    }
}
