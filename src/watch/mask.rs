// src/watch/mask.rs

//! Semantic filesystem event mask.
//!
//! The rest of the crate only ever sees [`EventMask`]; the translation to
//! and from inotify bits lives here so the observer stays source-agnostic.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

use nix::sys::inotify::AddWatchFlags;

/// Set of semantic change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    pub const EMPTY: EventMask = EventMask(0);
    pub const ACCESS: EventMask = EventMask(0x01);
    pub const ATTRIB: EventMask = EventMask(0x02);
    pub const CREATE: EventMask = EventMask(0x04);
    pub const DELETE: EventMask = EventMask(0x08);
    pub const MODIFY: EventMask = EventMask(0x10);
    pub const RENAME_TO: EventMask = EventMask(0x20);
    pub const RENAME_FROM: EventMask = EventMask(0x40);
    pub const OPEN: EventMask = EventMask(0x80);
    pub const CLOSE: EventMask = EventMask(0x100);
    pub const ALL: EventMask = EventMask(0x1FF);

    const NAMED: [(EventMask, &'static str); 9] = [
        (Self::ACCESS, "ACCESS"),
        (Self::ATTRIB, "ATTRIB"),
        (Self::CREATE, "CREATE"),
        (Self::DELETE, "DELETE"),
        (Self::MODIFY, "MODIFY"),
        (Self::RENAME_TO, "RENAME_TO"),
        (Self::RENAME_FROM, "RENAME_FROM"),
        (Self::OPEN, "OPEN"),
        (Self::CLOSE, "CLOSE"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Unknown bits are dropped.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        EventMask(bits & Self::ALL.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Translate into the inotify bits that produce these semantic events.
    pub fn to_inotify(self) -> AddWatchFlags {
        inotify_table()
            .into_iter()
            .filter(|(semantic, _)| self.intersects(*semantic))
            .fold(AddWatchFlags::empty(), |acc, (_, raw)| acc | raw)
    }

    /// Decode raw inotify bits. Bits with no semantic meaning (such as
    /// `IN_IGNORED`) decode to nothing.
    pub fn from_inotify(raw: AddWatchFlags) -> Self {
        inotify_table()
            .into_iter()
            .filter(|(_, bits)| raw.intersects(*bits))
            .fold(EventMask::EMPTY, |acc, (semantic, _)| acc | semantic)
    }
}

fn inotify_table() -> [(EventMask, AddWatchFlags); 9] {
    [
        (EventMask::ACCESS, AddWatchFlags::IN_ACCESS),
        (EventMask::ATTRIB, AddWatchFlags::IN_ATTRIB),
        (EventMask::CREATE, AddWatchFlags::IN_CREATE),
        (
            EventMask::DELETE,
            AddWatchFlags::IN_DELETE | AddWatchFlags::IN_DELETE_SELF,
        ),
        (EventMask::MODIFY, AddWatchFlags::IN_MODIFY),
        (
            EventMask::RENAME_FROM,
            AddWatchFlags::IN_MOVE_SELF | AddWatchFlags::IN_MOVED_FROM,
        ),
        (
            EventMask::RENAME_TO,
            AddWatchFlags::IN_MOVE_SELF | AddWatchFlags::IN_MOVED_TO,
        ),
        (EventMask::OPEN, AddWatchFlags::IN_OPEN),
        (
            EventMask::CLOSE,
            AddWatchFlags::IN_CLOSE_WRITE | AddWatchFlags::IN_CLOSE_NOWRITE,
        ),
    ]
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;

    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl FromStr for EventMask {
    type Err = String;

    /// Parse a single name (`"modify"`) or a `|`-separated list
    /// (`"attrib|modify"`), case-insensitively. `"all"` selects everything.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = EventMask::EMPTY;
        for part in s.split('|').map(str::trim).filter(|p| !p.is_empty()) {
            let upper = part.to_uppercase();
            if upper == "ALL" || upper == "ALL_EVENTS" {
                mask |= EventMask::ALL;
                continue;
            }
            match Self::NAMED.iter().find(|(_, name)| *name == upper) {
                Some((flag, _)) => mask |= *flag,
                None => return Err(format!("unknown filesystem event: {part}")),
            }
        }
        if mask.is_empty() {
            return Err(format!("empty filesystem event mask: {s:?}"));
        }
        Ok(mask)
    }
}
