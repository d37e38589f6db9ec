//! Mapping of MAGSAV protection words to Unix permission bits.
//!
//! The legacy system has owner and non-owner read/write/delete rights and no notion of groups or
//! execute permission.  Non-owner rights are granted to both group and other.

use std::fmt;

use rustix::fs::Mode;

/// Mode given to extracted files when protections aren't preserved.
pub const DEFAULT_MODE: u32 = 0o644;

const OWNER_DELETE: u16 = 0o2000;
const OWNER_WRITE: u16 = 0o1000;
const OWNER_READ: u16 = 0o0400;
const DELETE_PROTECT: u16 = 0o0200;
const NONOWNER_DELETE: u16 = 0o0004;
const NONOWNER_WRITE: u16 = 0o0002;
const NONOWNER_READ: u16 = 0o0001;

/// A protection word from a tree entry.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Protection(pub u16);

impl Protection {
    fn has(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    /// The Unix mode for a file with this protection.
    ///
    /// With `preserve` unset, every file gets [`DEFAULT_MODE`].
    pub fn to_mode(self, preserve: bool) -> Mode {
        if !preserve {
            return Mode::from_raw_mode(DEFAULT_MODE);
        }

        let mut mode = Mode::empty();
        if self.has(OWNER_READ) {
            mode |= Mode::RUSR;
        }
        if self.has(OWNER_WRITE) {
            mode |= Mode::WUSR;
        }
        if self.has(NONOWNER_READ) {
            mode |= Mode::RGRP | Mode::ROTH;
        }
        if self.has(NONOWNER_WRITE) {
            mode |= Mode::WGRP | Mode::WOTH;
        }
        mode
    }
}

impl fmt::Display for Protection {
    /// Owner and non-owner rights as `rwd`, with a trailing `P` for delete protection.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let flag = |bit, c| if self.has(bit) { c } else { '-' };
        write!(
            f,
            "{}{}{}/{}{}{}{}",
            flag(OWNER_READ, 'r'),
            flag(OWNER_WRITE, 'w'),
            flag(OWNER_DELETE, 'd'),
            flag(NONOWNER_READ, 'r'),
            flag(NONOWNER_WRITE, 'w'),
            flag(NONOWNER_DELETE, 'd'),
            flag(DELETE_PROTECT, 'P'),
        )
    }
}

impl fmt::Debug for Protection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#o} ({self})", self.0)
    }
}
