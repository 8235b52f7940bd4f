//! Filesystem time source.
//!
//! Cached mtimes are compared against the time as the filesystem sees it,
//! which can differ from the system clock (network mounts, coarse
//! timestamps), so "now" is read back from a freshly created file.

use std::cell::Cell;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::error::StateResult;

/// Timestamps are stored in 31 bits.
const RANGE_MASK: i64 = 0x7fff_ffff;

/// Source of the current filesystem time, in seconds.
pub trait FsClock {
    fn now(&self, location: &Path) -> StateResult<i32>;
}

/// Creates a temporary file in the location and reads its mtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TempFileClock;

impl FsClock for TempFileClock {
    fn now(&self, location: &Path) -> StateResult<i32> {
        let probe = tempfile::NamedTempFile::new_in(location)?;
        let modified = probe.as_file().metadata()?.modified()?;
        let secs = match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        };
        Ok((secs & RANGE_MASK) as i32)
    }
}

/// A clock the caller controls.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: Cell<i32>,
}

impl FixedClock {
    pub fn new(now: i32) -> Self {
        Self { now: Cell::new(now) }
    }

    pub fn set(&self, now: i32) {
        self.now.set(now);
    }
}

impl FsClock for FixedClock {
    fn now(&self, _location: &Path) -> StateResult<i32> {
        Ok(self.now.get())
    }
}

impl<C: FsClock + ?Sized> FsClock for std::rc::Rc<C> {
    fn now(&self, location: &Path) -> StateResult<i32> {
        (**self).now(location)
    }
}
