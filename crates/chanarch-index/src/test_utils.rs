//! Shared helpers for unit tests

#![allow(clippy::expect_used, clippy::unwrap_used)]

use crate::rtree::node::Record;
use crate::time::{Instant, Interval, TimeCodec};

/// `secs` seconds after the EPICS epoch
pub fn instant(secs: u32) -> Instant {
    TimeCodec::EPICS.decode(secs, 0).unwrap()
}

/// Interval from `a` to `b` seconds after the EPICS epoch
pub fn interval(a: u32, b: u32) -> Interval {
    Interval::new(instant(a), instant(b)).unwrap()
}

/// Used record over `a..=b` seconds pointing at `child`
pub fn record(a: u32, b: u32, child: u32) -> Record {
    Record::new(&TimeCodec::EPICS, interval(a, b), child).unwrap()
}
