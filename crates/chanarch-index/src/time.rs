//! Archive time encoding
//!
//! Archive timestamps are two `u32` words: whole seconds since an
//! archive-defined epoch and a sub-second fraction counted in archive-defined
//! ticks. Both the epoch and the tick rate come from the index header, so a
//! [`TimeCodec`] is built per archive. In memory every timestamp becomes an
//! [`Instant`] anchored at the Unix epoch, which makes instants from
//! different archives directly comparable.

use crate::cursor::RawTimestamp;
use crate::error::{IndexError, Result};
use chrono::{DateTime, Utc};
use std::fmt;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Point in time with nanosecond resolution, relative to the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    secs: i64,
    nanos: u32,
}

impl Instant {
    /// The Unix epoch
    pub const UNIX_EPOCH: Self = Self { secs: 0, nanos: 0 };

    /// Build an instant from Unix seconds and nanoseconds
    pub fn new(secs: i64, nanos: u32) -> Result<Self> {
        if nanos >= NANOS_PER_SEC {
            return Err(IndexError::TimeOutOfRange(format!(
                "nanoseconds {nanos} not below one second"
            )));
        }
        Ok(Self { secs, nanos })
    }

    /// Instant at a whole number of Unix seconds
    pub const fn from_unix_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// Seconds since the Unix epoch
    pub const fn secs(self) -> i64 {
        self.secs
    }

    /// Sub-second part in nanoseconds
    pub const fn nanos(self) -> u32 {
        self.nanos
    }

    /// Convert from a chrono UTC timestamp
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            secs: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos().min(NANOS_PER_SEC - 1),
        }
    }

    /// Convert to a chrono UTC timestamp, `None` outside chrono's range
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.secs, self.nanos)
    }

    /// `YYYY-MM-DD HH:MM:SS.nnnnnnnnn` in UTC
    pub fn format(self) -> String {
        match self.to_datetime() {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string(),
            None => format!("{}.{:09}s", self.secs, self.nanos),
        }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl From<DateTime<Utc>> for Instant {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

/// Closed time interval `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    /// First instant covered
    pub start: Instant,
    /// Last instant covered
    pub end: Instant,
}

impl Interval {
    /// Build an interval, rejecting `start > end`
    pub fn new(start: Instant, end: Instant) -> Result<Self> {
        if start > end {
            return Err(IndexError::InvalidQuery {
                start: start.format(),
                end: end.format(),
            });
        }
        Ok(Self { start, end })
    }

    /// Interval covering every instant
    pub const fn unbounded() -> Self {
        Self {
            start: Instant {
                secs: i64::MIN,
                nanos: 0,
            },
            end: Instant {
                secs: i64::MAX,
                nanos: NANOS_PER_SEC - 1,
            },
        }
    }

    /// Closed-interval intersection test; touching edges overlap
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Whether `t` lies inside the interval, edges included
    pub fn contains(&self, t: Instant) -> bool {
        self.start <= t && t <= self.end
    }

    /// Whether `other` lies entirely inside this interval
    pub fn encloses(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// Converts between on-disk timestamps and [`Instant`]s for one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeCodec {
    epoch_unix_secs: i64,
    ticks_per_second: u32,
    nanos_per_tick: u32,
}

impl TimeCodec {
    /// EPICS time: seconds since 1990-01-01T00:00:00Z, nanosecond fraction
    pub const EPICS: Self = Self {
        epoch_unix_secs: 631_152_000,
        ticks_per_second: NANOS_PER_SEC,
        nanos_per_tick: 1,
    };

    /// Codec for an archive epoch (in Unix seconds) and fraction resolution
    ///
    /// The tick rate must divide one second evenly into whole nanoseconds,
    /// otherwise encode/decode could not round-trip exactly.
    pub fn new(epoch_unix_secs: i64, ticks_per_second: u32) -> Result<Self> {
        if ticks_per_second == 0 || NANOS_PER_SEC % ticks_per_second != 0 {
            return Err(IndexError::InvalidTimeResolution(ticks_per_second));
        }
        Ok(Self {
            epoch_unix_secs,
            ticks_per_second,
            nanos_per_tick: NANOS_PER_SEC / ticks_per_second,
        })
    }

    /// Archive epoch in Unix seconds
    pub const fn epoch_unix_secs(&self) -> i64 {
        self.epoch_unix_secs
    }

    /// Fraction ticks per second
    pub const fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    /// The archive epoch as an instant
    pub const fn epoch(&self) -> Instant {
        Instant::from_unix_secs(self.epoch_unix_secs)
    }

    /// Decode a seconds word and a fraction word
    pub fn decode(&self, secs: u32, frac: u32) -> Result<Instant> {
        if frac >= self.ticks_per_second {
            return Err(IndexError::TimeOutOfRange(format!(
                "fraction {frac} not below {} ticks per second",
                self.ticks_per_second
            )));
        }
        let unix = self
            .epoch_unix_secs
            .checked_add(i64::from(secs))
            .ok_or_else(|| {
                IndexError::TimeOutOfRange(format!("{secs} seconds after epoch overflows"))
            })?;
        Ok(Instant {
            secs: unix,
            nanos: frac * self.nanos_per_tick,
        })
    }

    /// Decode an on-disk timestamp
    pub fn decode_raw(&self, raw: RawTimestamp) -> Result<Instant> {
        self.decode(raw.secs, raw.frac)
    }

    /// Encode an instant into its on-disk words
    ///
    /// Fails for instants before the epoch, more than `u32::MAX` seconds
    /// after it, or with a sub-second part finer than one tick.
    pub fn encode(&self, t: Instant) -> Result<RawTimestamp> {
        let rel = t
            .secs
            .checked_sub(self.epoch_unix_secs)
            .and_then(|rel| u32::try_from(rel).ok())
            .ok_or_else(|| {
                IndexError::TimeOutOfRange(format!(
                    "{t} is outside the archive range starting {}",
                    self.epoch()
                ))
            })?;
        if t.nanos % self.nanos_per_tick != 0 {
            return Err(IndexError::TimeOutOfRange(format!(
                "{t} is finer than the archive resolution of {} ticks per second",
                self.ticks_per_second
            )));
        }
        Ok(RawTimestamp {
            secs: rel,
            frac: t.nanos / self.nanos_per_tick,
        })
    }

    /// Diagnostic text for an instant
    pub fn format(&self, t: Instant) -> String {
        t.format()
    }
}

impl Default for TimeCodec {
    fn default() -> Self {
        Self::EPICS
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn test_epics_epoch() {
        let codec = TimeCodec::EPICS;
        let t = codec.decode(0, 0).unwrap();
        assert_eq!(t.format(), "1990-01-01 00:00:00.000000000");

        let t = codec.decode(86_400, 500_000_000).unwrap();
        assert_eq!(t.format(), "1990-01-02 00:00:00.500000000");
    }

    #[test]
    fn test_custom_resolution() {
        // Unix epoch, microsecond ticks
        let codec = TimeCodec::new(0, 1_000_000).unwrap();
        let t = codec.decode(1, 250_000).unwrap();
        assert_eq!(t.secs(), 1);
        assert_eq!(t.nanos(), 250_000_000);
        assert_eq!(codec.encode(t).unwrap(), RawTimestamp { secs: 1, frac: 250_000 });
    }

    #[test]
    fn test_invalid_resolution() {
        assert!(TimeCodec::new(0, 0).is_err());
        assert!(TimeCodec::new(0, 7).is_err());
        assert!(TimeCodec::new(0, 1).is_ok());
    }

    #[test]
    fn test_fraction_out_of_range() {
        let err = TimeCodec::EPICS.decode(1, 1_000_000_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_encode_out_of_range() {
        let codec = TimeCodec::EPICS;
        let before_epoch = Instant::from_unix_secs(0);
        assert_eq!(codec.encode(before_epoch).unwrap_err().kind(), ErrorKind::OutOfRange);

        let too_late = Instant::from_unix_secs(631_152_000 + i64::from(u32::MAX) + 1);
        assert_eq!(codec.encode(too_late).unwrap_err().kind(), ErrorKind::OutOfRange);

        let coarse = TimeCodec::new(0, 1000).unwrap();
        let fine = Instant::new(5, 1).unwrap();
        assert_eq!(coarse.encode(fine).unwrap_err().kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_interval_overlap_is_closed() {
        let i = |a, b| Interval::new(Instant::from_unix_secs(a), Instant::from_unix_secs(b)).unwrap();

        assert!(i(0, 50).overlaps(&i(50, 100)));
        assert!(i(40, 60).overlaps(&i(0, 50)));
        assert!(!i(0, 49).overlaps(&i(50, 100)));
        assert!(i(0, 100).encloses(&i(10, 20)));
        assert!(!i(10, 20).encloses(&i(0, 100)));
        assert!(Interval::unbounded().overlaps(&i(-5, -1)));
    }

    #[test]
    fn test_reversed_interval_rejected() {
        let err = Interval::new(Instant::from_unix_secs(2), Instant::from_unix_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn test_ordering_matches_format() {
        let codec = TimeCodec::EPICS;
        let a = codec.decode(10, 999_999_999).unwrap();
        let b = codec.decode(11, 0).unwrap();
        assert!(a < b);
        assert!(a.format() < b.format());
    }

    fn codec_strategy() -> impl Strategy<Value = TimeCodec> {
        (
            -1_000_000_000i64..1_000_000_000i64,
            prop::sample::select(vec![1u32, 1_000, 1_000_000, 1_000_000_000]),
        )
            .prop_map(|(epoch, tps)| TimeCodec::new(epoch, tps).unwrap())
    }

    proptest! {
        /// decode(encode(t)) == t for every representable instant
        #[test]
        fn instant_round_trip(codec in codec_strategy(), secs in any::<u32>(), frac in any::<u32>()) {
            let frac = frac % codec.ticks_per_second();
            let t = codec.decode(secs, frac).unwrap();
            let raw = codec.encode(t).unwrap();
            prop_assert_eq!(raw, RawTimestamp { secs, frac });
            prop_assert_eq!(codec.decode_raw(raw).unwrap(), t);
        }

        /// Raw order and instant order agree
        #[test]
        fn decode_is_monotonic(a in any::<(u32, u32)>(), b in any::<(u32, u32)>()) {
            let codec = TimeCodec::EPICS;
            let (a, b) = ((a.0, a.1 % 1_000_000_000), (b.0, b.1 % 1_000_000_000));
            let ta = codec.decode(a.0, a.1).unwrap();
            let tb = codec.decode(b.0, b.1).unwrap();
            prop_assert_eq!(a.cmp(&b), ta.cmp(&tb));
        }
    }
}
