//! Timestamp arithmetic across time bases.
//!
//! All conversions go through libavutil's rational rescale with
//! round-to-nearest (halfway cases away from zero). The `NOPTS` and
//! `i64::MAX` sentinels pass through untouched, which is the same policy
//! `av_packet_rescale_ts` applies to packets.

use ffmpeg_next::{Rational, Rescale, Rounding};

/// ffmpeg's "no timestamp" marker.
pub const NOPTS: i64 = ffmpeg_next::ffi::AV_NOPTS_VALUE as i64;

/// Rescale `ts` from the `from` time base to the `to` time base.
pub fn rescale(ts: i64, from: Rational, to: Rational) -> i64 {
    if ts == NOPTS || ts == i64::MAX || from == to {
        return ts;
    }
    ts.rescale_with(from, to, Rounding::NearestInfinity)
}

/// Rescale an optional timestamp; `None` stays `None`.
pub fn rescale_opt(ts: Option<i64>, from: Rational, to: Rational) -> Option<i64> {
    ts.map(|ts| rescale(ts, from, to))
}

/// A usable time base has a positive numerator and denominator.
pub fn is_valid(time_base: Rational) -> bool {
    time_base.numerator() > 0 && time_base.denominator() > 0
}
