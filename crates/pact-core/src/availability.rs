//! Daily active-hours windows and overlap math.
//!
//! A window is a half-open range of minutes since local midnight and may
//! wrap past midnight (start > end). A window with start == end is empty.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc};

pub const MINUTES_PER_DAY: u16 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBand {
    pub start: u16,
    pub end: u16,
}

impl TimeBand {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start: start % MINUTES_PER_DAY,
            end: end % MINUTES_PER_DAY,
        }
    }

    /// Whether the given minute-of-day falls inside the window.
    pub fn contains(&self, minute: u16) -> bool {
        let minute = minute % MINUTES_PER_DAY;
        if self.start <= self.end {
            minute >= self.start && minute < self.end
        } else {
            // Wraps past midnight: [start, 1440) ∪ [0, end)
            minute >= self.start || minute < self.end
        }
    }

    /// Non-wrapping half-open segments covering this window.
    fn segments(&self) -> Vec<(u16, u16)> {
        if self.start <= self.end {
            vec![(self.start, self.end)]
        } else {
            vec![(self.start, MINUTES_PER_DAY), (0, self.end)]
        }
    }
}

/// Intersection length of two windows in minutes. 0 when disjoint.
/// Symmetric in its arguments, including midnight-wrapping windows.
pub fn overlap_minutes(a: TimeBand, b: TimeBand) -> u32 {
    let mut total: u32 = 0;
    for &(as_, ae) in &a.segments() {
        for &(bs, be) in &b.segments() {
            let lo = as_.max(bs);
            let hi = ae.min(be);
            if hi > lo {
                total += (hi - lo) as u32;
            }
        }
    }
    total
}

pub fn bands_overlap(a: TimeBand, b: TimeBand) -> bool {
    overlap_minutes(a, b) > 0
}

/// Parse "HH:MM" into minutes since midnight.
pub fn parse_hhmm(s: &str) -> Option<u16> {
    let (h, m) = s.split_once(':')?;
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

fn to_local(now: DateTime<Utc>, tz_offset_minutes: i32) -> DateTime<FixedOffset> {
    // Offsets outside ±24h are rejected at registration; fall back to UTC
    // rather than panicking on corrupt rows.
    let offset =
        FixedOffset::east_opt(tz_offset_minutes * 60).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    now.with_timezone(&offset)
}

/// The user's current minute-of-day in their own timezone.
pub fn local_minute_of_day(now: DateTime<Utc>, tz_offset_minutes: i32) -> u16 {
    let local = to_local(now, tz_offset_minutes);
    (local.hour() * 60 + local.minute()) as u16
}

/// The user's current calendar date in their own timezone. Streak processing
/// keys on this, so "today" moves with the user, not the server.
pub fn local_date(now: DateTime<Utc>, tz_offset_minutes: i32) -> NaiveDate {
    let local = to_local(now, tz_offset_minutes);
    NaiveDate::from_ymd_opt(local.year(), local.month(), local.day())
        .expect("valid date from chrono components")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn band(s: &str, e: &str) -> TimeBand {
        TimeBand::new(parse_hhmm(s).unwrap(), parse_hhmm(e).unwrap())
    }

    #[test]
    fn contains_plain_window() {
        let b = band("09:00", "22:00");
        assert!(b.contains(parse_hhmm("09:00").unwrap()));
        assert!(b.contains(parse_hhmm("21:59").unwrap()));
        assert!(!b.contains(parse_hhmm("22:00").unwrap()));
        assert!(!b.contains(parse_hhmm("23:00").unwrap()));
    }

    #[test]
    fn contains_wrapping_window() {
        let b = band("22:00", "06:00");
        assert!(b.contains(parse_hhmm("23:30").unwrap()));
        assert!(b.contains(parse_hhmm("01:00").unwrap()));
        assert!(!b.contains(parse_hhmm("12:00").unwrap()));
        assert!(!b.contains(parse_hhmm("06:00").unwrap()));
    }

    #[test]
    fn overlap_disjoint_is_zero() {
        assert_eq!(overlap_minutes(band("09:00", "12:00"), band("13:00", "17:00")), 0);
    }

    #[test]
    fn overlap_partial() {
        assert_eq!(overlap_minutes(band("09:00", "12:00"), band("11:00", "17:00")), 60);
    }

    #[test]
    fn overlap_symmetric_with_wrap() {
        let cases = [
            (band("22:00", "06:00"), band("05:00", "09:00")),
            (band("22:00", "06:00"), band("23:00", "01:00")),
            (band("00:00", "23:59"), band("12:00", "12:30")),
            (band("09:00", "12:00"), band("13:00", "17:00")),
        ];
        for (a, b) in cases {
            assert_eq!(overlap_minutes(a, b), overlap_minutes(b, a));
            assert_eq!(bands_overlap(a, b), bands_overlap(b, a));
        }
    }

    #[test]
    fn overlap_wrapping_both() {
        // [23:00, 02:00) ∩ [01:00, 04:00) = [01:00, 02:00)
        assert_eq!(overlap_minutes(band("23:00", "02:00"), band("01:00", "04:00")), 60);
    }

    #[test]
    fn empty_window_never_matches() {
        let b = band("09:00", "09:00");
        assert!(!b.contains(parse_hhmm("09:00").unwrap()));
        assert_eq!(overlap_minutes(b, band("00:00", "23:59")), 0);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("noon"), None);
        assert_eq!(parse_hhmm("12"), None);
        assert_eq!(parse_hhmm("07:30"), Some(450));
    }

    #[test]
    fn local_date_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 23, 30, 0).unwrap();
        // UTC+2: already Jan 11 locally
        assert_eq!(local_date(now, 120), NaiveDate::from_ymd_opt(2024, 1, 11).unwrap());
        // UTC-5: still Jan 10
        assert_eq!(local_date(now, -300), NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        assert_eq!(local_minute_of_day(now, 120), 90);
    }
}
