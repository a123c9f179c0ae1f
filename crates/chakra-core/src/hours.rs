//! US equity market session calendar (Eastern time, regular weekdays).
//! Exchange holidays are out of scope; weekends and session windows only.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::US::Eastern;

use crate::types::MarketPhase;

const PRE_OPEN_MINUTES: u32 = 4 * 60; // 04:00 ET
const REGULAR_OPEN_MINUTES: u32 = 9 * 60 + 30; // 09:30 ET
const REGULAR_CLOSE_MINUTES: u32 = 16 * 60; // 16:00 ET
const POST_CLOSE_MINUTES: u32 = 20 * 60; // 20:00 ET

/// Session phase at a given instant (defaults to now).
pub fn get_market_phase(at: Option<DateTime<Utc>>) -> MarketPhase {
    let now_et = at.unwrap_or_else(Utc::now).with_timezone(&Eastern);

    if now_et.weekday() == Weekday::Sat || now_et.weekday() == Weekday::Sun {
        return MarketPhase::Closed;
    }

    let minutes = now_et.hour() * 60 + now_et.minute();
    if (REGULAR_OPEN_MINUTES..REGULAR_CLOSE_MINUTES).contains(&minutes) {
        MarketPhase::Open
    } else if (PRE_OPEN_MINUTES..REGULAR_OPEN_MINUTES).contains(&minutes) {
        MarketPhase::Pre
    } else if (REGULAR_CLOSE_MINUTES..POST_CLOSE_MINUTES).contains(&minutes) {
        MarketPhase::Post
    } else {
        MarketPhase::Closed
    }
}

pub fn is_market_open() -> bool {
    get_market_phase(None).is_open()
}

/// Next regular open and close instants in ET, as ISO strings for the UI.
pub fn next_open_close_et(at: DateTime<Utc>) -> (String, String) {
    let now_et = at.with_timezone(&Eastern);
    let minutes = now_et.hour() * 60 + now_et.minute();

    let mut open_day = now_et.date_naive();
    if minutes >= REGULAR_OPEN_MINUTES || is_weekend(now_et.weekday()) {
        open_day = open_day.succ_opt().unwrap_or(open_day);
    }
    while is_weekend(weekday_of(open_day)) {
        open_day = open_day.succ_opt().unwrap_or(open_day);
    }

    let mut close_day = now_et.date_naive();
    if minutes >= REGULAR_CLOSE_MINUTES || is_weekend(now_et.weekday()) {
        close_day = close_day.succ_opt().unwrap_or(close_day);
    }
    while is_weekend(weekday_of(close_day)) {
        close_day = close_day.succ_opt().unwrap_or(close_day);
    }

    let open = open_day.and_hms_opt(9, 30, 0).map(|n| {
        n.and_local_timezone(Eastern)
            .single()
            .map(|d| d.to_rfc3339())
            .unwrap_or_default()
    });
    let close = close_day.and_hms_opt(16, 0, 0).map(|n| {
        n.and_local_timezone(Eastern)
            .single()
            .map(|d| d.to_rfc3339())
            .unwrap_or_default()
    });
    (open.unwrap_or_default(), close.unwrap_or_default())
}

fn is_weekend(day: Weekday) -> bool {
    day == Weekday::Sat || day == Weekday::Sun
}

fn weekday_of(date: chrono::NaiveDate) -> Weekday {
    date.weekday()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn et_instant(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Eastern
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn weekday_session_windows() {
        // Tuesday 2025-06-10
        assert_eq!(
            get_market_phase(Some(et_instant(2025, 6, 10, 10, 0))),
            MarketPhase::Open
        );
        assert_eq!(
            get_market_phase(Some(et_instant(2025, 6, 10, 5, 0))),
            MarketPhase::Pre
        );
        assert_eq!(
            get_market_phase(Some(et_instant(2025, 6, 10, 17, 0))),
            MarketPhase::Post
        );
        assert_eq!(
            get_market_phase(Some(et_instant(2025, 6, 10, 22, 30))),
            MarketPhase::Closed
        );
    }

    #[test]
    fn open_boundary_is_inclusive_close_exclusive() {
        assert_eq!(
            get_market_phase(Some(et_instant(2025, 6, 10, 9, 30))),
            MarketPhase::Open
        );
        assert_eq!(
            get_market_phase(Some(et_instant(2025, 6, 10, 16, 0))),
            MarketPhase::Post
        );
    }

    #[test]
    fn weekend_is_closed_all_day() {
        // Saturday 2025-06-14
        assert_eq!(
            get_market_phase(Some(et_instant(2025, 6, 14, 11, 0))),
            MarketPhase::Closed
        );
    }

    #[test]
    fn next_open_skips_weekend() {
        // Friday 2025-06-13 after close: next open is Monday
        let (open, _close) = next_open_close_et(et_instant(2025, 6, 13, 17, 0));
        assert!(open.starts_with("2025-06-16T09:30"));
    }
}
