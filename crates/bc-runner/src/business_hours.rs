//! Business-hours gating: timezone-aware window check with optional
//! weekend and lunch exclusion, and the "next open instant" computation
//! the worker loop uses to set `resumeAt` when it pauses for closed hours.

use bc_common::config::BusinessHoursConfig;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// `Some(resume_at)` (in UTC) if `now_utc` falls outside the configured
/// window; `None` if sending is currently permitted, including when
/// business hours are disabled.
pub fn resume_at_if_closed(config: &BusinessHoursConfig, now_utc: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !config.enabled {
        return None;
    }

    let tz: Tz = config.timezone.parse().unwrap_or(chrono_tz::UTC);
    let local = now_utc.with_timezone(&tz);

    if is_open_at(config, local) {
        None
    } else {
        Some(next_open_instant(config, local, &tz).with_timezone(&Utc))
    }
}

fn is_open_at(config: &BusinessHoursConfig, local: DateTime<Tz>) -> bool {
    if config.exclude_weekends {
        let wd = local.weekday();
        if wd == chrono::Weekday::Sat || wd == chrono::Weekday::Sun {
            return false;
        }
    }

    let hour = local.hour() as u8;
    if hour < config.start_hour || hour >= config.end_hour {
        return false;
    }

    if config.exclude_lunch_break && hour >= config.lunch_start && hour < config.lunch_end {
        return false;
    }

    true
}

/// Scans forward, day by day, for the earliest instant after `local` that
/// is actually open. Checked against `start_hour` and, when lunch is
/// excluded and falls before `start_hour` never happens in practice,
/// `lunch_end` as the two candidate reopen times each day.
fn next_open_instant(config: &BusinessHoursConfig, local: DateTime<Tz>, tz: &Tz) -> DateTime<Tz> {
    for day_offset in 0..8i64 {
        let candidate_date = local.date_naive() + chrono::Duration::days(day_offset);
        for &hour in &[config.start_hour, config.lunch_end] {
            let Some(naive) = candidate_date.and_hms_opt(hour as u32, 0, 0) else { continue };
            let Some(candidate) = tz.from_local_datetime(&naive).single() else { continue };
            if candidate <= local {
                continue;
            }
            if is_open_at(config, candidate) {
                return candidate;
            }
        }
    }
    local + chrono::Duration::days(7)
}
