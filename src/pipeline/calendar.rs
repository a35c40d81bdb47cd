//! Calendar and clock dimension builder.
//!
//! The calendar covers every day between the earliest and latest date
//! observed anywhere in the staged data, with no gaps. The clock is sparse:
//! one row per distinct truncated time-of-day actually observed, minute
//! truncation for subscriber-facing events and hour truncation for network
//! KPI samples. Fact rows later resolve date/time by value equality, so the
//! integer key encodings here are load-bearing, not cosmetic.

use crate::error::Result;
use crate::staging::StagingBuffer;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rusqlite::{params, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// date_key = year*10000 + month*100 + day (e.g. 2025-04-01 -> 20250401).
pub fn date_key(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

/// time_key = hour*10000 + minute*100 + second (e.g. 18:35:00 -> 183500).
pub fn time_key(time: NaiveTime) -> i64 {
    time.hour() as i64 * 10_000 + time.minute() as i64 * 100 + time.second() as i64
}

/// Truncation policy for subscriber-facing events (usage/billing/payments).
pub fn truncate_to_minute(ts: NaiveDateTime) -> NaiveTime {
    NaiveTime::from_hms_opt(ts.hour(), ts.minute(), 0).expect("valid truncated time")
}

/// Truncation policy for network KPI samples.
pub fn truncate_to_hour(ts: NaiveDateTime) -> NaiveTime {
    NaiveTime::from_hms_opt(ts.hour(), 0, 0).expect("valid truncated time")
}

/// Fixed range used when the staged input carries no timestamps at all,
/// so an empty run still produces a usable calendar.
pub fn default_date_range() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
        NaiveDate::from_ymd_opt(2026, 12, 31).expect("valid date"),
    )
}

/// The set of calendar days and clock instants a staged batch requires.
#[derive(Debug)]
pub struct CalendarPlan {
    pub days: Vec<NaiveDate>,
    pub times: BTreeSet<NaiveTime>,
}

/// Scan every timestamp-bearing column across the staged domains and reduce
/// to a contiguous day range plus the distinct truncated times observed.
pub fn plan_from_staging(staging: &StagingBuffer) -> CalendarPlan {
    let mut min_date: Option<NaiveDate> = None;
    let mut max_date: Option<NaiveDate> = None;
    let mut observe = |date: NaiveDate| {
        min_date = Some(min_date.map_or(date, |d| d.min(date)));
        max_date = Some(max_date.map_or(date, |d| d.max(date)));
    };

    for s in &staging.subscribers {
        if let Some(d) = s.activation_date {
            observe(d);
        }
        if let Some(d) = s.deactivation_date {
            observe(d);
        }
    }
    for u in &staging.usage {
        if let Some(ts) = u.event_ts {
            observe(ts.date());
        }
    }
    for b in &staging.billing {
        if let Some(ts) = b.op_ts {
            observe(ts.date());
        }
    }
    for p in &staging.payments {
        if let Some(ts) = p.payment_ts {
            observe(ts.date());
        }
    }
    for k in &staging.network_kpi {
        if let Some(ts) = k.kpi_ts {
            observe(ts.date());
        }
    }

    let (min_date, max_date) = match (min_date, max_date) {
        (Some(min), Some(max)) => (min, max),
        _ => default_date_range(),
    };

    let mut days = Vec::new();
    let mut day = min_date;
    while day <= max_date {
        days.push(day);
        day += Duration::days(1);
    }

    // Distinct truncated times; duplicates across domains collapse here.
    let mut times = BTreeSet::new();
    for ts in staging.usage.iter().filter_map(|u| u.event_ts) {
        times.insert(truncate_to_minute(ts));
    }
    for ts in staging.billing.iter().filter_map(|b| b.op_ts) {
        times.insert(truncate_to_minute(ts));
    }
    for ts in staging.payments.iter().filter_map(|p| p.payment_ts) {
        times.insert(truncate_to_minute(ts));
    }
    for ts in staging.network_kpi.iter().filter_map(|k| k.kpi_ts) {
        times.insert(truncate_to_hour(ts));
    }

    CalendarPlan { days, times }
}

fn quarter(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

fn is_month_end(date: NaiveDate) -> bool {
    (date + Duration::days(1)).month() != date.month()
}

fn is_weekend(date: NaiveDate) -> bool {
    date.weekday().number_from_monday() >= 6
}

/// Insert dim_date and dim_time rows for the staged batch. Returns the
/// number of calendar days and clock rows produced.
pub fn build(tx: &Transaction, staging: &StagingBuffer) -> Result<(usize, usize)> {
    let plan = plan_from_staging(staging);

    let mut insert_date = tx.prepare(
        "INSERT INTO dim_date (date_key, full_date, year, quarter, month, day,
                               is_month_start, is_month_end, is_weekend)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for &day in &plan.days {
        insert_date.execute(params![
            date_key(day),
            day,
            day.year(),
            quarter(day.month()),
            day.month(),
            day.day(),
            day.day() == 1,
            is_month_end(day),
            is_weekend(day),
        ])?;
    }

    let mut insert_time = tx.prepare(
        "INSERT INTO dim_time (time_key, full_time, hour, minute, second)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for &time in &plan.times {
        insert_time.execute(params![
            time_key(time),
            time,
            time.hour(),
            time.minute(),
            time.second(),
        ])?;
    }

    info!(
        "Calendar built: {} days ({}..{}), {} clock rows",
        plan.days.len(),
        plan.days.first().map(|d| d.to_string()).unwrap_or_default(),
        plan.days.last().map(|d| d.to_string()).unwrap_or_default(),
        plan.times.len()
    );
    debug!("Clock rows derive only from observed staged events");

    Ok((plan.days.len(), plan.times.len()))
}
