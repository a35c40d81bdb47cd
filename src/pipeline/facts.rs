//! Fact loader: resolves each staged event against the calendar, the clock
//! and the dimension tables, substitutes surrogate keys and computes
//! derived measures.
//!
//! Required references (date/time always, plus the entity owning the event)
//! behave like inner joins: an event that cannot resolve them is silently
//! excluded. Optional references (tariff, cell, channel) behave like outer
//! joins and load as NULL when unresolved. Blank numeric measures default
//! to zero.

use crate::error::Result;
use crate::pipeline::calendar::{truncate_to_hour, truncate_to_minute};
use crate::staging::StagingBuffer;
use crate::warehouse::{self, FactCounts};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};

/// Natural-key lookup indexes for one fact-load pass, read once from the
/// committed dimension state.
pub struct DimensionIndex {
    pub dates: HashMap<NaiveDate, i64>,
    pub times: HashMap<NaiveTime, i64>,
    pub subscribers: HashMap<String, i64>,
    pub tariffs: HashMap<String, i64>,
    pub services: HashMap<String, i64>,
    pub channels: HashMap<String, i64>,
    pub cells: HashMap<String, i64>,
}

impl DimensionIndex {
    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(Self {
            dates: warehouse::date_index(conn)?,
            times: warehouse::time_index(conn)?,
            subscribers: warehouse::natural_key_index(
                conn,
                "dim_subscriber",
                "subscriber_id",
                "subscriber_key",
            )?,
            tariffs: warehouse::natural_key_index(conn, "dim_tariff", "tariff_code", "tariff_key")?,
            services: warehouse::natural_key_index(
                conn,
                "dim_service",
                "service_code",
                "service_key",
            )?,
            channels: warehouse::natural_key_index(
                conn,
                "dim_channel",
                "channel_code",
                "channel_key",
            )?,
            cells: warehouse::natural_key_index(conn, "dim_cell_site", "cell_id", "cell_key")?,
        })
    }
}

/// Events silently excluded per fact table because a required dimension
/// reference did not resolve. Not errors; reported for visibility only.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct DroppedCounts {
    pub usage: usize,
    pub billing: usize,
    pub payment: usize,
    pub network_kpi: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FactLoadSummary {
    pub loaded: FactCounts,
    pub dropped: DroppedCounts,
}

/// `100 * part / attempts`, rounded to two decimals; None when there were
/// no attempts, never a division by zero.
pub fn ratio_pct(part: i64, attempts: i64) -> Option<f64> {
    if attempts > 0 {
        let ratio = 100.0 * part as f64 / attempts as f64;
        Some((ratio * 100.0).round() / 100.0)
    } else {
        None
    }
}

fn lookup<'a>(index: &HashMap<String, i64>, key: Option<&'a str>) -> Option<i64> {
    key.map(str::trim)
        .filter(|k| !k.is_empty())
        .and_then(|k| index.get(k).copied())
}

/// Load all four fact tables from the staged events.
pub fn load(
    tx: &Transaction,
    staging: &StagingBuffer,
    index: &DimensionIndex,
) -> Result<FactLoadSummary> {
    let mut summary = FactLoadSummary::default();

    let mut insert_usage = tx.prepare(
        "INSERT INTO fact_usage (date_key, time_key, subscriber_key, tariff_key, service_key,
                                 cell_key, call_duration_sec, traffic_mb, units, revenue_amount)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for u in &staging.usage {
        // Required: date, minute clock, subscriber, service.
        let resolved = u.event_ts.and_then(|ts| {
            let date_key = index.dates.get(&ts.date()).copied()?;
            let time_key = index.times.get(&truncate_to_minute(ts)).copied()?;
            let subscriber_key = lookup(&index.subscribers, u.subscriber_id.as_deref())?;
            let service_key = lookup(&index.services, u.service_code.as_deref())?;
            Some((date_key, time_key, subscriber_key, service_key))
        });
        let Some((date_key, time_key, subscriber_key, service_key)) = resolved else {
            summary.dropped.usage += 1;
            continue;
        };
        insert_usage.execute(params![
            date_key,
            time_key,
            subscriber_key,
            lookup(&index.tariffs, u.tariff_code.as_deref()),
            service_key,
            lookup(&index.cells, u.cell_id.as_deref()),
            u.call_duration_sec.unwrap_or(0),
            u.traffic_mb.unwrap_or(0.0),
            u.units.unwrap_or(0.0),
            u.revenue_amount.unwrap_or(0.0),
        ])?;
        summary.loaded.usage += 1;
    }

    let mut insert_billing = tx.prepare(
        "INSERT INTO fact_billing (date_key, subscriber_key, tariff_key, amount, charge_type, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for b in &staging.billing {
        // Required: date, subscriber. Billing facts carry date grain only.
        let resolved = b.op_ts.and_then(|ts| {
            let date_key = index.dates.get(&ts.date()).copied()?;
            let subscriber_key = lookup(&index.subscribers, b.subscriber_id.as_deref())?;
            Some((date_key, subscriber_key))
        });
        let Some((date_key, subscriber_key)) = resolved else {
            summary.dropped.billing += 1;
            continue;
        };
        insert_billing.execute(params![
            date_key,
            subscriber_key,
            lookup(&index.tariffs, b.tariff_code.as_deref()),
            b.amount.unwrap_or(0.0),
            b.charge_type,
            b.description,
        ])?;
        summary.loaded.billing += 1;
    }

    let mut insert_payment = tx.prepare(
        "INSERT INTO fact_payment (date_key, subscriber_key, channel_key, amount, payment_method, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for p in &staging.payments {
        let resolved = p.payment_ts.and_then(|ts| {
            let date_key = index.dates.get(&ts.date()).copied()?;
            let subscriber_key = lookup(&index.subscribers, p.subscriber_id.as_deref())?;
            Some((date_key, subscriber_key))
        });
        let Some((date_key, subscriber_key)) = resolved else {
            summary.dropped.payment += 1;
            continue;
        };
        insert_payment.execute(params![
            date_key,
            subscriber_key,
            lookup(&index.channels, p.channel_code.as_deref()),
            p.amount.unwrap_or(0.0),
            p.payment_method,
            p.status,
        ])?;
        summary.loaded.payment += 1;
    }

    let mut insert_kpi = tx.prepare(
        "INSERT INTO fact_network_kpi (date_key, time_key, cell_key, traffic_mb, call_attempts,
                                       call_successes, call_drops, success_ratio, drop_ratio)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for k in &staging.network_kpi {
        // Required: date, hour clock, cell.
        let resolved = k.kpi_ts.and_then(|ts| {
            let date_key = index.dates.get(&ts.date()).copied()?;
            let time_key = index.times.get(&truncate_to_hour(ts)).copied()?;
            let cell_key = lookup(&index.cells, k.cell_id.as_deref())?;
            Some((date_key, time_key, cell_key))
        });
        let Some((date_key, time_key, cell_key)) = resolved else {
            summary.dropped.network_kpi += 1;
            continue;
        };
        let attempts = k.call_attempts.unwrap_or(0);
        let successes = k.call_successes.unwrap_or(0);
        let drops = k.call_drops.unwrap_or(0);
        insert_kpi.execute(params![
            date_key,
            time_key,
            cell_key,
            k.traffic_mb.unwrap_or(0.0),
            attempts,
            successes,
            drops,
            ratio_pct(successes, attempts),
            ratio_pct(drops, attempts),
        ])?;
        summary.loaded.network_kpi += 1;
    }

    info!(
        "Facts loaded: {} usage, {} billing, {} payment, {} network_kpi",
        summary.loaded.usage, summary.loaded.billing, summary.loaded.payment, summary.loaded.network_kpi
    );
    let total_dropped = summary.dropped.usage
        + summary.dropped.billing
        + summary.dropped.payment
        + summary.dropped.network_kpi;
    if total_dropped > 0 {
        debug!(
            "Dropped events with unresolved required references: {} usage, {} billing, {} payment, {} network_kpi",
            summary.dropped.usage,
            summary.dropped.billing,
            summary.dropped.payment,
            summary.dropped.network_kpi
        );
    }

    Ok(summary)
}
