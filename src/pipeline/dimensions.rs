//! Dimension resolver: dedup/merge staged domain rows into the persistent
//! dimension tables by natural key.
//!
//! Geography is pure dedup on the (country, region, city) composite; the
//! other dimensions are natural-key upserts where every non-key attribute
//! takes the latest staged value (last-write-wins) while the surrogate key
//! survives. Rows with a blank natural key are skipped, not errored.
//! Geography resolves first because subscriber and cell-site rows reference
//! it by lookup.

use crate::error::Result;
use crate::staging::StagingBuffer;
use crate::warehouse;
use rusqlite::{params, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Rows written per dimension, reported in the run summary.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct DimensionCounts {
    pub geo: usize,
    pub subscribers: usize,
    pub tariffs: usize,
    pub services: usize,
    pub channels: usize,
    pub cell_sites: usize,
}

/// Last-write-wins merge rule for a natural-key upsert: the staged
/// attributes replace the stored ones wholesale, the surrogate key (if any)
/// survives. Kept as a pure function so the rule is testable independent of
/// the SQL that applies it.
pub fn merge_row<A: Clone>(existing: Option<(i64, &A)>, staged: &A) -> (Option<i64>, A) {
    (existing.map(|(key, _)| key), staged.clone())
}

/// Normalize a staged geography tuple for matching: country must be
/// non-blank, absent region/city compare as the empty string.
pub fn geo_tuple(
    country: Option<&str>,
    region: Option<&str>,
    city: Option<&str>,
) -> Option<(String, String, String)> {
    let country = country.map(str::trim).unwrap_or_default();
    if country.is_empty() {
        return None;
    }
    Some((
        country.to_string(),
        region.map(str::trim).unwrap_or_default().to_string(),
        city.map(str::trim).unwrap_or_default().to_string(),
    ))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Resolve every dimension for the staged batch, in dependency order.
pub fn load(tx: &Transaction, staging: &StagingBuffer) -> Result<DimensionCounts> {
    let mut counts = DimensionCounts::default();

    counts.geo = load_geo(tx, staging)?;
    let geo_index = warehouse::geo_index(tx)?;

    // Subscribers: geography resolved by lookup, not by staged value.
    let mut upsert_subscriber = tx.prepare(
        "INSERT INTO dim_subscriber (subscriber_id, msisdn, customer_type, segment, status,
                                     activation_date, deactivation_date, geo_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(subscriber_id) DO UPDATE SET
             msisdn = excluded.msisdn,
             customer_type = excluded.customer_type,
             segment = excluded.segment,
             status = excluded.status,
             activation_date = excluded.activation_date,
             deactivation_date = excluded.deactivation_date,
             geo_key = excluded.geo_key",
    )?;
    for s in &staging.subscribers {
        let Some(subscriber_id) = non_blank(&s.subscriber_id) else {
            continue;
        };
        let geo_key = geo_tuple(s.country.as_deref(), s.region.as_deref(), s.city.as_deref())
            .and_then(|t| geo_index.get(&t).copied());
        upsert_subscriber.execute(params![
            subscriber_id,
            s.msisdn,
            s.customer_type,
            s.segment,
            s.status,
            s.activation_date,
            s.deactivation_date,
            geo_key,
        ])?;
        counts.subscribers += 1;
    }

    let mut upsert_tariff = tx.prepare(
        "INSERT INTO dim_tariff (tariff_code, tariff_name, tariff_type, is_active, valid_from, valid_to)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(tariff_code) DO UPDATE SET
             tariff_name = excluded.tariff_name,
             tariff_type = excluded.tariff_type,
             is_active = excluded.is_active,
             valid_from = excluded.valid_from,
             valid_to = excluded.valid_to",
    )?;
    for t in &staging.tariffs {
        let Some(tariff_code) = non_blank(&t.tariff_code) else {
            continue;
        };
        upsert_tariff.execute(params![
            tariff_code,
            t.tariff_name,
            t.tariff_type,
            t.is_active,
            t.valid_from,
            t.valid_to,
        ])?;
        counts.tariffs += 1;
    }

    let mut upsert_service = tx.prepare(
        "INSERT INTO dim_service (service_code, service_name, service_group, is_recurring)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(service_code) DO UPDATE SET
             service_name = excluded.service_name,
             service_group = excluded.service_group,
             is_recurring = excluded.is_recurring",
    )?;
    for s in &staging.services {
        let Some(service_code) = non_blank(&s.service_code) else {
            continue;
        };
        upsert_service.execute(params![
            service_code,
            s.service_name,
            s.service_group,
            s.is_recurring,
        ])?;
        counts.services += 1;
    }

    let mut upsert_channel = tx.prepare(
        "INSERT INTO dim_channel (channel_code, channel_name, channel_type)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(channel_code) DO UPDATE SET
             channel_name = excluded.channel_name,
             channel_type = excluded.channel_type",
    )?;
    for c in &staging.channels {
        let Some(channel_code) = non_blank(&c.channel_code) else {
            continue;
        };
        upsert_channel.execute(params![channel_code, c.channel_name, c.channel_type])?;
        counts.channels += 1;
    }

    let mut upsert_cell = tx.prepare(
        "INSERT INTO dim_cell_site (cell_id, geo_key, technology, site_name)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(cell_id) DO UPDATE SET
             geo_key = excluded.geo_key,
             technology = excluded.technology,
             site_name = excluded.site_name",
    )?;
    for c in &staging.cell_sites {
        let Some(cell_id) = non_blank(&c.cell_id) else {
            continue;
        };
        let geo_key = geo_tuple(c.country.as_deref(), c.region.as_deref(), c.city.as_deref())
            .and_then(|t| geo_index.get(&t).copied());
        upsert_cell.execute(params![cell_id, geo_key, c.technology, c.site_name])?;
        counts.cell_sites += 1;
    }

    info!(
        "Dimensions resolved: {} geo, {} subscribers, {} tariffs, {} services, {} channels, {} cell sites",
        counts.geo, counts.subscribers, counts.tariffs, counts.services, counts.channels, counts.cell_sites
    );

    Ok(counts)
}

/// Collect the distinct geography tuples observed across subscriber and
/// cell-site staging and insert the ones not already present. Pure dedup:
/// an existing geo row is never updated.
fn load_geo(tx: &Transaction, staging: &StagingBuffer) -> Result<usize> {
    let mut tuples: BTreeSet<(String, String, String)> = BTreeSet::new();
    for s in &staging.subscribers {
        if let Some(t) = geo_tuple(s.country.as_deref(), s.region.as_deref(), s.city.as_deref()) {
            tuples.insert(t);
        }
    }
    for c in &staging.cell_sites {
        if let Some(t) = geo_tuple(c.country.as_deref(), c.region.as_deref(), c.city.as_deref()) {
            tuples.insert(t);
        }
    }

    let existing = warehouse::geo_index(tx)?;
    let mut insert_geo = tx.prepare(
        "INSERT INTO dim_geo (country, region, city) VALUES (?1, ?2, ?3)",
    )?;
    let mut inserted = 0;
    for tuple in tuples {
        if existing.contains_key(&tuple) {
            debug!("Geography already present: {:?}", tuple);
            continue;
        }
        let (country, region, city) = &tuple;
        // Blank region/city stored as NULL, matched as empty string.
        insert_geo.execute(params![
            country,
            (!region.is_empty()).then_some(region),
            (!city.is_empty()).then_some(city),
        ])?;
        inserted += 1;
    }
    Ok(inserted)
}
