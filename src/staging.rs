//! Per-run staging buffer for the raw CSV exports.
//!
//! One file per source domain, header row first, empty string for NULL.
//! Records are held in memory for the duration of a single pipeline run
//! and never persisted; the only validation applied here is type coercion.

use crate::error::{EtlError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use tracing::debug;

pub const SUBSCRIBERS_FILE: &str = "subscribers.csv";
pub const TARIFFS_FILE: &str = "tariffs.csv";
pub const SERVICES_FILE: &str = "services.csv";
pub const CHANNELS_FILE: &str = "channels.csv";
pub const CELL_SITES_FILE: &str = "cell_sites.csv";
pub const USAGE_FILE: &str = "usage.csv";
pub const BILLING_FILE: &str = "billing.csv";
pub const PAYMENTS_FILE: &str = "payments.csv";
pub const NETWORK_KPI_FILE: &str = "network_kpi.csv";

/// Every source domain is required; a missing file aborts the run.
pub const REQUIRED_SOURCES: [&str; 9] = [
    SUBSCRIBERS_FILE,
    TARIFFS_FILE,
    SERVICES_FILE,
    CHANNELS_FILE,
    CELL_SITES_FILE,
    USAGE_FILE,
    BILLING_FILE,
    PAYMENTS_FILE,
    NETWORK_KPI_FILE,
];

#[derive(Debug, Clone, Deserialize)]
pub struct StagedSubscriber {
    pub subscriber_id: Option<String>,
    pub msisdn: Option<String>,
    pub customer_type: Option<String>,
    pub segment: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "de_opt_date")]
    pub activation_date: Option<NaiveDate>,
    #[serde(deserialize_with = "de_opt_date")]
    pub deactivation_date: Option<NaiveDate>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedTariff {
    pub tariff_code: Option<String>,
    pub tariff_name: Option<String>,
    pub tariff_type: Option<String>,
    #[serde(deserialize_with = "de_opt_bool")]
    pub is_active: Option<bool>,
    #[serde(deserialize_with = "de_opt_date")]
    pub valid_from: Option<NaiveDate>,
    #[serde(deserialize_with = "de_opt_date")]
    pub valid_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedService {
    pub service_code: Option<String>,
    pub service_name: Option<String>,
    pub service_group: Option<String>,
    #[serde(deserialize_with = "de_opt_bool")]
    pub is_recurring: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedChannel {
    pub channel_code: Option<String>,
    pub channel_name: Option<String>,
    pub channel_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedCellSite {
    pub cell_id: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub technology: Option<String>,
    pub site_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedUsage {
    pub event_id: Option<String>,
    #[serde(deserialize_with = "de_opt_timestamp")]
    pub event_ts: Option<NaiveDateTime>,
    pub subscriber_id: Option<String>,
    pub tariff_code: Option<String>,
    pub service_code: Option<String>,
    pub cell_id: Option<String>,
    pub call_duration_sec: Option<i64>,
    pub traffic_mb: Option<f64>,
    pub units: Option<f64>,
    pub revenue_amount: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedBilling {
    pub billing_id: Option<String>,
    #[serde(deserialize_with = "de_opt_timestamp")]
    pub op_ts: Option<NaiveDateTime>,
    pub subscriber_id: Option<String>,
    pub tariff_code: Option<String>,
    pub amount: Option<f64>,
    pub charge_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedPayment {
    pub payment_id: Option<String>,
    #[serde(deserialize_with = "de_opt_timestamp")]
    pub payment_ts: Option<NaiveDateTime>,
    pub subscriber_id: Option<String>,
    pub channel_code: Option<String>,
    pub amount: Option<f64>,
    pub payment_method: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedNetworkKpi {
    pub kpi_id: Option<String>,
    #[serde(deserialize_with = "de_opt_timestamp")]
    pub kpi_ts: Option<NaiveDateTime>,
    pub cell_id: Option<String>,
    pub traffic_mb: Option<f64>,
    pub call_attempts: Option<i64>,
    pub call_successes: Option<i64>,
    pub call_drops: Option<i64>,
}

/// Row counts per staged domain, reported in the run summary.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StagedCounts {
    pub subscribers: usize,
    pub tariffs: usize,
    pub services: usize,
    pub channels: usize,
    pub cell_sites: usize,
    pub usage: usize,
    pub billing: usize,
    pub payments: usize,
    pub network_kpi: usize,
}

/// In-memory holding area for one pipeline run.
pub struct StagingBuffer {
    pub subscribers: Vec<StagedSubscriber>,
    pub tariffs: Vec<StagedTariff>,
    pub services: Vec<StagedService>,
    pub channels: Vec<StagedChannel>,
    pub cell_sites: Vec<StagedCellSite>,
    pub usage: Vec<StagedUsage>,
    pub billing: Vec<StagedBilling>,
    pub payments: Vec<StagedPayment>,
    pub network_kpi: Vec<StagedNetworkKpi>,
}

impl StagingBuffer {
    /// Verify that every required source exists before the warehouse is
    /// touched. A missing file is fatal at this point, not later.
    pub fn preflight(data_dir: &Path) -> Result<()> {
        for file in REQUIRED_SOURCES {
            let path = data_dir.join(file);
            if !path.exists() {
                return Err(EtlError::MissingSource(path.display().to_string()));
            }
        }
        Ok(())
    }

    /// Read every domain export into memory.
    pub fn load(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            subscribers: read_domain(data_dir, SUBSCRIBERS_FILE)?,
            tariffs: read_domain(data_dir, TARIFFS_FILE)?,
            services: read_domain(data_dir, SERVICES_FILE)?,
            channels: read_domain(data_dir, CHANNELS_FILE)?,
            cell_sites: read_domain(data_dir, CELL_SITES_FILE)?,
            usage: read_domain(data_dir, USAGE_FILE)?,
            billing: read_domain(data_dir, BILLING_FILE)?,
            payments: read_domain(data_dir, PAYMENTS_FILE)?,
            network_kpi: read_domain(data_dir, NETWORK_KPI_FILE)?,
        })
    }

    pub fn counts(&self) -> StagedCounts {
        StagedCounts {
            subscribers: self.subscribers.len(),
            tariffs: self.tariffs.len(),
            services: self.services.len(),
            channels: self.channels.len(),
            cell_sites: self.cell_sites.len(),
            usage: self.usage.len(),
            billing: self.billing.len(),
            payments: self.payments.len(),
            network_kpi: self.network_kpi.len(),
        }
    }
}

fn read_domain<T: DeserializeOwned>(data_dir: &Path, file: &str) -> Result<Vec<T>> {
    let path = data_dir.join(file);
    if !path.exists() {
        return Err(EtlError::MissingSource(path.display().to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(&path)?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }

    debug!("Staged {} rows from {}", rows.len(), file);
    Ok(rows)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

fn de_opt_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{s}'"))),
    }
}

fn de_opt_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_bool(s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid boolean '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_timestamp_accepts_space_and_t_separators() {
        let a = parse_timestamp("2025-04-01 18:35:00").unwrap();
        let b = parse_timestamp("2025-04-01T18:35:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.date().day(), 1);
        assert_eq!(a.time().minute(), 35);
        assert!(parse_timestamp("01.04.2025 18:35").is_none());
    }

    #[test]
    fn test_parse_bool_is_lenient() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("FALSE"), Some(false));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("f"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn test_blank_fields_stage_as_none() {
        let data = "tariff_code,tariff_name,tariff_type,is_active,valid_from,valid_to\n\
                    T01,Smart Mini,postpaid,True,2023-01-01,\n";
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(data.as_bytes());
        let rows: Vec<StagedTariff> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tariff_code.as_deref(), Some("T01"));
        assert_eq!(rows[0].is_active, Some(true));
        assert!(rows[0].valid_to.is_none());
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = StagingBuffer::preflight(dir.path()).unwrap_err();
        assert!(matches!(err, EtlError::MissingSource(_)));
    }
}
