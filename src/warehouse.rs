//! SQLite-backed star schema store.
//!
//! The warehouse owns the only persistent state in the system: dimension
//! tables addressed by natural keys with autoincrement surrogate keys, and
//! fact tables referencing them. The schema is applied idempotently from an
//! embedded migration script.

use crate::error::Result;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{Connection, Transaction};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Fact tables, in reset (reverse foreign-key) order.
const FACT_TABLES: [&str; 4] = [
    "fact_network_kpi",
    "fact_payment",
    "fact_billing",
    "fact_usage",
];

/// Dimension tables, in reset order: referencing dimensions before dim_geo.
const DIM_TABLES: [&str; 8] = [
    "dim_channel",
    "dim_cell_site",
    "dim_service",
    "dim_tariff",
    "dim_subscriber",
    "dim_geo",
    "dim_time",
    "dim_date",
];

/// Final per-fact-table row counts, printed at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FactCounts {
    pub usage: u64,
    pub billing: u64,
    pub payment: u64,
    pub network_kpi: u64,
}

pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    /// Open (or create) the warehouse file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// In-memory warehouse for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply the star-schema DDL. Safe to call on every run.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(include_str!("../migrations/001_create_warehouse.sql"))?;
        Ok(())
    }

    /// Clear every fact and dimension table and restart the surrogate-key
    /// sequences, making the run a full refresh. Facts are deleted before
    /// dimensions so no foreign-key reference dangles mid-reset.
    pub fn reset(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        for table in FACT_TABLES.iter().chain(DIM_TABLES.iter()) {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        // sqlite_sequence only exists once an AUTOINCREMENT insert happened
        let has_sequences: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'sqlite_sequence')",
            [],
            |row| row.get(0),
        )?;
        if has_sequences {
            tx.execute("DELETE FROM sqlite_sequence", [])?;
        }
        tx.commit()?;
        info!("Warehouse reset: all facts and dimensions truncated");
        Ok(())
    }

    /// Begin a stage-scoped transaction; committing it is the checkpoint.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn fact_counts(&self) -> Result<FactCounts> {
        Ok(FactCounts {
            usage: count_rows(&self.conn, "fact_usage")?,
            billing: count_rows(&self.conn, "fact_billing")?,
            payment: count_rows(&self.conn, "fact_payment")?,
            network_kpi: count_rows(&self.conn, "fact_network_kpi")?,
        })
    }
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(n as u64)
}

/// Map of `full_date -> date_key` for the loaded calendar.
pub fn date_index(conn: &Connection) -> Result<HashMap<NaiveDate, i64>> {
    let mut stmt = conn.prepare("SELECT full_date, date_key FROM dim_date")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, NaiveDate>(0)?, row.get::<_, i64>(1)?)))?;
    let mut index = HashMap::new();
    for row in rows {
        let (date, key) = row?;
        index.insert(date, key);
    }
    Ok(index)
}

/// Map of `full_time -> time_key` for the loaded clock.
pub fn time_index(conn: &Connection) -> Result<HashMap<NaiveTime, i64>> {
    let mut stmt = conn.prepare("SELECT full_time, time_key FROM dim_time")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, NaiveTime>(0)?, row.get::<_, i64>(1)?)))?;
    let mut index = HashMap::new();
    for row in rows {
        let (time, key) = row?;
        index.insert(time, key);
    }
    Ok(index)
}

/// Map of natural key -> surrogate key for a single-column-keyed dimension.
pub fn natural_key_index(
    conn: &Connection,
    table: &str,
    natural_key: &str,
    surrogate_key: &str,
) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare(&format!("SELECT {natural_key}, {surrogate_key} FROM {table}"))?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    let mut index = HashMap::new();
    for row in rows {
        let (natural, surrogate) = row?;
        index.insert(natural, surrogate);
    }
    Ok(index)
}

/// Map of the composite `(country, region, city)` tuple -> geo_key, with
/// absent region/city normalized to the empty string for matching.
pub fn geo_index(conn: &Connection) -> Result<HashMap<(String, String, String), i64>> {
    let mut stmt = conn.prepare("SELECT country, region, city, geo_key FROM dim_geo")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;
    let mut index = HashMap::new();
    for row in rows {
        let (country, region, city, key) = row?;
        index.insert(
            (
                country,
                region.unwrap_or_default(),
                city.unwrap_or_default(),
            ),
            key,
        );
    }
    Ok(index)
}
