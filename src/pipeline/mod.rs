//! Pipeline orchestrator.
//!
//! Sequences the load as a state machine
//! `Init -> SchemaReady -> Reset -> Staged -> CalendarBuilt ->
//! DimensionsResolved -> FactsLoaded -> Done`. Each transition is a
//! checkpoint: stage work committed before a failure stays applied, so an
//! aborted run leaves the warehouse partially loaded but internally
//! consistent, and the next run's full reset subsumes it.

pub mod calendar;
pub mod dimensions;
pub mod facts;

use crate::error::Result;
use crate::staging::{StagedCounts, StagingBuffer};
use crate::warehouse::{FactCounts, Warehouse};
use chrono::{DateTime, Utc};
use dimensions::DimensionCounts;
use facts::{DimensionIndex, DroppedCounts};
use metrics::{counter, histogram};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Init,
    SchemaReady,
    Reset,
    Staged,
    CalendarBuilt,
    DimensionsResolved,
    FactsLoaded,
    Done,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::SchemaReady => "schema_ready",
            Stage::Reset => "reset",
            Stage::Staged => "staged",
            Stage::CalendarBuilt => "calendar_built",
            Stage::DimensionsResolved => "dimensions_resolved",
            Stage::FactsLoaded => "facts_loaded",
            Stage::Done => "done",
        }
    }
}

/// Result of a complete pipeline run.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub staged: StagedCounts,
    pub calendar_days: usize,
    pub clock_rows: usize,
    pub dimensions: DimensionCounts,
    pub facts: FactCounts,
    pub dropped: DroppedCounts,
}

pub struct Pipeline;

impl Pipeline {
    /// Run the full reset-and-reload pipeline against one staged data
    /// directory.
    pub fn run(warehouse: &mut Warehouse, data_dir: &Path) -> Result<PipelineResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Starting warehouse load run {}", run_id);
        println!("🚀 Starting warehouse load (run {run_id})");
        counter!("dwh_pipeline_runs_total").increment(1);

        let mut stage = Stage::Init;
        let mut stage_clock = Instant::now();
        let advance = |from: &mut Stage, to: Stage, clock: &mut Instant| {
            let secs = clock.elapsed().as_secs_f64();
            histogram!("dwh_stage_duration_seconds", "stage" => from.name()).record(secs);
            info!("Stage {} -> {} ({:.3}s)", from.name(), to.name(), secs);
            *from = to;
            *clock = Instant::now();
        };

        // Init: every required source must exist before any warehouse
        // mutation; a missing file aborts here, ahead of the reset.
        StagingBuffer::preflight(data_dir)?;
        advance(&mut stage, Stage::SchemaReady, &mut stage_clock);

        warehouse.ensure_schema()?;
        advance(&mut stage, Stage::Reset, &mut stage_clock);

        println!("🧹 Resetting warehouse (full refresh)...");
        warehouse.reset()?;
        advance(&mut stage, Stage::Staged, &mut stage_clock);

        println!("📥 Staging source files from {}...", data_dir.display());
        let staging = StagingBuffer::load(data_dir)?;
        let staged = staging.counts();
        info!(
            "Staged rows: {} subscribers, {} tariffs, {} services, {} channels, {} cell sites, {} usage, {} billing, {} payments, {} network KPI",
            staged.subscribers,
            staged.tariffs,
            staged.services,
            staged.channels,
            staged.cell_sites,
            staged.usage,
            staged.billing,
            staged.payments,
            staged.network_kpi
        );
        advance(&mut stage, Stage::CalendarBuilt, &mut stage_clock);

        println!("📅 Building calendar and clock dimensions...");
        let tx = warehouse.transaction()?;
        let (calendar_days, clock_rows) = calendar::build(&tx, &staging)?;
        tx.commit()?;
        advance(&mut stage, Stage::DimensionsResolved, &mut stage_clock);

        println!("🗂️  Resolving dimensions...");
        let tx = warehouse.transaction()?;
        let dimensions = dimensions::load(&tx, &staging)?;
        tx.commit()?;
        advance(&mut stage, Stage::FactsLoaded, &mut stage_clock);

        println!("📊 Loading facts...");
        let tx = warehouse.transaction()?;
        let index = DimensionIndex::load(&tx)?;
        let fact_summary = facts::load(&tx, &staging, &index)?;
        tx.commit()?;
        advance(&mut stage, Stage::Done, &mut stage_clock);

        let facts = warehouse.fact_counts()?;
        for (table, loaded, dropped) in [
            ("usage", facts.usage, fact_summary.dropped.usage),
            ("billing", facts.billing, fact_summary.dropped.billing),
            ("payment", facts.payment, fact_summary.dropped.payment),
            (
                "network_kpi",
                facts.network_kpi,
                fact_summary.dropped.network_kpi,
            ),
        ] {
            counter!("dwh_facts_loaded_total", "table" => table).increment(loaded);
            counter!("dwh_facts_dropped_total", "table" => table).increment(dropped as u64);
        }

        let finished_at = Utc::now();
        info!(
            "Load run {} finished in {:.3}s",
            run_id,
            (finished_at - started_at).num_milliseconds() as f64 / 1000.0
        );

        Ok(PipelineResult {
            run_id,
            started_at,
            finished_at,
            staged,
            calendar_days,
            clock_rows,
            dimensions,
            facts,
            dropped: fact_summary.dropped,
        })
    }

    /// Persist the run summary as JSON for later inspection.
    pub fn persist_report(result: &PipelineResult, report_dir: &Path) -> Result<String> {
        fs::create_dir_all(report_dir)?;

        let timestamp = result.started_at.format("%Y%m%d_%H%M%S");
        let filename = format!("load_run_{timestamp}.json");
        let filepath = report_dir.join(&filename);

        let json_content = serde_json::to_string_pretty(result)?;
        fs::write(&filepath, json_content)?;

        Ok(filepath.to_string_lossy().to_string())
    }
}
