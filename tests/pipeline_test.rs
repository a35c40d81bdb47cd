use anyhow::Result;
use std::fs;
use std::path::Path;
use telco_dwh::pipeline::Pipeline;
use telco_dwh::warehouse::Warehouse;
use tempfile::tempdir;

/// Write a small but complete staged export into `dir`.
///
/// The fixture deliberately covers the interesting cases: duplicate
/// geography tuples, a duplicated tariff code with diverging attributes, a
/// usage event for an unknown subscriber, a usage event with blank optional
/// references, a payment through an unknown channel and a KPI sample with
/// zero attempts.
fn write_fixture(dir: &Path) -> Result<()> {
    fs::write(
        dir.join("subscribers.csv"),
        "subscriber_id,msisdn,customer_type,segment,status,activation_date,deactivation_date,country,region,city\n\
         SUB_1,79001112233,B2C_postpaid,Mass,active,2024-03-05,,X,A,A\n\
         SUB_2,79004445566,B2C_prepaid,Youth,active,2024-03-05,,X,A,A\n\
         SUB_3,79007778899,B2B,Business,active,2024-03-05,,X,B,B\n",
    )?;
    fs::write(
        dir.join("tariffs.csv"),
        "tariff_code,tariff_name,tariff_type,is_active,valid_from,valid_to\n\
         T01,Old Name,postpaid,True,2023-01-01,\n\
         T01,New Name,postpaid,True,2023-01-01,\n",
    )?;
    fs::write(
        dir.join("services.csv"),
        "service_code,service_name,service_group,is_recurring\n\
         VOICE,Voice call,core,False\n\
         DATA,Mobile data,core,False\n",
    )?;
    fs::write(
        dir.join("channels.csv"),
        "channel_code,channel_name,channel_type\n\
         CH1,Mobile app,digital\n",
    )?;
    fs::write(
        dir.join("cell_sites.csv"),
        "cell_id,country,region,city,technology,site_name\n\
         CELL_1,X,A,A,4G,Site A-00001\n",
    )?;
    fs::write(
        dir.join("usage.csv"),
        "event_id,event_ts,subscriber_id,tariff_code,service_code,cell_id,call_duration_sec,traffic_mb,units,revenue_amount\n\
         U_1,2024-03-05 10:15:00,SUB_1,T01,VOICE,CELL_1,120,0,1,3.5\n\
         U_2,2024-03-06 11:00:00,SUB_UNKNOWN,T01,VOICE,CELL_1,60,0,1,1.2\n\
         U_3,2024-03-07 12:30:00,SUB_2,,DATA,,0,15.25,15.25,4.75\n",
    )?;
    fs::write(
        dir.join("billing.csv"),
        "billing_id,op_ts,subscriber_id,tariff_code,amount,charge_type,description\n\
         B_1,2024-03-05 09:00:00,SUB_1,T01,450.0,monthly_fee,Monthly subscription fee\n",
    )?;
    fs::write(
        dir.join("payments.csv"),
        "payment_id,payment_ts,subscriber_id,channel_code,amount,payment_method,status\n\
         P_1,2024-03-06 08:05:00,SUB_1,CH1,500.0,card,SUCCESS\n\
         P_2,2024-03-06 08:10:00,SUB_2,CH_UNKNOWN,300.0,cash,SUCCESS\n",
    )?;
    fs::write(
        dir.join("network_kpi.csv"),
        "kpi_id,kpi_ts,cell_id,traffic_mb,call_attempts,call_successes,call_drops\n\
         K_1,2024-03-05 10:00:00,CELL_1,820.5,200,190,5\n\
         K_2,2024-03-06 03:00:00,CELL_1,0,0,0,0\n",
    )?;
    Ok(())
}

#[test]
fn test_full_run_loads_star_schema() -> Result<()> {
    let data_dir = tempdir()?;
    write_fixture(data_dir.path())?;

    let mut warehouse = Warehouse::open_in_memory()?;
    let result = Pipeline::run(&mut warehouse, data_dir.path())?;

    // Calendar spans exactly the observed 2024-03-05..07 range, contiguously.
    assert_eq!(result.calendar_days, 3);
    let date_keys: Vec<i64> = {
        let mut stmt = warehouse
            .connection()
            .prepare("SELECT date_key FROM dim_date ORDER BY date_key")?;
        let keys = stmt.query_map([], |r| r.get(0))?;
        keys.collect::<std::result::Result<_, _>>()?
    };
    assert_eq!(date_keys, vec![20240305, 20240306, 20240307]);
    let weekend_days: i64 = warehouse.connection().query_row(
        "SELECT COUNT(*) FROM dim_date WHERE is_weekend = 1",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(weekend_days, 0, "Tue..Thu are not weekend days");

    // Geography dedup: (X,A,A) twice plus (X,B,B) collapse to two rows.
    let geo_rows: i64 =
        warehouse
            .connection()
            .query_row("SELECT COUNT(*) FROM dim_geo", [], |r| r.get(0))?;
    assert_eq!(geo_rows, 2);

    // Upsert overwrite: one T01 row carrying the last staged name.
    let (tariff_rows, tariff_name): (i64, String) = warehouse.connection().query_row(
        "SELECT COUNT(*), MAX(tariff_name) FROM dim_tariff WHERE tariff_code = 'T01'",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!(tariff_rows, 1);
    assert_eq!(tariff_name, "New Name");

    // Required-reference drop: the SUB_UNKNOWN event is silently excluded.
    assert_eq!(result.facts.usage, 2);
    assert_eq!(result.dropped.usage, 1);

    // Optional-reference null: U_3 loads with NULL tariff and cell keys.
    let null_ref_rows: i64 = warehouse.connection().query_row(
        "SELECT COUNT(*) FROM fact_usage WHERE tariff_key IS NULL AND cell_key IS NULL",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(null_ref_rows, 1);

    // Payment through an unknown channel still loads, with a NULL channel.
    assert_eq!(result.facts.payment, 2);
    let null_channel_rows: i64 = warehouse.connection().query_row(
        "SELECT COUNT(*) FROM fact_payment WHERE channel_key IS NULL",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(null_channel_rows, 1);

    // Ratio guard: 200 attempts -> 95.00 / 2.50, zero attempts -> NULL.
    let (success_ratio, drop_ratio): (f64, f64) = warehouse.connection().query_row(
        "SELECT success_ratio, drop_ratio FROM fact_network_kpi WHERE call_attempts = 200",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!(success_ratio, 95.0);
    assert_eq!(drop_ratio, 2.5);
    let (null_success, null_drop): (Option<f64>, Option<f64>) = warehouse.connection().query_row(
        "SELECT success_ratio, drop_ratio FROM fact_network_kpi WHERE call_attempts = 0",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!(null_success, None);
    assert_eq!(null_drop, None);

    assert_eq!(result.facts.billing, 1);
    assert_eq!(result.facts.network_kpi, 2);
    Ok(())
}

#[test]
fn test_rerun_is_idempotent() -> Result<()> {
    let data_dir = tempdir()?;
    write_fixture(data_dir.path())?;

    let mut warehouse = Warehouse::open_in_memory()?;
    let first = Pipeline::run(&mut warehouse, data_dir.path())?;
    let second = Pipeline::run(&mut warehouse, data_dir.path())?;

    assert_eq!(first.facts, second.facts);
    assert_eq!(first.calendar_days, second.calendar_days);
    assert_eq!(first.clock_rows, second.clock_rows);

    // Natural-key coverage is unchanged; no residue accumulates across runs.
    let subscriber_ids: Vec<String> = {
        let mut stmt = warehouse
            .connection()
            .prepare("SELECT subscriber_id FROM dim_subscriber ORDER BY subscriber_id")?;
        let ids = stmt.query_map([], |r| r.get(0))?;
        ids.collect::<std::result::Result<_, _>>()?
    };
    assert_eq!(subscriber_ids, vec!["SUB_1", "SUB_2", "SUB_3"]);
    let geo_rows: i64 =
        warehouse
            .connection()
            .query_row("SELECT COUNT(*) FROM dim_geo", [], |r| r.get(0))?;
    assert_eq!(geo_rows, 2);
    Ok(())
}

#[test]
fn test_missing_source_aborts_before_any_mutation() -> Result<()> {
    let data_dir = tempdir()?;
    write_fixture(data_dir.path())?;
    fs::remove_file(data_dir.path().join("payments.csv"))?;

    let mut warehouse = Warehouse::open_in_memory()?;
    warehouse.ensure_schema()?;
    warehouse.connection().execute(
        "INSERT INTO dim_tariff (tariff_code, tariff_name) VALUES ('KEEP', 'Prior state')",
        [],
    )?;

    let err = Pipeline::run(&mut warehouse, data_dir.path()).unwrap_err();
    assert!(err.to_string().contains("payments.csv"));

    // The failed run must not have reset the warehouse.
    let prior_rows: i64 = warehouse.connection().query_row(
        "SELECT COUNT(*) FROM dim_tariff WHERE tariff_code = 'KEEP'",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(prior_rows, 1);
    Ok(())
}

#[test]
fn test_empty_event_sources_still_produce_calendar() -> Result<()> {
    let data_dir = tempdir()?;
    write_fixture(data_dir.path())?;
    // Strip every event source down to its header, and drop the subscriber
    // activation dates that would otherwise pin the observed range.
    fs::write(
        data_dir.path().join("subscribers.csv"),
        "subscriber_id,msisdn,customer_type,segment,status,activation_date,deactivation_date,country,region,city\n",
    )?;
    for (file, header) in [
        ("usage.csv", "event_id,event_ts,subscriber_id,tariff_code,service_code,cell_id,call_duration_sec,traffic_mb,units,revenue_amount"),
        ("billing.csv", "billing_id,op_ts,subscriber_id,tariff_code,amount,charge_type,description"),
        ("payments.csv", "payment_id,payment_ts,subscriber_id,channel_code,amount,payment_method,status"),
        ("network_kpi.csv", "kpi_id,kpi_ts,cell_id,traffic_mb,call_attempts,call_successes,call_drops"),
    ] {
        fs::write(data_dir.path().join(file), format!("{header}\n"))?;
    }

    let mut warehouse = Warehouse::open_in_memory()?;
    let result = Pipeline::run(&mut warehouse, data_dir.path())?;

    // Fallback calendar: 2024-01-01 .. 2026-12-31 inclusive.
    assert_eq!(result.calendar_days, 1096);
    assert_eq!(result.clock_rows, 0);
    assert_eq!(result.facts, Default::default());
    Ok(())
}
