use anyhow::{Context, Result};
use std::path::Path;

use poolbroker::models::PoolSnapshot;
use poolbroker::pool::Aggregator;

use super::load_config;

/// Run one aggregation cycle and print the result
pub async fn snapshot(config_path: Option<&Path>, limit: Option<usize>, json: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(limit) = limit {
        config.pool.target_total = limit;
    }
    config.validate()?;

    let aggregator = Aggregator::from_config(&config).context("Failed to build upstream clients")?;
    let collection = aggregator
        .collect(config.pool.pages_per_source, config.pool.target_total)
        .await?;
    let snapshot = PoolSnapshot::new(collection.items, collection.report);

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Snapshot generated at {}", snapshot.generated_at);
    println!("{:-<60}", "");
    for (name, outcome) in &snapshot.source_report {
        match (&outcome.error, outcome.count) {
            (Some(error), _) => println!("  {name:<20} FAILED  {error}"),
            (None, count) => println!("  {name:<20} ok      {} records", count.unwrap_or(0)),
        }
    }
    println!("{:-<60}", "");
    println!("{} instances (target {})", snapshot.len(), config.pool.target_total);

    for record in snapshot.items.iter().take(20) {
        println!(
            "  {:<40} {:>4}/{:<4} free {}",
            record.id,
            record.occupancy,
            record.capacity,
            record.free_slots()
        );
    }
    if snapshot.len() > 20 {
        println!("  ... and {} more (use --json for the full list)", snapshot.len() - 20);
    }

    Ok(())
}
