//! Demo: water tracker on the file store
//!
//! Two store handles open the same directory, standing in for two processes.
//! One adds water; the other sees the change after `refresh()`.
//!
//! Run with: cargo run --example water_tracker

use eyre::Result;
use lifetrack::trackers::{DEFAULT_WATER_GOAL, WATER_QUICK_AMOUNTS, WaterDay, add_water, parse_date, water_path};
use lifetrack::{CollectionSync, FileStore, LiveDocument};
use std::sync::Arc;

fn main() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;

    println!("lifetrack Water Tracker Demo");
    println!("============================\n");
    println!("Store path: {}\n", temp_dir.path().display());

    let writer = CollectionSync::new(Arc::new(FileStore::open(temp_dir.path())?));
    let reader = CollectionSync::new(Arc::new(FileStore::open(temp_dir.path())?));

    let date = parse_date("2024-01-01")?;
    let path = water_path(date);

    let mut day: LiveDocument<WaterDay> = reader.subscribe_document(&path)?;
    day.poll();
    println!("1. Before any water: {:?}", day.value());

    for amount in WATER_QUICK_AMOUNTS {
        let total = add_water(&writer, date, amount, DEFAULT_WATER_GOAL)?;
        println!("   +{} ml -> {} / {} ml", amount, total.water, total.goal);
    }

    // The reader's handle only learns about the other handle's writes on refresh
    day.poll();
    println!("\n2. Reader before refresh: {:?}", day.value());
    reader.refresh()?;
    day.poll();
    println!("   Reader after refresh:  {:?}", day.value());

    // Adding past the goal caps at the goal
    let full = add_water(&writer, date, 5000, DEFAULT_WATER_GOAL)?;
    println!("\n3. +5000 ml -> {} / {} ml (goal reached: {})", full.water, full.goal, full.reached_goal());

    reader.refresh()?;
    day.poll();
    if let Some(value) = day.value() {
        println!("   Reader progress: {:.0}%", value.progress() * 100.0);
    }

    Ok(())
}
