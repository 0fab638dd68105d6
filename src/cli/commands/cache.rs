//! Cache command - manage the subset cache

use crate::cache::{format_bytes, CacheEntry};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::FontDepotResult;
use crate::service::FontService;
use crate::ui::{self, UiContext};
use chrono::Utc;
use console::style;
use std::collections::HashSet;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> FontDepotResult<()> {
    let service = FontService::open(config.clone()).await?;

    match args.action {
        CacheAction::List { format } => list_entries(&service, format).await,
        CacheAction::Info => show_info(&service).await,
        CacheAction::Gc { days, dry_run } => gc_entries(&service, days, dry_run).await,
        CacheAction::Clear { yes } => clear_entries(&service, yes).await,
    }
}

/// List cached subsets
async fn list_entries(service: &FontService, format: OutputFormat) -> FontDepotResult<()> {
    let entries = service.cache_entries().await?;
    let live = service.registry().live_checksums();

    if entries.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => println!("No cached subsets found."),
        }
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_entry_table(&entries, &live),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key.file_name());
            }
        }
    }

    Ok(())
}

fn print_entry_table(entries: &[CacheEntry], live: &HashSet<String>) {
    println!(
        "{:<14} {:<24} {:<12} {:<14} {:<10} {:<8} {:<16}",
        "KEY", "FAMILY", "VARIANT", "SUBSET", "SIZE", "STATE", "BUILT"
    );
    println!("{}", "-".repeat(102));

    for entry in entries {
        let state = if entry.is_fresh(live) {
            style("fresh").green().to_string()
        } else {
            style("stale").yellow().to_string()
        };
        let variant = format!("{} {}", entry.provenance.weight, entry.provenance.style);

        println!(
            "{:<14} {:<24} {:<12} {:<14} {:<10} {:<8} {:<16}",
            entry.key.short(),
            entry.provenance.family,
            variant,
            entry.provenance.subset,
            format_bytes(entry.size),
            state,
            entry.built_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!();
    println!("Total: {} subset(s)", entries.len());
}

/// Show cache location and totals
async fn show_info(service: &FontService) -> FontDepotResult<()> {
    let ctx = UiContext::detect();
    let entries = service.cache_entries().await?;
    let live = service.registry().live_checksums();
    let stale = entries
        .iter()
        .filter(|e| !e.is_fresh(&live))
        .count();
    let total: u64 = entries.iter().map(|e| e.size).sum();

    ui::intro(&ctx, "Subset cache");
    ui::key_value(&ctx, "Fonts", &service.config().paths.font_dir.display().to_string());
    ui::key_value(&ctx, "Cache", &service.store().cache_dir().display().to_string());
    ui::key_value(&ctx, "Metadata", &service.store().meta_dir().display().to_string());
    ui::key_value(&ctx, "Subsets", &entries.len().to_string());
    ui::key_value(&ctx, "Size", &format_bytes(total));
    ui::key_value_status(&ctx, "Stale", &stale.to_string(), stale == 0);
    if stale > 0 {
        ui::remark(&ctx, "Run: fontdepot cache gc");
    }

    Ok(())
}

/// Garbage collect stale and old subsets
async fn gc_entries(service: &FontService, days: Option<u32>, dry_run: bool) -> FontDepotResult<()> {
    let report = service.gc(days, dry_run).await?;

    if report.removed.is_empty() && report.orphans == 0 {
        if report.busy > 0 {
            println!("{} subset(s) are being rebuilt; try again later.", report.busy);
        } else {
            println!("Nothing to collect.");
        }
        return Ok(());
    }

    let now = Utc::now();
    if !report.removed.is_empty() {
        println!("Found {} subset(s) to remove:", report.removed.len());
    }
    for entry in &report.removed {
        let age_days = (now - entry.built_at).num_days();
        println!(
            "  {} {} {} {} ({} days old)",
            style("•").red(),
            entry.key.short(),
            entry.provenance.family,
            entry.provenance.subset,
            age_days
        );
    }
    if report.orphans > 0 {
        println!("  {} {} leftover file(s)", style("•").red(), report.orphans);
    }

    if dry_run {
        println!();
        println!("Dry run - nothing removed.");
        return Ok(());
    }

    println!(
        "{} removed {} subset(s), freed {}",
        style("✓").green(),
        report.removed.len(),
        format_bytes(report.freed_bytes)
    );
    if report.busy > 0 {
        println!("  skipped {} subset(s) held by a running build", report.busy);
    }
    Ok(())
}

/// Clear every cached subset
async fn clear_entries(service: &FontService, yes: bool) -> FontDepotResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let entries = service.cache_entries().await?;

    if entries.is_empty() {
        println!("No cached subsets to clear.");
        return Ok(());
    }

    let prompt = format!("Remove {} cached subset(s)?", entries.len());
    if !ui::confirm(&ctx, &prompt, false).await? {
        println!("Aborted.");
        return Ok(());
    }

    let removed = service.store().clear().await?;
    println!("{} cleared {} subset(s)", style("✓").green(), removed);
    if removed < entries.len() {
        println!("  skipped {} subset(s) held by a running build", entries.len() - removed);
    }
    Ok(())
}
