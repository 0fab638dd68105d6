//! List command - show registered fonts

use crate::cache::format_bytes;
use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::error::FontDepotResult;
use crate::registry::FontStyle;
use crate::service::{FontListing, FontService};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the list command
pub async fn execute(args: ListArgs, config: &Config) -> FontDepotResult<()> {
    let service = FontService::open(config.clone()).await?;
    let listing = service.list_fonts();

    if listing.fonts.is_empty() {
        match args.format {
            OutputFormat::Json => print_json(&listing)?,
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(
                    &ctx,
                    &format!("No fonts in {}", service.registry().font_dir().display()),
                );
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&listing),
        OutputFormat::Json => print_json(&listing)?,
        OutputFormat::Plain => print_plain(&listing),
    }

    Ok(())
}

fn print_table(listing: &FontListing) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Fonts");

    println!(
        "{:<28} {:<8} {:<8} {:<10} {:<36}",
        style("FAMILY").bold(),
        style("WEIGHT").bold(),
        style("STYLE").bold(),
        style("SIZE").bold(),
        style("FILE").bold()
    );
    println!("{}", "-".repeat(90));

    for font in &listing.fonts {
        let font_style = match font.style {
            FontStyle::Normal => style("normal").dim(),
            FontStyle::Italic => style("italic").cyan(),
        };
        println!(
            "{:<28} {:<8} {:<8} {:<10} {:<36}",
            font.name,
            font.weight,
            font_style,
            format_bytes(font.size),
            font.filename
        );
    }

    println!();
    println!("{} font(s)", listing.count);
}

fn print_json(listing: &FontListing) -> FontDepotResult<()> {
    let json = serde_json::to_string_pretty(listing)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(listing: &FontListing) {
    for font in &listing.fonts {
        println!("{}", font.filename);
    }
}
