//! Css command - render @font-face rules

use crate::cli::args::CssArgs;
use crate::config::Config;
use crate::css::CssRequest;
use crate::error::{FontDepotError, FontDepotResult};
use crate::service::FontService;
use console::style;
use tokio::fs;

/// Execute the css command
pub async fn execute(args: CssArgs, config: &Config) -> FontDepotResult<()> {
    let request = CssRequest::parse(
        &args.families,
        args.subset.as_deref(),
        args.unicode_range.as_deref(),
        args.display.as_deref(),
        &config.css.default_display,
    )?;

    let service = FontService::open(config.clone()).await?;
    let output = service.css(&request).await?;

    // stdout carries the stylesheet only
    for warning in &output.warnings {
        eprintln!("{} {}", style("Warning:").yellow(), warning);
    }

    match args.output {
        Some(path) => {
            fs::write(&path, &output.css)
                .await
                .map_err(|e| FontDepotError::io(format!("writing {}", path.display()), e))?;
            eprintln!("{} Wrote {}", style("✓").green(), path.display());
        }
        None => print!("{}", output.css),
    }

    Ok(())
}
