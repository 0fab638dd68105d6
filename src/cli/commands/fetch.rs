//! Fetch command - copy a cached subset out of the cache

use crate::cache::format_bytes;
use crate::cli::args::FetchArgs;
use crate::config::Config;
use crate::error::{FontDepotError, FontDepotResult};
use crate::service::FontService;
use crate::ui::{self, UiContext};
use std::path::PathBuf;
use tokio::fs;

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> FontDepotResult<()> {
    let service = FontService::open(config.clone()).await?;
    let bytes = service.subset_bytes(&args.fingerprint).await?;

    let output = args.output.unwrap_or_else(|| {
        let name = args.fingerprint.trim_end_matches(".woff2");
        PathBuf::from(format!("{}.woff2", name))
    });
    fs::write(&output, &bytes)
        .await
        .map_err(|e| FontDepotError::io(format!("writing {}", output.display()), e))?;

    let ctx = UiContext::detect();
    ui::step_ok_detail(
        &ctx,
        &format!("Wrote {}", output.display()),
        &format_bytes(bytes.len() as u64),
    );
    Ok(())
}
