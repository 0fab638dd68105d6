//! Warm command - build every subset ahead of time

use crate::cli::args::WarmArgs;
use crate::config::Config;
use crate::error::FontDepotResult;
use crate::service::{FontService, WarmOutcome};
use crate::ui::{self, TaskSpinner, UiContext, WarmProgress};

/// Execute the warm command
pub async fn execute(args: WarmArgs, config: &Config) -> FontDepotResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Warm-up");

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Scanning fonts...");
    let service = match FontService::open(config.clone()).await {
        Ok(service) => service,
        Err(e) => {
            spinner.stop_error("Scan failed");
            return Err(e);
        }
    };
    let plan = service.warm_plan()?;
    spinner.stop(&format!(
        "{} font(s), {} subset(s) to check",
        service.registry().len(),
        plan.len()
    ));

    if plan.is_empty() {
        ui::outro_warn(&ctx, "Nothing to build");
        return Ok(());
    }

    let mut progress = WarmProgress::new(&ctx, plan.len() as u64);
    let report = service
        .warm(plan, args.force, |request, outcome| {
            let label = format!(
                "{} {} {}",
                request.font.family,
                request.font.weight,
                request.subset.label()
            );
            match outcome {
                WarmOutcome::Failed(reason) => progress.on_item(&label, Some(reason)),
                WarmOutcome::Built | WarmOutcome::Cached => progress.on_item(&label, None),
            }
        })
        .await;
    progress.finish();

    ui::key_value(&ctx, "Built", &report.built.to_string());
    ui::key_value(&ctx, "Already cached", &report.cached.to_string());
    ui::key_value(&ctx, "Not covered", &report.skipped.to_string());

    if report.failed > 0 {
        ui::outro_error(&ctx, &format!("{} subset(s) failed", report.failed));
    } else {
        ui::outro_success(&ctx, "Cache is warm");
    }
    Ok(())
}
