//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    /// Create a new spinner (shows immediately in interactive mode)
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            // Plain output for CI
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else if self.interactive {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else if self.interactive {
            println!("{} {}", style("✗").red(), message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Progress bar for subset warm-up.
///
/// Shows an indicatif bar in interactive mode. In CI only failures are
/// printed, one line each.
pub struct WarmProgress {
    bar: Option<ProgressBar>,
    total: u64,
    done: u64,
}

impl WarmProgress {
    pub fn new(ctx: &UiContext, total: u64) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("  {spinner:.cyan} Building subsets  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                    .progress_chars("━╸─"),
            );
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            println!("Building {} subsets...", total);
            None
        };
        Self {
            bar,
            total,
            done: 0,
        }
    }

    /// Record one finished item. `failure` carries the reason if it failed.
    pub fn on_item(&mut self, label: &str, failure: Option<&str>) {
        self.done += 1;
        match (&self.bar, failure) {
            (Some(bar), None) => {
                bar.inc(1);
                bar.set_message(label.to_string());
            }
            (Some(bar), Some(reason)) => {
                bar.inc(1);
                bar.println(format!("  {} {}: {}", style("✗").red(), label, reason));
            }
            (None, Some(reason)) => {
                println!(
                    "  {} [{}/{}] {}: {}",
                    style("[FAIL]").red(),
                    self.done,
                    self.total,
                    label,
                    reason
                );
            }
            (None, None) => {}
        }
    }

    /// Finish and clear the progress bar.
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
