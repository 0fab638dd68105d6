//! Terminal output for the CLI
//!
//! Uses `cliclack` and `indicatif` on a TTY and falls back to plain,
//! prefix-tagged lines (`[OK]`, `[WARN]`, ...) in CI and pipes.
//!
//! # Example
//!
//! ```rust,ignore
//! use fontdepot::ui::{self, UiContext, WarmProgress};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "Warm-up");
//!
//! let mut progress = WarmProgress::new(&ctx, 12);
//! progress.on_item("Example 400 latin", None);
//! progress.finish();
//!
//! ui::outro_success(&ctx, "Cache is warm");
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, key_value_status, outro_error, outro_success, outro_warn, remark,
    step_info, step_ok_detail, step_warn_hint,
};
pub use progress::{TaskSpinner, WarmProgress};
pub use prompts::confirm;
pub use theme::{init_theme, FontDepotTheme};
