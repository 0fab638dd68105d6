//! CLI command implementations

pub mod cache;
pub mod config;
pub mod css;
pub mod fetch;
pub mod list;
pub mod warm;

pub use cache::execute as cache;
pub use config::execute as config;
pub use css::execute as css;
pub use fetch::execute as fetch;
pub use list::execute as list;
pub use warm::execute as warm;
