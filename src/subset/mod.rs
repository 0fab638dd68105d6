//! Font subsetting
//!
//! The catalog names the subsets, the builder produces them. Everything in
//! here is synchronous and CPU-bound; the coordinator decides where it runs.

pub mod builder;
pub mod catalog;
pub mod cff;
pub mod closure;
pub mod sfnt;
pub mod woff2;

pub use builder::{BuildInput, BuiltSubset, SubsetBuild, SubsetBuilder, BUILDER_VERSION};
pub use catalog::{
    CodepointRange, SubsetCatalog, SubsetDef, SubsetSpec, UnicodeRanges, CATALOG_VERSION,
};
