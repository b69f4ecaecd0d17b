//! Typed command catalog and sequential executor.
//!
//! [`model::Command`] is the validated action vocabulary; the
//! [`catalog::CommandCatalog`] maps names to handlers, schemas and
//! capability descriptors; the [`executor::CommandExecutor`] runs batches
//! with the sequence-termination contract the planner is prompted with.

pub mod catalog;
pub mod context;
pub mod errors;
pub mod executor;
pub mod handlers;
pub mod masking;
pub mod model;

pub use catalog::{
    default_catalog, default_catalog_with, CatalogBuilder, CatalogEntry, CommandCatalog,
    CommandHandler,
};
pub use context::{CommandNeeds, ExecutionContext, ExtractionModel};
pub use errors::CommandError;
pub use executor::CommandExecutor;
pub use model::{Command, CommandResult, ScrollDirection};
