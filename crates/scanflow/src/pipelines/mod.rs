//! Built-in pipeline registry.
//!
//! Pipelines are registered by name; the run record stores the name and
//! the registry resolves it again at execution time.

use crate::pipeline::Pipeline;

pub mod scan_inventory;

/// Resolve a pipeline by name.
pub fn get_pipeline(name: &str) -> Option<Pipeline> {
    match name {
        scan_inventory::NAME => Some(scan_inventory::pipeline()),
        _ => None,
    }
}

/// Names of all registered pipelines.
pub fn pipeline_names() -> &'static [&'static str] {
    &[scan_inventory::NAME]
}

/// A pipeline's documentation string, independent of execution.
pub fn get_pipeline_doc(name: &str) -> Option<&'static str> {
    get_pipeline(name).map(|pipeline| pipeline.description)
}
