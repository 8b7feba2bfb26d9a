//! Load a files-and-packages inventory from JSON scan documents.

use anyhow::{bail, Context};
use serde_json::Value;
use std::fs;
use std::io::BufReader;
use tracing::{info, warn};

use scanflow_db::{CodebaseResource, JsonMap, ResourceType, SaveOutcome};

use crate::pipeline::{Pipeline, RunContext, Step, StepFuture};

pub const NAME: &str = "scan_inventory";

const DESCRIPTION: &str = "Load a files and packages inventory from JSON scan \
documents found in the project input directory.";

/// Resource record fields an importer may provide directly, in addition to
/// the scan fields applied through `set_scan_results`.
const RESOURCE_INFO_FIELDS: &[&str] = &[
    "rootfs_path",
    "status",
    "programming_language",
    "mime_type",
    "file_type",
];

pub fn pipeline() -> Pipeline {
    Pipeline {
        name: NAME,
        description: DESCRIPTION,
        steps: vec![
            Step { name: "start", func: start },
            Step { name: "build_inventory", func: build_inventory },
            Step { name: "end", func: end },
        ],
    }
}

/// Verify the workspace layout and that scan input is present.
fn start(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.workdir.setup()?;

        let inputs = ctx.workdir.input_files()?;
        if inputs.is_empty() {
            bail!(
                "No input files in {}",
                ctx.workdir.input_path().display()
            );
        }
        info!(project = %ctx.project.name, inputs = inputs.len(), "scan inventory starting");
        Ok(())
    })
}

/// Process every JSON scan document into resource and package records.
fn build_inventory(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let input_path = ctx.workdir.input_path();
        let mut totals = IngestCounts::default();

        for rel_path in ctx.workdir.input_files()? {
            if !rel_path.ends_with(".json") {
                continue;
            }
            let location = input_path.join(&rel_path);
            let file = fs::File::open(&location)
                .with_context(|| format!("Failed to open {}", location.display()))?;
            let document: Value = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Invalid JSON scan document: {}", rel_path))?;

            let counts = ingest_scan_document(ctx, &document).await?;
            info!(
                input = %rel_path,
                resources = counts.resources,
                packages = counts.packages,
                "scan document ingested"
            );
            totals.add(&counts);
        }

        ctx.db
            .append_task_output(
                &ctx.run.uuid,
                &format!(
                    "Imported {} resources and {} packages\n",
                    totals.resources, totals.packages
                ),
            )
            .await?;
        Ok(())
    })
}

/// Record inventory totals on the project.
fn end(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        let resources = ctx.db.list_resources(&ctx.project.uuid).await?.len();
        let packages = ctx.db.list_packages(&ctx.project.uuid).await?.len();

        let mut extra_data = ctx.project.extra_data.clone();
        extra_data.insert("resource_count".to_string(), resources.into());
        extra_data.insert("package_count".to_string(), packages.into());
        ctx.db
            .update_project_extra_data(&ctx.project.uuid, &extra_data)
            .await?;
        ctx.project.extra_data = extra_data;

        info!(project = %ctx.project.name, resources, packages, "inventory loaded");
        Ok(())
    })
}

#[derive(Default)]
struct IngestCounts {
    resources: usize,
    packages: usize,
}

impl IngestCounts {
    fn add(&mut self, other: &IngestCounts) {
        self.resources += other.resources;
        self.packages += other.packages;
    }
}

/// Ingest one scan document: a `files` array of per-resource mappings
/// (optionally carrying nested `packages`) and a top-level `packages`
/// array of package-URL-shaped mappings.
async fn ingest_scan_document(
    ctx: &RunContext,
    document: &Value,
) -> anyhow::Result<IngestCounts> {
    let mut counts = IngestCounts::default();
    let empty = Vec::new();

    let files = document
        .get("files")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    for entry in files {
        let Some(mapping) = entry.as_object() else {
            continue;
        };
        let Some(path) = mapping.get("path").and_then(Value::as_str) else {
            warn!("Skipping file entry without a path");
            continue;
        };

        let resource_type = mapping
            .get("type")
            .and_then(Value::as_str)
            .and_then(ResourceType::parse)
            .unwrap_or(ResourceType::File);

        let mut resource = CodebaseResource::new(&ctx.project.uuid, path, resource_type);
        apply_resource_info(&mut resource, mapping);
        resource.set_scan_results(mapping);

        // A failed write is recorded as a ProjectError; the import goes on
        if ctx.db.save_resource(&mut resource).await? == SaveOutcome::Saved {
            counts.resources += 1;
        }

        let nested = mapping
            .get("packages")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        for package_entry in nested {
            let Some(package_data) = package_entry.as_object() else {
                continue;
            };
            if resource.id.is_none() {
                break;
            }
            ctx.db
                .create_package_for_resource(package_data.clone(), &resource)
                .await?;
            counts.packages += 1;
        }
    }

    let packages = document
        .get("packages")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    for package_entry in packages {
        let Some(package_data) = package_entry.as_object() else {
            continue;
        };
        ctx.db
            .create_package_from_data(&ctx.project.uuid, package_data.clone())
            .await?;
        counts.packages += 1;
    }

    Ok(counts)
}

fn apply_resource_info(resource: &mut CodebaseResource, mapping: &JsonMap) {
    for field_name in RESOURCE_INFO_FIELDS {
        let Some(value) = mapping.get(*field_name).and_then(Value::as_str) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        match *field_name {
            "rootfs_path" => resource.rootfs_path = value.to_string(),
            "status" => resource.status = value.to_string(),
            "programming_language" => resource.programming_language = value.to_string(),
            "mime_type" => resource.mime_type = value.to_string(),
            "file_type" => resource.file_type = value.to_string(),
            _ => {}
        }
    }
}
