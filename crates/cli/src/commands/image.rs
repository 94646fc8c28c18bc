//! `geoengine image import|list|remove`

use std::path::Path;
use std::process::ExitCode;

use chrono::DateTime;
use geoengine_core::build::{LOCAL_DEV_REGISTRY, LOCAL_REGISTRY};
use geoengine_core::runtime::ImageSummary;

use super::{print_json, short_hash};
use crate::cli::ImageCommand;
use crate::context::CliContext;

pub async fn image(ctx: &CliContext, command: ImageCommand) -> anyhow::Result<ExitCode> {
    match command {
        ImageCommand::Import { archive, tag } => {
            let loaded = import_archive(ctx, &archive, tag.as_deref()).await?;
            for reference in &loaded {
                println!("Imported {reference}");
            }
            if let Some(tag) = tag {
                println!("Tagged {tag}");
            }
        }
        ImageCommand::List { filter, all, json } => {
            let images = list_images(ctx, filter.as_deref(), all).await?;
            if json {
                print_json(&images)?;
            } else {
                print_table(&images);
            }
        }
        ImageCommand::Remove { image, force } => {
            ctx.runtime.remove_image(&image, force).await?;
            tracing::info!(%image, force, "Removed image");
            println!("Removed {image}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Load an image archive and optionally tag the first image it held.
pub async fn import_archive(
    ctx: &CliContext,
    archive: &Path,
    tag: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let archive = ctx.cwd.join(archive);
    if !archive.is_file() {
        anyhow::bail!("Image archive not found: {}", archive.display());
    }
    let loaded = ctx.runtime.import_image(&archive).await?;
    tracing::info!(archive = %archive.display(), images = ?loaded, "Imported image archive");
    if let (Some(tag), Some(first)) = (tag, loaded.first()) {
        ctx.runtime.tag_image(first, tag).await?;
    }
    Ok(loaded)
}

fn is_worker_tag(tag: &str) -> bool {
    [LOCAL_REGISTRY, LOCAL_DEV_REGISTRY]
        .iter()
        .any(|registry| tag.strip_prefix(registry).is_some_and(|rest| rest.starts_with('/')))
}

/// Local images, newest first. Without `all` only worker images are kept.
pub async fn list_images(
    ctx: &CliContext,
    filter: Option<&str>,
    all: bool,
) -> anyhow::Result<Vec<ImageSummary>> {
    let mut images: Vec<ImageSummary> = ctx
        .runtime
        .list_images()
        .await?
        .into_iter()
        .filter(|img| all || img.tags.iter().any(|t| is_worker_tag(t)))
        .filter(|img| filter.map_or(true, |f| img.tags.iter().any(|t| t.contains(f))))
        .collect();
    images.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.tags.cmp(&b.tags)));
    Ok(images)
}

fn print_table(images: &[ImageSummary]) {
    if images.is_empty() {
        println!("No images found");
        return;
    }
    println!("{:<50} {:<14} {:<10} CREATED", "REPOSITORY:TAG", "IMAGE ID", "SIZE");
    for image in images {
        let id = short_hash(image.id.strip_prefix("sha256:").unwrap_or(&image.id));
        let created = DateTime::from_timestamp(image.created, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        let tags: Vec<&str> = if image.tags.is_empty() {
            vec!["<none>"]
        } else {
            image.tags.iter().map(String::as_str).collect()
        };
        for tag in tags {
            println!("{tag:<50} {id:<14} {:<10} {created}", format_size(image.size));
        }
    }
}

fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes.max(0) as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{size:.1}{}", UNITS[unit])
    }
}
