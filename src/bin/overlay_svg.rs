//! overlay_svg - render detection overlays from a session snapshot
//!
//! Reads the JSON written by `detect_stream --snapshot-out`, picks one image,
//! projects its detections onto a container of the requested size and writes
//! the overlay as SVG.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

use detection_viewer::config::ViewerConfig;
use detection_viewer::overlay::{
    DualSurface, OverlayRenderer, Size, SurfaceKind, ViewMode,
};
use detection_viewer::ProcessedImage;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Session snapshot JSON.
    #[arg(long)]
    snapshot: PathBuf,
    /// File name of the image to render (default: first image).
    #[arg(long)]
    image: Option<String>,
    /// Natural size of the processed image as WxH (default: read it from the image).
    #[arg(long, value_parser = parse_size)]
    natural: Option<Size>,
    /// Container size as WxH.
    #[arg(long, default_value = "800x600", value_parser = parse_size)]
    container: Size,
    /// View mode (original|processed|split).
    #[arg(long, default_value = "processed")]
    mode: ViewMode,
    /// Divider position in percent for split mode.
    #[arg(long, default_value_t = 50.0)]
    split: f64,
    /// Only draw detections of this category.
    #[arg(long)]
    category: Option<String>,
    /// Do not draw segmentation masks.
    #[arg(long)]
    no_masks: bool,
    /// Output SVG path.
    #[arg(long, default_value = "overlay.svg")]
    out: PathBuf,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Deserialize)]
struct SnapshotFile {
    images: Vec<ProcessedImage>,
}

fn parse_size(value: &str) -> Result<Size> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WxH, got {}", value))?;
    let width: f64 = w.trim().parse().map_err(|_| anyhow!("bad width in {}", value))?;
    let height: f64 = h.trim().parse().map_err(|_| anyhow!("bad height in {}", value))?;
    Ok(Size::new(width, height))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui));
    let config = ViewerConfig::load()?;

    let raw = std::fs::read_to_string(&args.snapshot)
        .with_context(|| format!("read snapshot {}", args.snapshot.display()))?;
    let snapshot: SnapshotFile = serde_json::from_str(&raw)
        .with_context(|| format!("parse snapshot {}", args.snapshot.display()))?;
    let image = match &args.image {
        Some(name) => snapshot
            .images
            .iter()
            .find(|img| &img.file_name == name)
            .ok_or_else(|| anyhow!("image {} not in snapshot", name))?,
        None => snapshot
            .images
            .first()
            .ok_or_else(|| anyhow!("snapshot has no images"))?,
    };

    let mut surface = DualSurface::new(args.container);
    surface.set_mode(args.mode);
    surface.set_split_position(args.split);
    {
        let mut stage = ui.stage("Loading processed image");
        match args.natural {
            Some(natural) => {
                surface.image_loaded(SurfaceKind::Processed, natural);
            }
            None => {
                surface.load(SurfaceKind::Processed, &image.processed_url);
            }
        }
        if let Some(message) = surface.error_message(SurfaceKind::Processed) {
            stage.fail(message);
            return Err(anyhow!("{} ({})", message, image.processed_url));
        }
    }
    let view = surface
        .view_state()
        .ok_or_else(|| anyhow!("container size is not measured"))?;

    let mut options = config.overlay_options();
    if args.no_masks {
        options.show_masks = false;
    }
    let mut renderer = OverlayRenderer::new(options);
    renderer.select_category(args.category.clone());
    let scene = renderer.render(&view, image);
    if scene.is_empty() {
        log::warn!("overlay for {} is empty", image.file_name);
    }

    std::fs::write(&args.out, scene.to_svg())
        .with_context(|| format!("write overlay {}", args.out.display()))?;
    log::info!(
        "overlay for {} ({} elements) written to {}",
        image.file_name,
        scene.elements.len(),
        args.out.display()
    );
    Ok(())
}
