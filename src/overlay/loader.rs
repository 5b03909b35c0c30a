use anyhow::{anyhow, Context, Result};
use image::GenericImageView;
use std::io::Read;
use std::path::Path;

use super::transform::Size;

/// Natural pixel size of the image behind `locator`.
///
/// `http://` and `https://` locators are fetched and decoded; anything else is
/// treated as a local path and only the header is read.
pub fn load_dimensions(locator: &str) -> Result<Size> {
    let (width, height) = if is_remote(locator) {
        let bytes = fetch_image(locator)?;
        let image = image::load_from_memory(&bytes)
            .with_context(|| format!("decode image from {}", locator))?;
        image.dimensions()
    } else {
        image::image_dimensions(Path::new(locator))
            .with_context(|| format!("read image dimensions of {}", locator))?
    };
    if width == 0 || height == 0 {
        return Err(anyhow!("image {} has zero natural size", locator));
    }
    log::debug!("image {} is {}x{}", locator, width, height);
    Ok(Size::new(width as f64, height as f64))
}

fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

fn fetch_image(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch image from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .context("read image body")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty image body from {}", url));
    }
    Ok(bytes)
}
