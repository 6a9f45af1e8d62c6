//! Link presenter: renders the fixed event URL as a scannable code.
//!
//! Pure functions of the input URL and viewport width; no state, no I/O.

use anyhow::{Context, Result};
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};

/// Physical rendering size for a small viewport (phones)
const SIZE_SMALL: u32 = 192;
/// Physical rendering size for a medium viewport (tablets)
const SIZE_MEDIUM: u32 = 256;
/// Physical rendering size for a wide viewport
const SIZE_LARGE: u32 = 320;

/// Pick the rendering size for the available viewport width.
/// Three tiers: below 640px, below 1024px, and everything wider.
pub fn size_tier(viewport_width: u32) -> u32 {
    if viewport_width < 640 {
        SIZE_SMALL
    } else if viewport_width < 1024 {
        SIZE_MEDIUM
    } else {
        SIZE_LARGE
    }
}

/// Render the URL as an SVG QR code at the given pixel size.
/// Error correction level H so the code survives print and screen glare.
pub fn render_svg(url: &str, pixels: u32) -> Result<String> {
    let code = QrCode::with_error_correction_level(url.as_bytes(), EcLevel::H)
        .context("Failed to encode URL as QR code")?;

    let image = code
        .render::<svg::Color>()
        .min_dimensions(pixels, pixels)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();

    Ok(image)
}
