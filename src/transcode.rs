use crate::error::ConvertError;
use image::ImageFormat;
use std::io::{Cursor, ErrorKind};
use std::path::Path;
use std::process::Command;

/// Formats the vision service accepts without conversion.
pub fn is_vision_native(ext: &str) -> bool {
    matches!(ext, "png" | "jpg" | "jpeg" | "gif" | "webp")
}

/// Width and height of a raster image, when the header can be read.
pub fn image_dimensions(path: &Path) -> Option<(u32, u32)> {
    image::image_dimensions(path).ok()
}

/// Decode any raster format the `image` crate understands and re-encode it as PNG.
pub fn reencode_png(path: &Path) -> Result<Vec<u8>, ConvertError> {
    let img = image::open(path).map_err(|e| ConvertError::Conversion(e.to_string()))?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ConvertError::Conversion(e.to_string()))?;
    Ok(out.into_inner())
}

/// Turns an image the vision service cannot take directly into one it can.
pub trait ImageTranscoder: Send + Sync {
    fn transcode(&self, path: &Path) -> Result<Vec<u8>, ConvertError>;
}

/// SVG goes through `rsvg-convert`, HEIC/HEIF through `sips` on macOS or
/// `heif-convert` elsewhere, and other rasters through the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolTranscoder;

impl ImageTranscoder for ToolTranscoder {
    fn transcode(&self, path: &Path) -> Result<Vec<u8>, ConvertError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "svg" => svg_to_png(path),
            "heic" | "heif" => heic_to_jpeg(path),
            _ => reencode_png(path),
        }
    }
}

fn run_tool(cmd: &mut Command, tool: &str) -> Result<Vec<u8>, ConvertError> {
    let output = cmd.output().map_err(|e| match e.kind() {
        ErrorKind::NotFound => ConvertError::Unavailable(format!("{} is not installed", tool)),
        _ => ConvertError::Io(e.to_string()),
    })?;
    if !output.status.success() {
        return Err(ConvertError::Conversion(format!(
            "{} failed: {}",
            tool,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

fn svg_to_png(path: &Path) -> Result<Vec<u8>, ConvertError> {
    let bytes = run_tool(
        Command::new("rsvg-convert").arg("--format=png").arg(path),
        "rsvg-convert",
    )?;
    if bytes.is_empty() {
        return Err(ConvertError::Conversion("rsvg-convert produced no output".into()));
    }
    Ok(bytes)
}

fn heic_to_jpeg(path: &Path) -> Result<Vec<u8>, ConvertError> {
    let out = tempfile::Builder::new().suffix(".jpg").tempfile()?;

    let result = if cfg!(target_os = "macos") {
        run_tool(
            Command::new("sips")
                .args(["-s", "format", "jpeg"])
                .arg(path)
                .arg("--out")
                .arg(out.path()),
            "sips",
        )
    } else {
        run_tool(
            Command::new("heif-convert").arg(path).arg(out.path()),
            "heif-convert",
        )
    };
    result?;

    let bytes = std::fs::read(out.path())?;
    if bytes.is_empty() {
        return Err(ConvertError::Conversion("HEIC conversion produced no output".into()));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    #[test]
    fn native_formats() {
        assert!(is_vision_native("png"));
        assert!(is_vision_native("jpeg"));
        assert!(!is_vision_native("svg"));
        assert!(!is_vision_native("heic"));
    }

    #[test]
    fn bmp_is_reencoded_as_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dot.bmp");
        ImageBuffer::from_pixel(3, 2, Rgb([255u8, 0, 0]))
            .save(&path)
            .unwrap();

        assert_eq!(image_dimensions(&path), Some((3, 2)));
        let png = ToolTranscoder.transcode(&path).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }

    #[test]
    fn unreadable_image_is_conversion_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.tiff");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(image_dimensions(&path).is_none());
        assert!(matches!(
            ToolTranscoder.transcode(&path),
            Err(ConvertError::Conversion(_))
        ));
    }
}
