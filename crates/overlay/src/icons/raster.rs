//! Vector asset rasterization.

use std::path::Path;

use anyhow::Context;
use resvg::{tiny_skia, usvg};

/// CPU-side RGBA8 image, straight (non-premultiplied) alpha.
pub struct RasterIcon {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Rasterize an SVG at its intrinsic size (96 DPI).
pub fn rasterize_svg(path: &Path) -> anyhow::Result<RasterIcon> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read icon {}", path.display()))?;
    let tree = usvg::Tree::from_data(&data, &usvg::Options::default())
        .with_context(|| format!("failed to parse icon {}", path.display()))?;

    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .with_context(|| format!("icon {} has a zero-sized viewport", path.display()))?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    // The texture pipeline blends straight alpha.
    let mut rgba = Vec::with_capacity(pixmap.pixels().len() * 4);
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        rgba.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }

    Ok(RasterIcon {
        width: size.width(),
        height: size.height(),
        rgba,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rasterizes_at_intrinsic_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("square.svg");
        fs::write(
            &path,
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="16" height="16"><rect width="16" height="16" fill="#ff0000"/></svg>"##,
        )
        .unwrap();

        let icon = rasterize_svg(&path).unwrap();
        assert_eq!((icon.width, icon.height), (16, 16));
        assert_eq!(icon.rgba.len(), 16 * 16 * 4);
        // Solid red fill, opaque.
        assert_eq!(&icon.rgba[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn broken_svg_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.svg");
        fs::write(&path, "<svg").unwrap();
        assert!(rasterize_svg(&path).is_err());
    }
}
