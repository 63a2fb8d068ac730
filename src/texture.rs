use crate::compute::{ComputeBackend, TextureDesc, TextureHandle};
use crate::error::GpuError;
use anyhow::{Context, Result};
use std::path::Path;

pub const WHITE: [u8; 4] = [255, 255, 255, 255];
/// Tangent-space "straight up" normal.
pub const FLAT_NORMAL: [u8; 4] = [128, 128, 255, 255];

/// Decoded RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureData {
    pub fn solid(color: [u8; 4]) -> Self {
        Self { width: 1, height: 1, rgba: color.to_vec() }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to decode texture {}", path.display()))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Self { width, height, rgba: image.into_raw() })
    }

    /// Loads `path` if given, otherwise or on failure a 1x1 texel of `fallback`.
    pub fn load_or(path: Option<&Path>, fallback: [u8; 4]) -> Self {
        let Some(path) = path else { return Self::solid(fallback) };
        match Self::load(path) {
            Ok(texture) => texture,
            Err(err) => {
                log::warn!(target: "assets", "{err:#}; using a 1x1 default");
                Self::solid(fallback)
            }
        }
    }

    pub fn upload(&self, backend: &mut dyn ComputeBackend, label: &str) -> Result<TextureHandle, GpuError> {
        backend.create_texture(&TextureDesc { label, width: self.width, height: self.height, rgba: &self.rgba })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_solid_texel() {
        let texture = TextureData::load_or(Some(Path::new("assets/none.png")), FLAT_NORMAL);
        assert_eq!(texture, TextureData::solid(FLAT_NORMAL));
        assert_eq!(TextureData::load_or(None, WHITE).rgba, WHITE.to_vec());
    }

    #[test]
    fn decodes_png_to_rgba() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("pixel.png");
        image::RgbImage::from_pixel(2, 1, image::Rgb([10, 20, 30])).save(&path).expect("write png");
        let texture = TextureData::load(&path).expect("decode png");
        assert_eq!((texture.width, texture.height), (2, 1));
        assert_eq!(&texture.rgba[..4], &[10, 20, 30, 255]);
    }
}
