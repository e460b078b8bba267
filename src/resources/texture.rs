//! CPU texture data and upload

use crate::backend::traits::*;
use crate::backend::types::*;

/// Texel data for a 2D texture or a cubemap
#[derive(Debug, Clone)]
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub kind: TextureKind,
    /// One tightly packed buffer per layer
    pub layers: Vec<Vec<u8>>,
}

impl TextureData {
    /// Create a solid color 1x1 texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            name: name.to_string(),
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            kind: TextureKind::D2,
            layers: vec![color.to_vec()],
        }
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// Flat tangent-space normal (0, 0, 1)
    pub fn default_normal() -> Self {
        Self::solid_color([128, 128, 255, 255], "default_normal")
    }

    /// Create a checkerboard texture with 8 texel squares
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let color = if ((x / 8) + (y / 8)) % 2 == 0 { color1 } else { color2 };
                data.extend_from_slice(&color);
            }
        }
        Self {
            name: "checkerboard".to_string(),
            width: size,
            height: size,
            format: TextureFormat::Rgba8Unorm,
            kind: TextureKind::D2,
            layers: vec![data],
        }
    }

    /// Cubemap with one solid color per face (+X, -X, +Y, -Y, +Z, -Z)
    pub fn cubemap(size: u32, faces: [[u8; 4]; 6], name: &str) -> Self {
        let texels = (size * size) as usize;
        Self {
            name: name.to_string(),
            width: size,
            height: size,
            format: TextureFormat::Rgba8Unorm,
            kind: TextureKind::Cube,
            layers: faces.iter().map(|color| color.repeat(texels)).collect(),
        }
    }

    /// Vertical sky gradient: bright horizon faces, `zenith` up, `ground` down
    pub fn sky(size: u32, zenith: [u8; 4], horizon: [u8; 4], ground: [u8; 4]) -> Self {
        Self::cubemap(size, [horizon, horizon, zenith, ground, horizon, horizon], "sky")
    }

    /// Create the texture on the device and upload every layer
    pub fn upload(&self, device: &mut dyn GraphicsDevice) -> BackendResult<TextureHandle> {
        let handle = device.create_texture(&TextureDescriptor {
            label: Some(self.name.clone()),
            width: self.width,
            height: self.height,
            kind: self.kind,
            mip_levels: 1,
            format: self.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;
        for (layer, data) in self.layers.iter().enumerate() {
            device.write_texture(handle, layer as u32, data);
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessDevice;

    #[test]
    fn test_cubemap_upload_fills_every_face() {
        let mut device = HeadlessDevice::new(4, 4);
        let data = TextureData::sky(2, [0, 0, 255, 255], [255, 255, 255, 255], [0, 255, 0, 255]);
        let cube = data.upload(&mut device).unwrap();

        assert_eq!(device.texture_descriptor(cube).unwrap().kind, TextureKind::Cube);
        assert_eq!(device.texel(cube, 2, 1, 1), Some([0.0, 0.0, 1.0, 1.0]));
        assert_eq!(device.texel(cube, 3, 0, 0), Some([0.0, 1.0, 0.0, 1.0]));
    }
}
