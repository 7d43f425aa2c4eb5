//! Decoded image data

use std::path::Path;

use image::{ColorType, DynamicImage, GenericImageView};

use crate::error::{RendererError, RendererResult};

/// Raw texel storage of a decoded image
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    /// 8-bit unsigned components
    Ldr(Vec<u8>),
    /// 32-bit float components
    Hdr(Vec<f32>),
}

/// A decoded image: tightly packed rows, `channels` components per pixel
#[derive(Debug, Clone)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub is_hdr: bool,
    pub pixels: Pixels,
}

impl ImageData {
    /// Load an image file, forcing `channels` components per pixel (0 keeps the file's count)
    pub fn from_file<P: AsRef<Path>>(path: P, channels: u32) -> RendererResult<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|source| RendererError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_image(img, channels))
    }

    /// Decode an image already in memory
    pub fn from_image(img: DynamicImage, channels: u32) -> Self {
        let (width, height) = img.dimensions();
        let is_hdr = matches!(img.color(), ColorType::Rgb32F | ColorType::Rgba32F);
        let channels = match channels {
            0 => u32::from(img.color().channel_count()),
            n => n.clamp(1, 4),
        };

        let pixels = if is_hdr {
            let data = match channels {
                4 => img.to_rgba32f().into_raw(),
                3 => img.to_rgb32f().into_raw(),
                // Keep the first channels of RGB for 1/2 channel float requests
                n => img
                    .to_rgb32f()
                    .pixels()
                    .flat_map(|p| p.0.into_iter().take(n as usize))
                    .collect(),
            };
            Pixels::Hdr(data)
        } else {
            let data = match channels {
                1 => img.to_luma8().into_raw(),
                2 => img.to_luma_alpha8().into_raw(),
                3 => img.to_rgb8().into_raw(),
                _ => img.to_rgba8().into_raw(),
            };
            Pixels::Ldr(data)
        };

        Self {
            width,
            height,
            channels,
            is_hdr,
            pixels,
        }
    }

    /// Build an 8-bit image from raw components
    pub fn from_ldr(width: u32, height: u32, channels: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            is_hdr: false,
            pixels: Pixels::Ldr(data),
        }
    }

    /// Build a float image from raw components
    pub fn from_hdr(width: u32, height: u32, channels: u32, data: Vec<f32>) -> Self {
        Self {
            width,
            height,
            channels,
            is_hdr: true,
            pixels: Pixels::Hdr(data),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Component `c` of pixel `i` as a normalized float, or `None` past the stored channels
    pub fn component(&self, i: usize, c: u32) -> Option<f32> {
        if c >= self.channels {
            return None;
        }
        let index = i * self.channels as usize + c as usize;
        match &self.pixels {
            Pixels::Ldr(data) => data.get(index).map(|&v| f32::from(v) / 255.0),
            Pixels::Hdr(data) => data.get(index).copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_ldr_image_keeps_requested_channels() {
        let img = ImageBuffer::from_pixel(2, 2, Rgb([10u8, 20, 30]));
        let data = ImageData::from_image(DynamicImage::ImageRgb8(img), 1);
        assert_eq!(data.channels, 1);
        assert!(!data.is_hdr);
        match data.pixels {
            Pixels::Ldr(ref px) => assert_eq!(px.len(), 4),
            _ => panic!("expected 8-bit pixels"),
        }
    }

    #[test]
    fn test_float_image_is_hdr() {
        let img = ImageBuffer::from_pixel(3, 1, Rgb([1.5f32, 0.25, 8.0]));
        let data = ImageData::from_image(DynamicImage::ImageRgb32F(img), 3);
        assert!(data.is_hdr);
        assert_eq!(data.component(2, 2), Some(8.0));
        assert_eq!(data.component(0, 3), None);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = ImageData::from_file("does/not/exist.png", 3).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.png"));
    }
}
