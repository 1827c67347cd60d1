//! Pixel access shared by the stereo and flow pipelines
//!
//! Every algorithm reads colors through [`ColorImage`], which reports channel
//! intensities in the full 16-bit range whatever the storage depth is. 8-bit
//! channels are widened by replication (`0xAB` becomes `0xABAB`); float
//! channels are clamped to `[0, 1]` and scaled.

use image::{DynamicImage, GenericImageView, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};

/// RGB image with 16 bits per channel
pub type Rgb16Image = ImageBuffer<Rgb<u16>, Vec<u16>>;

/// RGBA image with 16 bits per channel
pub type Rgba16Image = ImageBuffer<Rgba<u16>, Vec<u16>>;

/// Read-only color image queried per coordinate
pub trait ColorImage: Sync {
    /// `(width, height)` in pixels
    fn size(&self) -> (u32, u32);

    /// Red, green and blue intensity at `(x, y)`, each in `0..=u16::MAX`
    ///
    /// Callers keep `(x, y)` inside [`ColorImage::size`].
    fn rgb16(&self, x: u32, y: u32) -> [u16; 3];

    /// Color at `(x, y)` reduced to 8 bits per channel
    fn rgb8(&self, x: u32, y: u32) -> Rgb<u8> {
        let [r, g, b] = self.rgb16(x, y);
        Rgb([(r >> 8) as u8, (g >> 8) as u8, (b >> 8) as u8])
    }
}

#[inline]
fn widen(v: u8) -> u16 {
    u16::from(v) * 257
}

#[inline]
fn quantize(v: f32) -> u16 {
    // NaN clamps to 0 through the saturating cast
    (v.clamp(0.0, 1.0) * f32::from(u16::MAX)).round() as u16
}

impl ColorImage for RgbImage {
    fn size(&self) -> (u32, u32) {
        self.dimensions()
    }

    fn rgb16(&self, x: u32, y: u32) -> [u16; 3] {
        let p = self.get_pixel(x, y).0;
        [widen(p[0]), widen(p[1]), widen(p[2])]
    }
}

impl ColorImage for RgbaImage {
    fn size(&self) -> (u32, u32) {
        self.dimensions()
    }

    fn rgb16(&self, x: u32, y: u32) -> [u16; 3] {
        let p = self.get_pixel(x, y).0;
        [widen(p[0]), widen(p[1]), widen(p[2])]
    }
}

impl ColorImage for GrayImage {
    fn size(&self) -> (u32, u32) {
        self.dimensions()
    }

    fn rgb16(&self, x: u32, y: u32) -> [u16; 3] {
        let v = widen(self.get_pixel(x, y).0[0]);
        [v, v, v]
    }
}

impl ColorImage for Rgb16Image {
    fn size(&self) -> (u32, u32) {
        self.dimensions()
    }

    fn rgb16(&self, x: u32, y: u32) -> [u16; 3] {
        self.get_pixel(x, y).0
    }
}

impl ColorImage for Rgba16Image {
    fn size(&self) -> (u32, u32) {
        self.dimensions()
    }

    fn rgb16(&self, x: u32, y: u32) -> [u16; 3] {
        let p = self.get_pixel(x, y).0;
        [p[0], p[1], p[2]]
    }
}

impl ColorImage for DynamicImage {
    fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    fn rgb16(&self, x: u32, y: u32) -> [u16; 3] {
        match self {
            DynamicImage::ImageRgb16(buf) => buf.rgb16(x, y),
            DynamicImage::ImageRgba16(buf) => buf.rgb16(x, y),
            DynamicImage::ImageLuma16(buf) => {
                let v = buf.get_pixel(x, y).0[0];
                [v, v, v]
            }
            DynamicImage::ImageLumaA16(buf) => {
                let v = buf.get_pixel(x, y).0[0];
                [v, v, v]
            }
            DynamicImage::ImageRgb32F(buf) => buf.get_pixel(x, y).0.map(quantize),
            DynamicImage::ImageRgba32F(buf) => {
                let p = buf.get_pixel(x, y).0;
                [quantize(p[0]), quantize(p[1]), quantize(p[2])]
            }
            // 8-bit storage
            other => {
                let p = other.get_pixel(x, y).0;
                [widen(p[0]), widen(p[1]), widen(p[2])]
            }
        }
    }
}

/// Convert to 8-bit luma using BT.601 weights (0.299 R + 0.587 G + 0.114 B)
pub fn to_luma8<I: ColorImage + ?Sized>(image: &I) -> GrayImage {
    let (width, height) = image.size();
    GrayImage::from_fn(width, height, |x, y| {
        let Rgb([r, g, b]) = image.rgb8(x, y);
        let luma = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}
