use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, ImageFormat};

use crate::error::Result;

/// Bounding box of generated thumbnails (aspect ratio is preserved inside it)
pub const THUMBNAIL_SIZE: u32 = 256;

/// Pixel dimensions of a decoded photo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub width: u32,
    pub height: u32,
}

/// Decode a JPEG and produce its bounds plus an encoded JPEG thumbnail
pub fn render_thumbnail(jpeg_data: &[u8]) -> Result<(Bounds, Vec<u8>)> {
    let img = image::load_from_memory_with_format(jpeg_data, ImageFormat::Jpeg)?;
    let bounds = Bounds {
        width: img.width(),
        height: img.height(),
    };

    let thumbnail = shrink_to_fit(img);
    Ok((bounds, encode_jpeg(&thumbnail)?))
}

/// Scale down to fit in THUMBNAIL_SIZE x THUMBNAIL_SIZE with bicubic
/// resampling. Images already inside the box are returned untouched.
pub fn shrink_to_fit(img: DynamicImage) -> DynamicImage {
    if img.width() <= THUMBNAIL_SIZE && img.height() <= THUMBNAIL_SIZE {
        return img;
    }
    img.resize(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::CatmullRom)
}

/// Encode as baseline JPEG (alpha and 16-bit channels are flattened to RGB8)
pub fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}
