//! Fixture builders shared by unit and integration tests

use std::io::Cursor;

use exif::{experimental::Writer, Field, In, Rational, Tag, Value};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::error::{Error, Result};

/// A JPEG with a gradient and no metadata
pub fn plain_jpeg(width: u32, height: u32) -> Result<Vec<u8>> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

/// A JPEG carrying an APP1 EXIF segment built from `fields`
pub fn jpeg_with_exif(width: u32, height: u32, fields: &[Field]) -> Result<Vec<u8>> {
    let jpeg = plain_jpeg(width, height)?;

    let mut writer = Writer::new();
    for field in fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer
        .write(&mut tiff, false)
        .map_err(|e| Error::MetadataDecode(e.to_string()))?;
    let tiff = tiff.into_inner();

    let segment_len = u16::try_from(2 + 6 + tiff.len())
        .map_err(|_| Error::InvalidInput("exif segment too large"))?;

    let mut out = Vec::with_capacity(jpeg.len() + tiff.len() + 10);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    Ok(out)
}

pub fn ascii(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    }
}

fn dms(degrees: u32, minutes: u32, centiseconds: u32) -> Value {
    Value::Rational(vec![
        Rational { num: degrees, denom: 1 },
        Rational { num: minutes, denom: 1 },
        Rational { num: centiseconds, denom: 100 },
    ])
}

/// Camera fields plus a position of 42.7275 N, 73.6825 W
pub fn sample_exif() -> Vec<Field> {
    vec![
        ascii(Tag::Make, "Canon"),
        ascii(Tag::Model, "Canon EOS 5D Mark III"),
        ascii(Tag::DateTimeOriginal, "2018:04:14 15:30:00"),
        ascii(Tag::BodySerialNumber, "012345678901"),
        ascii(Tag::GPSLatitudeRef, "N"),
        Field {
            tag: Tag::GPSLatitude,
            ifd_num: In::PRIMARY,
            value: dms(42, 43, 3900),
        },
        ascii(Tag::GPSLongitudeRef, "W"),
        Field {
            tag: Tag::GPSLongitude,
            ifd_num: In::PRIMARY,
            value: dms(73, 40, 5700),
        },
    ]
}

/// A valid photo with the sample EXIF block
pub fn sample_photo(width: u32, height: u32) -> Result<Vec<u8>> {
    jpeg_with_exif(width, height, &sample_exif())
}
