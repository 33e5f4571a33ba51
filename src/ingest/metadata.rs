//! Embedded EXIF metadata
//!
//! Failing to find an EXIF block at all is fatal for an ingestion; a missing
//! individual tag (no GPS, no serial) just leaves that field empty.

use std::io::Cursor;

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{Exif, In, Tag, Value};

use crate::error::{Error, Result};

/// Fields pulled out of a photo's EXIF block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    pub taken_at: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub cam_serial: Option<String>,
    pub cam_make: Option<String>,
    pub cam_model: Option<String>,
}

/// Decode the EXIF block of a JPEG
pub fn read_metadata(data: &[u8]) -> Result<PhotoMetadata> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .map_err(|e| Error::MetadataDecode(e.to_string()))?;

    let (lat, long) = match lat_long(&exif) {
        Some((lat, long)) => (Some(lat), Some(long)),
        None => {
            tracing::debug!("no gps position in exif");
            (None, None)
        }
    };

    let metadata = PhotoMetadata {
        taken_at: taken_at(&exif),
        lat,
        long,
        cam_serial: ascii_field(&exif, Tag::BodySerialNumber),
        cam_make: ascii_field(&exif, Tag::Make),
        cam_model: ascii_field(&exif, Tag::Model),
    };

    if metadata.taken_at.is_none() {
        tracing::debug!("no capture time in exif");
    }

    Ok(metadata)
}

/// First ASCII component of a tag, stripped of NUL padding
fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => {
            let raw = parts.first()?;
            let text = String::from_utf8_lossy(raw);
            let text = text.trim_end_matches('\0');
            (!text.is_empty()).then(|| text.to_string())
        }
        _ => None,
    }
}

fn taken_at(exif: &Exif) -> Option<DateTime<Utc>> {
    [Tag::DateTimeOriginal, Tag::DateTime]
        .into_iter()
        .filter_map(|tag| ascii_field(exif, tag))
        .find_map(|text| NaiveDateTime::parse_from_str(text.trim(), "%Y:%m:%d %H:%M:%S").ok())
        .map(|naive| naive.and_utc())
}

fn lat_long(exif: &Exif) -> Option<(f64, f64)> {
    let lat = coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S")?;
    let long = coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W")?;

    if lat.abs() > 90.0 || long.abs() > 180.0 {
        return None;
    }
    Some((lat, long))
}

/// Degrees/minutes/seconds rationals to signed decimal degrees
fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag, negative_ref: &str) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let dms = match &field.value {
        Value::Rational(parts) if !parts.is_empty() => parts,
        _ => return None,
    };

    let degrees = dms
        .iter()
        .take(3)
        .zip([1.0, 60.0, 3600.0])
        .map(|(part, divisor)| part.to_f64() / divisor)
        .sum::<f64>();

    if !degrees.is_finite() {
        return None;
    }

    let negative = ascii_field(exif, ref_tag)
        .map(|r| r.trim().eq_ignore_ascii_case(negative_ref))
        .unwrap_or(false);

    Some(if negative { -degrees } else { degrees })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ascii, jpeg_with_exif, plain_jpeg, sample_exif};

    #[test]
    fn test_reads_all_fields() {
        let fields = sample_exif();
        let jpeg = jpeg_with_exif(64, 64, &fields).unwrap();

        let meta = read_metadata(&jpeg).unwrap();

        assert_eq!(meta.cam_make.as_deref(), Some("Canon"));
        assert_eq!(meta.cam_model.as_deref(), Some("Canon EOS 5D Mark III"));
        assert_eq!(meta.cam_serial.as_deref(), Some("012345678901"));
        assert_eq!(
            meta.taken_at.unwrap().to_rfc3339(),
            "2018-04-14T15:30:00+00:00"
        );

        let lat = meta.lat.unwrap();
        let long = meta.long.unwrap();
        assert!((lat - 42.7275).abs() < 1e-6, "lat was {lat}");
        assert!((long + 73.6825).abs() < 1e-6, "long was {long}");
    }

    #[test]
    fn test_missing_fields_are_left_empty() {
        let fields = vec![ascii(Tag::Make, "Nikon\0\0")];
        let jpeg = jpeg_with_exif(64, 64, &fields).unwrap();

        let meta = read_metadata(&jpeg).unwrap();

        assert_eq!(meta.cam_make.as_deref(), Some("Nikon"));
        assert_eq!(meta.cam_model, None);
        assert_eq!(meta.taken_at, None);
        assert_eq!(meta.lat, None);
        assert_eq!(meta.long, None);
    }

    #[test]
    fn test_no_exif_is_a_decode_error() {
        let jpeg = plain_jpeg(32, 32).unwrap();
        assert!(matches!(read_metadata(&jpeg), Err(Error::MetadataDecode(_))));
        assert!(matches!(read_metadata(b"garbage"), Err(Error::MetadataDecode(_))));
    }
}
