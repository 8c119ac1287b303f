//! Stateless JPEG encoding: same raw frame and quality in, same bytes out.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;

use super::{source, EncodeError, RawFrame};

/// JPEG-compress a raw RGB frame at the given quality.
pub fn encode(frame: &RawFrame, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let expected = (frame.width as usize) * (frame.height as usize) * 3;
    if frame.rgb.len() != expected {
        return Err(EncodeError::BufferMismatch {
            actual: frame.rgb.len(),
            width: frame.width,
            height: frame.height,
        });
    }

    let img: RgbImage = match ImageBuffer::from_raw(frame.width, frame.height, frame.rgb.clone()) {
        Some(img) => img,
        None => {
            return Err(EncodeError::BufferMismatch {
                actual: frame.rgb.len(),
                width: frame.width,
                height: frame.height,
            })
        }
    };

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

/// Fallback frame substituted when a capture tick produced something the
/// encoder rejects. Viewers see the diagnostic pattern instead of a frozen
/// or blank feed.
pub fn placeholder(width: u32, height: u32, seq: u64) -> RawFrame {
    RawFrame {
        rgb: source::render_pattern(width, height, seq),
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(width: u32, height: u32) -> RawFrame {
        placeholder(width, height, 3)
    }

    #[test]
    fn test_encode_is_deterministic() {
        let frame = test_frame(64, 48);
        let a = encode(&frame, 80).unwrap();
        let b = encode(&frame, 80).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_encode_output_decodes_to_same_dimensions() {
        let frame = test_frame(64, 48);
        let jpeg = encode(&frame, 80).unwrap();

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn test_encode_rejects_mismatched_buffer() {
        let frame = RawFrame {
            rgb: vec![0u8; 10],
            width: 64,
            height: 48,
        };
        assert!(matches!(
            encode(&frame, 80),
            Err(EncodeError::BufferMismatch { actual: 10, .. })
        ));
    }

    #[test]
    fn test_quality_changes_output() {
        let frame = test_frame(64, 48);
        let high = encode(&frame, 95).unwrap();
        let low = encode(&frame, 20).unwrap();
        assert_ne!(high, low);
        assert!(low.len() < high.len());
    }
}
