//! Screen capture pipeline.
//!
//! A dedicated thread grabs raw frames from a [`source::CaptureSource`],
//! normalizes them to the configured resolution, JPEG-compresses them, and
//! publishes the result to the frame cache plus a bounded push channel.

pub mod encoder;
pub mod pipeline;
pub mod source;

use serde::Serialize;
use thiserror::Error;

/// An uncompressed RGB frame fresh from a capture source. Produced once per
/// tick and consumed immediately by the encoder; never retained.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawFrame {
    /// Normalize to the target resolution via nearest-neighbor sampling.
    /// A no-op when the frame already matches.
    pub fn scale_to(self, width: u32, height: u32) -> RawFrame {
        if self.width == width && self.height == height {
            return self;
        }

        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            let src_y = (y as usize * self.height as usize) / height as usize;
            for x in 0..width {
                let src_x = (x as usize * self.width as usize) / width as usize;
                let offset = (src_y * self.width as usize + src_x) * 3;
                rgb.extend_from_slice(&self.rgb[offset..offset + 3]);
            }
        }

        RawFrame { rgb, width, height }
    }
}

/// The latest compressed frame. Exactly one of these lives in the frame
/// cache at a time; each tick overwrites the previous one.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    /// Sequence number (for ordering/drop detection).
    pub seq: u64,
    /// Unix timestamp (seconds) of the capture tick.
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorInfo {
    pub id: usize,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub primary: bool,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no display available")]
    NoDisplay,
    #[error("monitor index {0} out of range")]
    MonitorOutOfRange(usize),
    /// The source has no new frame yet (e.g. X11 damage not ready).
    #[error("frame not ready")]
    NotReady,
    #[error("capture failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("buffer length {actual} does not match {width}x{height} rgb frame")]
    BufferMismatch {
        actual: usize,
        width: u32,
        height: u32,
    },
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}
