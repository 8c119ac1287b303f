//! Capture sources: the real display grabber and a synthetic test pattern.

use scrap::{Capturer, Display};

use super::{CaptureError, MonitorInfo, RawFrame};

/// Anything that can produce raw frames for the pipeline.
///
/// Implementations are not required to be `Send`: scrap's `Capturer` is
/// `!Send` on X11, so sources are constructed *inside* the capture thread
/// via a [`SourceFactory`].
pub trait CaptureSource {
    fn capture(&mut self, monitor: usize) -> Result<RawFrame, CaptureError>;
}

/// Builds the source inside the capture thread.
pub type SourceFactory = Box<dyn FnOnce() -> Box<dyn CaptureSource> + Send>;

/// Returns a factory for the configured source kind. Falls back to the test
/// pattern when no display is reachable, so the server stays usable on
/// headless machines.
pub fn source_factory(test_pattern: bool) -> SourceFactory {
    Box::new(move || {
        if test_pattern {
            return Box::new(TestPatternSource::new(1280, 720));
        }
        match Display::all() {
            Ok(displays) if !displays.is_empty() => Box::new(DisplaySource::new()),
            Ok(_) | Err(_) => {
                tracing::warn!("no display available, falling back to test pattern");
                Box::new(TestPatternSource::new(1280, 720))
            }
        }
    })
}

/// Monitor list for the control plane. Safe to call from any thread
/// (enumerating displays does not create a capturer).
pub fn available_monitors(test_pattern: bool) -> Vec<MonitorInfo> {
    if !test_pattern {
        match enumerate_displays() {
            Ok(monitors) if !monitors.is_empty() => return monitors,
            Ok(_) => tracing::warn!("no monitors found, reporting test monitor"),
            Err(e) => tracing::warn!(error = %e, "monitor enumeration failed"),
        }
    }
    vec![MonitorInfo {
        id: 0,
        name: "Test Monitor".into(),
        width: 1280,
        height: 720,
        primary: true,
    }]
}

fn enumerate_displays() -> Result<Vec<MonitorInfo>, CaptureError> {
    let displays = Display::all()?;
    Ok(displays
        .iter()
        .enumerate()
        .map(|(i, d)| MonitorInfo {
            id: i,
            name: format!("Monitor {}", i + 1),
            width: d.width() as u32,
            height: d.height() as u32,
            primary: i == 0,
        })
        .collect())
}

/// Captures a physical display via scrap. The capturer is created lazily and
/// recreated whenever the requested monitor index changes.
pub struct DisplaySource {
    active: Option<ActiveCapture>,
}

struct ActiveCapture {
    monitor: usize,
    capturer: Capturer,
    width: usize,
    height: usize,
}

impl DisplaySource {
    pub fn new() -> Self {
        Self { active: None }
    }

    fn ensure_capturer(&mut self, monitor: usize) -> Result<(), CaptureError> {
        if matches!(&self.active, Some(a) if a.monitor == monitor) {
            return Ok(());
        }
        self.active = None;

        let mut displays = Display::all()?;
        if displays.is_empty() {
            return Err(CaptureError::NoDisplay);
        }
        if monitor >= displays.len() {
            return Err(CaptureError::MonitorOutOfRange(monitor));
        }

        let display = displays.remove(monitor);
        let width = display.width();
        let height = display.height();
        let capturer = Capturer::new(display)?;
        self.active = Some(ActiveCapture {
            monitor,
            capturer,
            width,
            height,
        });
        Ok(())
    }
}

impl CaptureSource for DisplaySource {
    fn capture(&mut self, monitor: usize) -> Result<RawFrame, CaptureError> {
        self.ensure_capturer(monitor)?;
        let active = match self.active.as_mut() {
            Some(a) => a,
            None => return Err(CaptureError::NoDisplay),
        };

        let (width, height) = (active.width, active.height);
        let result = match active.capturer.frame() {
            Ok(frame) => {
                // scrap gives us BGRA pixels; the stride may include padding.
                let stride = frame.len() / height;
                Ok(bgra_to_rgb(&frame, width, height, stride))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(CaptureError::NotReady)
            }
            Err(e) => Err(CaptureError::Io(e)),
        };

        // Recreate the capturer after a hard failure (display gone, mode
        // switch); the next tick starts fresh.
        if matches!(result, Err(CaptureError::Io(_))) {
            self.active = None;
        }
        result
    }
}

/// Convert a BGRA capture buffer to a tightly packed RGB frame.
fn bgra_to_rgb(bgra: &[u8], width: usize, height: usize, stride: usize) -> RawFrame {
    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            let offset = y * stride + x * 4;
            if offset + 2 < bgra.len() {
                rgb.push(bgra[offset + 2]); // R (BGRA → R is at +2)
                rgb.push(bgra[offset + 1]); // G
                rgb.push(bgra[offset]); // B
            } else {
                rgb.extend_from_slice(&[0, 0, 0]);
            }
        }
    }
    RawFrame {
        rgb,
        width: width as u32,
        height: height as u32,
    }
}

/// Deterministic synthetic source: dark gradient, grid lines, and a moving
/// band keyed by the frame sequence so viewers can see the feed is live.
/// Used headless, under `--test-pattern`, and in tests.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    seq: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            seq: 0,
        }
    }
}

impl CaptureSource for TestPatternSource {
    fn capture(&mut self, _monitor: usize) -> Result<RawFrame, CaptureError> {
        let rgb = render_pattern(self.width, self.height, self.seq);
        self.seq += 1;
        Ok(RawFrame {
            rgb,
            width: self.width,
            height: self.height,
        })
    }
}

/// Render the diagnostic pattern. Also substituted for broken frames by the
/// pipeline so viewers observe liveness instead of a frozen feed.
pub fn render_pattern(width: u32, height: u32, seq: u64) -> Vec<u8> {
    const GRID: u32 = 50;
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);

    for y in 0..height {
        // Vertical gradient from dark navy.
        let base = 26 + ((y as u32 * 50) / height.max(1)) as u8;
        for x in 0..width {
            if x % GRID == 0 || y % GRID == 0 {
                rgb.extend_from_slice(&[22, 33, 62]);
            } else if (x as u64 + y as u64 + seq * 4) % 160 < 8 {
                // Moving diagonal band.
                rgb.extend_from_slice(&[78, 205, 196]);
            } else {
                rgb.extend_from_slice(&[base, base, base.saturating_add(20)]);
            }
        }
    }
    rgb
}
