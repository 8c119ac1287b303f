//! The paced capture loop: one dedicated thread per room, fully decoupled
//! from connection handling. It never blocks on network I/O and never exits
//! on its own — only an explicit `stop()` ends it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::source::{source_factory, CaptureSource, SourceFactory};
use super::{encoder, CaptureError, EncodedFrame, RawFrame};
use crate::cache::FrameCache;
use crate::protocol::unix_now;
use crate::settings::SharedSettings;

/// Idle → Running → Stopping → Idle. `start()` is a no-op while Running;
/// `stop()` flips the flag and waits (bounded) for the thread to confirm.
pub struct CaptureLoop {
    settings: SharedSettings,
    cache: Arc<FrameCache>,
    push_tx: mpsc::Sender<Arc<EncodedFrame>>,
    test_pattern: bool,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureLoop {
    pub fn new(
        settings: SharedSettings,
        cache: Arc<FrameCache>,
        push_tx: mpsc::Sender<Arc<EncodedFrame>>,
        test_pattern: bool,
    ) -> Self {
        Self {
            settings,
            cache,
            push_tx,
            test_pattern,
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Begin capturing. Does nothing if the loop is already running.
    pub fn start(&self) {
        let mut thread = self.thread.lock().unwrap();
        if let Some(handle) = thread.as_ref() {
            if !handle.is_finished() && self.running.load(Ordering::Relaxed) {
                return;
            }
        }

        self.running.store(true, Ordering::Relaxed);
        let factory = source_factory(self.test_pattern);
        let settings = self.settings.clone();
        let cache = self.cache.clone();
        let push_tx = self.push_tx.clone();
        let running = self.running.clone();

        // The source is built inside the thread: scrap capturers are !Send.
        *thread = Some(std::thread::spawn(move || {
            run_loop(factory, settings, cache, push_tx, running);
        }));
        tracing::info!("capture loop started");
    }

    /// Signal the loop to stop and wait (bounded) for confirmed exit. The
    /// flag is observed within one frame interval. Blocking; async callers
    /// use [`CaptureLoop::stop_async`].
    pub fn stop(&self) {
        let Some(handle) = self.begin_stop() else { return };
        wait_for_exit(handle, self.stop_timeout());
    }

    /// Like [`CaptureLoop::stop`], but the bounded wait runs on the blocking
    /// pool so no runtime worker stalls behind a slow capture tick.
    pub async fn stop_async(&self) {
        let Some(handle) = self.begin_stop() else { return };
        let timeout = self.stop_timeout();
        let _ = tokio::task::spawn_blocking(move || wait_for_exit(handle, timeout)).await;
    }

    fn begin_stop(&self) -> Option<JoinHandle<()>> {
        self.running.store(false, Ordering::Relaxed);
        self.thread.lock().unwrap().take()
    }

    fn stop_timeout(&self) -> Duration {
        let fps = self.settings.read().unwrap().fps.max(1);
        let interval = Duration::from_secs_f64(1.0 / fps as f64);
        (interval * 4).max(Duration::from_millis(250))
    }
}

fn wait_for_exit(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    if handle.is_finished() {
        let _ = handle.join();
        tracing::info!("capture loop stopped");
    } else {
        // Detach rather than hang the control plane on a stuck grab.
        tracing::warn!("capture thread did not confirm exit in time");
    }
}

fn run_loop(
    factory: SourceFactory,
    settings: SharedSettings,
    cache: Arc<FrameCache>,
    push_tx: mpsc::Sender<Arc<EncodedFrame>>,
    running: Arc<AtomicBool>,
) {
    let mut source: Box<dyn CaptureSource> = factory();
    let mut seq: u64 = 0;
    let mut deadline = Instant::now();
    let mut window_start = Instant::now();
    let mut window_frames: u32 = 0;

    while running.load(Ordering::Relaxed) {
        // Settings are re-read every tick so presenter updates take effect
        // within one frame.
        let (fps, width, height, quality, monitor) = {
            let s = settings.read().unwrap();
            (s.fps.max(1), s.width, s.height, s.quality, s.monitor)
        };
        let interval = Duration::from_secs_f64(1.0 / fps as f64);

        match source.capture(monitor) {
            Ok(raw) => {
                let raw = raw.scale_to(width, height);
                if let Some(frame) = encode_tick(&raw, quality, seq) {
                    let frame = EncodedFrame {
                        jpeg: frame,
                        quality,
                        width,
                        height,
                        seq,
                        timestamp: unix_now(),
                    };
                    seq += 1;
                    window_frames += 1;

                    let shared = cache.publish(frame);
                    // Push path: if the pump can't keep up the frame is
                    // dropped here; the cache still has the latest one.
                    let _ = push_tx.try_send(shared);
                }
            }
            Err(CaptureError::NotReady) => {
                // No new frame from the compositor yet.
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            Err(e) => {
                // Non-fatal: the cache retains its previous frame.
                tracing::warn!(error = %e, "capture failed, skipping tick");
            }
        }

        if window_start.elapsed() >= Duration::from_secs(1) {
            let secs = window_start.elapsed().as_secs_f32();
            cache.metrics().set_actual_fps(window_frames as f32 / secs);
            window_frames = 0;
            window_start = Instant::now();
        }

        // Pacing: absolute deadlines, but no burst catch-up. If a tick ran
        // long the reference resets to now instead of firing back-to-back.
        deadline += interval;
        let now = Instant::now();
        if deadline <= now {
            deadline = now;
        } else {
            std::thread::sleep(deadline - now);
        }
    }

    cache.metrics().set_actual_fps(0.0);
}

/// Encode one tick's frame, substituting the diagnostic placeholder if the
/// raw frame is malformed. Returns `None` only if even the placeholder fails
/// to encode, in which case the tick is skipped.
fn encode_tick(raw: &RawFrame, quality: u8, seq: u64) -> Option<Vec<u8>> {
    match encoder::encode(raw, quality) {
        Ok(jpeg) => Some(jpeg),
        Err(e) => {
            tracing::warn!(error = %e, seq, "encode failed, substituting placeholder");
            let fallback = encoder::placeholder(raw.width, raw.height, seq);
            match encoder::encode(&fallback, quality) {
                Ok(jpeg) => Some(jpeg),
                Err(e) => {
                    tracing::error!(error = %e, seq, "placeholder encode failed, skipping tick");
                    None
                }
            }
        }
    }
}
