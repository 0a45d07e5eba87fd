//! Shared live camera.
//!
//! `CameraManager` owns at most one running `CameraFeed`. A feed is a single
//! "latest frame" slot plus a stop flag, both behind one mutex, continuously
//! overwritten by a dedicated reader thread. Consumers copy the frame out and
//! never hold the lock while processing it. Frames are dropped when consumers
//! fall behind; the feed exposes current state, not a queue.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::error::Error;
use crate::frame::Frame;
use crate::ingest::{open_capture_device, CameraSettings, CaptureDevice};

/// How long `stop` waits for the reader thread to release the device.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Back-off after a failed device read.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Opens the capture device when the camera starts.
pub type CameraOpener = Arc<dyn Fn() -> Result<Box<dyn CaptureDevice>> + Send + Sync>;

struct CameraSlot {
    frame: Option<Frame>,
    /// Incremented on every publish; 0 means no frame yet.
    seq: u64,
    stopped: bool,
}

/// One running camera session.
pub struct CameraFeed {
    slot: Mutex<CameraSlot>,
    device_name: String,
}

impl CameraFeed {
    fn lock(&self) -> MutexGuard<'_, CameraSlot> {
        // A poisoned slot still holds a whole frame: writers replace it in one assignment.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the latest frame, or `None` before the first frame arrives.
    pub fn get_frame(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    /// Copy of the latest frame if it is newer than `seen`, with its sequence number.
    pub fn frame_after(&self, seen: u64) -> Option<(u64, Frame)> {
        let slot = self.lock();
        match &slot.frame {
            Some(frame) if slot.seq > seen => Some((slot.seq, frame.clone())),
            _ => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn publish(&self, frame: Frame) -> bool {
        let mut slot = self.lock();
        if slot.stopped {
            return false;
        }
        slot.frame = Some(frame);
        slot.seq += 1;
        true
    }

    fn signal_stop(&self) {
        let mut slot = self.lock();
        slot.stopped = true;
        slot.frame = None;
    }
}

struct RunningCamera {
    feed: Arc<CameraFeed>,
    join: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl RunningCamera {
    fn shutdown(mut self) {
        self.feed.signal_stop();
        match self.exited.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(join) = self.join.take() {
                    if join.join().is_err() {
                        log::error!("camera reader thread panicked");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "camera reader for {} did not exit within {:?}; detaching",
                    self.feed.device_name,
                    STOP_TIMEOUT
                );
            }
        }
    }
}

/// Explicitly owned camera lifecycle: `start`, `stop`, `get_frame`.
///
/// One camera per process: a `start` while a feed is running returns that
/// feed, so every viewer shares the same device.
pub struct CameraManager {
    opener: CameraOpener,
    running: Mutex<Option<RunningCamera>>,
}

impl CameraManager {
    pub fn new(opener: CameraOpener) -> Self {
        Self {
            opener,
            running: Mutex::new(None),
        }
    }

    /// Manager that opens the configured device on `start`.
    pub fn from_settings(settings: CameraSettings) -> Self {
        Self::new(Arc::new(move || open_capture_device(&settings)))
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningCamera>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the camera, or join the feed that is already running.
    ///
    /// Fails with [`Error::CameraUnavailable`] when the device cannot be
    /// opened; no feed is created in that case.
    pub fn start(&self) -> Result<Arc<CameraFeed>> {
        let mut running = self.running();
        if let Some(camera) = running.as_ref() {
            if !camera.feed.is_stopped() {
                return Ok(camera.feed.clone());
            }
        }
        if let Some(stale) = running.take() {
            stale.shutdown();
        }

        let device = (self.opener)().map_err(|e| match e.downcast::<Error>() {
            Ok(typed @ Error::CameraUnavailable(_)) => anyhow::Error::from(typed),
            Ok(other) => Error::CameraUnavailable(other.to_string()).into(),
            Err(e) => Error::CameraUnavailable(format!("{e:#}")).into(),
        })?;

        let feed = Arc::new(CameraFeed {
            slot: Mutex::new(CameraSlot {
                frame: None,
                seq: 0,
                stopped: false,
            }),
            device_name: device.name().to_string(),
        });
        let (exited_tx, exited) = mpsc::channel();
        let reader_feed = feed.clone();
        let join = std::thread::Builder::new()
            .name("camera-reader".to_string())
            .spawn(move || {
                read_loop(device, &reader_feed);
                let _ = exited_tx.send(());
            })
            .map_err(|e| anyhow!("spawn camera reader thread: {}", e))?;

        log::info!("camera started ({})", feed.device_name);
        *running = Some(RunningCamera {
            feed: feed.clone(),
            join: Some(join),
            exited,
        });
        Ok(feed)
    }

    /// Stop the camera and release the device. No-op when not running.
    pub fn stop(&self) {
        let camera = self.running().take();
        if let Some(camera) = camera {
            let name = camera.feed.device_name.clone();
            camera.shutdown();
            log::info!("camera stopped ({})", name);
        }
    }

    /// Latest frame of the running camera, if any.
    pub fn get_frame(&self) -> Option<Frame> {
        self.running()
            .as_ref()
            .and_then(|camera| camera.feed.get_frame())
    }

    pub fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .is_some_and(|camera| !camera.feed.is_stopped())
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(mut device: Box<dyn CaptureDevice>, feed: &CameraFeed) {
    let mut frames = 0u64;
    let mut failures = 0u64;
    while !feed.is_stopped() {
        match device.read_frame() {
            Ok(frame) => {
                if !feed.publish(frame) {
                    break;
                }
                frames += 1;
            }
            Err(err) => {
                failures += 1;
                if failures == 1 || failures % 100 == 0 {
                    log::warn!(
                        "camera read failed on {} ({} failures): {:#}",
                        device.name(),
                        failures,
                        err
                    );
                }
                std::thread::sleep(READ_RETRY_DELAY);
            }
        }
    }
    log::debug!(
        "camera reader for {} exiting after {} frames",
        device.name(),
        frames
    );
    // Device handle is released here, on the reader thread.
    drop(device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use crate::ingest::SyntheticDevice;

    fn stub_manager(opens: Arc<AtomicUsize>) -> CameraManager {
        CameraManager::new(Arc::new(move || {
            opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SyntheticDevice::new(CameraSettings {
                device: "stub://camera".to_string(),
                width: 16,
                height: 12,
                target_fps: 200,
            })) as Box<dyn CaptureDevice>)
        }))
    }

    fn wait_for_frame(feed: &CameraFeed) -> Option<Frame> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(frame) = feed.get_frame() {
                return Some(frame);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn feed_publishes_frames() {
        let manager = stub_manager(Arc::new(AtomicUsize::new(0)));
        let feed = manager.start().expect("start camera");
        let frame = wait_for_frame(&feed).expect("camera produced no frame");
        assert_eq!((frame.width(), frame.height()), (16, 12));
        assert!(manager.is_running());
        assert!(manager.get_frame().is_some());
        manager.stop();
    }

    #[test]
    fn frame_after_only_returns_newer_frames() {
        let manager = stub_manager(Arc::new(AtomicUsize::new(0)));
        let feed = manager.start().expect("start camera");
        wait_for_frame(&feed).expect("camera produced no frame");

        let (seq, _) = feed.frame_after(0).expect("first frame");
        assert!(seq >= 1);
        assert!(feed.frame_after(u64::MAX).is_none());
        manager.stop();
    }

    #[test]
    fn second_start_reuses_running_feed() {
        let opens = Arc::new(AtomicUsize::new(0));
        let manager = stub_manager(opens.clone());
        let a = manager.start().expect("first start");
        let b = manager.start().expect("second start");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_marks_feed_stopped_and_is_idempotent() {
        let manager = stub_manager(Arc::new(AtomicUsize::new(0)));
        manager.stop();

        let feed = manager.start().expect("start camera");
        manager.stop();
        assert!(feed.is_stopped());
        assert!(feed.get_frame().is_none());
        assert!(!manager.is_running());
        manager.stop();
        assert!(manager.get_frame().is_none());
    }

    #[test]
    fn restart_after_stop_opens_device_again() {
        let opens = Arc::new(AtomicUsize::new(0));
        let manager = stub_manager(opens.clone());
        let first = manager.start().expect("start");
        manager.stop();
        let second = manager.start().expect("restart");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unavailable_device_creates_no_feed() {
        let manager = CameraManager::new(Arc::new(|| Err(anyhow!("no such device"))));
        let err = manager.start().err().expect("start must fail");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CameraUnavailable(_))
        ));
        assert!(!manager.is_running());
        assert!(manager.get_frame().is_none());
    }
}
