//! Preview windows.
//!
//! Three things can be shown: the anonymized live camera feed, a finished
//! still image, and the frames of a video while it is being encoded. Every
//! window closes on `Q`/`Esc` or the close button.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use eframe::egui;

use crate::camera::{CameraFeed, CameraManager};
use crate::detect::FaceDetector;
use crate::frame::Frame;
use crate::pipeline::anonymize_frame;

const REPAINT_INTERVAL: Duration = Duration::from_millis(10);

/// Latest frame handed from a worker thread to a preview window, plus the
/// stop signals flowing both ways.
#[derive(Default)]
pub struct PreviewSlot {
    latest: Mutex<(u64, Option<Frame>)>,
    finished: AtomicBool,
    abort: AtomicBool,
}

impl PreviewSlot {
    fn lock(&self) -> MutexGuard<'_, (u64, Option<Frame>)> {
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the shown frame. Frames the window has not drawn yet are dropped.
    pub fn publish(&self, frame: &Frame) {
        let mut latest = self.lock();
        latest.0 += 1;
        latest.1 = Some(frame.clone());
    }

    /// The newest frame if it is newer than `seen`.
    pub fn frame_after(&self, seen: u64) -> Option<(u64, Frame)> {
        let latest = self.lock();
        match &latest.1 {
            Some(frame) if latest.0 > seen => Some((latest.0, frame.clone())),
            _ => None,
        }
    }

    /// Worker side: no more frames will be published.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Window side: the user closed the preview.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Open the camera and show the anonymized feed in a native window.
pub fn run_webcam_preview(camera: CameraManager, detector: Box<dyn FaceDetector>) -> Result<()> {
    let feed = camera.start()?;
    let title = format!("Face Veil - {}", feed.device_name());
    let result = open_window(&title, Source::Camera { feed, detector });
    camera.stop();
    log::info!("preview closed");
    result
}

/// Show a finished image until the window is closed.
pub fn show_image(title: &str, frame: Frame) -> Result<()> {
    open_window(title, Source::Still(Some(frame)))
}

/// Run `work` on a worker thread while its published frames are shown.
///
/// The window closes by itself once `work` returns. Closing it earlier
/// raises [`PreviewSlot::abort_requested`] and `work` is expected to wind
/// down. When no window can be opened `work` runs to completion unseen.
pub fn run_with_preview<T, F>(title: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&PreviewSlot) -> Result<T> + Send + 'static,
{
    let slot = Arc::new(PreviewSlot::default());
    let worker_slot = Arc::clone(&slot);
    let worker = std::thread::Builder::new()
        .name("preview-worker".to_string())
        .spawn(move || {
            let result = work(worker_slot.as_ref());
            worker_slot.finish();
            result
        })?;

    match open_window(title, Source::Slot(Arc::clone(&slot))) {
        Ok(()) => slot.request_abort(),
        Err(err) => log::warn!("{:#}; continuing without preview", err),
    }
    worker
        .join()
        .map_err(|_| anyhow!("preview worker panicked"))?
}

fn open_window(title: &str, source: Source) -> Result<()> {
    let app = PreviewApp {
        source,
        texture: None,
        last_seq: 0,
        frames: 0,
        error: None,
    };
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([960.0, 720.0]),
        ..Default::default()
    };
    eframe::run_native(title, options, Box::new(|_cc| Ok(Box::new(app))))
        .map_err(|e| anyhow!("preview window failed: {e}"))
}

enum Source {
    Camera {
        feed: Arc<CameraFeed>,
        detector: Box<dyn FaceDetector>,
    },
    Still(Option<Frame>),
    Slot(Arc<PreviewSlot>),
}

struct PreviewApp {
    source: Source,
    texture: Option<egui::TextureHandle>,
    last_seq: u64,
    frames: u64,
    error: Option<String>,
}

impl PreviewApp {
    /// Next frame to draw, if any. Sets `close` when the source is done.
    fn next_frame(&mut self, close: &mut bool) -> Option<Frame> {
        match &mut self.source {
            Source::Camera { feed, detector } => {
                let (seq, mut frame) = feed.frame_after(self.last_seq)?;
                self.last_seq = seq;
                if let Err(err) = anonymize_frame(&mut frame, detector.as_mut()) {
                    log::error!("preview stopped: {:#}", err);
                    self.error = Some(format!("{err:#}"));
                    return None;
                }
                Some(frame)
            }
            Source::Still(frame) => frame.take(),
            Source::Slot(slot) => match slot.frame_after(self.last_seq) {
                Some((seq, frame)) => {
                    self.last_seq = seq;
                    Some(frame)
                }
                None => {
                    *close = slot.is_finished();
                    None
                }
            },
        }
    }

    fn refresh(&mut self, ctx: &egui::Context) -> bool {
        if self.error.is_some() {
            return false;
        }
        let mut close = false;
        let Some(frame) = self.next_frame(&mut close) else {
            return close;
        };
        let size = [frame.width() as usize, frame.height() as usize];
        let image = egui::ColorImage::from_rgb(size, frame.as_bytes());
        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::default()),
            None => {
                self.texture = Some(ctx.load_texture("preview", image, Default::default()));
            }
        }
        self.frames += 1;
        if self.frames == 1 {
            log::info!("preview showing {}x{} frames", size[0], size[1]);
        }
        false
    }
}

impl eframe::App for PreviewApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let quit = ctx.input(|i| i.key_pressed(egui::Key::Q) || i.key_pressed(egui::Key::Escape));
        if self.refresh(ctx) || quit {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(error) = &self.error {
                ui.centered_and_justified(|ui| {
                    ui.colored_label(egui::Color32::RED, error);
                });
            } else if let Some(texture) = &self.texture {
                let available_size = ui.available_size();
                let texture_size = texture.size_vec2();
                let scale = (available_size.x / texture_size.x)
                    .min(available_size.y / texture_size.y)
                    .min(1.0);
                ui.centered_and_justified(|ui| {
                    ui.image((texture.id(), texture_size * scale));
                });
            } else {
                ui.centered_and_justified(|ui| {
                    ui.heading("Waiting for frames…");
                });
            }
        });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_hands_over_only_newer_frames() {
        let slot = PreviewSlot::default();
        assert!(slot.frame_after(0).is_none());

        slot.publish(&Frame::filled(4, 4, [1, 1, 1]));
        slot.publish(&Frame::filled(4, 4, [2, 2, 2]));
        let (seq, frame) = slot.frame_after(0).expect("published frame");
        assert_eq!(seq, 2);
        assert_eq!(frame.pixel(0, 0), [2, 2, 2]);
        assert!(slot.frame_after(seq).is_none());
    }

    #[test]
    fn slot_signals_are_independent() {
        let slot = PreviewSlot::default();
        assert!(!slot.is_finished() && !slot.abort_requested());
        slot.request_abort();
        assert!(slot.abort_requested());
        assert!(!slot.is_finished());
        slot.finish();
        assert!(slot.is_finished());
    }
}
