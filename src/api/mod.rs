//! Web service: upload pages, photo/video anonymization and live MJPEG feeds.
//!
//! The acceptor thread polls a non-blocking listener and hands every
//! connection to its own worker thread. Workers share one [`ServiceState`];
//! no lock is held while frames are detected or encoded.

mod http;
mod multipart;
mod pages;

use anyhow::{anyhow, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::camera::CameraManager;
use crate::config::ServiceConfig;
use crate::detect::DetectorFactory;
use crate::error::{kind_of, ErrorKind};
use crate::ingest::load_image;
use crate::pipeline::{anonymize_frame, transcode_file};
use crate::sink::{MjpegStream, StreamOptions};
use crate::upload::{temp_output, validate_extension, MediaKind, TempUpload};

use self::http::{read_body, read_head, write_response, HttpRequest, Response};
use self::pages::Page;

const NO_FILE_MESSAGE: &str = "No file uploaded";

/// Everything request workers share.
pub struct ServiceState {
    pub config: ServiceConfig,
    pub camera: CameraManager,
    pub detectors: DetectorFactory,
}

impl ServiceState {
    pub fn new(config: ServiceConfig, camera: CameraManager, detectors: DetectorFactory) -> Self {
        Self {
            config,
            camera,
            detectors,
        }
    }

    /// State with the configured camera device and detector backends.
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let camera = CameraManager::from_settings(config.camera.clone());
        let detectors = DetectorFactory::from_settings(&config.detector)?;
        Ok(Self::new(config, camera, detectors))
    }

    fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            poll_interval: self.config.poll_interval,
            jpeg_quality: self.config.jpeg_quality,
            frame_timeout: self.config.frame_timeout,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    state: Arc<ServiceState>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections and release the camera, which ends any
    /// live streams still being served.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        let joined = match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("web server thread panicked")),
            None => Ok(()),
        };
        self.state.camera.stop();
        joined
    }
}

impl std::fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceState")
            .field("config", &self.config)
            .field("camera_running", &self.camera.is_running())
            .field("detectors", &self.detectors.list())
            .finish()
    }
}

pub struct ApiServer {
    state: Arc<ServiceState>,
}

impl ApiServer {
    pub fn new(state: ServiceState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .state
            .config
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.state.config.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state.clone();
        let join = std::thread::Builder::new()
            .name("http-acceptor".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, state, shutdown_thread) {
                    log::error!("web server stopped: {}", err);
                }
            })?;
        log::info!("web server listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            state: self.state,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: Arc<ServiceState>, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let state = state.clone();
                let spawned = std::thread::Builder::new()
                    .name("http-worker".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state) {
                            log::warn!("request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("could not spawn request worker: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ServiceState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut request = read_head(&mut stream)?;

    if let Some(response) = check_route(&request) {
        write_response(&mut stream, response)?;
        return Ok(());
    }

    if request.method == "POST" {
        if request.header("transfer-encoding").is_some() {
            write_response(&mut stream, Response::text(411, "Content-Length required"))?;
            return Ok(());
        }
        let len = request.content_length()?.unwrap_or(0);
        if len > state.config.max_upload_bytes {
            log::warn!(
                "rejecting {} byte upload to {} (limit {})",
                len,
                request.path,
                state.config.max_upload_bytes
            );
            write_response(&mut stream, Response::text(413, "Upload too large"))?;
            return Ok(());
        }
        read_body(&mut stream, &mut request, len)?;
    }

    let path = request.path.clone();
    let response = route(&request, state);
    // Upload bodies can be large; free them before the response is streamed.
    drop(request);
    let status = response.status;
    let sent = write_response(&mut stream, response)?;
    log::debug!("{} -> {} ({} bytes)", path, status, sent);
    Ok(())
}

/// Allowed method for each known path.
fn allowed_method(path: &str) -> Option<&'static str> {
    match path {
        "/process_photo" | "/process_video" => Some("POST"),
        "/video_feed_raw" | "/video_feed_processed" | "/shutdown_camera" | "/health" => {
            Some("GET")
        }
        _ if Page::from_path(path).is_some() => Some("GET"),
        _ => None,
    }
}

/// 404 or 405 for requests no handler accepts.
fn check_route(request: &HttpRequest) -> Option<Response> {
    match allowed_method(&request.path) {
        None => Some(Response::text(404, "Not Found")),
        Some(method) if method != request.method => {
            Some(Response::text(405, "Method Not Allowed").with_header("Allow", method))
        }
        Some(_) => None,
    }
}

fn route(request: &HttpRequest, state: &ServiceState) -> Response {
    match request.path.as_str() {
        "/video_feed_raw" => video_feed(state, false),
        "/video_feed_processed" => video_feed(state, true),
        "/process_photo" => process_photo(request, state),
        "/process_video" => process_video(request, state),
        "/shutdown_camera" => {
            state.camera.stop();
            Response::redirect("/")
        }
        "/health" => Response::json(
            200,
            &serde_json::json!({
                "status": "ok",
                "camera_running": state.camera.is_running(),
            }),
        ),
        path => match Page::from_path(path) {
            Some(page) => {
                let flash = request.flash();
                let response = Response::html(pages::render(page, flash.as_deref()));
                if flash.is_some() {
                    response.clear_flash()
                } else {
                    response
                }
            }
            None => Response::text(404, "Not Found"),
        },
    }
}

fn video_feed(state: &ServiceState, processed: bool) -> Response {
    let feed = match state.camera.start() {
        Ok(feed) => feed,
        Err(err) if kind_of(&err) == ErrorKind::Device => {
            log::warn!("camera unavailable: {:#}", err);
            return Response::text(503, format!("Camera error: {err}"));
        }
        Err(err) => {
            log::error!("camera start failed: {:#}", err);
            return Response::text(500, format!("Camera error: {err}"));
        }
    };

    let options = state.stream_options();
    if !processed {
        log::info!("raw stream opened ({})", feed.device_name());
        return Response::stream(MjpegStream::raw(feed, options));
    }
    match state.detectors.create() {
        Ok(detector) => {
            log::info!(
                "processed stream opened ({}, detector {})",
                feed.device_name(),
                detector.name()
            );
            Response::stream(MjpegStream::processed(feed, detector, options))
                .with_header("Cache-Control", "no-cache")
        }
        Err(err) => {
            log::error!("could not create detector: {:#}", err);
            Response::text(500, format!("Detector error: {err}"))
        }
    }
}

/// The uploaded file field `name`, as (client file name, bytes).
fn uploaded_file<'a>(request: &'a HttpRequest, name: &str) -> Option<(String, &'a [u8])> {
    let boundary = multipart::boundary(request.header("content-type")?)?;
    let fields = match multipart::parse(&request.body, &boundary) {
        Ok(fields) => fields,
        Err(err) => {
            log::warn!("malformed upload to {}: {:#}", request.path, err);
            return None;
        }
    };
    let field = multipart::field(&fields, name)?;
    let filename = field.filename.clone().filter(|f| !f.trim().is_empty())?;
    Some((filename, field.data))
}

fn process_photo(request: &HttpRequest, state: &ServiceState) -> Response {
    let Some((filename, bytes)) = uploaded_file(request, "photo") else {
        return Response::redirect_with_flash("/photo", NO_FILE_MESSAGE);
    };
    let ext = match validate_extension(&filename, MediaKind::Image) {
        Ok(ext) => ext,
        Err(err) => return Response::redirect_with_flash("/photo", &err.to_string()),
    };

    let result = TempUpload::write(bytes, &ext).and_then(|upload| {
        let mut frame = load_image(upload.path())?;
        let mut detector = state.detectors.create()?;
        let faces = anonymize_frame(&mut frame, detector.as_mut())?;
        let jpeg = frame.encode_jpeg(state.config.jpeg_quality)?;
        Ok((faces, jpeg))
    });

    match result {
        Ok((faces, jpeg)) => {
            log::info!("photo processed ({} faces, {} bytes)", faces, jpeg.len());
            Response::bytes(200, "image/jpeg", jpeg)
        }
        Err(err) => {
            let message = match kind_of(&err) {
                ErrorKind::Decode => "Could not read image",
                _ => "Could not process image",
            };
            log::warn!("photo upload failed: {:#}", err);
            Response::redirect_with_flash("/photo", message)
        }
    }
}

fn process_video(request: &HttpRequest, state: &ServiceState) -> Response {
    let Some((filename, bytes)) = uploaded_file(request, "video") else {
        return Response::redirect_with_flash("/video", NO_FILE_MESSAGE);
    };
    let ext = match validate_extension(&filename, MediaKind::Video) {
        Ok(ext) => ext,
        Err(err) => return Response::redirect_with_flash("/video", &err.to_string()),
    };

    let result = (|| -> Result<_> {
        let upload = TempUpload::write(bytes, &ext)?;
        let output = temp_output("mp4")?;
        let mut detector = state.detectors.create()?;
        let report = transcode_file(upload.path(), &output, detector.as_mut(), |_, _| {
            ControlFlow::Continue(())
        })?;
        Ok((report, output))
    })();

    match result {
        Ok((report, output)) => {
            log::info!(
                "video processed ({} frames, {} faces)",
                report.frames,
                report.faces
            );
            Response::file("video/mp4", "anonymized_video.mp4", output)
        }
        Err(err) => {
            log::warn!("video upload failed: {:#}", err);
            let message = match kind_of(&err) {
                ErrorKind::Decode => "Could not open uploaded video".to_string(),
                ErrorKind::Validation => err.to_string(),
                ErrorKind::Device | ErrorKind::Processing => {
                    format!("Video processing failed: {err}")
                }
            };
            Response::redirect_with_flash("/video", &message)
        }
    }
}
