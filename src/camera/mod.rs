pub mod file;

use async_trait::async_trait;
use base64::prelude::*;
use image::codecs::jpeg::JpegEncoder;
use log::{ info, warn };
use std::sync::Arc;

pub use file::FileMediaDevices;

/// JPEG quality for captured stills, out of 100.
const CAPTURE_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("Camera access requires a secure context.")]
    InsecureContext,
    #[error("This platform does not support camera capture.")]
    UnsupportedPlatform,
    #[error("Camera permission denied. Please allow access and retry.")]
    PermissionDenied,
    #[error("No camera device found.")]
    NoDevice,
    #[error("Unable to access camera. Please try again.")]
    Unknown,
}

/// Failure of a single constraint tier, used to classify the final error
/// once every tier has been exhausted.
#[derive(Debug, thiserror::Error)]
pub enum StreamOpenError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("no device matched the constraints")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Rear-facing camera, preferred for photographing a document.
    Environment,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    pub facing: FacingMode,
    /// Requested ideal resolution; `None` lets the device pick.
    pub ideal_resolution: Option<(u32, u32)>,
}

/// Fallback sequence attempted in strict order, first success wins.
pub fn constraint_tiers() -> [StreamConstraints; 3] {
    [
        StreamConstraints {
            facing: FacingMode::Environment,
            ideal_resolution: Some((1920, 1080)),
        },
        StreamConstraints {
            facing: FacingMode::Environment,
            ideal_resolution: None,
        },
        StreamConstraints {
            facing: FacingMode::Any,
            ideal_resolution: None,
        },
    ]
}

/// A live stream handle. Implementations must make `stop` idempotent and
/// release the underlying device tracks.
pub trait CameraStream: Send {
    /// Frame dimensions, known only once the stream has produced metadata.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Current frame as packed RGB8, row major.
    fn current_frame(&self) -> Option<Vec<u8>>;

    fn stop(&mut self);
}

/// Platform seam for camera negotiation, the capture analog of the pluggable
/// chat/history backends.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    fn is_secure_context(&self) -> bool;

    fn is_supported(&self) -> bool;

    async fn open_stream(
        &self,
        constraints: &StreamConstraints
    ) -> Result<Box<dyn CameraStream>, StreamOpenError>;
}

/// Negotiates a live stream with tiered constraint fallback. Any previously
/// held stream is stopped first so the hardware is never double-locked.
/// Per-tier failures are swallowed; only exhaustion of every tier reports an
/// error, classified from the last failure.
pub async fn acquire(
    devices: &dyn MediaDevices,
    previous: Option<Box<dyn CameraStream>>
) -> Result<Box<dyn CameraStream>, CameraError> {
    if let Some(mut stream) = previous {
        stream.stop();
    }

    if !devices.is_secure_context() {
        return Err(CameraError::InsecureContext);
    }
    if !devices.is_supported() {
        return Err(CameraError::UnsupportedPlatform);
    }

    let mut last_error = None;
    for constraints in constraint_tiers() {
        match devices.open_stream(&constraints).await {
            Ok(stream) => {
                info!("Camera stream acquired ({:?})", constraints);
                return Ok(stream);
            }
            Err(e) => {
                warn!("Camera constraint tier failed ({:?}): {}", constraints, e);
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(StreamOpenError::PermissionDenied) => CameraError::PermissionDenied,
        Some(StreamOpenError::NotFound) => CameraError::NoDevice,
        _ => CameraError::Unknown,
    })
}

/// Owns the negotiated stream and turns frames into stills. All tracks are
/// stopped on explicit `stop` and on drop.
pub struct Viewfinder {
    devices: Arc<dyn MediaDevices>,
    stream: Option<Box<dyn CameraStream>>,
}

impl Viewfinder {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices, stream: None }
    }

    /// Runs the full tiered negotiation, replacing (and stopping) any
    /// current stream. User-triggered retry calls this again from the top.
    pub async fn start(&mut self) -> Result<(), CameraError> {
        let previous = self.stream.take();
        let stream = acquire(self.devices.as_ref(), previous).await?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_some()
    }

    /// Rasterizes the current frame into a base64 JPEG data URI. Refuses
    /// (`None`) while `busy`, when no stream is live, or before the stream
    /// knows its dimensions.
    pub fn capture_jpeg(&self, busy: bool) -> Option<String> {
        if busy {
            return None;
        }
        let stream = self.stream.as_ref()?;
        let (width, height) = stream.dimensions()?;
        if width == 0 || height == 0 {
            return None;
        }
        let frame = stream.current_frame()?;
        encode_jpeg_data_uri(&frame, width, height)
    }

    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

impl Drop for Viewfinder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn encode_jpeg_data_uri(rgb: &[u8], width: u32, height: u32) -> Option<String> {
    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, CAPTURE_JPEG_QUALITY);
    if let Err(e) = encoder.encode(rgb, width, height, image::ExtendedColorType::Rgb8) {
        warn!("Failed to encode capture: {}", e);
        return None;
    }
    Some(format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(&jpeg)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{ AtomicBool, AtomicUsize, Ordering };
    use std::sync::Mutex;

    struct FakeStream {
        dimensions: Option<(u32, u32)>,
        stopped: Arc<AtomicBool>,
    }

    impl CameraStream for FakeStream {
        fn dimensions(&self) -> Option<(u32, u32)> {
            self.dimensions
        }

        fn current_frame(&self) -> Option<Vec<u8>> {
            let (w, h) = self.dimensions?;
            Some(vec![127u8; (w * h * 3) as usize])
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct FakeDevices {
        secure: bool,
        supported: bool,
        outcomes: Mutex<VecDeque<Result<Option<(u32, u32)>, StreamOpenError>>>,
        opens_attempted: AtomicUsize,
    }

    impl FakeDevices {
        fn scripted(
            outcomes: Vec<Result<Option<(u32, u32)>, StreamOpenError>>
        ) -> Self {
            Self {
                secure: true,
                supported: true,
                outcomes: Mutex::new(outcomes.into()),
                opens_attempted: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaDevices for FakeDevices {
        fn is_secure_context(&self) -> bool {
            self.secure
        }

        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn open_stream(
            &self,
            _constraints: &StreamConstraints
        ) -> Result<Box<dyn CameraStream>, StreamOpenError> {
            self.opens_attempted.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(StreamOpenError::NotFound));
            outcome.map(|dimensions| {
                Box::new(FakeStream {
                    dimensions,
                    stopped: Arc::new(AtomicBool::new(false)),
                }) as Box<dyn CameraStream>
            })
        }
    }

    #[test]
    fn tiers_are_ordered_rear_hd_then_rear_then_any() {
        let tiers = constraint_tiers();
        assert_eq!(tiers[0].facing, FacingMode::Environment);
        assert_eq!(tiers[0].ideal_resolution, Some((1920, 1080)));
        assert_eq!(tiers[1].facing, FacingMode::Environment);
        assert_eq!(tiers[1].ideal_resolution, None);
        assert_eq!(tiers[2].facing, FacingMode::Any);
        assert_eq!(tiers[2].ideal_resolution, None);
    }

    #[tokio::test]
    async fn falls_through_to_third_tier() {
        let devices = FakeDevices::scripted(vec![
            Err(StreamOpenError::Other("constraint unsatisfiable".into())),
            Err(StreamOpenError::Other("constraint unsatisfiable".into())),
            Ok(Some((640, 480)))
        ]);
        let stream = acquire(&devices, None).await.unwrap();
        assert_eq!(stream.dimensions(), Some((640, 480)));
        assert_eq!(devices.opens_attempted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_classifies_permission_denial() {
        let devices = FakeDevices::scripted(vec![
            Err(StreamOpenError::PermissionDenied),
            Err(StreamOpenError::PermissionDenied),
            Err(StreamOpenError::PermissionDenied)
        ]);
        assert_eq!(acquire(&devices, None).await.err().unwrap(), CameraError::PermissionDenied);
    }

    #[tokio::test]
    async fn exhaustion_classifies_by_last_error() {
        let devices = FakeDevices::scripted(vec![
            Err(StreamOpenError::PermissionDenied),
            Err(StreamOpenError::PermissionDenied),
            Err(StreamOpenError::NotFound)
        ]);
        assert_eq!(acquire(&devices, None).await.err().unwrap(), CameraError::NoDevice);

        let devices = FakeDevices::scripted(vec![
            Err(StreamOpenError::NotFound),
            Err(StreamOpenError::NotFound),
            Err(StreamOpenError::Other("track ended".into()))
        ]);
        assert_eq!(acquire(&devices, None).await.err().unwrap(), CameraError::Unknown);
    }

    #[tokio::test]
    async fn insecure_context_short_circuits_before_any_open() {
        let mut devices = FakeDevices::scripted(vec![Ok(Some((640, 480)))]);
        devices.secure = false;
        assert_eq!(acquire(&devices, None).await.err().unwrap(), CameraError::InsecureContext);
        assert_eq!(devices.opens_attempted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_platform_support_short_circuits() {
        let mut devices = FakeDevices::scripted(vec![Ok(Some((640, 480)))]);
        devices.supported = false;
        assert_eq!(acquire(&devices, None).await.err().unwrap(), CameraError::UnsupportedPlatform);
        assert_eq!(devices.opens_attempted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn previous_stream_is_stopped_on_reacquire() {
        let stopped = Arc::new(AtomicBool::new(false));
        let previous: Box<dyn CameraStream> = Box::new(FakeStream {
            dimensions: Some((320, 240)),
            stopped: Arc::clone(&stopped),
        });
        let devices = FakeDevices::scripted(vec![Ok(Some((640, 480)))]);
        acquire(&devices, Some(previous)).await.unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn capture_produces_a_jpeg_data_uri() {
        let devices = Arc::new(FakeDevices::scripted(vec![Ok(Some((8, 8)))]));
        let mut viewfinder = Viewfinder::new(devices);
        viewfinder.start().await.unwrap();

        let capture = viewfinder.capture_jpeg(false).unwrap();
        assert!(capture.starts_with("data:image/jpeg;base64,"));
        let payload = capture.split_once(',').unwrap().1;
        let jpeg = BASE64_STANDARD.decode(payload).unwrap();
        // JPEG SOI marker.
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }

    #[tokio::test]
    async fn capture_refuses_while_busy_or_without_dimensions() {
        let devices: Arc<dyn MediaDevices> = Arc::new(
            FakeDevices::scripted(vec![Ok(Some((8, 8))), Ok(None)])
        );
        let mut viewfinder = Viewfinder::new(Arc::clone(&devices));

        // No stream yet.
        assert!(viewfinder.capture_jpeg(false).is_none());

        viewfinder.start().await.unwrap();
        assert!(viewfinder.capture_jpeg(true).is_none());
        assert!(viewfinder.capture_jpeg(false).is_some());

        // Second acquisition yields a stream with unknown dimensions.
        viewfinder.start().await.unwrap();
        assert!(viewfinder.capture_jpeg(false).is_none());
    }
}
