use async_trait::async_trait;
use image::DynamicImage;
use log::info;
use std::path::{ Path, PathBuf };
use tokio::fs;

use super::{ CameraStream, MediaDevices, StreamConstraints, StreamOpenError };

/// Console stand-in for a hardware camera: a still image on disk acts as the
/// device, and each acquisition decodes it into a single-frame stream.
/// Ideal-resolution constraints are honored by downscaling.
pub struct FileMediaDevices {
    source: PathBuf,
}

impl FileMediaDevices {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self { source: source.into() }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[async_trait]
impl MediaDevices for FileMediaDevices {
    fn is_secure_context(&self) -> bool {
        // Local files are a trusted origin.
        true
    }

    fn is_supported(&self) -> bool {
        true
    }

    async fn open_stream(
        &self,
        constraints: &StreamConstraints
    ) -> Result<Box<dyn CameraStream>, StreamOpenError> {
        let bytes = fs::read(&self.source).await.map_err(|e| {
            match e.kind() {
                std::io::ErrorKind::NotFound => StreamOpenError::NotFound,
                std::io::ErrorKind::PermissionDenied => StreamOpenError::PermissionDenied,
                _ => StreamOpenError::Other(e.to_string()),
            }
        })?;

        let mut image = image
            ::load_from_memory(&bytes)
            .map_err(|e| StreamOpenError::Other(e.to_string()))?;

        if let Some((width, height)) = constraints.ideal_resolution {
            if image.width() > width || image.height() > height {
                image = DynamicImage::ImageRgb8(
                    image.thumbnail(width, height).to_rgb8()
                );
            }
        }

        info!(
            "Opened {} as camera source ({}x{})",
            self.source.display(),
            image.width(),
            image.height()
        );
        Ok(Box::new(FileCameraStream::new(image)))
    }
}

pub struct FileCameraStream {
    width: u32,
    height: u32,
    frame: Option<Vec<u8>>,
}

impl FileCameraStream {
    fn new(image: DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        Self {
            width: rgb.width(),
            height: rgb.height(),
            frame: Some(rgb.into_raw()),
        }
    }
}

impl CameraStream for FileCameraStream {
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.frame.as_ref().map(|_| (self.width, self.height))
    }

    fn current_frame(&self) -> Option<Vec<u8>> {
        self.frame.clone()
    }

    fn stop(&mut self) {
        self.frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{ acquire, constraint_tiers, Viewfinder };
    use std::sync::Arc;

    fn write_test_png(tag: &str, width: u32, height: u32) -> PathBuf {
        let dir = std::env
            ::temp_dir()
            .join(format!("mathlens-camera-{}-{}", tag, uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("frame.png");
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 200, 30]));
        img.save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn opens_a_still_as_a_single_frame_stream() {
        let path = write_test_png("open", 32, 24);
        let devices = FileMediaDevices::new(&path);
        let stream = devices.open_stream(&constraint_tiers()[1]).await.unwrap();
        assert_eq!(stream.dimensions(), Some((32, 24)));
        assert_eq!(stream.current_frame().unwrap().len(), (32 * 24 * 3) as usize);
    }

    #[tokio::test]
    async fn ideal_resolution_downscales_oversized_frames() {
        let path = write_test_png("scale", 4000, 3000);
        let devices = FileMediaDevices::new(&path);
        let stream = devices.open_stream(&constraint_tiers()[0]).await.unwrap();
        let (w, h) = stream.dimensions().unwrap();
        assert!(w <= 1920 && h <= 1080);
    }

    #[tokio::test]
    async fn missing_source_reports_no_device() {
        let devices = FileMediaDevices::new("/nonexistent/frame.png");
        let err = acquire(&devices, None).await.err().unwrap();
        assert_eq!(err, crate::camera::CameraError::NoDevice);
    }

    #[tokio::test]
    async fn stopped_stream_loses_dimensions_and_frames() {
        let path = write_test_png("stop", 16, 16);
        let devices = FileMediaDevices::new(&path);
        let mut stream = devices.open_stream(&constraint_tiers()[2]).await.unwrap();
        stream.stop();
        assert!(stream.dimensions().is_none());
        assert!(stream.current_frame().is_none());
    }

    #[tokio::test]
    async fn viewfinder_capture_roundtrips_through_jpeg() {
        let path = write_test_png("capture", 20, 10);
        let mut viewfinder = Viewfinder::new(Arc::new(FileMediaDevices::new(path)));
        viewfinder.start().await.unwrap();
        let data_uri = viewfinder.capture_jpeg(false).unwrap();
        assert!(data_uri.starts_with("data:image/jpeg;base64,"));
    }
}
