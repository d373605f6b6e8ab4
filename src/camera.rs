// src/camera.rs

use crate::types::{CameraConfig, Frame};
use anyhow::{bail, Context, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use std::time::Instant;
use tracing::{info, warn};

/// Anything that can hand the control loop one frame at a time.
///
/// `Ok(None)` means the device had nothing for us this tick. Callers skip
/// the iteration and carry on; only `Err` is a fault.
pub trait FrameSource {
    fn read(&mut self) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<Option<Frame>> {
        (**self).read()
    }
}

/// V4L2 camera opened through OpenCV.
pub struct CameraSource {
    cap: VideoCapture,
    opened_at: Instant,
}

impl CameraSource {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        info!(
            "Opening camera {} at {}x{} @ {:.1} FPS",
            config.device, config.width, config.height, config.fps
        );

        let mut cap = VideoCapture::new(config.device, videoio::CAP_V4L2)
            .context("Failed to create video capture")?;

        if !cap.is_opened()? {
            bail!("Failed to open camera device {}", config.device);
        }

        VideoCaptureTrait::set(&mut cap, videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        VideoCaptureTrait::set(&mut cap, videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;
        VideoCaptureTrait::set(&mut cap, videoio::CAP_PROP_FPS, config.fps)?;

        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)?;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)?;
        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;

        if (fps - config.fps).abs() > 0.5 {
            warn!(
                "Camera delivers {:.1} FPS instead of requested {:.1}",
                fps, config.fps
            );
        }

        info!("✓ Camera ready: {}x{} @ {:.1} FPS", width, height, fps);

        Ok(Self {
            cap,
            opened_at: Instant::now(),
        })
    }
}

impl FrameSource for CameraSource {
    fn read(&mut self) -> Result<Option<Frame>> {
        let mut mat = Mat::default();

        let grabbed =
            VideoCaptureTrait::read(&mut self.cap, &mut mat).context("Camera read failed")?;
        if !grabbed || mat.empty() {
            return Ok(None);
        }

        let timestamp_ms = self.opened_at.elapsed().as_secs_f64() * 1000.0;

        Ok(Some(frame_from_mat(&mat, timestamp_ms)?))
    }
}

/// Copy a BGR `CV_8UC3` matrix into an owned [`Frame`].
pub fn frame_from_mat(mat: &Mat, timestamp_ms: f64) -> Result<Frame> {
    if mat.channels() != 3 {
        bail!("expected a 3-channel image, got {} channels", mat.channels());
    }
    let owned;
    let continuous = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone()?;
        &owned
    };

    Ok(Frame {
        data: continuous.data_bytes()?.to_vec(),
        width: mat.cols() as usize,
        height: mat.rows() as usize,
        timestamp_ms,
    })
}

/// View a [`Frame`] as an owned BGR `Mat`.
pub fn frame_to_mat(frame: &Frame) -> Result<Mat> {
    if !frame.is_valid() {
        bail!(
            "frame buffer of {} bytes does not match {}x{}x3",
            frame.data.len(),
            frame.width,
            frame.height
        );
    }
    let flat = Mat::from_slice(&frame.data)?;
    let shaped = flat.reshape(3, frame.height as i32)?;
    Ok(shaped.try_clone()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_mat_roundtrip_keeps_pixels() {
        let mut frame = Frame::filled(8, 4, [0, 0, 0]);
        // pixel (x=2, y=1) set to B=10 G=20 R=30
        let idx = (8 + 2) * 3;
        frame.data[idx..idx + 3].copy_from_slice(&[10, 20, 30]);

        let mat = frame_to_mat(&frame).unwrap();
        assert_eq!(mat.rows(), 4);
        assert_eq!(mat.cols(), 8);
        assert_eq!(mat.channels(), 3);

        let back = frame_from_mat(&mat, 5.0).unwrap();
        assert_eq!(back.width, 8);
        assert_eq!(back.height, 4);
        assert_eq!(back.data, frame.data);
        assert_eq!(back.timestamp_ms, 5.0);
    }

    #[test]
    fn test_rejects_truncated_frame() {
        let frame = Frame::new(vec![0; 10], 8, 4, 0.0);
        assert!(frame_to_mat(&frame).is_err());
    }
}
