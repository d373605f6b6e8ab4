// src/detection/geometric.rs
//
// Classical lane signal: blur → Canny → probabilistic Hough, then sum the
// angles of every segment found. The sum is the steering signal; it is
// rebuilt from nothing on every frame.

use crate::camera::frame_to_mat;
use crate::types::{Frame, GeometricConfig, LineSegment, SteeringAngle};
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat, Vector},
    imgproc,
    prelude::*,
};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GeometricSignal {
    pub angle: SteeringAngle,
    pub segments: Vec<LineSegment>,
}

impl GeometricSignal {
    pub fn has_lines(&self) -> bool {
        !self.segments.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GeometricExtractor {
    config: GeometricConfig,
}

impl GeometricExtractor {
    pub fn new(config: GeometricConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, frame: &Frame) -> Result<GeometricSignal> {
        let segments = self.detect_segments(frame)?;
        let angle = SteeringAngle::from_segments(&segments);

        if segments.is_empty() {
            debug!("NO LINES DETECTED");
        } else {
            debug!("{} segments, angle {}", segments.len(), angle);
        }

        Ok(GeometricSignal { angle, segments })
    }

    pub fn detect_segments(&self, frame: &Frame) -> Result<Vec<LineSegment>> {
        let bgr = frame_to_mat(frame)?;
        let mut gray = Mat::default();
        imgproc::cvt_color_def(&bgr, &mut gray, imgproc::COLOR_BGR2GRAY)
            .context("Grayscale conversion failed")?;
        self.detect_in_gray(&gray)
    }

    /// Runs on an 8-bit single-channel image.
    pub fn detect_in_gray(&self, gray: &Mat) -> Result<Vec<LineSegment>> {
        let cfg = &self.config;

        let mut blurred = Mat::default();
        imgproc::gaussian_blur_def(
            gray,
            &mut blurred,
            core::Size::new(cfg.blur_kernel, cfg.blur_kernel),
            0.0,
        )
        .context("Gaussian blur failed")?;

        let mut edges = Mat::default();
        imgproc::canny_def(&blurred, &mut edges, cfg.canny_low, cfg.canny_high)
            .context("Canny edge detection failed")?;

        let mut lines: Vector<core::Vec4i> = Vector::new();
        imgproc::hough_lines_p(
            &edges,
            &mut lines,
            cfg.rho,
            cfg.theta,
            cfg.vote_threshold,
            cfg.min_line_length,
            cfg.max_line_gap,
        )
        .context("Hough line transform failed")?;

        Ok(lines
            .iter()
            .map(|l| LineSegment::new(l[0], l[1], l[2], l[3]))
            .collect())
    }
}
