// src/detection/neural.rs
//
// Segmentation-based lane signal.
//
//   frame ─► preprocess ─► model ─► softmax ─┬─► cubic fit per lane (road grid)
//                                            └─► 0.5 overlay ─► geometric angle
//
// Sparse or empty masks never fail: a lane with no point above the
// probability threshold gets the zero polynomial.

use super::camera_geometry::{CameraGeometry, LaneGrid};
use super::geometric::{GeometricExtractor, GeometricSignal};
use super::polyfit::{fit_lane_polynomial, LanePolynomial};
use crate::inference::SegmentationModel;
use crate::preprocessing::preprocess;
use crate::types::{Frame, GeometricConfig, NeuralConfig};
use anyhow::{bail, Context, Result};
use ndarray::{s, Array2, Array4, ArrayView2, Axis};
use tracing::debug;

pub const BACKGROUND_CLASS: usize = 0;
pub const LEFT_CLASS: usize = 1;
pub const RIGHT_CLASS: usize = 2;
const NUM_CLASSES: usize = 3;

/// Per-pixel class probabilities for one frame.
#[derive(Debug, Clone)]
pub struct ClassProbabilities {
    pub background: Array2<f32>,
    pub left: Array2<f32>,
    pub right: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct LaneFit {
    pub left: LanePolynomial,
    pub right: LanePolynomial,
    pub left_probs: Array2<f32>,
    pub right_probs: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct NeuralSignal {
    pub fit: LaneFit,
    /// Geometric pass over the thresholded lane overlay.
    pub overlay: GeometricSignal,
}

pub struct NeuralExtractor {
    model: Box<dyn SegmentationModel + Send>,
    config: NeuralConfig,
    grid: LaneGrid,
    overlay_extractor: GeometricExtractor,
}

impl NeuralExtractor {
    pub fn new(
        model: Box<dyn SegmentationModel + Send>,
        config: NeuralConfig,
        geometric: GeometricConfig,
    ) -> Result<Self> {
        let map_width = config.input_width / config.output_stride;
        let map_height = config.input_height / config.output_stride;
        let grid = CameraGeometry::new(&config.geometry, map_width, map_height)?
            .precompute_grid()
            .context("Failed to precompute lane grid")?;

        debug!(
            "Neural extractor: {}x{} input, {}x{} maps, cut_v={}",
            config.input_width, config.input_height, map_width, map_height, grid.cut_v
        );

        Ok(Self {
            model,
            config,
            grid,
            overlay_extractor: GeometricExtractor::new(geometric),
        })
    }

    pub fn grid(&self) -> &LaneGrid {
        &self.grid
    }

    pub fn extract(&mut self, frame: &Frame) -> Result<NeuralSignal> {
        let fit = self.lane_fit(frame)?;
        let overlay_frame = lane_overlay(
            fit.left_probs.view(),
            fit.right_probs.view(),
            self.config.overlay_threshold,
            frame.timestamp_ms,
        );
        let overlay = self.overlay_extractor.extract(&overlay_frame)?;

        debug!(
            "left: {} | right: {} | overlay angle {}",
            fit.left, fit.right, overlay.angle
        );

        Ok(NeuralSignal { fit, overlay })
    }

    pub fn lane_fit(&mut self, frame: &Frame) -> Result<LaneFit> {
        let batch = preprocess(frame, self.config.input_width, self.config.input_height)?;
        let logits = self.model.infer(&batch).context("Segmentation model failed")?;
        let probs = class_probabilities(&logits)?;

        let left = self.fit_poly(probs.left.view())?;
        let right = self.fit_poly(probs.right.view())?;

        Ok(LaneFit {
            left,
            right,
            left_probs: probs.left,
            right_probs: probs.right,
        })
    }

    /// Weighted cubic through the grid points whose probability clears
    /// the threshold.
    pub fn fit_poly(&self, probs: ArrayView2<f32>) -> Result<LanePolynomial> {
        if probs.dim() != (self.grid.height, self.grid.width) {
            bail!(
                "probability map is {:?}, lane grid expects {}x{}",
                probs.dim(),
                self.grid.height,
                self.grid.width
            );
        }

        let threshold = self.config.prob_threshold;
        let samples: Vec<(f64, f64, f64)> = probs
            .slice(s![self.grid.cut_v.., ..])
            .iter()
            .zip(self.grid.points.iter())
            .filter(|(&p, _)| p > threshold)
            .map(|(&p, &(x, y))| (x, y, f64::from(p)))
            .collect();

        Ok(fit_lane_polynomial(&samples).unwrap_or(LanePolynomial::ZERO))
    }
}

/// Softmax over the class axis of the first batch element.
pub fn class_probabilities(logits: &Array4<f32>) -> Result<ClassProbabilities> {
    let (n, c, _, _) = logits.dim();
    if n == 0 || c != NUM_CLASSES {
        bail!(
            "expected logits shaped [N>=1, {}, H, W], got {:?}",
            NUM_CLASSES,
            logits.shape()
        );
    }

    let first = logits.index_axis(Axis(0), 0);
    let max = first.fold_axis(Axis(0), f32::NEG_INFINITY, |&a, &b| a.max(b));
    let exp: Vec<Array2<f32>> = (0..NUM_CLASSES)
        .map(|k| (&first.index_axis(Axis(0), k) - &max).mapv(f32::exp))
        .collect();
    let total = &exp[BACKGROUND_CLASS] + &exp[LEFT_CLASS] + &exp[RIGHT_CLASS];

    Ok(ClassProbabilities {
        background: &exp[BACKGROUND_CLASS] / &total,
        left: &exp[LEFT_CLASS] / &total,
        right: &exp[RIGHT_CLASS] / &total,
    })
}

/// White wherever either lane is more likely than `threshold`, black
/// elsewhere, as a BGR frame the geometric extractor can consume.
pub fn lane_overlay(
    left: ArrayView2<f32>,
    right: ArrayView2<f32>,
    threshold: f32,
    timestamp_ms: f64,
) -> Frame {
    let (height, width) = left.dim();
    let mut data = vec![0u8; width * height * 3];
    for ((pixel, &l), &r) in data.chunks_exact_mut(3).zip(left.iter()).zip(right.iter()) {
        if l > threshold || r > threshold {
            pixel.copy_from_slice(&[255, 255, 255]);
        }
    }
    Frame::new(data, width, height, timestamp_ms)
}
