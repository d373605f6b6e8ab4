// src/detection/mod.rs

pub mod camera_geometry;
pub mod geometric;
pub mod neural;
pub mod polyfit;

pub use camera_geometry::{CameraGeometry, LaneGrid};
pub use geometric::{GeometricExtractor, GeometricSignal};
pub use neural::{LaneFit, NeuralExtractor, NeuralSignal};
pub use polyfit::LanePolynomial;

use crate::inference::OnnxSegmentationModel;
use crate::types::{Config, ExtractorKind, Frame, SteeringAngle};
use anyhow::Result;

/// What one frame contributes to steering.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneSignal {
    pub angle: SteeringAngle,
    pub segments: usize,
    /// Left and right boundaries, neural extractor only.
    pub lanes: Option<(LanePolynomial, LanePolynomial)>,
}

/// The two interchangeable frame → angle extractors.
pub enum LaneSignalExtractor {
    Geometric(GeometricExtractor),
    Neural(NeuralExtractor),
}

impl LaneSignalExtractor {
    /// Builds the configured extractor, loading the ONNX model if needed.
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.extractor {
            ExtractorKind::Geometric => Ok(Self::Geometric(GeometricExtractor::new(
                config.geometric.clone(),
            ))),
            ExtractorKind::Neural => {
                let model = OnnxSegmentationModel::load(
                    &config.neural.model_path,
                    &config.neural.input_name,
                    config.neural.num_threads,
                )?;
                Ok(Self::Neural(NeuralExtractor::new(
                    Box::new(model),
                    config.neural.clone(),
                    config.geometric.clone(),
                )?))
            }
        }
    }

    pub fn kind(&self) -> ExtractorKind {
        match self {
            Self::Geometric(_) => ExtractorKind::Geometric,
            Self::Neural(_) => ExtractorKind::Neural,
        }
    }

    pub fn extract(&mut self, frame: &Frame) -> Result<LaneSignal> {
        match self {
            Self::Geometric(extractor) => {
                let signal = extractor.extract(frame)?;
                Ok(LaneSignal {
                    angle: signal.angle,
                    segments: signal.segments.len(),
                    lanes: None,
                })
            }
            Self::Neural(extractor) => {
                let signal = extractor.extract(frame)?;
                Ok(LaneSignal {
                    angle: signal.overlay.angle,
                    segments: signal.overlay.segments.len(),
                    lanes: Some((signal.fit.left, signal.fit.right)),
                })
            }
        }
    }
}
