// src/inference.rs

use anyhow::{bail, Context, Result};
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::path::Path;
use tracing::{debug, info};

/// Lane segmentation capability: a `[N, 3, H, W]` image batch in, raw
/// per-class scores `[N, C, h, w]` out. Softmax is the caller's job.
pub trait SegmentationModel {
    fn infer(&mut self, batch: &Array4<f32>) -> Result<Array4<f32>>;
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for Box<M> {
    fn infer(&mut self, batch: &Array4<f32>) -> Result<Array4<f32>> {
        (**self).infer(batch)
    }
}

/// ONNX Runtime backed segmentation model.
pub struct OnnxSegmentationModel {
    session: Session,
    input_name: String,
}

impl OnnxSegmentationModel {
    pub fn load(path: impl AsRef<Path>, input_name: &str, num_threads: usize) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing segmentation model");
        info!("Model path: {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_threads.max(1))?
            .with_inter_threads(1)?
            .commit_from_file(path)
            .context("Failed to load model")?;

        info!("✓ Segmentation model loaded");

        Ok(Self {
            session,
            input_name: input_name.to_string(),
        })
    }
}

impl SegmentationModel for OnnxSegmentationModel {
    fn infer(&mut self, batch: &Array4<f32>) -> Result<Array4<f32>> {
        debug!("Running inference on {:?}", batch.shape());

        let shape = batch.shape().to_vec();
        let data: Vec<f32> = batch.iter().copied().collect();
        let input_value = Tensor::from_array((shape.as_slice(), data.into_boxed_slice()))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .context("Inference failed")?;

        let (output_shape, data_slice) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract output tensor")?;

        let dims: Vec<usize> = output_shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 4 {
            bail!("expected a 4-D model output, got shape {:?}", dims);
        }

        Ok(Array4::from_shape_vec(
            (dims[0], dims[1], dims[2], dims[3]),
            data_slice.to_vec(),
        )?)
    }
}
