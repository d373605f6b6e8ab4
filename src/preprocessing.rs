// src/preprocessing.rs

use crate::camera::frame_to_mat;
use crate::types::Frame;
use anyhow::{Context, Result};
use ndarray::{Array3, Array4, Axis};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Turn a BGR camera frame into a normalized `[1, 3, H, W]` RGB batch.
pub fn preprocess(frame: &Frame, dst_width: usize, dst_height: usize) -> Result<Array4<f32>> {
    let bgr = frame_to_mat(frame).context("Cannot preprocess frame")?;

    let mut rgb = Mat::default();
    imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB)
        .context("RGB conversion failed")?;

    let resized = if frame.width == dst_width && frame.height == dst_height {
        rgb
    } else {
        let mut out = Mat::default();
        imgproc::resize(
            &rgb,
            &mut out,
            core::Size::new(dst_width as i32, dst_height as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )
        .context("Resize failed")?;
        out
    };

    // HWC u8 -> CHW f32
    let hwc = Array3::from_shape_vec((dst_height, dst_width, 3), resized.data_bytes()?.to_vec())?;
    let mut chw = hwc.mapv(|v| f32::from(v) / 255.0).permuted_axes([2, 0, 1]);
    for (c, mut plane) in chw.axis_iter_mut(Axis(0)).enumerate() {
        plane.mapv_inplace(|p| (p - MEAN[c]) / STD[c]);
    }

    Ok(chw.as_standard_layout().into_owned().insert_axis(Axis(0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape() {
        let frame = Frame::filled(640, 480, [128, 128, 128]);
        let batch = preprocess(&frame, 224, 224).unwrap();
        assert_eq!(batch.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_channels_are_reordered_to_rgb() {
        // pure blue in BGR
        let frame = Frame::filled(4, 4, [255, 0, 0]);
        let batch = preprocess(&frame, 4, 4).unwrap();
        let red = batch[[0, 0, 2, 2]];
        let blue = batch[[0, 2, 2, 2]];
        assert!((red - (0.0 - MEAN[0]) / STD[0]).abs() < 1e-5);
        assert!((blue - (1.0 - MEAN[2]) / STD[2]).abs() < 1e-5);
    }

    #[test]
    fn test_uniform_frame_stays_uniform_after_resize() {
        let frame = Frame::filled(100, 100, [255, 255, 255]);
        let batch = preprocess(&frame, 50, 50).unwrap();
        for c in 0..3 {
            let expected = (1.0 - MEAN[c]) / STD[c];
            assert!(batch
                .index_axis(Axis(1), c)
                .iter()
                .all(|&v| (v - expected).abs() < 1e-5));
        }
    }

    #[test]
    fn test_rejects_bad_buffer() {
        let frame = Frame::new(vec![0; 5], 4, 4, 0.0);
        assert!(preprocess(&frame, 4, 4).is_err());
    }
}
