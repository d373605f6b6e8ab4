// src/traffic_light.rs
//
// Red / green light finder: HSV colour masks, Hough circles on each mask,
// then a mask-density check around every candidate centre. Only the top
// 40% of the image is considered.

use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const UPPER_BOUND: f64 = 0.4;
const WINDOW: i32 = 5;
const MAX_RADIUS: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LightColor {
    Red,
    Green,
}

impl LightColor {
    fn min_distance(self) -> f64 {
        match self {
            LightColor::Red => 80.0,
            LightColor::Green => 60.0,
        }
    }

    fn min_density(self) -> f64 {
        match self {
            LightColor::Red => 50.0,
            LightColor::Green => 100.0,
        }
    }
}

impl fmt::Display for LightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LightColor::Red => write!(f, "RED"),
            LightColor::Green => write!(f, "GREEN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrafficLight {
    pub color: LightColor,
    pub x: i32,
    pub y: i32,
    pub radius: i32,
}

/// Finds lit traffic lights in a BGR image.
pub fn detect(bgr: &Mat) -> Result<Vec<TrafficLight>> {
    if bgr.empty() {
        bail!("empty image");
    }

    let mut hsv = Mat::default();
    imgproc::cvt_color_def(bgr, &mut hsv, imgproc::COLOR_BGR2HSV)
        .context("HSV conversion failed")?;

    let red_low = hsv_mask(&hsv, [0.0, 100.0, 100.0], [10.0, 255.0, 255.0])?;
    let red_high = hsv_mask(&hsv, [160.0, 100.0, 100.0], [180.0, 255.0, 255.0])?;
    let mut red = Mat::default();
    core::add_def(&red_low, &red_high, &mut red).context("Mask merge failed")?;
    let green = hsv_mask(&hsv, [40.0, 50.0, 50.0], [90.0, 255.0, 255.0])?;

    let mut lights = find_lights(&red, LightColor::Red)?;
    lights.extend(find_lights(&green, LightColor::Green)?);

    debug!("{} traffic lights", lights.len());
    Ok(lights)
}

fn hsv_mask(hsv: &Mat, low: [f64; 3], high: [f64; 3]) -> Result<Mat> {
    let mut mask = Mat::default();
    core::in_range(
        hsv,
        &Scalar::new(low[0], low[1], low[2], 0.0),
        &Scalar::new(high[0], high[1], high[2], 0.0),
        &mut mask,
    )
    .context("Colour threshold failed")?;
    Ok(mask)
}

fn find_lights(mask: &Mat, color: LightColor) -> Result<Vec<TrafficLight>> {
    let mut circles: Vector<core::Vec3f> = Vector::new();
    imgproc::hough_circles(
        mask,
        &mut circles,
        imgproc::HOUGH_GRADIENT,
        1.0,
        color.min_distance(),
        50.0,
        10.0,
        0,
        MAX_RADIUS,
    )
    .context("Hough circle transform failed")?;

    let rows = mask.rows();
    let cols = mask.cols();
    let bound = f64::from(rows) * UPPER_BOUND;

    let mut lights = Vec::new();
    for c in circles.iter() {
        let (x, y, radius) = (c[0].round() as i32, c[1].round() as i32, c[2].round() as i32);
        if x > cols || y > rows || f64::from(y) > bound {
            continue;
        }
        if window_mean(mask, x, y)? > color.min_density() {
            lights.push(TrafficLight {
                color,
                x,
                y,
                radius,
            });
        }
    }
    Ok(lights)
}

/// Mean mask value over the in-bounds part of a 10x10 window at (x, y).
fn window_mean(mask: &Mat, x: i32, y: i32) -> Result<f64> {
    let mut sum = 0.0;
    let mut count = 0u32;
    for m in -WINDOW..WINDOW {
        for n in -WINDOW..WINDOW {
            let (row, col) = (y + m, x + n);
            if row < 0 || col < 0 || row >= mask.rows() || col >= mask.cols() {
                continue;
            }
            sum += f64::from(*mask.at_2d::<u8>(row, col)?);
            count += 1;
        }
    }
    Ok(if count == 0 { 0.0 } else { sum / f64::from(count) })
}

/// Draws a ring and a label for every light.
pub fn annotate(image: &mut Mat, lights: &[TrafficLight]) -> Result<()> {
    for light in lights {
        let center = core::Point::new(light.x, light.y);
        imgproc::circle(
            image,
            center,
            light.radius + 10,
            Scalar::new(0.0, 255.0, 0.0, 0.0),
            2,
            imgproc::LINE_8,
            0,
        )?;
        imgproc::put_text(
            image,
            &light.color.to_string(),
            center,
            imgproc::FONT_HERSHEY_SIMPLEX,
            1.0,
            Scalar::new(255.0, 0.0, 0.0, 0.0),
            2,
            imgproc::LINE_AA,
            false,
        )?;
    }
    Ok(())
}

/// Detects lights in an image file and writes `<stem>_lights.jpg` beside it.
pub fn annotate_file(input: &Path) -> Result<(Vec<TrafficLight>, PathBuf)> {
    let path = input
        .to_str()
        .with_context(|| format!("non UTF-8 path {}", input.display()))?;
    let mut image = imgcodecs::imread(path, imgcodecs::IMREAD_COLOR)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    if image.empty() {
        bail!("could not decode {}", input.display());
    }

    let lights = detect(&image)?;
    annotate(&mut image, &lights)?;

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let output = input.with_file_name(format!("{}_lights.jpg", stem));
    let out = output
        .to_str()
        .with_context(|| format!("non UTF-8 path {}", output.display()))?;
    imgcodecs::imwrite_def(out, &image)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!("✓ {} lights, annotated copy at {}", lights.len(), output.display());
    Ok((lights, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas() -> Mat {
        Mat::new_rows_cols_with_default(200, 200, core::CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn disc(image: &mut Mat, x: i32, y: i32, bgr: (f64, f64, f64)) {
        imgproc::circle(
            image,
            core::Point::new(x, y),
            12,
            Scalar::new(bgr.0, bgr.1, bgr.2, 0.0),
            -1,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
    }

    fn near(light: &TrafficLight, x: i32, y: i32) -> bool {
        (light.x - x).abs() <= 4 && (light.y - y).abs() <= 4
    }

    #[test]
    fn test_blank_image_has_no_lights() {
        assert!(detect(&canvas()).unwrap().is_empty());
    }

    #[test]
    fn test_red_light_in_upper_band() {
        let mut image = canvas();
        disc(&mut image, 100, 40, (0.0, 0.0, 255.0));

        let lights = detect(&image).unwrap();
        assert!(lights
            .iter()
            .any(|l| l.color == LightColor::Red && near(l, 100, 40)));
        assert!(lights.iter().all(|l| l.color == LightColor::Red));
    }

    #[test]
    fn test_green_light_in_upper_band() {
        let mut image = canvas();
        disc(&mut image, 60, 50, (0.0, 255.0, 0.0));

        let lights = detect(&image).unwrap();
        assert!(lights
            .iter()
            .any(|l| l.color == LightColor::Green && near(l, 60, 50)));
    }

    #[test]
    fn test_lights_low_in_frame_are_ignored() {
        let mut image = canvas();
        disc(&mut image, 100, 150, (0.0, 0.0, 255.0));
        assert!(detect(&image).unwrap().is_empty());
    }

    #[test]
    fn test_annotate_draws_ring() {
        let mut image = canvas();
        let light = TrafficLight {
            color: LightColor::Red,
            x: 100,
            y: 40,
            radius: 12,
        };
        annotate(&mut image, &[light]).unwrap();
        // ring passes 22 px left of the centre
        let hit = (75..=81).any(|col| image.at_2d::<core::Vec3b>(40, col).unwrap()[1] == 255);
        assert!(hit);
    }

    #[test]
    fn test_empty_image_is_an_error() {
        assert!(detect(&Mat::default()).is_err());
    }
}
