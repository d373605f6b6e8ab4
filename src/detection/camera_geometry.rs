// src/detection/camera_geometry.rs
//
// Pinhole camera over a flat road. Maps image pixels to road coordinates
// so lane probabilities can be fit in a metric, bird's-eye frame.
//
// Frames:
//   - camera: x right, y down, z forward (OpenCV convention)
//   - road:   same axes as the camera at zero yaw/pitch/roll, origin on the
//             road surface below the camera, y pointing down into the road
//   - ISO 8855 (output): X forward, Y left

use crate::types::CameraGeometryConfig;
use anyhow::{bail, Context, Result};
use nalgebra::{Matrix3, Vector3};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CameraGeometry {
    image_width: usize,
    image_height: usize,
    height_m: f64,
    max_distance_m: f64,
    intrinsic: Matrix3<f64>,
    intrinsic_inv: Matrix3<f64>,
    rotation_road_to_cam: Matrix3<f64>,
    rotation_cam_to_road: Matrix3<f64>,
    translation_cam_to_road: Vector3<f64>,
    road_normal_camframe: Vector3<f64>,
}

/// Road coordinates of every pixel at or below `cut_v`, row-major.
#[derive(Debug, Clone)]
pub struct LaneGrid {
    pub cut_v: usize,
    pub width: usize,
    pub height: usize,
    /// ISO 8855 (X forward, Y left) per pixel.
    pub points: Vec<(f64, f64)>,
}

impl LaneGrid {
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

impl CameraGeometry {
    pub fn new(
        config: &CameraGeometryConfig,
        image_width: usize,
        image_height: usize,
    ) -> Result<Self> {
        if image_width == 0 || image_height == 0 {
            bail!("camera geometry needs a non-empty image");
        }
        if !(config.height_m > 0.0) {
            bail!("camera height must be positive, got {}", config.height_m);
        }
        if !(config.fov_deg > 0.0 && config.fov_deg < 180.0) {
            bail!("field of view must be in (0, 180), got {}", config.fov_deg);
        }

        let intrinsic = intrinsic_matrix(config.fov_deg, image_width, image_height);
        let intrinsic_inv = intrinsic
            .try_inverse()
            .context("intrinsic matrix is singular")?;

        let (sy, cy) = config.yaw_deg.to_radians().sin_cos();
        let (sp, cp) = config.pitch_deg.to_radians().sin_cos();
        let (sr, cr) = config.roll_deg.to_radians().sin_cos();

        #[rustfmt::skip]
        let rotation_road_to_cam = Matrix3::new(
            cr * cy + sp * sr * sy, cr * sp * sy - cy * sr,  -cp * sy,
            cp * sr,                cp * cr,                 sp,
            cr * sy - cy * sp * sr, -cr * cy * sp - sr * sy, cp * cy,
        );
        let rotation_cam_to_road = rotation_road_to_cam.transpose();
        let translation_cam_to_road = Vector3::new(0.0, -config.height_m, 0.0);
        let road_normal_camframe = rotation_cam_to_road.transpose() * Vector3::y();

        Ok(Self {
            image_width,
            image_height,
            height_m: config.height_m,
            max_distance_m: config.max_distance_m,
            intrinsic,
            intrinsic_inv,
            rotation_road_to_cam,
            rotation_cam_to_road,
            translation_cam_to_road,
            road_normal_camframe,
        })
    }

    /// Intersect the ray through pixel (u, v) with the road plane.
    /// Returns ISO 8855 (X forward, Y left), or `None` at/above the horizon.
    pub fn uv_to_road(&self, u: f64, v: f64) -> Option<(f64, f64)> {
        let ray = self.intrinsic_inv * Vector3::new(u, v, 1.0);
        let denominator = self.road_normal_camframe.dot(&ray);
        if denominator <= f64::EPSILON {
            return None;
        }
        let on_road_cam = ray * (self.height_m / denominator);
        let road = self.rotation_cam_to_road * on_road_cam + self.translation_cam_to_road;
        Some((road.z, -road.x))
    }

    /// Project an ISO 8855 road point into the image.
    pub fn road_to_uv(&self, x_forward: f64, y_left: f64) -> (f64, f64) {
        let road = Vector3::new(-y_left, 0.0, x_forward);
        let cam = self.rotation_road_to_cam * (road - self.translation_cam_to_road);
        let uv = self.intrinsic * cam;
        (uv.x / uv.z, uv.y / uv.z)
    }

    /// First image row treated as road. Starts one below the projection of
    /// a point `max_distance_m` straight ahead and moves down until the whole
    /// row is below the horizon, which a rolled camera tilts. Equals the image
    /// height when no row qualifies.
    pub fn cut_v(&self) -> usize {
        let (_, v) = self.road_to_uv(self.max_distance_m, 0.0);
        let cut = (v + 1.0).trunc();
        let start = if cut.is_nan() || cut < 0.0 {
            0
        } else {
            (cut as usize).min(self.image_height)
        };
        (start..self.image_height)
            .find(|&row| self.row_on_road(row))
            .unwrap_or(self.image_height)
    }

    /// The plane test is linear in u, so both end pixels hitting the road
    /// means every pixel of the row does.
    fn row_on_road(&self, v: usize) -> bool {
        let last = (self.image_width - 1) as f64;
        self.uv_to_road(0.0, v as f64).is_some() && self.uv_to_road(last, v as f64).is_some()
    }

    pub fn precompute_grid(&self) -> Result<LaneGrid> {
        let cut_v = self.cut_v();
        if cut_v >= self.image_height {
            bail!(
                "no road rows: cut_v={} for image height {}",
                cut_v,
                self.image_height
            );
        }

        let mut points = Vec::with_capacity((self.image_height - cut_v) * self.image_width);
        for v in cut_v..self.image_height {
            for u in 0..self.image_width {
                let point = self
                    .uv_to_road(u as f64, v as f64)
                    .with_context(|| format!("pixel ({}, {}) does not hit the road", u, v))?;
                points.push(point);
            }
        }

        debug!(
            "Lane grid: cut_v={}, {} points over {}x{}",
            cut_v,
            points.len(),
            self.image_width,
            self.image_height
        );

        Ok(LaneGrid {
            cut_v,
            width: self.image_width,
            height: self.image_height,
            points,
        })
    }
}

#[rustfmt::skip]
fn intrinsic_matrix(fov_deg: f64, width: usize, height: usize) -> Matrix3<f64> {
    let alpha = (width as f64 / 2.0) / (fov_deg.to_radians() / 2.0).tan();
    let cu = width as f64 / 2.0;
    let cv = height as f64 / 2.0;
    Matrix3::new(
        alpha, 0.0,   cu,
        0.0,   alpha, cv,
        0.0,   0.0,   1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> CameraGeometry {
        CameraGeometry::new(&CameraGeometryConfig::default(), 224, 224).unwrap()
    }

    #[test]
    fn test_cut_v_sits_below_horizon() {
        let geom = geometry();
        let cut_v = geom.cut_v();
        // pitched 5° down: horizon ~23px above centre, 60 m a few px below it
        assert!(cut_v > 85 && cut_v < 105, "cut_v={}", cut_v);
    }

    #[test]
    fn test_project_and_back() {
        let geom = geometry();
        for &(x, y) in &[(5.0, 0.0), (12.0, 1.5), (20.0, -2.0)] {
            let (u, v) = geom.road_to_uv(x, y);
            let (rx, ry) = geom.uv_to_road(u, v).unwrap();
            assert!((rx - x).abs() < 1e-6, "x {} vs {}", rx, x);
            assert!((ry - y).abs() < 1e-6, "y {} vs {}", ry, y);
        }
    }

    #[test]
    fn test_left_pixels_map_to_positive_y() {
        let geom = geometry();
        let (_, left_y) = geom.uv_to_road(20.0, 200.0).unwrap();
        let (_, centre_y) = geom.uv_to_road(112.0, 200.0).unwrap();
        let (_, right_y) = geom.uv_to_road(200.0, 200.0).unwrap();
        assert!(left_y > 0.0);
        assert!(centre_y.abs() < 1e-9);
        assert!(right_y < 0.0);
    }

    #[test]
    fn test_sky_has_no_road_point() {
        let geom = geometry();
        assert!(geom.uv_to_road(112.0, 0.0).is_none());
    }

    #[test]
    fn test_grid_covers_rows_below_cut() {
        let geom = geometry();
        let grid = geom.precompute_grid().unwrap();
        assert_eq!(grid.len(), (224 - grid.cut_v) * 224);
        // nearer rows are closer to the camera
        let first_row_x = grid.points[0].0;
        let last_row_x = grid.points[grid.len() - 1].0;
        assert!(first_row_x > last_row_x);
    }

    fn rolled(roll_deg: f64) -> CameraGeometry {
        let config = CameraGeometryConfig {
            roll_deg,
            ..CameraGeometryConfig::default()
        };
        CameraGeometry::new(&config, 224, 224).unwrap()
    }

    #[test]
    fn test_rolled_camera_builds_grid() {
        let level_cut = geometry().cut_v();
        for roll in [-10.0, -5.0, 2.0, 5.0, 10.0] {
            let geom = rolled(roll);
            let grid = geom
                .precompute_grid()
                .unwrap_or_else(|e| panic!("roll {}: {:#}", roll, e));
            assert!(grid.cut_v >= level_cut, "roll {} cut_v={}", roll, grid.cut_v);
            assert_eq!(grid.len(), (224 - grid.cut_v) * 224);
            assert!(grid
                .points
                .iter()
                .all(|&(x, y)| x.is_finite() && x > 0.0 && y.is_finite()));
        }
    }

    #[test]
    fn test_rolled_cut_row_is_fully_on_road() {
        let geom = rolled(5.0);
        let cut_v = geom.cut_v();
        assert!(cut_v > geometry().cut_v());
        assert!(geom.row_on_road(cut_v));
        assert!(!geom.row_on_road(cut_v - 1));
    }

    #[test]
    fn test_camera_looking_at_sky_has_no_grid() {
        let config = CameraGeometryConfig {
            pitch_deg: 80.0,
            ..CameraGeometryConfig::default()
        };
        let geom = CameraGeometry::new(&config, 224, 224).unwrap();
        assert!(geom.precompute_grid().is_err());
    }
}
