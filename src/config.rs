use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Mounting angles beyond this leave too little road in view.
const MAX_MOUNT_ANGLE_DEG: f64 = 45.0;
/// One year.
const MAX_RUN_SECS: f64 = 365.0 * 24.0 * 3600.0;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            bail!(
                "camera size must be non-zero, got {}x{}",
                self.camera.width,
                self.camera.height
            );
        }
        if !(self.camera.fps > 0.0) {
            bail!("camera fps must be positive, got {}", self.camera.fps);
        }

        let g = &self.geometric;
        if g.blur_kernel <= 0 || g.blur_kernel % 2 == 0 {
            bail!("blur_kernel must be odd and positive, got {}", g.blur_kernel);
        }
        if !(g.rho > 0.0) || !(g.theta > 0.0) {
            bail!("hough resolution must be positive (rho={}, theta={})", g.rho, g.theta);
        }

        let n = &self.neural;
        if n.input_width == 0 || n.input_height == 0 || n.output_stride == 0 {
            bail!("neural input size and output_stride must be non-zero");
        }
        if n.input_width % n.output_stride != 0 || n.input_height % n.output_stride != 0 {
            bail!(
                "output_stride {} does not divide input {}x{}",
                n.output_stride,
                n.input_width,
                n.input_height
            );
        }
        for (name, value) in [
            ("prob_threshold", n.prob_threshold),
            ("overlay_threshold", n.overlay_threshold),
        ] {
            if !(0.0..1.0).contains(&value) {
                bail!("{} must be in [0, 1), got {}", name, value);
            }
        }

        let geo = &n.geometry;
        for (name, value) in [
            ("yaw_deg", geo.yaw_deg),
            ("pitch_deg", geo.pitch_deg),
            ("roll_deg", geo.roll_deg),
        ] {
            if !(value.abs() <= MAX_MOUNT_ANGLE_DEG) {
                bail!(
                    "camera {} must be within ±{}°, got {}",
                    name,
                    MAX_MOUNT_ANGLE_DEG,
                    value
                );
            }
        }
        if !(geo.height_m > 0.0) || !(geo.max_distance_m > 0.0) {
            bail!(
                "camera height and range must be positive (height_m={}, max_distance_m={})",
                geo.height_m,
                geo.max_distance_m
            );
        }

        if !(self.policy.angle_threshold > 0.0) {
            bail!(
                "angle_threshold must be positive, got {}",
                self.policy.angle_threshold
            );
        }

        if let Some(secs) = self.run.duration_secs {
            if !(0.0..=MAX_RUN_SECS).contains(&secs) {
                bail!(
                    "run duration must be in [0, {}] s, got {}; omit it to run until cancelled",
                    MAX_RUN_SECS,
                    secs
                );
            }
        }

        Ok(())
    }
}
