// src/types.rs

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::iter::Sum;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub extractor: ExtractorKind,
    pub geometric: GeometricConfig,
    pub neural: NeuralConfig,
    pub policy: PolicyConfig,
    pub motors: MotorConfig,
    pub servos: ServoConfig,
    pub sensor: SensorConfig,
    pub run: RunConfig,
    pub hardware: HardwareBackend,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device index.
    pub device: i32,
    pub width: usize,
    pub height: usize,
    /// Requested rate. The backend may deliver something else; the loop
    /// budget is still derived from this value.
    pub fps: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: 0,
            width: 640,
            height: 480,
            fps: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    #[default]
    Geometric,
    Neural,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometricConfig {
    /// Gaussian kernel size, must be odd.
    pub blur_kernel: i32,
    pub canny_low: f64,
    pub canny_high: f64,
    /// Hough distance resolution in pixels.
    pub rho: f64,
    /// Hough angle resolution in radians.
    pub theta: f64,
    pub vote_threshold: i32,
    pub min_line_length: f64,
    pub max_line_gap: f64,
}

impl Default for GeometricConfig {
    fn default() -> Self {
        Self {
            blur_kernel: 5,
            canny_low: 85.0,
            canny_high: 85.0,
            rho: 1.0,
            theta: PI / 180.0,
            vote_threshold: 10,
            min_line_length: 5.0,
            max_line_gap: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralConfig {
    pub model_path: String,
    pub input_name: String,
    pub input_width: usize,
    pub input_height: usize,
    /// Model output is `input / output_stride` in both dimensions.
    pub output_stride: usize,
    pub num_threads: usize,
    /// Grid points below this probability are ignored by the fit.
    pub prob_threshold: f32,
    /// Probability above which a pixel is painted into the lane overlay.
    pub overlay_threshold: f32,
    pub geometry: CameraGeometryConfig,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            model_path: "model.onnx".to_string(),
            input_name: "input".to_string(),
            input_width: 224,
            input_height: 224,
            output_stride: 1,
            num_threads: 2,
            prob_threshold: 0.3,
            overlay_threshold: 0.5,
            geometry: CameraGeometryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraGeometryConfig {
    /// Mounting height above the road in metres.
    pub height_m: f64,
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
    /// Horizontal field of view.
    pub fov_deg: f64,
    /// Rows above the projection of this distance are sky.
    pub max_distance_m: f64,
}

impl Default for CameraGeometryConfig {
    fn default() -> Self {
        Self {
            height_m: 1.3,
            yaw_deg: 0.0,
            pitch_deg: -5.0,
            roll_deg: 0.0,
            fov_deg: 45.0,
            max_distance_m: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub angle_threshold: f64,
    pub forward_speed: i32,
    pub left_speed: i32,
    pub right_speed: i32,
    pub backward_speed: i32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            angle_threshold: 6.0,
            forward_speed: 10,
            left_speed: 5,
            right_speed: 15,
            backward_speed: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    pub period: u16,
    pub prescaler: u16,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            period: 50,
            prescaler: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    /// Camera pan, camera tilt, steering.
    pub init_angles: [i32; 3],
    pub check_angle: i32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            init_angles: [0, 0, 0],
            check_angle: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub trig_pin: u8,
    pub echo_pin: u8,
    pub timeout_ms: u64,
    pub samples: usize,
    pub interval_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            trig_pin: 27,
            echo_pin: 22,
            timeout_ms: 20,
            samples: 5,
            interval_ms: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// `None` runs until cancelled.
    pub duration_secs: Option<f64>,
    pub warmup_speed: i32,
    pub warmup_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_secs: Some(10.0),
            warmup_speed: 10,
            warmup_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareBackend {
    #[default]
    DryRun,
    RobotHat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "lane_follower=info,ort=warn".to_string(),
        }
    }
}

// ============================================================================
// PER-FRAME DATA
// ============================================================================

/// One camera frame, 3 interleaved channels in BGR order.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: usize, height: usize, timestamp_ms: f64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ms,
        }
    }

    #[cfg(test)]
    pub fn filled(width: usize, height: usize, bgr: [u8; 3]) -> Self {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(width * height * 3)
            .collect();
        Self::new(data, width, height, 0.0)
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.width * self.height * 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSegment {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl LineSegment {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Radians, in image coordinates (y grows downward).
    pub fn angle(&self) -> f64 {
        f64::from(self.y2 - self.y1).atan2(f64::from(self.x2 - self.x1))
    }
}

/// Sum of segment angles for a single frame. Deliberately unbounded: more
/// segments leaning the same way push it further from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize)]
pub struct SteeringAngle(pub f64);

impl SteeringAngle {
    pub const ZERO: SteeringAngle = SteeringAngle(0.0);

    pub fn from_segments(segments: &[LineSegment]) -> Self {
        segments.iter().map(LineSegment::angle).sum()
    }

    pub fn radians(self) -> f64 {
        self.0
    }
}

impl Sum<f64> for SteeringAngle {
    fn sum<I: Iterator<Item = f64>>(iter: I) -> Self {
        SteeringAngle(iter.sum())
    }
}

impl fmt::Display for SteeringAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} rad", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SteeringCommand {
    Forward(i32),
    Backward(i32),
    TurnLeft(i32),
    TurnRight(i32),
    Stop,
}

impl SteeringCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward(_) => "STRAIGHT",
            Self::Backward(_) => "BACK",
            Self::TurnLeft(_) => "LEFT",
            Self::TurnRight(_) => "RIGHT",
            Self::Stop => "STOP",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_angle_follows_image_axes() {
        assert_eq!(LineSegment::new(0, 0, 10, 0).angle(), 0.0);
        let down = LineSegment::new(0, 0, 0, 10).angle();
        assert!((down - PI / 2.0).abs() < 1e-12);
        let up_left = LineSegment::new(10, 10, 0, 0).angle();
        assert!((up_left + 3.0 * PI / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_angle_sum_is_not_normalized() {
        let angle: SteeringAngle = [3.0, 4.0, 5.0].into_iter().sum();
        assert_eq!(angle.radians(), 12.0);
        assert_eq!(SteeringAngle::from_segments(&[]), SteeringAngle::ZERO);
    }

    #[test]
    fn test_filled_frame_layout() {
        let frame = Frame::filled(4, 2, [1, 2, 3]);
        assert!(frame.is_valid());
        assert_eq!(&frame.data[..6], &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.extractor, ExtractorKind::Geometric);
        assert_eq!(config.geometric.canny_low, 85.0);
        assert_eq!(config.policy.angle_threshold, 6.0);
        assert_eq!(config.hardware, HardwareBackend::DryRun);
    }
}
