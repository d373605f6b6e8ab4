// src/lib.rs

pub mod actuation;
pub mod camera;
pub mod checks;
pub mod config;
pub mod detection;
pub mod inference;
pub mod pipeline;
pub mod preprocessing;
pub mod steering;
pub mod traffic_light;
pub mod types;

pub use types::{Config, Frame, LineSegment, SteeringAngle, SteeringCommand};
