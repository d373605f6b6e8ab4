// src/steering.rs
//
// Angle → motor command. Bands are partitioned, so every finite angle maps
// to exactly one command:
//
//   angle >  T          TurnLeft
//   angle < -T          TurnRight
//   -T <= angle <= T    Forward   (the ±T boundary goes straight)
//   NaN / ±inf          Stop

use crate::types::{PolicyConfig, SteeringAngle, SteeringCommand};

#[derive(Debug, Clone)]
pub struct SteeringPolicy {
    config: PolicyConfig,
}

impl SteeringPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn decide(&self, angle: SteeringAngle) -> SteeringCommand {
        let theta = angle.radians();
        let threshold = self.config.angle_threshold;

        if !theta.is_finite() {
            SteeringCommand::Stop
        } else if theta > threshold {
            SteeringCommand::TurnLeft(self.config.left_speed)
        } else if theta < -threshold {
            SteeringCommand::TurnRight(self.config.right_speed)
        } else {
            SteeringCommand::Forward(self.config.forward_speed)
        }
    }
}

impl Default for SteeringPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}
