//! Modified-sine cam lift profile
//!
//! Closed-form rise/dwell/fall follower motion. Velocity is continuous at
//! every phase boundary, which keeps the synthetic displacement field free
//! of jumps a renderer would show as popping.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use contracts::{ParameterSet, StreamError};

const DEG_TO_RAD: f64 = PI / 180.0;

/// Cam profile parameters
///
/// Angles are in cam degrees; lengths in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileParameters {
    /// Base circle radius
    pub base_radius: f64,

    /// Maximum follower lift
    pub max_lift: f64,

    /// Rise phase duration in degrees
    pub rise_deg: f64,

    /// Dwell phase duration in degrees
    pub dwell_deg: f64,

    /// Fall phase duration in degrees
    pub fall_deg: f64,

    /// Camshaft speed in revolutions per minute
    pub rpm: f64,
}

impl Default for ProfileParameters {
    fn default() -> Self {
        Self {
            base_radius: 25.0,
            max_lift: 10.0,
            rise_deg: 90.0,
            dwell_deg: 45.0,
            fall_deg: 90.0,
            rpm: 3000.0,
        }
    }
}

impl ProfileParameters {
    /// Total cam event duration in degrees.
    pub fn total_deg(&self) -> f64 {
        self.rise_deg + self.dwell_deg + self.fall_deg
    }

    /// Angular velocity in rad/s.
    pub fn omega(&self) -> f64 {
        2.0 * PI * self.rpm / 60.0
    }

    /// Reject physically or numerically unusable parameters.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.max_lift <= 0.0 {
            return Err(StreamError::configuration(
                "solver.max_lift",
                format!("maximum lift must be positive, got {}", self.max_lift),
            ));
        }
        if self.base_radius <= 0.0 {
            return Err(StreamError::configuration(
                "solver.base_radius",
                format!("base circle radius must be positive, got {}", self.base_radius),
            ));
        }
        if self.rise_deg <= 0.0 {
            return Err(StreamError::configuration(
                "solver.rise_deg",
                format!("rise duration must be positive, got {}", self.rise_deg),
            ));
        }
        if self.fall_deg <= 0.0 {
            return Err(StreamError::configuration(
                "solver.fall_deg",
                format!("fall duration must be positive, got {}", self.fall_deg),
            ));
        }
        if self.dwell_deg < 0.0 {
            return Err(StreamError::configuration(
                "solver.dwell_deg",
                format!("dwell duration cannot be negative, got {}", self.dwell_deg),
            ));
        }
        if self.total_deg() > 360.0 {
            return Err(StreamError::configuration(
                "solver",
                format!(
                    "total cam duration cannot exceed 360 degrees, got {}",
                    self.total_deg()
                ),
            ));
        }
        if self.rpm <= 0.0 {
            return Err(StreamError::configuration(
                "solver.rpm",
                format!("rpm must be positive, got {}", self.rpm),
            ));
        }
        Ok(())
    }

    /// Build an updated copy from named parameters.
    ///
    /// All-or-nothing: an unknown name or a copy failing validation returns
    /// an error and leaves `self` untouched, so a frame can never observe a
    /// partial update.
    pub fn with_updates(&self, params: &ParameterSet) -> Result<Self, StreamError> {
        let mut updated = self.clone();
        for (name, value) in params.iter() {
            match name {
                "base_radius" => updated.base_radius = value,
                "max_lift" => updated.max_lift = value,
                "rise_deg" => updated.rise_deg = value,
                "dwell_deg" => updated.dwell_deg = value,
                "fall_deg" => updated.fall_deg = value,
                "rpm" => updated.rpm = value,
                other => {
                    return Err(StreamError::configuration(
                        format!("parameters.{other}"),
                        format!("unknown solver parameter '{other}'"),
                    ));
                }
            }
        }
        updated.validate()?;
        Ok(updated)
    }
}

/// Modified-sine motion law
///
/// The rise fraction at phase position `beta` in [0, 1] is
/// `beta - sin(2*pi*beta) / (2*pi)`; the fall mirrors it. Derivatives with
/// respect to time use the configured angular velocity.
#[derive(Debug, Clone)]
pub struct MotionProfile {
    params: ProfileParameters,
    omega: f64,
    total_deg: f64,
}

impl MotionProfile {
    /// Validate parameters and build the profile.
    pub fn new(params: ProfileParameters) -> Result<Self, StreamError> {
        params.validate()?;
        let omega = params.omega();
        let total_deg = params.total_deg();
        Ok(Self {
            params,
            omega,
            total_deg,
        })
    }

    /// The parameters this profile was built from.
    pub fn parameters(&self) -> &ProfileParameters {
        &self.params
    }

    /// Follower lift at a cam angle, in mm.
    #[inline]
    pub fn lift(&self, theta_deg: f64) -> f64 {
        let theta = theta_deg.rem_euclid(360.0);
        if theta <= self.params.rise_deg {
            let beta = theta / self.params.rise_deg;
            self.params.max_lift * (beta - (2.0 * PI * beta).sin() / (2.0 * PI))
        } else if theta <= self.params.rise_deg + self.params.dwell_deg {
            self.params.max_lift
        } else if theta <= self.total_deg {
            let beta =
                (theta - self.params.rise_deg - self.params.dwell_deg) / self.params.fall_deg;
            self.params.max_lift * (1.0 - (beta - (2.0 * PI * beta).sin() / (2.0 * PI)))
        } else {
            0.0
        }
    }

    /// Follower velocity at a cam angle, in mm/s.
    #[inline]
    pub fn lift_rate(&self, theta_deg: f64) -> f64 {
        let theta = theta_deg.rem_euclid(360.0);
        if theta <= self.params.rise_deg {
            let beta = theta / self.params.rise_deg;
            let dbeta = 1.0 / self.params.rise_deg;
            self.params.max_lift * dbeta * (1.0 - (2.0 * PI * beta).cos()) * self.omega * DEG_TO_RAD
        } else if theta <= self.params.rise_deg + self.params.dwell_deg {
            0.0
        } else if theta <= self.total_deg {
            let beta =
                (theta - self.params.rise_deg - self.params.dwell_deg) / self.params.fall_deg;
            let dbeta = 1.0 / self.params.fall_deg;
            -self.params.max_lift
                * dbeta
                * (1.0 - (2.0 * PI * beta).cos())
                * self.omega
                * DEG_TO_RAD
        } else {
            0.0
        }
    }

    /// Follower acceleration at a cam angle, in mm/s^2.
    #[inline]
    pub fn lift_accel(&self, theta_deg: f64) -> f64 {
        let theta = theta_deg.rem_euclid(360.0);
        let scale = (self.omega * DEG_TO_RAD) * (self.omega * DEG_TO_RAD);
        if theta <= self.params.rise_deg {
            let beta = theta / self.params.rise_deg;
            let dbeta = 1.0 / self.params.rise_deg;
            self.params.max_lift * dbeta * dbeta * 2.0 * PI * (2.0 * PI * beta).sin() * scale
        } else if theta <= self.params.rise_deg + self.params.dwell_deg {
            0.0
        } else if theta <= self.total_deg {
            let beta =
                (theta - self.params.rise_deg - self.params.dwell_deg) / self.params.fall_deg;
            let dbeta = 1.0 / self.params.fall_deg;
            self.params.max_lift * dbeta * dbeta * 2.0 * PI * (2.0 * PI * beta).sin() * scale
        } else {
            0.0
        }
    }

    /// Cam angle reached after `time_s` seconds, in degrees.
    #[inline]
    pub fn angle_at(&self, time_s: f64) -> f64 {
        (time_s * self.omega / DEG_TO_RAD).rem_euclid(360.0)
    }

    /// Lift, velocity, and acceleration at a simulation time.
    #[inline]
    pub fn kinematics_at(&self, time_s: f64) -> (f64, f64, f64) {
        let theta = self.angle_at(time_s);
        (
            self.lift(theta),
            self.lift_rate(theta),
            self.lift_accel(theta),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_profile() -> MotionProfile {
        MotionProfile::new(ProfileParameters::default()).unwrap()
    }

    #[test]
    fn default_parameters_are_valid() {
        let params = ProfileParameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.total_deg(), 225.0);
    }

    #[test]
    fn lift_hits_phase_landmarks() {
        let profile = default_profile();

        // Rise starts at zero and ends exactly at max lift.
        assert!(profile.lift(0.0).abs() < 1e-12);
        assert!((profile.lift(90.0) - 10.0).abs() < 1e-9);

        // Dwell holds max lift; past the fall the follower is back on the
        // base circle.
        assert!((profile.lift(110.0) - 10.0).abs() < 1e-12);
        assert!(profile.lift(225.0).abs() < 1e-9);
        assert!(profile.lift(300.0).abs() < 1e-12);
    }

    #[test]
    fn rise_is_monotonic() {
        let profile = default_profile();
        let mut prev = -1.0;
        for i in 0..=90 {
            let lift = profile.lift(i as f64);
            assert!(lift >= prev - 1e-12, "lift dipped at {i} deg");
            prev = lift;
        }
    }

    #[test]
    fn velocity_vanishes_at_phase_boundaries() {
        let profile = default_profile();
        assert!(profile.lift_rate(0.0).abs() < 1e-9);
        assert!(profile.lift_rate(90.0).abs() < 1e-6);
        assert!(profile.lift_rate(120.0).abs() < 1e-12);
        assert!(profile.lift_rate(225.0).abs() < 1e-6);
    }

    #[test]
    fn fall_velocity_is_negative() {
        let profile = default_profile();
        assert!(profile.lift_rate(180.0) < 0.0);
    }

    #[test]
    fn time_maps_to_angle_through_rpm() {
        // 3000 rpm is 50 rev/s, so 1 ms sweeps 18 degrees.
        let profile = default_profile();
        assert!((profile.angle_at(0.001) - 18.0).abs() < 1e-9);
        assert!((profile.angle_at(0.020) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_parameters_name_the_field() {
        let params = ProfileParameters {
            max_lift: -1.0,
            ..ProfileParameters::default()
        };
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("max_lift"), "got: {err}");

        let params = ProfileParameters {
            rise_deg: 200.0,
            fall_deg: 200.0,
            ..ProfileParameters::default()
        };
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("360"), "got: {err}");
    }

    #[test]
    fn updates_apply_atomically() {
        let params = ProfileParameters::default();

        let mut update = ParameterSet::new();
        update.set("rpm", 1500.0).set("max_lift", 12.0);
        let updated = params.with_updates(&update).unwrap();
        assert_eq!(updated.rpm, 1500.0);
        assert_eq!(updated.max_lift, 12.0);
        assert_eq!(updated.base_radius, params.base_radius);

        let mut unknown = ParameterSet::new();
        unknown.set("spring_rate", 40.0);
        let err = params.with_updates(&unknown).unwrap_err();
        assert!(err.to_string().contains("spring_rate"), "got: {err}");

        let mut invalid = ParameterSet::new();
        invalid.set("max_lift", -4.0);
        assert!(params.with_updates(&invalid).is_err());
    }
}
