//! A detector carried by a two-circle diffractometer arm.
//!
//! The arm has two nested rotation stages. The inner `delta` stage turns the
//! detector about a nominally horizontal axis (lab `x`); the outer `gamma`
//! stage turns the delta stage about the lab vertical (`y`). A pose at
//! `(gamma, delta)` is the home pose rotated by delta first, then gamma.
//!
//! Small mechanical errors are modelled as:
//! - `gamma_offset`: zero-point error of the gamma stage;
//! - `gamma_axis_tilt`: gamma axis tipped about lab `x`, towards the beam;
//! - `delta_axis_tilt`: delta axis tipped about the beam;
//! - `delta_axis_offset`: the delta axis passing through `(0, y, z)` instead
//!   of the sample.

mod fit;

pub use fit::{fit_detector, RigFitConfig, TwoCircleFit};

use nalgebra::{Matrix3, Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::{
    angles_from_orientation, is_close, orientation_from_angles, unit_vector, DetectorPose,
    GeometryError, PoseParameters,
};

/// Direction of the detector's fast (row) axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FastAxis {
    /// Lab-frame vector; only its component perpendicular to the normal is
    /// used.
    Vector(Vector3<f64>),
    /// Angle in degrees from the in-plane horizontal, in the sense of the
    /// pose roll; for a detector facing the beam, `Angle(0)` is lab `+x`.
    Angle(f64),
}

/// Orientation whose `-z` axis is `normal` and whose row axis follows `fast`.
///
/// The result `R` satisfies `R·(0, 0, -1) = normal` and `R·x ⟂ normal`.
pub fn compute_orientation(
    normal: &Vector3<f64>,
    fast: FastAxis,
) -> Result<Rotation3<f64>, GeometryError> {
    let n = unit_vector(*normal, "normal")?;
    let row = match fast {
        FastAxis::Vector(v) => unit_vector(v - n * v.dot(&n), "fast axis")?,
        FastAxis::Angle(deg) => {
            let helper = if n.y.abs() < 0.9 { Vector3::y() } else { Vector3::x() };
            let horizontal = unit_vector(n.cross(&helper), "fast axis")?;
            // Same sense as the pose roll: about R·z = -normal.
            let axis = Unit::new_normalize(-n);
            Rotation3::from_axis_angle(&axis, deg.to_radians()) * horizontal
        }
    };
    let z = -n;
    let column = z.cross(&row);
    Ok(Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[
        row, column, z,
    ])))
}

/// Free-standing description of a two-circle rig.
///
/// The home pose is given beam-relative: `distance` from the sample to the
/// beam hit point, the hit point's offset from the detector centre in
/// detector row/column millimetres, and the yaw/pitch of the normal plus the
/// fast-axis angle (the pose roll), all in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigParameters {
    pub distance: f64,
    pub beam_centre_offset: [f64; 2],
    pub yaw: f64,
    pub pitch: f64,
    pub fast_axis_angle: f64,
    /// Degrees added to every commanded gamma.
    pub gamma_offset: f64,
    /// Degrees.
    pub gamma_axis_tilt: f64,
    /// Degrees.
    pub delta_axis_tilt: f64,
    /// `[y, z]` of the delta axis (mm).
    pub delta_axis_offset: [f64; 2],
}

impl Default for RigParameters {
    fn default() -> Self {
        Self {
            distance: 1000.0,
            beam_centre_offset: [0.0; 2],
            yaw: 0.0,
            pitch: 0.0,
            fast_axis_angle: 0.0,
            gamma_offset: 0.0,
            gamma_axis_tilt: 0.0,
            delta_axis_tilt: 0.0,
            delta_axis_offset: [0.0; 2],
        }
    }
}

pub(crate) const RIG_PARAMETER_COUNT: usize = 11;

impl RigParameters {
    pub fn to_array(&self) -> [f64; RIG_PARAMETER_COUNT] {
        [
            self.distance,
            self.beam_centre_offset[0],
            self.beam_centre_offset[1],
            self.yaw,
            self.pitch,
            self.fast_axis_angle,
            self.gamma_offset,
            self.gamma_axis_tilt,
            self.delta_axis_tilt,
            self.delta_axis_offset[0],
            self.delta_axis_offset[1],
        ]
    }

    pub fn from_array(a: [f64; RIG_PARAMETER_COUNT]) -> Self {
        Self {
            distance: a[0],
            beam_centre_offset: [a[1], a[2]],
            yaw: a[3],
            pitch: a[4],
            fast_axis_angle: a[5],
            gamma_offset: a[6],
            gamma_axis_tilt: a[7],
            delta_axis_tilt: a[8],
            delta_axis_offset: [a[9], a[10]],
        }
    }

    /// Entries of [`to_array`](Self::to_array) refined by the `count`
    /// parameter variant.
    ///
    /// - 6: home pose only;
    /// - 7: plus `gamma_offset`;
    /// - 8: home pose plus both axis tilts;
    /// - 10: as 8 plus `delta_axis_offset`.
    pub fn free_mask(count: usize) -> Option<[bool; RIG_PARAMETER_COUNT]> {
        let mut mask = [false; RIG_PARAMETER_COUNT];
        mask[..6].fill(true);
        match count {
            6 => {}
            7 => mask[6] = true,
            8 => mask[7..9].fill(true),
            10 => mask[7..].fill(true),
            _ => return None,
        }
        Some(mask)
    }
}

/// A detector mounted on a two-circle arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoCircleRig {
    params: RigParameters,
    beam: Vector3<f64>,
}

impl Default for TwoCircleRig {
    fn default() -> Self {
        Self::new(RigParameters::default())
    }
}

impl TwoCircleRig {
    /// Rig with the beam along `+z`.
    pub fn new(params: RigParameters) -> Self {
        Self {
            params,
            beam: Vector3::z(),
        }
    }

    pub fn with_beam(params: RigParameters, beam: Vector3<f64>) -> Result<Self, GeometryError> {
        Ok(Self {
            params,
            beam: unit_vector(beam, "beam")?,
        })
    }

    pub fn parameters(&self) -> &RigParameters {
        &self.params
    }

    pub fn set_parameters(&mut self, params: RigParameters) {
        self.params = params;
    }

    pub fn beam_vector(&self) -> Vector3<f64> {
        self.beam
    }

    /// Home orientation of the detector.
    pub fn home_orientation(&self) -> Rotation3<f64> {
        let p = &self.params;
        orientation_from_angles(p.yaw, p.pitch, p.fast_axis_angle)
    }

    /// Set the home pose from the lab position of the detector centre, its
    /// normal and its fast axis. Mechanical error terms are kept.
    ///
    /// Fails, leaving the rig unchanged, when the beam does not reach the
    /// detector plane in front of the sample.
    pub fn set_detector(
        &mut self,
        position: &Vector3<f64>,
        normal: &Vector3<f64>,
        fast: FastAxis,
    ) -> Result<(), GeometryError> {
        if !position.iter().all(|c| c.is_finite()) {
            return Err(GeometryError::NonFinite("detector position"));
        }
        let orientation = compute_orientation(normal, fast)?;
        let n = -(orientation * Vector3::z());
        let along = self.beam.dot(&n);
        if along.abs() < 1e-12 {
            return Err(GeometryError::BeamMissesDetector);
        }
        let distance = position.dot(&n) / along;
        if !(distance.is_finite() && distance > 0.0) {
            return Err(GeometryError::BeamMissesDetector);
        }
        let offset = orientation.inverse() * (self.beam * distance - position);
        let [yaw, pitch, roll] = angles_from_orientation(&orientation);
        self.params = RigParameters {
            distance,
            beam_centre_offset: [offset.x, offset.y],
            yaw,
            pitch,
            fast_axis_angle: roll,
            ..self.params
        };
        Ok(())
    }

    /// Detector pose at `gamma = delta = 0`, on the pixel grid of `base`.
    pub fn home_pose(&self, base: &DetectorPose) -> Result<DetectorPose, GeometryError> {
        let p = &self.params;
        let grid = base.grid();
        let centre = [0.5 * grid.px as f64, 0.5 * grid.py as f64];
        let params = PoseParameters {
            distance: p.distance,
            beam_centre: [
                centre[0] + p.beam_centre_offset[0] / grid.h_size,
                centre[1] + p.beam_centre_offset[1] / grid.v_size,
            ],
            yaw: p.yaw,
            pitch: p.pitch,
            roll: p.fast_axis_angle,
        };
        DetectorPose::from_parameters_with_beam(&params, grid, self.beam)
    }

    /// Detector pose with the stages at `gamma` and `delta` (degrees).
    ///
    /// `base` supplies the pixel grid. Delta is applied first.
    pub fn detector_properties(
        &self,
        base: &DetectorPose,
        gamma: f64,
        delta: f64,
    ) -> Result<DetectorPose, GeometryError> {
        let p = &self.params;
        let home = self.home_pose(base)?;

        let delta_axis = Rotation3::from_axis_angle(&Vector3::z_axis(), p.delta_axis_tilt.to_radians())
            * Vector3::x();
        let pivot = Vector3::new(0.0, p.delta_axis_offset[0], p.delta_axis_offset[1]);
        let rd = Rotation3::from_axis_angle(&Unit::new_normalize(delta_axis), delta.to_radians());

        let gamma_axis = Rotation3::from_axis_angle(&Vector3::x_axis(), p.gamma_axis_tilt.to_radians())
            * Vector3::y();
        let rg = Rotation3::from_axis_angle(
            &Unit::new_normalize(gamma_axis),
            (gamma + p.gamma_offset).to_radians(),
        );

        Ok(home
            .translated(&-pivot)
            .rotated(&rd)
            .translated(&pivot)
            .rotated(&rg))
    }

    /// Component-wise closeness of parameters and beam.
    pub fn is_close(&self, other: &Self, rel_tol: f64, abs_tol: f64) -> bool {
        self.params
            .to_array()
            .iter()
            .zip(other.params.to_array().iter())
            .chain(self.beam.iter().zip(other.beam.iter()))
            .all(|(&a, &b)| is_close(a, b, rel_tol, abs_tol))
    }
}
