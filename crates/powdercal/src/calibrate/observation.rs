use serde::{Deserialize, Serialize};

use crate::conic::RingConic;
use crate::geometry::DetectorPose;

/// Points observed on one powder ring, with the ring's lattice spacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingObservation {
    /// Lattice spacing `d` (Å).
    pub d_spacing: f64,
    /// Pixel coordinates of points on the ring.
    pub points: Vec<[f64; 2]>,
}

impl RingObservation {
    pub fn new(d_spacing: f64, points: Vec<[f64; 2]>) -> Self {
        Self { d_spacing, points }
    }

    /// `n` points sampled from a closed conic, e.g. a fitted ellipse.
    ///
    /// Returns `None` for open conics.
    pub fn from_conic(d_spacing: f64, conic: &RingConic, n: usize) -> Option<Self> {
        conic
            .sample_points(n)
            .map(|points| Self { d_spacing, points })
    }
}

/// A detector's starting pose and the rings observed on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorRings {
    pub pose: DetectorPose,
    pub rings: Vec<RingObservation>,
}

/// Which parameters a calibration refines.
///
/// Pose parameters are the ones of
/// [`PoseParameters`](crate::geometry::PoseParameters): distance along the
/// beam, beam-centre pixel and yaw/pitch/roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeParameters {
    pub wavelength: bool,
    pub distance: bool,
    pub beam_centre_x: bool,
    pub beam_centre_y: bool,
    pub yaw: bool,
    pub pitch: bool,
    pub roll: bool,
}

impl FreeParameters {
    /// Wavelength, distance and beam centre.
    pub const FOUR: Self = Self {
        wavelength: true,
        distance: true,
        beam_centre_x: true,
        beam_centre_y: true,
        yaw: false,
        pitch: false,
        roll: false,
    };

    /// Full detector pose at fixed wavelength.
    pub const SIX: Self = Self {
        wavelength: false,
        distance: true,
        beam_centre_x: true,
        beam_centre_y: true,
        yaw: true,
        pitch: true,
        roll: true,
    };

    /// Full detector pose and wavelength.
    pub const SEVEN: Self = Self {
        wavelength: true,
        ..Self::SIX
    };

    /// Preset with `count` parameters (4, 6 or 7).
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            4 => Some(Self::FOUR),
            6 => Some(Self::SIX),
            7 => Some(Self::SEVEN),
            _ => None,
        }
    }

    /// Number of free parameters.
    pub fn count(&self) -> usize {
        self.pose_mask().iter().filter(|&&f| f).count() + self.wavelength as usize
    }

    /// Flags in [`PoseParameters::to_array`](crate::geometry::PoseParameters::to_array) order.
    pub(crate) fn pose_mask(&self) -> [bool; 6] {
        [
            self.distance,
            self.beam_centre_x,
            self.beam_centre_y,
            self.yaw,
            self.pitch,
            self.roll,
        ]
    }
}

impl Default for FreeParameters {
    fn default() -> Self {
        Self::SIX
    }
}

/// Typical uncertainty of each parameter; the optimizer searches in units
/// of these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterScales {
    /// Å.
    pub wavelength: f64,
    /// mm.
    pub distance: f64,
    /// Pixels.
    pub beam_centre: f64,
    /// Degrees, for yaw, pitch and roll.
    pub angle: f64,
}

impl Default for ParameterScales {
    fn default() -> Self {
        Self {
            wavelength: 0.01,
            distance: 5.0,
            beam_centre: 5.0,
            angle: 0.5,
        }
    }
}

impl ParameterScales {
    /// Scales in [`PoseParameters::to_array`](crate::geometry::PoseParameters::to_array) order.
    pub(crate) fn pose_scales(&self) -> [f64; 6] {
        [
            self.distance,
            self.beam_centre,
            self.beam_centre,
            self.angle,
            self.angle,
            self.angle,
        ]
    }
}
