use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use super::euler::{angles_from_orientation, orientation_from_angles};
use super::solid_angle::triangle_solid_angle;
use super::{beam_basis, finite_vector, is_close, unit_vector, GeometryError};

/// `|n·b|` below this is a beam running parallel to the detector plane.
const PARALLEL_EPS: f64 = 1e-12;

/// Orthonormality tolerance for user-supplied orientation matrices; inputs
/// within it are snapped to the nearest rotation.
const ROTATION_EPS: f64 = 1e-6;

/// Tolerances of [`DetectorPose::approx_eq`].
const DEFAULT_REL_TOL: f64 = 1e-9;
const DEFAULT_ABS_TOL: f64 = 1e-12;

// ── Pixel grid ─────────────────────────────────────────────────────────────

/// Pixel layout of a flat detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelGrid {
    /// Pixels along the row (fast) axis.
    pub px: u32,
    /// Pixels along the column (slow) axis.
    pub py: u32,
    /// Pitch along the row axis (mm).
    pub h_size: f64,
    /// Pitch along the column axis (mm).
    pub v_size: f64,
}

impl PixelGrid {
    pub fn new(px: u32, py: u32, h_size: f64, v_size: f64) -> Result<Self, GeometryError> {
        let grid = Self {
            px,
            py,
            h_size,
            v_size,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Grid with square pixels.
    pub fn square(px: u32, py: u32, size: f64) -> Result<Self, GeometryError> {
        Self::new(px, py, size, size)
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.px == 0 || self.py == 0 {
            return Err(GeometryError::NonPositivePixelCount {
                px: self.px,
                py: self.py,
            });
        }
        let ok = |s: f64| s.is_finite() && s > 0.0;
        if !ok(self.h_size) || !ok(self.v_size) {
            return Err(GeometryError::NonPositivePixelSize {
                h_size: self.h_size,
                v_size: self.v_size,
            });
        }
        Ok(())
    }

    /// Physical extent `[width, height]` in mm.
    pub fn size_mm(&self) -> [f64; 2] {
        [self.px as f64 * self.h_size, self.py as f64 * self.v_size]
    }

    /// Whether pixel coordinates `(x, y)` fall on the detector face.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x <= self.px as f64 && y <= self.py as f64
    }

    pub fn is_square(&self) -> bool {
        is_close(self.h_size, self.v_size, 1e-12, 0.0)
    }
}

// ── Beam-relative parameters ───────────────────────────────────────────────

/// Beam-relative description of a detector pose.
///
/// This is the parameterization calibration works in: the distance from the
/// sample to where the beam hits the detector, the pixel coordinates of that
/// hit point, and the detector orientation as yaw/pitch/roll in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseParameters {
    /// Sample → beam-centre distance along the beam (mm).
    pub distance: f64,
    /// Beam-centre pixel coordinates `[x, y]`.
    pub beam_centre: [f64; 2],
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl PoseParameters {
    /// `[distance, bcx, bcy, yaw, pitch, roll]`.
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.distance,
            self.beam_centre[0],
            self.beam_centre[1],
            self.yaw,
            self.pitch,
            self.roll,
        ]
    }

    pub fn from_array(a: [f64; 6]) -> Self {
        Self {
            distance: a[0],
            beam_centre: [a[1], a[2]],
            yaw: a[3],
            pitch: a[4],
            roll: a[5],
        }
    }
}

// ── Detector pose ──────────────────────────────────────────────────────────

/// A flat pixel detector placed in the lab frame.
///
/// The pose is stored as the lab position of pixel `(0, 0)` (`origin`) and a
/// rotation `R` taking detector-frame vectors to the lab. The detector row
/// axis is `R·x̂`, the column axis `R·ŷ` and the plane normal, pointing back
/// towards the sample side, `-R·ẑ`. A lab point for pixel `(x, y)` is
/// `origin + R · (x·h, y·v, 0)`.
///
/// Beam-centre quantities are derived on demand, never cached, so a pose
/// always reports values consistent with its current origin and orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorPose {
    origin: Vector3<f64>,
    orientation: Rotation3<f64>,
    beam: Vector3<f64>,
    grid: PixelGrid,
}

impl DetectorPose {
    /// Pose from a pixel-`(0,0)` position and an orientation, with the beam
    /// along `+z`.
    pub fn new(
        origin: Vector3<f64>,
        orientation: Rotation3<f64>,
        grid: PixelGrid,
    ) -> Result<Self, GeometryError> {
        grid.validate()?;
        finite_vector(&origin, "origin")?;
        Ok(Self {
            origin,
            orientation,
            beam: Vector3::z(),
            grid,
        })
    }

    /// Pose from an orientation matrix; it must be orthonormal with `det = +1`.
    pub fn from_matrix(
        origin: Vector3<f64>,
        orientation: Matrix3<f64>,
        grid: PixelGrid,
    ) -> Result<Self, GeometryError> {
        Self::new(origin, checked_rotation(orientation)?, grid)
    }

    /// Pose from beam-relative parameters with the beam along `+z`.
    pub fn from_parameters(params: &PoseParameters, grid: PixelGrid) -> Result<Self, GeometryError> {
        Self::from_parameters_with_beam(params, grid, Vector3::z())
    }

    /// Shorthand for [`from_parameters`](Self::from_parameters).
    pub fn from_beam_centre(
        distance: f64,
        beam_centre: [f64; 2],
        [yaw, pitch, roll]: [f64; 3],
        grid: PixelGrid,
    ) -> Result<Self, GeometryError> {
        Self::from_parameters(
            &PoseParameters {
                distance,
                beam_centre,
                yaw,
                pitch,
                roll,
            },
            grid,
        )
    }

    /// Pose from beam-relative parameters and an explicit beam direction.
    pub fn from_parameters_with_beam(
        params: &PoseParameters,
        grid: PixelGrid,
        beam: Vector3<f64>,
    ) -> Result<Self, GeometryError> {
        grid.validate()?;
        let beam = unit_vector(beam, "beam")?;
        if !(params.distance.is_finite() && params.distance > 0.0) {
            return Err(GeometryError::InvalidDistance(params.distance));
        }
        if !params.to_array().iter().all(|v| v.is_finite()) {
            return Err(GeometryError::NonFinite("pose parameters"));
        }
        let orientation = orientation_from_angles(params.yaw, params.pitch, params.roll);
        let hit = beam * params.distance;
        let offset = orientation
            * Vector3::new(
                params.beam_centre[0] * grid.h_size,
                params.beam_centre[1] * grid.v_size,
                0.0,
            );
        let pose = Self {
            origin: hit - offset,
            orientation,
            beam,
            grid,
        };
        // A plane containing the beam line has no beam centre.
        if pose.beam_path_length().is_none() {
            return Err(GeometryError::BeamMissesDetector);
        }
        Ok(pose)
    }

    /// Beam-relative parameters, or `None` when the beam misses the plane.
    pub fn parameters(&self) -> Option<PoseParameters> {
        let distance = self.beam_path_length()?;
        let beam_centre = self.beam_centre_coords();
        let [yaw, pitch, roll] = self.normal_angles_in_degrees();
        Some(PoseParameters {
            distance,
            beam_centre,
            yaw,
            pitch,
            roll,
        })
    }

    // ── accessors ──────────────────────────────────────────────────────────

    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    pub fn orientation(&self) -> &Rotation3<f64> {
        &self.orientation
    }

    /// Unit beam direction.
    pub fn beam_vector(&self) -> Vector3<f64> {
        self.beam
    }

    pub fn grid(&self) -> PixelGrid {
        self.grid
    }

    pub fn px(&self) -> u32 {
        self.grid.px
    }

    pub fn py(&self) -> u32 {
        self.grid.py
    }

    pub fn h_size(&self) -> f64 {
        self.grid.h_size
    }

    pub fn v_size(&self) -> f64 {
        self.grid.v_size
    }

    /// Physical `[width, height]` of the detector face (mm).
    pub fn detector_size_mm(&self) -> [f64; 2] {
        self.grid.size_mm()
    }

    /// Whether pixel coordinates `(x, y)` lie on the detector face.
    pub fn is_inside(&self, x: f64, y: f64) -> bool {
        self.grid.contains(x, y)
    }

    /// Lab direction of increasing pixel `x`.
    pub fn row_axis(&self) -> Vector3<f64> {
        self.orientation * Vector3::x()
    }

    /// Lab direction of increasing pixel `y`.
    pub fn column_axis(&self) -> Vector3<f64> {
        self.orientation * Vector3::y()
    }

    /// Unit plane normal, `-R·ẑ`.
    pub fn normal(&self) -> Vector3<f64> {
        -(self.orientation * Vector3::z())
    }

    // ── mutators ───────────────────────────────────────────────────────────

    /// Move pixel `(0,0)` to `origin`; orientation is unchanged.
    pub fn set_origin(&mut self, origin: Vector3<f64>) -> Result<(), GeometryError> {
        finite_vector(&origin, "origin")?;
        self.origin = origin;
        Ok(())
    }

    /// Replace the orientation; the origin is unchanged.
    pub fn set_orientation(&mut self, orientation: Rotation3<f64>) {
        self.orientation = orientation;
    }

    /// Replace the orientation from a matrix, which must be a proper rotation.
    pub fn set_orientation_matrix(&mut self, orientation: Matrix3<f64>) -> Result<(), GeometryError> {
        self.orientation = checked_rotation(orientation)?;
        Ok(())
    }

    pub fn set_beam_vector(&mut self, beam: Vector3<f64>) -> Result<(), GeometryError> {
        self.beam = unit_vector(beam, "beam")?;
        Ok(())
    }

    pub fn set_grid(&mut self, grid: PixelGrid) -> Result<(), GeometryError> {
        grid.validate()?;
        self.grid = grid;
        Ok(())
    }

    /// Set the orientation from yaw, pitch and roll in degrees.
    ///
    /// The origin is left where it is, so setting angles and then setting the
    /// previous angles back restores the pose exactly.
    pub fn set_normal_angles_in_degrees(
        &mut self,
        yaw: f64,
        pitch: f64,
        roll: f64,
    ) -> Result<(), GeometryError> {
        if !(yaw.is_finite() && pitch.is_finite() && roll.is_finite()) {
            return Err(GeometryError::NonFinite("normal angles"));
        }
        self.orientation = orientation_from_angles(yaw, pitch, roll);
        Ok(())
    }

    /// `[yaw, pitch, roll]` in degrees.
    pub fn normal_angles_in_degrees(&self) -> [f64; 3] {
        angles_from_orientation(&self.orientation)
    }

    /// Slide the detector along the beam so the beam centre lies `distance`
    /// mm from the sample. Orientation and beam-centre pixel are unchanged.
    pub fn set_beam_centre_distance(&mut self, distance: f64) -> Result<(), GeometryError> {
        if !(distance.is_finite() && distance > 0.0) {
            return Err(GeometryError::InvalidDistance(distance));
        }
        let t = self
            .beam_path_length()
            .ok_or(GeometryError::BeamMissesDetector)?;
        self.origin += self.beam * (distance - t);
        Ok(())
    }

    /// Shift the detector in its own plane so the beam hits pixel `coords`.
    pub fn set_beam_centre_coords(&mut self, coords: [f64; 2]) -> Result<(), GeometryError> {
        if !(coords[0].is_finite() && coords[1].is_finite()) {
            return Err(GeometryError::NonFinite("beam centre"));
        }
        let hit = self
            .beam_centre_position()
            .ok_or(GeometryError::BeamMissesDetector)?;
        self.origin = hit - self.plane_offset(coords[0], coords[1]);
        Ok(())
    }

    /// Rigid translation of the whole detector.
    pub fn translated(&self, offset: &Vector3<f64>) -> Self {
        Self {
            origin: self.origin + offset,
            ..self.clone()
        }
    }

    /// Rigid rotation of the whole detector about the sample.
    pub fn rotated(&self, rotation: &Rotation3<f64>) -> Self {
        Self {
            origin: rotation * self.origin,
            orientation: rotation * self.orientation,
            beam: self.beam,
            grid: self.grid,
        }
    }

    // ── pixel ↔ lab ────────────────────────────────────────────────────────

    /// Lab position (mm) of pixel coordinates `(x, y)`.
    pub fn pixel_position(&self, x: f64, y: f64) -> Vector3<f64> {
        self.origin + self.plane_offset(x, y)
    }

    /// Pixel coordinates of the orthogonal projection of `p` onto the plane.
    pub fn pixel_coords(&self, p: &Vector3<f64>) -> [f64; 2] {
        let local = self.orientation.inverse_transform_vector(&(p - self.origin));
        [local.x / self.grid.h_size, local.y / self.grid.v_size]
    }

    /// Pixel hit by a ray from the sample along `direction`.
    ///
    /// `None` when the ray runs parallel to the plane or points away from it.
    pub fn pixel_coords_of_direction(&self, direction: &Vector3<f64>) -> Option<[f64; 2]> {
        let unit = unit_vector(*direction, "direction").ok()?;
        let t = self.ray_path_length(&unit)?;
        Some(self.pixel_coords(&(unit * t)))
    }

    /// `2θ` (radians) between the beam and the ray to pixel `(x, y)`.
    pub fn pixel_scattering_angle(&self, x: f64, y: f64) -> f64 {
        let p = self.pixel_position(x, y);
        p.cross(&self.beam).norm().atan2(p.dot(&self.beam))
    }

    /// Azimuth (radians, `(-π, π]`) of the ray to pixel `(x, y)` about the
    /// beam; zero along lab `+x` for a `+z` beam.
    pub fn pixel_azimuth(&self, x: f64, y: f64) -> f64 {
        let p = self.pixel_position(x, y);
        let (u, w) = beam_basis(&self.beam);
        p.dot(&w).atan2(p.dot(&u))
    }

    /// Largest `2θ` (radians) over the four detector corners.
    pub fn max_scattering_angle(&self) -> f64 {
        let (px, py) = (self.grid.px as f64, self.grid.py as f64);
        [(0.0, 0.0), (px, 0.0), (px, py), (0.0, py)]
            .iter()
            .map(|&(x, y)| self.pixel_scattering_angle(x, y))
            .fold(0.0, f64::max)
    }

    // ── beam centre ────────────────────────────────────────────────────────

    /// Lab point where the beam crosses the detector plane.
    pub fn beam_centre_position(&self) -> Option<Vector3<f64>> {
        self.beam_path_length().map(|t| self.beam * t)
    }

    /// Sample → beam-centre distance (mm); `+∞` when the beam misses.
    pub fn beam_centre_distance(&self) -> f64 {
        self.beam_path_length().unwrap_or(f64::INFINITY)
    }

    /// Beam-centre pixel coordinates; `[NaN, NaN]` when the beam misses.
    pub fn beam_centre_coords(&self) -> [f64; 2] {
        match self.beam_centre_position() {
            Some(hit) => self.pixel_coords(&hit),
            None => [f64::NAN, f64::NAN],
        }
    }

    /// Alias of [`beam_centre_coords`](Self::beam_centre_coords).
    pub fn intersect_precise_coords(&self) -> [f64; 2] {
        self.beam_centre_coords()
    }

    // ── plane geometry ─────────────────────────────────────────────────────

    /// Distance (mm) from the sample to the detector plane.
    pub fn perpendicular_distance(&self) -> f64 {
        self.normal().dot(&self.origin).abs()
    }

    /// Foot of the perpendicular from the sample onto the plane.
    pub fn closest_point(&self) -> Vector3<f64> {
        let n = self.normal();
        n * n.dot(&self.origin)
    }

    /// Angle (radians) between the beam and the perpendicular from the sample
    /// to the detector plane.
    pub fn tilt_angle(&self) -> f64 {
        let n = self.normal();
        let towards_plane = if n.dot(&self.origin) > 0.0 { n } else { -n };
        self.beam
            .cross(&towards_plane)
            .norm()
            .atan2(self.beam.dot(&towards_plane))
    }

    /// In-plane direction (radians, pixel frame, from `+x`) of the beam
    /// projected onto the detector; zero for an untilted detector.
    pub fn tilt_direction(&self) -> f64 {
        let n = self.normal();
        let along = self.beam - n * self.beam.dot(&n);
        if along.norm() < 1e-12 {
            return 0.0;
        }
        let local = self.orientation.inverse_transform_vector(&along);
        (local.y * self.grid.h_size).atan2(local.x * self.grid.v_size)
    }

    /// Solid angle (sr) of the pixel spanning `(x, y)` to `(x+1, y+1)`.
    pub fn calculate_solid_angle(&self, x: f64, y: f64) -> f64 {
        let a = self.pixel_position(x, y);
        let b = self.pixel_position(x + 1.0, y);
        let c = self.pixel_position(x + 1.0, y + 1.0);
        let d = self.pixel_position(x, y + 1.0);
        triangle_solid_angle(&a, &b, &c) + triangle_solid_angle(&a, &c, &d)
    }

    // ── comparison ─────────────────────────────────────────────────────────

    /// Component-wise closeness of grid, origin, orientation and beam.
    pub fn is_close(&self, other: &Self, rel_tol: f64, abs_tol: f64) -> bool {
        let close = |a: f64, b: f64| is_close(a, b, rel_tol, abs_tol);
        self.grid.px == other.grid.px
            && self.grid.py == other.grid.py
            && close(self.grid.h_size, other.grid.h_size)
            && close(self.grid.v_size, other.grid.v_size)
            && self.origin.iter().zip(other.origin.iter()).all(|(&a, &b)| close(a, b))
            && self
                .orientation
                .matrix()
                .iter()
                .zip(other.orientation.matrix().iter())
                .all(|(&a, &b)| close(a, b))
            && self.beam.iter().zip(other.beam.iter()).all(|(&a, &b)| close(a, b))
    }

    /// [`is_close`](Self::is_close) at the default tolerances.
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.is_close(other, DEFAULT_REL_TOL, DEFAULT_ABS_TOL)
    }

    // ── internals ──────────────────────────────────────────────────────────

    fn plane_offset(&self, x: f64, y: f64) -> Vector3<f64> {
        self.orientation * Vector3::new(x * self.grid.h_size, y * self.grid.v_size, 0.0)
    }

    fn beam_path_length(&self) -> Option<f64> {
        self.ray_path_length(&self.beam)
    }

    /// Path length `t > 0` at which the unit ray `dir` meets the plane.
    fn ray_path_length(&self, dir: &Vector3<f64>) -> Option<f64> {
        let n = self.normal();
        let denom = n.dot(dir);
        if denom.abs() < PARALLEL_EPS {
            return None;
        }
        let t = n.dot(&self.origin) / denom;
        (t.is_finite() && t > 0.0).then_some(t)
    }
}

fn checked_rotation(m: Matrix3<f64>) -> Result<Rotation3<f64>, GeometryError> {
    if !m.iter().all(|v| v.is_finite()) {
        return Err(GeometryError::NonFinite("orientation"));
    }
    let gram = m.transpose() * m;
    let orthonormal = (gram - Matrix3::identity()).amax() < ROTATION_EPS;
    if !orthonormal || m.determinant() < 0.0 {
        return Err(GeometryError::NotARotation);
    }
    Ok(Rotation3::from_matrix(&m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn grid() -> PixelGrid {
        PixelGrid::square(2048, 2048, 0.172).unwrap()
    }

    fn face_on(distance: f64, bc: [f64; 2]) -> DetectorPose {
        DetectorPose::from_parameters(
            &PoseParameters {
                distance,
                beam_centre: bc,
                yaw: 0.0,
                pitch: 0.0,
                roll: 0.0,
            },
            grid(),
        )
        .unwrap()
    }

    /// Spherical excess via L'Huilier, with arc lengths from `atan2`.
    fn lhuilier(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> f64 {
        let arc = |u: &Vector3<f64>, v: &Vector3<f64>| u.cross(v).norm().atan2(u.dot(v));
        let (ea, eb, ec) = (arc(b, c), arc(a, c), arc(a, b));
        let s = 0.5 * (ea + eb + ec);
        let t = (0.5 * s).tan()
            * (0.5 * (s - ea)).tan()
            * (0.5 * (s - eb)).tan()
            * (0.5 * (s - ec)).tan();
        4.0 * t.max(0.0).sqrt().atan()
    }

    fn pixel_solid_angle_other_diagonal(pose: &DetectorPose, x: f64, y: f64) -> f64 {
        let a = pose.pixel_position(x, y);
        let b = pose.pixel_position(x + 1.0, y);
        let c = pose.pixel_position(x + 1.0, y + 1.0);
        let d = pose.pixel_position(x, y + 1.0);
        lhuilier(&a, &b, &d) + lhuilier(&b, &c, &d)
    }

    #[test]
    fn grid_validation() {
        assert!(PixelGrid::new(0, 10, 0.1, 0.1).is_err());
        assert!(PixelGrid::new(10, 10, -0.1, 0.1).is_err());
        assert!(PixelGrid::new(10, 10, 0.1, f64::INFINITY).is_err());
        assert!(PixelGrid::new(10, 10, 0.1, 0.2).is_ok());
    }

    #[test]
    fn origin_round_trips_exactly() {
        let mut pose = face_on(200.0, [1024.0, 1024.0]);
        pose.set_normal_angles_in_degrees(17.0, -8.0, 33.0).unwrap();
        for octant in 0..8 {
            let sign = |bit: u32| if octant & (1 << bit) == 0 { 1.0 } else { -1.0 };
            let o = Vector3::new(sign(0) * 12.5, sign(1) * 3.25, sign(2) * 180.1);
            pose.set_origin(o).unwrap();
            assert_eq!(pose.pixel_position(0.0, 0.0), o, "octant {}", octant);
            assert_eq!(pose.origin(), o);
        }
    }

    #[test]
    fn pixel_position_and_coords_are_inverse() {
        let mut pose = face_on(250.0, [900.0, 1100.0]);
        pose.set_normal_angles_in_degrees(12.0, -7.0, 33.0).unwrap();
        for &(x, y) in &[(0.0, 0.0), (17.5, 1999.25), (1024.0, 3.0)] {
            let c = pose.pixel_coords(&pose.pixel_position(x, y));
            assert_relative_eq!(c[0], x, epsilon = 1e-9);
            assert_relative_eq!(c[1], y, epsilon = 1e-9);
        }
    }

    #[test]
    fn face_on_beam_centre() {
        let pose = face_on(200.0, [1000.0, 1010.0]);
        assert_relative_eq!(pose.beam_centre_distance(), 200.0, epsilon = 1e-12);
        let bc = pose.beam_centre_coords();
        assert_relative_eq!(bc[0], 1000.0, epsilon = 1e-9);
        assert_relative_eq!(bc[1], 1010.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.tilt_angle(), 0.0, epsilon = 1e-15);
        assert_relative_eq!(pose.perpendicular_distance(), 200.0, epsilon = 1e-12);
    }

    #[test]
    fn parameters_round_trip() {
        let params = PoseParameters {
            distance: 312.0,
            beam_centre: [812.5, 1301.25],
            yaw: 21.0,
            pitch: -4.5,
            roll: 95.0,
        };
        let pose = DetectorPose::from_parameters(&params, grid()).unwrap();
        let back = pose.parameters().unwrap();
        for (a, b) in back.to_array().iter().zip(params.to_array().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn beam_parallel_to_plane_has_no_centre() {
        let mut pose = face_on(200.0, [1024.0, 1024.0]);
        pose.set_normal_angles_in_degrees(90.0, 0.0, 0.0).unwrap();
        assert_eq!(pose.beam_centre_distance(), f64::INFINITY);
        let bc = pose.beam_centre_coords();
        assert!(bc[0].is_nan() && bc[1].is_nan());
        assert!(pose.beam_centre_position().is_none());
        assert!(pose.parameters().is_none());
        assert_eq!(
            pose.set_beam_centre_distance(100.0),
            Err(GeometryError::BeamMissesDetector)
        );
    }

    #[test]
    fn detector_behind_sample_has_no_centre() {
        let mut pose = face_on(200.0, [1024.0, 1024.0]);
        pose.set_origin(pose.origin() - Vector3::new(0.0, 0.0, 400.0))
            .unwrap();
        assert_eq!(pose.beam_centre_distance(), f64::INFINITY);
    }

    #[test]
    fn restoring_angles_restores_pose() {
        let params = PoseParameters {
            distance: 200.0,
            beam_centre: [1024.0, 1024.0],
            yaw: 70.0,
            pitch: 0.0,
            roll: 0.0,
        };
        let mut pose = DetectorPose::from_parameters(&params, grid()).unwrap();
        let before = pose.clone();
        let bc_before = pose.beam_centre_coords();
        let dist_before = pose.beam_centre_distance();

        pose.set_normal_angles_in_degrees(90.0, 0.0, 0.0).unwrap();
        assert_eq!(pose.beam_centre_distance(), f64::INFINITY);
        pose.set_normal_angles_in_degrees(70.0, 0.0, 0.0).unwrap();

        assert_eq!(pose, before);
        assert_eq!(pose.beam_centre_coords(), bc_before);
        assert_eq!(pose.beam_centre_distance(), dist_before);
    }

    #[test]
    fn set_beam_centre_distance_slides_along_beam() {
        let params = PoseParameters {
            distance: 200.0,
            beam_centre: [700.0, 900.0],
            yaw: 15.0,
            pitch: 8.0,
            roll: -30.0,
        };
        let mut pose = DetectorPose::from_parameters(&params, grid()).unwrap();
        pose.set_beam_centre_distance(345.0).unwrap();
        assert_relative_eq!(pose.beam_centre_distance(), 345.0, epsilon = 1e-10);
        let bc = pose.beam_centre_coords();
        assert_relative_eq!(bc[0], 700.0, epsilon = 1e-8);
        assert_relative_eq!(bc[1], 900.0, epsilon = 1e-8);
        let [yaw, pitch, roll] = pose.normal_angles_in_degrees();
        assert_relative_eq!(yaw, 15.0, epsilon = 1e-9);
        assert_relative_eq!(pitch, 8.0, epsilon = 1e-9);
        assert_relative_eq!(roll, -30.0, epsilon = 1e-9);
        assert!(pose.set_beam_centre_distance(-1.0).is_err());
    }

    #[test]
    fn set_beam_centre_coords_shifts_in_plane() {
        let mut pose = face_on(200.0, [1024.0, 1024.0]);
        pose.set_normal_angles_in_degrees(10.0, 5.0, 0.0).unwrap();
        let dist = pose.beam_centre_distance();
        pose.set_beam_centre_coords([512.0, 1500.0]).unwrap();
        let bc = pose.beam_centre_coords();
        assert_relative_eq!(bc[0], 512.0, epsilon = 1e-9);
        assert_relative_eq!(bc[1], 1500.0, epsilon = 1e-9);
        assert_relative_eq!(pose.beam_centre_distance(), dist, epsilon = 1e-10);
    }

    #[test]
    fn orientation_matrix_must_be_a_rotation() {
        let mut pose = face_on(200.0, [0.0, 0.0]);
        let reflection = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0);
        assert_eq!(
            pose.set_orientation_matrix(reflection),
            Err(GeometryError::NotARotation)
        );
        let skew = Matrix3::new(1.0, 0.1, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(pose.set_orientation_matrix(skew).is_err());
        let rot = *orientation_from_angles(10.0, 20.0, 30.0).matrix();
        assert!(pose.set_orientation_matrix(rot).is_ok());
    }

    #[test]
    fn tilt_angle_tracks_yaw() {
        let params = PoseParameters {
            distance: 200.0,
            beam_centre: [1024.0, 1024.0],
            yaw: 25.0,
            pitch: 0.0,
            roll: 40.0,
        };
        let pose = DetectorPose::from_parameters(&params, grid()).unwrap();
        assert_relative_eq!(pose.tilt_angle(), 25f64.to_radians(), epsilon = 1e-12);
        assert_relative_eq!(
            pose.perpendicular_distance(),
            200.0 * 25f64.to_radians().cos(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn solid_angle_matches_independent_formula() {
        let params = PoseParameters {
            distance: 200.0,
            beam_centre: [1000.5, 1000.5],
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
        };
        let face = DetectorPose::from_parameters(&params, grid()).unwrap();
        // Pixel 1000 straddles the foot of the perpendicular.
        for &(x, y) in &[(1000.0, 1000.0), (0.0, 0.0), (2047.0, 13.0), (400.0, 1800.0)] {
            let omega = face.calculate_solid_angle(x, y);
            let expected = pixel_solid_angle_other_diagonal(&face, x, y);
            assert_abs_diff_eq!(omega, expected, epsilon = 1e-12);
            assert!(omega > 0.0);
        }

        let mut tilted = face.clone();
        tilted.set_normal_angles_in_degrees(35.0, -12.0, 20.0).unwrap();
        for &(x, y) in &[(10.0, 10.0), (1500.0, 300.0)] {
            assert_abs_diff_eq!(
                tilted.calculate_solid_angle(x, y),
                pixel_solid_angle_other_diagonal(&tilted, x, y),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn central_pixel_solid_angle_is_area_over_distance_squared() {
        let pose = face_on(200.0, [1000.5, 1000.5]);
        let omega = pose.calculate_solid_angle(1000.0, 1000.0);
        assert_relative_eq!(omega, 0.172 * 0.172 / (200.0 * 200.0), max_relative = 1e-6);
        let a = pose.pixel_position(1000.0, 1000.0);
        let b = pose.pixel_position(1001.0, 1000.0);
        let c = pose.pixel_position(1001.0, 1001.0);
        assert!(triangle_solid_angle(&a, &b, &c) < omega);
    }

    #[test]
    fn direction_lookup_hits_expected_pixel() {
        let mut pose = face_on(200.0, [1024.0, 1024.0]);
        pose.set_normal_angles_in_degrees(-20.0, 10.0, 45.0).unwrap();
        let target = pose.pixel_position(300.0, 1700.0);
        let px = pose.pixel_coords_of_direction(&target).unwrap();
        assert_relative_eq!(px[0], 300.0, epsilon = 1e-8);
        assert_relative_eq!(px[1], 1700.0, epsilon = 1e-8);
        assert!(pose.pixel_coords_of_direction(&(-target)).is_none());
    }

    #[test]
    fn azimuth_and_tilt_direction() {
        let pose = face_on(200.0, [1024.0, 1024.0]);
        assert_abs_diff_eq!(pose.pixel_azimuth(1500.0, 1024.0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(
            pose.pixel_azimuth(1024.0, 1500.0),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-9
        );
        assert_eq!(pose.tilt_direction(), 0.0);

        let mut tilted = pose.clone();
        tilted.set_normal_angles_in_degrees(20.0, 0.0, 0.0).unwrap();
        assert_relative_eq!(
            tilted.tilt_direction().abs(),
            std::f64::consts::PI,
            epsilon = 1e-9
        );
        assert!(tilted.max_scattering_angle() > pose.max_scattering_angle());
        assert!(pose.is_inside(0.0, 2048.0));
        assert!(!pose.is_inside(-0.5, 10.0));
        assert_relative_eq!(pose.detector_size_mm()[0], 2048.0 * 0.172, epsilon = 1e-12);
    }

    #[test]
    fn rigid_rotation_preserves_pixel_layout() {
        let pose = face_on(200.0, [1024.0, 1024.0]);
        let rot = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.3);
        let moved = pose.rotated(&rot);
        let p = moved.pixel_position(10.0, 20.0);
        assert_relative_eq!(p, rot * pose.pixel_position(10.0, 20.0), epsilon = 1e-12);
        assert!(pose.is_close(&pose.clone(), 1e-12, 1e-12));
        assert!(!pose.is_close(&moved, 1e-6, 1e-6));

        let nudged = pose.translated(&Vector3::new(0.0, 0.0, 1e-10));
        assert!(pose.approx_eq(&nudged));
        assert!(!pose.approx_eq(&pose.translated(&Vector3::new(0.0, 0.0, 1e-3))));
    }
}
