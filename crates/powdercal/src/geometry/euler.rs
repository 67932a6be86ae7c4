//! Yaw/pitch/roll convention for detector orientations.
//!
//! `R = Ry(yaw) · Rx(pitch) · Rz(roll)`: yaw about the lab vertical, pitch
//! about the yawed horizontal, roll about the resulting detector normal.
//! Angles are in degrees; yaw and roll are reported in `(-180, 180]`, pitch in
//! `[-90, 90]`.

use nalgebra::{Rotation3, Vector3};

/// Below this `cos(pitch)` the decomposition is in gimbal lock.
const GIMBAL_EPS: f64 = 1e-10;

/// Build an orientation from yaw, pitch and roll in degrees.
pub fn orientation_from_angles(yaw: f64, pitch: f64, roll: f64) -> Rotation3<f64> {
    let r_yaw = Rotation3::from_axis_angle(&Vector3::y_axis(), yaw.to_radians());
    let r_pitch = Rotation3::from_axis_angle(&Vector3::x_axis(), pitch.to_radians());
    let r_roll = Rotation3::from_axis_angle(&Vector3::z_axis(), roll.to_radians());
    r_yaw * r_pitch * r_roll
}

/// Decompose an orientation into `[yaw, pitch, roll]` in degrees.
///
/// At `pitch = ±90°` only `yaw ∓ roll` is defined; the roll is then reported
/// as zero and folded into yaw (`yaw - roll` at `+90°`, `yaw + roll` at
/// `-90°`).
pub fn angles_from_orientation(orientation: &Rotation3<f64>) -> [f64; 3] {
    let m = orientation.matrix();
    let cos_pitch = m[(0, 2)].hypot(m[(2, 2)]);
    if cos_pitch < GIMBAL_EPS {
        let pitch = if -m[(1, 2)] > 0.0 { 90.0 } else { -90.0 };
        let yaw = (-m[(2, 0)]).atan2(m[(0, 0)]).to_degrees();
        return [wrap_degrees(yaw), pitch, 0.0];
    }
    let pitch = (-m[(1, 2)]).atan2(cos_pitch).to_degrees();
    let yaw = m[(0, 2)].atan2(m[(2, 2)]).to_degrees();
    let roll = m[(1, 0)].atan2(m[(1, 1)]).to_degrees();
    [wrap_degrees(yaw), pitch, wrap_degrees(roll)]
}

/// Wrap an angle in degrees into `(-180, 180]`.
pub fn wrap_degrees(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}
