use nalgebra::Vector3;

/// Solid angle (sr) subtended at the lab origin by the planar triangle `abc`.
///
/// Van Oosterom & Strackee (1983):
/// `tan(Ω/2) = |a·(b×c)| / (|a||b||c| + (a·b)|c| + (a·c)|b| + (b·c)|a|)`.
/// The triple product is evaluated on edge vectors to avoid cancellation for
/// pixel-sized triangles far from the origin.
pub(crate) fn triangle_solid_angle(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> f64 {
    let la = a.norm();
    let lb = b.norm();
    let lc = c.norm();
    let numerator = a.dot(&(b - a).cross(&(c - a))).abs();
    let denominator = la * lb * lc + a.dot(b) * lc + a.dot(c) * lb + b.dot(c) * la;
    2.0 * numerator.atan2(denominator)
}
