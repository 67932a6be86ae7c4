//! Least-squares formulation of ring calibration.

use nalgebra::Vector3;

use super::observation::{FreeParameters, ParameterScales, RingObservation};
use super::CalibrationError;
use crate::conic::ring_conic_coeffs;
use crate::geometry::{DetectorPose, PixelGrid, PoseParameters};
use crate::optimize::LeastSquaresProblem;

/// Append the signed Sampson distance of every observed point to its
/// predicted ring. Returns `false` when a ring is unreachable at this
/// wavelength or its conic degenerates.
pub(crate) fn ring_residuals(
    pose: &DetectorPose,
    wavelength: f64,
    rings: &[RingObservation],
    out: &mut Vec<f64>,
) -> bool {
    if !(wavelength.is_finite() && wavelength > 0.0) {
        return false;
    }
    for ring in rings {
        let s = wavelength / (2.0 * ring.d_spacing);
        if !(s > 0.0 && s <= 1.0) {
            return false;
        }
        let Some(coeffs) = ring_conic_coeffs(pose, 2.0 * s.asin()).unit_norm() else {
            return false;
        };
        out.extend(ring.points.iter().map(|&[x, y]| coeffs.sampson_residual(x, y)));
    }
    true
}

/// RMS residual per ring; `NaN` for rings without points or when the
/// geometry is invalid.
pub(crate) fn ring_rms(pose: &DetectorPose, wavelength: f64, rings: &[RingObservation]) -> Vec<f64> {
    let mut buf = Vec::new();
    rings
        .iter()
        .map(|ring| {
            buf.clear();
            if ring.points.is_empty()
                || !ring_residuals(pose, wavelength, std::slice::from_ref(ring), &mut buf)
            {
                return f64::NAN;
            }
            (buf.iter().map(|r| r * r).sum::<f64>() / buf.len() as f64).sqrt()
        })
        .collect()
}

struct DetectorSlot<'a> {
    base: [f64; 6],
    grid: PixelGrid,
    beam: Vector3<f64>,
    rings: &'a [RingObservation],
}

/// Rings on one or more detectors sharing a wavelength.
///
/// Parameter layout: the wavelength first when free, then each detector's
/// free pose parameters in `[distance, bcx, bcy, yaw, pitch, roll]` order.
pub(crate) struct PowderProblem<'a> {
    slots: Vec<DetectorSlot<'a>>,
    wavelength: f64,
    free: FreeParameters,
}

impl<'a> PowderProblem<'a> {
    pub fn new(
        detectors: &[(&DetectorPose, &'a [RingObservation])],
        wavelength: f64,
        free: FreeParameters,
    ) -> Result<Self, CalibrationError> {
        let mut slots = Vec::with_capacity(detectors.len());
        for (i, (pose, rings)) in detectors.iter().enumerate() {
            let params = pose.parameters().ok_or_else(|| {
                CalibrationError::InvalidInput(format!("beam misses detector {}", i))
            })?;
            slots.push(DetectorSlot {
                base: params.to_array(),
                grid: pose.grid(),
                beam: pose.beam_vector(),
                rings,
            });
        }
        Ok(Self {
            slots,
            wavelength,
            free,
        })
    }

    fn pose_count(&self) -> usize {
        self.free.pose_mask().iter().filter(|&&f| f).count()
    }

    /// Starting parameter vector.
    pub fn initial(&self) -> Vec<f64> {
        let mut x = Vec::with_capacity(self.dimension());
        if self.free.wavelength {
            x.push(self.wavelength);
        }
        let mask = self.free.pose_mask();
        for slot in &self.slots {
            x.extend(slot.base.iter().zip(mask).filter(|(_, f)| *f).map(|(&v, _)| v));
        }
        x
    }

    pub fn scales(&self, scales: &ParameterScales) -> Vec<f64> {
        let mut s = Vec::with_capacity(self.dimension());
        if self.free.wavelength {
            s.push(scales.wavelength);
        }
        let mask = self.free.pose_mask();
        for _ in &self.slots {
            s.extend(scales.pose_scales().iter().zip(mask).filter(|(_, f)| *f).map(|(&v, _)| v));
        }
        s
    }

    /// Wavelength and full pose parameters of every detector at `params`.
    pub fn unpack(&self, params: &[f64]) -> (f64, Vec<PoseParameters>) {
        let mut it = params.iter().copied();
        let wavelength = if self.free.wavelength {
            it.next().unwrap_or(self.wavelength)
        } else {
            self.wavelength
        };
        let mask = self.free.pose_mask();
        let poses = self
            .slots
            .iter()
            .map(|slot| {
                let mut full = slot.base;
                for (v, free) in full.iter_mut().zip(mask) {
                    if free {
                        if let Some(p) = it.next() {
                            *v = p;
                        }
                    }
                }
                PoseParameters::from_array(full)
            })
            .collect();
        (wavelength, poses)
    }

    /// Wavelength and detector poses at `params`; `None` when a pose is
    /// invalid.
    pub fn poses(&self, params: &[f64]) -> Option<(f64, Vec<DetectorPose>)> {
        let (wavelength, all) = self.unpack(params);
        let poses = self
            .slots
            .iter()
            .zip(&all)
            .map(|(slot, p)| DetectorPose::from_parameters_with_beam(p, slot.grid, slot.beam).ok())
            .collect::<Option<Vec<_>>>()?;
        Some((wavelength, poses))
    }
}

impl LeastSquaresProblem for PowderProblem<'_> {
    fn dimension(&self) -> usize {
        self.free.wavelength as usize + self.slots.len() * self.pose_count()
    }

    fn residuals(&self, params: &[f64], out: &mut Vec<f64>) -> bool {
        out.clear();
        let Some((wavelength, poses)) = self.poses(params) else {
            return false;
        };
        poses
            .iter()
            .zip(&self.slots)
            .all(|(pose, slot)| ring_residuals(pose, wavelength, slot.rings, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conic::ring_points;

    #[test]
    fn layout_round_trips() {
        let grid = PixelGrid::square(1000, 1000, 0.1).unwrap();
        let a = DetectorPose::from_beam_centre(100.0, [500.0, 480.0], [3.0, -2.0, 10.0], grid).unwrap();
        let b = DetectorPose::from_beam_centre(150.0, [20.0, 500.0], [30.0, 0.0, 0.0], grid).unwrap();
        let rings: Vec<RingObservation> = Vec::new();
        let problem =
            PowderProblem::new(&[(&a, &rings[..]), (&b, &rings[..])], 1.2, FreeParameters::SEVEN)
                .unwrap();
        assert_eq!(problem.dimension(), 13);

        let x0 = problem.initial();
        assert_eq!(x0.len(), 13);
        assert_eq!(x0[0], 1.2);
        let (wavelength, poses) = problem.poses(&x0).unwrap();
        assert_eq!(wavelength, 1.2);
        assert!(poses[0].is_close(&a, 1e-9, 1e-9));
        assert!(poses[1].is_close(&b, 1e-9, 1e-9));
        assert_eq!(problem.scales(&ParameterScales::default()).len(), 13);
    }

    #[test]
    fn exact_points_have_zero_residual() {
        let grid = PixelGrid::square(1000, 1000, 0.1).unwrap();
        let pose = DetectorPose::from_beam_centre(100.0, [500.0, 480.0], [3.0, -2.0, 10.0], grid).unwrap();
        let wavelength: f64 = 0.5;
        let rings: Vec<RingObservation> = [2.0, 1.5]
            .iter()
            .map(|&d: &f64| {
                let tt = 2.0 * (wavelength / (2.0 * d)).asin();
                RingObservation::new(d, ring_points(&pose, tt, 60, true))
            })
            .collect();
        let mut out = Vec::new();
        assert!(ring_residuals(&pose, wavelength, &rings, &mut out));
        assert_eq!(out.len(), 120);
        assert!(out.iter().all(|r| r.abs() < 1e-8));
        assert!(!ring_residuals(&pose, 3.5, &rings, &mut out));
        assert!(ring_rms(&pose, wavelength, &rings).iter().all(|&r| r < 1e-8));
    }
}
