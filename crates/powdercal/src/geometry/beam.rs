use serde::{Deserialize, Serialize};

use super::GeometryError;

/// `h·c` in keV·Å (CODATA 2018): `E[keV] = HC_KEV_ANGSTROM / λ[Å]`.
pub const HC_KEV_ANGSTROM: f64 = 12.398_419_843_320_026;

/// Incident beam wavelength and energy.
///
/// Only the wavelength is stored; energy is derived through
/// [`HC_KEV_ANGSTROM`], so both views are always consistent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamEnvironment {
    wavelength: f64,
}

impl BeamEnvironment {
    /// Beam with the given wavelength in ångström.
    pub fn from_wavelength(wavelength: f64) -> Result<Self, GeometryError> {
        if !(wavelength.is_finite() && wavelength > 0.0) {
            return Err(GeometryError::InvalidWavelength(wavelength));
        }
        Ok(Self { wavelength })
    }

    /// Beam with the given photon energy in keV.
    pub fn from_energy(energy_kev: f64) -> Result<Self, GeometryError> {
        if !(energy_kev.is_finite() && energy_kev > 0.0) {
            return Err(GeometryError::InvalidEnergy(energy_kev));
        }
        Self::from_wavelength(HC_KEV_ANGSTROM / energy_kev)
    }

    /// Wavelength (Å).
    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    /// Photon energy (keV).
    pub fn energy(&self) -> f64 {
        HC_KEV_ANGSTROM / self.wavelength
    }

    /// Wavenumber `k = 2π/λ` (Å⁻¹).
    pub fn wavenumber(&self) -> f64 {
        2.0 * std::f64::consts::PI / self.wavelength
    }

    /// Bragg scattering angle `2θ` (radians) for a lattice spacing `d` (Å).
    ///
    /// Returns `None` when `λ / 2d > 1`, i.e. the reflection is not reachable.
    pub fn scattering_angle(&self, d_spacing: f64) -> Option<f64> {
        if !(d_spacing.is_finite() && d_spacing > 0.0) {
            return None;
        }
        let s = self.wavelength / (2.0 * d_spacing);
        if s > 1.0 {
            return None;
        }
        Some(2.0 * s.asin())
    }

    /// Lattice spacing `d` (Å) diffracting into `2θ` (radians).
    pub fn d_spacing(&self, two_theta: f64) -> f64 {
        self.wavelength / (2.0 * (0.5 * two_theta).sin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn energy_and_wavelength_are_reciprocal() {
        let beam = BeamEnvironment::from_wavelength(1.5405929).unwrap();
        assert_relative_eq!(beam.energy(), 8.047_8, epsilon = 1e-3);
        let back = BeamEnvironment::from_energy(beam.energy()).unwrap();
        assert_relative_eq!(back.wavelength(), 1.5405929, epsilon = 1e-12);
    }

    #[test]
    fn rejects_non_positive_values() {
        assert!(BeamEnvironment::from_wavelength(0.0).is_err());
        assert!(BeamEnvironment::from_wavelength(f64::NAN).is_err());
        assert!(BeamEnvironment::from_energy(-1.0).is_err());
    }

    #[test]
    fn bragg_angle_round_trip() {
        let beam = BeamEnvironment::from_wavelength(1.0).unwrap();
        let tth = beam.scattering_angle(2.0).unwrap();
        assert_relative_eq!(tth, 2.0 * (0.25f64).asin(), epsilon = 1e-15);
        assert_relative_eq!(beam.d_spacing(tth), 2.0, epsilon = 1e-12);
        assert!(beam.scattering_angle(0.49).is_none());
    }
}
