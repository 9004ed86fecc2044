//! Beam and goniometer metadata accompanying a detector image.

use crate::error::GeometryError;

/// `h·c` in keV·Å, for wavelength/energy conversion.
pub const HC_KEV_ANGSTROM: f64 = 12.398_419_843_320_026;

/// Incident-beam wavelength plus the oscillation metadata of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamEnvironment {
    wavelength: f64,
    /// Goniometer phi at the start of the exposure (degrees).
    pub phi_start: f64,
    /// Phi swept during the exposure (degrees).
    pub phi_range: f64,
    /// Exposure time (seconds).
    pub exposure_time: f64,
    /// Phi gap between consecutive exposures (degrees).
    pub oscillation_gap: f64,
}

impl BeamEnvironment {
    /// Environment with the given wavelength (Å) and no oscillation.
    pub fn new(wavelength: f64) -> Result<Self, GeometryError> {
        check_wavelength(wavelength)?;
        Ok(Self {
            wavelength,
            phi_start: 0.0,
            phi_range: 0.0,
            exposure_time: 0.0,
            oscillation_gap: 0.0,
        })
    }

    /// Environment from a photon energy in keV.
    pub fn from_energy_kev(energy: f64) -> Result<Self, GeometryError> {
        if !(energy > 0.0) {
            return Err(GeometryError::InvalidWavelength(HC_KEV_ANGSTROM / energy));
        }
        Self::new(HC_KEV_ANGSTROM / energy)
    }

    /// Wavelength in Å.
    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    pub fn set_wavelength(&mut self, wavelength: f64) -> Result<(), GeometryError> {
        check_wavelength(wavelength)?;
        self.wavelength = wavelength;
        Ok(())
    }

    /// Photon energy in keV.
    pub fn energy_kev(&self) -> f64 {
        HC_KEV_ANGSTROM / self.wavelength
    }

    /// Wavenumber `k = 2π/λ` in Å⁻¹.
    pub fn wavenumber(&self) -> f64 {
        2.0 * std::f64::consts::PI / self.wavelength
    }

    /// Phi at the middle of the exposure (degrees).
    pub fn phi_centre(&self) -> f64 {
        self.phi_start + 0.5 * self.phi_range
    }
}

fn check_wavelength(wavelength: f64) -> Result<(), GeometryError> {
    if !(wavelength > 0.0 && wavelength.is_finite()) {
        return Err(GeometryError::InvalidWavelength(wavelength));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_conversion() {
        let env = BeamEnvironment::from_energy_kev(12.398_419_843_320_026).unwrap();
        assert!((env.wavelength() - 1.0).abs() < 1e-12);
        assert!((env.energy_kev() - HC_KEV_ANGSTROM).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_wavelength() {
        assert!(BeamEnvironment::new(0.0).is_err());
        assert!(BeamEnvironment::new(f64::NAN).is_err());
        let mut env = BeamEnvironment::new(1.0).unwrap();
        assert_eq!(
            env.set_wavelength(-2.0),
            Err(GeometryError::InvalidWavelength(-2.0))
        );
        assert_eq!(env.wavelength(), 1.0);
    }

    #[test]
    fn test_phi_centre() {
        let mut env = BeamEnvironment::new(0.9).unwrap();
        env.phi_start = 10.0;
        env.phi_range = 0.5;
        assert!((env.phi_centre() - 10.25).abs() < 1e-12);
    }
}
