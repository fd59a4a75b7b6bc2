#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The lidar instrument families whose raw files can be turned into products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InstrumentFamily {
    /// HALO Photonics StreamLine series.
    Halo,
    /// Vaisala/Leosphere WindCube series (WLS200S and similar).
    WindCube,
}

/// Physical defaults for an instrument family used by the backscatter calibration.
///
/// The values are the uncalibrated constants from
/// Pentikäinen et al. 2020, <https://doi.org/10.5194/amt-13-2849-2020>, and for the WindCube
/// from <https://doi.org/10.5194/essd-13-3539-2021>.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instrument {
    wavelength: f64,
    receiver_bandwidth: f64,
    beam_energy: f64,
    effective_diameter: f64,
    focus: Option<f64>,
}

const HALO: Instrument = Instrument {
    wavelength: 1.565e-6,
    receiver_bandwidth: 50e6,
    beam_energy: 1e-5,
    effective_diameter: 25e-3,
    focus: None,
};

const WINDCUBE: Instrument = Instrument {
    wavelength: 1.54e-6,
    receiver_bandwidth: 55e6,
    beam_energy: 1e-5,
    effective_diameter: 50e-3,
    focus: Some(1e3),
};

impl InstrumentFamily {
    /// The physical defaults for this instrument family.
    pub fn defaults(self) -> &'static Instrument {
        match self {
            InstrumentFamily::Halo => &HALO,
            InstrumentFamily::WindCube => &WINDCUBE,
        }
    }
}

impl Instrument {
    /// Laser wavelength in meters.
    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    /// Receiver bandwidth in hertz.
    pub fn receiver_bandwidth(&self) -> f64 {
        self.receiver_bandwidth
    }

    /// Beam energy in joules.
    pub fn beam_energy(&self) -> f64 {
        self.beam_energy
    }

    /// Effective diameter of the Gaussian beam in meters.
    pub fn effective_diameter(&self) -> f64 {
        self.effective_diameter
    }

    /// Effective telescope focal length in meters, when the instrument does not report one
    /// itself. Halo headers carry a focus range per file, so no default exists for them.
    pub fn focus(&self) -> Option<f64> {
        self.focus
    }
}
