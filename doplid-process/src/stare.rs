//!
//! The vertical-stare product pipeline: select the dominant stare records, merge them,
//! condition the intensity (background fit, per-profile bias), convert to attenuated
//! backscatter with the telescope focus function and attach the noise mask.
//!

use crate::background::{correct_background, BgCorrectionMethod};
use crate::noise::{compute_noise_mask, correct_intensity_noise_bias};
use crate::result::{Error, Result};
use crate::select::select_stare_records;
use doplid_decode::halo::{HaloBg, HaloHpl};
use doplid_decode::source::Source;
use doplid_decode::windcube::WindCubeFixed;
use doplid_model::data::Stare;
use doplid_model::meta::InstrumentFamily;
use log::warn;
use ndarray::{Array1, Array2};

const PLANCK: f64 = 6.626_070_15e-34;
const SPEED_OF_LIGHT: f64 = 299_792_458.0;
const DETECTOR_QUANTUM_EFFICIENCY: f64 = 1.0;

/// Build a stare product from Halo `.hpl` sources and their background files.
///
/// Files that fail to parse are skipped with a warning; the pipeline fails with
/// [`Error::NoData`] only when nothing usable remains.
pub fn stare_from_halo(
    data: &[Source],
    data_bg: &[Source],
    bg_correction_method: BgCorrectionMethod,
) -> Result<Stare> {
    let raws: Vec<HaloHpl> = data
        .iter()
        .filter_map(|source| match HaloHpl::from_source(source) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!("skipping {}: {err}", source.filename());
                None
            }
        })
        .collect();
    if raws.is_empty() {
        return Err(Error::NoData("no Halo profile files could be read".to_string()));
    }

    let raw = HaloHpl::merge(&select_stare_records(raws)?)
        .map_err(Error::RawParsing)?
        .sorted_by_time()
        .non_strictly_increasing_timesteps_removed()
        .nans_removed();
    if raw.ntime() == 0 {
        return Err(Error::NoData("no stare profiles left after cleaning".to_string()));
    }

    let backgrounds: Vec<HaloBg> = data_bg
        .iter()
        .filter_map(|source| match HaloBg::from_source(source) {
            Ok(bg) => Some(bg.truncated_to_gates(raw.ngates())),
            Err(err) => {
                warn!("skipping {}: {err}", source.filename());
                None
            }
        })
        .filter(|bg| bg.ngates() == raw.ngates())
        .collect();
    if backgrounds.is_empty() {
        return Err(Error::NoData("background data missing".to_string()));
    }
    let bg = HaloBg::merge(&backgrounds)
        .map_err(Error::RawParsing)?
        .sorted_by_time()
        .non_strictly_increasing_timesteps_removed();

    let (raw, intensity_bg_corrected) = correct_background(raw, &bg, bg_correction_method)?;
    if raw.ntime() == 0 {
        return Err(Error::NoData(
            "no stare profiles have a preceding background measurement".to_string(),
        ));
    }
    let intensity = correct_intensity_noise_bias(&intensity_bg_corrected, &raw.radial_distance);

    let instrument = InstrumentFamily::Halo.defaults();
    let beta = compute_beta(
        &intensity,
        &raw.radial_distance,
        raw.header.focus_range as f64,
        instrument.wavelength(),
        instrument.receiver_bandwidth(),
        instrument.beam_energy(),
        instrument.effective_diameter(),
    );
    let mask = compute_noise_mask(&intensity, &raw.radial_velocity, &raw.radial_distance);

    Ok(Stare::new(
        raw.time.clone(),
        raw.radial_distance.clone(),
        raw.elevation.clone(),
        beta,
        raw.radial_velocity.clone(),
        mask,
        instrument.wavelength(),
        raw.header.system_id.clone(),
    )?)
}

/// Build a stare product from WindCube fixed-stare NetCDF sources. The linear
/// carrier-to-noise ratio takes the place of the Halo intensity; no background files exist
/// for this instrument family.
pub fn stare_from_windcube(data: &[Source]) -> Result<Stare> {
    let raws: Vec<WindCubeFixed> = data
        .iter()
        .filter_map(|source| match WindCubeFixed::from_source(source) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!("skipping {}: {err}", source.filename());
                None
            }
        })
        .collect();
    if raws.is_empty() {
        return Err(Error::NoData("no WindCube files could be read".to_string()));
    }

    let raw = WindCubeFixed::merge(&raws)
        .map_err(Error::RawParsing)?
        .sorted_by_time()
        .non_strictly_increasing_timesteps_removed();
    if raw.ntime() == 0 {
        return Err(Error::NoData("no WindCube profiles left after cleaning".to_string()));
    }

    // intensity = SNR + 1 with the SNR taken from the linear CNR.
    let intensity = raw.cnr.mapv(|db| 10.0_f64.powf(0.1 * db) + 1.0);

    let instrument = InstrumentFamily::WindCube.defaults();
    let focus = instrument.focus().ok_or_else(|| {
        Error::InvalidArgument("WindCube defaults are missing a telescope focus".to_string())
    })?;
    let beta = compute_beta(
        &intensity,
        &raw.radial_distance,
        focus,
        instrument.wavelength(),
        instrument.receiver_bandwidth(),
        instrument.beam_energy(),
        instrument.effective_diameter(),
    );
    let mask = compute_noise_mask(&intensity, &raw.radial_velocity, &raw.radial_distance);

    Ok(Stare::new(
        raw.time.clone(),
        raw.radial_distance.clone(),
        raw.elevation.clone(),
        beta,
        raw.radial_velocity.clone(),
        mask,
        instrument.wavelength(),
        raw.system_id.clone(),
    )?)
}

/// Attenuated backscatter from the heterodyne-lidar equation with a Gaussian-beam effective
/// receiver area.
///
/// Reference: Pentikäinen et al. 2020, <https://doi.org/10.5194/amt-13-2849-2020>.
pub(crate) fn compute_beta(
    intensity: &Array2<f64>,
    radial_distance: &Array1<f64>,
    focus: f64,
    wavelength: f64,
    receiver_bandwidth: f64,
    beam_energy: f64,
    effective_diameter: f64,
) -> Array2<f64> {
    let nu = SPEED_OF_LIGHT / wavelength;
    let area = effective_receiver_area(radial_distance, focus, wavelength, effective_diameter);
    Array2::from_shape_fn(intensity.dim(), |(row, gate)| {
        let snr = intensity[(row, gate)] - 1.0;
        let range = radial_distance[gate];
        2.0 * PLANCK * nu * receiver_bandwidth * range * range * snr
            / (DETECTOR_QUANTUM_EFFICIENCY * SPEED_OF_LIGHT * beam_energy * area[gate])
    })
}

/// Effective receiver area of a Gaussian beam focused at `focus`.
pub(crate) fn effective_receiver_area(
    radial_distance: &Array1<f64>,
    focus: f64,
    wavelength: f64,
    effective_diameter: f64,
) -> Array1<f64> {
    radial_distance.mapv(|range| {
        let diffraction = std::f64::consts::PI * effective_diameter * effective_diameter
            / (4.0 * wavelength * range);
        let defocus = 1.0 - range / focus;
        std::f64::consts::PI * effective_diameter * effective_diameter
            / (4.0 * (1.0 + diffraction * diffraction * defocus * defocus))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_effective_receiver_area_peaks_at_focus() {
        let radial_distance = array![100.0, 500.0, 1000.0, 2000.0];
        let area = effective_receiver_area(&radial_distance, 1000.0, 1.565e-6, 25e-3);
        // At the focal distance the defocus term vanishes and the full aperture is effective.
        let aperture = std::f64::consts::PI * 25e-3_f64.powi(2) / 4.0;
        assert_abs_diff_eq!(area[2], aperture, epsilon = 1e-12);
        assert!(area[0] < area[2]);
        assert!(area[3] < area[2]);
    }

    #[test]
    fn test_beta_follows_the_lidar_equation() {
        let intensity = array![[1.1]];
        let radial_distance = array![300.0];
        let beta = compute_beta(&intensity, &radial_distance, 1000.0, 1.565e-6, 5e7, 1e-5, 25e-3);

        let area = effective_receiver_area(&radial_distance, 1000.0, 1.565e-6, 25e-3);
        let nu = SPEED_OF_LIGHT / 1.565e-6;
        let expected = 2.0 * PLANCK * nu * 5e7 * 300.0 * 300.0 * 0.1
            / (SPEED_OF_LIGHT * 1e-5 * area[0]);
        assert_abs_diff_eq!(beta[(0, 0)], expected, epsilon = expected.abs() * 1e-12);
    }

    #[test]
    fn test_beta_is_zero_at_unit_intensity() {
        let intensity = array![[1.0, 2.0]];
        let radial_distance = array![100.0, 200.0];
        let beta = compute_beta(&intensity, &radial_distance, 500.0, 1.565e-6, 5e7, 1e-5, 25e-3);
        assert_abs_diff_eq!(beta[(0, 0)], 0.0);
        assert!(beta[(0, 1)] > 0.0);
    }
}
