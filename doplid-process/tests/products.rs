//! End-to-end product construction from synthetic in-memory raw files.

use approx::assert_abs_diff_eq;
use doplid_decode::source::Source;
use doplid_model::data::Stare;
use doplid_process::{
    stare_depol, stare_from_halo, wind_from_halo, BgCorrectionMethod, WindOptions,
};
use ndarray::{Array1, Array2};

/// A minimal Halo `.hpl` file with three gates and the given profiles.
fn hpl_file(profiles: &[(f64, f64, f64, f64)]) -> String {
    let mut content = String::new();
    content.push_str("Filename:\tStare_213_20230101_06.hpl\r\n");
    content.push_str("System ID:\t213\r\n");
    content.push_str("Number of gates:\t3\r\n");
    content.push_str("Range gate length (m):\t30.0\r\n");
    content.push_str("Gate length (pts):\t10\r\n");
    content.push_str("Pulses/ray:\t10000\r\n");
    content.push_str("No. of rays in file:\t1\r\n");
    content.push_str("Scan type:\tStare\r\n");
    content.push_str("Focus range:\t65535\r\n");
    content.push_str("Start time:\t20230101 06:00:00.00\r\n");
    content.push_str("Resolution (m/s):\t0.0382\r\n");
    content.push_str("****\r\n");
    for &(hours, azimuth, elevation, doppler) in profiles {
        content.push_str(&format!("{hours:.6} {azimuth:.2} {elevation:.2}\r\n"));
        for gate in 0..3 {
            content.push_str(&format!("{gate} {doppler:.10} 1.100000 1.0e-6\r\n"));
        }
    }
    content
}

fn stare_sources() -> (Vec<Source>, Vec<Source>) {
    let data = vec![Source::from_bytes(
        "Stare_213_20230101_06.hpl",
        hpl_file(&[(6.0, 0.0, 90.0, 0.03), (6.001, 0.0, 90.0, 0.03)]),
    )];
    let background = vec![Source::from_bytes(
        "Background_010123-050000.txt",
        "1.000000\r\n1.000000\r\n1.000000",
    )];
    (data, background)
}

#[test]
fn test_minimal_halo_stare_product() {
    let (data, background) = stare_sources();
    let stare = stare_from_halo(&data, &background, BgCorrectionMethod::Fit).unwrap();

    assert_eq!(stare.ntime(), 2);
    let expected_grid = ndarray::array![15.0, 45.0, 75.0];
    for (actual, expected) in stare.radial_distance().iter().zip(expected_grid.iter()) {
        assert_abs_diff_eq!(*actual, *expected);
    }
    assert_eq!(stare.system_id(), "213");
    assert!(stare.wavelength() > 0.0);

    // Every gate sits inside the near-instrument band and is masked, but the backscatter is
    // still the one the lidar equation yields for SNR = intensity - 1.
    assert!(stare.mask().iter().all(|&masked| masked));
    for value in stare.beta().iter() {
        assert!(value.is_finite());
        assert!(*value > 0.0);
    }
}

#[test]
fn test_stare_construction_is_deterministic() {
    let (data, background) = stare_sources();
    let first = stare_from_halo(&data, &background, BgCorrectionMethod::Fit).unwrap();
    let second = stare_from_halo(&data, &background, BgCorrectionMethod::Fit).unwrap();
    assert_eq!(first.beta(), second.beta());
    assert_eq!(first.mask(), second.mask());
}

#[test]
fn test_stare_without_usable_background_is_no_data() {
    let (data, _) = stare_sources();
    let background = vec![Source::from_bytes("Background_010123-050000.txt", "garbage")];
    let result = stare_from_halo(&data, &background, BgCorrectionMethod::Fit);
    assert!(matches!(
        result,
        Err(doplid_process::result::Error::NoData(_))
    ));
}

#[test]
fn test_stare_mean_background_method_is_rejected() {
    let (data, background) = stare_sources();
    let result = stare_from_halo(&data, &background, BgCorrectionMethod::Mean);
    assert!(matches!(
        result,
        Err(doplid_process::result::Error::InvalidArgument(_))
    ));
}

#[test]
fn test_wind_from_a_single_vad_rotation() {
    let (u0, v0, w0) = (3.0_f64, -1.0_f64, 0.1_f64);
    let elevation = 75.0_f64;
    let profiles: Vec<(f64, f64, f64, f64)> = (0..8)
        .map(|i| {
            let azimuth = 45.0 * i as f64;
            let doppler = u0 * azimuth.to_radians().sin() * elevation.to_radians().cos()
                + v0 * azimuth.to_radians().cos() * elevation.to_radians().cos()
                + w0 * elevation.to_radians().sin();
            (6.0 + 0.001 * i as f64, azimuth, elevation, doppler)
        })
        .collect();
    let data = vec![Source::from_bytes(
        "VAD_213_20230101_06.hpl",
        hpl_file(&profiles),
    )];

    let wind = wind_from_halo(&data, &WindOptions::default()).unwrap();
    assert_eq!(wind.ntime(), 1);
    for gate in 0..3 {
        assert_abs_diff_eq!(wind.zonal_wind()[(0, gate)], u0, epsilon = 1e-8);
        assert_abs_diff_eq!(wind.meridional_wind()[(0, gate)], v0, epsilon = 1e-8);
        assert_abs_diff_eq!(wind.vertical_wind()[(0, gate)], w0, epsilon = 1e-8);
        assert!(!wind.mask()[(0, gate)]);
    }
    let expected_height = 45.0 * elevation.to_radians().sin();
    assert_abs_diff_eq!(wind.height()[1], expected_height, epsilon = 1e-9);
    // Retrieved speed and direction are consistent with the components.
    let speed = wind.horizontal_wind_speed();
    assert_abs_diff_eq!(speed[(0, 0)], (u0 * u0 + v0 * v0).sqrt(), epsilon = 1e-8);
}

#[test]
fn test_wind_needs_at_least_four_profiles() {
    let profiles: Vec<(f64, f64, f64, f64)> = (0..3)
        .map(|i| (6.0 + 0.001 * i as f64, 120.0 * i as f64, 75.0, 1.0))
        .collect();
    let data = vec![Source::from_bytes(
        "VAD_213_20230101_06.hpl",
        hpl_file(&profiles),
    )];
    let result = wind_from_halo(&data, &WindOptions::default());
    assert!(matches!(
        result,
        Err(doplid_process::result::Error::NoData(_))
    ));
}

fn simple_stare(time: Vec<i64>, elevation: f64, beta: Array2<f64>) -> Stare {
    let ntime = time.len();
    let ngates = beta.ncols();
    Stare::new(
        time,
        Array1::from_iter((0..ngates).map(|gate| (gate as f64 + 0.5) * 30.0)),
        Array1::from_elem(ntime, elevation),
        beta,
        Array2::zeros((ntime, ngates)),
        Array2::from_elem((ntime, ngates), false),
        1.565e-6,
        "213".to_string(),
    )
    .unwrap()
}

#[test]
fn test_depol_alignment_miss_is_masked() {
    let second = 1_000_000_i64;
    let co = simple_stare(
        vec![0, 10 * second],
        90.0,
        Array2::from_elem((2, 3), 2.0e-6),
    );
    let cross = simple_stare(vec![second], 90.0, Array2::from_elem((1, 3), 1.0e-6));

    let product = stare_depol(co, &cross, 0.01).unwrap();

    // The first co profile matches the cross profile one second later.
    assert!(!product.mask_depolarisation()[(0, 0)]);
    let expected = (1.0e-6 - 0.01 * 2.0e-6) / 2.0e-6;
    assert_abs_diff_eq!(product.depolarisation()[(0, 0)], expected, epsilon = 1e-12);

    // The second co profile has no cross profile within twice the median spacing.
    assert!(product.mask_depolarisation()[(1, 0)]);
    assert!(product.depolarisation()[(1, 0)].is_nan());

    // The depolarisation mask is exactly the NaN pattern.
    for (cell, value) in product.depolarisation().indexed_iter() {
        assert_eq!(product.mask_depolarisation()[cell], value.is_nan());
    }
}

#[test]
fn test_depol_rejects_mismatched_systems() {
    let co = simple_stare(vec![0, 1_000_000], 90.0, Array2::from_elem((2, 3), 2.0e-6));
    let mut other = simple_stare(vec![500_000], 90.0, Array2::from_elem((1, 3), 1.0e-6));
    other = Stare::new(
        other.time().to_vec(),
        other.radial_distance().clone(),
        other.elevation().clone(),
        other.beta().clone(),
        other.radial_velocity().clone(),
        other.mask().clone(),
        other.wavelength(),
        "214".to_string(),
    )
    .unwrap();
    let result = stare_depol(co, &other, 0.01);
    assert!(matches!(
        result,
        Err(doplid_process::result::Error::InvalidArgument(_))
    ));
}
