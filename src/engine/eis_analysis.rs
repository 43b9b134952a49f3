use crate::engine::bounded_lm::BoundedLevenbergMarquardt;
use crate::engine::circuits::Circuit;
use crate::engine::cv_analysis::ValueRange;
use crate::engine::series_parser::EisSeries;
use itertools::izip;
use log::{info, warn};
use nalgebra::DVector;
use serde::Serialize;
use std::f64::consts::PI;
use std::fmt;

/// Model evaluation budget for one circuit fit.
const FIT_MAX_EVALS: usize = 5000;

/// Error types for EIS analysis
#[derive(Debug, Clone, PartialEq)]
pub enum EisError {
    EmptySeries,
    /// The frequency band retained no points.
    EmptyAfterFiltering { freq_min: f64, freq_max: f64 },
}

impl fmt::Display for EisError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EisError::EmptySeries => write!(f, "EIS series is empty after parsing"),
            EisError::EmptyAfterFiltering { freq_min, freq_max } => write!(
                f,
                "no data points left in frequency range [{}, {}] Hz",
                freq_min, freq_max
            ),
        }
    }
}

impl std::error::Error for EisError {}

/// Frequency band and circuit selector for one EIS analysis call.
#[derive(Debug, Clone, PartialEq)]
pub struct EisSettings {
    /// Circuit selector: `"randles"`, `"randles-w"`, anything else skips
    /// fitting.
    pub circuit: String,
    pub freq_min: f64,
    pub freq_max: f64,
}

impl Default for EisSettings {
    fn default() -> Self {
        EisSettings {
            circuit: "randles".to_string(),
            freq_min: 0.01,
            freq_max: 100000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FitQuality {
    Excellent,
    Good,
    Fair,
}

/// Quality ladder on the mean squared complex residual.
pub fn fit_quality(chi_squared: f64) -> FitQuality {
    if chi_squared < 1e-3 {
        FitQuality::Excellent
    } else if chi_squared < 1e-2 {
        FitQuality::Good
    } else {
        FitQuality::Fair
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedParameter {
    pub name: String,
    pub value: f64,
    pub error: f64,
    pub unit: String,
}

/// Tagged outcome of one circuit fit. A failed fit is a value inside an
/// otherwise successful analysis, not an analysis error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status")]
pub enum FitOutcome {
    #[serde(rename = "fitted")]
    Fitted {
        parameters: Vec<FittedParameter>,
        /// `sum(|Z_fit - Z_measured|^2) / N` over the complex residuals.
        chi_squared: f64,
        quality: FitQuality,
    },
    #[serde(rename = "not_fitted")]
    NotFitted { reason: String },
}

/// Impedance extremes; the imaginary axis is reported negated, matching the
/// Nyquist-plot convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImpedanceRange {
    pub z_real_min: f64,
    pub z_real_max: f64,
    pub z_imag_min: f64,
    pub z_imag_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NyquistData {
    pub z_real: Vec<f64>,
    /// `-Im(Z)` per convention.
    pub z_imag: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodeData {
    pub frequency: Vec<f64>,
    pub magnitude: Vec<f64>,
    /// Degrees, `atan2(-Im(Z), Re(Z))`.
    pub phase: Vec<f64>,
}

/// Full result of one EIS analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EisReport {
    pub data_points: usize,
    pub frequency_range: ValueRange,
    pub impedance_range: ImpedanceRange,
    /// Echo of the request's circuit selector.
    pub circuit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitOutcome>,
    pub nyquist_data: NyquistData,
    pub bode_data: BodeData,
}

/// Keep only the points with `freq_min <= frequency <= freq_max`, order
/// preserved across all three arrays.
pub fn filter_by_frequency(series: &EisSeries, freq_min: f64, freq_max: f64) -> EisSeries {
    let mut filtered = EisSeries {
        frequency: Vec::new(),
        z_real: Vec::new(),
        z_imag: Vec::new(),
    };
    for (&f, &re, &im) in izip!(&series.frequency, &series.z_real, &series.z_imag) {
        if f >= freq_min && f <= freq_max {
            filtered.frequency.push(f);
            filtered.z_real.push(re);
            filtered.z_imag.push(im);
        }
    }
    filtered
}

/// Fit the selected circuit to the measured impedance. The residual vector
/// is the concatenation `[Re(Z), Im(Z)]`, matched against the model at every
/// retained frequency.
pub fn fit_circuit(circuit: Circuit, series: &EisSeries) -> FitOutcome {
    let n_points = series.len();
    let omega: Vec<f64> = series.frequency.iter().map(|f| 2.0 * PI * f).collect();
    let y = DVector::from_iterator(
        2 * n_points,
        series.z_real.iter().chain(series.z_imag.iter()).cloned(),
    );
    let model = move |p: &DVector<f64>| {
        let mut out = DVector::zeros(2 * n_points);
        for (i, &w) in omega.iter().enumerate() {
            let z = circuit.impedance(w, p);
            out[i] = z.re;
            out[n_points + i] = z.im;
        }
        out
    };

    let guess = circuit.initial_guess(&series.z_real);
    let lower = circuit.lower_bounds();
    let upper = circuit.upper_bounds();
    let solver = BoundedLevenbergMarquardt::new().with_max_evals(FIT_MAX_EVALS);
    match solver.minimize(model, &guess, &lower, &upper, &y) {
        Ok(report) => {
            // ssr over the stacked re/im residuals equals the summed squared
            // complex residual magnitudes.
            let chi_squared = report.ssr / n_points as f64;
            let parameters = circuit
                .parameters()
                .iter()
                .enumerate()
                .map(|(i, spec)| FittedParameter {
                    name: spec.name.to_string(),
                    value: report.parameters[i],
                    error: report.standard_errors[i],
                    unit: spec.unit.to_string(),
                })
                .collect();
            info!(
                "{:?} fit: chi_squared = {:.3e} in {} evaluations",
                circuit, chi_squared, report.evaluations
            );
            FitOutcome::Fitted {
                parameters,
                chi_squared,
                quality: fit_quality(chi_squared),
            }
        }
        Err(e) => {
            warn!("{:?} fit failed: {}", circuit, e);
            FitOutcome::NotFitted {
                reason: e.to_string(),
            }
        }
    }
}

/// Analyze one EIS sweep: filter to the requested band, derive magnitude and
/// phase, fit the selected circuit if it is one of the two templates, and
/// assemble Nyquist/Bode plot series.
pub fn analyze_eis(series: &EisSeries, settings: &EisSettings) -> Result<EisReport, EisError> {
    if series.is_empty() {
        return Err(EisError::EmptySeries);
    }
    let retained = filter_by_frequency(series, settings.freq_min, settings.freq_max);
    if retained.is_empty() {
        return Err(EisError::EmptyAfterFiltering {
            freq_min: settings.freq_min,
            freq_max: settings.freq_max,
        });
    }

    let magnitude: Vec<f64> = izip!(&retained.z_real, &retained.z_imag)
        .map(|(&re, &im)| (re * re + im * im).sqrt())
        .collect();
    let phase: Vec<f64> = izip!(&retained.z_real, &retained.z_imag)
        .map(|(&re, &im)| (-im).atan2(re).to_degrees())
        .collect();

    let min_of = |v: &[f64]| v.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_of = |v: &[f64]| v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let neg_imag: Vec<f64> = retained.z_imag.iter().map(|&im| -im).collect();

    let fit = Circuit::from_selector(&settings.circuit).map(|circuit| fit_circuit(circuit, &retained));

    Ok(EisReport {
        data_points: retained.len(),
        frequency_range: ValueRange {
            min: min_of(&retained.frequency),
            max: max_of(&retained.frequency),
        },
        impedance_range: ImpedanceRange {
            z_real_min: min_of(&retained.z_real),
            z_real_max: max_of(&retained.z_real),
            z_imag_min: min_of(&neg_imag),
            z_imag_max: max_of(&neg_imag),
        },
        circuit: settings.circuit.clone(),
        fit,
        nyquist_data: NyquistData {
            z_real: retained.z_real.clone(),
            z_imag: neg_imag,
        },
        bode_data: BodeData {
            frequency: retained.frequency.clone(),
            magnitude,
            phase,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 50 log-spaced frequencies over 1e-2..1e5 Hz, like a typical sweep.
    fn logspace_frequencies() -> Vec<f64> {
        let n = 50;
        (0..n)
            .map(|i| 10f64.powf(-2.0 + 7.0 * i as f64 / (n - 1) as f64))
            .collect()
    }

    fn synthetic_series(circuit: Circuit, params: &[f64]) -> EisSeries {
        let frequency = logspace_frequencies();
        let p = DVector::from_vec(params.to_vec());
        let mut z_real = Vec::new();
        let mut z_imag = Vec::new();
        for &f in &frequency {
            let z = circuit.impedance(2.0 * PI * f, &p);
            z_real.push(z.re);
            z_imag.push(z.im);
        }
        EisSeries {
            frequency,
            z_real,
            z_imag,
        }
    }

    #[test]
    fn test_frequency_filtering_is_inclusive() {
        let series = EisSeries {
            frequency: vec![0.5, 1.0, 10.0, 1000.0, 2000.0],
            z_real: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            z_imag: vec![-1.0, -2.0, -3.0, -4.0, -5.0],
        };
        let filtered = filter_by_frequency(&series, 1.0, 1000.0);
        assert_eq!(filtered.frequency, vec![1.0, 10.0, 1000.0]);
        assert_eq!(filtered.z_real, vec![2.0, 3.0, 4.0]);
        assert_eq!(filtered.z_imag, vec![-2.0, -3.0, -4.0]);
        assert!(filtered.frequency.iter().all(|&f| (1.0..=1000.0).contains(&f)));
    }

    #[test]
    fn test_magnitude_and_phase_convention() {
        // Z = 1 - 1j: |Z| = sqrt(2), phase = atan2(1, 1) = +45 deg.
        let series = EisSeries {
            frequency: vec![1.0],
            z_real: vec![1.0],
            z_imag: vec![-1.0],
        };
        let report = analyze_eis(
            &series,
            &EisSettings {
                circuit: "none".to_string(),
                ..EisSettings::default()
            },
        )
        .unwrap();
        assert_relative_eq!(report.bode_data.magnitude[0], 2f64.sqrt(), max_relative = 1e-12);
        assert_relative_eq!(report.bode_data.phase[0], 45.0, max_relative = 1e-12);
        // Nyquist series negates the imaginary part.
        assert_relative_eq!(report.nyquist_data.z_imag[0], 1.0);
        assert_relative_eq!(report.impedance_range.z_imag_min, 1.0);
        assert_relative_eq!(report.impedance_range.z_imag_max, 1.0);
    }

    #[test]
    fn test_unknown_circuit_skips_fitting() {
        let series = synthetic_series(Circuit::Randles, &[10.0, 200.0, 3e-5, 0.85]);
        let settings = EisSettings {
            circuit: "coating".to_string(),
            ..EisSettings::default()
        };
        let report = analyze_eis(&series, &settings).unwrap();
        assert!(report.fit.is_none());
        assert_eq!(report.circuit, "coating");
        assert_eq!(report.data_points, 50);
    }

    #[test]
    fn test_randles_round_trip_recovers_parameters() {
        // Noise-free synthetic sweep from Rs=10, Rct=200, Q=3e-5, n=0.85.
        let truth = [10.0, 200.0, 3e-5, 0.85];
        let series = synthetic_series(Circuit::Randles, &truth);
        let report = analyze_eis(&series, &EisSettings::default()).unwrap();
        match report.fit.expect("randles fit requested") {
            FitOutcome::Fitted {
                parameters,
                chi_squared,
                quality,
            } => {
                assert!(chi_squared < 1e-6, "chi_squared = {}", chi_squared);
                assert_eq!(quality, FitQuality::Excellent);
                for (p, &expected) in parameters.iter().zip(truth.iter()) {
                    assert_relative_eq!(p.value, expected, max_relative = 0.01);
                }
                let names: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
                assert_eq!(names, ["Rs", "Rct", "Q", "n"]);
            }
            FitOutcome::NotFitted { reason } => panic!("fit failed: {}", reason),
        }
    }

    #[test]
    fn test_fit_respects_bounds() {
        let series = synthetic_series(Circuit::Randles, &[10.0, 200.0, 3e-5, 0.85]);
        let report = analyze_eis(&series, &EisSettings::default()).unwrap();
        if let Some(FitOutcome::Fitted { parameters, .. }) = report.fit {
            let by_name = |n: &str| parameters.iter().find(|p| p.name == n).unwrap().value;
            assert!(by_name("Rs") >= 0.0);
            assert!(by_name("Rct") >= 0.0);
            let n_exp = by_name("n");
            assert!((0.5..=1.0).contains(&n_exp));
        } else {
            panic!("expected a fitted outcome");
        }
    }

    #[test]
    fn test_randles_warburg_fit_on_synthetic_data() {
        let truth = [10.0, 150.0, 2e-5, 0.9, 40.0];
        let series = synthetic_series(Circuit::RandlesWarburg, &truth);
        let settings = EisSettings {
            circuit: "randles-w".to_string(),
            ..EisSettings::default()
        };
        let report = analyze_eis(&series, &settings).unwrap();
        match report.fit.expect("randles-w fit requested") {
            FitOutcome::Fitted {
                parameters,
                chi_squared,
                ..
            } => {
                assert_eq!(parameters.len(), 5);
                assert_eq!(parameters[4].name, "Aw");
                assert!(chi_squared < 1e-2, "chi_squared = {}", chi_squared);
                assert_relative_eq!(parameters[0].value, 10.0, max_relative = 0.05);
            }
            FitOutcome::NotFitted { reason } => panic!("fit failed: {}", reason),
        }
    }

    #[test]
    fn test_empty_band_is_an_error() {
        let series = EisSeries {
            frequency: vec![1.0, 10.0],
            z_real: vec![1.0, 2.0],
            z_imag: vec![-1.0, -2.0],
        };
        let settings = EisSettings {
            circuit: "randles".to_string(),
            freq_min: 100.0,
            freq_max: 1000.0,
        };
        assert_eq!(
            analyze_eis(&series, &settings),
            Err(EisError::EmptyAfterFiltering {
                freq_min: 100.0,
                freq_max: 1000.0
            })
        );

        let empty = EisSeries {
            frequency: vec![],
            z_real: vec![],
            z_imag: vec![],
        };
        assert_eq!(
            analyze_eis(&empty, &EisSettings::default()),
            Err(EisError::EmptySeries)
        );
    }

    #[test]
    fn test_fit_quality_ladder() {
        assert_eq!(fit_quality(5e-4), FitQuality::Excellent);
        assert_eq!(fit_quality(5e-3), FitQuality::Good);
        assert_eq!(fit_quality(5e-2), FitQuality::Fair);
    }
}
