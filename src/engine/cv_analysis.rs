use crate::engine::series_parser::CvSeries;
use log::info;
use serde::Serialize;
use std::fmt;

/// Randles-Sevcik prefactor for a reversible couple at 25 C, A/(cm^2 * (V/s)^0.5 * mol/cm^3)
const RANDLES_SEVCIK_PREFACTOR: f64 = 2.69e5;
/// Assumed number of transferred electrons
const ELECTRON_COUNT: f64 = 1.0;
/// Assumed bulk concentration: 1 mM in mol/cm^3
const BULK_CONCENTRATION: f64 = 1e-6;

/// Error types for CV analysis
#[derive(Debug, Clone, PartialEq)]
pub enum CvError {
    EmptySeries,
    TooFewPointsForPeaks(usize),
}

impl fmt::Display for CvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CvError::EmptySeries => write!(f, "CV series is empty after parsing"),
            CvError::TooFewPointsForPeaks(n) => write!(
                f,
                "peak detection needs at least 2 points, series has {}",
                n
            ),
        }
    }
}

impl std::error::Error for CvError {}

/// Experiment parameters for one CV analysis call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvSettings {
    /// scan rate, mV/s
    pub scan_rate: f64,
    /// electrode area, cm^2
    pub electrode_area: f64,
    pub peak_detection: bool,
    pub calculate_diffusion: bool,
}

impl Default for CvSettings {
    fn default() -> Self {
        CvSettings {
            scan_rate: 50.0,
            electrode_area: 0.196,
            peak_detection: true,
            calculate_diffusion: true,
        }
    }
}

/// One extremum of a sub-sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    pub potential: f64,
    pub current: f64,
    pub current_mA: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakPair {
    pub anodic: Peak,
    pub cathodic: Peak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reversibility {
    Reversible,
    #[serde(rename = "Quasi-reversible")]
    QuasiReversible,
    Irreversible,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

/// Full result of one CV analysis. Optional fields are present only when the
/// corresponding computation was requested and possible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CvReport {
    pub data_points: usize,
    pub potential_range: ValueRange,
    pub scan_rate: f64,
    pub electrode_area: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peaks: Option<PeakPair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_separation_mV: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_wave_potential: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversibility: Option<Reversibility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diffusion_coefficient: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diffusion_coefficient_formatted: Option<String>,
}

/// First-occurrence argmax/argmin over a slice. Strict comparison keeps the
/// lowest index on ties.
fn arg_extremum(values: &[f64], maximize: bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            None => best = Some((i, v)),
            Some((_, b)) => {
                if (maximize && v > b) || (!maximize && v < b) {
                    best = Some((i, v));
                }
            }
        }
    }
    best.map(|(i, _)| i)
}

/// Detect the anodic and cathodic peaks of a single forward/reverse sweep.
///
/// The sweep is split at the floor of half its length: the forward sub-sweep
/// covers `[0, mid)`, the reverse sub-sweep `[mid, len)`. This assumes the
/// direction reversal sits exactly at the midpoint of the recorded points,
/// which holds for symmetric single-cycle exports only.
pub fn detect_cv_peaks(series: &CvSeries) -> Result<PeakPair, CvError> {
    let n = series.len();
    let mid = n / 2;
    if mid == 0 || mid == n {
        return Err(CvError::TooFewPointsForPeaks(n));
    }

    let anodic_idx = arg_extremum(&series.current[..mid], true)
        .ok_or(CvError::TooFewPointsForPeaks(n))?;
    let cathodic_rel = arg_extremum(&series.current[mid..], false)
        .ok_or(CvError::TooFewPointsForPeaks(n))?;
    let cathodic_idx = mid + cathodic_rel;

    let peak = |i: usize| Peak {
        potential: series.potential[i],
        current: series.current[i],
        current_mA: series.current[i] * 1000.0,
    };
    Ok(PeakPair {
        anodic: peak(anodic_idx),
        cathodic: peak(cathodic_idx),
    })
}

/// Reversibility ladder on current ratio and peak separation (mV).
pub fn classify_reversibility(current_ratio: f64, peak_separation_mV: f64) -> Reversibility {
    if current_ratio > 0.9 && current_ratio < 1.1 && peak_separation_mV < 70.0 {
        Reversibility::Reversible
    } else if current_ratio > 0.7 && peak_separation_mV < 200.0 {
        Reversibility::QuasiReversible
    } else {
        Reversibility::Irreversible
    }
}

/// Randles-Sevcik diffusion-coefficient estimate, cm^2/s, assuming a
/// one-electron process and 1 mM bulk concentration.
///
/// `ip = 2.69e5 * n^1.5 * A * D^0.5 * C * v^0.5`, solved for D.
pub fn diffusion_coefficient(peak_current: f64, scan_rate_mV: f64, electrode_area: f64) -> f64 {
    let v = scan_rate_mV / 1000.0; // V/s
    let denom = RANDLES_SEVCIK_PREFACTOR
        * ELECTRON_COUNT.powf(1.5)
        * electrode_area
        * BULK_CONCENTRATION
        * v.sqrt();
    (peak_current / denom).powi(2)
}

/// Analyze one CV sweep: point count and potential range always, peaks and
/// derived redox descriptors on request.
pub fn analyze_cv(series: &CvSeries, settings: &CvSettings) -> Result<CvReport, CvError> {
    if series.is_empty() {
        return Err(CvError::EmptySeries);
    }
    let min_pot = series.potential.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_pot = series
        .potential
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);

    let mut report = CvReport {
        data_points: series.len(),
        potential_range: ValueRange {
            min: min_pot,
            max: max_pot,
        },
        scan_rate: settings.scan_rate,
        electrode_area: settings.electrode_area,
        peaks: None,
        peak_separation_mV: None,
        half_wave_potential: None,
        current_ratio: None,
        reversibility: None,
        diffusion_coefficient: None,
        diffusion_coefficient_formatted: None,
    };

    if settings.peak_detection {
        let peaks = detect_cv_peaks(series)?;
        let delta_ep_mV = (peaks.anodic.potential - peaks.cathodic.potential).abs() * 1000.0;
        report.peak_separation_mV = Some(delta_ep_mV);
        report.half_wave_potential =
            Some((peaks.anodic.potential + peaks.cathodic.potential) / 2.0);
        // A cathodic current of exactly zero leaves ratio and reversibility
        // unset rather than infinite.
        if peaks.cathodic.current != 0.0 {
            let ratio = (peaks.anodic.current / peaks.cathodic.current).abs();
            report.current_ratio = Some(ratio);
            report.reversibility = Some(classify_reversibility(ratio, delta_ep_mV));
        }
        report.peaks = Some(peaks);
        info!(
            "CV peaks: anodic ({:.4} V, {:.3e} A), cathodic ({:.4} V, {:.3e} A), dEp = {:.1} mV",
            peaks.anodic.potential,
            peaks.anodic.current,
            peaks.cathodic.potential,
            peaks.cathodic.current,
            delta_ep_mV
        );
    }

    if settings.calculate_diffusion {
        if let Some(peaks) = &report.peaks {
            let ip = peaks.anodic.current.abs();
            let d = diffusion_coefficient(ip, settings.scan_rate, settings.electrode_area);
            report.diffusion_coefficient = Some(d);
            report.diffusion_coefficient_formatted = Some(format!("{:.2e} cm²/s", d));
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::series_parser::parse_cv_series;
    use approx::assert_relative_eq;

    const SAMPLE_CV: &str = "\
# Potential (V), Current (A)
-0.5, -0.0001
-0.3, -0.00005
-0.1, 0.0001
0.1, 0.0005
0.3, 0.002
0.5, 0.00234
0.7, 0.001
0.5, -0.001
0.3, -0.00221
0.1, -0.0005
-0.1, -0.0001
-0.3, -0.00002
-0.5, -0.0001
";

    #[test]
    fn test_peak_detection_on_sample_sweep() {
        // 13 points, midpoint index 6: forward = [0,6), reverse = [6,13).
        let series = parse_cv_series(SAMPLE_CV);
        assert_eq!(series.len(), 13);
        let peaks = detect_cv_peaks(&series).unwrap();
        assert_relative_eq!(peaks.anodic.potential, 0.5);
        assert_relative_eq!(peaks.anodic.current, 0.00234);
        assert_relative_eq!(peaks.anodic.current_mA, 2.34);
        assert_relative_eq!(peaks.cathodic.potential, 0.3);
        assert_relative_eq!(peaks.cathodic.current, -0.00221);
    }

    #[test]
    fn test_full_analysis_matches_reference_values() {
        let potential = vec![
            -0.5, -0.3, -0.1, 0.1, 0.3, 0.5, 0.7, 0.5, 0.3, 0.1, -0.1, -0.3, -0.5,
        ];
        let current = vec![
            -1e-4, -5e-5, 1e-4, 5e-4, 2e-3, 2.34e-3, 1e-3, -1e-3, -2.21e-3, -5e-4, -1e-4,
            -2e-5, -1e-4,
        ];
        let series = CvSeries { potential, current };
        let report = analyze_cv(&series, &CvSettings::default()).unwrap();

        assert_eq!(report.data_points, 13);
        assert_relative_eq!(report.potential_range.min, -0.5);
        assert_relative_eq!(report.potential_range.max, 0.7);

        // Anodic peak is the max of indices 0..6, cathodic the min of 6..13.
        let peaks = report.peaks.unwrap();
        assert_relative_eq!(peaks.anodic.potential, 0.5);
        assert_relative_eq!(peaks.anodic.current, 2.34e-3);
        assert_relative_eq!(peaks.cathodic.potential, 0.3);
        assert_relative_eq!(peaks.cathodic.current, -2.21e-3);

        assert_relative_eq!(report.peak_separation_mV.unwrap(), 200.0);
        assert_relative_eq!(report.half_wave_potential.unwrap(), 0.4);
        assert_relative_eq!(
            report.current_ratio.unwrap(),
            2.34e-3 / 2.21e-3,
            max_relative = 1e-12
        );
        assert_eq!(report.reversibility, Some(Reversibility::Irreversible));
        assert!(report.diffusion_coefficient.is_some());
        assert!(
            report
                .diffusion_coefficient_formatted
                .as_ref()
                .unwrap()
                .ends_with("cm²/s")
        );
    }

    #[test]
    fn test_anodic_peak_late_in_forward_sub_sweep() {
        // Forward sub-sweep carries its maximum at 0.7 V only when that point
        // falls inside [0, mid); with current 1e-3 there the reference values
        // are dEp = 400 mV, E1/2 = 0.5 V, ratio ~ 0.4525, irreversible.
        let potential = vec![
            -0.5, -0.3, -0.1, 0.7, 0.3, 0.5, 0.1, 0.5, 0.3, 0.1, -0.1, -0.3, -0.5,
        ];
        let current = vec![
            -1e-4, -5e-5, 1e-4, 1e-3, 2e-4, 5e-4, 1e-4, -1e-3, -2.21e-3, -5e-4, -1e-4, -2e-5,
            -1e-4,
        ];
        let series = CvSeries { potential, current };
        let report = analyze_cv(&series, &CvSettings::default()).unwrap();
        let peaks = report.peaks.unwrap();
        assert_relative_eq!(peaks.anodic.potential, 0.7);
        assert_relative_eq!(peaks.anodic.current, 1e-3);
        assert_relative_eq!(peaks.cathodic.potential, 0.3);
        assert_relative_eq!(peaks.cathodic.current, -2.21e-3);
        assert_relative_eq!(report.peak_separation_mV.unwrap(), 400.0);
        assert_relative_eq!(report.half_wave_potential.unwrap(), 0.5);
        assert_relative_eq!(
            report.current_ratio.unwrap(),
            0.45248868778280543,
            max_relative = 1e-12
        );
        assert_eq!(report.reversibility, Some(Reversibility::Irreversible));
    }

    #[test]
    fn test_tie_breaking_takes_first_occurrence() {
        let series = CvSeries {
            potential: vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5],
            current: vec![1.0, 2.0, 2.0, -2.0, -2.0, 0.0],
        };
        let peaks = detect_cv_peaks(&series).unwrap();
        assert_relative_eq!(peaks.anodic.potential, 0.1);
        assert_relative_eq!(peaks.cathodic.potential, 0.3);
    }

    #[test]
    fn test_reversibility_boundaries() {
        assert_eq!(
            classify_reversibility(1.0, 69.9),
            Reversibility::Reversible
        );
        // ratio still > 0.7, so 70.1 mV falls through to quasi-reversible
        assert_eq!(
            classify_reversibility(1.0, 70.1),
            Reversibility::QuasiReversible
        );
        assert_eq!(
            classify_reversibility(0.5, 50.0),
            Reversibility::Irreversible
        );
        assert_eq!(
            classify_reversibility(1.0, 250.0),
            Reversibility::Irreversible
        );
    }

    #[test]
    fn test_zero_cathodic_current_omits_ratio() {
        let series = CvSeries {
            potential: vec![0.0, 0.1, 0.2, 0.3],
            current: vec![1e-3, 2e-3, 0.0, 0.0],
        };
        let report = analyze_cv(&series, &CvSettings::default()).unwrap();
        assert!(report.peaks.is_some());
        assert!(report.current_ratio.is_none());
        assert!(report.reversibility.is_none());
        assert!(report.peak_separation_mV.is_some());
    }

    #[test]
    fn test_diffusion_coefficient_direct_substitution() {
        let ip = 1e-3;
        let area = 0.196;
        let scan_rate = 50.0;
        let v: f64 = 0.05;
        let expected = (ip / (2.69e5 * area * 1e-6 * v.sqrt())).powi(2);
        assert_relative_eq!(
            diffusion_coefficient(ip, scan_rate, area),
            expected,
            max_relative = 1e-14
        );
    }

    #[test]
    fn test_empty_and_degenerate_series_are_errors() {
        let empty = CvSeries {
            potential: vec![],
            current: vec![],
        };
        assert_eq!(
            analyze_cv(&empty, &CvSettings::default()),
            Err(CvError::EmptySeries)
        );

        let single = CvSeries {
            potential: vec![0.1],
            current: vec![1e-3],
        };
        assert_eq!(
            analyze_cv(&single, &CvSettings::default()),
            Err(CvError::TooFewPointsForPeaks(1))
        );
        // Without peak detection a single point is still analyzable.
        let settings = CvSettings {
            peak_detection: false,
            calculate_diffusion: false,
            ..CvSettings::default()
        };
        let report = analyze_cv(&single, &settings).unwrap();
        assert_eq!(report.data_points, 1);
        assert!(report.peaks.is_none());
    }
}
