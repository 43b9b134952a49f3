use crate::engine::cv_analysis::{CvError, CvReport, CvSettings, analyze_cv};
use crate::engine::eis_analysis::{EisError, EisReport, EisSettings, analyze_eis};
use crate::engine::series_parser::{parse_cv_series, parse_eis_series};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Top-level failure of one analysis call. Per-line parse skips and fit
/// non-convergence never reach this level.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Request body not parseable as the expected structure.
    Payload(String),
    /// A request field violates its declared constraint.
    Parameter(String),
    Cv(CvError),
    Eis(EisError),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AnalysisError::Payload(msg) => write!(f, "invalid request payload: {}", msg),
            AnalysisError::Parameter(msg) => write!(f, "invalid parameter: {}", msg),
            AnalysisError::Cv(e) => write!(f, "{}", e),
            AnalysisError::Eis(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AnalysisError {}

impl From<CvError> for AnalysisError {
    fn from(e: CvError) -> Self {
        AnalysisError::Cv(e)
    }
}

impl From<EisError> for AnalysisError {
    fn from(e: EisError) -> Self {
        AnalysisError::Eis(e)
    }
}

fn default_scan_rate() -> f64 {
    50.0
}
fn default_electrode_area() -> f64 {
    0.196
}
fn default_true() -> bool {
    true
}
fn default_circuit() -> String {
    "randles".to_string()
}
fn default_freq_min() -> f64 {
    0.01
}
fn default_freq_max() -> f64 {
    100000.0
}

/// CV request record; every optional field carries its declared default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CvRequest {
    pub file_data: String,
    /// mV/s, must be > 0
    #[serde(default = "default_scan_rate")]
    pub scan_rate: f64,
    /// cm^2, must be > 0
    #[serde(default = "default_electrode_area")]
    pub electrode_area: f64,
    #[serde(default = "default_true")]
    pub peak_detection: bool,
    #[serde(default = "default_true")]
    pub calculate_diffusion: bool,
}

impl CvRequest {
    /// Validate once at the boundary and hand the engine a settled record.
    pub fn validate(&self) -> Result<CvSettings, AnalysisError> {
        if !(self.scan_rate.is_finite() && self.scan_rate > 0.0) {
            return Err(AnalysisError::Parameter(format!(
                "scan_rate must be a positive number, got {}",
                self.scan_rate
            )));
        }
        if !(self.electrode_area.is_finite() && self.electrode_area > 0.0) {
            return Err(AnalysisError::Parameter(format!(
                "electrode_area must be a positive number, got {}",
                self.electrode_area
            )));
        }
        Ok(CvSettings {
            scan_rate: self.scan_rate,
            electrode_area: self.electrode_area,
            peak_detection: self.peak_detection,
            calculate_diffusion: self.calculate_diffusion,
        })
    }
}

/// EIS request record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EisRequest {
    pub file_data: String,
    #[serde(default = "default_circuit")]
    pub circuit: String,
    /// Hz, inclusive lower edge of the retained band
    #[serde(default = "default_freq_min")]
    pub freq_min: f64,
    /// Hz, inclusive upper edge
    #[serde(default = "default_freq_max")]
    pub freq_max: f64,
}

impl EisRequest {
    pub fn validate(&self) -> Result<EisSettings, AnalysisError> {
        if !self.freq_min.is_finite() || !self.freq_max.is_finite() {
            return Err(AnalysisError::Parameter(
                "freq_min and freq_max must be finite numbers".to_string(),
            ));
        }
        if self.freq_min > self.freq_max {
            return Err(AnalysisError::Parameter(format!(
                "freq_min ({}) exceeds freq_max ({})",
                self.freq_min, self.freq_max
            )));
        }
        Ok(EisSettings {
            circuit: self.circuit.clone(),
            freq_min: self.freq_min,
            freq_max: self.freq_max,
        })
    }
}

/// Outcome of one analysis call, propagated by value. [`AnalysisOutcome::to_json`]
/// produces the transport envelope, [`AnalysisOutcome::status_code`] the
/// HTTP-like status the hosting collaborator should attach.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome<T> {
    Success(T),
    Failure(String),
}

impl<T: Serialize> AnalysisOutcome<T> {
    pub fn status_code(&self) -> u16 {
        match self {
            AnalysisOutcome::Success(_) => 200,
            AnalysisOutcome::Failure(_) => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisOutcome::Success(_))
    }

    /// `{"success": true, "results": ...}` or `{"success": false, "error": ...}`.
    pub fn to_json(&self) -> Value {
        match self {
            AnalysisOutcome::Success(results) => json!({
                "success": true,
                "results": results,
            }),
            AnalysisOutcome::Failure(message) => json!({
                "success": false,
                "error": message,
            }),
        }
    }
}

/// Run a validated CV request end to end.
pub fn run_cv(request: &CvRequest) -> Result<CvReport, AnalysisError> {
    let settings = request.validate()?;
    let series = parse_cv_series(&request.file_data);
    info!(
        "CV analysis: {} points, scan_rate = {} mV/s",
        series.len(),
        settings.scan_rate
    );
    Ok(analyze_cv(&series, &settings)?)
}

/// Run a validated EIS request end to end.
pub fn run_eis(request: &EisRequest) -> Result<EisReport, AnalysisError> {
    let settings = request.validate()?;
    let series = parse_eis_series(&request.file_data);
    info!(
        "EIS analysis: {} points, circuit = {}, band = [{}, {}] Hz",
        series.len(),
        settings.circuit,
        settings.freq_min,
        settings.freq_max
    );
    Ok(analyze_eis(&series, &settings)?)
}

fn outcome_of<T>(result: Result<T, AnalysisError>) -> AnalysisOutcome<T> {
    match result {
        Ok(report) => AnalysisOutcome::Success(report),
        Err(e) => {
            error!("analysis failed: {}", e);
            AnalysisOutcome::Failure(e.to_string())
        }
    }
}

/// Entry point for a raw CV request body (JSON).
pub fn analyze_cv_payload(body: &str) -> AnalysisOutcome<CvReport> {
    match serde_json::from_str::<CvRequest>(body) {
        Ok(request) => outcome_of(run_cv(&request)),
        Err(e) => outcome_of(Err(AnalysisError::Payload(e.to_string()))),
    }
}

/// Entry point for a raw EIS request body (JSON).
pub fn analyze_eis_payload(body: &str) -> AnalysisOutcome<EisReport> {
    match serde_json::from_str::<EisRequest>(body) {
        Ok(request) => outcome_of(run_eis(&request)),
        Err(e) => outcome_of(Err(AnalysisError::Payload(e.to_string()))),
    }
}
