use log::debug;

/// One CV sweep: index-aligned potential (V) and current (A) arrays in scan
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct CvSeries {
    pub potential: Vec<f64>,
    pub current: Vec<f64>,
}

impl CvSeries {
    pub fn len(&self) -> usize {
        self.potential.len()
    }
    pub fn is_empty(&self) -> bool {
        self.potential.is_empty()
    }
}

/// One EIS sweep: index-aligned frequency (Hz) and raw impedance components
/// (ohm). `z_imag` is the raw imaginary part, not its negation.
#[derive(Debug, Clone, PartialEq)]
pub struct EisSeries {
    pub frequency: Vec<f64>,
    pub z_real: Vec<f64>,
    pub z_imag: Vec<f64>,
}

impl EisSeries {
    pub fn len(&self) -> usize {
        self.frequency.len()
    }
    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }
}

/// Split one line into its first `n` comma-separated numeric fields.
/// Returns None for comment lines, blank lines and malformed rows; recovery
/// is local, the caller just moves on to the next line.
fn numeric_fields(line: &str, n: usize) -> Option<Vec<f64>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut fields = line.split(',');
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        let field = fields.next()?;
        match field.trim().parse::<f64>() {
            Ok(v) => values.push(v),
            Err(_) => return None,
        }
    }
    Some(values)
}

/// Parse a CV export: lines of `potential, current`, original order kept.
pub fn parse_cv_series(file_data: &str) -> CvSeries {
    let mut potential = Vec::new();
    let mut current = Vec::new();
    for line in file_data.lines() {
        if let Some(v) = numeric_fields(line, 2) {
            potential.push(v[0]);
            current.push(v[1]);
        }
    }
    debug!("parsed CV series: {} points", potential.len());
    CvSeries { potential, current }
}

/// Parse an EIS export: lines of `frequency, z_real, z_imag`.
pub fn parse_eis_series(file_data: &str) -> EisSeries {
    let mut frequency = Vec::new();
    let mut z_real = Vec::new();
    let mut z_imag = Vec::new();
    for line in file_data.lines() {
        if let Some(v) = numeric_fields(line, 3) {
            frequency.push(v[0]);
            z_real.push(v[1]);
            z_imag.push(v[2]);
        }
    }
    debug!("parsed EIS series: {} points", frequency.len());
    EisSeries {
        frequency,
        z_real,
        z_imag,
    }
}
