use nalgebra::DVector;
use num_complex::Complex64;

/// Per-parameter metadata: display name, unit and the box constraint the
/// fitter enforces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub unit: &'static str,
    pub lower: f64,
    pub upper: f64,
}

const RANDLES_PARAMS: [ParameterSpec; 4] = [
    ParameterSpec {
        name: "Rs",
        unit: "Ω",
        lower: 0.0,
        upper: 1e6,
    },
    ParameterSpec {
        name: "Rct",
        unit: "Ω",
        lower: 0.0,
        upper: 1e6,
    },
    ParameterSpec {
        name: "Q",
        unit: "F·s^(n-1)",
        lower: 1e-10,
        upper: 1e-2,
    },
    ParameterSpec {
        name: "n",
        unit: "",
        lower: 0.5,
        upper: 1.0,
    },
];

const RANDLES_WARBURG_PARAMS: [ParameterSpec; 5] = [
    RANDLES_PARAMS[0],
    RANDLES_PARAMS[1],
    RANDLES_PARAMS[2],
    RANDLES_PARAMS[3],
    ParameterSpec {
        name: "Aw",
        unit: "Ω·s^-0.5",
        lower: 0.0,
        upper: 1e6,
    },
];

/// Constant-phase element, `Z = 1 / (Q (jw)^n)`.
pub fn cpe_impedance(omega: f64, q: f64, n: f64) -> Complex64 {
    let jw = Complex64::new(0.0, omega);
    Complex64::new(1.0, 0.0) / (q * jw.powf(n))
}

/// Semi-infinite Warburg diffusion element, `Z = (Aw / sqrt(w)) (1 - j)`.
pub fn warburg_impedance(omega: f64, aw: f64) -> Complex64 {
    (aw / omega.sqrt()) * Complex64::new(1.0, -1.0)
}

/// The two supported equivalent-circuit topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Circuit {
    /// `Rs + (CPE || Rct)`
    Randles,
    /// `Rs + (CPE || (Rct + W))`
    RandlesWarburg,
}

impl Circuit {
    /// Map the request's circuit selector. Anything else means "no fit".
    pub fn from_selector(selector: &str) -> Option<Circuit> {
        match selector {
            "randles" => Some(Circuit::Randles),
            "randles-w" => Some(Circuit::RandlesWarburg),
            _ => None,
        }
    }

    pub fn parameters(&self) -> &'static [ParameterSpec] {
        match self {
            Circuit::Randles => &RANDLES_PARAMS,
            Circuit::RandlesWarburg => &RANDLES_WARBURG_PARAMS,
        }
    }

    pub fn n_params(&self) -> usize {
        self.parameters().len()
    }

    /// Data-derived starting point for the fitter. `z_real` must be
    /// non-empty; the EIS analyzer rejects empty series before fitting.
    ///
    /// `Rs0 = min(z_real)`, `Rct0 = max(z_real) - Rs0` (halved when the
    /// Warburg branch takes part of the low-frequency rise), `Q0 = 1e-5`,
    /// `n0 = 0.8`, `Aw0 = 100`.
    pub fn initial_guess(&self, z_real: &[f64]) -> DVector<f64> {
        let rs0 = z_real.iter().cloned().fold(f64::INFINITY, f64::min);
        let z_max = z_real.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        match self {
            Circuit::Randles => DVector::from_vec(vec![rs0, z_max - rs0, 1e-5, 0.8]),
            Circuit::RandlesWarburg => {
                DVector::from_vec(vec![rs0, (z_max - rs0) / 2.0, 1e-5, 0.8, 100.0])
            }
        }
    }

    pub fn lower_bounds(&self) -> DVector<f64> {
        DVector::from_iterator(self.n_params(), self.parameters().iter().map(|p| p.lower))
    }

    pub fn upper_bounds(&self) -> DVector<f64> {
        DVector::from_iterator(self.n_params(), self.parameters().iter().map(|p| p.upper))
    }

    /// Complex impedance at angular frequency `omega` for the parameter
    /// vector laid out as in [`Circuit::parameters`].
    pub fn impedance(&self, omega: f64, p: &DVector<f64>) -> Complex64 {
        let one = Complex64::new(1.0, 0.0);
        match self {
            Circuit::Randles => {
                let (rs, rct, q, n) = (p[0], p[1], p[2], p[3]);
                let z_cpe = cpe_impedance(omega, q, n);
                let z_par = one / (one / rct + one / z_cpe);
                rs + z_par
            }
            Circuit::RandlesWarburg => {
                let (rs, rct, q, n, aw) = (p[0], p[1], p[2], p[3], p[4]);
                let z_w = warburg_impedance(omega, aw);
                let z_cpe = cpe_impedance(omega, q, n);
                let z_par = one / (one / (rct + z_w) + one / z_cpe);
                rs + z_par
            }
        }
    }
}
