/// tolerant line-oriented parsing of delimited CV and EIS exports
pub mod series_parser;

/// cyclic-voltammetry peak detection and derived redox descriptors
pub mod cv_analysis;

/// complex impedance models for the two supported equivalent circuits
pub mod circuits;

/// bounded Levenberg-Marquardt least-squares core used for circuit fitting
pub mod bounded_lm;

/// EIS orchestration: frequency filtering, circuit fitting, Nyquist/Bode series
pub mod eis_analysis;
