// Copyright (c) voltaic contributors
//MIT License
#![allow(non_snake_case)]
//! Electrochemical signal analysis engine.
//!
//! Two laboratory export kinds are supported:
//! - cyclic voltammetry (CV): potential/current sweeps, analyzed for anodic
//!   and cathodic peaks, peak separation, half-wave potential, reversibility
//!   and a Randles-Sevcik diffusion-coefficient estimate;
//! - electrochemical impedance spectroscopy (EIS): frequency/impedance
//!   sweeps, fitted to Randles or Randles+Warburg equivalent circuits with a
//!   bounded Levenberg-Marquardt least-squares solver.
//!
//! The [`api`] module is the boundary: typed request records with declared
//! defaults in, a success/failure envelope out. Everything numeric lives in
//! [`engine`].

pub mod api;
pub mod engine;
pub mod utils;
