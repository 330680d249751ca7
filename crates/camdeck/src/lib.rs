//! `camdeck` - Rate-limited remote control for a camera feed
//!
//! This library provides a camera session state machine, a per-caller
//! token-bucket rate governor, and a best-effort code analyzer, composed by
//! [`ControlFacade`] and served over HTTP by [`web`].

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod camera;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod governor;
pub mod logging;
pub mod web;

pub use camera::{CameraSession, CameraState, CommandResult};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use facade::{AnalysisOutcome, ControlFacade};
pub use governor::{CallerId, RateGovernor};
pub use logging::init_logging;
