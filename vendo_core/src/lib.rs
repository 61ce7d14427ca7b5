#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core vending-dispenser logic (hardware-agnostic).
//!
//! Everything here is driven by a fixed-rate `Controller::tick`; no module
//! blocks, sleeps, or spins. Hardware goes through `vendo_traits::
//! DistanceSensor` and `vendo_traits::Actuator`, time through
//! `vendo_traits::Clock`, so the whole crate runs deterministically under a
//! manual clock in tests.
//!
//! - **pulse**: interrupt-safe coin/flow edge counters
//! - **coin**: burst grouping and signature classification
//! - **presence**: time-based container debouncing
//! - **session**: credit accounting and the dispense state machine
//! - **calibration**: non-blocking coin learning and flow calibration
//! - **protocol**: host command parsing and event wire format
//! - **controller**: the per-tick pipeline tying it all together

pub mod calibration;
pub mod coin;
pub mod controller;
pub mod error;
pub mod mocks;
pub mod presence;
pub mod protocol;
pub mod pulse;
pub mod session;
pub mod util;

pub use calibration::CalibrationService;
pub use coin::{CoinClassifier, CoinOutcome, CoinSignature, RejectReason};
pub use controller::{Controller, ControllerBuilder};
pub use error::{BuildError, Result, VendoError};
pub use presence::{PresenceDetector, PresenceEdge};
pub use protocol::{Command, Event, OperatingMode, StatusSnapshot, parse_command};
pub use pulse::{CoinPulseInput, FlowPulseInput, PulseCounter, PulseSnapshot};
pub use session::DispenseSession;
