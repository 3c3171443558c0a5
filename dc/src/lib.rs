//! Stenzel display core (DC)
//!
//! Resource allocation, mode validation, bandwidth checks and DP MST payload
//! control for DCE display engines. Register programming stays behind the
//! hardware sequencer; this crate decides what gets bound to which pipe and
//! whether the result can be driven at all.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod serial;
pub mod util;

pub mod drivers;

pub use drivers::dc::{Dc, DcConfig, DcError, DcResult, ValidateContext, ValidationSet};
