//! Display drivers
//!
//! - `displayport`: DPCD map, link rates and the AUX transport seam
//! - `dc`: display core (resource pool, validation, bandwidth, MST payloads)

pub mod dc;
pub mod displayport;
