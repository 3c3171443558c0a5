//! Display core configuration
//!
//! Built once by the integrator and handed to [`Dc::construct`](super::Dc::construct)
//! by reference. Nothing in here changes after construction.

use super::types::SignalType;

/// Runtime environment of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DceEnvironment {
    Production,
    /// Deterministic output for CRC capture: no dithering, no randomization
    Diagnostics,
}

/// Display engine generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DceVersion {
    Dce100,
    Dce110,
    Dce112,
}

impl DceVersion {
    /// Generations with a dedicated video (underlay) pipe.
    pub fn has_underlay(&self) -> bool {
        matches!(self, DceVersion::Dce110)
    }
}

bitflags::bitflags! {
    /// Feature switches (what used to be the adapter feature table)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DcFeatures: u32 {
        /// Never share a PLL between synchronizable streams
        const DISABLE_CLOCK_SHARING     = 1 << 0;
        const TMDS_DISABLE_DITHERING    = 1 << 1;
        const HDMI_DISABLE_DITHERING    = 1 << 2;
        const DP_DISABLE_DITHERING      = 1 << 3;
        const EMBEDDED_DISABLE_DITHERING = 1 << 4;
        const ALLOW_SELF_REFRESH        = 1 << 5;
        const ALLOW_STUTTER             = 1 << 6;
        /// Old userspace that only knows about two controllers
        const LEGACY_CLIENT             = 1 << 7;
    }
}

impl Default for DcFeatures {
    fn default() -> Self {
        DcFeatures::EMBEDDED_DISABLE_DITHERING | DcFeatures::ALLOW_SELF_REFRESH | DcFeatures::ALLOW_STUTTER
    }
}

#[derive(Debug, Clone)]
pub struct DcConfig {
    pub environment: DceEnvironment,
    pub dce_version: DceVersion,
    pub features: DcFeatures,
    /// Upper bound of targets `validate_guaranteed` replicates to
    pub max_targets: usize,
    /// Clock sources the integrator allows us to use (PLLs + external)
    pub max_clock_source_num: usize,
    /// Virtual links (wireless/virtual sinks) that need a stream encoder
    pub num_virtual_links: usize,
    /// Max downscale, percent of destination (150 = 1.5:1)
    pub max_downscale_ratio: u32,
}

impl Default for DcConfig {
    fn default() -> Self {
        Self {
            environment: DceEnvironment::Production,
            dce_version: DceVersion::Dce110,
            features: DcFeatures::default(),
            max_targets: 3,
            max_clock_source_num: 4,
            num_virtual_links: 0,
            max_downscale_ratio: 150,
        }
    }
}

impl DcConfig {
    pub fn is_diagnostics(&self) -> bool {
        self.environment == DceEnvironment::Diagnostics
    }

    /// Dithering switched off for this signal by feature flag.
    pub fn dithering_disabled(&self, signal: SignalType) -> bool {
        let flag = match signal {
            SignalType::DviSingleLink | SignalType::DviDualLink => DcFeatures::TMDS_DISABLE_DITHERING,
            SignalType::HdmiTypeA => DcFeatures::HDMI_DISABLE_DITHERING,
            SignalType::DisplayPort | SignalType::DisplayPortMst => DcFeatures::DP_DISABLE_DITHERING,
            SignalType::Edp => DcFeatures::EMBEDDED_DISABLE_DITHERING,
            _ => return false,
        };
        self.features.contains(flag)
    }
}
