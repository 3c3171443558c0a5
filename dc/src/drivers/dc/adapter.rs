//! Capability source
//!
//! The firmware tables are parsed elsewhere; the core only needs counts and
//! capability flags, which come through [`AdapterService`].

use super::config::{DcConfig, DcFeatures};

bitflags::bitflags! {
    /// Link encoder capabilities reported by firmware
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EncoderCaps: u32 {
        const HBR2 = 1 << 0;
        const HBR3 = 1 << 1;
        const TPS3 = 1 << 2;
        const TPS4 = 1 << 3;
        /// HDMI 12 bpc
        const HDMI_DEEP_COLOR = 1 << 4;
        const YCBCR420 = 1 << 5;
    }
}

/// The subset of the firmware info table the core uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    /// 0 when the board has no external DP reference clock
    pub external_clock_source_frequency_for_dp_khz: u32,
    pub pll_reference_frequency_khz: u32,
    pub default_display_engine_pll_frequency_khz: u32,
}

pub trait AdapterService {
    /// Controllers (timing generators) usable by the display core.
    fn func_controllers_num(&self) -> usize;

    /// PLLs reported by firmware, not counting the external DP source.
    fn pll_count(&self) -> usize;

    fn firmware_info(&self) -> FirmwareInfo;

    /// Bit i set when stream engine DIG(A+i) exists.
    fn stream_engine_mask(&self) -> u8;

    fn audio_endpoints_num(&self) -> usize;

    fn encoder_caps(&self) -> EncoderCaps;
}

/// Controllers the core may hand out under `config`.
pub fn controllers_num(adapter: &dyn AdapterService, config: &DcConfig) -> usize {
    let num = adapter.func_controllers_num();
    if config.features.contains(DcFeatures::LEGACY_CLIENT) {
        return num.min(2);
    }
    num
}

/// Clock sources including the external DP one, capped by `config`.
pub fn clock_sources_num(adapter: &dyn AdapterService, config: &DcConfig) -> usize {
    let mut num = adapter.pll_count();
    if adapter.firmware_info().external_clock_source_frequency_for_dp_khz != 0 {
        num += 1;
    }
    num.min(config.max_clock_source_num)
}

/// Table-backed capability source.
#[derive(Debug, Clone)]
pub struct StaticAdapterService {
    pub controllers: usize,
    pub plls: usize,
    pub firmware: FirmwareInfo,
    pub stream_engines: u8,
    pub audios: usize,
    pub caps: EncoderCaps,
}

impl StaticAdapterService {
    /// Carrizo-class APU: three controllers, DIGA-DIGF, two PLLs.
    pub fn carrizo() -> Self {
        Self {
            controllers: 3,
            plls: 2,
            firmware: FirmwareInfo {
                external_clock_source_frequency_for_dp_khz: 0,
                pll_reference_frequency_khz: 100000,
                default_display_engine_pll_frequency_khz: 600000,
            },
            stream_engines: 0b11_1111,
            audios: 3,
            caps: EncoderCaps::HBR2 | EncoderCaps::TPS3 | EncoderCaps::HDMI_DEEP_COLOR,
        }
    }

    pub fn with_controllers(mut self, controllers: usize) -> Self {
        self.controllers = controllers;
        self
    }

    pub fn with_external_dp_clock(mut self, khz: u32) -> Self {
        self.firmware.external_clock_source_frequency_for_dp_khz = khz;
        self
    }
}

impl AdapterService for StaticAdapterService {
    fn func_controllers_num(&self) -> usize {
        self.controllers
    }

    fn pll_count(&self) -> usize {
        self.plls
    }

    fn firmware_info(&self) -> FirmwareInfo {
        self.firmware
    }

    fn stream_engine_mask(&self) -> u8 {
        self.stream_engines
    }

    fn audio_endpoints_num(&self) -> usize {
        self.audios
    }

    fn encoder_caps(&self) -> EncoderCaps {
        self.caps
    }
}
