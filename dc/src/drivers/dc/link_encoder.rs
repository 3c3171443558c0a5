//! Link encoders
//!
//! One implementation per DCE generation behind [`LinkEncoder`], picked by
//! [`create_link_encoder`] from the configured version.

use alloc::boxed::Box;
use core::fmt;

use super::adapter::EncoderCaps;
use super::config::DceVersion;
use super::mst::StreamAllocationTable;
use super::stream_encoder::EngineId;
use super::types::{ColorDepth, CrtcTiming, PixelEncoding, SignalType, Stream};

pub const TMDS_MIN_PIXEL_CLOCK_KHZ: u32 = 25000;
pub const TMDS_MAX_PIXEL_CLOCK_KHZ: u32 = 165000;
pub const MAX_ENCODER_CLK_KHZ: u32 = 600000;
/// Analog DAC
const RGB_MAX_PIXEL_CLOCK_KHZ: u32 = 400000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderFeatures {
    pub max_deep_color: ColorDepth,
    pub max_hdmi_deep_color: ColorDepth,
    pub max_hdmi_pixel_clock_khz: u32,
    pub max_pixel_clock_khz: u32,
    pub flags: EncoderCaps,
}

impl EncoderFeatures {
    fn for_version(version: DceVersion, caps: EncoderCaps) -> Self {
        let max_hdmi_deep_color = if caps.contains(EncoderCaps::HDMI_DEEP_COLOR) {
            ColorDepth::Depth121212
        } else {
            ColorDepth::Depth888
        };

        match version {
            DceVersion::Dce100 => Self {
                max_deep_color: ColorDepth::Depth121212,
                max_hdmi_deep_color,
                max_hdmi_pixel_clock_khz: 297000,
                max_pixel_clock_khz: RGB_MAX_PIXEL_CLOCK_KHZ,
                flags: caps - (EncoderCaps::HBR3 | EncoderCaps::TPS4 | EncoderCaps::YCBCR420),
            },
            DceVersion::Dce110 => Self {
                max_deep_color: ColorDepth::Depth121212,
                max_hdmi_deep_color,
                max_hdmi_pixel_clock_khz: 297000,
                max_pixel_clock_khz: MAX_ENCODER_CLK_KHZ,
                flags: caps - (EncoderCaps::HBR3 | EncoderCaps::TPS4 | EncoderCaps::YCBCR420),
            },
            DceVersion::Dce112 => Self {
                max_deep_color: ColorDepth::Depth121212,
                max_hdmi_deep_color,
                max_hdmi_pixel_clock_khz: MAX_ENCODER_CLK_KHZ,
                max_pixel_clock_khz: MAX_ENCODER_CLK_KHZ,
                flags: caps | EncoderCaps::HBR2 | EncoderCaps::HBR3 | EncoderCaps::TPS3 | EncoderCaps::TPS4,
            },
        }
    }

    pub fn ycbcr420_supported(&self) -> bool {
        self.flags.contains(EncoderCaps::YCBCR420)
    }
}

pub trait LinkEncoder: Send + fmt::Debug {
    fn features(&self) -> &EncoderFeatures;

    /// Stream engine wired to this encoder's DIG.
    fn preferred_engine(&self) -> EngineId;

    /// Can this encoder output `stream` on its signal?
    fn validate_output_with_stream(&self, stream: &Stream) -> bool;

    /// Program the MST time slot allocation (DP_MSE_SAT).
    fn update_mst_stream_allocation_table(&mut self, table: &StreamAllocationTable);

    /// Last table programmed.
    fn mst_stream_allocation_table(&self) -> &StreamAllocationTable;
}

pub fn create_link_encoder(version: DceVersion, caps: EncoderCaps, engine: EngineId) -> Box<dyn LinkEncoder> {
    let state = EncoderState {
        features: EncoderFeatures::for_version(version, caps),
        preferred_engine: engine,
        mst_table: StreamAllocationTable::default(),
    };
    match version {
        DceVersion::Dce100 => Box::new(Dce100LinkEncoder { state }),
        DceVersion::Dce110 => Box::new(Dce110LinkEncoder { state }),
        DceVersion::Dce112 => Box::new(Dce112LinkEncoder { state }),
    }
}

#[derive(Debug)]
struct EncoderState {
    features: EncoderFeatures,
    preferred_engine: EngineId,
    mst_table: StreamAllocationTable,
}

fn validate_dvi_output(signal: SignalType, timing: &CrtcTiming) -> bool {
    let mut max_pixel_clock = TMDS_MAX_PIXEL_CLOCK_KHZ;
    if signal == SignalType::DviDualLink {
        max_pixel_clock *= 2;
    }

    if timing.pix_clk_khz < TMDS_MIN_PIXEL_CLOCK_KHZ || timing.pix_clk_khz > max_pixel_clock {
        return false;
    }
    if timing.pixel_encoding != PixelEncoding::Rgb {
        return false;
    }

    match timing.display_color_depth {
        ColorDepth::Depth666 | ColorDepth::Depth888 => true,
        // Deep color needs the second link
        ColorDepth::Depth101010 | ColorDepth::Depth161616 => signal == SignalType::DviDualLink,
        _ => false,
    }
}

fn validate_hdmi_output(features: &EncoderFeatures, max_deep_color: ColorDepth, timing: &CrtcTiming) -> bool {
    if timing.display_color_depth > max_deep_color {
        return false;
    }
    if timing.pixel_encoding == PixelEncoding::YCbCr420 && !features.ycbcr420_supported() {
        return false;
    }

    let phy_clk = timing.phy_pix_clk_khz(SignalType::HdmiTypeA);
    phy_clk >= TMDS_MIN_PIXEL_CLOCK_KHZ
        && phy_clk <= features.max_hdmi_pixel_clock_khz
        && phy_clk <= features.max_pixel_clock_khz
}

fn validate_rgb_output(features: &EncoderFeatures, timing: &CrtcTiming) -> bool {
    timing.pix_clk_khz <= features.max_pixel_clock_khz.min(RGB_MAX_PIXEL_CLOCK_KHZ)
        && timing.pixel_encoding == PixelEncoding::Rgb
}

fn validate_dp_output(features: &EncoderFeatures, timing: &CrtcTiming) -> bool {
    if timing.pixel_encoding == PixelEncoding::YCbCr420 {
        return false;
    }
    timing.display_color_depth <= features.max_deep_color
}

fn validate_wireless_output(features: &EncoderFeatures, timing: &CrtcTiming) -> bool {
    if timing.pix_clk_khz > features.max_pixel_clock_khz {
        return false;
    }
    // Wireless display only takes 4:4:4
    timing.pixel_encoding == PixelEncoding::YCbCr444
}

fn validate_output(features: &EncoderFeatures, hdmi_max_deep_color: ColorDepth, stream: &Stream) -> bool {
    let timing = &stream.timing;
    match stream.signal {
        SignalType::DviSingleLink | SignalType::DviDualLink => validate_dvi_output(stream.signal, timing),
        SignalType::HdmiTypeA => validate_hdmi_output(features, hdmi_max_deep_color, timing),
        SignalType::Rgb => validate_rgb_output(features, timing),
        SignalType::DisplayPort | SignalType::DisplayPortMst | SignalType::Edp => {
            validate_dp_output(features, timing)
        }
        SignalType::Wireless => validate_wireless_output(features, timing),
        SignalType::Virtual | SignalType::None => true,
    }
}

macro_rules! encoder_common {
    () => {
        fn features(&self) -> &EncoderFeatures {
            &self.state.features
        }

        fn preferred_engine(&self) -> EngineId {
            self.state.preferred_engine
        }

        fn update_mst_stream_allocation_table(&mut self, table: &StreamAllocationTable) {
            self.state.mst_table = table.clone();
        }

        fn mst_stream_allocation_table(&self) -> &StreamAllocationTable {
            &self.state.mst_table
        }
    };
}

/// DCE 10: no dual-link DVI on the DIG, no 4:2:0
#[derive(Debug)]
pub struct Dce100LinkEncoder {
    state: EncoderState,
}

impl LinkEncoder for Dce100LinkEncoder {
    encoder_common!();

    fn validate_output_with_stream(&self, stream: &Stream) -> bool {
        if stream.signal == SignalType::DviDualLink {
            return false;
        }
        let f = &self.state.features;
        validate_output(f, f.max_hdmi_deep_color, stream)
    }
}

#[derive(Debug)]
pub struct Dce110LinkEncoder {
    state: EncoderState,
}

impl LinkEncoder for Dce110LinkEncoder {
    encoder_common!();

    fn validate_output_with_stream(&self, stream: &Stream) -> bool {
        let f = &self.state.features;
        validate_output(f, f.max_hdmi_deep_color, stream)
    }
}

/// DCE 11.2: HBR3/TPS4, 600 MHz TMDS
#[derive(Debug)]
pub struct Dce112LinkEncoder {
    state: EncoderState,
}

impl LinkEncoder for Dce112LinkEncoder {
    encoder_common!();

    fn validate_output_with_stream(&self, stream: &Stream) -> bool {
        let f = &self.state.features;
        // HDMI is bounded by both the HDMI and the general deep color cap
        validate_output(f, f.max_hdmi_deep_color.min(f.max_deep_color), stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::dc::types::Sink;
    use alloc::sync::Arc;

    fn stream(signal: SignalType, timing: CrtcTiming) -> Arc<Stream> {
        Stream::new(Sink::new(0, signal), timing)
    }

    fn encoder(version: DceVersion) -> Box<dyn LinkEncoder> {
        create_link_encoder(version, EncoderCaps::HBR2 | EncoderCaps::HDMI_DEEP_COLOR, EngineId::DigA)
    }

    #[test]
    fn test_dvi_limits() {
        let enc = encoder(DceVersion::Dce110);
        let t1080 = CrtcTiming::new(1920, 1080, 60);
        assert!(enc.validate_output_with_stream(&stream(SignalType::DviSingleLink, t1080)));

        let t1440 = CrtcTiming::new(2560, 1440, 60);
        assert!(!enc.validate_output_with_stream(&stream(SignalType::DviSingleLink, t1440)));
        assert!(enc.validate_output_with_stream(&stream(SignalType::DviDualLink, t1440)));

        let deep = t1080.with_color_depth(ColorDepth::Depth101010);
        assert!(!enc.validate_output_with_stream(&stream(SignalType::DviSingleLink, deep)));

        let mut slow = t1080;
        slow.pix_clk_khz = 20000;
        assert!(!enc.validate_output_with_stream(&stream(SignalType::DviSingleLink, slow)));
    }

    #[test]
    fn test_hdmi_deep_color() {
        let t = CrtcTiming::new(1920, 1080, 60).with_color_depth(ColorDepth::Depth121212);
        assert!(encoder(DceVersion::Dce110).validate_output_with_stream(&stream(SignalType::HdmiTypeA, t)));

        let no_deep = create_link_encoder(DceVersion::Dce110, EncoderCaps::HBR2, EngineId::DigA);
        assert!(!no_deep.validate_output_with_stream(&stream(SignalType::HdmiTypeA, t)));

        let t16 = t.with_color_depth(ColorDepth::Depth161616);
        assert!(!encoder(DceVersion::Dce112).validate_output_with_stream(&stream(SignalType::HdmiTypeA, t16)));
    }

    #[test]
    fn test_hdmi_clock_by_generation() {
        // 4k60 RGB runs TMDS well above 297 MHz
        let t = CrtcTiming::new(3840, 2160, 60);
        assert!(!encoder(DceVersion::Dce110).validate_output_with_stream(&stream(SignalType::HdmiTypeA, t)));
        assert!(encoder(DceVersion::Dce112).validate_output_with_stream(&stream(SignalType::HdmiTypeA, t)));
    }

    #[test]
    fn test_dp_rejects_420() {
        let enc = encoder(DceVersion::Dce112);
        let t = CrtcTiming::new(1920, 1080, 60);
        assert!(enc.validate_output_with_stream(&stream(SignalType::DisplayPort, t)));
        let t420 = t.with_pixel_encoding(PixelEncoding::YCbCr420);
        assert!(!enc.validate_output_with_stream(&stream(SignalType::DisplayPortMst, t420)));
    }

    #[test]
    fn test_dce112_features() {
        let enc = encoder(DceVersion::Dce112);
        assert!(enc.features().flags.contains(EncoderCaps::HBR3 | EncoderCaps::TPS4));
        let enc = encoder(DceVersion::Dce110);
        assert!(!enc.features().flags.contains(EncoderCaps::HBR3));
    }

    #[test]
    fn test_wireless_needs_444() {
        let enc = encoder(DceVersion::Dce110);
        let t = CrtcTiming::new(1920, 1080, 60);
        assert!(!enc.validate_output_with_stream(&stream(SignalType::Wireless, t)));
        let t = t.with_pixel_encoding(PixelEncoding::YCbCr444);
        assert!(enc.validate_output_with_stream(&stream(SignalType::Wireless, t)));
    }
}
