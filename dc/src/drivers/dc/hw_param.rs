//! Per-pipe derived hardware parameters
//!
//! Pixel clock request, PLL dividers, FMT bit depth reduction, clamping and
//! scaler setup. All of it is computed during validation and stored on the
//! pipe context for the hardware sequencer.

use super::clock_source::{PixelClockFlags, PixelClockParams};
use super::config::DcConfig;
use super::resource::{PipeCtx, ResourcePool};
use super::status::{DcError, DcResult};
use super::types::{ColorDepth, PixelEncoding, Rect, SignalType, Stream};
use crate::drivers::displayport::link_rate;

bitflags::bitflags! {
    /// FMT block controls
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BitDepthFlags: u32 {
        const TRUNCATE_ENABLED = 1 << 0;
        const SPATIAL_DITHER_ENABLED = 1 << 1;
        const RGB_RANDOM = 1 << 2;
        const HIGHPASS_RANDOM = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitDepthReductionParams {
    pub flags: BitDepthFlags,
    /// 0: 18 bpp, 1: 24 bpp, 2: 30 bpp output
    pub spatial_dither_depth: u32,
    pub truncate_depth: u32,
}

impl BitDepthReductionParams {
    pub fn is_disabled(&self) -> bool {
        self.flags.is_empty() && self.spatial_dither_depth == 0 && self.truncate_depth == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClampingLevel {
    #[default]
    FullRange,
    LimitedRange8Bpc,
    LimitedRange10Bpc,
    LimitedRange12Bpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampingParams {
    pub clamping_level: ClampingLevel,
    pub c_depth: ColorDepth,
    pub pixel_encoding: PixelEncoding,
}

impl Default for ClampingParams {
    fn default() -> Self {
        Self {
            clamping_level: ClampingLevel::FullRange,
            c_depth: ColorDepth::Undefined,
            pixel_encoding: PixelEncoding::Undefined,
        }
    }
}

/// Scaler setup of one pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScalerData {
    /// Surface area fetched
    pub viewport: Rect,
    /// Where it lands in the timing's active area
    pub recout: Rect,
    /// src/dst x1000
    pub h_ratio_x1000: u32,
    pub v_ratio_x1000: u32,
    pub h_taps: u32,
    pub v_taps: u32,
}

/// What the pipe asks of its clock source.
pub fn get_pixel_clock_parameters(pipe_idx: usize, stream: &Stream) -> PixelClockParams {
    let mut flags = PixelClockFlags::DISPLAY_BLANKED;
    if stream.timing.pixel_encoding == PixelEncoding::YCbCr420 {
        flags |= PixelClockFlags::SUPPORT_YCBCR420;
    }

    PixelClockParams {
        requested_pix_clk_khz: stream.timing.pix_clk_khz,
        controller_id: pipe_idx as u32 + 1,
        signal_type: stream.signal,
        requested_sym_clk_khz: link_rate::RBR as u32 * link_rate::REF_FREQ_KHZ,
        color_depth: stream.timing.display_color_depth,
        flags,
    }
}

/// FMT settings for `stream`.
///
/// Diagnostics wants reproducible CRCs, so everything is off there, as it is
/// for signals whose dithering is switched off in `config`.
pub fn build_bit_depth_reduction_params(stream: &Stream, config: &DcConfig) -> BitDepthReductionParams {
    let mut params = BitDepthReductionParams::default();

    if config.is_diagnostics() || config.dithering_disabled(stream.signal) {
        return params;
    }

    let dither_depth = match stream.timing.display_color_depth {
        ColorDepth::Depth666 => Some(0),
        ColorDepth::Depth888 => Some(1),
        ColorDepth::Depth101010 => Some(2),
        // Deep enough for the 12-bit pipeline, only truncate
        _ => None,
    };
    if let Some(depth) = dither_depth {
        params.flags |= BitDepthFlags::SPATIAL_DITHER_ENABLED;
        params.spatial_dither_depth = depth;
    }

    params.flags |= BitDepthFlags::RGB_RANDOM | BitDepthFlags::HIGHPASS_RANDOM | BitDepthFlags::TRUNCATE_ENABLED;
    params.truncate_depth = 2;
    params
}

pub fn build_clamping_params(stream: &Stream) -> ClampingParams {
    let timing = &stream.timing;
    let mut clamping_level = ClampingLevel::FullRange;

    // YCbCr over HDMI is limited range
    if stream.signal == SignalType::HdmiTypeA && timing.pixel_encoding != PixelEncoding::Rgb {
        clamping_level = match timing.display_color_depth {
            ColorDepth::Depth101010 => ClampingLevel::LimitedRange10Bpc,
            ColorDepth::Depth121212 => ClampingLevel::LimitedRange12Bpc,
            _ => ClampingLevel::LimitedRange8Bpc,
        };
    }

    ClampingParams {
        clamping_level,
        c_depth: timing.display_color_depth,
        pixel_encoding: timing.pixel_encoding,
    }
}

/// Derive clock, FMT and clamping parameters for `pipe`.
pub fn build_pipe_hw_param(pipe: &mut PipeCtx, pool: &ResourcePool, config: &DcConfig) -> DcResult<()> {
    let stream = pipe.stream.clone().ok_or(DcError::ErrorUnexpected)?;
    let source = pipe
        .clock_source
        .and_then(|r| pool.clock_source(r))
        .ok_or(DcError::NoClockSourceResource)?;

    let params = get_pixel_clock_parameters(pipe.pipe_idx, &stream);
    pipe.pll_settings = source.get_pix_clk_dividers(&params)?;
    pipe.pix_clk_params = Some(params);
    pipe.bit_depth_params = build_bit_depth_reduction_params(&stream, config);
    pipe.clamping = build_clamping_params(&stream);
    Ok(())
}

fn scale(v: u32, num: u32, den: u32) -> u32 {
    if den == 0 {
        return 0;
    }
    (v as u64 * num as u64 / den as u64) as u32
}

/// Viewport/recout and ratios for `pipe`.
///
/// The surface's destination is in the stream's source space; the stream
/// maps that onto its destination. Downscaling beyond
/// `config.max_downscale_ratio` fails.
pub fn build_scaling_params(pipe: &mut PipeCtx, config: &DcConfig) -> DcResult<()> {
    let stream = pipe.stream.clone().ok_or(DcError::ErrorUnexpected)?;
    let (src, dst) = (stream.src, stream.dst);

    let (viewport, recout) = match pipe.surface.as_ref() {
        Some(surface) => {
            let d = surface.dst_rect;
            let recout = Rect::at(
                dst.x + scale(d.x.max(0) as u32, dst.width, src.width) as i32,
                dst.y + scale(d.y.max(0) as u32, dst.height, src.height) as i32,
                scale(d.width, dst.width, src.width),
                scale(d.height, dst.height, src.height),
            );
            (surface.src_rect, recout)
        }
        None => (src, dst),
    };

    if viewport.width == 0 || viewport.height == 0 || recout.width == 0 || recout.height == 0 {
        return Err(DcError::FailScaling);
    }

    let h_ratio = scale(viewport.width, 1000, recout.width);
    let v_ratio = scale(viewport.height, 1000, recout.height);
    let limit = config.max_downscale_ratio * 10;
    if h_ratio > limit || v_ratio > limit {
        return Err(DcError::FailScaling);
    }

    pipe.scl_data = ScalerData {
        viewport,
        recout,
        h_ratio_x1000: h_ratio,
        v_ratio_x1000: v_ratio,
        h_taps: if h_ratio == 1000 { 1 } else { 4 },
        v_taps: if v_ratio == 1000 { 1 } else { 4 },
    };
    Ok(())
}
