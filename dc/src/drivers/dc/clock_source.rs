//! Pixel clock sources (PLLs and the external DP reference)

use super::status::{DcError, DcResult};
use super::types::{adjust_pix_clk_khz, ColorDepth, SignalType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClockSourceId {
    Pll0,
    Pll1,
    Pll2,
    /// DP reference from an external generator (no dividers)
    External,
}

impl ClockSourceId {
    pub fn from_pll_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ClockSourceId::Pll0),
            1 => Some(ClockSourceId::Pll1),
            2 => Some(ClockSourceId::Pll2),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PixelClockFlags: u32 {
        const DISPLAY_BLANKED = 1 << 0;
        const SUPPORT_YCBCR420 = 1 << 1;
    }
}

/// What the pipe asks of its clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelClockParams {
    pub requested_pix_clk_khz: u32,
    /// 1-based controller (timing generator) id
    pub controller_id: u32,
    pub signal_type: SignalType,
    pub requested_sym_clk_khz: u32,
    pub color_depth: ColorDepth,
    pub flags: PixelClockFlags,
}

/// Divider settings the sequencer programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PllSettings {
    /// Clock the stream actually needs
    pub actual_pix_clk_khz: u32,
    /// Clock after deep color / 4:2:0 adjustment
    pub adjusted_pix_clk_khz: u32,
    /// Clock the chosen dividers produce
    pub calculated_pix_clk_khz: u32,
    pub reference_freq_khz: u32,
    pub reference_divider: u32,
    /// Feedback divider in tenths (74.5 = 745)
    pub feedback_divider_x10: u32,
    pub pix_clk_post_divider: u32,
    pub use_external_clk: bool,
}

const VCO_MIN_KHZ: u64 = 600_000;
const VCO_MAX_KHZ: u64 = 1_200_000;
const MAX_REF_DIV: u64 = 10;
const MAX_POST_DIV: u64 = 127;
const MIN_FB_DIV_X10: u64 = 40;
const MAX_FB_DIV_X10: u64 = 10230;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSource {
    pub id: ClockSourceId,
    /// PLL reference, or the fixed output of the external source
    pub ref_freq_khz: u32,
}

impl ClockSource {
    pub fn new(id: ClockSourceId, ref_freq_khz: u32) -> Self {
        Self { id, ref_freq_khz }
    }

    pub fn is_external(&self) -> bool {
        self.id == ClockSourceId::External
    }

    /// Signals this source can clock.
    pub fn supports_signal(&self, signal: SignalType) -> bool {
        match self.id {
            ClockSourceId::External => signal.is_dp(),
            _ => signal != SignalType::None,
        }
    }

    /// Pick dividers for `params`.
    pub fn get_pix_clk_dividers(&self, params: &PixelClockParams) -> DcResult<PllSettings> {
        if params.requested_pix_clk_khz == 0 {
            return Err(DcError::ErrorUnexpected);
        }

        let adjusted = adjusted_pix_clk_khz(params);
        let mut settings = PllSettings {
            actual_pix_clk_khz: params.requested_pix_clk_khz,
            adjusted_pix_clk_khz: adjusted,
            reference_freq_khz: self.ref_freq_khz,
            ..PllSettings::default()
        };

        if self.is_external() {
            // DP pixel rate comes from the DTO, the source just passes it on
            settings.calculated_pix_clk_khz = adjusted;
            settings.use_external_clk = true;
            return Ok(settings);
        }

        let (ref_div, fb_x10, post_div, calculated) =
            search_dividers(self.ref_freq_khz as u64, adjusted as u64).ok_or(DcError::ErrorUnexpected)?;

        settings.reference_divider = ref_div;
        settings.feedback_divider_x10 = fb_x10;
        settings.pix_clk_post_divider = post_div;
        settings.calculated_pix_clk_khz = calculated;
        Ok(settings)
    }
}

fn adjusted_pix_clk_khz(params: &PixelClockParams) -> u32 {
    adjust_pix_clk_khz(
        params.requested_pix_clk_khz,
        params.color_depth,
        params.signal_type,
        params.flags.contains(PixelClockFlags::SUPPORT_YCBCR420),
    )
}

/// out = ref * (fb / 10) / (ref_div * post_div), VCO = ref * fb / ref_div.
///
/// Returns the closest (ref_div, fb_x10, post_div, out_khz); first exact hit
/// wins.
fn search_dividers(ref_khz: u64, target_khz: u64) -> Option<(u32, u32, u32, u32)> {
    if ref_khz == 0 || target_khz == 0 {
        return None;
    }

    let mut best: Option<(u64, u32, u32, u32, u32)> = None;

    for post_div in 1..=MAX_POST_DIV {
        let vco = target_khz * post_div;
        if vco < VCO_MIN_KHZ {
            continue;
        }
        if vco > VCO_MAX_KHZ {
            break;
        }

        for ref_div in 1..=MAX_REF_DIV {
            // Round to nearest tenth of the feedback divider
            let fb_x10 = (vco * ref_div * 10 + ref_khz / 2) / ref_khz;
            if !(MIN_FB_DIV_X10..=MAX_FB_DIV_X10).contains(&fb_x10) {
                continue;
            }

            let out = ref_khz * fb_x10 / (10 * ref_div * post_div);
            let err = out.abs_diff(target_khz);
            if best.map_or(true, |b| err < b.0) {
                best = Some((err, ref_div as u32, fb_x10 as u32, post_div as u32, out as u32));
                if err == 0 {
                    break;
                }
            }
        }

        if best.map_or(false, |b| b.0 == 0) {
            break;
        }
    }

    // More than 0.5% off means no usable setting
    let (err, ref_div, fb_x10, post_div, out) = best?;
    if err * 200 > target_khz {
        return None;
    }
    Some((ref_div, fb_x10, post_div, out))
}
