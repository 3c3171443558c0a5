//! Display bandwidth and watermark calculation
//!
//! [`bw_calcs`] is a pure function of the engine IP caps, the clock tables
//! and the pipe contexts. It decides whether memory and display clocks can
//! keep every pipe fed and, if so, what watermarks the hardware needs.
//! Everything is in `BwFixed` MHz / microseconds.

use core::ops::{Add, Div, Mul, Sub};

use super::resource::{PipeCtx, MAX_PIPES};
use super::types::SurfacePixelFormat;

const FRAC_BITS: u32 = 24;

/// Signed fixed point, 24 fractional bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct BwFixed(i64);

impl BwFixed {
    pub const ZERO: BwFixed = BwFixed(0);
    pub const ONE: BwFixed = BwFixed(1 << FRAC_BITS);

    pub const fn from_int(v: i64) -> Self {
        BwFixed(v << FRAC_BITS)
    }

    /// `num / den`; zero when `den` is zero.
    pub fn frac(num: i64, den: i64) -> Self {
        if den == 0 {
            return BwFixed::ZERO;
        }
        BwFixed((((num as i128) << FRAC_BITS) / den as i128) as i64)
    }

    pub fn floor(self) -> i64 {
        self.0 >> FRAC_BITS
    }

    pub fn ceil(self) -> i64 {
        (self.0 + (1 << FRAC_BITS) - 1) >> FRAC_BITS
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for BwFixed {
    type Output = BwFixed;
    fn add(self, rhs: BwFixed) -> BwFixed {
        BwFixed(self.0.saturating_add(rhs.0))
    }
}

impl Sub for BwFixed {
    type Output = BwFixed;
    fn sub(self, rhs: BwFixed) -> BwFixed {
        BwFixed(self.0.saturating_sub(rhs.0))
    }
}

impl Mul for BwFixed {
    type Output = BwFixed;
    fn mul(self, rhs: BwFixed) -> BwFixed {
        BwFixed(((self.0 as i128 * rhs.0 as i128) >> FRAC_BITS) as i64)
    }
}

/// Division by zero saturates.
impl Div for BwFixed {
    type Output = BwFixed;
    fn div(self, rhs: BwFixed) -> BwFixed {
        if rhs.0 == 0 {
            return BwFixed(i64::MAX);
        }
        BwFixed((((self.0 as i128) << FRAC_BITS) / rhs.0 as i128) as i64)
    }
}

/// Display engine IP parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DceipCaps {
    /// Line buffer size in pixels per pipe
    pub line_buffer_pixels: u32,
    pub data_return_bus_width_bytes: u32,
    pub sclk_efficiency_pct: u32,
    pub dispclk_ramping_margin_pct: u32,
    pub min_sclk_deep_sleep: BwFixed,
    pub stutter_allowed: bool,
    /// CPU C/P-state changes may ride on display self-refresh
    pub self_refresh_allowed: bool,
}

impl DceipCaps {
    pub fn carrizo() -> Self {
        Self {
            line_buffer_pixels: 15360,
            data_return_bus_width_bytes: 32,
            sclk_efficiency_pct: 80,
            dispclk_ramping_margin_pct: 15,
            min_sclk_deep_sleep: BwFixed::from_int(8),
            stutter_allowed: true,
            self_refresh_allowed: true,
        }
    }
}

/// Clock levels and memory/latency parameters of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbiosCaps {
    pub low_sclk: BwFixed,
    pub mid_sclk: [BwFixed; 6],
    pub high_sclk: BwFixed,
    pub low_dispclk: BwFixed,
    pub mid_dispclk: BwFixed,
    pub high_dispclk: BwFixed,
    pub low_yclk: BwFixed,
    pub mid_yclk: BwFixed,
    pub high_yclk: BwFixed,
    pub dram_channel_width_bytes: u32,
    pub number_of_dram_channels: u32,
    pub dram_efficiency_pct: u32,
    pub urgent_latency_us: BwFixed,
    pub stutter_self_refresh_exit_latency_us: BwFixed,
    pub nbp_state_change_latency_us: BwFixed,
    pub blackout_duration_us: BwFixed,
}

impl VbiosCaps {
    pub fn carrizo() -> Self {
        Self {
            low_sclk: BwFixed::from_int(300),
            mid_sclk: [360, 423, 480, 544, 600, 626].map(BwFixed::from_int),
            high_sclk: BwFixed::from_int(626),
            low_dispclk: BwFixed::from_int(352),
            mid_dispclk: BwFixed::from_int(467),
            high_dispclk: BwFixed::from_int(643),
            low_yclk: BwFixed::from_int(800),
            mid_yclk: BwFixed::from_int(1066),
            high_yclk: BwFixed::from_int(1600),
            dram_channel_width_bytes: 8,
            number_of_dram_channels: 2,
            dram_efficiency_pct: 50,
            urgent_latency_us: BwFixed::from_int(4),
            stutter_self_refresh_exit_latency_us: BwFixed::from_int(12),
            nbp_state_change_latency_us: BwFixed::from_int(45),
            blackout_duration_us: BwFixed::from_int(18),
        }
    }

    fn sclk_levels(&self) -> [BwFixed; 8] {
        let m = self.mid_sclk;
        [self.low_sclk, m[0], m[1], m[2], m[3], m[4], m[5], self.high_sclk]
    }

    fn yclk_levels(&self) -> [BwFixed; 3] {
        [self.low_yclk, self.mid_yclk, self.high_yclk]
    }
}

/// Watermark pair: A for the high clock state, B for the low one (ns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WmMarks {
    pub a_mark: u32,
    pub b_mark: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BwResults {
    pub nbp_state_change_wm_ns: [WmMarks; MAX_PIPES],
    pub urgent_wm_ns: [WmMarks; MAX_PIPES],
    pub stutter_exit_wm_ns: [WmMarks; MAX_PIPES],
    pub stutter_mode_enable: bool,
    pub cpuc_state_change_enable: bool,
    pub cpup_state_change_enable: bool,
    pub nbp_state_change_enable: bool,
    pub all_displays_in_sync: bool,
    pub dispclk_khz: u32,
    pub required_sclk: u32,
    pub required_sclk_deep_sleep: u32,
    pub required_yclk: u32,
    pub blackout_recovery_time_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BwError {
    /// Display clock cannot keep up with pixel rate x scaling
    Dispclk,
    /// Engine clock cannot return the data
    Sclk,
    /// Memory cannot deliver the data
    Yclk,
    /// Line buffer drains before an urgent request returns
    Underflow,
}

/// What one pipe asks of memory and clocks.
#[derive(Debug, Clone, Copy)]
struct PipeLoad {
    pix_clk: BwFixed,
    h_total: u32,
    v_total: u32,
    src_width: u32,
    bytes_per_pixel: BwFixed,
    h_ratio: BwFixed,
    v_ratio: BwFixed,
}

impl PipeLoad {
    fn from_pipe(pipe: &PipeCtx) -> Option<Self> {
        let stream = pipe.stream.as_ref()?;
        let timing = &stream.timing;
        if timing.pix_clk_khz == 0 || timing.h_total == 0 {
            return None;
        }

        let format = pipe
            .surface
            .as_ref()
            .map_or(SurfacePixelFormat::GrphArgb8888, |s| s.format);

        let scl = &pipe.scl_data;
        let (src_w, src_h, dst_w, dst_h) = if scl.recout.width != 0 && scl.recout.height != 0 {
            (scl.viewport.width, scl.viewport.height, scl.recout.width, scl.recout.height)
        } else {
            (stream.src.width, stream.src.height, stream.dst.width, stream.dst.height)
        };

        Some(Self {
            pix_clk: BwFixed::frac(timing.pix_clk_khz as i64, 1000),
            h_total: timing.h_total,
            v_total: timing.v_total,
            src_width: src_w.max(1),
            bytes_per_pixel: BwFixed::frac(format.bits_per_pixel() as i64, 8),
            h_ratio: BwFixed::frac(src_w as i64, dst_w.max(1) as i64),
            v_ratio: BwFixed::frac(src_h as i64, dst_h.max(1) as i64),
        })
    }

    fn line_time_us(&self) -> BwFixed {
        BwFixed::from_int(self.h_total as i64) / self.pix_clk
    }

    /// Bytes per line fetched from memory.
    fn line_bytes(&self) -> BwFixed {
        BwFixed::from_int(self.src_width as i64) * self.bytes_per_pixel
    }

    /// MB/s
    fn data_rate(&self) -> BwFixed {
        self.line_bytes() * self.v_ratio / self.line_time_us()
    }

    fn lb_lines(&self, dceip: &DceipCaps) -> i64 {
        (dceip.line_buffer_pixels / self.src_width).max(2) as i64
    }
}

fn pct(v: u32) -> BwFixed {
    BwFixed::frac(v as i64, 100)
}

fn ns(us: BwFixed) -> u32 {
    (us * BwFixed::from_int(1000)).ceil().clamp(0, u32::MAX as i64) as u32
}

fn khz(mhz: BwFixed) -> u32 {
    (mhz * BwFixed::from_int(1000)).ceil().clamp(0, u32::MAX as i64) as u32
}

/// Lowest level that covers `needed`.
fn pick_level(levels: &[BwFixed], needed: BwFixed) -> Option<BwFixed> {
    levels.iter().copied().find(|l| *l >= needed)
}

pub fn bw_calcs(
    dceip: &DceipCaps,
    vbios: &VbiosCaps,
    pipes: &[PipeCtx],
    pipe_count: usize,
) -> Result<BwResults, BwError> {
    let mut results = BwResults::default();

    let mut loads: [Option<PipeLoad>; MAX_PIPES] = [None; MAX_PIPES];
    for pipe in pipes.iter().take(pipe_count.min(MAX_PIPES)) {
        if pipe.pipe_idx < MAX_PIPES {
            loads[pipe.pipe_idx] = PipeLoad::from_pipe(pipe);
        }
    }
    let active = || loads.iter().enumerate().filter_map(|(i, l)| l.map(|l| (i, l)));

    if active().next().is_none() {
        results.stutter_mode_enable = dceip.stutter_allowed;
        results.cpuc_state_change_enable = dceip.self_refresh_allowed;
        results.cpup_state_change_enable = dceip.self_refresh_allowed;
        results.nbp_state_change_enable = true;
        results.dispclk_khz = khz(vbios.low_dispclk);
        results.required_sclk = khz(vbios.low_sclk);
        results.required_sclk_deep_sleep = khz(dceip.min_sclk_deep_sleep);
        results.required_yclk = khz(vbios.low_yclk);
        return Ok(results);
    }

    // Display clock: pixel rate through the scaler plus ramping margin
    let ramp = BwFixed::ONE + pct(dceip.dispclk_ramping_margin_pct);
    let mut dispclk = BwFixed::ZERO;
    for (_, l) in active() {
        let need = l.pix_clk * l.h_ratio.max(BwFixed::ONE) * l.v_ratio.max(BwFixed::ONE) * ramp;
        dispclk = dispclk.max(need);
    }
    if dispclk > vbios.high_dispclk {
        return Err(BwError::Dispclk);
    }

    let total = active().fold(BwFixed::ZERO, |acc, (_, l)| acc + l.data_rate());

    let bus_width = BwFixed::from_int(dceip.data_return_bus_width_bytes as i64);
    let sclk_needed = total / (bus_width * pct(dceip.sclk_efficiency_pct));
    let sclk = pick_level(&vbios.sclk_levels(), sclk_needed).ok_or(BwError::Sclk)?;

    let dram_bytes = BwFixed::from_int(
        (vbios.dram_channel_width_bytes * vbios.number_of_dram_channels) as i64,
    );
    let yclk_needed = total / (dram_bytes * pct(vbios.dram_efficiency_pct));
    let yclk = pick_level(&vbios.yclk_levels(), yclk_needed).ok_or(BwError::Yclk)?;

    let mut stutter_ok = true;
    let mut nbp_ok = true;
    let mut worst_urgent = BwFixed::ZERO;

    for (idx, l) in active() {
        let fetch_high = l.line_bytes() / (vbios.high_sclk * bus_width);
        let fetch_low = l.line_bytes() / (vbios.low_sclk * bus_width);
        let urgent_a = vbios.urgent_latency_us + fetch_high;
        let urgent_b = vbios.urgent_latency_us + fetch_low;
        let stutter_a = vbios.stutter_self_refresh_exit_latency_us + urgent_a;
        let stutter_b = vbios.stutter_self_refresh_exit_latency_us + urgent_b;
        let nbp_a = vbios.nbp_state_change_latency_us + urgent_a;
        let nbp_b = vbios.nbp_state_change_latency_us + urgent_b;

        let buffer_us = l.line_time_us() * BwFixed::from_int(l.lb_lines(dceip));
        if urgent_b > buffer_us {
            return Err(BwError::Underflow);
        }
        stutter_ok &= stutter_b <= buffer_us;
        nbp_ok &= nbp_b <= buffer_us;
        worst_urgent = worst_urgent.max(urgent_b);

        results.urgent_wm_ns[idx] = WmMarks { a_mark: ns(urgent_a), b_mark: ns(urgent_b) };
        results.stutter_exit_wm_ns[idx] = WmMarks { a_mark: ns(stutter_a), b_mark: ns(stutter_b) };
        results.nbp_state_change_wm_ns[idx] = WmMarks { a_mark: ns(nbp_a), b_mark: ns(nbp_b) };
    }

    let first = active().next().map(|(_, l)| l);
    results.all_displays_in_sync = first.map_or(false, |f| {
        active().all(|(_, l)| l.h_total == f.h_total && l.v_total == f.v_total && l.pix_clk == f.pix_clk)
    });

    results.stutter_mode_enable = dceip.stutter_allowed && stutter_ok;
    results.cpuc_state_change_enable = dceip.self_refresh_allowed && results.stutter_mode_enable;
    results.cpup_state_change_enable = results.cpuc_state_change_enable;
    results.nbp_state_change_enable = nbp_ok;

    results.dispclk_khz = khz(dispclk);
    results.required_sclk = khz(sclk);
    results.required_sclk_deep_sleep = khz((total / bus_width).max(dceip.min_sclk_deep_sleep));
    results.required_yclk = khz(yclk);
    results.blackout_recovery_time_us = (vbios.blackout_duration_us + worst_urgent).ceil() as u32;

    Ok(results)
}
