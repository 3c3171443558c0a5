//! Clock level tables from the power-management firmware

use alloc::vec::Vec;

use super::bandwidth::{BwFixed, VbiosCaps};
use crate::kprintln;

/// DDR: two transfers per memory clock
pub const MEMORY_TYPE_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockType {
    Sclk,       // Engine clock
    Dispclk,    // Display clock
    Mclk,       // Memory clock
}

/// Discrete DPM levels, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockLevels {
    pub clocks_in_khz: Vec<u32>,
}

impl ClockLevels {
    pub fn new(clocks_in_khz: Vec<u32>) -> Self {
        Self { clocks_in_khz }
    }

    fn num_levels(&self) -> usize {
        self.clocks_in_khz.len()
    }

    fn level_mhz(&self, i: usize, multiplier: u32) -> BwFixed {
        let khz = self.clocks_in_khz[i.min(self.num_levels() - 1)] as i64 * multiplier as i64;
        BwFixed::frac(khz, 1000)
    }
}

pub trait PowerPlayClocks {
    fn get_clock_levels(&self, clk_type: ClockType) -> Option<ClockLevels>;
}

/// Refresh the clock levels of `vbios` from the platform tables.
///
/// A missing or empty table leaves that clock's defaults alone.
pub fn update_from_pplib(pplib: &dyn PowerPlayClocks, vbios: &mut VbiosCaps) {
    match pplib.get_clock_levels(ClockType::Sclk) {
        Some(clks) if clks.num_levels() > 0 => {
            let n = clks.num_levels();
            vbios.high_sclk = clks.level_mhz(n - 1, 1);
            for (k, mid) in vbios.mid_sclk.iter_mut().enumerate() {
                *mid = clks.level_mhz((k + 1) * n / 8, 1);
            }
            vbios.low_sclk = clks.level_mhz(0, 1);
        }
        _ => kprintln!("dc_bw: no sclk levels from pplib, using defaults"),
    }

    match pplib.get_clock_levels(ClockType::Dispclk) {
        Some(clks) if clks.num_levels() > 0 => {
            let n = clks.num_levels();
            vbios.high_dispclk = clks.level_mhz(n - 1, 1);
            vbios.mid_dispclk = clks.level_mhz(n >> 1, 1);
            vbios.low_dispclk = clks.level_mhz(0, 1);
        }
        _ => kprintln!("dc_bw: no dispclk levels from pplib, using defaults"),
    }

    match pplib.get_clock_levels(ClockType::Mclk) {
        Some(clks) if clks.num_levels() > 0 => {
            let n = clks.num_levels();
            vbios.low_yclk = clks.level_mhz(0, MEMORY_TYPE_MULTIPLIER);
            vbios.mid_yclk = clks.level_mhz(n >> 1, MEMORY_TYPE_MULTIPLIER);
            vbios.high_yclk = clks.level_mhz(n - 1, MEMORY_TYPE_MULTIPLIER);
        }
        _ => kprintln!("dc_bw: no mclk levels from pplib, using defaults"),
    }
}
