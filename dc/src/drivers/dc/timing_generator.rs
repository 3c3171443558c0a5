//! Timing generator limits

use super::types::{CrtcTiming, SignalType, TimingFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TgCaps {
    pub max_h_total: u32,
    pub max_v_total: u32,
    pub min_h_blank: u32,
    pub min_h_sync_width: u32,
    pub min_v_sync_width: u32,
    pub min_h_front_porch: u32,
    pub min_v_front_porch: u32,
    pub interlace: bool,
}

impl TgCaps {
    pub const DCE110: TgCaps = TgCaps {
        max_h_total: 8192,
        max_v_total: 8192,
        min_h_blank: 56,
        min_h_sync_width: 8,
        min_v_sync_width: 1,
        min_h_front_porch: 0,
        min_v_front_porch: 1,
        interlace: true,
    };

    /// The underlay controller only scans out progressive timings.
    pub const DCE110_UNDERLAY: TgCaps = TgCaps {
        interlace: false,
        ..TgCaps::DCE110
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingGenerator {
    pub inst: usize,
    pub caps: TgCaps,
}

impl TimingGenerator {
    pub fn new(inst: usize, caps: TgCaps) -> Self {
        Self { inst, caps }
    }

    /// Can this controller run `timing`?
    pub fn validate_timing(&self, timing: &CrtcTiming, signal: SignalType) -> bool {
        let caps = &self.caps;

        if timing.h_total > caps.max_h_total || timing.v_total > caps.max_v_total {
            return false;
        }
        if timing.h_addressable == 0 || timing.v_addressable == 0 {
            return false;
        }
        if timing.h_total < timing.h_addressable + caps.min_h_blank {
            return false;
        }
        if timing.v_total <= timing.v_addressable {
            return false;
        }
        if timing.h_sync_width < caps.min_h_sync_width
            || timing.v_sync_width < caps.min_v_sync_width
        {
            return false;
        }
        if timing.h_front_porch < caps.min_h_front_porch
            || timing.v_front_porch < caps.min_v_front_porch
        {
            return false;
        }
        if timing.flags.contains(TimingFlags::INTERLACE) {
            // Interlace over DP is not something the encoders do
            if !caps.interlace || signal.is_dp() {
                return false;
            }
        }
        true
    }
}
