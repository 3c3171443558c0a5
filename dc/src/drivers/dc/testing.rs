//! Test fixtures: a scripted AUX sink, stream builders, links and a whole
//! Carrizo-like display core.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::adapter::StaticAdapterService;
use super::config::{DcConfig, DceVersion};
use super::link::{Link, LinkSettings};
use super::mst::MstTopologyManager;
use super::mst_mgr::DpMstTopologyMgr;
use super::pplib::{ClockLevels, ClockType, PowerPlayClocks};
use super::stream_encoder::EngineId;
use super::types::{ColorDepth, CrtcTiming, MstPortId, SignalType, Sink, Stream};
use super::Dc;
use crate::drivers::displayport::{dpcd, link_rate, AuxError, AuxTransport, I2cCommand};

/// DPCD register file of a well behaved MST branch.
///
/// Payload table writes raise PAYLOAD_TABLE_UPDATED and, with `auto_act`,
/// PAYLOAD_ACT_HANDLED. The status register is write-1-to-clear.
#[derive(Debug, Default)]
pub struct MockAux {
    pub auto_act: bool,
    /// Number of upcoming PAYLOAD_ALLOCATE_SET writes answered with DEFER
    pub defer_payload_writes: u32,
    /// Messages written to the sideband down-request window
    pub sideband: Vec<Vec<u8>>,
    regs: BTreeMap<u32, u8>,
    writes: usize,
    status_reads: usize,
}

impl MockAux {
    pub fn new() -> Self {
        Self {
            auto_act: true,
            ..Self::default()
        }
    }

    pub fn dpcd_byte(&self, address: u32) -> u8 {
        self.regs.get(&address).copied().unwrap_or(0)
    }

    fn set(&mut self, address: u32, value: u8) {
        self.regs.insert(address, value);
    }
}

impl AuxTransport for MockAux {
    fn read_dpcd(&mut self, address: u32, data: &mut [u8]) -> Result<usize, AuxError> {
        if address == dpcd::PAYLOAD_TABLE_UPDATE_STATUS {
            self.status_reads += 1;
        }
        for (i, b) in data.iter_mut().enumerate() {
            *b = self.dpcd_byte(address + i as u32);
        }
        Ok(data.len())
    }

    fn write_dpcd(&mut self, address: u32, data: &[u8]) -> Result<usize, AuxError> {
        if address == dpcd::PAYLOAD_ALLOCATE_SET && self.defer_payload_writes > 0 {
            self.defer_payload_writes -= 1;
            return Err(AuxError::Defer);
        }
        self.writes += 1;

        match address {
            dpcd::PAYLOAD_TABLE_UPDATE_STATUS => {
                let cleared = self.dpcd_byte(address) & !data.first().copied().unwrap_or(0);
                self.set(address, cleared);
            }
            dpcd::SIDEBAND_MSG_DOWN_REQ_BASE => self.sideband.push(data.to_vec()),
            _ => {
                for (i, b) in data.iter().enumerate() {
                    self.set(address + i as u32, *b);
                }
                if address == dpcd::PAYLOAD_ALLOCATE_SET {
                    let mut status = dpcd::PAYLOAD_TABLE_UPDATED;
                    if self.auto_act {
                        status |= dpcd::PAYLOAD_ACT_HANDLED;
                    }
                    self.set(dpcd::PAYLOAD_TABLE_UPDATE_STATUS, status);
                }
            }
        }
        Ok(data.len())
    }

    fn submit_i2c(&mut self, _cmd: &mut I2cCommand) -> Result<(), AuxError> {
        Err(AuxError::NoReply)
    }

    fn delay_us(&mut self, _us: u32) {}
}

impl DpMstTopologyMgr<MockAux> {
    pub fn aux_writes(&self) -> usize {
        self.with_aux(|a| a.writes)
    }

    pub fn aux_status_reads(&self) -> usize {
        self.with_aux(|a| a.status_reads)
    }
}

/// HBR2 x4 branch with MST already switched on.
pub fn mst_link(aux: MockAux) -> DpMstTopologyMgr<MockAux> {
    let mgr = DpMstTopologyMgr::new(aux, link_rate::HBR2, 4);
    mgr.set_mst(true).unwrap();
    mgr
}

pub fn mst_stream_timing(port: u8, timing: CrtcTiming) -> Arc<Stream> {
    let mut sink = Sink::new(0, SignalType::DisplayPortMst);
    sink.mst_port = Some(MstPortId(port));
    Stream::new(sink, timing)
}

/// 1080p60 behind MST `port` of link 0.
pub fn mst_stream(port: u8, depth: ColorDepth) -> Arc<Stream> {
    mst_stream_timing(port, CrtcTiming::new(1920, 1080, 60).with_color_depth(depth))
}

pub fn hdmi_stream(link_index: usize, timing: CrtcTiming) -> Arc<Stream> {
    let mut sink = Sink::new(link_index, SignalType::HdmiTypeA);
    sink.audio_capable = true;
    Stream::new(sink, timing)
}

/// `n` HDMI connectors, link `i` wired to DIG `i`.
pub fn test_links(n: usize) -> Vec<Link> {
    let asic = StaticAdapterService::carrizo();
    (0..n)
        .map(|i| {
            let engine = EngineId::from_mask(asic.stream_engines).nth(i).unwrap_or(EngineId::DigA);
            Link::from_adapter(i, SignalType::HdmiTypeA, &asic, DceVersion::Dce110, engine)
        })
        .collect()
}

/// DP connector on DIG `i`, trained to HBR2 x4.
pub fn dp_link(i: usize) -> Link {
    let asic = StaticAdapterService::carrizo();
    let engine = EngineId::from_mask(asic.stream_engines).nth(i).unwrap_or(EngineId::DigA);
    Link::from_adapter(i, SignalType::DisplayPort, &asic, DceVersion::Dce110, engine).with_link_cap(LinkSettings {
        link_rate: link_rate::HBR2,
        lane_count: 4,
    })
}

/// Clock tables as a Carrizo SMU reports them.
#[derive(Debug, Clone)]
pub struct StaticPowerPlay {
    pub sclk: Vec<u32>,
    pub dispclk: Vec<u32>,
    pub mclk: Vec<u32>,
}

impl StaticPowerPlay {
    pub fn carrizo() -> Self {
        Self {
            sclk: (2..=9).map(|n| n * 100000).collect(),
            dispclk: alloc::vec![300000, 600000],
            mclk: alloc::vec![333000, 800000],
        }
    }
}

impl PowerPlayClocks for StaticPowerPlay {
    fn get_clock_levels(&self, clk: ClockType) -> Option<ClockLevels> {
        let levels = match clk {
            ClockType::Sclk => &self.sclk,
            ClockType::Dispclk => &self.dispclk,
            ClockType::Mclk => &self.mclk,
        };
        Some(ClockLevels::new(levels.clone()))
    }
}

/// Carrizo core (3 pipes + underlay) with HDMI links.
pub fn dc_with_links(config: DcConfig, links: Vec<Link>) -> Dc {
    Dc::construct(&StaticAdapterService::carrizo(), config, &StaticPowerPlay::carrizo(), links).unwrap()
}

pub fn carrizo_dc(links: usize) -> Dc {
    dc_with_links(DcConfig::default(), test_links(links))
}

/// Link 0 as an MST connector driven by `mgr`.
pub fn mst_dc(mgr: Arc<dyn MstTopologyManager>) -> Dc {
    let link = dp_link(0).with_mst_manager(mgr);
    dc_with_links(DcConfig::default(), alloc::vec![link])
}
