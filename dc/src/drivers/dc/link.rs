//! Display links
//!
//! A link is one physical connector: its link encoder, the link settings
//! training settled on and, for MST, the topology manager plus one payload
//! allocator per stream behind it.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use super::adapter::AdapterService;
use super::config::DceVersion;
use super::link_encoder::{create_link_encoder, LinkEncoder};
use super::mst::{
    get_payload_table, AllocState, MstError, MstStreamAllocator, MstTopologyManager, StreamAllocationTable,
};
use super::status::{DcError, DcResult};
use super::stream_encoder::EngineId;
use super::types::{MstPortId, SignalType, Stream};
use crate::drivers::displayport::link_bandwidth_kbps;
use crate::kprintln;

/// Link rate code and lane count (0/0 until trained)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkSettings {
    pub link_rate: u8,
    pub lane_count: u8,
}

impl LinkSettings {
    pub fn is_known(&self) -> bool {
        self.link_rate != 0 && self.lane_count != 0
    }
}

pub struct Link {
    pub index: usize,
    pub connector_signal: SignalType,
    pub encoder: Box<dyn LinkEncoder>,
    pub verified_link_cap: LinkSettings,
    pub mst_mgr: Option<Arc<dyn MstTopologyManager>>,
    mst_streams: BTreeMap<MstPortId, MstStreamAllocator>,
}

impl core::fmt::Debug for Link {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Link")
            .field("index", &self.index)
            .field("connector_signal", &self.connector_signal)
            .field("verified_link_cap", &self.verified_link_cap)
            .field("mst", &self.mst_mgr.is_some())
            .finish()
    }
}

impl Link {
    pub fn new(index: usize, connector_signal: SignalType, encoder: Box<dyn LinkEncoder>) -> Self {
        Self {
            index,
            connector_signal,
            encoder,
            verified_link_cap: LinkSettings::default(),
            mst_mgr: None,
            mst_streams: BTreeMap::new(),
        }
    }

    /// Link on `engine` with the encoder capabilities firmware reports.
    pub fn from_adapter(
        index: usize,
        connector_signal: SignalType,
        adapter: &dyn AdapterService,
        dce_version: DceVersion,
        engine: EngineId,
    ) -> Self {
        let encoder = create_link_encoder(dce_version, adapter.encoder_caps(), engine);
        Self::new(index, connector_signal, encoder)
    }

    pub fn with_link_cap(mut self, settings: LinkSettings) -> Self {
        self.verified_link_cap = settings;
        self
    }

    pub fn with_mst_manager(mut self, mgr: Arc<dyn MstTopologyManager>) -> Self {
        self.mst_mgr = Some(mgr);
        self
    }

    /// Can the link itself carry `stream` (dongle limit, DP bandwidth)?
    pub fn validate_mode_timing(&self, stream: &Stream) -> DcResult<()> {
        let timing = &stream.timing;

        let max_pix_clk = stream.sink.dongle_max_pix_clk_khz;
        if max_pix_clk != 0 && timing.pix_clk_khz > max_pix_clk {
            return Err(DcError::ExceedDongleMaxClk);
        }

        if matches!(stream.signal, SignalType::DisplayPort | SignalType::Edp) {
            let cap = self.verified_link_cap;
            // Not trained yet, nothing to check against
            if !cap.is_known() {
                return Ok(());
            }
            let bpp = timing.bits_per_pixel().unwrap_or(24) as u64;
            let required = timing.pix_clk_khz as u64 * bpp;
            if required > link_bandwidth_kbps(cap.link_rate, cap.lane_count) {
                return Err(DcError::NoDpLinkBandwidth);
            }
        }
        Ok(())
    }

    pub fn mst_stream_state(&self, port: MstPortId) -> Option<&MstStreamAllocator> {
        self.mst_streams.get(&port)
    }

    /// Does `stream` hold a fully handed out payload on this link?
    pub fn has_mst_payload(&self, stream: &Stream) -> bool {
        stream
            .sink
            .mst_port
            .and_then(|port| self.mst_streams.get(&port))
            .is_some_and(|a| a.state() == AllocState::Active)
    }

    fn mst_parts(&mut self, stream: &Stream) -> Result<(Arc<dyn MstTopologyManager>, MstPortId), MstError> {
        let mgr = self.mst_mgr.clone().ok_or(MstError::NoConnector)?;
        let port = stream.sink.mst_port.ok_or(MstError::NoConnector)?;
        Ok((mgr, port))
    }

    /// Propose the new slot table and program it into the link encoder.
    pub fn write_payload_allocation_table(
        &mut self,
        stream: &Stream,
        enable: bool,
    ) -> Result<StreamAllocationTable, MstError> {
        let (mgr, port) = self.mst_parts(stream)?;
        let alloc = self
            .mst_streams
            .entry(port)
            .or_insert_with(|| MstStreamAllocator::new(port));

        let table = alloc.write_payload_allocation_table(&*mgr, stream, enable)?;
        self.encoder.update_mst_stream_allocation_table(&table);
        Ok(table)
    }

    pub fn poll_for_act(&mut self, stream: &Stream) -> Result<(), MstError> {
        let (mgr, port) = self.mst_parts(stream)?;
        let alloc = self.mst_streams.get_mut(&port).ok_or(MstError::OutOfOrder)?;

        let res = alloc.poll_for_act(&*mgr);
        if res.is_err() {
            // Allocation was rolled back, put the encoder back in line
            self.encoder.update_mst_stream_allocation_table(&get_payload_table(&*mgr));
        }
        res
    }

    pub fn send_payload_allocation(&mut self, stream: &Stream, enable: bool) -> Result<(), MstError> {
        let (mgr, port) = self.mst_parts(stream)?;
        let alloc = self.mst_streams.get_mut(&port).ok_or(MstError::OutOfOrder)?;

        let res = alloc.send_payload_allocation(&*mgr, enable);
        if res.is_err() {
            self.encoder.update_mst_stream_allocation_table(&get_payload_table(&*mgr));
        }
        if !enable && res.is_ok() {
            self.mst_streams.remove(&port);
        }
        res
    }

    /// Whole enable handshake for `stream`.
    pub fn allocate_mst_payload(&mut self, stream: &Stream) -> DcResult<()> {
        let res = self
            .write_payload_allocation_table(stream, true)
            .and_then(|_| self.poll_for_act(stream))
            .and_then(|_| self.send_payload_allocation(stream, true));

        if let Err(e) = res {
            kprintln!("dc: link {} MST payload allocation failed: {:?}", self.index, e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Whole disable handshake for `stream`.
    pub fn deallocate_mst_payload(&mut self, stream: &Stream) -> DcResult<()> {
        let res = self
            .write_payload_allocation_table(stream, false)
            .and_then(|_| self.poll_for_act(stream))
            .and_then(|_| self.send_payload_allocation(stream, false));

        if let Err(e) = res {
            kprintln!("dc: link {} MST payload deallocation failed: {:?}", self.index, e);
            return Err(e.into());
        }
        Ok(())
    }

    /// At boot firmware already brought the topology up; just acknowledge.
    pub fn start_topology_manager(&self, boot: bool) -> Result<(), MstError> {
        let mgr = self.mst_mgr.as_ref().ok_or(MstError::NoConnector)?;
        if boot {
            kprintln!("dc: link {} MST start deferred at boot", self.index);
            return Ok(());
        }
        mgr.set_mst(true)
    }

    pub fn stop_topology_manager(&self) -> Result<(), MstError> {
        let mgr = self.mst_mgr.as_ref().ok_or(MstError::NoConnector)?;
        if mgr.mst_enabled() {
            mgr.set_mst(false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::dc::adapter::EncoderCaps;
    use crate::drivers::dc::testing::{mst_link, mst_stream, MockAux};
    use crate::drivers::dc::types::{ColorDepth, CrtcTiming, Sink};
    use crate::drivers::displayport::link_rate;

    fn dp_link(cap: LinkSettings) -> Link {
        let enc = create_link_encoder(DceVersion::Dce110, EncoderCaps::HBR2, EngineId::DigA);
        Link::new(0, SignalType::DisplayPort, enc).with_link_cap(cap)
    }

    #[test]
    fn test_dp_link_bandwidth() {
        let link = dp_link(LinkSettings { link_rate: link_rate::RBR, lane_count: 2 });
        let s1080 = Stream::new(Sink::new(0, SignalType::DisplayPort), CrtcTiming::new(1920, 1080, 60));
        // 148.5 MHz * 24 bpp = 3.56 Gbps, RBR x2 carries 2.59
        assert_eq!(link.validate_mode_timing(&s1080), Err(DcError::NoDpLinkBandwidth));

        let link = dp_link(LinkSettings { link_rate: link_rate::HBR2, lane_count: 4 });
        assert_eq!(link.validate_mode_timing(&s1080), Ok(()));

        let untrained = dp_link(LinkSettings::default());
        assert_eq!(untrained.validate_mode_timing(&s1080), Ok(()));
    }

    #[test]
    fn test_encoder_caps_from_adapter() {
        use crate::drivers::dc::adapter::StaticAdapterService;

        let mut asic = StaticAdapterService::carrizo();
        let link = Link::from_adapter(1, SignalType::HdmiTypeA, &asic, DceVersion::Dce110, EngineId::DigB);
        assert!(link.encoder.features().flags.contains(EncoderCaps::HDMI_DEEP_COLOR));
        assert_eq!(link.encoder.preferred_engine(), EngineId::DigB);

        asic.caps = EncoderCaps::HBR2;
        let link = Link::from_adapter(1, SignalType::HdmiTypeA, &asic, DceVersion::Dce110, EngineId::DigB);
        assert!(!link.encoder.features().flags.contains(EncoderCaps::HDMI_DEEP_COLOR));
    }

    #[test]
    fn test_dongle_limit() {
        let link = dp_link(LinkSettings::default());
        let mut sink = Sink::new(0, SignalType::HdmiTypeA);
        sink.dongle_max_pix_clk_khz = 165000;
        let ok = Stream::new(sink.clone(), CrtcTiming::new(1920, 1080, 60));
        assert_eq!(link.validate_mode_timing(&ok), Ok(()));
        let fast = Stream::new(sink, CrtcTiming::new(2560, 1440, 60));
        assert_eq!(link.validate_mode_timing(&fast), Err(DcError::ExceedDongleMaxClk));
    }

    #[test]
    fn test_mst_payload_programs_encoder() {
        let mgr = Arc::new(mst_link(MockAux::new()));
        let mut link = dp_link(LinkSettings { link_rate: link_rate::HBR2, lane_count: 4 })
            .with_mst_manager(mgr.clone());
        let stream = mst_stream(3, ColorDepth::Depth888);

        link.allocate_mst_payload(&stream).unwrap();
        assert_eq!(link.encoder.mst_stream_allocation_table().total_slots(), 14);
        assert_eq!(link.mst_stream_state(MstPortId(3)).map(|a| a.state()), Some(AllocState::Active));

        link.deallocate_mst_payload(&stream).unwrap();
        assert_eq!(link.encoder.mst_stream_allocation_table().stream_count(), 0);
        assert!(link.mst_stream_state(MstPortId(3)).is_none());
    }

    #[test]
    fn test_act_timeout_restores_encoder_table() {
        let mut aux = MockAux::new();
        aux.auto_act = false;
        let mgr = Arc::new(mst_link(aux));
        let mut link = dp_link(LinkSettings { link_rate: link_rate::HBR2, lane_count: 4 })
            .with_mst_manager(mgr.clone());
        let stream = mst_stream(1, ColorDepth::Depth888);

        assert_eq!(link.allocate_mst_payload(&stream), Err(DcError::FailDpPayloadAllocation));
        assert_eq!(link.encoder.mst_stream_allocation_table().stream_count(), 0);
    }

    #[test]
    fn test_topology_manager_start_stop() {
        let mgr = Arc::new(mst_link(MockAux::new()));
        mgr.set_mst(false).unwrap();
        let link = dp_link(LinkSettings::default()).with_mst_manager(mgr.clone());

        link.start_topology_manager(true).unwrap();
        assert!(!mgr.mst_enabled());
        link.start_topology_manager(false).unwrap();
        assert!(mgr.mst_enabled());

        link.stop_topology_manager().unwrap();
        assert!(!mgr.mst_enabled());
        let writes = mgr.aux_writes();
        link.stop_topology_manager().unwrap();
        assert_eq!(mgr.aux_writes(), writes);
    }
}
