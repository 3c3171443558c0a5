//! DP MST payload allocation
//!
//! One [`MstStreamAllocator`] per MST stream walks the payload handshake with
//! the link's topology manager:
//!
//! ```text
//! Idle -> VcpiAllocating -> Part1Updating -> ActPending -> Part2Updating -> Active
//! Active -> Deallocating -> ActPending -> Part2Updating -> Idle
//! ```
//!
//! The device-side stream allocation table is a copy of the manager's payload
//! array in the manager's own order. The branch already agreed on that order
//! with its upstream partner, so it is never sorted.

use alloc::vec::Vec;
use spin::Mutex;

use super::status::DcError;
use super::types::{MstPortId, Stream};
use crate::drivers::displayport::AuxError;
use crate::kprintln;

/// Time slots in an MTP (slot 0 carries the MTP header)
pub const MAX_MST_SLOTS: u32 = 63;
/// ACT status checks before giving up
pub const MST_ACT_MAX_RETRY: u32 = 50;
pub const MST_ACT_POLL_INTERVAL_US: u32 = 1000;
/// Part-1 attempts while the manager reports busy
pub const MST_PART1_MAX_RETRY: u32 = 5;
pub const MST_PART1_RETRY_INTERVAL_US: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MstError {
    /// Stream is not behind an MST port, or the link has no manager
    NoConnector,
    MstNotEnabled,
    /// Not enough free time slots or VCPI ids
    NoVcpiSlots,
    /// Sideband/AUX transaction in flight, try again
    Busy,
    Part1Failed,
    /// Branch never signalled the allocation change trigger
    ActTimeout,
    Part2Failed,
    /// Handshake step issued out of order
    OutOfOrder,
    InvalidColorDepth,
    Aux(AuxError),
}

impl From<AuxError> for MstError {
    fn from(e: AuxError) -> Self {
        MstError::Aux(e)
    }
}

impl From<MstError> for DcError {
    fn from(e: MstError) -> Self {
        match e {
            MstError::OutOfOrder | MstError::InvalidColorDepth | MstError::NoConnector => {
                DcError::ErrorUnexpected
            }
            _ => DcError::FailDpPayloadAllocation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadState {
    Unused,
    /// Programmed into our side (part 1), branch not told yet
    Local,
    /// Branch acknowledged (part 2)
    Remote,
    /// Going away, part 1 already sent zero slots
    DeleteLocal,
}

/// Entry of the topology manager's payload array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub start_slot: u8,
    pub num_slots: u8,
    pub vcpi: u8,
    pub state: PayloadState,
}

impl Payload {
    pub const EMPTY: Payload = Payload {
        start_slot: 0,
        num_slots: 0,
        vcpi: 0,
        state: PayloadState::Unused,
    };

    pub fn new(vcpi: u8, num_slots: u8, state: PayloadState) -> Self {
        Self { start_slot: 0, num_slots, vcpi, state }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamAllocation {
    pub vcp_id: u8,
    pub slot_count: u8,
}

/// What the link encoder programs into its MST slot allocation registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamAllocationTable {
    pub allocations: Vec<StreamAllocation>,
}

impl StreamAllocationTable {
    pub fn stream_count(&self) -> usize {
        self.allocations.len()
    }

    pub fn total_slots(&self) -> u32 {
        self.allocations.iter().map(|a| a.slot_count as u32).sum()
    }
}

/// Copy active payloads (local or remote) in array order, stopping at the
/// first empty entry.
pub fn build_mst_allocation_table(payloads: &[Payload]) -> StreamAllocationTable {
    let mut table = StreamAllocationTable::default();

    for payload in payloads.iter().take(MAX_MST_SLOTS as usize) {
        if payload.num_slots == 0 {
            break;
        }
        if matches!(payload.state, PayloadState::Local | PayloadState::Remote) {
            table.allocations.push(StreamAllocation {
                vcp_id: payload.vcpi,
                slot_count: payload.num_slots,
            });
        }
    }
    table
}

/// Scan `mgr`'s payload array. The payload lock is held for the scan only.
pub fn get_payload_table(mgr: &dyn MstTopologyManager) -> StreamAllocationTable {
    let payloads = mgr.payload_lock().lock();
    build_mst_allocation_table(&payloads)
}

/// PBN for a mode, with the 0.6% margin DP asks for.
///
/// PBN units are 54/64 MBps; `bpp` is bits per pixel over all components.
pub fn calc_pbn_mode(clock_khz: u32, bpp: u32) -> u32 {
    let num = clock_khz as u64 * bpp as u64 * 64 * 1006;
    let den = 8u64 * 54 * 1_000_000;
    num.div_ceil(den) as u32
}

/// Time slots needed for `pbn` when each slot carries `pbn_div`.
pub fn slots_for_pbn(pbn: u32, pbn_div: u32) -> Option<u8> {
    if pbn_div == 0 {
        return None;
    }
    let slots = pbn.div_ceil(pbn_div);
    if slots > MAX_MST_SLOTS {
        return None;
    }
    Some(slots as u8)
}

/// Link-layer MST topology manager of one link.
///
/// Shared between the display core and the sideband message handling, so
/// everything takes `&self`.
pub trait MstTopologyManager: Send + Sync {
    /// The payload array. Only hold this for short scans.
    fn payload_lock(&self) -> &Mutex<Vec<Payload>>;

    /// PBN carried by one time slot on the current link configuration.
    fn pbn_div(&self) -> u32;

    /// Reserve a VCPI id and `slots` time slots for `port`.
    fn allocate_vcpi(&self, port: MstPortId, pbn: u32, slots: u8) -> Result<u8, MstError>;

    /// Drop `port`'s slots from the proposed table, keeping its VCPI id.
    fn reset_vcpi_slots(&self, port: MstPortId);

    fn deallocate_vcpi(&self, port: MstPortId);

    /// Program the proposed table into our side of the link.
    ///
    /// `Ok(())` means the table update went through. `Err(MstError::Busy)`
    /// may be retried, anything else is final.
    fn update_payload_part1(&self) -> Result<(), MstError>;

    /// Has the branch handled the allocation change trigger?
    fn check_act_status(&self) -> Result<bool, MstError>;

    /// Tell the branch about the new allocation.
    fn update_payload_part2(&self) -> Result<(), MstError>;

    fn set_mst(&self, enable: bool) -> Result<(), MstError>;

    fn mst_enabled(&self) -> bool;

    fn delay_us(&self, us: u32) {
        for _ in 0..us.saturating_mul(100) {
            core::hint::spin_loop();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocState {
    Idle,
    VcpiAllocating,
    Part1Updating,
    ActPending,
    Part2Updating,
    Active,
    Deallocating,
}

/// Payload handshake of one MST stream.
#[derive(Debug, Clone)]
pub struct MstStreamAllocator {
    port: MstPortId,
    state: AllocState,
    /// Direction of the handshake in flight
    enabling: bool,
    pbn: u32,
    slots: u8,
    vcpi: u8,
}

impl MstStreamAllocator {
    pub fn new(port: MstPortId) -> Self {
        Self {
            port,
            state: AllocState::Idle,
            enabling: false,
            pbn: 0,
            slots: 0,
            vcpi: 0,
        }
    }

    pub fn state(&self) -> AllocState {
        self.state
    }

    pub fn port(&self) -> MstPortId {
        self.port
    }

    pub fn vcpi(&self) -> u8 {
        self.vcpi
    }

    pub fn slots(&self) -> u8 {
        self.slots
    }

    /// Propose the new slot table and run part 1.
    ///
    /// On enable the VCPI is allocated first; if that fails nothing was
    /// touched. On disable the port's slots are reset before part 1 so the
    /// table sent downstream already lacks the stream. Returns the table to
    /// program into the link encoder.
    pub fn write_payload_allocation_table(
        &mut self,
        mgr: &dyn MstTopologyManager,
        stream: &Stream,
        enable: bool,
    ) -> Result<StreamAllocationTable, MstError> {
        if enable {
            if self.state != AllocState::Idle {
                return Err(MstError::OutOfOrder);
            }
            if !mgr.mst_enabled() {
                return Err(MstError::MstNotEnabled);
            }

            let bpc = stream
                .timing
                .display_color_depth
                .bpc()
                .ok_or(MstError::InvalidColorDepth)?;
            let pbn = calc_pbn_mode(stream.timing.pix_clk_khz, bpc * 3);
            let slots = slots_for_pbn(pbn, mgr.pbn_div()).ok_or(MstError::NoVcpiSlots)?;

            self.state = AllocState::VcpiAllocating;
            match mgr.allocate_vcpi(self.port, pbn, slots) {
                Ok(vcpi) => {
                    self.vcpi = vcpi;
                    self.pbn = pbn;
                    self.slots = slots;
                }
                Err(e) => {
                    kprintln!("dc_mst: port {} no VCPI for pbn {} ({} slots)", self.port.0, pbn, slots);
                    self.state = AllocState::Idle;
                    return Err(e);
                }
            }
            self.enabling = true;
            self.state = AllocState::Part1Updating;
        } else {
            if self.state != AllocState::Active {
                return Err(MstError::OutOfOrder);
            }
            self.enabling = false;
            self.state = AllocState::Deallocating;
            mgr.reset_vcpi_slots(self.port);
        }

        if let Err(e) = self.update_part1_with_retry(mgr) {
            kprintln!("dc_mst: port {} payload part 1 failed: {:?}", self.port.0, e);
            self.rollback(mgr);
            return Err(e);
        }

        self.state = AllocState::ActPending;
        Ok(get_payload_table(mgr))
    }

    fn update_part1_with_retry(&self, mgr: &dyn MstTopologyManager) -> Result<(), MstError> {
        for _ in 0..MST_PART1_MAX_RETRY {
            match mgr.update_payload_part1() {
                Ok(()) => return Ok(()),
                Err(MstError::Busy) => mgr.delay_us(MST_PART1_RETRY_INTERVAL_US),
                Err(_) => return Err(MstError::Part1Failed),
            }
        }
        Err(MstError::Part1Failed)
    }

    /// Wait for the branch to handle ACT, bounded by [`MST_ACT_MAX_RETRY`].
    ///
    /// A timeout tears down the provisional allocation before returning.
    pub fn poll_for_act(&mut self, mgr: &dyn MstTopologyManager) -> Result<(), MstError> {
        if self.state != AllocState::ActPending {
            return Err(MstError::OutOfOrder);
        }

        for _ in 0..MST_ACT_MAX_RETRY {
            // Transport errors count as "not yet"
            if let Ok(true) = mgr.check_act_status() {
                self.state = AllocState::Part2Updating;
                return Ok(());
            }
            mgr.delay_us(MST_ACT_POLL_INTERVAL_US);
        }

        kprintln!("dc_mst: port {} ACT not handled after {} polls", self.port.0, MST_ACT_MAX_RETRY);
        self.rollback(mgr);
        Err(MstError::ActTimeout)
    }

    /// Part 2. On disable the VCPI is released only once this succeeded.
    pub fn send_payload_allocation(
        &mut self,
        mgr: &dyn MstTopologyManager,
        enable: bool,
    ) -> Result<(), MstError> {
        if self.state != AllocState::Part2Updating || enable != self.enabling {
            debug_assert!(false, "MST part 2 issued in state {:?}", self.state);
            return Err(MstError::OutOfOrder);
        }

        if mgr.update_payload_part2().is_err() {
            kprintln!("dc_mst: port {} payload part 2 failed", self.port.0);
            self.rollback(mgr);
            return Err(MstError::Part2Failed);
        }

        if enable {
            self.state = AllocState::Active;
        } else {
            mgr.deallocate_vcpi(self.port);
            self.clear();
        }
        Ok(())
    }

    /// Give back whatever the failed handshake had claimed.
    fn rollback(&mut self, mgr: &dyn MstTopologyManager) {
        mgr.reset_vcpi_slots(self.port);
        if mgr.update_payload_part1().is_err() {
            kprintln!("dc_mst: port {} rollback part 1 failed", self.port.0);
        }
        mgr.deallocate_vcpi(self.port);
        self.clear();
    }

    fn clear(&mut self) {
        self.state = AllocState::Idle;
        self.pbn = 0;
        self.slots = 0;
        self.vcpi = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::dc::testing::{mst_link, mst_stream, mst_stream_timing, MockAux};
    use crate::drivers::dc::types::{ColorDepth, CrtcTiming};

    #[test]
    fn test_allocation_table_order_and_sentinel() {
        let payloads = [
            Payload::new(4, 4, PayloadState::Local),
            Payload::new(2, 2, PayloadState::Remote),
            Payload::EMPTY,
            Payload::new(7, 7, PayloadState::Local),
        ];
        let table = build_mst_allocation_table(&payloads);
        assert_eq!(table.stream_count(), 2);
        assert_eq!(table.allocations[0], StreamAllocation { vcp_id: 4, slot_count: 4 });
        assert_eq!(table.allocations[1], StreamAllocation { vcp_id: 2, slot_count: 2 });
    }

    #[test]
    fn test_allocation_table_skips_delete_local() {
        let payloads = [
            Payload::new(1, 5, PayloadState::DeleteLocal),
            Payload::new(3, 8, PayloadState::Remote),
        ];
        let table = build_mst_allocation_table(&payloads);
        assert_eq!(table.allocations, [StreamAllocation { vcp_id: 3, slot_count: 8 }]);
    }

    #[test]
    fn test_calc_pbn_mode() {
        assert_eq!(calc_pbn_mode(154000, 30), 689);
        assert_eq!(calc_pbn_mode(297000, 24), 1063);
        assert_eq!(calc_pbn_mode(148500, 24), 532);
        assert_eq!(slots_for_pbn(532, 40), Some(14));
        assert_eq!(slots_for_pbn(532, 0), None);
        assert_eq!(slots_for_pbn(5000, 40), None);
    }

    #[test]
    fn test_enable_disable_handshake() {
        let mgr = mst_link(MockAux::new());
        let stream = mst_stream(1, ColorDepth::Depth888);
        let mut alloc = MstStreamAllocator::new(MstPortId(1));

        let table = alloc.write_payload_allocation_table(&mgr, &stream, true).unwrap();
        assert_eq!(alloc.state(), AllocState::ActPending);
        assert_eq!(table.allocations, [StreamAllocation { vcp_id: 1, slot_count: 14 }]);

        alloc.poll_for_act(&mgr).unwrap();
        alloc.send_payload_allocation(&mgr, true).unwrap();
        assert_eq!(alloc.state(), AllocState::Active);
        assert_eq!(mgr.payload_lock().lock()[0].state, PayloadState::Remote);

        let table = alloc.write_payload_allocation_table(&mgr, &stream, false).unwrap();
        assert_eq!(table.stream_count(), 0);
        alloc.poll_for_act(&mgr).unwrap();
        alloc.send_payload_allocation(&mgr, false).unwrap();
        assert_eq!(alloc.state(), AllocState::Idle);
        assert_eq!(mgr.allocated_vcpis(), 0);
    }

    #[test]
    fn test_act_timeout_rolls_back() {
        let mut aux = MockAux::new();
        aux.auto_act = false;
        let mgr = mst_link(aux);
        let stream = mst_stream(1, ColorDepth::Depth888);
        let mut alloc = MstStreamAllocator::new(MstPortId(1));

        alloc.write_payload_allocation_table(&mgr, &stream, true).unwrap();
        assert_eq!(alloc.poll_for_act(&mgr), Err(MstError::ActTimeout));
        assert_eq!(alloc.state(), AllocState::Idle);
        assert_eq!(get_payload_table(&mgr).stream_count(), 0);
        assert_eq!(mgr.allocated_vcpis(), 0);
        assert!(mgr.aux_status_reads() >= MST_ACT_MAX_RETRY as usize);
    }

    #[test]
    fn test_part1_busy_is_retried() {
        let mut aux = MockAux::new();
        aux.defer_payload_writes = 2;
        let mgr = mst_link(aux);
        let stream = mst_stream(2, ColorDepth::Depth101010);
        let mut alloc = MstStreamAllocator::new(MstPortId(2));

        let table = alloc.write_payload_allocation_table(&mgr, &stream, true).unwrap();
        assert_eq!(table.stream_count(), 1);
    }

    #[test]
    fn test_part1_busy_exhausted() {
        let mut aux = MockAux::new();
        aux.defer_payload_writes = MST_PART1_MAX_RETRY;
        let mgr = mst_link(aux);
        let stream = mst_stream(2, ColorDepth::Depth888);
        let mut alloc = MstStreamAllocator::new(MstPortId(2));

        assert_eq!(
            alloc.write_payload_allocation_table(&mgr, &stream, true),
            Err(MstError::Part1Failed)
        );
        assert_eq!(alloc.state(), AllocState::Idle);
        assert_eq!(mgr.allocated_vcpis(), 0);
    }

    #[test]
    fn test_no_slots_has_no_side_effects() {
        let mgr = mst_link(MockAux::new());
        let big = mst_stream_timing(1, CrtcTiming::new(3840, 2160, 60));
        let mut first = MstStreamAllocator::new(MstPortId(1));
        first.write_payload_allocation_table(&mgr, &big, true).unwrap();
        assert_eq!(first.slots(), 49);

        let writes = mgr.aux_writes();
        let deep = mst_stream(2, ColorDepth::Depth121212);
        let mut second = MstStreamAllocator::new(MstPortId(2));
        assert_eq!(
            second.write_payload_allocation_table(&mgr, &deep, true),
            Err(MstError::NoVcpiSlots)
        );
        assert_eq!(second.state(), AllocState::Idle);
        assert_eq!(mgr.aux_writes(), writes);
        assert_eq!(mgr.allocated_vcpis(), 1);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn test_part2_before_act() {
        let mgr = mst_link(MockAux::new());
        let stream = mst_stream(1, ColorDepth::Depth888);
        let mut alloc = MstStreamAllocator::new(MstPortId(1));

        alloc.write_payload_allocation_table(&mgr, &stream, true).unwrap();
        assert_eq!(alloc.send_payload_allocation(&mgr, true), Err(MstError::OutOfOrder));
    }
}
