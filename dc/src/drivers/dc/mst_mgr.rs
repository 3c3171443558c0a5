//! AUX-backed MST topology manager
//!
//! Keeps the VCPI/time-slot bookkeeping of one MST link and talks to the
//! branch through DPCD:
//! - part 1 writes PAYLOAD_ALLOCATE_SET/START_TIME_SLOT/TIME_SLOT_COUNT for
//!   every changed payload and waits for PAYLOAD_TABLE_UPDATED
//! - ACT is PAYLOAD_ACT_HANDLED in PAYLOAD_TABLE_UPDATE_STATUS
//! - part 2 sends ALLOCATE_PAYLOAD down the sideband channel
//!
//! Payload order is append-only: existing entries keep their position and
//! removed ones are compacted out after part 1.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use super::mst::{MstError, MstTopologyManager, Payload, PayloadState, MAX_MST_SLOTS};
use super::types::MstPortId;
use crate::drivers::displayport::{
    dpcd, pbn_per_slot, read_dpcd_byte, sideband, write_dpcd_all, AuxError, AuxTransport,
};
use crate::{dc_trace, kprintln};

/// Payload array size (streams per link)
pub const MAX_PAYLOADS: usize = 8;
const PAYLOAD_UPDATE_MAX_RETRY: u32 = 20;
const PAYLOAD_UPDATE_INTERVAL_US: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProposedVcpi {
    port: MstPortId,
    vcpi: u8,
    pbn: u32,
    num_slots: u8,
}

#[derive(Debug, Clone, Copy)]
struct PayloadWrite {
    vcpi: u8,
    start_slot: u8,
    num_slots: u8,
}

pub struct DpMstTopologyMgr<A: AuxTransport> {
    aux: Mutex<A>,
    payloads: Mutex<Vec<Payload>>,
    proposed: Mutex<Vec<ProposedVcpi>>,
    /// Removed in part 1, branch still to be told in part 2
    pending_deletes: Mutex<Vec<ProposedVcpi>>,
    link_rate: u8,
    lane_count: u8,
    mst_state: AtomicBool,
}

impl<A: AuxTransport> DpMstTopologyMgr<A> {
    pub fn new(aux: A, link_rate: u8, lane_count: u8) -> Self {
        Self {
            aux: Mutex::new(aux),
            payloads: Mutex::new(vec![Payload::EMPTY; MAX_PAYLOADS]),
            proposed: Mutex::new(Vec::new()),
            pending_deletes: Mutex::new(Vec::new()),
            link_rate,
            lane_count,
            mst_state: AtomicBool::new(false),
        }
    }

    /// VCPI ids currently handed out.
    pub fn allocated_vcpis(&self) -> usize {
        self.proposed.lock().len()
    }

    /// Run `f` with the transport locked.
    pub fn with_aux<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut self.aux.lock())
    }

    /// Next payload array and the DPCD writes that get the sink there.
    fn plan_part1(&self) -> (Vec<Payload>, Vec<PayloadWrite>, Vec<ProposedVcpi>) {
        let payloads = self.payloads.lock();
        let proposed = self.proposed.lock();

        let mut next = Vec::with_capacity(MAX_PAYLOADS);
        let mut writes = Vec::new();
        let mut deletes = Vec::new();
        // Slot 0 carries the MTP header
        let mut cur_slot = 1u8;

        for payload in payloads.iter().filter(|p| p.num_slots != 0) {
            let req = proposed.iter().find(|p| p.vcpi == payload.vcpi);
            match req {
                Some(req) if req.num_slots != 0 => {
                    let mut entry = *payload;
                    if entry.num_slots != req.num_slots || entry.start_slot != cur_slot {
                        writes.push(PayloadWrite { vcpi: req.vcpi, start_slot: cur_slot, num_slots: req.num_slots });
                        entry.num_slots = req.num_slots;
                        entry.state = PayloadState::Local;
                    }
                    entry.start_slot = cur_slot;
                    cur_slot += entry.num_slots;
                    next.push(entry);
                }
                _ => {
                    writes.push(PayloadWrite { vcpi: payload.vcpi, start_slot: cur_slot, num_slots: 0 });
                    deletes.push(ProposedVcpi {
                        port: req.map_or(MstPortId(0), |r| r.port),
                        vcpi: payload.vcpi,
                        pbn: 0,
                        num_slots: 0,
                    });
                }
            }
        }

        for req in proposed.iter().filter(|p| p.num_slots != 0) {
            if next.iter().any(|p| p.vcpi == req.vcpi) {
                continue;
            }
            writes.push(PayloadWrite { vcpi: req.vcpi, start_slot: cur_slot, num_slots: req.num_slots });
            next.push(Payload {
                start_slot: cur_slot,
                num_slots: req.num_slots,
                vcpi: req.vcpi,
                state: PayloadState::Local,
            });
            cur_slot += req.num_slots;
        }

        next.resize(MAX_PAYLOADS, Payload::EMPTY);
        (next, writes, deletes)
    }

    fn write_payload(aux: &mut A, w: &PayloadWrite) -> Result<(), MstError> {
        write_dpcd_all(aux, dpcd::PAYLOAD_TABLE_UPDATE_STATUS, &[dpcd::PAYLOAD_TABLE_UPDATED])
            .map_err(part1_error)?;
        write_dpcd_all(aux, dpcd::PAYLOAD_ALLOCATE_SET, &[w.vcpi, w.start_slot, w.num_slots])
            .map_err(part1_error)?;

        for _ in 0..PAYLOAD_UPDATE_MAX_RETRY {
            let status = read_dpcd_byte(aux, dpcd::PAYLOAD_TABLE_UPDATE_STATUS).map_err(part1_error)?;
            if status & dpcd::PAYLOAD_TABLE_UPDATED != 0 {
                return Ok(());
            }
            aux.delay_us(PAYLOAD_UPDATE_INTERVAL_US);
        }
        Err(MstError::Part1Failed)
    }

    fn send_allocate_payload(aux: &mut A, p: &ProposedVcpi) -> Result<(), MstError> {
        let msg = [
            sideband::ALLOCATE_PAYLOAD,
            p.port.0 << 4,
            p.vcpi & 0x7f,
            (p.pbn >> 8) as u8,
            p.pbn as u8,
        ];
        write_dpcd_all(aux, dpcd::SIDEBAND_MSG_DOWN_REQ_BASE, &msg)?;
        Ok(())
    }
}

/// A deferring sink is busy, not broken.
fn part1_error(e: AuxError) -> MstError {
    match e {
        AuxError::Defer => MstError::Busy,
        e => MstError::Aux(e),
    }
}

impl<A: AuxTransport> MstTopologyManager for DpMstTopologyMgr<A> {
    fn payload_lock(&self) -> &Mutex<Vec<Payload>> {
        &self.payloads
    }

    fn pbn_div(&self) -> u32 {
        pbn_per_slot(self.link_rate, self.lane_count)
    }

    fn allocate_vcpi(&self, port: MstPortId, pbn: u32, slots: u8) -> Result<u8, MstError> {
        let mut proposed = self.proposed.lock();

        let used: u32 = proposed
            .iter()
            .filter(|p| p.port != port)
            .map(|p| p.num_slots as u32)
            .sum();
        if used + slots as u32 > MAX_MST_SLOTS {
            return Err(MstError::NoVcpiSlots);
        }

        if let Some(p) = proposed.iter_mut().find(|p| p.port == port) {
            p.pbn = pbn;
            p.num_slots = slots;
            return Ok(p.vcpi);
        }

        if proposed.len() >= MAX_PAYLOADS {
            return Err(MstError::NoVcpiSlots);
        }
        let vcpi = (1..=MAX_MST_SLOTS as u8)
            .find(|id| !proposed.iter().any(|p| p.vcpi == *id))
            .ok_or(MstError::NoVcpiSlots)?;

        proposed.push(ProposedVcpi { port, vcpi, pbn, num_slots: slots });
        dc_trace!("dc_mst: port {} vcpi {} pbn {} slots {}", port.0, vcpi, pbn, slots);
        Ok(vcpi)
    }

    fn reset_vcpi_slots(&self, port: MstPortId) {
        if let Some(p) = self.proposed.lock().iter_mut().find(|p| p.port == port) {
            p.num_slots = 0;
        }
    }

    fn deallocate_vcpi(&self, port: MstPortId) {
        let mut proposed = self.proposed.lock();
        // The id is free for reuse, so no delete for it may go out later
        if let Some(gone) = proposed.iter().find(|p| p.port == port).map(|p| p.vcpi) {
            self.pending_deletes.lock().retain(|d| d.vcpi != gone);
        }
        proposed.retain(|p| p.port != port);
    }

    fn update_payload_part1(&self) -> Result<(), MstError> {
        let (next, writes, deletes) = self.plan_part1();

        {
            let mut aux = self.aux.lock();
            for w in &writes {
                Self::write_payload(&mut aux, w)?;
            }
        }

        *self.payloads.lock() = next;
        self.pending_deletes.lock().extend(deletes);
        Ok(())
    }

    fn check_act_status(&self) -> Result<bool, MstError> {
        let status = read_dpcd_byte(&mut *self.aux.lock(), dpcd::PAYLOAD_TABLE_UPDATE_STATUS)?;
        Ok(status & dpcd::PAYLOAD_ACT_HANDLED != 0)
    }

    fn update_payload_part2(&self) -> Result<(), MstError> {
        let local: Vec<ProposedVcpi> = {
            let payloads = self.payloads.lock();
            let proposed = self.proposed.lock();
            payloads
                .iter()
                .filter(|p| p.state == PayloadState::Local)
                .filter_map(|p| proposed.iter().find(|r| r.vcpi == p.vcpi).copied())
                .collect()
        };
        let deletes = core::mem::take(&mut *self.pending_deletes.lock());

        {
            let mut aux = self.aux.lock();
            for p in deletes.iter().chain(local.iter()) {
                if let Err(e) = Self::send_allocate_payload(&mut aux, p) {
                    kprintln!("dc_mst: ALLOCATE_PAYLOAD vcpi {} failed: {:?}", p.vcpi, e);
                    return Err(MstError::Part2Failed);
                }
            }
        }

        let mut payloads = self.payloads.lock();
        for p in payloads.iter_mut() {
            if p.state == PayloadState::Local && local.iter().any(|l| l.vcpi == p.vcpi) {
                p.state = PayloadState::Remote;
            }
        }
        Ok(())
    }

    fn set_mst(&self, enable: bool) -> Result<(), MstError> {
        let ctrl = if enable {
            dpcd::MST_EN | dpcd::UP_REQ_EN | dpcd::UPSTREAM_IS_SRC
        } else {
            0
        };
        write_dpcd_all(&mut *self.aux.lock(), dpcd::MSTM_CTRL, &[ctrl])?;

        if !enable {
            *self.payloads.lock() = vec![Payload::EMPTY; MAX_PAYLOADS];
            self.proposed.lock().clear();
            self.pending_deletes.lock().clear();
        }
        self.mst_state.store(enable, Ordering::SeqCst);
        kprintln!("dc_mst: MST {}", if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    fn mst_enabled(&self) -> bool {
        self.mst_state.load(Ordering::SeqCst)
    }

    fn delay_us(&self, us: u32) {
        self.aux.lock().delay_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::dc::mst::{get_payload_table, MstStreamAllocator};
    use crate::drivers::dc::types::ColorDepth;
    use crate::drivers::dc::testing::{mst_link, mst_stream, MockAux};
    use crate::drivers::displayport::link_rate;

    #[test]
    fn test_pbn_div() {
        let mgr = DpMstTopologyMgr::new(MockAux::new(), link_rate::HBR, 2);
        assert_eq!(mgr.pbn_div(), 10);
    }

    #[test]
    fn test_set_mst_writes_mstm_ctrl() {
        let mgr = mst_link(MockAux::new());
        assert!(mgr.mst_enabled());
        assert_eq!(
            mgr.with_aux(|a| a.dpcd_byte(dpcd::MSTM_CTRL)),
            dpcd::MST_EN | dpcd::UP_REQ_EN | dpcd::UPSTREAM_IS_SRC
        );
        mgr.set_mst(false).unwrap();
        assert!(!mgr.mst_enabled());
        assert_eq!(mgr.with_aux(|a| a.dpcd_byte(dpcd::MSTM_CTRL)), 0);
    }

    #[test]
    fn test_payload_order_is_kept() {
        let mgr = mst_link(MockAux::new());
        let a = mgr.allocate_vcpi(MstPortId(1), 400, 10).unwrap();
        let b = mgr.allocate_vcpi(MstPortId(2), 200, 5).unwrap();
        mgr.update_payload_part1().unwrap();
        mgr.update_payload_part2().unwrap();

        // Free the first one, add a third: the survivor keeps its place
        mgr.reset_vcpi_slots(MstPortId(1));
        let c = mgr.allocate_vcpi(MstPortId(3), 120, 3).unwrap();
        mgr.update_payload_part1().unwrap();
        mgr.deallocate_vcpi(MstPortId(1));

        let payloads = mgr.payload_lock().lock().clone();
        assert_eq!(payloads[0].vcpi, b);
        assert_eq!(payloads[0].start_slot, 1);
        assert_eq!(payloads[0].state, PayloadState::Local);
        assert_eq!(payloads[1].vcpi, c);
        assert_eq!(payloads[1].start_slot, 6);
        assert_eq!(payloads[2], Payload::EMPTY);
        assert_ne!(a, c);

        let table = get_payload_table(&mgr);
        assert_eq!(table.stream_count(), 2);
        assert_eq!(table.total_slots(), 8);
    }

    #[test]
    fn test_slot_budget() {
        let mgr = mst_link(MockAux::new());
        mgr.allocate_vcpi(MstPortId(1), 2000, 50).unwrap();
        assert_eq!(mgr.allocate_vcpi(MstPortId(2), 800, 20), Err(MstError::NoVcpiSlots));
        // Re-sizing the same port does not count against itself
        assert!(mgr.allocate_vcpi(MstPortId(1), 2400, 60).is_ok());
    }

    #[test]
    fn test_rolled_back_delete_is_not_sent() {
        let mgr = mst_link(MockAux::new());
        let stream = mst_stream(1, ColorDepth::Depth888);
        let mut alloc = MstStreamAllocator::new(MstPortId(1));
        alloc.write_payload_allocation_table(&mgr, &stream, true).unwrap();
        alloc.poll_for_act(&mgr).unwrap();
        alloc.send_payload_allocation(&mgr, true).unwrap();

        // Disable times out waiting for ACT and gets rolled back
        mgr.with_aux(|a| a.auto_act = false);
        alloc.write_payload_allocation_table(&mgr, &stream, false).unwrap();
        assert_eq!(alloc.poll_for_act(&mgr), Err(MstError::ActTimeout));
        assert_eq!(mgr.allocated_vcpis(), 0);

        // A new stream reuses the VCPI id; only its allocation goes out
        mgr.with_aux(|a| {
            a.auto_act = true;
            a.sideband.clear();
        });
        let other = mst_stream(2, ColorDepth::Depth888);
        let mut next = MstStreamAllocator::new(MstPortId(2));
        next.write_payload_allocation_table(&mgr, &other, true).unwrap();
        next.poll_for_act(&mgr).unwrap();
        next.send_payload_allocation(&mgr, true).unwrap();
        assert_eq!(next.vcpi(), 1);

        let msgs = mgr.with_aux(|a| a.sideband.clone());
        assert_eq!(msgs, [vec![sideband::ALLOCATE_PAYLOAD, 0x20, 1, 0x02, 0x14]]);
    }

    #[test]
    fn test_part2_sends_sideband() {
        let mgr = mst_link(MockAux::new());
        let vcpi = mgr.allocate_vcpi(MstPortId(2), 532, 14).unwrap();
        mgr.update_payload_part1().unwrap();
        assert!(mgr.check_act_status().unwrap());
        mgr.update_payload_part2().unwrap();

        let msgs = mgr.with_aux(|a| a.sideband.clone());
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0], [sideband::ALLOCATE_PAYLOAD, 0x20, vcpi, 0x02, 0x14]);
    }
}
