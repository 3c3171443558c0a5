//! Display core
//!
//! Decides how a set of targets maps onto one DCE display engine: which
//! pipe, stream encoder, audio endpoint and clock source each stream gets,
//! whether the encoders, links and memory bandwidth can carry the result,
//! and how DP MST time slots are handed out on the way to the screen.
//!
//! ```text
//!   validate(sets) ──► ValidateContext ──► commit(ctx, hwss)
//!                                             │
//!                     MST teardown ◄──────────┤
//!                     HwSequencer::apply ◄────┤
//!                     MST allocation ◄────────┘
//! ```

pub mod adapter;
pub mod bandwidth;
pub mod clock_source;
pub mod config;
pub mod hw_param;
pub mod hwss;
pub mod link;
pub mod link_encoder;
pub mod mst;
pub mod mst_mgr;
pub mod pplib;
pub mod resource;
pub mod status;
pub mod stream_encoder;
pub mod timing_generator;
pub mod types;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

use alloc::sync::Arc;
use alloc::vec::Vec;

use adapter::AdapterService;
use bandwidth::{DceipCaps, VbiosCaps};
use hwss::HwSequencer;
use link::Link;
use mst::{MstError, StreamAllocationTable};
use pplib::PowerPlayClocks;
use resource::ResourcePool;
use types::Stream;

pub use config::DcConfig;
pub use status::{DcError, DcResult};
pub use types::ValidationSet;
pub use validate::ValidateContext;

use crate::kprintln;

/// One display engine and the links hanging off it.
pub struct Dc {
    config: DcConfig,
    pool: ResourcePool,
    links: Vec<Link>,
    /// What is on screen
    current_ctx: ValidateContext,
    dceip: DceipCaps,
    vbios: VbiosCaps,
}

impl Dc {
    pub fn construct(
        adapter: &dyn AdapterService,
        config: DcConfig,
        pplib: &dyn PowerPlayClocks,
        links: Vec<Link>,
    ) -> DcResult<Self> {
        crate::util::init_console();
        let pool = ResourcePool::construct(adapter, &config)?;

        let mut dceip = DceipCaps::carrizo();
        dceip.stutter_allowed = config.features.contains(config::DcFeatures::ALLOW_STUTTER);
        dceip.self_refresh_allowed = config.features.contains(config::DcFeatures::ALLOW_SELF_REFRESH);
        let mut vbios = VbiosCaps::carrizo();
        pplib::update_from_pplib(pplib, &mut vbios);

        let current_ctx = ValidateContext::new(&pool);
        kprintln!("dc: {:?} core up, {} links", config.dce_version, links.len());

        Ok(Self {
            config,
            pool,
            links,
            current_ctx,
            dceip,
            vbios,
        })
    }

    pub fn config(&self) -> &DcConfig {
        &self.config
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn current_context(&self) -> &ValidateContext {
        &self.current_ctx
    }

    /// Make `ctx` the current state.
    ///
    /// MST payloads of streams leaving the screen are torn down first, then
    /// the sequencer programs the hardware, then every MST stream still
    /// without a payload gets its time slots. A teardown failure is logged
    /// and does not stop the commit; a sequencer failure leaves the current
    /// context untouched. Streams whose allocation failed stay on screen
    /// and are retried on the next commit; the first such error is returned
    /// after all of them were tried.
    pub fn commit(&mut self, ctx: ValidateContext, hwss: &mut dyn HwSequencer) -> DcResult<()> {
        let removed: Vec<Arc<Stream>> = self
            .current_ctx
            .streams()
            .filter(|s| s.is_mst() && !ctx.contains_stream(s))
            .cloned()
            .collect();
        for stream in &removed {
            let Some(link) = self.links.get_mut(stream.sink.link_index) else {
                continue;
            };
            if !link.has_mst_payload(stream) {
                continue;
            }
            if let Err(e) = link.deallocate_mst_payload(stream) {
                kprintln!("dc: MST teardown on link {} failed ({})", link.index, e);
            }
        }

        hwss.apply_ctx_to_hw(&ctx)?;
        self.current_ctx = ctx;

        let mut pending: Vec<Arc<Stream>> = Vec::new();
        for s in self.current_ctx.streams().filter(|s| s.is_mst()) {
            let allocated = self
                .links
                .get(s.sink.link_index)
                .is_some_and(|l| l.has_mst_payload(s));
            if !allocated && !pending.iter().any(|p| Arc::ptr_eq(p, s)) {
                pending.push(s.clone());
            }
        }

        let mut first_err = None;
        for stream in &pending {
            let res = match self.links.get_mut(stream.sink.link_index) {
                Some(link) => link.allocate_mst_payload(stream),
                None => Err(DcError::ErrorUnexpected),
            };
            if let Err(e) = res {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn link_for(&mut self, stream: &Stream) -> Result<&mut Link, MstError> {
        self.links.get_mut(stream.sink.link_index).ok_or(MstError::NoConnector)
    }

    pub fn write_payload_allocation_table(
        &mut self,
        stream: &Stream,
        enable: bool,
    ) -> DcResult<StreamAllocationTable> {
        Ok(self.link_for(stream)?.write_payload_allocation_table(stream, enable)?)
    }

    pub fn poll_for_act(&mut self, stream: &Stream) -> DcResult<()> {
        Ok(self.link_for(stream)?.poll_for_act(stream)?)
    }

    pub fn send_payload_allocation(&mut self, stream: &Stream, enable: bool) -> DcResult<()> {
        Ok(self.link_for(stream)?.send_payload_allocation(stream, enable)?)
    }

    pub fn start_topology_manager(&self, link_index: usize, boot: bool) -> DcResult<()> {
        let link = self.links.get(link_index).ok_or(DcError::ErrorUnexpected)?;
        Ok(link.start_topology_manager(boot)?)
    }

    pub fn stop_topology_manager(&self, link_index: usize) -> DcResult<()> {
        let link = self.links.get(link_index).ok_or(DcError::ErrorUnexpected)?;
        Ok(link.stop_topology_manager()?)
    }
}
