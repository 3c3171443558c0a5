//! Resource pool and pipe allocation
//!
//! [`ResourcePool`] is the fixed inventory of one display engine. Everything
//! that changes while a mode set is being tried (which pipe drives what,
//! which stream encoders and audio endpoints are taken, clock source
//! reference counts) lives in a [`ResourceContext`], so a rejected attempt is
//! simply dropped.
//!
//! Pipe `i` always uses timing generator, fetch unit, IPP, transform and OPP
//! `i`. The underlay pipe sits after the regular ones and only takes video
//! planes.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::adapter::{self, AdapterService};
use super::clock_source::{ClockSource, ClockSourceId, PixelClockParams, PllSettings};
use super::config::{DcConfig, DcFeatures};
use super::hw_param::{BitDepthReductionParams, ClampingParams, ScalerData};
use super::link::Link;
use super::status::{DcError, DcResult};
use super::stream_encoder::{Audio, EngineId, StreamEncoder};
use super::timing_generator::{TgCaps, TimingGenerator};
use super::types::{SignalType, Stream, Surface, Target};
use crate::{dc_trace, kprintln};

/// Most pipes any supported engine has (underlay included)
pub const MAX_PIPES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInput {
    pub inst: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipp {
    pub inst: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    pub inst: usize,
    pub max_taps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opp {
    pub inst: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayClock {
    pub max_clk_khz: u32,
}

#[derive(Debug, Clone)]
pub struct ResourcePool {
    /// Pipes including the underlay
    pub pipe_count: usize,
    pub timing_generators: Vec<TimingGenerator>,
    pub mem_inputs: Vec<MemInput>,
    pub ipps: Vec<Ipp>,
    pub transforms: Vec<Transform>,
    pub opps: Vec<Opp>,
    pub stream_encoders: Vec<StreamEncoder>,
    /// PLLs
    pub clock_sources: Vec<ClockSource>,
    /// External DP reference, when firmware reports one
    pub dp_clock_source: Option<ClockSource>,
    pub display_clock: DisplayClock,
    pub audios: Vec<Audio>,
    pub underlay_pipe_index: Option<usize>,
}

impl ResourcePool {
    /// Build the inventory from `adapter` caps and `config`.
    ///
    /// Sub-resources are collected into owned vectors; on error the partial
    /// pool is just dropped.
    pub fn construct(adapter: &dyn AdapterService, config: &DcConfig) -> DcResult<Self> {
        let controllers = adapter::controllers_num(adapter, config);
        let total = controllers + config.dce_version.has_underlay() as usize;
        if controllers == 0 || total > MAX_PIPES {
            kprintln!("dc: bad controller count {}", controllers);
            return Err(DcError::ErrorUnexpected);
        }

        let fw = adapter.firmware_info();
        let dp_clock_source = match fw.external_clock_source_frequency_for_dp_khz {
            0 => None,
            khz => Some(ClockSource::new(ClockSourceId::External, khz)),
        };

        let plls = adapter::clock_sources_num(adapter, config).saturating_sub(dp_clock_source.is_some() as usize);
        let clock_sources: Vec<ClockSource> = (0..plls)
            .map_while(ClockSourceId::from_pll_index)
            .map(|id| ClockSource::new(id, fw.pll_reference_frequency_khz))
            .collect();
        if clock_sources.is_empty() && dp_clock_source.is_none() {
            kprintln!("dc: no clock sources");
            return Err(DcError::ErrorUnexpected);
        }

        let mut stream_encoders: Vec<StreamEncoder> = EngineId::from_mask(adapter.stream_engine_mask())
            .map(StreamEncoder::new)
            .collect();
        for _ in 0..config.num_virtual_links {
            stream_encoders.push(StreamEncoder::new(EngineId::Virtual));
        }

        let audios = (0..adapter.audio_endpoints_num()).map(|inst| Audio { inst }).collect();

        let mut pool = Self {
            pipe_count: controllers,
            timing_generators: (0..controllers).map(|i| TimingGenerator::new(i, TgCaps::DCE110)).collect(),
            mem_inputs: (0..controllers).map(|inst| MemInput { inst }).collect(),
            ipps: (0..controllers).map(|inst| Ipp { inst }).collect(),
            transforms: (0..controllers).map(|inst| Transform { inst, max_taps: 4 }).collect(),
            opps: (0..controllers).map(|inst| Opp { inst }).collect(),
            stream_encoders,
            clock_sources,
            dp_clock_source,
            display_clock: DisplayClock {
                max_clk_khz: fw.default_display_engine_pll_frequency_khz,
            },
            audios,
            underlay_pipe_index: None,
        };

        if config.dce_version.has_underlay() {
            pool.underlay_create();
        }

        kprintln!(
            "dc: pool {} pipes (underlay {:?}), {} stream encoders, {} PLLs{}, {} audio",
            pool.pipe_count,
            pool.underlay_pipe_index,
            pool.stream_encoders.len(),
            pool.clock_sources.len(),
            if pool.dp_clock_source.is_some() { " + ext DP" } else { "" },
            pool.audios.len()
        );
        Ok(pool)
    }

    /// Append the video pipe.
    fn underlay_create(&mut self) {
        let idx = self.pipe_count;
        self.timing_generators.push(TimingGenerator::new(idx, TgCaps::DCE110_UNDERLAY));
        self.mem_inputs.push(MemInput { inst: idx });
        self.ipps.push(Ipp { inst: idx });
        self.transforms.push(Transform { inst: idx, max_taps: 2 });
        self.opps.push(Opp { inst: idx });
        self.underlay_pipe_index = Some(idx);
        self.pipe_count += 1;
    }

    /// Pipes available to primary planes.
    pub fn standard_pipe_count(&self) -> usize {
        self.pipe_count - self.underlay_pipe_index.is_some() as usize
    }

    pub fn clock_source(&self, r: ClockSourceRef) -> Option<&ClockSource> {
        match r {
            ClockSourceRef::Pll(i) => self.clock_sources.get(i),
            ClockSourceRef::External => self.dp_clock_source.as_ref(),
        }
    }
}

/// Which clock source a pipe uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSourceRef {
    Pll(usize),
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneClass {
    Primary,
    Video,
}

/// Binding of one pipe.
#[derive(Debug, Clone, Default)]
pub struct PipeCtx {
    pub pipe_idx: usize,
    pub stream: Option<Arc<Stream>>,
    pub surface: Option<Arc<Surface>>,
    pub tg: Option<usize>,
    pub mi: Option<usize>,
    pub ipp: Option<usize>,
    pub xfm: Option<usize>,
    pub opp: Option<usize>,
    pub stream_enc: Option<usize>,
    pub audio: Option<usize>,
    pub clock_source: Option<ClockSourceRef>,
    pub pix_clk_params: Option<PixelClockParams>,
    pub pll_settings: PllSettings,
    pub bit_depth_params: BitDepthReductionParams,
    pub clamping: ClampingParams,
    pub scl_data: ScalerData,
    /// Head pipe when this one blends a lower layer
    pub top_pipe: Option<usize>,
    pub bottom_pipe: Option<usize>,
}

impl PipeCtx {
    pub fn new(pipe_idx: usize) -> Self {
        Self { pipe_idx, ..Self::default() }
    }

    pub fn is_free(&self) -> bool {
        self.stream.is_none()
    }

    /// First pipe of its stream (not a blended layer).
    pub fn is_head(&self) -> bool {
        self.stream.is_some() && self.top_pipe.is_none()
    }

    pub fn drives(&self, stream: &Arc<Stream>) -> bool {
        self.stream.as_ref().map_or(false, |s| Arc::ptr_eq(s, stream))
    }

    fn bind(&mut self, idx: usize, stream: &Arc<Stream>) {
        *self = PipeCtx::new(idx);
        self.stream = Some(stream.clone());
        self.tg = Some(idx);
        self.mi = Some(idx);
        self.ipp = Some(idx);
        self.xfm = Some(idx);
        self.opp = Some(idx);
    }
}

/// Acquisition state of one mode set attempt.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    pub pipe_ctx: Vec<PipeCtx>,
    pub stream_enc_acquired: Vec<bool>,
    pub audio_acquired: Vec<bool>,
    pub clock_source_ref_count: Vec<u32>,
    pub dp_clock_source_ref_count: u32,
}

impl ResourceContext {
    pub fn new(pool: &ResourcePool) -> Self {
        Self {
            pipe_ctx: (0..pool.pipe_count).map(PipeCtx::new).collect(),
            stream_enc_acquired: alloc::vec![false; pool.stream_encoders.len()],
            audio_acquired: alloc::vec![false; pool.audios.len()],
            clock_source_ref_count: alloc::vec![0; pool.clock_sources.len()],
            dp_clock_source_ref_count: 0,
        }
    }

    /// Total clock source references held.
    pub fn clock_source_refs(&self) -> u32 {
        self.clock_source_ref_count.iter().sum::<u32>() + self.dp_clock_source_ref_count
    }

    pub fn bound_pipes(&self) -> impl Iterator<Item = &PipeCtx> {
        self.pipe_ctx.iter().filter(|p| !p.is_free())
    }

    pub fn head_pipe_idx(&self, stream: &Arc<Stream>) -> Option<usize> {
        self.pipe_ctx.iter().position(|p| p.is_head() && p.drives(stream))
    }

    /// Bind a free pipe of `plane` class to `stream`.
    ///
    /// Primary planes get the lowest free regular pipe, video planes the
    /// underlay pipe if it is free.
    pub fn acquire_pipe(&mut self, pool: &ResourcePool, stream: &Arc<Stream>, plane: PlaneClass) -> Option<usize> {
        let idx = match plane {
            PlaneClass::Primary => (0..pool.pipe_count)
                .filter(|i| Some(*i) != pool.underlay_pipe_index)
                .find(|i| self.pipe_ctx[*i].is_free())?,
            PlaneClass::Video => {
                let u = pool.underlay_pipe_index?;
                if !self.pipe_ctx[u].is_free() {
                    return None;
                }
                u
            }
        };

        self.pipe_ctx[idx].bind(idx, stream);
        Some(idx)
    }

    /// Underlay pipe for the second layer of `head`'s stream.
    ///
    /// Returns `None` when the underlay already carries a stream; a binding
    /// kept from the current context is not reclaimed here.
    pub fn acquire_idle_pipe_for_layer(&mut self, pool: &ResourcePool, head: usize) -> Option<usize> {
        let stream = self.pipe_ctx.get(head)?.stream.clone()?;
        let idx = self.acquire_pipe(pool, &stream, PlaneClass::Video)?;

        let (clock_source, stream_enc) = (self.pipe_ctx[head].clock_source, self.pipe_ctx[head].stream_enc);
        let pipe = &mut self.pipe_ctx[idx];
        pipe.clock_source = clock_source;
        pipe.stream_enc = stream_enc;
        pipe.top_pipe = Some(head);
        self.pipe_ctx[head].bottom_pipe = Some(idx);
        Some(idx)
    }

    /// Drop a layer pipe and unlink it from its head.
    pub fn release_layer_pipe(&mut self, idx: usize) {
        if let Some(top) = self.pipe_ctx[idx].top_pipe {
            self.pipe_ctx[top].bottom_pipe = None;
        }
        self.pipe_ctx[idx] = PipeCtx::new(idx);
    }

    /// Free stream encoder for `stream` on `link`.
    ///
    /// The link encoder's own engine wins; DP may fall back to any free DIG
    /// and virtual signals take a virtual encoder.
    fn acquire_stream_encoder(&mut self, pool: &ResourcePool, link: &Link, stream: &Stream) -> Option<usize> {
        let free = |i: &usize| !self.stream_enc_acquired[*i];
        let encs = &pool.stream_encoders;

        let idx = if stream.signal == SignalType::Virtual || stream.signal == SignalType::Wireless {
            (0..encs.len()).filter(free).find(|i| encs[*i].is_virtual())
        } else {
            let preferred = link.encoder.preferred_engine();
            (0..encs.len()).filter(free).find(|i| encs[*i].id == preferred).or_else(|| {
                if stream.signal.is_dp() {
                    (0..encs.len()).filter(free).find(|i| !encs[*i].is_virtual())
                } else {
                    None
                }
            })
        }?;

        self.stream_enc_acquired[idx] = true;
        Some(idx)
    }

    fn acquire_audio(&mut self) -> Option<usize> {
        let idx = self.audio_acquired.iter().position(|taken| !taken)?;
        self.audio_acquired[idx] = true;
        Some(idx)
    }

    /// Bind pipes, stream encoders and audio for every stream of `targets`.
    ///
    /// Streams already driven in `current` keep their pipes (layer pipes
    /// included). No clock source is referenced here.
    pub fn map_pool_resources(
        &mut self,
        pool: &ResourcePool,
        links: &[Link],
        targets: &[Arc<Target>],
        current: Option<&ResourceContext>,
    ) -> DcResult<()> {
        let streams = || targets.iter().flat_map(|t| t.streams.iter());

        if let Some(cur) = current {
            for stream in streams() {
                for old in cur.pipe_ctx.iter().filter(|p| p.drives(stream)) {
                    let idx = old.pipe_idx;
                    self.pipe_ctx[idx] = old.clone();
                    if let Some(enc) = old.stream_enc.filter(|_| old.top_pipe.is_none()) {
                        self.stream_enc_acquired[enc] = true;
                    }
                    if let Some(audio) = old.audio {
                        self.audio_acquired[audio] = true;
                    }
                }
            }
        }

        for stream in streams() {
            if current.map_or(false, |cur| is_stream_unchanged(cur, stream)) {
                continue;
            }

            let idx = match self.acquire_pipe(pool, stream, PlaneClass::Primary) {
                Some(idx) => idx,
                None => {
                    kprintln!("dc: no free pipe for {}x{}", stream.timing.h_addressable, stream.timing.v_addressable);
                    return Err(DcError::FailControllerValidate);
                }
            };

            let link = links.get(stream.sink.link_index).ok_or(DcError::ErrorUnexpected)?;
            let enc = self
                .acquire_stream_encoder(pool, link, stream)
                .ok_or(DcError::NoStreamEncResource)?;
            self.pipe_ctx[idx].stream_enc = Some(enc);

            if stream.sink.audio_capable && stream.signal.has_audio() {
                self.pipe_ctx[idx].audio = self.acquire_audio();
            }

            dc_trace!("dc: pipe {} <- stream enc {:?}", idx, pool.stream_encoders[enc].id);
        }

        Ok(())
    }

    fn reference_clock_source(&mut self, r: ClockSourceRef) {
        match r {
            ClockSourceRef::Pll(i) => self.clock_source_ref_count[i] += 1,
            ClockSourceRef::External => self.dp_clock_source_ref_count += 1,
        }
    }

    /// A PLL already driving a stream `pipe` can lock to.
    fn find_used_clk_src_for_sharing(&self, pool: &ResourcePool, idx: usize) -> Option<ClockSourceRef> {
        let stream = self.pipe_ctx[idx].stream.as_ref()?;
        self.pipe_ctx
            .iter()
            .filter(|p| p.pipe_idx != idx && p.is_head())
            .find(|p| match (p.clock_source, p.stream.as_ref()) {
                (Some(r @ ClockSourceRef::Pll(_)), Some(other)) => {
                    pool.clock_source(r).map_or(false, |cs| cs.supports_signal(stream.signal))
                        && is_sharable_clk_src(other, stream)
                }
                _ => false,
            })
            .and_then(|p| p.clock_source)
    }

    fn find_first_free_pll(&self, pool: &ResourcePool, signal: SignalType) -> Option<ClockSourceRef> {
        (0..pool.clock_sources.len())
            .find(|i| self.clock_source_ref_count[*i] == 0 && pool.clock_sources[*i].supports_signal(signal))
            .map(ClockSourceRef::Pll)
    }

    /// Pick and reference clock sources for every head pipe.
    ///
    /// Pipes kept from the current context re-reference their own source
    /// first so new streams cannot take it.
    pub fn map_clock_resources(
        &mut self,
        pool: &ResourcePool,
        config: &DcConfig,
        current: Option<&ResourceContext>,
    ) -> DcResult<()> {
        let heads: Vec<usize> = (0..self.pipe_ctx.len()).filter(|i| self.pipe_ctx[*i].is_head()).collect();
        let unchanged = |ctx: &Self, i: usize| {
            let stream = ctx.pipe_ctx[i].stream.as_ref();
            match (current, stream) {
                (Some(cur), Some(s)) => is_stream_unchanged(cur, s),
                _ => false,
            }
        };

        for &i in &heads {
            if unchanged(self, i) {
                let r = self.pipe_ctx[i].clock_source.ok_or(DcError::ErrorUnexpected)?;
                self.reference_clock_source(r);
            }
        }

        for &i in &heads {
            if unchanged(self, i) {
                continue;
            }
            let signal = self.pipe_ctx[i].stream.as_ref().map_or(SignalType::None, |s| s.signal);

            let mut source = None;
            if (signal.is_dp() || signal == SignalType::Virtual) && pool.dp_clock_source.is_some() {
                source = Some(ClockSourceRef::External);
            }
            if source.is_none() && !signal.is_dp() && !config.features.contains(DcFeatures::DISABLE_CLOCK_SHARING) {
                source = self.find_used_clk_src_for_sharing(pool, i);
            }
            if source.is_none() {
                source = self.find_first_free_pll(pool, signal);
            }

            let r = match source {
                Some(r) => r,
                None => {
                    kprintln!("dc: no clock source for pipe {}", i);
                    return Err(DcError::NoClockSourceResource);
                }
            };
            self.pipe_ctx[i].clock_source = Some(r);
            self.reference_clock_source(r);
            dc_trace!("dc: pipe {} clock {:?}", i, r);
        }

        Ok(())
    }

    /// Clone the first head pipe onto free pipes below `count`.
    ///
    /// Used by guaranteed validation to check the mode on as many displays
    /// as the engine can drive. Each copy references its clock source.
    pub fn replicate_head_pipe(&mut self, count: usize) -> usize {
        let Some(first) = self.pipe_ctx.iter().find(|p| p.is_head()).cloned() else {
            return 0;
        };

        let mut copied = 0;
        for i in 0..count.min(self.pipe_ctx.len()) {
            if !self.pipe_ctx[i].is_free() {
                continue;
            }
            let mut pipe = first.clone();
            pipe.pipe_idx = i;
            pipe.tg = Some(i);
            pipe.mi = Some(i);
            pipe.ipp = Some(i);
            pipe.xfm = Some(i);
            pipe.opp = Some(i);
            pipe.top_pipe = None;
            pipe.bottom_pipe = None;
            if let Some(r) = pipe.clock_source {
                self.reference_clock_source(r);
            }
            self.pipe_ctx[i] = pipe;
            copied += 1;
        }
        copied
    }

    /// Put each set's surfaces on its streams' pipes.
    ///
    /// The first surface goes on every head pipe of the target, a second
    /// (video) surface on the underlay below the first stream. An empty set
    /// leaves whatever was carried over from the current context.
    pub fn attach_surfaces(
        &mut self,
        pool: &ResourcePool,
        target: &Target,
        surfaces: &[Arc<Surface>],
    ) -> DcResult<()> {
        if surfaces.is_empty() {
            return Ok(());
        }

        for (n, stream) in target.streams.iter().enumerate() {
            let head = self.head_pipe_idx(stream).ok_or(DcError::FailAttachSurfaces)?;
            self.pipe_ctx[head].surface = Some(surfaces[0].clone());

            let layer = self.pipe_ctx[head].bottom_pipe;
            match (surfaces.get(1), n) {
                (Some(video), 0) => {
                    let idx = match layer {
                        Some(idx) => idx,
                        None => self
                            .acquire_idle_pipe_for_layer(pool, head)
                            .ok_or(DcError::FailAttachSurfaces)?,
                    };
                    self.pipe_ctx[idx].surface = Some(video.clone());
                }
                _ => {
                    if let Some(idx) = layer {
                        self.release_layer_pipe(idx);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Is `stream` driven, as the same object, by `current`?
pub fn is_stream_unchanged(current: &ResourceContext, stream: &Arc<Stream>) -> bool {
    current.pipe_ctx.iter().any(|p| p.is_head() && p.drives(stream))
}

/// Two streams can run off one PLL when their timings lock together.
fn is_sharable_clk_src(with_clk: &Stream, stream: &Stream) -> bool {
    if with_clk.signal == SignalType::Virtual || with_clk.signal.is_dp() {
        return false;
    }
    if (with_clk.signal == SignalType::HdmiTypeA && stream.signal.is_dvi())
        || (stream.signal == SignalType::HdmiTypeA && with_clk.signal.is_dvi())
    {
        return false;
    }
    are_streams_timing_synchronizable(with_clk, stream)
}

pub fn are_streams_timing_synchronizable(a: &Stream, b: &Stream) -> bool {
    let (ta, tb) = (&a.timing, &b.timing);
    if ta.h_total != tb.h_total
        || ta.v_total != tb.v_total
        || ta.h_addressable != tb.h_addressable
        || ta.v_addressable != tb.v_addressable
        || ta.pix_clk_khz != tb.pix_clk_khz
    {
        return false;
    }
    // HDMI deep color changes the TMDS rate
    if ta.display_color_depth != tb.display_color_depth && !(a.signal.is_dp() && b.signal.is_dp()) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::dc::adapter::StaticAdapterService;
    use crate::drivers::dc::config::DceVersion;
    use crate::drivers::dc::testing::{hdmi_stream, test_links};
    use crate::drivers::dc::types::{CrtcTiming, Sink, SurfacePixelFormat};

    fn pool(controllers: usize) -> ResourcePool {
        let asic = StaticAdapterService::carrizo().with_controllers(controllers);
        ResourcePool::construct(&asic, &DcConfig::default()).unwrap()
    }

    #[test]
    fn test_pool_construct() {
        let p = pool(3);
        assert_eq!(p.pipe_count, 4);
        assert_eq!(p.underlay_pipe_index, Some(3));
        assert_eq!(p.standard_pipe_count(), 3);
        assert_eq!(p.stream_encoders.len(), 6);
        assert_eq!(p.clock_sources.len(), 2);
        assert!(p.dp_clock_source.is_none());
        assert_eq!(p.timing_generators[3].caps, TgCaps::DCE110_UNDERLAY);
    }

    #[test]
    fn test_pool_external_dp_and_virtual() {
        let asic = StaticAdapterService::carrizo().with_external_dp_clock(600000);
        let cfg = DcConfig {
            dce_version: DceVersion::Dce112,
            num_virtual_links: 2,
            ..DcConfig::default()
        };
        let p = ResourcePool::construct(&asic, &cfg).unwrap();
        assert_eq!(p.pipe_count, 3);
        assert_eq!(p.underlay_pipe_index, None);
        assert!(p.dp_clock_source.is_some());
        assert_eq!(p.clock_sources.len(), 2);
        assert_eq!(p.stream_encoders.iter().filter(|e| e.is_virtual()).count(), 2);
    }

    #[test]
    fn test_pool_rejects_no_controllers() {
        let asic = StaticAdapterService::carrizo().with_controllers(0);
        assert_eq!(
            ResourcePool::construct(&asic, &DcConfig::default()).unwrap_err(),
            DcError::ErrorUnexpected
        );
    }

    #[test]
    fn test_pipe_uniqueness() {
        for n in 1..MAX_PIPES {
            let p = pool(n);
            let mut ctx = ResourceContext::new(&p);
            let mut seen = Vec::new();
            for _ in 0..n {
                let stream = hdmi_stream(0, CrtcTiming::new(1920, 1080, 60));
                let idx = ctx.acquire_pipe(&p, &stream, PlaneClass::Primary).unwrap();
                assert_ne!(Some(idx), p.underlay_pipe_index);
                assert!(!seen.contains(&idx));
                seen.push(idx);
            }
            let extra = hdmi_stream(0, CrtcTiming::new(1920, 1080, 60));
            assert_eq!(ctx.acquire_pipe(&p, &extra, PlaneClass::Primary), None);
        }
    }

    #[test]
    fn test_underlay_single_owner() {
        let p = pool(3);
        let mut ctx = ResourceContext::new(&p);
        let a = hdmi_stream(0, CrtcTiming::new(1920, 1080, 60));
        let head = ctx.acquire_pipe(&p, &a, PlaneClass::Primary).unwrap();
        assert_eq!(ctx.acquire_idle_pipe_for_layer(&p, head), Some(3));
        assert_eq!(ctx.pipe_ctx[head].bottom_pipe, Some(3));
        assert_eq!(ctx.pipe_ctx[3].top_pipe, Some(head));
        assert_eq!(ctx.acquire_idle_pipe_for_layer(&p, head), None);

        ctx.release_layer_pipe(3);
        assert!(ctx.pipe_ctx[3].is_free());
        assert_eq!(ctx.pipe_ctx[head].bottom_pipe, None);
    }

    #[test]
    fn test_no_free_pipe_takes_no_clock() {
        let p = pool(1);
        let links = test_links(2);
        let targets = [
            Target::single(hdmi_stream(0, CrtcTiming::new(1920, 1080, 60))),
            Target::single(hdmi_stream(1, CrtcTiming::new(1920, 1080, 60))),
        ];
        let mut ctx = ResourceContext::new(&p);
        assert_eq!(
            ctx.map_pool_resources(&p, &links, &targets, None),
            Err(DcError::FailControllerValidate)
        );
        assert_eq!(ctx.clock_source_refs(), 0);
    }

    #[test]
    fn test_clock_sharing() {
        let p = pool(3);
        let links = test_links(3);
        let t = CrtcTiming::new(1920, 1080, 60);
        let targets = [
            Target::single(hdmi_stream(0, t)),
            Target::single(hdmi_stream(1, t)),
            Target::single(hdmi_stream(2, CrtcTiming::new(1280, 720, 60))),
        ];
        let mut ctx = ResourceContext::new(&p);
        ctx.map_pool_resources(&p, &links, &targets, None).unwrap();
        ctx.map_clock_resources(&p, &DcConfig::default(), None).unwrap();

        assert_eq!(ctx.pipe_ctx[0].clock_source, Some(ClockSourceRef::Pll(0)));
        assert_eq!(ctx.pipe_ctx[1].clock_source, Some(ClockSourceRef::Pll(0)));
        assert_eq!(ctx.pipe_ctx[2].clock_source, Some(ClockSourceRef::Pll(1)));
        assert_eq!(ctx.clock_source_ref_count, [2, 1]);

        let cfg = DcConfig {
            features: DcFeatures::DISABLE_CLOCK_SHARING,
            ..DcConfig::default()
        };
        let mut ctx = ResourceContext::new(&p);
        ctx.map_pool_resources(&p, &links, &targets, None).unwrap();
        assert_eq!(ctx.map_clock_resources(&p, &cfg, None), Err(DcError::NoClockSourceResource));
    }

    #[test]
    fn test_stream_encoder_prefers_link_engine() {
        let p = pool(3);
        let links = test_links(3);
        let targets = [Target::single(hdmi_stream(2, CrtcTiming::new(1920, 1080, 60)))];
        let mut ctx = ResourceContext::new(&p);
        ctx.map_pool_resources(&p, &links, &targets, None).unwrap();
        let enc = ctx.pipe_ctx[0].stream_enc.unwrap();
        assert_eq!(p.stream_encoders[enc].id, EngineId::DigC);
    }

    #[test]
    fn test_unchanged_stream_keeps_pipe() {
        let p = pool(3);
        let links = test_links(3);
        let kept = hdmi_stream(1, CrtcTiming::new(1920, 1080, 60));
        let first = [Target::single(kept.clone())];
        let mut cur = ResourceContext::new(&p);
        cur.map_pool_resources(&p, &links, &first, None).unwrap();
        cur.map_clock_resources(&p, &DcConfig::default(), None).unwrap();

        let added = Stream::new(Sink::new(0, SignalType::HdmiTypeA), CrtcTiming::new(1280, 720, 60));
        let second = [Target::single(added.clone()), Target::single(kept.clone())];
        let mut ctx = ResourceContext::new(&p);
        ctx.map_pool_resources(&p, &links, &second, Some(&cur)).unwrap();
        ctx.map_clock_resources(&p, &DcConfig::default(), Some(&cur)).unwrap();

        assert!(ctx.pipe_ctx[0].drives(&kept));
        assert!(ctx.pipe_ctx[1].drives(&added));
        assert_eq!(ctx.pipe_ctx[0].clock_source, cur.pipe_ctx[0].clock_source);
        assert_ne!(ctx.pipe_ctx[1].clock_source, ctx.pipe_ctx[0].clock_source);
        assert_eq!(ctx.clock_source_refs(), 2);
    }

    #[test]
    fn test_attach_video_surface() {
        let p = pool(3);
        let links = test_links(1);
        let stream = hdmi_stream(0, CrtcTiming::new(1920, 1080, 60));
        let target = Target::single(stream);
        let mut ctx = ResourceContext::new(&p);
        ctx.map_pool_resources(&p, &links, &[target.clone()], None).unwrap();

        let primary = Surface::new(SurfacePixelFormat::GrphArgb8888, 1920, 1080);
        let video = Surface::new(SurfacePixelFormat::VideoYCbCr420, 1280, 720);
        ctx.attach_surfaces(&p, &target, &[primary.clone(), video]).unwrap();
        assert_eq!(ctx.pipe_ctx[0].bottom_pipe, Some(3));
        assert!(ctx.pipe_ctx[3].surface.as_ref().unwrap().format.is_video());

        // Dropping the video plane releases the underlay
        ctx.attach_surfaces(&p, &target, &[primary]).unwrap();
        assert!(ctx.pipe_ctx[3].is_free());
    }
}
