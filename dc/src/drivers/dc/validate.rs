//! Mode validation
//!
//! Every attempt runs on its own [`ValidateContext`]; the current context is
//! only read (to keep unchanged streams where they are), so a rejected
//! attempt leaves nothing behind. Steps short-circuit on the first failure:
//! surface sets, pool and clock mapping, surface attach, per-pipe checks,
//! scaling, bandwidth.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::bandwidth::{bw_calcs, BwResults};
use super::hw_param::{build_pipe_hw_param, build_scaling_params};
use super::resource::{is_stream_unchanged, PipeCtx, ResourceContext, ResourcePool};
use super::status::{DcError, DcResult};
use super::types::{PixelEncoding, Stream, Surface, Target, ValidationSet};
use super::Dc;
use crate::{dc_trace, kprintln};

/// Largest secondary (video) surface
const MAX_UNDERLAY_WIDTH: u32 = 1920;
const MAX_UNDERLAY_HEIGHT: u32 = 1080;
/// Surfaces per target: one graphics plane plus one video plane
const MAX_SURFACES_PER_TARGET: usize = 2;

/// Result of one validation attempt.
#[derive(Debug, Clone)]
pub struct ValidateContext {
    pub targets: Vec<Arc<Target>>,
    /// Surfaces attached to `targets[i]`
    pub target_surfaces: Vec<Vec<Arc<Surface>>>,
    pub res_ctx: ResourceContext,
    pub bw_results: BwResults,
}

impl ValidateContext {
    pub fn new(pool: &ResourcePool) -> Self {
        Self {
            targets: Vec::new(),
            target_surfaces: Vec::new(),
            res_ctx: ResourceContext::new(pool),
            bw_results: BwResults::default(),
        }
    }

    pub fn streams(&self) -> impl Iterator<Item = &Arc<Stream>> {
        self.targets.iter().flat_map(|t| t.streams.iter())
    }

    pub fn contains_stream(&self, stream: &Arc<Stream>) -> bool {
        self.targets.iter().any(|t| t.contains(stream))
    }

    fn surfaces_of(&self, target: &Arc<Target>) -> Option<&Vec<Arc<Surface>>> {
        let idx = self.targets.iter().position(|t| Arc::ptr_eq(t, target))?;
        self.target_surfaces.get(idx)
    }
}

/// Shape checks on the requested surface sets.
///
/// Per set: at most two surfaces; the first is a graphics format covering
/// the stream's source exactly; a second one must be video, no larger than
/// 1920x1080 and the stream must be RGB.
pub fn validate_surface_sets(sets: &[ValidationSet]) -> bool {
    for set in sets {
        if set.surfaces.is_empty() {
            continue;
        }
        if set.surfaces.len() > MAX_SURFACES_PER_TARGET {
            return false;
        }
        let Some(stream) = set.target.streams.first() else {
            return false;
        };

        let primary = &set.surfaces[0];
        if primary.src_rect.width != stream.src.width || primary.src_rect.height != stream.src.height {
            return false;
        }
        if primary.format.is_video() {
            return false;
        }

        if let Some(video) = set.surfaces.get(1) {
            if !video.format.is_video() {
                return false;
            }
            if video.src_rect.width > MAX_UNDERLAY_WIDTH || video.src_rect.height > MAX_UNDERLAY_HEIGHT {
                return false;
            }
            if stream.timing.pixel_encoding != PixelEncoding::Rgb {
                return false;
            }
        }
    }
    true
}

/// The underlay pipe scans out video formats only.
pub fn is_surface_pixel_format_supported(pipe: &PipeCtx, underlay_idx: Option<usize>) -> bool {
    if Some(pipe.pipe_idx) != underlay_idx {
        return true;
    }
    pipe.surface.as_ref().map_or(false, |s| s.format.is_video())
}

impl Dc {
    /// Check that `sets` can be driven, and how.
    pub fn validate(&self, sets: &[ValidationSet]) -> DcResult<ValidateContext> {
        let mut ctx = ValidateContext::new(&self.pool);
        self.validate_with_context(sets, &mut ctx)?;
        Ok(ctx)
    }

    /// [`Dc::validate`] on a caller supplied context, which holds the
    /// partial state when validation fails.
    pub fn validate_with_context(&self, sets: &[ValidationSet], ctx: &mut ValidateContext) -> DcResult<()> {
        if !validate_surface_sets(sets) {
            return Err(DcError::FailSurfaceValidate);
        }

        ctx.targets = sets.iter().map(|s| s.target.clone()).collect();
        let current = Some(&self.current_ctx.res_ctx);

        ctx.res_ctx.map_pool_resources(&self.pool, &self.links, &ctx.targets, current)?;
        ctx.res_ctx.map_clock_resources(&self.pool, &self.config, current)?;

        self.attach_surfaces(sets, ctx)?;
        self.validate_mapped_resource(ctx)?;
        self.build_scaling_params_for_context(ctx)?;
        self.validate_bandwidth(ctx)
    }

    /// Single target check used to guarantee a mode on every display.
    ///
    /// The validated pipe is copied onto as many pipes as `max_targets`
    /// allows before scaling and bandwidth run. Surfaces are not involved.
    pub fn validate_guaranteed(&self, target: &Arc<Target>) -> DcResult<ValidateContext> {
        let mut ctx = ValidateContext::new(&self.pool);
        ctx.targets.push(target.clone());
        ctx.target_surfaces.push(Vec::new());
        let current = Some(&self.current_ctx.res_ctx);

        ctx.res_ctx.map_pool_resources(&self.pool, &self.links, &ctx.targets, current)?;
        ctx.res_ctx.map_clock_resources(&self.pool, &self.config, current)?;
        self.validate_mapped_resource(&mut ctx)?;

        self.copy_target(&mut ctx);
        self.build_scaling_params_for_context(&mut ctx)?;
        self.validate_bandwidth(&mut ctx)?;
        Ok(ctx)
    }

    fn copy_target(&self, ctx: &mut ValidateContext) {
        let count = self.config.max_targets.min(self.pool.standard_pipe_count());
        let copied = ctx.res_ctx.replicate_head_pipe(count);
        if let (Some(target), Some(surfaces)) = (ctx.targets.first().cloned(), ctx.target_surfaces.first().cloned()) {
            for _ in 0..copied {
                ctx.targets.push(target.clone());
                ctx.target_surfaces.push(surfaces.clone());
            }
        }
        dc_trace!("dc: guaranteed mode copied to {} more pipes", copied);
    }

    fn attach_surfaces(&self, sets: &[ValidationSet], ctx: &mut ValidateContext) -> DcResult<()> {
        ctx.target_surfaces.clear();
        for set in sets {
            // No surfaces means "keep what is on screen"
            let surfaces = if set.surfaces.is_empty() {
                self.current_ctx.surfaces_of(&set.target).cloned().unwrap_or_default()
            } else {
                set.surfaces.clone()
            };

            if let Err(e) = ctx.res_ctx.attach_surfaces(&self.pool, &set.target, &surfaces) {
                kprintln!("dc: failed to attach surfaces to target ({})", e);
                return Err(DcError::FailAttachSurfaces);
            }
            ctx.target_surfaces.push(surfaces);
        }
        Ok(())
    }

    /// Per stream checks on its head pipe (and the layer below it).
    fn validate_mapped_resource(&self, ctx: &mut ValidateContext) -> DcResult<()> {
        let streams: Vec<Arc<Stream>> = ctx.streams().cloned().collect();

        for stream in &streams {
            if is_stream_unchanged(&self.current_ctx.res_ctx, stream) {
                continue;
            }
            let link = self
                .links
                .get(stream.sink.link_index)
                .ok_or(DcError::ErrorUnexpected)?;
            let head = ctx.res_ctx.head_pipe_idx(stream).ok_or(DcError::ErrorUnexpected)?;

            let underlay = self.pool.underlay_pipe_index;
            let layer = ctx.res_ctx.pipe_ctx[head].bottom_pipe;
            for idx in core::iter::once(head).chain(layer) {
                if !is_surface_pixel_format_supported(&ctx.res_ctx.pipe_ctx[idx], underlay) {
                    return Err(DcError::SurfacePixelFormatUnsupported);
                }
            }

            let tg = self.pool.timing_generators.get(head).ok_or(DcError::ErrorUnexpected)?;
            if !tg.validate_timing(&stream.timing, stream.signal) {
                return Err(DcError::FailControllerValidate);
            }

            build_pipe_hw_param(&mut ctx.res_ctx.pipe_ctx[head], &self.pool, &self.config)?;

            if !link.encoder.validate_output_with_stream(stream) {
                return Err(DcError::FailEncValidate);
            }

            link.validate_mode_timing(stream)?;
        }
        Ok(())
    }

    fn build_scaling_params_for_context(&self, ctx: &mut ValidateContext) -> DcResult<()> {
        for pipe in ctx.res_ctx.pipe_ctx.iter_mut().filter(|p| !p.is_free()) {
            build_scaling_params(pipe, &self.config)?;
        }
        Ok(())
    }

    fn validate_bandwidth(&self, ctx: &mut ValidateContext) -> DcResult<()> {
        let result = bw_calcs(&self.dceip, &self.vbios, &ctx.res_ctx.pipe_ctx, self.pool.pipe_count);

        let results = match result {
            Ok(results) => results,
            Err(e) => {
                if let Some(s) = ctx.streams().next() {
                    kprintln!(
                        "dc_bw: {}x{}@{} kHz bandwidth validation failed ({:?})",
                        s.timing.h_addressable,
                        s.timing.v_addressable,
                        s.timing.pix_clk_khz,
                        e
                    );
                }
                return Err(DcError::FailBandwidthValidate);
            }
        };
        ctx.bw_results = results;

        if ctx.bw_results != self.current_ctx.bw_results {
            let r = &ctx.bw_results;
            kprintln!(
                "dc_bw: dispclk {} kHz, sclk {} kHz, yclk {} kHz, stutter {}",
                r.dispclk_khz,
                r.required_sclk,
                r.required_yclk,
                r.stutter_mode_enable
            );
            for i in 0..3 {
                dc_trace!(
                    "dc_bw: [{}] nbp {}/{} urgent {}/{} stutter {}/{}",
                    i,
                    r.nbp_state_change_wm_ns[i].b_mark,
                    r.nbp_state_change_wm_ns[i].a_mark,
                    r.urgent_wm_ns[i].b_mark,
                    r.urgent_wm_ns[i].a_mark,
                    r.stutter_exit_wm_ns[i].b_mark,
                    r.stutter_exit_wm_ns[i].a_mark
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::dc::types::{CrtcTiming, Sink, SignalType, SurfacePixelFormat};
    use alloc::vec;

    fn set_with(stream: Arc<Stream>, surfaces: Vec<Arc<Surface>>) -> ValidationSet {
        ValidationSet::new(Target::single(stream), surfaces)
    }

    fn hdmi_1080p() -> Arc<Stream> {
        Stream::new(Sink::new(0, SignalType::HdmiTypeA), CrtcTiming::new(1920, 1080, 60))
    }

    #[test]
    fn test_surface_set_limits() {
        let gfx = Surface::new(SurfacePixelFormat::GrphArgb8888, 1920, 1080);
        let video = Surface::new(SurfacePixelFormat::VideoYCbCr420, 1280, 720);

        assert!(validate_surface_sets(&[set_with(hdmi_1080p(), vec![])]));
        assert!(validate_surface_sets(&[set_with(hdmi_1080p(), vec![gfx.clone()])]));
        assert!(validate_surface_sets(&[set_with(hdmi_1080p(), vec![gfx.clone(), video.clone()])]));

        let three = vec![gfx.clone(), video.clone(), video.clone()];
        assert!(!validate_surface_sets(&[set_with(hdmi_1080p(), three)]));

        // Primary must match the stream source and not be video
        let small = Surface::new(SurfacePixelFormat::GrphArgb8888, 1280, 720);
        assert!(!validate_surface_sets(&[set_with(hdmi_1080p(), vec![small])]));
        let video_primary = Surface::new(SurfacePixelFormat::VideoYCbCr420, 1920, 1080);
        assert!(!validate_surface_sets(&[set_with(hdmi_1080p(), vec![video_primary])]));
    }

    #[test]
    fn test_secondary_surface_limits() {
        let gfx = Surface::new(SurfacePixelFormat::GrphArgb8888, 1920, 1080);

        let big = Surface::new(SurfacePixelFormat::VideoYCbCr420, 3840, 2160);
        assert!(!validate_surface_sets(&[set_with(hdmi_1080p(), vec![gfx.clone(), big])]));

        let not_video = Surface::new(SurfacePixelFormat::GrphArgb8888, 1280, 720);
        assert!(!validate_surface_sets(&[set_with(hdmi_1080p(), vec![gfx.clone(), not_video])]));

        let video = Surface::new(SurfacePixelFormat::VideoYCbCr420, 1280, 720);
        let timing = CrtcTiming::new(1920, 1080, 60).with_pixel_encoding(PixelEncoding::YCbCr444);
        let ycbcr = Stream::new(Sink::new(0, SignalType::HdmiTypeA), timing);
        assert!(!validate_surface_sets(&[set_with(ycbcr, vec![gfx, video])]));
    }

    #[test]
    fn test_underlay_rejects_graphics() {
        let mut pipe = PipeCtx::new(3);
        assert!(!is_surface_pixel_format_supported(&pipe, Some(3)));

        pipe.surface = Some(Surface::new(SurfacePixelFormat::GrphArgb8888, 640, 480));
        assert!(!is_surface_pixel_format_supported(&pipe, Some(3)));
        assert!(is_surface_pixel_format_supported(&pipe, Some(4)));
        assert!(is_surface_pixel_format_supported(&pipe, None));

        pipe.surface = Some(Surface::new(SurfacePixelFormat::VideoYCbCr420, 640, 480));
        assert!(is_surface_pixel_format_supported(&pipe, Some(3)));
    }
}
