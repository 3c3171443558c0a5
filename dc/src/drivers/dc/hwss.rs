//! Hardware sequencer seam
//!
//! Register programming lives outside the core. The sequencer receives a
//! validated context and brings the hardware in line with it.

use super::status::DcResult;
use super::validate::ValidateContext;

pub trait HwSequencer {
    /// Program every bound pipe of `ctx`: clocks, timing, FMT, encoders.
    fn apply_ctx_to_hw(&mut self, ctx: &ValidateContext) -> DcResult<()>;
}
