//! Streams, targets and surfaces as handed to the display core.

use alloc::sync::Arc;
use alloc::vec::Vec;

/// Per-component color depth of the output timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColorDepth {
    Undefined,
    Depth666,
    Depth888,
    Depth101010,
    Depth121212,
    Depth141414,
    Depth161616,
}

impl ColorDepth {
    /// Bits per color component.
    pub fn bpc(&self) -> Option<u32> {
        match self {
            ColorDepth::Undefined => None,
            ColorDepth::Depth666 => Some(6),
            ColorDepth::Depth888 => Some(8),
            ColorDepth::Depth101010 => Some(10),
            ColorDepth::Depth121212 => Some(12),
            ColorDepth::Depth141414 => Some(14),
            ColorDepth::Depth161616 => Some(16),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    Undefined,
    Rgb,
    YCbCr422,
    YCbCr444,
    YCbCr420,
}

/// Electrical signal the stream leaves the chip on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    None,
    DviSingleLink,
    DviDualLink,
    HdmiTypeA,
    Rgb,
    DisplayPort,
    DisplayPortMst,
    Edp,
    Wireless,
    Virtual,
}

impl SignalType {
    pub fn is_dp(&self) -> bool {
        matches!(self, SignalType::DisplayPort | SignalType::DisplayPortMst | SignalType::Edp)
    }

    pub fn is_dvi(&self) -> bool {
        matches!(self, SignalType::DviSingleLink | SignalType::DviDualLink)
    }

    /// Signals that may carry audio to the sink.
    pub fn has_audio(&self) -> bool {
        matches!(
            self,
            SignalType::HdmiTypeA | SignalType::DisplayPort | SignalType::DisplayPortMst
        )
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimingFlags: u32 {
        const INTERLACE = 1 << 0;
        const HSYNC_POSITIVE = 1 << 1;
        const VSYNC_POSITIVE = 1 << 2;
    }
}

/// CRTC timing (all sizes in pixels/lines, clock in kHz)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrtcTiming {
    pub h_addressable: u32,
    pub h_total: u32,
    pub h_front_porch: u32,
    pub h_sync_width: u32,
    pub v_addressable: u32,
    pub v_total: u32,
    pub v_front_porch: u32,
    pub v_sync_width: u32,
    pub pix_clk_khz: u32,
    pub display_color_depth: ColorDepth,
    pub pixel_encoding: PixelEncoding,
    pub flags: TimingFlags,
}

impl CrtcTiming {
    /// CEA-style blanking (280 pixels, 45 lines), RGB 8 bpc.
    ///
    /// 1920x1080@60 comes out at exactly 148.5 MHz.
    pub fn new(width: u32, height: u32, refresh: u32) -> Self {
        let h_total = width.saturating_add(280);
        let v_total = height.saturating_add(45);
        let pix_clk_khz = (h_total as u64 * v_total as u64 * refresh as u64 / 1000).min(u32::MAX as u64) as u32;

        Self {
            h_addressable: width,
            h_total,
            h_front_porch: 88,
            h_sync_width: 44,
            v_addressable: height,
            v_total,
            v_front_porch: 4,
            v_sync_width: 5,
            pix_clk_khz,
            display_color_depth: ColorDepth::Depth888,
            pixel_encoding: PixelEncoding::Rgb,
            flags: TimingFlags::HSYNC_POSITIVE | TimingFlags::VSYNC_POSITIVE,
        }
    }

    pub fn with_color_depth(mut self, depth: ColorDepth) -> Self {
        self.display_color_depth = depth;
        self
    }

    pub fn with_pixel_encoding(mut self, encoding: PixelEncoding) -> Self {
        self.pixel_encoding = encoding;
        self
    }

    pub fn refresh_hz(&self) -> u32 {
        let frame = self.h_total as u64 * self.v_total as u64;
        if frame == 0 {
            return 0;
        }
        ((self.pix_clk_khz as u64 * 1000 + frame / 2) / frame) as u32
    }

    /// Clock the PHY runs at for this timing on `signal`.
    pub fn phy_pix_clk_khz(&self, signal: SignalType) -> u32 {
        adjust_pix_clk_khz(
            self.pix_clk_khz,
            self.display_color_depth,
            signal,
            self.pixel_encoding == PixelEncoding::YCbCr420,
        )
    }

    /// Bits per pixel on the wire (3 components).
    pub fn bits_per_pixel(&self) -> Option<u32> {
        self.display_color_depth.bpc().map(|bpc| bpc * 3)
    }
}

/// HDMI carries deep color by running TMDS faster; 4:2:0 halves the rate.
pub fn adjust_pix_clk_khz(clk_khz: u32, depth: ColorDepth, signal: SignalType, ycbcr420: bool) -> u32 {
    let mut clk = clk_khz;

    if signal == SignalType::HdmiTypeA {
        clk = match depth {
            ColorDepth::Depth101010 => clk * 5 / 4,
            ColorDepth::Depth121212 => clk * 3 / 2,
            ColorDepth::Depth161616 => clk * 2,
            _ => clk,
        };
    }

    if ycbcr420 {
        clk /= 2;
    }
    clk
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    pub const fn at(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Surface pixel formats. Graphics formats sort before the video range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SurfacePixelFormat {
    GrphArgb1555,
    GrphRgb565,
    GrphArgb8888,
    GrphAbgr8888,
    GrphArgb2101010,
    GrphAbgr2101010,
    GrphArgb16161616F,
    VideoYCbCr420,
    VideoYCrCb420,
    VideoYCbCr422,
    VideoYCrCb422,
}

impl SurfacePixelFormat {
    pub const VIDEO_BEGIN: SurfacePixelFormat = SurfacePixelFormat::VideoYCbCr420;

    pub fn is_video(&self) -> bool {
        *self >= Self::VIDEO_BEGIN
    }

    /// Average fetched bits per pixel (420 planar averages to 12).
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            SurfacePixelFormat::GrphArgb1555 | SurfacePixelFormat::GrphRgb565 => 16,
            SurfacePixelFormat::GrphArgb8888
            | SurfacePixelFormat::GrphAbgr8888
            | SurfacePixelFormat::GrphArgb2101010
            | SurfacePixelFormat::GrphAbgr2101010 => 32,
            SurfacePixelFormat::GrphArgb16161616F => 64,
            SurfacePixelFormat::VideoYCbCr420 | SurfacePixelFormat::VideoYCrCb420 => 12,
            SurfacePixelFormat::VideoYCbCr422 | SurfacePixelFormat::VideoYCrCb422 => 16,
        }
    }
}

/// A plane to be scanned out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    pub format: SurfacePixelFormat,
    pub src_rect: Rect,
    pub dst_rect: Rect,
}

impl Surface {
    pub fn new(format: SurfacePixelFormat, width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            format,
            src_rect: Rect::new(width, height),
            dst_rect: Rect::new(width, height),
        })
    }

    pub fn scaled(format: SurfacePixelFormat, src_rect: Rect, dst_rect: Rect) -> Arc<Self> {
        Arc::new(Self { format, src_rect, dst_rect })
    }
}

/// Port of an MST branch a sink hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MstPortId(pub u8);

/// Display device at the end of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sink {
    /// Index of the link in `Dc::links`
    pub link_index: usize,
    pub signal: SignalType,
    pub audio_capable: bool,
    /// Max pixel clock of a passive/active dongle in between, 0 if none
    pub dongle_max_pix_clk_khz: u32,
    /// Set for sinks behind an MST branch
    pub mst_port: Option<MstPortId>,
}

impl Sink {
    pub fn new(link_index: usize, signal: SignalType) -> Self {
        Self {
            link_index,
            signal,
            audio_capable: false,
            dongle_max_pix_clk_khz: 0,
            mst_port: None,
        }
    }
}

/// Display signal request. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub sink: Sink,
    pub signal: SignalType,
    pub timing: CrtcTiming,
    /// Composition space the surfaces are laid out in
    pub src: Rect,
    /// Where the composition lands in the timing's active area
    pub dst: Rect,
}

impl Stream {
    pub fn new(sink: Sink, timing: CrtcTiming) -> Arc<Self> {
        let full = Rect::new(timing.h_addressable, timing.v_addressable);
        Arc::new(Self {
            signal: sink.signal,
            sink,
            timing,
            src: full,
            dst: full,
        })
    }

    pub fn is_mst(&self) -> bool {
        self.signal == SignalType::DisplayPortMst && self.sink.mst_port.is_some()
    }
}

/// Streams driven together (tiled displays span more than one).
#[derive(Debug, Clone)]
pub struct Target {
    pub streams: Vec<Arc<Stream>>,
}

impl Target {
    pub fn new(streams: Vec<Arc<Stream>>) -> Arc<Self> {
        Arc::new(Self { streams })
    }

    pub fn single(stream: Arc<Stream>) -> Arc<Self> {
        Self::new(alloc::vec![stream])
    }

    pub fn contains(&self, stream: &Arc<Stream>) -> bool {
        self.streams.iter().any(|s| Arc::ptr_eq(s, stream))
    }
}

/// A target plus the surfaces to put on it.
#[derive(Debug, Clone)]
pub struct ValidationSet {
    pub target: Arc<Target>,
    pub surfaces: Vec<Arc<Surface>>,
}

impl ValidationSet {
    pub fn new(target: Arc<Target>, surfaces: Vec<Arc<Surface>>) -> Self {
        Self { target, surfaces }
    }
}
