//! Display core status codes

/// Why a mode set was rejected.
///
/// This is the whole set; callers can match on it exhaustively to produce a
/// diagnostic. Success is `Ok(..)` of [`DcResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcError {
    /// Broken invariant or inconsistent input
    ErrorUnexpected,
    /// No free stream encoder for the link
    NoStreamEncResource,
    /// No clock source can drive the stream
    NoClockSourceResource,
    /// No free pipe for the stream's plane class, or its timing generator
    /// cannot run the timing
    FailControllerValidate,
    /// Link encoder cannot output the stream on its signal
    FailEncValidate,
    /// Surfaces could not be bound to pipes
    FailAttachSurfaces,
    /// Surface set is malformed
    FailSurfaceValidate,
    /// Pixel format not allowed on the pipe it landed on
    SurfacePixelFormatUnsupported,
    /// Scaling ratio out of range
    FailScaling,
    /// Not enough memory/display bandwidth at any clock level
    FailBandwidthValidate,
    /// DP link rate x lanes cannot carry the stream
    NoDpLinkBandwidth,
    /// Pixel clock above the dongle's limit
    ExceedDongleMaxClk,
    /// MST payload allocation handshake failed
    FailDpPayloadAllocation,
}

pub type DcResult<T> = core::result::Result<T, DcError>;

impl DcError {
    pub fn as_str(&self) -> &'static str {
        match self {
            DcError::ErrorUnexpected => "DC_ERROR_UNEXPECTED",
            DcError::NoStreamEncResource => "DC_NO_STREAM_ENG_RESOURCE",
            DcError::NoClockSourceResource => "DC_NO_CLOCK_SOURCE_RESOURCE",
            DcError::FailControllerValidate => "DC_FAIL_CONTROLLER_VALIDATE",
            DcError::FailEncValidate => "DC_FAIL_ENC_VALIDATE",
            DcError::FailAttachSurfaces => "DC_FAIL_ATTACH_SURFACES",
            DcError::FailSurfaceValidate => "DC_FAIL_SURFACE_VALIDATE",
            DcError::SurfacePixelFormatUnsupported => "DC_SURFACE_PIXEL_FORMAT_UNSUPPORTED",
            DcError::FailScaling => "DC_FAIL_SCALING",
            DcError::FailBandwidthValidate => "DC_FAIL_BANDWIDTH_VALIDATE",
            DcError::NoDpLinkBandwidth => "DC_NO_DP_LINK_BANDWIDTH",
            DcError::ExceedDongleMaxClk => "DC_EXCEED_DONGLE_MAX_CLK",
            DcError::FailDpPayloadAllocation => "DC_FAIL_DP_PAYLOAD_ALLOCATION",
        }
    }
}

impl core::fmt::Display for DcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
