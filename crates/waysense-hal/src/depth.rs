//! Generic `DepthCamera` trait for stereo or time-of-flight sensors.

use waysense_types::{DepthFrame, Millis, WayError};

/// A depth-sensing camera.
///
/// Frames carry per-cell distances in metres with
/// [`INVALID_DEPTH`][waysense_types::INVALID_DEPTH] marking cells without a
/// return.
pub trait DepthCamera: Send {
    /// Stable identifier for this camera, e.g. `"oak_d_lite"`.
    fn id(&self) -> &str;

    /// Capture the next frame, stamping it with `now`.  `Ok(None)` means no
    /// frame is ready yet.
    ///
    /// # Errors
    ///
    /// Returns [`WayError::Device`] if the frame cannot be captured (e.g. the
    /// device is disconnected).
    fn capture(&mut self, now: Millis) -> Result<Option<DepthFrame>, WayError>;
}
