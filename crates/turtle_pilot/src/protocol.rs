//! Notification wire encoding for debug and telemetry transports.
//!
//! Status and pen broadcasts are serialized with postcard and framed
//! with COBS so they can be shipped over any byte transport (the
//! reference hardware pushes them over UDP). The transport itself is
//! the embedder's concern; it supplies the frame buffer.

use serde::{Deserialize, Serialize};
use turtle_motion::servo::PenPosition;

/// Program execution status as reported to observers. `Running`
/// carries the program counter the next instruction will execute at.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReport {
    Idle,
    Running { function: u32, offset: u32 },
    Error,
}

/// One broadcast event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Status(StatusReport),
    Pen(PenPosition),
}

/// Encodes a notification as a COBS frame into `out_buf`, returning
/// the number of bytes written.
pub fn encode(notification: &Notification, out_buf: &mut [u8]) -> Result<usize, postcard::Error> {
    let wrote = postcard::to_slice_cobs(notification, out_buf)?;
    Ok(wrote.len())
}

/// Decodes a COBS frame produced by [`encode`]. The buffer is
/// decoded in place.
pub fn decode(frame: &mut [u8]) -> Result<Notification, postcard::Error> {
    postcard::from_bytes_cobs(frame)
}
