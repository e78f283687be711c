use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of a packed sub-message length header, in bytes (big-endian u16).
pub const SUB_MESSAGE_HEADER_LEN: usize = 2;

/// Maximum payload carried by a single sub-message.
pub const MAX_SUB_MESSAGE_LEN: usize = u16::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload of {0} bytes exceeds the 2-byte length header")]
    PayloadTooLarge(usize),
}

/// A point in the 2D world coordinate system, using high-precision floats.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 2D width and height, using high-precision floats.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// 2D width and height in whole grid units (map blocks, minimap cells).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

/// An axis-aligned bounding box: bottom-left origin plus size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Vec2,
    pub size: Size,
}

impl Rect {
    pub fn new(origin: Vec2, size: Size) -> Self {
        Self { origin, size }
    }

    pub fn max_x(&self) -> f64 {
        self.origin.x + self.size.width
    }

    pub fn max_y(&self) -> f64 {
        self.origin.y + self.size.height
    }

    /// Returns true if the two rectangles overlap or touch. Degenerate
    /// (zero-size) rectangles intersect anything that contains their point.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.origin.x <= other.max_x()
            && other.origin.x <= self.max_x()
            && self.origin.y <= other.max_y()
            && other.origin.y <= self.max_y()
    }
}

/// Movement direction carried by a `Command::Move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// The envelope decoded from every inbound sub-message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Move { direction: Direction },
    Attack { target: u32 },
}

/// State deltas the server pushes back to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Update {
    Welcome {
        player_id: u32,
        minimap_width: u32,
        minimap_height: u32,
    },
    Position {
        player_id: u32,
        x: f64,
        y: f64,
    },
}

/// Packs a payload into a length-prefixed sub-message frame.
pub fn encode_sub_message(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut frame = Vec::with_capacity(SUB_MESSAGE_HEADER_LEN + payload.len());
    append_sub_message(&mut frame, payload)?;
    Ok(frame)
}

/// Appends a length-prefixed sub-message to an existing transport frame.
/// Used by the write pump to coalesce queued messages into one write.
pub fn append_sub_message(frame: &mut Vec<u8>, payload: &[u8]) -> Result<(), CodecError> {
    if payload.len() > MAX_SUB_MESSAGE_LEN {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }

    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(())
}

/// Scans a transport frame left to right and extracts every complete
/// sub-message payload.
///
/// Stops when fewer than header-size bytes remain, or when a declared payload
/// length would run past the end of the frame; the truncated tail is dropped,
/// never buffered. Empty payloads (declared length 0) are skipped.
pub fn split_sub_messages(frame: &[u8]) -> Vec<&[u8]> {
    let mut payloads = Vec::new();
    let mut offset = 0;

    while frame.len() - offset >= SUB_MESSAGE_HEADER_LEN {
        let declared = u16::from_be_bytes([frame[offset], frame[offset + 1]]) as usize;
        let end = offset + SUB_MESSAGE_HEADER_LEN + declared;

        // Truncated or corrupt trailing data: drop the rest of the frame.
        if end > frame.len() {
            break;
        }

        if declared > 0 {
            payloads.push(&frame[offset + SUB_MESSAGE_HEADER_LEN..end]);
        }

        offset = end;
    }

    payloads
}
