// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Decoded frames and encoder input
//!
//! A [`Frame`] borrows engine-owned memory and therefore the session it came
//! from; it stays valid until the next call on that session. Image data is
//! packed RGB24, row-major.

use std::borrow::Cow;

use image::RgbImage;
use ndarray::{Array3, ArrayView3};

use crate::error::{EngineError, Result, SessionError};

/// Bytes per pixel of engine images
pub const COLOR_DEPTH: usize = 3;

/// Byte size of one packed RGB24 image
pub fn image_byte_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * COLOR_DEPTH
}

/// Kind of result the engine produced for a decode call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Error,
    Rgb,
    Eof,
}

impl FrameKind {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Rgb,
            1 => Self::Eof,
            _ => Self::Error,
        }
    }
}

/// One decode result
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    kind: FrameKind,
    error: Option<EngineError>,
    width: u32,
    height: u32,
    sei: Option<&'a [u8]>,
    data: Option<&'a [u8]>,
}

impl<'a> Frame<'a> {
    pub fn new(
        kind: FrameKind,
        error: Option<EngineError>,
        width: u32,
        height: u32,
        sei: Option<&'a [u8]>,
        data: Option<&'a [u8]>,
    ) -> Self {
        Self {
            kind,
            error,
            width,
            height,
            sei,
            data,
        }
    }

    /// Result for a session without an engine handle
    pub fn unavailable() -> Self {
        Self::new(
            FrameKind::Error,
            Some(EngineError::NotAvailable),
            0,
            0,
            None,
            None,
        )
    }

    /// Whether the call produced an image
    pub fn is_ok(&self) -> bool {
        self.kind == FrameKind::Rgb
    }

    pub fn is_eof(&self) -> bool {
        self.kind == FrameKind::Eof
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn error(&self) -> Option<EngineError> {
        self.error
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Packed RGB24 image bytes
    ///
    /// `None` when decoding straight into shared memory without a local copy.
    pub fn data(&self) -> Option<&'a [u8]> {
        self.data
    }

    /// SEI payload with trailing NULs removed
    pub fn sei_bytes(&self) -> Option<&'a [u8]> {
        let sei = self.sei?;
        let end = sei.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        (end > 0).then(|| &sei[..end])
    }

    /// SEI payload as text
    pub fn sei_message(&self) -> Option<Cow<'a, str>> {
        self.sei_bytes().map(String::from_utf8_lossy)
    }

    /// Image as a `(height, width, 3)` array
    pub fn to_array(&self) -> Option<Array3<u8>> {
        let data = self.image_slice()?;
        Array3::from_shape_vec(
            (self.height as usize, self.width as usize, COLOR_DEPTH),
            data.to_vec(),
        )
        .ok()
    }

    /// Image as an `image` crate buffer
    pub fn to_image(&self) -> Option<RgbImage> {
        let data = self.image_slice()?;
        RgbImage::from_raw(self.width, self.height, data.to_vec())
    }

    fn image_slice(&self) -> Option<&'a [u8]> {
        if !self.is_ok() {
            return None;
        }
        let data = self.data?;
        data.get(..image_byte_size(self.width, self.height))
    }
}

/// Raw image handed to an encode session
#[derive(Debug, Clone, Copy)]
pub enum FrameInput<'a> {
    /// Packed RGB24 bytes
    Bytes(&'a [u8]),
    /// `(height, width, 3)` array; non-contiguous views are copied
    Array(ArrayView3<'a, u8>),
    /// Not accepted by the engine boundary
    Image(&'a RgbImage),
}

impl<'a> FrameInput<'a> {
    /// Bytes as submitted to the engine
    pub fn to_bytes(&self) -> Result<Cow<'a, [u8]>> {
        match *self {
            Self::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            Self::Array(view) => Ok(match view.to_slice() {
                Some(slice) => Cow::Borrowed(slice),
                None => Cow::Owned(view.iter().copied().collect()),
            }),
            Self::Image(_) => Err(SessionError::UnsupportedFrameInput(
                "image buffers are not accepted, pass bytes or an array",
            )),
        }
    }
}

impl<'a> From<&'a [u8]> for FrameInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for FrameInput<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Self::Bytes(bytes.as_slice())
    }
}

impl<'a> From<ArrayView3<'a, u8>> for FrameInput<'a> {
    fn from(view: ArrayView3<'a, u8>) -> Self {
        Self::Array(view)
    }
}
