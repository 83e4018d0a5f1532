// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Engine boundary
//!
//! The binding talks to the decode/encode engine only through these two
//! traits. [`NativeEngine`](crate::ffi::NativeEngine) implements them on top of
//! the dynamically loaded C library; tests use a scripted fake.

use std::ffi::CStr;

use crate::ffi::RawCodecParams;
use crate::frame::Frame;
use crate::params::Mode;

/// Lifecycle state reported by an engine session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Allocated, not opened
    Init,
    /// Opened, nothing processed yet
    Ready,
    /// Processing frames
    Running,
    /// Reached the end of the stream
    End,
    /// Finalized
    Closed,
    Unknown(i32),
}

impl EngineState {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Init,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::End,
            4 => Self::Closed,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Init => 0,
            Self::Ready => 1,
            Self::Running => 2,
            Self::End => 3,
            Self::Closed => 4,
            Self::Unknown(code) => *code,
        }
    }

    /// Whether a session in this state accepts decode/encode calls
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

/// Arguments of the engine's open entry point
///
/// Strings are already NUL-terminated; an unused shm descriptor is passed as an
/// empty name with zero size and offset.
#[derive(Debug, Clone, Copy)]
pub struct InitArgs<'a> {
    pub mode: Mode,
    pub target_url: &'a CStr,
    pub hw_enabled: bool,
    pub pix_fmt_hw_enabled: bool,
    pub hw_device: &'a CStr,
    pub shm_enabled: bool,
    pub shm_name: &'a CStr,
    pub shm_size: i32,
    pub shm_offset: i32,
}

/// Factory for engine sessions
pub trait Engine {
    type Session: EngineSession;

    /// Allocate an unopened session object, `None` if the engine is out of
    /// resources
    fn allocate(&self) -> Option<Self::Session>;
}

/// One engine-side session object
///
/// Accessors read the live engine struct on every call.
pub trait EngineSession {
    /// Open the session; the engine may rewrite `params` with negotiated values.
    /// Returns the raw status of the call, the outcome is read from [`state`].
    ///
    /// [`state`]: EngineSession::state
    fn init(&mut self, args: &InitArgs<'_>, params: &mut RawCodecParams) -> i32;

    fn state(&self) -> EngineState;

    fn frame_seq(&self) -> i64;

    fn width(&self) -> i32;

    fn height(&self) -> i32;

    fn framerate(&self) -> f64;

    fn decode_one_frame(&mut self, sei_filter: Option<&CStr>) -> Frame<'_>;

    fn decode_one_frame_to_shm(&mut self, offset: i32, sei_filter: Option<&CStr>) -> Frame<'_>;

    /// Returns the engine status, 0 on success. `rgb` holds exactly one image.
    fn encode_one_frame(&mut self, rgb: &[u8], sei_msg: Option<&CStr>) -> i32;

    fn encode_one_frame_from_shm(&mut self, offset: i32, sei_msg: Option<&CStr>) -> bool;

    /// Flush buffered output
    fn finalize(&mut self);

    /// Free the engine object
    fn delete(self);
}
