// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Error types for the ffio binding
//!
//! Two families live here:
//!
//! - [`SessionError`]: validation and boundary errors raised by the binding
//!   itself before (or instead of) calling into the engine.
//! - [`EngineError`]: status codes reported by the native engine on a frame.
//!
//! Runtime decode/encode failures are never turned into `Err`; they surface as a
//! falsy [`Frame`](crate::frame::Frame) or a `false` encode result.

use thiserror::Error;

/// Errors raised by the binding layer
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("the `mode`={0:?} is invalid (expected decode/decoder/encode/encoder)")]
    InvalidMode(String),

    #[error("decode sessions must not carry encoder parameters (`{field}` is set)")]
    DecodeWithCodecParams { field: &'static str },

    #[error("`hw_device`={0:?} is invalid (expected `cuda` or `cuda:<0-99>`)")]
    InvalidHardwareDevice(String),

    #[error("target url must not be empty")]
    EmptyTargetUrl,

    #[error("target url is {len} bytes, the engine accepts at most {max}")]
    TargetUrlTooLong { len: usize, max: usize },

    #[error("codec parameter `{field}` is {len} bytes, the engine accepts at most {max}")]
    CodecParamTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{what} contains an interior NUL byte")]
    InteriorNul { what: &'static str },

    #[error("environment variable {key}={value:?} is not a valid number")]
    InvalidEnvNumber { key: &'static str, value: String },

    #[error("shared-memory {field} {value} is out of range")]
    ShmOutOfRange { field: &'static str, value: u64 },

    #[error("session was opened without shared memory")]
    ShmNotEnabled,

    #[error("operation requires a {expected} session")]
    WrongMode { expected: &'static str },

    #[error("frame input is {actual} bytes, the session expects {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    #[error("unsupported frame input: {0}")]
    UnsupportedFrameInput(&'static str),

    #[error("engine failed to allocate a session object")]
    Allocation,

    #[error(transparent)]
    Load(#[from] crate::ffi::LoadError),
}

/// Result alias used throughout the binding
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Status codes reported by the engine
///
/// Codes are contiguous from `-100` upwards; `0` is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine session not available")]
    NotAvailable,
    #[error("failed to receive from codec")]
    RecvFromCodec,
    #[error("failed to send to codec")]
    SendToCodec,
    #[error("failed to read or write target")]
    ReadOrWriteTarget,
    #[error("end of stream")]
    StreamEof,
    #[error("frame allocation failed")]
    AvframeAllocation,
    #[error("avformat failure")]
    AvformatFailure,
    #[error("avcodec failure")]
    AvcodecFailure,
    #[error("shared memory failure")]
    ShmFailure,
    #[error("pixel format conversion failure")]
    SwsFailure,
    #[error("hardware acceleration failure")]
    HardwareAcceleration,
    #[error("wrong codec parameters")]
    WrongCodecParams,
    #[error("engine error code {0}")]
    Unknown(i32),
}

impl EngineError {
    /// Map a raw engine status to an error, `None` for success
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            0 => return None,
            -100 => Self::NotAvailable,
            -99 => Self::RecvFromCodec,
            -98 => Self::SendToCodec,
            -97 => Self::ReadOrWriteTarget,
            -96 => Self::StreamEof,
            -95 => Self::AvframeAllocation,
            -94 => Self::AvformatFailure,
            -93 => Self::AvcodecFailure,
            -92 => Self::ShmFailure,
            -91 => Self::SwsFailure,
            -90 => Self::HardwareAcceleration,
            -89 => Self::WrongCodecParams,
            other => Self::Unknown(other),
        };
        Some(err)
    }

    /// Raw engine status code
    pub fn code(&self) -> i32 {
        match self {
            Self::NotAvailable => -100,
            Self::RecvFromCodec => -99,
            Self::SendToCodec => -98,
            Self::ReadOrWriteTarget => -97,
            Self::StreamEof => -96,
            Self::AvframeAllocation => -95,
            Self::AvformatFailure => -94,
            Self::AvcodecFailure => -93,
            Self::ShmFailure => -92,
            Self::SwsFailure => -91,
            Self::HardwareAcceleration => -90,
            Self::WrongCodecParams => -89,
            Self::Unknown(code) => *code,
        }
    }
}
