// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! ffio stream session binding
//!
//! Opens decode or encode sessions on the native ffio engine, pulls raw RGB24
//! frames out of a stream and pushes them into one. The engine library is
//! loaded at runtime, see [`FfioApi`].

pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod frame;
pub mod hardware;
pub mod metrics;
pub mod params;
pub mod relay;
pub mod session;

// Re-export main types for convenience
pub use config::{SessionOptions, ShmDescriptor};
pub use engine::{Engine, EngineSession, EngineState};
pub use error::{EngineError, SessionError};
pub use ffi::{FfioApi, LoadError, NativeEngine};
pub use frame::{Frame, FrameInput, FrameKind};
pub use metrics::init_metrics;
pub use params::{CodecParams, Mode, PtsTrick};
pub use relay::{Relay, RelayConfig, RelayStats, StopReason};
pub use session::{NativeStreamSession, StreamSession};

#[cfg(test)]
mod fake_engine;
