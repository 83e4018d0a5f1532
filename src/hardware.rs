// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Hardware acceleration device selection

use crate::error::{Result, SessionError};

/// Generic backend name accepted for numbered devices
pub const CUDA_BACKEND: &str = "cuda";

/// Host platform, as far as device defaults are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Other
        }
    }
}

/// Backend used when the caller does not name a device
///
/// Other backends listed by `ffmpeg -hwaccels` can be requested through the
/// engine directly; the binding only validates the CUDA forms.
pub fn default_hardware_device(platform: Platform) -> &'static str {
    match platform {
        Platform::MacOs => "videotoolbox",
        Platform::Other => CUDA_BACKEND,
    }
}

/// Resolve a requested device string
///
/// - empty: platform default
/// - `cuda` in any case: `cuda:0`
/// - `cuda:N` / `cuda:NN`: unchanged
pub fn resolve_hardware_device(requested: &str, platform: Platform) -> Result<String> {
    if requested.is_empty() {
        return Ok(default_hardware_device(platform).to_string());
    }
    if requested.eq_ignore_ascii_case(CUDA_BACKEND) {
        return Ok(format!("{CUDA_BACKEND}:0"));
    }
    if is_numbered_cuda_device(requested) {
        return Ok(requested.to_string());
    }
    Err(SessionError::InvalidHardwareDevice(requested.to_string()))
}

fn is_numbered_cuda_device(device: &str) -> bool {
    let Some(index) = device
        .strip_prefix(CUDA_BACKEND)
        .and_then(|rest| rest.strip_prefix(':'))
    else {
        return false;
    };
    (1..=2).contains(&index.len()) && index.bytes().all(|b| b.is_ascii_digit())
}
