// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Session configuration

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::params::{CodecParams, Mode};

/// Shared-memory region used instead of an in-process frame buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShmDescriptor {
    /// POSIX shm name, e.g. `/ffio_cam1`
    pub name: String,

    /// Region size in bytes
    #[serde(default)]
    pub size: u64,

    /// Byte offset of the first frame
    #[serde(default)]
    pub offset: u64,
}

impl ShmDescriptor {
    pub fn new(name: impl Into<String>, size: u64, offset: u64) -> Self {
        Self {
            name: name.into(),
            size,
            offset,
        }
    }

    /// Size and offset as the engine's `int` arguments
    pub fn engine_bounds(&self) -> Result<(i32, i32)> {
        let size = to_engine_int("size", self.size)?;
        let offset = to_engine_int("offset", self.offset)?;
        Ok((size, offset))
    }
}

pub(crate) fn to_engine_int(field: &'static str, value: u64) -> Result<i32> {
    i32::try_from(value).map_err(|_| SessionError::ShmOutOfRange { field, value })
}

/// Options for opening a [`StreamSession`](crate::session::StreamSession)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// File path, rtmp/rtsp/srt url, or shm designator
    pub target_url: String,

    /// Accepts `decode`, `decoder`, `encode`, `encoder` in any case
    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub hw_enabled: bool,

    /// Only useful together with `hw_enabled`
    #[serde(default)]
    pub pix_fmt_hw_enabled: bool,

    /// Empty for the platform default
    #[serde(default)]
    pub hw_device: String,

    #[serde(default)]
    pub shm: Option<ShmDescriptor>,

    /// Encoder settings; decode sessions must leave these unset
    #[serde(default)]
    pub codec_params: Option<CodecParams>,
}

impl SessionOptions {
    pub fn new(target_url: impl Into<String>, mode: Mode) -> Self {
        Self {
            target_url: target_url.into(),
            mode,
            hw_enabled: false,
            pix_fmt_hw_enabled: false,
            hw_device: String::new(),
            shm: None,
            codec_params: None,
        }
    }

    pub fn decoder(target_url: impl Into<String>) -> Self {
        Self::new(target_url, Mode::Decode)
    }

    pub fn encoder(target_url: impl Into<String>, codec_params: CodecParams) -> Self {
        Self::new(target_url, Mode::Encode).with_codec_params(codec_params)
    }

    /// Options with the mode given as a string
    pub fn with_mode_str(target_url: impl Into<String>, mode: &str) -> Result<Self> {
        Ok(Self::new(target_url, mode.parse()?))
    }

    pub fn with_hardware(mut self, device: impl Into<String>, pix_fmt_hw_enabled: bool) -> Self {
        self.hw_enabled = true;
        self.hw_device = device.into();
        self.pix_fmt_hw_enabled = pix_fmt_hw_enabled;
        self
    }

    pub fn with_shm(mut self, shm: ShmDescriptor) -> Self {
        self.shm = Some(shm);
        self
    }

    pub fn with_codec_params(mut self, codec_params: CodecParams) -> Self {
        self.codec_params = Some(codec_params);
        self
    }

    /// Load options from environment variables
    ///
    /// `FFIO_TARGET_URL`, `FFIO_MODE`, `FFIO_HW_ENABLED`,
    /// `FFIO_PIX_FMT_HW_ENABLED`, `FFIO_HW_DEVICE`, `FFIO_SHM_NAME`,
    /// `FFIO_SHM_SIZE`, `FFIO_SHM_OFFSET`. Codec params are not read here.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mode = match lookup("FFIO_MODE") {
            Some(mode) => mode.parse()?,
            None => Mode::default(),
        };
        let flag = |key: &str| {
            lookup(key)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
        };
        let number = |key: &'static str| -> Result<u64> {
            match lookup(key) {
                Some(value) => value
                    .parse()
                    .map_err(|_| SessionError::InvalidEnvNumber { key, value }),
                None => Ok(0),
            }
        };

        let shm = match lookup("FFIO_SHM_NAME") {
            Some(name) => Some(ShmDescriptor::new(
                name,
                number("FFIO_SHM_SIZE")?,
                number("FFIO_SHM_OFFSET")?,
            )),
            None => None,
        };

        Ok(Self {
            target_url: lookup("FFIO_TARGET_URL").unwrap_or_default(),
            mode,
            hw_enabled: flag("FFIO_HW_ENABLED"),
            pix_fmt_hw_enabled: flag("FFIO_PIX_FMT_HW_ENABLED"),
            hw_device: lookup("FFIO_HW_DEVICE").unwrap_or_default(),
            shm,
            codec_params: None,
        })
    }
}
