// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Session mode, PTS policy and encoder parameters
//!
//! [`CodecParams`] is the Rust view of the engine's `CodecParams` struct. It is
//! converted to its `#[repr(C)]` form ([`RawCodecParams`]) right before the
//! engine is opened and read back afterwards, since the engine may report
//! negotiated values through the same struct.

use std::fmt;
use std::os::raw::c_char;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SessionError};
use crate::ffi::{RawCodecParams, CODEC_STRING_LEN};

/// Direction of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Decode,
    Encode,
}

impl Mode {
    /// Engine-side integer value
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Decode => 0,
            Self::Encode => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decoder",
            Self::Encode => "encoder",
        }
    }
}

impl FromStr for Mode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "decode" | "decoder" => Ok(Self::Decode),
            "encode" | "encoder" => Ok(Self::Encode),
            _ => Err(SessionError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Presentation-timestamp correction policy applied by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PtsTrick {
    /// Resolved from the target url when the session opens
    #[default]
    Auto,
    /// Even timestamps, for live push targets
    Even,
    /// Monotonic increment, for files
    Increase,
    /// Wall-clock relative, for callers encoding at a stable rate
    Relative,
    /// Caller-provided anchor
    Direct,
    /// Value reported by the engine that this binding does not know
    Unknown(i32),
}

impl PtsTrick {
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Auto => -1,
            Self::Even => 0,
            Self::Increase => 1,
            Self::Relative => 2,
            Self::Direct => 3,
            Self::Unknown(raw) => raw,
        }
    }

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            -1 => Self::Auto,
            0 => Self::Even,
            1 => Self::Increase,
            2 => Self::Relative,
            3 => Self::Direct,
            other => Self::Unknown(other),
        }
    }

    /// Policy for a target url when the sentinel is set
    pub fn for_target(target_url: &str) -> Self {
        const LIVE_SCHEMES: [&str; 3] = ["rtmp://", "rtsp://", "srt://"];

        if LIVE_SCHEMES.iter().any(|scheme| target_url.starts_with(scheme)) {
            Self::Even
        } else {
            Self::Increase
        }
    }

    /// Replace `Auto` with the policy for `target_url`; explicit values stay
    pub fn resolve(self, target_url: &str) -> Self {
        match self {
            Self::Auto => Self::for_target(target_url),
            explicit => explicit,
        }
    }
}

/// Encoder configuration handed to the engine
///
/// Ignored by decode sessions, which must leave it neutral.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecParams {
    pub width: i32,
    pub height: i32,
    pub bitrate: i32,
    pub max_bitrate: i32,
    pub fps: i32,
    pub gop: i32,
    pub b_frames: i32,
    pub pts_trick: PtsTrick,

    pub flags: String,
    pub flags2: String,
    pub profile: String,
    pub preset: String,
    pub tune: String,
    pub pix_fmt: String,
    pub format: String,
    pub codec: String,

    pub sei_uuid: [u8; 16],
    pub use_h264_annexb_sei: bool,
}

impl CodecParams {
    /// Load parameters from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read codec params from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse codec params in {}", path.display()))
    }

    /// First field that a decode session must not set, if any
    ///
    /// `flags`, `flags2` and `sei_uuid` are not inspected; every other field
    /// must stay at its default.
    pub fn first_decode_conflict(&self) -> Option<&'static str> {
        let ints = [
            ("width", self.width),
            ("height", self.height),
            ("bitrate", self.bitrate),
            ("max_bitrate", self.max_bitrate),
            ("fps", self.fps),
            ("gop", self.gop),
            ("b_frames", self.b_frames),
        ];
        if let Some((name, _)) = ints.iter().find(|(_, v)| *v != 0) {
            return Some(*name);
        }
        if self.pts_trick != PtsTrick::Auto {
            return Some("pts_trick");
        }

        let strings = [
            ("profile", &self.profile),
            ("preset", &self.preset),
            ("tune", &self.tune),
            ("pix_fmt", &self.pix_fmt),
            ("format", &self.format),
            ("codec", &self.codec),
        ];
        if let Some((name, _)) = strings.iter().find(|(_, v)| !v.is_empty()) {
            return Some(*name);
        }

        self.use_h264_annexb_sei.then_some("use_h264_annexb_sei")
    }

    /// Convert to the engine layout
    pub fn to_raw(&self) -> Result<RawCodecParams> {
        Ok(RawCodecParams {
            width: self.width,
            height: self.height,
            bitrate: self.bitrate,
            max_bitrate: self.max_bitrate,
            fps: self.fps,
            gop: self.gop,
            b_frames: self.b_frames,
            pts_trick: self.pts_trick.as_raw(),
            flags: to_c_field("flags", &self.flags)?,
            flags2: to_c_field("flags2", &self.flags2)?,
            profile: to_c_field("profile", &self.profile)?,
            preset: to_c_field("preset", &self.preset)?,
            tune: to_c_field("tune", &self.tune)?,
            pix_fmt: to_c_field("pix_fmt", &self.pix_fmt)?,
            format: to_c_field("format", &self.format)?,
            codec: to_c_field("codec", &self.codec)?,
            sei_uuid: self.sei_uuid,
            use_h264_annexb_sei: self.use_h264_annexb_sei,
        })
    }

    /// Read back values the engine may have negotiated
    pub fn from_raw(raw: &RawCodecParams) -> Self {
        Self {
            width: raw.width,
            height: raw.height,
            bitrate: raw.bitrate,
            max_bitrate: raw.max_bitrate,
            fps: raw.fps,
            gop: raw.gop,
            b_frames: raw.b_frames,
            pts_trick: PtsTrick::from_raw(raw.pts_trick),
            flags: from_c_field(&raw.flags),
            flags2: from_c_field(&raw.flags2),
            profile: from_c_field(&raw.profile),
            preset: from_c_field(&raw.preset),
            tune: from_c_field(&raw.tune),
            pix_fmt: from_c_field(&raw.pix_fmt),
            format: from_c_field(&raw.format),
            codec: from_c_field(&raw.codec),
            sei_uuid: raw.sei_uuid,
            use_h264_annexb_sei: raw.use_h264_annexb_sei,
        }
    }
}

fn to_c_field(field: &'static str, value: &str) -> Result<[c_char; CODEC_STRING_LEN]> {
    let bytes = value.as_bytes();
    if bytes.contains(&0) {
        return Err(SessionError::InteriorNul { what: field });
    }
    // Last byte is reserved for the terminator.
    if bytes.len() >= CODEC_STRING_LEN {
        return Err(SessionError::CodecParamTooLong {
            field,
            len: bytes.len(),
            max: CODEC_STRING_LEN - 1,
        });
    }

    let mut out = [0 as c_char; CODEC_STRING_LEN];
    for (dst, src) in out.iter_mut().zip(bytes) {
        *dst = *src as c_char;
    }
    Ok(out)
}

fn from_c_field(field: &[c_char; CODEC_STRING_LEN]) -> String {
    let bytes: Vec<u8> = field
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
