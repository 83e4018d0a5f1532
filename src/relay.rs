// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Decode-to-encode relay
//!
//! Pulls frames from an input session and pushes them into an output session,
//! carrying each frame's SEI message along.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SessionOptions;
use crate::engine::{Engine, EngineSession};
use crate::params::CodecParams;
use crate::session::StreamSession;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub input_url: String,
    pub output_url: String,
    pub codec_params: CodecParams,
    pub hw_enabled: bool,
    pub hw_device: String,
    pub sei_filter: Option<String>,
    /// Stop after this many decoded frames
    pub max_frames: Option<u64>,
}

impl RelayConfig {
    pub fn new(input_url: impl Into<String>, output_url: impl Into<String>) -> Self {
        Self {
            input_url: input_url.into(),
            output_url: output_url.into(),
            codec_params: CodecParams::default(),
            hw_enabled: false,
            hw_device: String::new(),
            sei_filter: None,
            max_frames: None,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let input_url = lookup("FFIO_INPUT_URL").context("FFIO_INPUT_URL is not set")?;
        let output_url = lookup("FFIO_OUTPUT_URL").context("FFIO_OUTPUT_URL is not set")?;

        let codec_params = match lookup("FFIO_CODEC_PARAMS") {
            Some(path) => CodecParams::from_json_file(path)?,
            None => CodecParams::default(),
        };

        let max_frames = lookup("FFIO_MAX_FRAMES")
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("FFIO_MAX_FRAMES={v:?} is not a number"))
            })
            .transpose()?;

        Ok(Self {
            input_url,
            output_url,
            codec_params,
            hw_enabled: lookup("FFIO_HW_ENABLED")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            hw_device: lookup("FFIO_HW_DEVICE").unwrap_or_default(),
            sei_filter: lookup("FFIO_SEI_FILTER").filter(|f| !f.is_empty()),
            max_frames,
        })
    }

    /// Output parameters with unset geometry taken from the opened input
    fn output_params(&self, width: u32, height: u32, framerate: f64) -> CodecParams {
        let mut params = self.codec_params.clone();
        if params.width <= 0 {
            params.width = width as i32;
        }
        if params.height <= 0 {
            params.height = height as i32;
        }
        if params.fps <= 0 {
            params.fps = framerate.round() as i32;
        }
        params
    }
}

/// Why the relay loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stopped,
    MaxFrames,
    EndOfStream,
    DecodeFailed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    pub frames_decoded: u64,
    pub frames_encoded: u64,
    pub encode_failures: u64,
    pub stop_reason: Option<StopReason>,
    /// Engine status of the frame that ended the loop
    pub last_error_code: Option<i32>,
}

/// Paired input and output sessions
pub struct Relay<S: EngineSession> {
    config: RelayConfig,
    input: StreamSession<S>,
    output: StreamSession<S>,
}

impl<S: EngineSession> Relay<S> {
    /// Open the input, then the output sized after it
    pub fn open<E>(engine: &E, config: RelayConfig) -> Result<Self>
    where
        E: Engine<Session = S>,
    {
        let mut input_options = SessionOptions::decoder(config.input_url.clone());
        if config.hw_enabled {
            input_options = input_options.with_hardware(config.hw_device.clone(), false);
        }
        let input = StreamSession::open(engine, input_options)
            .with_context(|| format!("Invalid input options for {}", config.input_url))?;
        if !input.is_valid() {
            bail!("Failed to open input {}", config.input_url);
        }

        let params = config.output_params(input.width(), input.height(), input.framerate());
        let mut output_options = SessionOptions::encoder(config.output_url.clone(), params);
        if config.hw_enabled {
            output_options = output_options.with_hardware(config.hw_device.clone(), false);
        }
        let output = StreamSession::open(engine, output_options)
            .with_context(|| format!("Invalid output options for {}", config.output_url))?;
        if !output.is_valid() {
            bail!("Failed to open output {}", config.output_url);
        }

        info!(input = %input, output = %output, "Relay opened");
        Ok(Self {
            config,
            input,
            output,
        })
    }

    /// Relay frames until the input ends, `max_frames` is reached or `stop` is set
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RelayStats> {
        let mut stats = RelayStats::default();
        let filter = self.config.sei_filter.as_deref();

        let reason = loop {
            if stop.load(Ordering::Relaxed) {
                break StopReason::Stopped;
            }
            if self
                .config
                .max_frames
                .is_some_and(|max| stats.frames_decoded >= max)
            {
                break StopReason::MaxFrames;
            }

            let frame = self.input.decode_one_frame(filter)?;
            if !frame.is_ok() {
                stats.last_error_code = frame.error().map(|e| e.code());
                break if frame.is_eof() {
                    StopReason::EndOfStream
                } else {
                    StopReason::DecodeFailed
                };
            }
            stats.frames_decoded += 1;

            let Some(data) = frame.data() else {
                warn!("Decoded frame carries no image data");
                break StopReason::DecodeFailed;
            };
            let sei = frame.sei_message();

            if self.output.encode_one_frame(data, sei.as_deref())? {
                stats.frames_encoded += 1;
            } else {
                stats.encode_failures += 1;
                debug!(seq = stats.frames_decoded, "Frame dropped by encoder");
            }
        };

        stats.stop_reason = Some(reason);
        info!(
            decoded = stats.frames_decoded,
            encoded = stats.frames_encoded,
            failed = stats.encode_failures,
            reason = ?reason,
            "Relay stopped"
        );
        Ok(stats)
    }

    pub fn input(&self) -> &StreamSession<S> {
        &self.input
    }

    pub fn output(&self) -> &StreamSession<S> {
        &self.output
    }

    /// Flush the output and free both sessions
    pub fn release(mut self) {
        self.output.release();
        self.input.release();
    }
}
