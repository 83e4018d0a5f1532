// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Stream session
//!
//! [`StreamSession`] owns one engine session object for its whole lifetime and
//! translates the binding's calls into engine calls.
//!
//! # Lifecycle
//!
//! ```text
//! open() ──► valid ──► decode/encode ... ──► release() / drop
//!   │
//!   └──► invalid (engine object already deleted)
//! ```
//!
//! A session is opened exactly once. Opening never fails because the engine
//! could not open the target; that yields an invalid session instead, checked
//! with [`StreamSession::is_valid`]. Only malformed options are `Err`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ffio::{NativeEngine, SessionOptions, StreamSession};
//!
//! let engine = NativeEngine::load()?;
//! let mut session = StreamSession::open(&engine, SessionOptions::decoder("rtsp://cam/1"))?;
//! while session.is_valid() {
//!     let frame = session.decode_one_frame(None)?;
//!     if !frame.is_ok() {
//!         break;
//!     }
//!     let image = frame.to_array();
//! }
//! session.release();
//! ```

use std::ffi::CString;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::{to_engine_int, SessionOptions, ShmDescriptor};
use crate::engine::{Engine, EngineSession, EngineState, InitArgs};
use crate::error::{EngineError, Result, SessionError};
use crate::ffi::{NativeEngine, NativeSession, MAX_URL_LENGTH};
use crate::frame::{image_byte_size, Frame, FrameInput};
use crate::hardware::{resolve_hardware_device, Platform};
use crate::metrics::{
    adjust_active_sessions, record_frame_decoded, record_frame_encoded, record_frame_failure,
    OpenGuard,
};
use crate::params::{CodecParams, Mode};

/// One decode or encode context bound to a target url
pub struct StreamSession<S: EngineSession> {
    handle: Option<S>,
    /// State seen when the handle was last dropped
    last_state: EngineState,

    target_url: String,
    mode: Mode,
    hw_enabled: bool,
    pix_fmt_hw_enabled: bool,
    hw_device: String,
    shm: Option<ShmDescriptor>,
    codec_params: Option<CodecParams>,

    frame_seq_binding: u64,
    width: u32,
    height: u32,
    framerate: f64,
    open_elapsed: Duration,
}

/// Session over the dynamically loaded engine
pub type NativeStreamSession = StreamSession<NativeSession>;

impl NativeStreamSession {
    /// Load the engine library and open a session on it
    pub fn open_native(options: SessionOptions) -> Result<Self> {
        let engine = NativeEngine::load()?;
        Self::open(&engine, options)
    }
}

impl<S: EngineSession> StreamSession<S> {
    /// Validate `options`, allocate an engine session and open it
    pub fn open<E>(engine: &E, options: SessionOptions) -> Result<Self>
    where
        E: Engine<Session = S>,
    {
        let SessionOptions {
            target_url,
            mode,
            hw_enabled,
            pix_fmt_hw_enabled,
            hw_device,
            shm,
            codec_params,
        } = options;

        if mode == Mode::Decode {
            if let Some(field) = codec_params
                .as_ref()
                .and_then(CodecParams::first_decode_conflict)
            {
                return Err(SessionError::DecodeWithCodecParams { field });
            }
        }

        let hw_device = resolve_hardware_device(&hw_device, Platform::current())?;

        if pix_fmt_hw_enabled && !hw_enabled {
            // Accepted, but there is nothing to accelerate without a device.
            warn!(
                mode = %mode,
                "`pix_fmt_hw_enabled` should not be set when `hw_enabled` is false"
            );
        }
        let engine_pix_fmt_hw = pix_fmt_hw_enabled && hw_enabled;

        let c_url = validate_target_url(&target_url)?;
        let c_device = to_cstring("hardware device", &hw_device)?;
        let (c_shm_name, shm_size, shm_offset) = match &shm {
            Some(desc) => {
                let (size, offset) = desc.engine_bounds()?;
                (to_cstring("shm name", &desc.name)?, size, offset)
            }
            None => (CString::default(), 0, 0),
        };

        let mut params = codec_params.unwrap_or_default();
        params.pts_trick = params.pts_trick.resolve(&target_url);
        let mut raw_params = params.to_raw()?;

        let guard = OpenGuard::new(mode);
        let mut handle = engine.allocate().ok_or(SessionError::Allocation)?;

        let args = InitArgs {
            mode,
            target_url: &c_url,
            hw_enabled,
            pix_fmt_hw_enabled: engine_pix_fmt_hw,
            hw_device: &c_device,
            shm_enabled: shm.is_some(),
            shm_name: &c_shm_name,
            shm_size,
            shm_offset,
        };
        let status = handle.init(&args, &mut raw_params);
        let state = handle.state();
        debug!(status, state = ?state, "engine init returned");

        let mut session = Self {
            handle: None,
            last_state: state,
            target_url,
            mode,
            hw_enabled,
            pix_fmt_hw_enabled,
            hw_device,
            shm,
            codec_params: Some(CodecParams::from_raw(&raw_params)),
            frame_seq_binding: 0,
            width: 0,
            height: 0,
            framerate: 0.0,
            open_elapsed: Duration::ZERO,
        };

        if state.is_open() {
            session.open_elapsed = guard.success();
            session.width = handle.width().max(0) as u32;
            session.height = handle.height().max(0) as u32;
            session.framerate = handle.framerate();
            session.handle = Some(handle);

            info!(
                mode = %mode,
                url = %session.target_url,
                "inited ffio after: {:.4} seconds",
                session.open_elapsed.as_secs_f64()
            );
            info!(
                mode = %mode,
                "open stream with: {}x{}",
                session.width,
                session.height
            );
        } else {
            session.open_elapsed = guard.error();
            handle.delete();

            warn!(
                mode = %mode,
                url = %session.target_url,
                state = ?state,
                "failed to initialize ffio after: {:.4} seconds",
                session.open_elapsed.as_secs_f64()
            );
        }

        Ok(session)
    }

    /// Whether the engine session is open for decode/encode calls
    pub fn is_valid(&self) -> bool {
        self.state().is_open()
    }

    /// Live engine state
    pub fn state(&self) -> EngineState {
        self.handle
            .as_ref()
            .map_or(self.last_state, EngineSession::state)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn hw_enabled(&self) -> bool {
        self.hw_enabled
    }

    /// As requested; the engine only sees it together with `hw_enabled`
    pub fn pix_fmt_hw_enabled(&self) -> bool {
        self.pix_fmt_hw_enabled
    }

    pub fn hw_device(&self) -> &str {
        &self.hw_device
    }

    pub fn shm(&self) -> Option<&ShmDescriptor> {
        self.shm.as_ref()
    }

    pub fn shm_enabled(&self) -> bool {
        self.shm.is_some()
    }

    /// Parameters as negotiated by the engine, `None` after release
    pub fn codec_params(&self) -> Option<&CodecParams> {
        self.codec_params.as_ref()
    }

    /// Frames decoded or encoded successfully through this session
    pub fn frame_seq_binding(&self) -> u64 {
        self.frame_seq_binding
    }

    /// Engine-side frame counter
    pub fn frame_seq_engine(&self) -> i64 {
        self.handle.as_ref().map_or(0, EngineSession::frame_seq)
    }

    pub fn width(&self) -> u32 {
        self.handle
            .as_ref()
            .map_or(self.width, |h| h.width().max(0) as u32)
    }

    pub fn height(&self) -> u32 {
        self.handle
            .as_ref()
            .map_or(self.height, |h| h.height().max(0) as u32)
    }

    pub fn framerate(&self) -> f64 {
        self.handle
            .as_ref()
            .map_or(self.framerate, EngineSession::framerate)
    }

    pub fn fps(&self) -> f64 {
        self.framerate()
    }

    /// Time the engine took to open the target
    pub fn open_elapsed(&self) -> Duration {
        self.open_elapsed
    }

    /// Decode one frame
    ///
    /// With a filter, the frame carries the first SEI message containing it;
    /// without one, the first SEI message if any. A failed decode is a frame
    /// whose [`Frame::is_ok`] is false.
    pub fn decode_one_frame(&mut self, sei_filter: Option<&str>) -> Result<Frame<'_>> {
        self.expect_mode(Mode::Decode)?;
        let filter = sei_filter
            .map(|f| to_cstring("sei filter", f))
            .transpose()?;

        let Some(handle) = self.handle.as_mut() else {
            warn!("decode_one_frame called on a session without an engine handle");
            return Ok(Frame::unavailable());
        };

        let frame = handle.decode_one_frame(filter.as_deref());
        if frame.is_ok() {
            self.frame_seq_binding += 1;
            record_frame_decoded();
            trace!(seq = self.frame_seq_binding, "decoded frame");
        } else {
            record_frame_failure("decode");
            debug!(kind = ?frame.kind(), error = ?frame.error(), "decode produced no frame");
        }
        Ok(frame)
    }

    /// Decode one frame into the session's shared-memory region at `offset`
    pub fn decode_one_frame_to_shm(
        &mut self,
        offset: u64,
        sei_filter: Option<&str>,
    ) -> Result<Frame<'_>> {
        self.expect_mode(Mode::Decode)?;
        let offset = self.shm_offset(offset)?;
        let filter = sei_filter
            .map(|f| to_cstring("sei filter", f))
            .transpose()?;

        let Some(handle) = self.handle.as_mut() else {
            warn!("decode_one_frame_to_shm called on a session without an engine handle");
            return Ok(Frame::unavailable());
        };

        let frame = handle.decode_one_frame_to_shm(offset, filter.as_deref());
        if frame.is_ok() {
            self.frame_seq_binding += 1;
            record_frame_decoded();
            trace!(seq = self.frame_seq_binding, offset, "decoded frame to shm");
        } else {
            record_frame_failure("decode_shm");
            debug!(kind = ?frame.kind(), error = ?frame.error(), "shm decode produced no frame");
        }
        Ok(frame)
    }

    /// Submit one raw RGB24 frame to the encoder
    ///
    /// `true` means the frame was accepted. The encoded packet may only be
    /// written on a later call since the engine buffers and reorders.
    pub fn encode_one_frame<'i>(
        &mut self,
        input: impl Into<FrameInput<'i>>,
        sei_msg: Option<&str>,
    ) -> Result<bool> {
        self.expect_mode(Mode::Encode)?;
        let bytes = input.into().to_bytes()?;
        let sei = sei_msg.map(|m| to_cstring("sei message", m)).transpose()?;

        let Some(handle) = self.handle.as_mut() else {
            warn!("encode_one_frame called on a session without an engine handle");
            return Ok(false);
        };

        let expected = image_byte_size(handle.width().max(0) as u32, handle.height().max(0) as u32);
        if bytes.len() != expected {
            return Err(SessionError::FrameSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let status = handle.encode_one_frame(&bytes, sei.as_deref());
        if status == 0 {
            self.frame_seq_binding += 1;
            record_frame_encoded();
            trace!(seq = self.frame_seq_binding, "encoded frame");
            Ok(true)
        } else {
            record_frame_failure("encode");
            debug!(error = ?EngineError::from_code(status), "encoder rejected frame");
            Ok(false)
        }
    }

    /// Encode one raw frame read from the shared-memory region at `offset`
    pub fn encode_one_frame_from_shm(&mut self, offset: u64, sei_msg: Option<&str>) -> Result<bool> {
        self.expect_mode(Mode::Encode)?;
        let offset = self.shm_offset(offset)?;
        let sei = sei_msg.map(|m| to_cstring("sei message", m)).transpose()?;

        let Some(handle) = self.handle.as_mut() else {
            warn!("encode_one_frame_from_shm called on a session without an engine handle");
            return Ok(false);
        };

        if handle.encode_one_frame_from_shm(offset, sei.as_deref()) {
            self.frame_seq_binding += 1;
            record_frame_encoded();
            trace!(seq = self.frame_seq_binding, offset, "encoded frame from shm");
            Ok(true)
        } else {
            record_frame_failure("encode_shm");
            debug!(offset, "encoder rejected shm frame");
            Ok(false)
        }
    }

    /// Flush and free the engine session
    ///
    /// Later calls report failure without reaching the engine; releasing twice
    /// is a no-op.
    pub fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.finalize();
            handle.delete();
            adjust_active_sessions(-1.0);
            info!(mode = %self.mode, url = %self.target_url, "released ffio session");
        }

        self.last_state = EngineState::Closed;
        self.target_url.clear();
        self.codec_params = None;
        self.width = 0;
        self.height = 0;
        self.framerate = 0.0;
        self.frame_seq_binding = 0;
    }

    fn expect_mode(&self, expected: Mode) -> Result<()> {
        if self.mode == expected {
            Ok(())
        } else {
            Err(SessionError::WrongMode {
                expected: expected.as_str(),
            })
        }
    }

    fn shm_offset(&self, offset: u64) -> Result<i32> {
        if self.shm.is_none() {
            return Err(SessionError::ShmNotEnabled);
        }
        to_engine_int("offset", offset)
    }
}

impl<S: EngineSession> Drop for StreamSession<S> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.release();
        }
    }
}

impl<S: EngineSession> fmt::Display for StreamSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "<ffio::StreamSession, invalid {}>", self.mode);
        }

        let shm = if self.shm_enabled() { "shm_enabled" } else { "shm_disabled" };
        let hw = if self.hw_enabled { "hw_enabled" } else { "hw_disabled" };
        let pix_fmt_hw = if self.pix_fmt_hw_enabled {
            "pix_fmt_hw_enabled"
        } else {
            "pix_fmt_hw_disabled"
        };
        write!(
            f,
            "<ffio::StreamSession, valid {}, {}x{}, {}, {}, {}>",
            self.mode,
            self.width(),
            self.height(),
            shm,
            hw,
            pix_fmt_hw
        )
    }
}

impl<S: EngineSession> fmt::Debug for StreamSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("target_url", &self.target_url)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("hw_device", &self.hw_device)
            .field("shm", &self.shm)
            .field("frame_seq_binding", &self.frame_seq_binding)
            .finish()
    }
}

fn validate_target_url(target_url: &str) -> Result<CString> {
    if target_url.is_empty() {
        return Err(SessionError::EmptyTargetUrl);
    }
    if target_url.len() >= MAX_URL_LENGTH {
        return Err(SessionError::TargetUrlTooLong {
            len: target_url.len(),
            max: MAX_URL_LENGTH - 1,
        });
    }
    to_cstring("target url", target_url)
}

fn to_cstring(what: &'static str, value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| SessionError::InteriorNul { what })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_engine::{FakeDecode, FakeEngine, Script};
    use crate::frame::FrameKind;
    use crate::params::PtsTrick;
    use ndarray::Array3;

    fn decoder_engine() -> FakeEngine {
        FakeEngine::new(Script::open(4, 2, 25.0))
    }

    fn encoder_params() -> CodecParams {
        CodecParams {
            width: 4,
            height: 2,
            fps: 25,
            bitrate: 500_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_rtsp_decode_scenario() {
        let engine = decoder_engine();
        let mut session =
            StreamSession::open(&engine, SessionOptions::decoder("rtsp://cam/1")).unwrap();

        assert!(session.is_valid());
        assert_eq!(session.codec_params().unwrap().pts_trick, PtsTrick::Even);
        assert_eq!(engine.calls().inits[0].params.pts_trick, PtsTrick::Even);

        let frame = session.decode_one_frame(None).unwrap();
        assert!(frame.is_ok());
        assert_eq!(session.frame_seq_binding(), 1);
    }

    #[test]
    fn test_file_target_resolves_increase() {
        let engine = decoder_engine();
        let session = StreamSession::open(&engine, SessionOptions::decoder("file.mp4")).unwrap();
        assert_eq!(session.codec_params().unwrap().pts_trick, PtsTrick::Increase);
    }

    #[test]
    fn test_explicit_pts_trick_not_overwritten() {
        let engine = FakeEngine::new(Script::open(4, 2, 25.0));
        let params = CodecParams {
            pts_trick: PtsTrick::Increase,
            ..encoder_params()
        };
        let session =
            StreamSession::open(&engine, SessionOptions::encoder("rtmp://live/app", params))
                .unwrap();
        assert_eq!(session.codec_params().unwrap().pts_trick, PtsTrick::Increase);
    }

    #[test]
    fn test_decode_with_codec_params_fails_before_engine() {
        let engine = decoder_engine();
        let params = CodecParams {
            bitrate: 500,
            ..Default::default()
        };
        let options = SessionOptions::decoder("file.mp4").with_codec_params(params);

        let err = StreamSession::open(&engine, options).unwrap_err();
        assert!(matches!(
            err,
            SessionError::DecodeWithCodecParams { field: "bitrate" }
        ));
        assert_eq!(engine.calls().allocated, 0);
    }

    #[test]
    fn test_decode_with_neutral_codec_params_opens() {
        let engine = decoder_engine();
        let params = CodecParams {
            flags: "+low_delay".to_string(),
            ..Default::default()
        };
        let options = SessionOptions::decoder("file.mp4").with_codec_params(params);
        assert!(StreamSession::open(&engine, options).unwrap().is_valid());
    }

    #[test]
    fn test_invalid_hw_device_fails() {
        let engine = decoder_engine();
        let options = SessionOptions::decoder("file.mp4").with_hardware("gpu0", false);
        assert!(matches!(
            StreamSession::open(&engine, options),
            Err(SessionError::InvalidHardwareDevice(_))
        ));
        assert_eq!(engine.calls().allocated, 0);
    }

    #[test]
    fn test_hw_device_canonicalized() {
        let engine = decoder_engine();
        let options = SessionOptions::decoder("file.mp4").with_hardware("CUDA", true);
        let session = StreamSession::open(&engine, options).unwrap();

        assert_eq!(session.hw_device(), "cuda:0");
        let calls = engine.calls();
        assert_eq!(calls.inits[0].hw_device, "cuda:0");
        assert!(calls.inits[0].hw_enabled);
        assert!(calls.inits[0].pix_fmt_hw_enabled);
    }

    #[test]
    fn test_default_hw_device_passed_to_engine() {
        let engine = decoder_engine();
        let session = StreamSession::open(&engine, SessionOptions::decoder("file.mp4")).unwrap();
        let expected = crate::hardware::default_hardware_device(Platform::current());
        assert_eq!(session.hw_device(), expected);
        assert_eq!(engine.calls().inits[0].hw_device, expected);
    }

    #[test]
    fn test_pix_fmt_hw_without_hw_is_accepted() {
        let engine = decoder_engine();
        let mut options = SessionOptions::decoder("file.mp4");
        options.pix_fmt_hw_enabled = true;

        let session = StreamSession::open(&engine, options).unwrap();
        assert!(session.is_valid());
        assert!(session.pix_fmt_hw_enabled());
        assert!(!engine.calls().inits[0].pix_fmt_hw_enabled);
        assert!(session.to_string().ends_with("hw_disabled, pix_fmt_hw_enabled>"));
    }

    #[test]
    fn test_url_validation() {
        let engine = decoder_engine();
        assert!(matches!(
            StreamSession::open(&engine, SessionOptions::decoder("")),
            Err(SessionError::EmptyTargetUrl)
        ));
        assert!(matches!(
            StreamSession::open(&engine, SessionOptions::decoder("a".repeat(MAX_URL_LENGTH))),
            Err(SessionError::TargetUrlTooLong { .. })
        ));
        assert!(matches!(
            StreamSession::open(&engine, SessionOptions::decoder("in\0.mp4")),
            Err(SessionError::InteriorNul { .. })
        ));
        assert_eq!(engine.calls().allocated, 0);
    }

    #[test]
    fn test_open_mirrors_engine_values() {
        let engine = FakeEngine::new(Script::open(1920, 1080, 29.97));
        let session = StreamSession::open(&engine, SessionOptions::decoder("in.mp4")).unwrap();

        assert_eq!(session.width(), 1920);
        assert_eq!(session.height(), 1080);
        assert_eq!(session.fps(), 29.97);
        assert_eq!(session.state(), EngineState::Ready);
        assert_eq!(
            session.to_string(),
            "<ffio::StreamSession, valid decoder, 1920x1080, shm_disabled, hw_disabled, pix_fmt_hw_disabled>"
        );
    }

    #[test]
    fn test_failed_open_is_invalid_and_deleted() {
        let engine = FakeEngine::new(Script::failing(EngineState::Init));
        let mut session =
            StreamSession::open(&engine, SessionOptions::decoder("missing.mp4")).unwrap();

        assert!(!session.is_valid());
        assert_eq!(session.width(), 0);
        assert_eq!(session.height(), 0);
        assert_eq!(session.framerate(), 0.0);
        assert_eq!(session.to_string(), "<ffio::StreamSession, invalid decoder>");
        {
            let calls = engine.calls();
            assert_eq!(calls.deleted, 1);
            assert_eq!(calls.finalized, 0);
        }

        let frame = session.decode_one_frame(None).unwrap();
        assert!(!frame.is_ok());
        assert_eq!(frame.error(), Some(EngineError::NotAvailable));
        assert_eq!(session.frame_seq_binding(), 0);

        drop(session);
        assert_eq!(engine.calls().deleted, 1);
    }

    #[test]
    fn test_running_state_counts_as_valid() {
        let engine = FakeEngine::new(Script {
            open_state: EngineState::Running,
            ..Script::open(4, 2, 25.0)
        });
        let session = StreamSession::open(&engine, SessionOptions::decoder("in.mp4")).unwrap();
        assert!(session.is_valid());
    }

    #[test]
    fn test_allocation_failure() {
        let engine = FakeEngine::new(Script {
            fail_allocation: true,
            ..Script::open(4, 2, 25.0)
        });
        assert!(matches!(
            StreamSession::open(&engine, SessionOptions::decoder("in.mp4")),
            Err(SessionError::Allocation)
        ));
    }

    #[test]
    fn test_decode_failure_does_not_count() {
        let engine = FakeEngine::new(Script::open(4, 2, 25.0).with_decodes([
            FakeDecode::rgb(&[]),
            FakeDecode::Fail(EngineError::RecvFromCodec),
            FakeDecode::rgb(&[]),
            FakeDecode::Eof,
        ]));
        let mut session = StreamSession::open(&engine, SessionOptions::decoder("in.mp4")).unwrap();

        assert!(session.decode_one_frame(None).unwrap().is_ok());
        let failed = session.decode_one_frame(None).unwrap();
        assert!(!failed.is_ok());
        assert_eq!(failed.error(), Some(EngineError::RecvFromCodec));
        assert_eq!(session.frame_seq_binding(), 1);

        assert!(session.decode_one_frame(None).unwrap().is_ok());
        assert_eq!(session.frame_seq_binding(), 2);
        assert_eq!(session.frame_seq_engine(), 2);

        let eof = session.decode_one_frame(None).unwrap();
        assert_eq!(eof.kind(), FrameKind::Eof);
        assert_eq!(session.frame_seq_binding(), 2);
        assert_eq!(session.state(), EngineState::End);
        assert!(!session.is_valid());
    }

    #[test]
    fn test_decode_sei_filter() {
        let engine = FakeEngine::new(Script::open(4, 2, 25.0).with_decodes([
            FakeDecode::rgb(&["gps=1,2", "camera=7"]),
            FakeDecode::rgb(&["gps=1,2", "camera=7"]),
        ]));
        let mut session = StreamSession::open(&engine, SessionOptions::decoder("in.mp4")).unwrap();

        let frame = session.decode_one_frame(Some("camera")).unwrap();
        assert_eq!(frame.sei_message().as_deref(), Some("camera=7"));
        assert_eq!(frame.to_array().unwrap().shape(), &[2, 4, 3]);

        let frame = session.decode_one_frame(None).unwrap();
        assert_eq!(frame.sei_message().as_deref(), Some("gps=1,2"));

        assert_eq!(
            engine.calls().decode_filters,
            vec![Some("camera".to_string()), None]
        );
    }

    #[test]
    fn test_decode_on_encoder_is_wrong_mode() {
        let engine = decoder_engine();
        let mut session =
            StreamSession::open(&engine, SessionOptions::encoder("out.mp4", encoder_params()))
                .unwrap();
        assert!(matches!(
            session.decode_one_frame(None),
            Err(SessionError::WrongMode { expected: "decoder" })
        ));
    }

    #[test]
    fn test_encode_scenario() {
        let engine = FakeEngine::new(Script::open(4, 2, 25.0).with_encode_statuses([0, -98, 0]));
        let mut session =
            StreamSession::open(&engine, SessionOptions::encoder("out.mp4", encoder_params()))
                .unwrap();
        assert!(session.is_valid());

        let image = vec![0u8; 4 * 2 * 3];
        assert!(session.encode_one_frame(&image, Some("frame=0")).unwrap());
        assert_eq!(session.frame_seq_binding(), 1);

        // Rejected by the engine
        assert!(!session.encode_one_frame(&image, None).unwrap());
        assert_eq!(session.frame_seq_binding(), 1);

        let array = Array3::<u8>::zeros((2, 4, 3));
        assert!(session.encode_one_frame(array.view(), None).unwrap());
        assert_eq!(session.frame_seq_binding(), 2);

        let calls = engine.calls();
        assert_eq!(calls.encoded.len(), 3);
        assert_eq!(calls.encoded[0].0, 24);
        assert_eq!(calls.encoded[0].1.as_deref(), Some(&b"frame=0\0"[..]));
        assert_eq!(calls.encoded[1].1, None);
    }

    #[test]
    fn test_encode_rejects_wrong_size_and_image_input() {
        let engine = decoder_engine();
        let mut session =
            StreamSession::open(&engine, SessionOptions::encoder("out.mp4", encoder_params()))
                .unwrap();

        let short = vec![0u8; 10];
        assert!(matches!(
            session.encode_one_frame(&short, None),
            Err(SessionError::FrameSizeMismatch {
                expected: 24,
                actual: 10
            })
        ));

        let image = image::RgbImage::new(4, 2);
        assert!(matches!(
            session.encode_one_frame(FrameInput::Image(&image), None),
            Err(SessionError::UnsupportedFrameInput(_))
        ));

        assert_eq!(session.frame_seq_binding(), 0);
        assert!(engine.calls().encoded.is_empty());
    }

    #[test]
    fn test_shm_roundtrip_calls() {
        let shm = ShmDescriptor::new("/ffio_test", 4 * 2 * 3 * 4, 8);
        let engine = FakeEngine::new(Script::open(4, 2, 25.0).with_decodes([FakeDecode::rgb(&[])]));

        let mut decoder = StreamSession::open(
            &engine,
            SessionOptions::decoder("rtsp://cam/1").with_shm(shm.clone()),
        )
        .unwrap();
        assert!(decoder.shm_enabled());
        let frame = decoder.decode_one_frame_to_shm(24, None).unwrap();
        assert!(frame.is_ok());
        assert!(frame.data().is_none());
        assert_eq!(decoder.frame_seq_binding(), 1);

        let mut encoder = StreamSession::open(
            &engine,
            SessionOptions::encoder("rtmp://live/app", encoder_params()).with_shm(shm),
        )
        .unwrap();
        assert!(encoder.encode_one_frame_from_shm(48, Some("x")).unwrap());
        assert_eq!(encoder.frame_seq_binding(), 1);

        let calls = engine.calls();
        assert_eq!(calls.inits[0].mode, Mode::Decode);
        assert_eq!(calls.inits[0].target_url, "rtsp://cam/1");
        assert!(calls.inits[0].shm_enabled);
        assert_eq!(calls.inits[0].shm_name, "/ffio_test");
        assert_eq!(calls.inits[0].shm_size, 96);
        assert_eq!(calls.inits[0].shm_offset, 8);
        assert_eq!(calls.inits[1].mode, Mode::Encode);
        assert_eq!(calls.inits[1].target_url, "rtmp://live/app");
        assert_eq!(calls.shm_offsets, vec![24, 48]);
    }

    #[test]
    fn test_failed_shm_calls_do_not_count() {
        let shm = ShmDescriptor::new("/ffio_test", 4 * 2 * 3 * 4, 0);
        let engine = FakeEngine::new(
            Script::open(4, 2, 25.0)
                .with_decodes([FakeDecode::Fail(EngineError::ShmFailure), FakeDecode::rgb(&[])])
                .with_encode_statuses([EngineError::ShmFailure.code(), 0]),
        );

        let mut decoder = StreamSession::open(
            &engine,
            SessionOptions::decoder("in.mp4").with_shm(shm.clone()),
        )
        .unwrap();
        let frame = decoder.decode_one_frame_to_shm(0, None).unwrap();
        assert!(!frame.is_ok());
        assert_eq!(frame.error(), Some(EngineError::ShmFailure));
        assert_eq!(decoder.frame_seq_binding(), 0);
        assert!(decoder.decode_one_frame_to_shm(0, None).unwrap().is_ok());
        assert_eq!(decoder.frame_seq_binding(), 1);

        let mut encoder = StreamSession::open(
            &engine,
            SessionOptions::encoder("out.mp4", encoder_params()).with_shm(shm),
        )
        .unwrap();
        assert!(!encoder.encode_one_frame_from_shm(0, None).unwrap());
        assert_eq!(encoder.frame_seq_binding(), 0);
        assert!(encoder.encode_one_frame_from_shm(24, None).unwrap());
        assert_eq!(encoder.frame_seq_binding(), 1);
    }

    #[test]
    fn test_shm_calls_require_shm() {
        let engine = decoder_engine();
        let mut session = StreamSession::open(&engine, SessionOptions::decoder("in.mp4")).unwrap();
        assert!(matches!(
            session.decode_one_frame_to_shm(0, None),
            Err(SessionError::ShmNotEnabled)
        ));
        let calls = engine.calls();
        assert!(!calls.inits[0].shm_enabled);
        assert_eq!(calls.inits[0].shm_name, "");
        assert_eq!(calls.inits[0].shm_size, 0);
    }

    #[test]
    fn test_release_resets_and_is_idempotent() {
        let engine = FakeEngine::new(Script::open(4, 2, 25.0).with_decodes([FakeDecode::rgb(&[])]));
        let mut session = StreamSession::open(&engine, SessionOptions::decoder("in.mp4")).unwrap();
        assert!(session.decode_one_frame(None).unwrap().is_ok());
        assert_eq!(session.frame_seq_binding(), 1);

        session.release();
        assert_eq!(session.frame_seq_binding(), 0);
        assert_eq!(session.width(), 0);
        assert_eq!(session.height(), 0);
        assert!(session.target_url().is_empty());
        assert!(session.codec_params().is_none());
        assert_eq!(session.state(), EngineState::Closed);
        assert!(!session.is_valid());

        // No engine calls after release
        assert!(!session.decode_one_frame(None).unwrap().is_ok());
        session.release();
        drop(session);

        let calls = engine.calls();
        assert_eq!(calls.finalized, 1);
        assert_eq!(calls.deleted, 1);
        assert_eq!(calls.decode_filters.len(), 1);
    }

    #[test]
    fn test_drop_releases_engine_session() {
        let engine = decoder_engine();
        {
            let session =
                StreamSession::open(&engine, SessionOptions::encoder("out.mp4", encoder_params()))
                    .unwrap();
            assert!(session.is_valid());
        }
        let calls = engine.calls();
        assert_eq!(calls.finalized, 1);
        assert_eq!(calls.deleted, 1);
    }

    #[test]
    fn test_encode_after_release_returns_false() {
        let engine = decoder_engine();
        let mut session =
            StreamSession::open(&engine, SessionOptions::encoder("out.mp4", encoder_params()))
                .unwrap();
        session.release();
        let image = vec![0u8; 24];
        assert!(!session.encode_one_frame(&image, None).unwrap());
        assert_eq!(session.frame_seq_binding(), 0);
    }

    #[test]
    fn test_sei_with_nul_rejected() {
        let engine = decoder_engine();
        let mut session =
            StreamSession::open(&engine, SessionOptions::encoder("out.mp4", encoder_params()))
                .unwrap();
        let image = vec![0u8; 24];
        assert!(matches!(
            session.encode_one_frame(&image, Some("a\0b")),
            Err(SessionError::InteriorNul { what: "sei message" })
        ));
    }
}
