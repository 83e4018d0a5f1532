// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! Scripted engine for unit tests
//!
//! Sessions share one [`Script`] and one [`Calls`] log with the engine that
//! allocated them, so a test can inspect every call after the session is gone.

use std::cell::{Ref, RefCell};
use std::collections::VecDeque;
use std::ffi::CStr;
use std::rc::Rc;

use crate::engine::{Engine, EngineSession, EngineState, InitArgs};
use crate::error::EngineError;
use crate::ffi::RawCodecParams;
use crate::frame::{image_byte_size, Frame, FrameKind};
use crate::params::{CodecParams, Mode};

/// Outcome of one scripted decode call
#[derive(Debug, Clone)]
pub enum FakeDecode {
    Rgb { seis: Vec<String> },
    Fail(EngineError),
    Eof,
}

impl FakeDecode {
    pub fn rgb(seis: &[&str]) -> Self {
        Self::Rgb {
            seis: seis.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Script {
    /// State the engine reports after init
    pub open_state: EngineState,
    pub width: i32,
    pub height: i32,
    pub framerate: f64,
    /// Decode results in order; an RGB frame once exhausted
    pub decodes: VecDeque<FakeDecode>,
    /// Encode statuses in order; 0 once exhausted
    pub encode_statuses: VecDeque<i32>,
    pub fail_allocation: bool,
}

impl Script {
    pub fn open(width: i32, height: i32, framerate: f64) -> Self {
        Self {
            open_state: EngineState::Ready,
            width,
            height,
            framerate,
            decodes: VecDeque::new(),
            encode_statuses: VecDeque::new(),
            fail_allocation: false,
        }
    }

    pub fn failing(state: EngineState) -> Self {
        Self {
            open_state: state,
            ..Self::open(0, 0, 0.0)
        }
    }

    pub fn with_decodes(mut self, decodes: impl IntoIterator<Item = FakeDecode>) -> Self {
        self.decodes.extend(decodes);
        self
    }

    pub fn with_encode_statuses(mut self, statuses: impl IntoIterator<Item = i32>) -> Self {
        self.encode_statuses.extend(statuses);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedInit {
    pub mode: Mode,
    pub target_url: String,
    pub hw_enabled: bool,
    pub pix_fmt_hw_enabled: bool,
    pub hw_device: String,
    pub shm_enabled: bool,
    pub shm_name: String,
    pub shm_size: i32,
    pub shm_offset: i32,
    pub params: CodecParams,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub allocated: usize,
    pub inits: Vec<RecordedInit>,
    pub decode_filters: Vec<Option<String>>,
    pub shm_offsets: Vec<i32>,
    /// Image length and SEI bytes (terminator included) per encode call
    pub encoded: Vec<(usize, Option<Vec<u8>>)>,
    pub finalized: usize,
    pub deleted: usize,
}

pub struct FakeEngine {
    script: Rc<RefCell<Script>>,
    calls: Rc<RefCell<Calls>>,
}

impl FakeEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script: Rc::new(RefCell::new(script)),
            calls: Rc::new(RefCell::new(Calls::default())),
        }
    }

    pub fn calls(&self) -> Ref<'_, Calls> {
        self.calls.borrow()
    }
}

impl Engine for FakeEngine {
    type Session = FakeSession;

    fn allocate(&self) -> Option<FakeSession> {
        if self.script.borrow().fail_allocation {
            return None;
        }
        self.calls.borrow_mut().allocated += 1;
        Some(FakeSession {
            script: Rc::clone(&self.script),
            calls: Rc::clone(&self.calls),
            state: EngineState::Init,
            frame_seq: 0,
            width: 0,
            height: 0,
            framerate: 0.0,
            frame_data: Vec::new(),
            sei: None,
        })
    }
}

pub struct FakeSession {
    script: Rc<RefCell<Script>>,
    calls: Rc<RefCell<Calls>>,
    state: EngineState,
    frame_seq: i64,
    width: i32,
    height: i32,
    framerate: f64,
    frame_data: Vec<u8>,
    sei: Option<Vec<u8>>,
}

impl FakeSession {
    fn next_frame(&mut self, sei_filter: Option<&CStr>, with_data: bool) -> Frame<'_> {
        let next = self
            .script
            .borrow_mut()
            .decodes
            .pop_front()
            .unwrap_or(FakeDecode::Rgb { seis: Vec::new() });

        match next {
            FakeDecode::Rgb { seis } => {
                self.state = EngineState::Running;
                self.frame_seq += 1;

                let filter = sei_filter.map(|f| f.to_string_lossy().into_owned());
                let picked = match filter {
                    Some(filter) => seis.into_iter().find(|s| s.contains(&filter)),
                    None => seis.into_iter().next(),
                };
                self.sei = picked.map(|s| {
                    let mut bytes = s.into_bytes();
                    bytes.push(0);
                    bytes
                });

                let (width, height) = (self.width.max(0) as u32, self.height.max(0) as u32);
                self.frame_data = vec![self.frame_seq as u8; image_byte_size(width, height)];
                Frame::new(
                    FrameKind::Rgb,
                    None,
                    width,
                    height,
                    self.sei.as_deref(),
                    with_data.then_some(&self.frame_data[..]),
                )
            }
            FakeDecode::Fail(err) => Frame::new(FrameKind::Error, Some(err), 0, 0, None, None),
            FakeDecode::Eof => {
                self.state = EngineState::End;
                Frame::new(
                    FrameKind::Eof,
                    Some(EngineError::StreamEof),
                    0,
                    0,
                    None,
                    None,
                )
            }
        }
    }
}

impl EngineSession for FakeSession {
    fn init(&mut self, args: &InitArgs<'_>, params: &mut RawCodecParams) -> i32 {
        self.calls.borrow_mut().inits.push(RecordedInit {
            mode: args.mode,
            target_url: args.target_url.to_string_lossy().into_owned(),
            hw_enabled: args.hw_enabled,
            pix_fmt_hw_enabled: args.pix_fmt_hw_enabled,
            hw_device: args.hw_device.to_string_lossy().into_owned(),
            shm_enabled: args.shm_enabled,
            shm_name: args.shm_name.to_string_lossy().into_owned(),
            shm_size: args.shm_size,
            shm_offset: args.shm_offset,
            params: CodecParams::from_raw(params),
        });

        let script = self.script.borrow();
        self.state = script.open_state;
        if !self.state.is_open() {
            return EngineError::AvformatFailure.code();
        }
        self.width = script.width;
        self.height = script.height;
        self.framerate = script.framerate;
        0
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn frame_seq(&self) -> i64 {
        self.frame_seq
    }

    fn width(&self) -> i32 {
        self.width
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn framerate(&self) -> f64 {
        self.framerate
    }

    fn decode_one_frame(&mut self, sei_filter: Option<&CStr>) -> Frame<'_> {
        self.calls
            .borrow_mut()
            .decode_filters
            .push(sei_filter.map(|f| f.to_string_lossy().into_owned()));
        self.next_frame(sei_filter, true)
    }

    fn decode_one_frame_to_shm(&mut self, offset: i32, sei_filter: Option<&CStr>) -> Frame<'_> {
        self.calls.borrow_mut().shm_offsets.push(offset);
        self.next_frame(sei_filter, false)
    }

    fn encode_one_frame(&mut self, rgb: &[u8], sei_msg: Option<&CStr>) -> i32 {
        self.calls
            .borrow_mut()
            .encoded
            .push((rgb.len(), sei_msg.map(|m| m.to_bytes_with_nul().to_vec())));

        let status = self.script.borrow_mut().encode_statuses.pop_front().unwrap_or(0);
        if status == 0 {
            self.state = EngineState::Running;
            self.frame_seq += 1;
        }
        status
    }

    fn encode_one_frame_from_shm(&mut self, offset: i32, _sei_msg: Option<&CStr>) -> bool {
        self.calls.borrow_mut().shm_offsets.push(offset);
        let status = self.script.borrow_mut().encode_statuses.pop_front().unwrap_or(0);
        if status == 0 {
            self.state = EngineState::Running;
            self.frame_seq += 1;
        }
        status == 0
    }

    fn finalize(&mut self) {
        self.calls.borrow_mut().finalized += 1;
        self.state = EngineState::Closed;
    }

    fn delete(self) {
        self.calls.borrow_mut().deleted += 1;
    }
}
