// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

//! FFI layer for the native ffio engine
//!
//! The engine is a C library loaded at runtime with `libloading`. Its session
//! object is only ever touched through the leading fields declared in
//! [`RawFfio`]; everything after them is engine-private.
//!
//! # Safety
//!
//! - The engine owns the session object; Rust owns the pointer to it and frees
//!   it exactly once through `api_deleteFFIO`
//! - Frames returned by the decode entry points live inside the session object
//!   and are valid until the next call on it
//! - Encode entry points read exactly `image_width * image_height * 3` bytes

use std::ffi::CStr;
use std::fmt;
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use libloading::Library;
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::{Engine, EngineSession, EngineState, InitArgs};
use crate::error::EngineError;
use crate::frame::{image_byte_size, Frame, FrameKind};

/// Length of every string field in the engine's `CodecParams`
pub const CODEC_STRING_LEN: usize = 24;

/// Size of the engine's url buffer, terminator included
pub const MAX_URL_LENGTH: usize = 256;

/// Environment variable overriding the engine library location
pub const LIB_PATH_ENV: &str = "FFIO_LIB_PATH";

/// Leading fields of the engine's `FFIO` struct
#[repr(C)]
#[derive(Debug)]
pub struct RawFfio {
    pub ffio_state: c_int,
    pub ffio_mode: c_int,
    pub frame_seq: c_int,
    pub hw_enabled: bool,
    pub pix_fmt_hw_enabled: bool,
    pub shm_enabled: bool,
    pub shm_fd: c_int,
    pub shm_size: c_int,
    pub video_stream_index: c_int,
    pub image_width: c_int,
    pub image_height: c_int,
    pub image_byte_size: c_int,
    pub framerate: f64,
}

/// Engine `CodecParams`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawCodecParams {
    pub width: c_int,
    pub height: c_int,
    pub bitrate: c_int,
    pub max_bitrate: c_int,
    pub fps: c_int,
    pub gop: c_int,
    pub b_frames: c_int,
    pub pts_trick: c_int,

    pub flags: [c_char; CODEC_STRING_LEN],
    pub flags2: [c_char; CODEC_STRING_LEN],
    pub profile: [c_char; CODEC_STRING_LEN],
    pub preset: [c_char; CODEC_STRING_LEN],
    pub tune: [c_char; CODEC_STRING_LEN],
    pub pix_fmt: [c_char; CODEC_STRING_LEN],
    pub format: [c_char; CODEC_STRING_LEN],
    pub codec: [c_char; CODEC_STRING_LEN],
    pub sei_uuid: [u8; 16],
    pub use_h264_annexb_sei: bool,
}

/// Engine `FFIOFrame`
#[repr(C)]
#[derive(Debug)]
pub struct RawFrame {
    pub frame_type: c_int,
    pub err: c_int,
    pub width: c_int,
    pub height: c_int,
    pub sei_msg: *mut c_char,
    pub sei_msg_size: c_int,
    pub data: *mut u8,
}

/// Errors loading the engine library
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load engine library {}: {source}", .path.display())]
    LibraryNotFound {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("engine library is missing symbol {name}: {source}")]
    SymbolNotFound {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

type NewFn = unsafe extern "C" fn() -> *mut RawFfio;
type InitFn = unsafe extern "C" fn(
    *mut RawFfio,
    c_int,
    *const c_char,
    bool,
    bool,
    *const c_char,
    bool,
    *const c_char,
    c_int,
    c_int,
    *mut RawCodecParams,
) -> c_int;
type FinalizeFn = unsafe extern "C" fn(*mut RawFfio) -> *mut RawFfio;
type DeleteFn = unsafe extern "C" fn(*mut RawFfio);
type DecodeFn = unsafe extern "C" fn(*mut RawFfio, *const c_char) -> *mut RawFrame;
type DecodeShmFn = unsafe extern "C" fn(*mut RawFfio, c_int, *const c_char) -> *mut RawFrame;
type EncodeFn = unsafe extern "C" fn(*mut RawFfio, *const u8, *const c_char, u32) -> c_int;
type EncodeShmFn = unsafe extern "C" fn(*mut RawFfio, c_int, *const c_char, u32) -> bool;

/// Engine entry points
pub struct FfioApi {
    /// Must outlive every function pointer below
    _lib: Library,

    new_ffio: NewFn,
    init_ffio: InitFn,
    finalize_ffio: FinalizeFn,
    delete_ffio: DeleteFn,
    decode_one_frame: DecodeFn,
    decode_one_frame_to_shm: DecodeShmFn,
    encode_one_frame: EncodeFn,
    encode_one_frame_from_shm: EncodeShmFn,
}

impl fmt::Debug for FfioApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfioApi").field("loaded", &true).finish()
    }
}

impl FfioApi {
    /// Platform file name of the engine library
    pub fn library_name() -> &'static str {
        if cfg!(target_os = "windows") {
            "ffio.dll"
        } else if cfg!(target_os = "macos") {
            "libffio.dylib"
        } else {
            "libffio.so"
        }
    }

    /// Library path from `FFIO_LIB_PATH`, else the platform name
    pub fn default_path() -> PathBuf {
        std::env::var_os(LIB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::library_name()))
    }

    pub fn load() -> Result<Self, LoadError> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, LoadError> {
        info!(path = %path.display(), "Loading ffio engine library");

        // SAFETY: loading the engine runs no initialisers beyond FFmpeg's own.
        let lib = unsafe { Library::new(path) }.map_err(|source| LoadError::LibraryNotFound {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: signatures below match the engine's exported `api_*` wrappers.
        // Each symbol is copied out as a plain function pointer so the borrow on
        // `lib` ends before it moves into the struct.
        unsafe {
            let new_ffio = *symbol::<NewFn>(&lib, "api_newFFIO")?;
            let init_ffio = *symbol::<InitFn>(&lib, "api_initFFIO")?;
            let finalize_ffio = *symbol::<FinalizeFn>(&lib, "api_finalizeFFIO")?;
            let delete_ffio = *symbol::<DeleteFn>(&lib, "api_deleteFFIO")?;
            let decode_one_frame = *symbol::<DecodeFn>(&lib, "api_decodeOneFrame")?;
            let decode_one_frame_to_shm = *symbol::<DecodeShmFn>(&lib, "api_decodeOneFrameToShm")?;
            let encode_one_frame = *symbol::<EncodeFn>(&lib, "api_encodeOneFrame")?;
            let encode_one_frame_from_shm =
                *symbol::<EncodeShmFn>(&lib, "api_encodeOneFrameFromShm")?;

            debug!("All ffio engine symbols loaded");

            Ok(Self {
                _lib: lib,
                new_ffio,
                init_ffio,
                finalize_ffio,
                delete_ffio,
                decode_one_frame,
                decode_one_frame_to_shm,
                encode_one_frame,
                encode_one_frame_from_shm,
            })
        }
    }
}

unsafe fn symbol<'lib, T>(
    lib: &'lib Library,
    name: &'static str,
) -> Result<libloading::Symbol<'lib, T>, LoadError> {
    let mut c_name = Vec::with_capacity(name.len() + 1);
    c_name.extend_from_slice(name.as_bytes());
    c_name.push(0);
    lib.get::<T>(&c_name)
        .map_err(|source| LoadError::SymbolNotFound { name, source })
}

/// Engine backed by the loaded C library
#[derive(Debug, Clone)]
pub struct NativeEngine {
    api: Arc<FfioApi>,
}

impl NativeEngine {
    pub fn load() -> Result<Self, LoadError> {
        Ok(Self::new(FfioApi::load()?))
    }

    pub fn new(api: FfioApi) -> Self {
        Self { api: Arc::new(api) }
    }
}

impl Engine for NativeEngine {
    type Session = NativeSession;

    fn allocate(&self) -> Option<NativeSession> {
        // SAFETY: no preconditions.
        let ptr = unsafe { (self.api.new_ffio)() };
        NonNull::new(ptr).map(|ptr| NativeSession {
            api: Arc::clone(&self.api),
            ptr,
        })
    }
}

/// Session object allocated by the C engine
pub struct NativeSession {
    api: Arc<FfioApi>,
    ptr: NonNull<RawFfio>,
}

// SAFETY: the engine object has no thread affinity; `&mut self` on every
// mutating call keeps access single-threaded.
unsafe impl Send for NativeSession {}

impl fmt::Debug for NativeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeSession")
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl NativeSession {
    fn raw(&self) -> &RawFfio {
        // SAFETY: `ptr` stays valid until `delete` consumes the session.
        unsafe { self.ptr.as_ref() }
    }

    /// Borrow an engine frame for the lifetime of `&mut self`
    fn frame_from_raw(&mut self, raw: *mut RawFrame) -> Frame<'_> {
        // SAFETY: a non-null frame points into the session object and is not
        // touched by the engine until the next call, which needs `&mut self`.
        let Some(raw) = (unsafe { raw.as_ref() }) else {
            return Frame::unavailable();
        };

        let kind = FrameKind::from_raw(raw.frame_type);
        let width = raw.width.max(0) as u32;
        let height = raw.height.max(0) as u32;

        let sei = (!raw.sei_msg.is_null() && raw.sei_msg_size > 0).then(|| {
            // SAFETY: the engine reports the SEI buffer length alongside it.
            unsafe {
                std::slice::from_raw_parts(raw.sei_msg as *const u8, raw.sei_msg_size as usize)
            }
        });

        let data = (kind == FrameKind::Rgb && !raw.data.is_null()).then(|| {
            // SAFETY: RGB frames carry one packed RGB24 image.
            unsafe { std::slice::from_raw_parts(raw.data, image_byte_size(width, height)) }
        });

        Frame::new(
            kind,
            EngineError::from_code(raw.err),
            width,
            height,
            sei,
            data,
        )
    }
}

fn opt_ptr(s: Option<&CStr>) -> *const c_char {
    s.map_or(ptr::null(), CStr::as_ptr)
}

/// SEI length as the engine expects it, terminator included
fn sei_len(s: Option<&CStr>) -> u32 {
    s.map_or(0, |s| s.to_bytes_with_nul().len() as u32)
}

impl EngineSession for NativeSession {
    fn init(&mut self, args: &InitArgs<'_>, params: &mut RawCodecParams) -> i32 {
        // SAFETY: all strings are NUL-terminated and outlive the call; `params`
        // is a valid exclusive reference.
        unsafe {
            (self.api.init_ffio)(
                self.ptr.as_ptr(),
                args.mode.as_raw(),
                args.target_url.as_ptr(),
                args.hw_enabled,
                args.pix_fmt_hw_enabled,
                args.hw_device.as_ptr(),
                args.shm_enabled,
                args.shm_name.as_ptr(),
                args.shm_size,
                args.shm_offset,
                params,
            )
        }
    }

    fn state(&self) -> EngineState {
        EngineState::from_code(self.raw().ffio_state)
    }

    fn frame_seq(&self) -> i64 {
        self.raw().frame_seq as i64
    }

    fn width(&self) -> i32 {
        self.raw().image_width
    }

    fn height(&self) -> i32 {
        self.raw().image_height
    }

    fn framerate(&self) -> f64 {
        self.raw().framerate
    }

    fn decode_one_frame(&mut self, sei_filter: Option<&CStr>) -> Frame<'_> {
        // SAFETY: session pointer is live; filter is NUL-terminated or null.
        let raw = unsafe { (self.api.decode_one_frame)(self.ptr.as_ptr(), opt_ptr(sei_filter)) };
        self.frame_from_raw(raw)
    }

    fn decode_one_frame_to_shm(&mut self, offset: i32, sei_filter: Option<&CStr>) -> Frame<'_> {
        // SAFETY: as above; the engine bounds-checks the shm offset.
        let raw = unsafe {
            (self.api.decode_one_frame_to_shm)(self.ptr.as_ptr(), offset, opt_ptr(sei_filter))
        };
        self.frame_from_raw(raw)
    }

    fn encode_one_frame(&mut self, rgb: &[u8], sei_msg: Option<&CStr>) -> i32 {
        // SAFETY: caller guarantees `rgb` holds one full image.
        unsafe {
            (self.api.encode_one_frame)(
                self.ptr.as_ptr(),
                rgb.as_ptr(),
                opt_ptr(sei_msg),
                sei_len(sei_msg),
            )
        }
    }

    fn encode_one_frame_from_shm(&mut self, offset: i32, sei_msg: Option<&CStr>) -> bool {
        // SAFETY: session pointer is live; message is NUL-terminated or null.
        unsafe {
            (self.api.encode_one_frame_from_shm)(
                self.ptr.as_ptr(),
                offset,
                opt_ptr(sei_msg),
                sei_len(sei_msg),
            )
        }
    }

    fn finalize(&mut self) {
        // SAFETY: session pointer is live. The returned pointer is the same object.
        unsafe {
            (self.api.finalize_ffio)(self.ptr.as_ptr());
        }
    }

    fn delete(self) {
        // SAFETY: `self` is consumed, so the pointer is never used again.
        unsafe {
            (self.api.delete_ffio)(self.ptr.as_ptr());
        }
    }
}
