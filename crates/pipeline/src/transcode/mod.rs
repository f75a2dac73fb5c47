//! Subprocess transcoding engine for the Mediaflow pipeline

pub mod ffmpeg;

pub use ffmpeg::{
    build_transcode_args, is_available, resolve_executable, transcode, TranscodeJob,
    TranscodeResult, DEFAULT_TIMEOUT,
};
