//! 播放器错误

use crate::{ErrorKind, MediaError, PlaybackState};

/// 公共控制接口的错误
#[derive(thiserror::Error, Debug)]
pub enum PlayerError {
    #[error("{op} is invalid in state {state}")]
    InvalidState {
        op: &'static str,
        state: PlaybackState,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Render target is not set, call set_render_target first")]
    NoRenderTarget,

    #[error("{0} cannot be called from the worker thread")]
    CalledFromWorker(&'static str),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl PlayerError {
    /// 错误通知中使用的子错误码
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            PlayerError::Media(e) => e.error_kind(),
            PlayerError::Spawn(_) => ErrorKind::Io,
            _ => ErrorKind::Unknown,
        }
    }
}
