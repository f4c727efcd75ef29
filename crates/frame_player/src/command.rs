//! 控制消息、播放状态与事件定义

use std::fmt;

/// 控制消息（调用线程 -> 工作线程）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// 播放
    Play,
    /// 暂停
    Pause,
    /// 跳转到指定时间 (µs)
    Seek(i64),
    /// 停止
    Stop,
    /// 重置到 Idle
    Reset,
    /// 释放
    Release,
}

impl ControlMessage {
    /// Seek 消息的目标时间
    pub fn seek_target(&self) -> Option<i64> {
        match self {
            ControlMessage::Seek(target) => Some(*target),
            _ => None,
        }
    }

    /// Stop/Reset/Release 会终止工作线程
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            ControlMessage::Stop | ControlMessage::Reset | ControlMessage::Release
        )
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Initialized,
    Preparing,
    Prepared,
    Started,
    Paused,
    Stopped,
    PlaybackCompleted,
    End,
    Error,
}

impl PlaybackState {
    /// 可以接受 seek 请求的状态
    pub fn can_seek(self) -> bool {
        matches!(
            self,
            PlaybackState::Prepared
                | PlaybackState::Started
                | PlaybackState::Paused
                | PlaybackState::PlaybackCompleted
        )
    }

    pub fn can_prepare(self) -> bool {
        matches!(self, PlaybackState::Initialized | PlaybackState::Stopped)
    }

    pub fn can_start(self) -> bool {
        matches!(
            self,
            PlaybackState::Prepared | PlaybackState::Paused | PlaybackState::PlaybackCompleted
        )
    }

    pub fn can_pause(self) -> bool {
        matches!(
            self,
            PlaybackState::Started | PlaybackState::PlaybackCompleted
        )
    }

    pub fn can_stop(self) -> bool {
        self.can_seek()
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 错误类别，数值与原有错误码保持一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unknown,
    ServerDied,
    Io,
    UnsupportedFormat,
    /// 保留，当前逻辑不会产生
    TimedOut,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Unknown => 1,
            ErrorKind::ServerDied => 100,
            ErrorKind::Io => -1004,
            ErrorKind::UnsupportedFormat => -1010,
            ErrorKind::TimedOut => -110,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ErrorKind::Unknown),
            100 => Some(ErrorKind::ServerDied),
            -1004 => Some(ErrorKind::Io),
            -1010 => Some(ErrorKind::UnsupportedFormat),
            -110 => Some(ErrorKind::TimedOut),
            _ => None,
        }
    }
}

/// 播放器事件（工作线程 -> 调用方），由 `ChannelListener` 投递
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Prepared,
    VideoSizeChanged { width: u32, height: u32 },
    /// 播放进度 (ms)
    Position(i64),
    SeekComplete,
    Completion,
    Error { what: ErrorKind, extra: ErrorKind },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_roundtrip() {
        for kind in [
            ErrorKind::Unknown,
            ErrorKind::ServerDied,
            ErrorKind::Io,
            ErrorKind::UnsupportedFormat,
            ErrorKind::TimedOut,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(0), None);
    }

    #[test]
    fn test_state_legality() {
        assert!(PlaybackState::Initialized.can_prepare());
        assert!(PlaybackState::Stopped.can_prepare());
        assert!(!PlaybackState::Prepared.can_prepare());

        assert!(PlaybackState::PlaybackCompleted.can_start());
        assert!(!PlaybackState::Stopped.can_start());
        assert!(!PlaybackState::Error.can_start());

        assert!(!PlaybackState::Prepared.can_pause());
        assert!(!PlaybackState::Error.can_seek());
        assert!(!PlaybackState::Idle.can_stop());
    }
}
