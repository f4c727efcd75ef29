//! frame_player - 帧精确播放控制
//!
//! 状态机、命令队列、工作线程和 seek 算法；媒体探测、解复用、解码与渲染
//! 通过 [`MediaBackend`] 等 trait 注入，自带基于 frame_container 的软件后端。

mod command;
mod engine;
mod error;
mod listener;
mod media;
mod pipeline;
mod queue;
mod software;
mod worker;

pub use command::*;
pub use engine::{FramePlayer, PlayerConfig};
pub use error::*;
pub use listener::{ChannelListener, PlayerListener};
pub use media::*;
pub use queue::*;
pub use software::*;
