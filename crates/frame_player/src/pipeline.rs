//! 解复用器 + 解码器组合
//!
//! 只由工作线程持有；释放是幂等的，Drop 时也会释放。

use std::path::Path;
use std::sync::Arc;

use crate::media::select_video_track;
use crate::{
    Demuxer, EosRecovery, MediaBackend, MediaError, RenderTarget, SeekPolicy, TrackFormat,
    VideoDecoder,
};

pub(crate) struct Pipeline {
    backend: Arc<dyn MediaBackend>,
    pub(crate) demuxer: Box<dyn Demuxer>,
    pub(crate) decoder: Box<dyn VideoDecoder>,
    format: TrackFormat,
    render_target: Arc<dyn RenderTarget>,
    released: bool,
}

impl Pipeline {
    /// 打开解复用器、选中第一个视频轨道并启动解码器
    ///
    /// 返回值的第二项是轨道格式中原有的旋转提示；交给解码器的格式中旋转被清零，
    /// 旋转由上层自行处理。
    pub(crate) fn open(
        backend: Arc<dyn MediaBackend>,
        source: &Path,
        render_target: Arc<dyn RenderTarget>,
    ) -> Result<(Self, Option<u32>), MediaError> {
        let mut demuxer = backend.open_demuxer(source)?;

        let track = match select_video_track(demuxer.as_ref()) {
            Ok(Some(track)) => track,
            Ok(None) => {
                demuxer.release();
                return Err(MediaError::UnsupportedFormat("no video track".into()));
            }
            Err(e) => {
                demuxer.release();
                return Err(e);
            }
        };

        let opened = demuxer.select_track(track).and_then(|_| {
            let mut format = demuxer.track_format(track)?;
            let rotation = format.rotation.replace(0);
            let decoder = Self::start_decoder(backend.as_ref(), &format, &render_target)?;
            Ok((format, rotation, decoder))
        });

        let (format, rotation, decoder) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                demuxer.release();
                return Err(e);
            }
        };

        log::debug!(
            "opened track {} ({}, {}x{})",
            track,
            format.mime,
            format.width,
            format.height
        );

        Ok((
            Self {
                backend,
                demuxer,
                decoder,
                format,
                render_target,
                released: false,
            },
            rotation,
        ))
    }

    fn start_decoder(
        backend: &dyn MediaBackend,
        format: &TrackFormat,
        render_target: &Arc<dyn RenderTarget>,
    ) -> Result<Box<dyn VideoDecoder>, MediaError> {
        let mut decoder = backend.create_decoder(&format.mime)?;
        if let Err(e) = decoder
            .configure(format, Arc::clone(render_target))
            .and_then(|_| decoder.start())
        {
            decoder.release();
            return Err(e);
        }
        Ok(decoder)
    }

    /// stop + release + 重新创建解码器
    ///
    /// 新解码器启动失败时保留旧解码器，`release` 仍只释放它一次。
    pub(crate) fn restart_decoder(&mut self) -> Result<(), MediaError> {
        log::debug!("restarting decoder for {}", self.format.mime);
        let decoder =
            Self::start_decoder(self.backend.as_ref(), &self.format, &self.render_target)?;
        let mut old = std::mem::replace(&mut self.decoder, decoder);
        if let Err(e) = old.stop() {
            log::warn!("decoder stop failed during restart: {}", e);
        }
        old.release();
        Ok(())
    }

    /// 按解码器声明的方式从 EOS 中恢复
    pub(crate) fn recover_from_eos(&mut self) -> Result<(), MediaError> {
        match self.decoder.eos_recovery() {
            EosRecovery::Flush => self.decoder.flush(),
            EosRecovery::Restart => self.restart_decoder(),
        }
    }

    pub(crate) fn seek_demuxer(
        &mut self,
        timestamp_us: i64,
        policy: SeekPolicy,
    ) -> Result<(), MediaError> {
        self.demuxer.seek(timestamp_us, policy)
    }

    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.decoder.stop() {
            log::warn!("decoder stop failed: {}", e);
        }
        self.decoder.release();
        self.demuxer.release();
        log::debug!("pipeline released");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.release();
    }
}
