//! 图像结束: 二次去块、错误隐藏与提交.

use super::*;

use log::warn;
use vdx_cmdbuf::{DeblockParams, HostBeOppParams, PlaneRef};
use vdx_core::field::pack_fields;

use crate::config::DeblockStrategy;
use crate::regs::*;
use crate::sequencer::{MB_RECORD_BYTES, second_pass};

use super::picture::release_object;

impl H264Decoder {
    /// 结束当前图像并提交
    ///
    /// 二次去块模式下先追加去块消息 (固件序列或主机序列), 启用错误隐藏时追加
    /// 主机后端错误隐藏消息, 最后提交当前命令缓冲区. 无论成功与否, 图像都进入
    /// `PictureEnd` 状态, 失败的图像不会被重试.
    pub fn end_picture(&mut self) -> VdxResult<()> {
        assert!(
            matches!(
                self.state,
                DecodeState::PictureReady | DecodeState::SliceDispatched
            ),
            "图像结束前不能有未分派的条带 (状态 {:?})",
            self.state
        );
        let result = self.finish_picture();

        let device = self.ctx.device().clone();
        if let Some(map) = self.picture_mut().slice_group_map.take() {
            release_object(device.as_ref(), &map);
        }
        self.state = DecodeState::PictureEnd;
        result
    }

    fn finish_picture(&mut self) -> VdxResult<()> {
        let (slice_count, two_pass, error_concealment) = {
            let picture = self.picture_mut();
            (picture.slice_count, picture.two_pass, picture.error_concealment)
        };
        if slice_count == 0 {
            warn!("图像没有任何条带, 只提交已排队的消息");
        } else {
            if two_pass {
                match self.config.deblock {
                    DeblockStrategy::Firmware => self.firmware_deblock()?,
                    DeblockStrategy::HostSequenced => self.host_sequenced_deblock()?,
                }
            }
            if error_concealment {
                self.conceal_errors()?;
            }
        }

        if let Some(outcome) = self.ctx.flush()? {
            debug!("图像提交完成: {:?}", outcome);
        }
        Ok(())
    }

    // ============================================================
    // 二次去块
    // ============================================================

    /// 去块消息的目标与备用输出平面
    ///
    /// 标准模式原地去块, 旋转时写出备用输出; 环外模式从环内缓冲区读取,
    /// 输出到主缓冲区或旋转输出.
    fn deblock_planes<'a>(
        surface: &'a Surface,
        mode: DeblockMode,
    ) -> VdxResult<(PlaneRef<'a>, Option<PlaneRef<'a>>)> {
        match mode {
            DeblockMode::Std => Ok((surface.plane(), surface.rotated_plane())),
            DeblockMode::IntraOold => {
                let source = surface.in_loop_plane().ok_or_else(|| {
                    VdxError::Internal(format!("表面 {} 没有环内缓冲区", surface.id()))
                })?;
                let dest = surface.rotated_plane().unwrap_or_else(|| surface.plane());
                Ok((source, Some(dest)))
            }
        }
    }

    /// 备用输出旋转标志, 未配置旋转时为 0
    fn rotation_flags(surface: &Surface) -> u32 {
        if surface.rotation() == 0 || surface.rotated().is_none() {
            return 0;
        }
        pack_fields(&[
            (&ROTATION_ALT_PICTURE_ENABLE, 1),
            (&ROTATION_ROW_STRIDE, surface.stride_mode().bits()),
            (&ROTATION_RECON_WRITE_DISABLE, 0),
            (&ROTATION_MODE, surface.rotation() & 0x3),
        ])
    }

    fn ext_stride(surface: &Surface) -> u32 {
        pack_fields(&[(&EXT_ROW_STRIDE, surface.stride() / 64)])
    }

    /// 固件按共位缓冲区中的宏块记录完成第二遍
    fn firmware_deblock(&mut self) -> VdxResult<()> {
        let picture = self.picture.as_ref().expect("没有进行中的图像");
        let surface = self
            .surfaces
            .get(picture.target)
            .ok_or_else(|| VdxError::Internal(format!("目标表面 {} 已消失", picture.target)))?;
        let colocated = surface.colocated().ok_or_else(|| {
            VdxError::Internal(format!("表面 {} 没有共位缓冲区", picture.target))
        })?;
        let (target, alternate) = Self::deblock_planes(surface, picture.deblock_mode)?;
        let params = DeblockParams {
            target,
            alternate,
            mb_params: colocated,
            mb_params_offset: 0,
            pic_width_mb: picture.geometry.width_mb,
            frame_height_mb: picture.geometry.height_mb,
            field_type: picture.field_type,
            ext_stride: Self::ext_stride(surface),
            rotation: Self::rotation_flags(surface),
            is_oold: picture.deblock_mode == DeblockMode::IntraOold,
        };
        debug!(
            "固件二次去块: 表面 {}, {:?}",
            picture.target, picture.deblock_mode
        );
        self.ctx.submit_deblock(&params)
    }

    /// 首遍提交后读回宏块记录, 由主机生成暂存命令流再提交去块消息
    fn host_sequenced_deblock(&mut self) -> VdxResult<()> {
        self.ctx.flush()?;

        let picture = self.picture.as_ref().expect("没有进行中的图像");
        let geometry = picture.geometry;
        let surface = self
            .surfaces
            .get(picture.target)
            .ok_or_else(|| VdxError::Internal(format!("目标表面 {} 已消失", picture.target)))?;
        let colocated = surface.colocated().ok_or_else(|| {
            VdxError::Internal(format!("表面 {} 没有共位缓冲区", picture.target))
        })?;
        let records = self.ctx.device().read_buffer(
            colocated,
            0,
            geometry.size_mb as usize * MB_RECORD_BYTES,
        )?;

        let (target, alternate) = Self::deblock_planes(surface, picture.deblock_mode)?;
        let cmdbuf = self.ctx.get_next_cmdbuf()?;
        let words = second_pass(
            cmdbuf,
            surface.plane(),
            picture.operating_mode,
            &records,
            geometry.width_mb,
            geometry.height_mb,
        )?;
        let staging = cmdbuf.staging_object().clone();
        debug!(
            "主机二次去块: 表面 {}, 暂存命令 {} 字",
            picture.target, words
        );

        let params = DeblockParams {
            target,
            alternate,
            mb_params: &staging,
            mb_params_offset: 0,
            pic_width_mb: geometry.width_mb,
            frame_height_mb: geometry.height_mb,
            field_type: picture.field_type,
            ext_stride: Self::ext_stride(surface),
            rotation: Self::rotation_flags(surface),
            is_oold: picture.deblock_mode == DeblockMode::IntraOold,
        };
        self.ctx.submit_deblock(&params)
    }

    // ============================================================
    // 错误隐藏
    // ============================================================

    /// 选择错误隐藏来源: 最后一个条带的 list0 首项, 其次是最近的非 B 图像, 最后是目标自身
    fn choose_ec_source(&mut self) -> SurfaceId {
        let picture = self.picture.as_ref().expect("没有进行中的图像");
        let source = picture
            .last_list0_head
            .filter(|id| self.surfaces.contains(*id))
            .or(self.ec_candidate)
            .unwrap_or(picture.target);
        if !picture.last_slice_is_b {
            self.ec_candidate = Some(picture.target);
        }
        source
    }

    fn conceal_errors(&mut self) -> VdxResult<()> {
        let source_id = self.choose_ec_source();
        let picture = self.picture.as_ref().expect("没有进行中的图像");
        let surface = self
            .surfaces
            .get(picture.target)
            .ok_or_else(|| VdxError::Internal(format!("目标表面 {} 已消失", picture.target)))?;
        let source = self.surfaces.get(source_id).unwrap_or(surface);
        let params = HostBeOppParams {
            target: surface.plane(),
            output: source.plane(),
            pic_width_mb: picture.geometry.width_mb,
            frame_height_mb: picture.geometry.height_mb,
            field_type: picture.field_type,
            ext_stride: Self::ext_stride(surface),
        };
        debug!(
            "错误隐藏: 目标 {}, 来源 {}",
            picture.target,
            source.id()
        );
        self.ctx.submit_host_be_opp(&params)
    }
}
