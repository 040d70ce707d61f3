//! 图像参数、缩放矩阵与条带组映射.

use super::*;

use log::{error, warn};
use vdx_cmdbuf::FrameInfoParams;
use vdx_core::field::pack_fields;
use vdx_core::write_field;

use crate::params::Profile;
use crate::regs::*;

/// 图像宽度超过该值时关闭错误隐藏
const EC_MAX_WIDTH: u32 = 2048;
/// 图像宽度 (宏块) 超过该值时限制双向预测最小块为 8x8
const MIN_BIPRED_8X8_WIDTH_MB: u32 = 80;

impl H264Decoder {
    /// 提交当前图像的参数
    ///
    /// 计算几何与场类型, 更新 DPB 槽位, 打包 SPS0/PPS0/PIC0, 为目标表面分配共位缓冲区.
    pub fn set_picture_params(&mut self, params: PictureParams) -> VdxResult<()> {
        assert!(
            self.state == DecodeState::Idle && self.picture.is_some(),
            "图像参数必须在 begin_picture 之后、第一个条带之前提交 (状态 {:?})",
            self.state
        );
        let geometry = Geometry::from_params(&params);
        let target = self.picture_mut().target;
        {
            let surface = self
                .surfaces
                .get(target)
                .ok_or_else(|| VdxError::Internal(format!("目标表面 {target} 已消失")))?;
            if geometry.width_mb * 16 > surface.stride()
                || geometry.height_mb * 16 > (surface.height() + 15) & !15
            {
                return Err(VdxError::InvalidData(format!(
                    "图像 {}x{} 宏块超出表面 {} ({}x{})",
                    geometry.width_mb,
                    geometry.height_mb,
                    target,
                    surface.width(),
                    surface.height()
                )));
            }
        }

        let mbaff = params.mb_adaptive_frame_field_flag && !params.field_pic_flag;
        let field_type = if params.field_pic_flag {
            u32::from(params.curr_pic.is_bottom_field())
        } else if mbaff {
            3
        } else {
            2
        };

        self.update_dpb(&params);

        let two_pass = params.num_slice_groups_minus1 > 0 && !mbaff;
        let profile = self.config.profile;
        let reg_sps0 = pack_sps0(&params, profile, geometry.width_mb, two_pass);
        let reg_pps0 = pack_pps0(&params);
        let reg_pic0 = pack_pic0(&params, geometry, mbaff);

        let device = self.ctx.device().clone();
        let surface = self
            .surfaces
            .get_mut(target)
            .ok_or_else(|| VdxError::Internal(format!("目标表面 {target} 已消失")))?;
        surface.ensure_colocated(device.as_ref(), geometry.colocated_size)?;
        surface.col_pic_params = pack_fields(&[
            (&COL_NOTFRAMEFLAG, u32::from(params.field_pic_flag)),
            (&COL_MBAFFFRAMEFLAG, u32::from(mbaff)),
        ]);
        if params.chroma_format_idc == 0 {
            surface.set_chroma(device.as_ref(), 128)?;
        }

        let mut error_concealment = self.ctx.config().error_concealment;
        if error_concealment && geometry.width_mb * 16 > EC_MAX_WIDTH {
            debug!("图像宽度 {} 超过 {}, 关闭错误隐藏", geometry.width_mb * 16, EC_MAX_WIDTH);
            error_concealment = false;
        }
        if error_concealment {
            let surface = self
                .surfaces
                .get(target)
                .ok_or_else(|| VdxError::Internal(format!("目标表面 {target} 已消失")))?;
            let info = FrameInfoParams {
                target: surface.buffer(),
                stride: surface.stride(),
                size: surface.size(),
                pic_width_mb: geometry.width_mb,
                size_mb: geometry.size_mb,
            };
            self.ctx.submit_frame_info(&info)?;
        }

        debug!(
            "图像参数: {}x{} 宏块, 色度 {}x{}, 位深 {}/{}, 场类型 {}, MBAFF {}, 二次去块 {}",
            geometry.width_mb,
            geometry.height_mb,
            geometry.mb_width_c,
            geometry.mb_height_c,
            geometry.bit_depth_luma,
            geometry.bit_depth_chroma,
            field_type,
            mbaff,
            two_pass
        );

        let picture = self.picture_mut();
        picture.geometry = geometry;
        picture.field_type = field_type;
        picture.mbaff = mbaff;
        picture.two_pass = two_pass;
        picture.reg_sps0 = reg_sps0;
        picture.reg_pps0 = reg_pps0;
        picture.reg_pic0 = reg_pic0;
        picture.error_concealment = error_concealment;
        picture.params = Some(params);
        self.state = DecodeState::PictureReady;
        Ok(())
    }

    /// 更新 DPB 槽位并同步到各表面
    fn update_dpb(&mut self, params: &PictureParams) {
        self.dpb
            .update(&params.reference_frames, params.num_ref_frames);
        for surface in self.surfaces.iter_mut() {
            surface.dpb_idx = None;
        }
        for (slot, id) in self.dpb.occupied() {
            match self.surfaces.get_mut(id) {
                Some(surface) => surface.dpb_idx = Some(slot as u8),
                None => error!("DPB 槽位 {} 引用了不存在的表面 {}", slot, id),
            }
        }
    }

    /// 提交缩放矩阵, 高档次图像的第一个条带发送
    pub fn set_iq_matrix(&mut self, matrix: IqMatrix) {
        assert!(
            matches!(self.state, DecodeState::Idle | DecodeState::PictureReady),
            "缩放矩阵必须在第一个条带之前提交 (状态 {:?})",
            self.state
        );
        if self.config.profile != Profile::High {
            debug!("{:?} 档次忽略缩放矩阵", self.config.profile);
        }
        self.picture_mut().iq_matrix = Some(matrix);
    }

    /// 提交条带组映射, 写入设备对象供前端读取
    pub fn set_slice_group_map(&mut self, map: &[u8]) -> VdxResult<()> {
        assert!(
            matches!(self.state, DecodeState::Idle | DecodeState::PictureReady),
            "条带组映射必须在第一个条带之前提交 (状态 {:?})",
            self.state
        );
        if map.is_empty() {
            return Err(VdxError::InvalidArgument("条带组映射为空".into()));
        }
        let device = self.ctx.device().clone();
        let size = (map.len() as u32 + 0xfff) & !0xfff;
        let object = device.create_buffer(size, Placement::CPU_MAPPABLE)?;
        device.write_buffer(&object, 0, map)?;
        if let Some(old) = self.picture_mut().slice_group_map.replace(object) {
            warn!("条带组映射重复提交, 替换旧映射");
            release_object(device.as_ref(), &old);
        }
        Ok(())
    }
}

pub(super) fn release_object(device: &dyn Device, object: &BufferObject) {
    if object.release() == ReleaseOutcome::Destroy {
        device.destroy_buffer(object);
    }
}

// ============================================================
// 寄存器打包
// ============================================================

fn pack_sps0(params: &PictureParams, profile: Profile, width_mb: u32, two_pass: bool) -> u32 {
    let mut value = pack_fields(&[
        (&SPS0_PICWIDTHINMBSLESS1, width_mb - 1),
        (&SPS0_FRAME_MBS_ONLY_FLAG, u32::from(params.frame_mbs_only_flag)),
        (&SPS0_CHROMA_FORMAT_IDC, params.chroma_format_idc as u32),
        (
            &SPS0_DIRECT_8X8_INFERENCE_FLAG,
            u32::from(params.direct_8x8_inference_flag),
        ),
        (
            &SPS0_MIN_LUMA_BIPRED_SIZE_8X8,
            u32::from(width_mb > MIN_BIPRED_8X8_WIDTH_MB),
        ),
        (&SPS0_BE_PROFILEIDC, profile.idc()),
        (&SPS0_4BIT_SGM_FLAG, 0),
    ]);
    write_field(&mut value, &SPS0_2PASS_FLAG, u32::from(two_pass));
    // 基线档次使用默认矩阵, 其余档次使用提交的缩放矩阵
    write_field(
        &mut value,
        &SPS0_DEFAULT_SCALING_MATRIX_FLAG,
        u32::from(profile == Profile::Baseline),
    );
    value
}

fn pack_pps0(params: &PictureParams) -> u32 {
    pack_fields(&[
        (&PPS0_NUM_SLICE_GROUPS_MINUS1, params.num_slice_groups_minus1),
        (
            &PPS0_ENTROPY_CODING_MODE_FLAG,
            u32::from(params.entropy_coding_mode_flag),
        ),
        (
            &PPS0_CONSTRAINED_INTRA_PRED_FLAG,
            u32::from(params.constrained_intra_pred_flag),
        ),
        (
            &PPS0_TRANSFORM_8X8_MODE_FLAG,
            u32::from(params.transform_8x8_mode_flag),
        ),
        (&PPS0_BE_WEIGHTED_BIPRED_IDC, params.weighted_bipred_idc),
        (
            &PPS0_BE_CHROMA_QP_INDEX_OFFSET,
            masked(params.chroma_qp_index_offset, &PPS0_BE_CHROMA_QP_INDEX_OFFSET),
        ),
        (
            &PPS0_BE_SECOND_CHROMA_QP_INDEX_OFFSET,
            masked(
                params.second_chroma_qp_index_offset,
                &PPS0_BE_SECOND_CHROMA_QP_INDEX_OFFSET,
            ),
        ),
    ])
}

fn pack_pic0(params: &PictureParams, geometry: Geometry, mbaff: bool) -> u32 {
    let height_mb = geometry.height_mb >> u32::from(params.field_pic_flag);
    let size_mb = geometry.width_mb * height_mb;
    pack_fields(&[
        (&PIC0_PICSIZEINMBSLESS1, size_mb.saturating_sub(1)),
        (&PIC0_PICHEIGHTINMBSLESS1, height_mb.saturating_sub(1)),
        (
            &PIC0_BE_REFERENCE_FLAG,
            u32::from(params.curr_pic.flags.is_reference()),
        ),
        (&PIC0_MBAFFFRAMEFLAG, u32::from(mbaff)),
        (&PIC0_FIELD_PIC_FLAG, u32::from(params.field_pic_flag)),
        (
            &PIC0_BOTTOM_FIELD_FLAG,
            u32::from(params.curr_pic.is_bottom_field()),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{PictureFlags, PictureRef};
    use vdx_core::read_field;

    fn params(width_mb: u32, height_mb: u32) -> PictureParams {
        PictureParams {
            picture_width_in_mbs_minus1: width_mb - 1,
            picture_height_in_mbs_minus1: height_mb - 1,
            ..PictureParams::default()
        }
    }

    #[test]
    fn test_colocated_size_alignment() {
        assert_eq!(colocated_size(1), 0x4000);
        assert_eq!(colocated_size(8160), 0x10_3000);
        assert_eq!(colocated_size(8160) % 0x1000, 0);
    }

    #[test]
    fn test_geometry_chroma_by_format() {
        let mut p = params(4, 2);
        assert_eq!(Geometry::from_params(&p).size_mb, 8);
        assert_eq!(Geometry::from_params(&p).mb_width_c, 8);
        p.chroma_format_idc = 0;
        let g = Geometry::from_params(&p);
        assert_eq!((g.mb_width_c, g.mb_height_c), (0, 0));
        p.chroma_format_idc = 2;
        let g = Geometry::from_params(&p);
        assert_eq!((g.mb_width_c, g.mb_height_c), (8, 16));
    }

    #[test]
    fn test_sps0_flags() {
        let p = params(120, 68);
        let sps0 = pack_sps0(&p, Profile::Baseline, 120, true);
        assert_eq!(read_field(sps0, &SPS0_PICWIDTHINMBSLESS1), 119);
        assert_eq!(read_field(sps0, &SPS0_MIN_LUMA_BIPRED_SIZE_8X8), 1);
        assert_eq!(read_field(sps0, &SPS0_2PASS_FLAG), 1);
        assert_eq!(read_field(sps0, &SPS0_DEFAULT_SCALING_MATRIX_FLAG), 1);
        let sps0 = pack_sps0(&p, Profile::High, 80, false);
        assert_eq!(read_field(sps0, &SPS0_MIN_LUMA_BIPRED_SIZE_8X8), 0);
        assert_eq!(read_field(sps0, &SPS0_DEFAULT_SCALING_MATRIX_FLAG), 0);
        assert_eq!(read_field(sps0, &SPS0_BE_PROFILEIDC), 3);
    }

    #[test]
    fn test_pic0_bottom_field() {
        let mut p = params(4, 4);
        p.field_pic_flag = true;
        p.curr_pic = PictureRef {
            flags: PictureFlags::BOTTOM_FIELD | PictureFlags::SHORT_TERM_REFERENCE,
            ..PictureRef::frame(1, 0)
        };
        let pic0 = pack_pic0(&p, Geometry::from_params(&p), false);
        assert_eq!(read_field(pic0, &PIC0_PICHEIGHTINMBSLESS1), 1, "场图像高度减半");
        assert_eq!(read_field(pic0, &PIC0_PICSIZEINMBSLESS1), 7);
        assert_eq!(read_field(pic0, &PIC0_BOTTOM_FIELD_FLAG), 1);
        assert_eq!(read_field(pic0, &PIC0_BE_REFERENCE_FLAG), 1);
    }

    #[test]
    fn test_pic0_single_row_field() {
        let mut p = params(4, 1);
        p.field_pic_flag = true;
        let pic0 = pack_pic0(&p, Geometry::from_params(&p), false);
        assert_eq!(read_field(pic0, &PIC0_PICHEIGHTINMBSLESS1), 0);
        assert_eq!(read_field(pic0, &PIC0_PICSIZEINMBSLESS1), 0);
    }

    #[test]
    fn test_pps0_negative_offsets() {
        let mut p = params(1, 1);
        p.chroma_qp_index_offset = -2;
        p.weighted_bipred_idc = 1;
        let pps0 = pack_pps0(&p);
        assert_eq!(read_field(pps0, &PPS0_BE_CHROMA_QP_INDEX_OFFSET), 0x1e);
        assert_eq!(read_field(pps0, &PPS0_BE_WEIGHTED_BIPRED_IDC), 1);
    }
}
