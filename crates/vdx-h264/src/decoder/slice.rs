//! 条带预处理、命令构建与分派.
//!
//! 每个条带的命令按固定顺序写入当前命令缓冲区:
//! 控制头 → VLC 跳过块 → 码流 DMA → 前端寄存器块 → 后端 rendec 块 → 完成标记 → 渲染消息.

use super::*;

use log::{trace, warn};
use vdx_cmdbuf::command::ctrl_alloc;
use vdx_cmdbuf::{CommandBuffer, MsgFlags, RegBlockFlags, RelocMode, SrFlags, WordSlot};
use vdx_core::field::pack_fields;
use vdx_core::write_field;

use crate::params::{
    MAX_LIST_ENTRIES, MAX_REFERENCE_FRAMES, PictureRef, Profile, SliceDataFlag, SliceParams,
    SliceType, WeightEntry,
};
use crate::regs::*;
use crate::vlc::write_vlc_tables;

/// 空 DPB 槽与缺失共位图像的占位地址
const SENTINEL: u32 = 0xdead_beef;
/// 前端熵解码模式: H.264
const ENTDEC_MODE_H264: u32 = 1;
/// 运动补偿缓存配置
const CACHE_REF_OFFSET: u32 = 72;
const CACHE_ROW_OFFSET: u32 = 4;
/// 按 4 项一字打包的参考列表最多发送 29 项
const MAX_PACKED_LIST_MINUS1: u32 = 28;
/// list0 反查表最多登记 31 项
const MAX_INVERSE_LIST0_MINUS1: u32 = 30;

impl H264Decoder {
    /// 提交一个条带或条带的一个码流分段
    ///
    /// 完整条带 (`All`) 与末段 (`End`) 在写入码流后立即构建并分派;
    /// 首段与中间段只写入码流 DMA, 等待后续分段.
    pub fn render_slice(&mut self, slice: &SliceParams, bitstream: &BufferObject) -> VdxResult<()> {
        match slice.slice_data_flag {
            SliceDataFlag::All => {
                self.begin_slice(slice, bitstream)?;
                self.build_slice(slice)?;
                self.dispatch_slice()
            }
            SliceDataFlag::Begin => self.begin_slice(slice, bitstream),
            SliceDataFlag::Middle => self.chain_segment(slice, bitstream),
            SliceDataFlag::End => {
                self.chain_segment(slice, bitstream)?;
                self.build_slice(slice)?;
                self.dispatch_slice()
            }
        }
    }

    // ============================================================
    // 条带开始
    // ============================================================

    fn begin_slice(&mut self, slice: &SliceParams, bitstream: &BufferObject) -> VdxResult<()> {
        assert!(
            matches!(
                self.state,
                DecodeState::PictureReady | DecodeState::SliceDispatched
            ),
            "条带开始前必须提交图像参数且上一条带已分派 (状态 {:?})",
            self.state
        );
        if slice.slice_data_size == 0 {
            return Err(VdxError::InvalidData("条带数据为空".into()));
        }
        let out_of_range = slice
            .slice_data_offset
            .checked_add(slice.slice_data_size)
            .is_none_or(|end| end > bitstream.size());
        if out_of_range {
            return Err(VdxError::InvalidArgument(format!(
                "条带数据 {:#x}+{:#x} 超出码流对象 ({:#x} 字节)",
                slice.slice_data_offset,
                slice.slice_data_size,
                bitstream.size()
            )));
        }
        let is_oold = self.ctx.config().is_oold;
        let picture = self.picture.as_mut().expect("没有进行中的图像");
        let geometry = picture.geometry;
        if slice.first_mb_in_slice >= geometry.size_mb {
            return Err(VdxError::InvalidData(format!(
                "首宏块 {} 超出图像 ({} 个宏块)",
                slice.first_mb_in_slice, geometry.size_mb
            )));
        }
        let params = picture.params.as_ref().expect("尚未提交图像参数");

        let first_mb_x = slice.first_mb_in_slice % geometry.width_mb;
        let mut first_mb_y = slice.first_mb_in_slice / geometry.width_mb;
        if picture.mbaff {
            first_mb_y *= 2;
        }
        let mut slice_qpy = 26 + params.pic_init_qp_minus26 + slice.slice_qp_delta;
        if !(0..=51).contains(&slice_qpy) {
            warn!("条带 QP {} 超出范围, 截断到 0..=51", slice_qpy);
            slice_qpy = slice_qpy.clamp(0, 51);
        }
        let slice_type = slice.slice_type();

        let slice0 = pack_fields(&[
            (
                &SLICE0_DIRECT_SPATIAL_MV_PRED_FLAG,
                u32::from(slice.direct_spatial_mv_pred_flag),
            ),
            (
                &SLICE0_DISABLE_DEBLOCKING_FILTER_IDC,
                slice.disable_deblocking_filter_idc,
            ),
            (
                &SLICE0_ALPHA_CO_OFFSET_DIV2,
                masked(slice.slice_alpha_c0_offset_div2, &SLICE0_ALPHA_CO_OFFSET_DIV2),
            ),
            (
                &SLICE0_BETA_OFFSET_DIV2,
                masked(slice.slice_beta_offset_div2, &SLICE0_BETA_OFFSET_DIV2),
            ),
            (&SLICE0_FIELD_TYPE, picture.field_type),
            (&SLICE0_SLICETYPE, slice_type.code()),
            (&SLICE0_CABAC_INIT_IDC, slice.cabac_init_idc),
            (&SLICE0_SLICECOUNT, picture.slice_count & 0xff),
        ]);
        let slice1 = pack_fields(&[
            (&SLICE1_FIRST_MB_IN_SLICE_X, first_mb_x),
            (&SLICE1_FIRST_MB_IN_SLICE_Y, first_mb_y),
            (&SLICE1_SLICEQPY, slice_qpy as u32),
            (
                &SLICE1_NUM_REF_IDX_L0_ACTIVE_MINUS1,
                slice.num_ref_idx_l0_active_minus1,
            ),
            (
                &SLICE1_NUM_REF_IDX_L1_ACTIVE_MINUS1,
                slice.num_ref_idx_l1_active_minus1,
            ),
        ]);

        // 关闭去块的条带改走环外去块: 重建写入环内缓冲区, 由第二遍输出
        if slice.disable_deblocking_filter_idc == 1 && is_oold {
            picture.deblock_mode = DeblockMode::IntraOold;
            if !picture.two_pass {
                debug!("条带关闭去块, 切换到二次去块");
            }
            picture.two_pass = true;
            write_field(&mut picture.reg_sps0, &SPS0_2PASS_FLAG, 1);
        } else {
            picture.deblock_mode = DeblockMode::Std;
        }

        let target = picture.target;
        let colocated = self
            .surfaces
            .get(target)
            .and_then(|s| s.colocated())
            .ok_or_else(|| VdxError::Internal(format!("目标表面 {target} 没有共位缓冲区")))?;

        let cmdbuf = self.ctx.get_next_cmdbuf()?;
        let header = cmdbuf.begin_frontend_header(&self.preload)?;
        cmdbuf.add_relocation(
            WordSlot::Command(header.slot(ctrl_alloc::MB_PARAM)),
            colocated,
            0,
            RelocMode::FULL,
        )?;
        write_vlc_tables(cmdbuf, &self.vlc_table)?;
        cmdbuf.dma_write_bitstream(
            bitstream,
            slice.slice_data_offset,
            slice.slice_data_size,
            slice.slice_data_bit_offset,
            SrFlags::ENABLE_RBDU_EXTRACTION,
        )?;

        trace!(
            "条带 #{} 开始: 类型 {:?}, 首宏块 ({}, {}), QP {}",
            picture.slice_count, slice_type, first_mb_x, first_mb_y, slice_qpy
        );
        picture.slice = Some(SliceProgress {
            header,
            first_mb_x,
            first_mb_y,
            slice0,
            slice1,
        });
        self.state = DecodeState::SliceBegin;
        Ok(())
    }

    /// 追加条带的后续码流分段
    fn chain_segment(&mut self, slice: &SliceParams, bitstream: &BufferObject) -> VdxResult<()> {
        assert!(
            self.state == DecodeState::SliceBegin,
            "码流分段必须跟随条带首段 (状态 {:?})",
            self.state
        );
        if slice.slice_data_offset != 0 {
            warn!(
                "码流分段偏移 {:#x} 被忽略, 分段从对象起始读取",
                slice.slice_data_offset
            );
        }
        self.ctx
            .cmdbuf_mut()
            .dma_write_bitstream_chained(bitstream, slice.slice_data_size)
    }

    // ============================================================
    // 条带构建
    // ============================================================

    fn build_slice(&mut self, slice: &SliceParams) -> VdxResult<()> {
        assert!(
            self.state == DecodeState::SliceBegin,
            "条带构建必须在码流写入之后 (状态 {:?})",
            self.state
        );
        let Self {
            ctx,
            config,
            surfaces,
            dpb,
            reference_cache,
            picture,
            ..
        } = self;
        let picture = picture.as_mut().expect("没有进行中的图像");

        let slice_type = slice.slice_type();
        if picture.params().num_slice_groups_minus1 > 0 && picture.error_concealment {
            debug!("使用条带组, 关闭本图像的错误隐藏");
            picture.error_concealment = false;
        }

        let target = surfaces
            .get(picture.target)
            .ok_or_else(|| VdxError::Internal(format!("目标表面 {} 已消失", picture.target)))?;
        let recon_in_loop =
            picture.deblock_mode == DeblockMode::IntraOold && picture.two_pass;
        let recon = if recon_in_loop {
            target.in_loop().ok_or_else(|| {
                VdxError::Internal(format!("表面 {} 没有环内缓冲区", picture.target))
            })?
        } else {
            target.buffer()
        };

        let mut builder = SliceBuilder {
            cmdbuf: ctx.get_next_cmdbuf()?,
            picture,
            slice,
            slice_type,
            surfaces,
            dpb,
            profile: config.profile,
            rotation: config.rotation,
            target,
            recon,
            reference_cache,
        };
        let operating_mode = builder.build()?;

        picture.operating_mode = operating_mode;
        picture.last_slice_is_b = slice_type == SliceType::B;
        picture.last_list0_head = if slice_type.code() != 0 && slice.ref_pic_list0[0].is_valid() {
            Some(slice.ref_pic_list0[0].surface)
        } else {
            None
        };
        let recon = recon.clone();
        if let Some(surface) = surfaces.get_mut(picture.target) {
            surface.ref_buf = Some(recon);
        }
        self.state = DecodeState::SliceParamsBuilt;
        Ok(())
    }

    // ============================================================
    // 条带分派
    // ============================================================

    fn dispatch_slice(&mut self) -> VdxResult<()> {
        assert!(
            self.state == DecodeState::SliceParamsBuilt,
            "条带分派必须在构建之后 (状态 {:?})",
            self.state
        );
        let picture = self.picture.as_mut().expect("没有进行中的图像");
        let progress = picture.slice.take().expect("没有进行中的条带");

        let mut flags = MsgFlags::VLD_NOT_MC;
        if picture.slice_count == 0 {
            flags |= MsgFlags::FIRST_SLICE;
        }
        if picture.mbaff {
            flags |= MsgFlags::MBAFF;
        }
        if picture.two_pass {
            flags |= MsgFlags::TWO_PASS;
        }
        if picture.error_concealment {
            flags |= MsgFlags::ERROR_DETECTION;
        }

        let geometry = picture.geometry;
        let field_pic = u32::from(picture.params().field_pic_flag);
        let first_mb = (progress.first_mb_y << 8) | progress.first_mb_x;
        let last_mb = (((geometry.height_mb >> field_pic).saturating_sub(1)) << 8)
            | geometry.width_mb.saturating_sub(1);

        let cmdbuf = self.ctx.cmdbuf_mut();
        cmdbuf.write_kick()?;
        cmdbuf.set_cmd_word(
            progress.header.slot(ctrl_alloc::SLICE_FIRST_PIC_LAST),
            (first_mb << 16) | last_mb,
        );

        self.ctx.set_operating_mode(picture.operating_mode);
        self.ctx.append_render_command(flags)?;
        picture.slice_count += 1;
        debug!(
            "条带 #{} 已分派: 首宏块 {:#06x}, 末宏块 {:#06x}, 标志 {:?}",
            picture.slice_count - 1,
            first_mb,
            last_mb,
            flags
        );
        self.state = DecodeState::SliceDispatched;
        Ok(())
    }
}

// ============================================================
// 条带命令构建器
// ============================================================

struct SliceBuilder<'a> {
    cmdbuf: &'a mut CommandBuffer,
    picture: &'a PictureState,
    slice: &'a SliceParams,
    slice_type: SliceType,
    surfaces: &'a SurfacePool,
    dpb: &'a DpbIndexTable,
    profile: Profile,
    rotation: u32,
    target: &'a Surface,
    /// 本条带的重建缓冲区
    recon: &'a BufferObject,
    reference_cache: &'a BufferObject,
}

impl SliceBuilder<'_> {
    /// 按固定顺序写入前端寄存器块与后端 rendec 块, 返回操作模式字
    fn build(&mut self) -> VdxResult<u32> {
        let inter = self.slice_type.code() != 0;
        let is_b = self.slice_type == SliceType::B;
        let params = self.picture.params();

        self.frontend_registers()?;
        self.backend_control()?;
        self.sps_chunk()?;
        if self.profile == Profile::High && self.picture.slice_count == 0 {
            self.scaling_lists()?;
        }
        if is_b {
            self.poc_chunk()?;
            self.colocated_chunk()?;
        }
        if inter {
            self.list0_chunk()?;
            if params.num_ref_frames > 0 {
                self.dpb_chunk()?;
            }
        }
        self.target.buffer().set_unfence(false);
        let slice = self.slice;
        let p_slice = self.slice_type == SliceType::P;
        if (params.weighted_pred_flag && p_slice) || (params.weighted_bipred_idc != 0 && is_b) {
            self.weights_chunk(
                CMDS_H264_WEIGHTED_FACTORS_A,
                &slice.weights.l0,
                slice.num_ref_idx_l0_active_minus1,
            )?;
            if is_b {
                self.weights_chunk(
                    CMDS_H264_WEIGHTED_FACTORS_B,
                    &slice.weights.l1,
                    slice.num_ref_idx_l1_active_minus1,
                )?;
            }
        }
        let operating_mode = self.sequence_chunk()?;
        self.slice_params_chunk()?;
        if !self.picture.two_pass && self.rotation != 0 {
            self.alternative_output()?;
        }
        Ok(operating_mode)
    }

    fn progress(&self) -> SliceProgress {
        self.picture.slice.expect("没有进行中的条带")
    }

    fn entdec_control(&self) -> u32 {
        pack_fields(&[
            (&ENTDEC_PROFILE, self.profile.code()),
            (&ENTDEC_MODE, ENTDEC_MODE_H264),
        ])
    }

    fn frontend_registers(&mut self) -> VdxResult<()> {
        let progress = self.progress();
        let control = self.entdec_control();
        let cmdbuf = &mut *self.cmdbuf;
        cmdbuf.reg_start_block(RegBlockFlags::empty());
        cmdbuf.reg_set(ENTDEC_FE_CONTROL, control)?;
        cmdbuf.reg_set(H264_FE_SPS0, self.picture.reg_sps0)?;
        cmdbuf.reg_set(H264_FE_PPS0, self.picture.reg_pps0)?;
        cmdbuf.reg_set(H264_FE_CUR_PIC0, self.picture.reg_pic0)?;
        cmdbuf.reg_set(H264_FE_SLICE0, progress.slice0)?;
        cmdbuf.reg_set(H264_FE_SLICE1, progress.slice1)?;
        cmdbuf.reg_set(
            H264_FE_SLICE2,
            pack_fields(&[(&SLICE2_FIRST_MB_IN_SLICE, self.slice.first_mb_in_slice)]),
        )?;
        if self.picture.params().num_slice_groups_minus1 > 0 {
            let map = self.picture.slice_group_map.as_ref().ok_or_else(|| {
                VdxError::InvalidData("使用条带组但没有提交条带组映射".into())
            })?;
            cmdbuf.reg_set_address(H264_FE_BASE_ADDR_SGM, map, 0)?;
        }
        cmdbuf.reg_end_block();
        Ok(())
    }

    fn backend_control(&mut self) -> VdxResult<()> {
        let control = self.entdec_control();
        self.cmdbuf.rendec_start(ENTDEC_BE_CONTROL)?;
        self.cmdbuf.rendec_write(control)?;
        self.cmdbuf.rendec_end();
        Ok(())
    }

    /// SPS0 到 REF0 的连续寄存器
    fn sps_chunk(&mut self) -> VdxResult<()> {
        let progress = self.progress();
        let colocated = self.target.colocated().ok_or_else(|| {
            VdxError::Internal(format!("表面 {} 没有共位缓冲区", self.target.id()))
        })?;
        let long_term = pack_fields(&[(&REF0_LONGTERMFRAMEFLAG, self.dpb.long_term_flags())]);
        let cmdbuf = &mut *self.cmdbuf;
        cmdbuf.rendec_start(H264_BE_SPS0)?;
        cmdbuf.rendec_write(self.picture.reg_sps0)?;
        cmdbuf.rendec_write(self.picture.reg_pps0)?;
        cmdbuf.rendec_write(self.picture.reg_pic0)?;
        cmdbuf.rendec_write(progress.slice0)?;
        cmdbuf.rendec_write(progress.slice1)?;
        cmdbuf.rendec_write_address(colocated, 0)?;
        cmdbuf.rendec_write(long_term)?;
        cmdbuf.rendec_end();
        Ok(())
    }

    /// 缩放矩阵 RAM: 8x8 帧间, 8x8 帧内, 再按固件顺序排列的 6 个 4x4 表
    fn scaling_lists(&mut self) -> VdxResult<()> {
        let zeroed = IqMatrix::zeroed();
        let matrix = self.picture.iq_matrix.as_ref().unwrap_or(&zeroed);
        let mut block = Vec::with_capacity(64 * 2 + 16 * 6);
        block.extend_from_slice(&matrix.lists_8x8[1]);
        block.extend_from_slice(&matrix.lists_8x8[0]);
        for index in [0, 3, 4, 1, 5, 2] {
            block.extend_from_slice(&matrix.lists_4x4[index]);
        }
        self.cmdbuf.rendec_start(H264_BE_IQ_RAM)?;
        self.cmdbuf.rendec_write_block(&block)?;
        self.cmdbuf.rendec_end();
        Ok(())
    }

    /// 当前图像与 16 个 DPB 槽的顶 / 底场 POC
    fn poc_chunk(&mut self) -> VdxResult<()> {
        let params = self.picture.params();
        let cmdbuf = &mut *self.cmdbuf;
        cmdbuf.rendec_start(H264_BE_FOC_CUR_TOP)?;
        cmdbuf.rendec_write(sign_trunc(params.curr_pic.top_field_order_cnt))?;
        cmdbuf.rendec_write(sign_trunc(params.curr_pic.bottom_field_order_cnt))?;
        for slot in 0..MAX_REFERENCE_FRAMES {
            let refidx = self.dpb.refidx(slot) as usize;
            match params.reference_frames.get(refidx) {
                Some(reference) => {
                    cmdbuf.rendec_write(sign_trunc(reference.top_field_order_cnt))?;
                    cmdbuf.rendec_write(sign_trunc(reference.bottom_field_order_cnt))?;
                }
                None => {
                    cmdbuf.rendec_write(0)?;
                    cmdbuf.rendec_write(0)?;
                }
            }
        }
        cmdbuf.rendec_end();
        Ok(())
    }

    /// 共位图像参数与地址、list0 反查表、list1 索引
    fn colocated_chunk(&mut self) -> VdxResult<()> {
        let params = self.picture.params();
        let surfaces = self.surfaces;
        let head = self.slice.ref_pic_list1[0];
        let colocated = head
            .is_valid()
            .then(|| surfaces.get(head.surface))
            .flatten()
            .and_then(|s| s.colocated().map(|object| (s, object)));

        self.cmdbuf.rendec_start(H264_BE_COL_PIC0)?;
        match colocated {
            Some((surface, object)) => {
                let bottom = if params.field_pic_flag {
                    head.is_bottom_field()
                } else {
                    let cur = params
                        .curr_pic
                        .top_field_order_cnt
                        .min(params.curr_pic.bottom_field_order_cnt) as i64;
                    let top_distance = (head.top_field_order_cnt as i64 - cur).abs();
                    let bottom_distance = (head.bottom_field_order_cnt as i64 - cur).abs();
                    top_distance >= bottom_distance
                };
                let mut word = surface.col_pic_params;
                write_field(&mut word, &COL_BOTTOM_FIELD_FLAG, u32::from(bottom));
                self.cmdbuf.rendec_write(word)?;
                self.cmdbuf.rendec_write_address(object, 0)?;
            }
            None => {
                if head.is_valid() {
                    warn!("list1 首项 {} 没有共位缓冲区", head.surface);
                }
                self.cmdbuf.rendec_write(0)?;
                self.cmdbuf.rendec_write(SENTINEL)?;
            }
        }

        let mut l0_minus1 = self.slice.num_ref_idx_l0_active_minus1;
        if l0_minus1 > MAX_INVERSE_LIST0_MINUS1 {
            warn!(
                "l0 参考数减一 {} 过大, 反查表截断到 {}",
                l0_minus1, MAX_INVERSE_LIST0_MINUS1
            );
            l0_minus1 = MAX_INVERSE_LIST0_MINUS1;
        }
        let mut inverse = [0xffu8; MAX_LIST_ENTRIES];
        for (i, entry) in self.slice.ref_pic_list0[..=l0_minus1 as usize].iter().enumerate() {
            inverse[self.picture_index(entry) as usize & 0x1f] = i as u8;
        }
        self.cmdbuf.rendec_write_block(&inverse)?;

        let slice = self.slice;
        let l1_minus1 = self.clamp_packed(slice.num_ref_idx_l1_active_minus1, "l1");
        self.write_packed_list(&slice.ref_pic_list1, l1_minus1)?;
        self.cmdbuf.rendec_end();
        Ok(())
    }

    fn list0_chunk(&mut self) -> VdxResult<()> {
        let slice = self.slice;
        let l0_minus1 = self.clamp_packed(slice.num_ref_idx_l0_active_minus1, "l0");
        self.cmdbuf.rendec_start(H264_BE_LIST0)?;
        self.write_packed_list(&slice.ref_pic_list0, l0_minus1)?;
        self.cmdbuf.rendec_end();
        Ok(())
    }

    /// 16 个 DPB 槽的亮度 / 色度基址, 空槽写占位值
    fn dpb_chunk(&mut self) -> VdxResult<()> {
        let cmdbuf = &mut *self.cmdbuf;
        cmdbuf.rendec_start(CMDS_REFERENCE_PICTURE_BASE_ADDRESSES)?;
        for slot in 0..MAX_REFERENCE_FRAMES {
            let surface = self
                .dpb
                .surface_at(slot)
                .and_then(|id| self.surfaces.get(id));
            match surface {
                Some(surface) => {
                    let object = surface.ref_buf().unwrap_or(surface.buffer());
                    cmdbuf.rendec_write_address(object, 0)?;
                    cmdbuf.rendec_write_address(object, surface.chroma_offset())?;
                    object.set_unfence(true);
                }
                None => {
                    cmdbuf.rendec_write(SENTINEL)?;
                    cmdbuf.rendec_write(SENTINEL)?;
                }
            }
        }
        cmdbuf.rendec_end();
        Ok(())
    }

    /// 32 个加权系数字与 32 个偏移字, 未使用的项补零
    fn weights_chunk(
        &mut self,
        dest: u32,
        entries: &[WeightEntry; MAX_LIST_ENTRIES],
        minus1: u32,
    ) -> VdxResult<()> {
        let count = (minus1 as usize + 1).min(MAX_LIST_ENTRIES);
        let pack = |y: i32, cb: i32, cr: i32| {
            pack_fields(&[
                (&WEIGHT_CR, masked(cr, &WEIGHT_CR)),
                (&WEIGHT_CB, masked(cb, &WEIGHT_CB)),
                (&WEIGHT_Y, masked(y, &WEIGHT_Y)),
            ])
        };
        let cmdbuf = &mut *self.cmdbuf;
        cmdbuf.rendec_start(dest)?;
        for i in 0..MAX_LIST_ENTRIES {
            let word = if i < count {
                let e = &entries[i];
                pack(e.luma_weight, e.chroma_weight[0], e.chroma_weight[1])
            } else {
                0
            };
            cmdbuf.rendec_write(word)?;
        }
        for i in 0..MAX_LIST_ENTRIES {
            let word = if i < count {
                let e = &entries[i];
                pack(e.luma_offset, e.chroma_offset[0], e.chroma_offset[1])
            } else {
                0
            };
            cmdbuf.rendec_write(word)?;
        }
        cmdbuf.rendec_end();
        Ok(())
    }

    /// 图像尺寸、操作模式、重建地址、帧内参考缓存与加权分母
    fn sequence_chunk(&mut self) -> VdxResult<u32> {
        let params = self.picture.params();
        let geometry = self.picture.geometry;
        let picture_size = pack_fields(&[
            (&PICTURE_SIZE_HEIGHT, geometry.height_mb * 16 - 1),
            (&PICTURE_SIZE_WIDTH, geometry.width_mb * 16 - 1),
        ]);
        let async_mode = u32::from(self.picture.two_pass && !params.mb_adaptive_frame_field_flag);
        let operating_mode = pack_fields(&[
            (&OPMODE_CHROMA_INTERLEAVED, 0),
            (&OPMODE_ROW_STRIDE, self.target.stride_mode().bits()),
            (&OPMODE_CODEC_PROFILE, self.profile.code()),
            (&OPMODE_CODEC_MODE, CODEC_MODE_H264),
            (&OPMODE_ASYNC_MODE, async_mode),
            (&OPMODE_CHROMA_FORMAT, u32::from(params.chroma_format_idc != 0)),
        ]);
        let mc_cache = pack_fields(&[
            (&MC_CACHE_REF_OFFSET, CACHE_REF_OFFSET),
            (&MC_CACHE_ROW_OFFSET, CACHE_ROW_OFFSET),
        ]);
        let denominator = pack_fields(&[
            (
                &WEIGHT_DENOM_CHROMA_LOG2,
                self.slice.weights.chroma_log2_weight_denom,
            ),
            (
                &WEIGHT_DENOM_LUMA_LOG2,
                self.slice.weights.luma_log2_weight_denom,
            ),
        ]);

        let cmdbuf = &mut *self.cmdbuf;
        cmdbuf.rendec_start(CMDS_DISPLAY_PICTURE_SIZE)?;
        cmdbuf.rendec_write(picture_size)?;
        cmdbuf.rendec_write(picture_size)?;
        cmdbuf.rendec_write(operating_mode)?;
        cmdbuf.rendec_write_address(self.recon, 0)?;
        cmdbuf.rendec_write_address(self.recon, self.target.chroma_offset())?;
        // 辅助 MSB 缓冲区, H.264 不使用
        cmdbuf.rendec_write(0)?;
        cmdbuf.rendec_write_address(self.reference_cache, 0)?;
        cmdbuf.rendec_write(mc_cache)?;
        // VC-1 亮度补偿
        cmdbuf.rendec_write(0)?;
        cmdbuf.rendec_write(denominator)?;
        cmdbuf.rendec_end();
        Ok(operating_mode)
    }

    /// 条带参数字, 同时缓存到控制头
    fn slice_params_chunk(&mut self) -> VdxResult<()> {
        let params = self.picture.params();
        let mode_config = u32::from(params.weighted_pred_flag) | (params.weighted_bipred_idc << 1);
        let word = pack_fields(&[
            (
                &SLICE_PARAMS_CONSTRAINED_INTRA_PRED,
                u32::from(params.constrained_intra_pred_flag),
            ),
            (&SLICE_PARAMS_MODE_CONFIG, mode_config),
            (
                &SLICE_PARAMS_DISABLE_DEBLOCK_FILTER_IDC,
                self.slice.disable_deblocking_filter_idc,
            ),
            (
                &SLICE_PARAMS_ALPHA_CO_OFFSET_DIV2,
                masked(
                    self.slice.slice_alpha_c0_offset_div2,
                    &SLICE_PARAMS_ALPHA_CO_OFFSET_DIV2,
                ),
            ),
            (
                &SLICE_PARAMS_BETA_OFFSET_DIV2,
                masked(self.slice.slice_beta_offset_div2, &SLICE_PARAMS_BETA_OFFSET_DIV2),
            ),
            (&SLICE_PARAMS_FIELD_TYPE, self.picture.field_type),
            (&SLICE_PARAMS_CODE_TYPE, self.slice_type.code()),
        ]);
        let header = self.progress().header;
        self.cmdbuf.rendec_start(CMDS_SLICE_PARAMS)?;
        self.cmdbuf.rendec_write(word)?;
        self.cmdbuf.rendec_end();
        self.cmdbuf
            .set_cmd_word(header.slot(ctrl_alloc::SLICE_PARAMS), word);
        Ok(())
    }

    /// 单遍模式下由固件直接写出旋转备用输出
    fn alternative_output(&mut self) -> VdxResult<()> {
        let Some(rotated) = self.target.rotated() else {
            warn!("表面 {} 没有旋转输出缓冲区", self.target.id());
            return Ok(());
        };
        let header = self.progress().header;
        let flags = pack_fields(&[
            (&ROTATION_ALT_PICTURE_ENABLE, 1),
            (&ROTATION_ROW_STRIDE, self.target.stride_mode().bits()),
            (&ROTATION_MODE, self.rotation & 0x3),
        ]);
        self.cmdbuf.add_relocation(
            WordSlot::Command(header.slot(ctrl_alloc::ALT_OUTPUT_ADDR0)),
            rotated,
            0,
            RelocMode::FULL,
        )?;
        self.cmdbuf.add_relocation(
            WordSlot::Command(header.slot(ctrl_alloc::ALT_OUTPUT_ADDR1)),
            rotated,
            self.target.chroma_offset(),
            RelocMode::FULL,
        )?;
        self.cmdbuf
            .set_cmd_word(header.slot(ctrl_alloc::ALT_OUTPUT_FLAGS), flags);
        Ok(())
    }

    // ============================================================
    // 参考列表
    // ============================================================

    /// 参考图像在 DPB 中的索引, 底场置第 4 位
    fn picture_index(&self, picture: &PictureRef) -> u8 {
        if !picture.is_valid() {
            return 0;
        }
        let slot = match self.dpb.slot_of(picture.surface) {
            Some(slot) => slot as u8,
            None => {
                warn!("参考表面 {} 不在 DPB 中", picture.surface);
                0
            }
        };
        if picture.is_bottom_field() {
            slot | 0x10
        } else {
            slot
        }
    }

    fn clamp_packed(&self, minus1: u32, list: &str) -> u32 {
        if minus1 > MAX_PACKED_LIST_MINUS1 {
            warn!(
                "{} 参考数减一 {} 过大, 截断到 {}",
                list, minus1, MAX_PACKED_LIST_MINUS1
            );
            MAX_PACKED_LIST_MINUS1
        } else {
            minus1
        }
    }

    /// 每字 4 个索引, 低字节在前
    fn write_packed_list(
        &mut self,
        list: &[PictureRef; MAX_LIST_ENTRIES],
        minus1: u32,
    ) -> VdxResult<()> {
        for base in (0..=minus1 as usize).step_by(4) {
            let mut word = 0u32;
            for j in (0..4).rev() {
                word = (word << 8) | u32::from(self.picture_index(&list[base + j]));
            }
            self.cmdbuf.rendec_write(word)?;
        }
        Ok(())
    }
}
