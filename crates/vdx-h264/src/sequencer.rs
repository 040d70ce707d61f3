//! 二次去块宏块序列器.
//!
//! 首遍解码后固件在共位缓冲区中为每个宏块留下 0x80 字节的参数记录.
//! 序列器按光栅顺序遍历这些记录, 把当前行宏块与上一行预读宏块的命令
//! 写入暂存命令流, 供去块单元独立完成第二遍.

use log::{debug, warn};
use vdx_cmdbuf::{CommandBuffer, PlaneRef};
use vdx_core::field::{
    FieldDescriptor, pack_fields, read_record_field, read_record_table_field, write_record_field,
    write_record_table_field,
};
use vdx_core::{VdxError, VdxResult, write_field};

use crate::regs::*;

/// 每个宏块参数记录的字节数
pub const MB_RECORD_BYTES: usize = 0x80;

// ============================================================
// 宏块记录布局
// ============================================================

pub const MB_TYPE: FieldDescriptor = FieldDescriptor::mem("MB_TYPE", 0x00, 0, 2);
pub const MB_AVAILABLE_TOP: FieldDescriptor = FieldDescriptor::mem("MB_AVAILABLE_TOP", 0x00, 4, 1);
pub const MB_AVAILABLE_LEFT: FieldDescriptor =
    FieldDescriptor::mem("MB_AVAILABLE_LEFT", 0x00, 5, 1);
/// 4 个 8x8 块的预测尺寸
pub const MB_BLOCK_PREDICTION_SIZE: FieldDescriptor =
    FieldDescriptor::table("MB_BLOCK_PREDICTION_SIZE", 0x00, 8, 3, 4);

pub const MB_QP: FieldDescriptor = FieldDescriptor::mem("MB_QP", 0x04, 0, 6);
pub const MB_QP_CB: FieldDescriptor = FieldDescriptor::mem("MB_QP_CB", 0x04, 8, 6);
pub const MB_QP_CR: FieldDescriptor = FieldDescriptor::mem("MB_QP_CR", 0x04, 16, 6);

pub const MB_TRANSFORM_ZERO: FieldDescriptor = FieldDescriptor::mem("MB_TRANSFORM_ZERO", 0x08, 0, 24);

// 首遍写入的条带参数副本
pub const MB_COPY_DISABLE_DEBLOCK: FieldDescriptor =
    FieldDescriptor::mem("MB_COPY_DISABLE_DEBLOCK", 0x0c, 0, 2);
pub const MB_COPY_ALPHA_CO_OFFSET_DIV2: FieldDescriptor =
    FieldDescriptor::mem("MB_COPY_ALPHA_CO_OFFSET_DIV2", 0x0c, 4, 4);
pub const MB_COPY_BETA_OFFSET_DIV2: FieldDescriptor =
    FieldDescriptor::mem("MB_COPY_BETA_OFFSET_DIV2", 0x0c, 8, 4);
pub const MB_COPY_FIELD_TYPE: FieldDescriptor =
    FieldDescriptor::mem("MB_COPY_FIELD_TYPE", 0x0c, 12, 2);
pub const MB_COPY_CODE_TYPE: FieldDescriptor =
    FieldDescriptor::mem("MB_COPY_CODE_TYPE", 0x0c, 16, 2);

pub const MB_DPB_IDX_COL: FieldDescriptor = FieldDescriptor::table("MB_DPB_IDX_COL", 0x10, 0, 5, 8);

pub const MB_COMP_X_ABOVE: FieldDescriptor =
    FieldDescriptor::table("MB_COMP_X_ABOVE", 0x20, 0, 16, 32);
pub const MB_COMP_Y_ABOVE: FieldDescriptor =
    FieldDescriptor::table("MB_COMP_Y_ABOVE", 0x20, 16, 16, 32);
pub const MB_COMP_X_COL: FieldDescriptor = FieldDescriptor::table("MB_COMP_X_COL", 0x30, 0, 16, 32);
pub const MB_COMP_Y_COL: FieldDescriptor = FieldDescriptor::table("MB_COMP_Y_COL", 0x30, 16, 16, 32);

/// 首遍记录的宏块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbKind {
    Intra,
    /// 单向帧间
    Inter,
    /// 双向帧间, 二次去块不支持
    BiPred,
    Ipcm,
}

impl MbKind {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::Intra,
            1 => Self::Inter,
            2 => Self::BiPred,
            _ => Self::Ipcm,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::Intra => 0,
            Self::Inter => 1,
            Self::BiPred => 2,
            Self::Ipcm => 3,
        }
    }

    /// 宏块号命令中的编码类型, IPCM 按帧内发送
    fn code_type(self) -> u32 {
        match self {
            Self::Ipcm => 0,
            other => other.raw(),
        }
    }
}

/// 首遍写入的条带参数副本
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceCopy {
    pub disable_deblock: u32,
    /// 4 位补码
    pub alpha_c0_offset_div2: u32,
    pub beta_offset_div2: u32,
    pub field_type: u32,
    pub code_type: u32,
}

impl SliceCopy {
    /// 重新打包为 SLICE_PARAMS 命令
    pub fn command(&self) -> u32 {
        pack_fields(&[
            (&SLICE_PARAMS_DISABLE_DEBLOCK_FILTER_IDC, self.disable_deblock),
            (&SLICE_PARAMS_ALPHA_CO_OFFSET_DIV2, self.alpha_c0_offset_div2),
            (&SLICE_PARAMS_BETA_OFFSET_DIV2, self.beta_offset_div2),
            (&SLICE_PARAMS_FIELD_TYPE, self.field_type),
            (&SLICE_PARAMS_CODE_TYPE, self.code_type),
        ])
    }
}

/// 一个宏块的参数记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroblockRecord {
    pub kind: MbKind,
    pub available_top: bool,
    pub available_left: bool,
    /// 4 个 8x8 块的预测尺寸 (0 = 16x16 .. 6 = 4x4)
    pub block_sizes: [u32; 4],
    pub qp: u32,
    pub qp_cb: u32,
    pub qp_cr: u32,
    pub transform_zero: u32,
    pub slice: SliceCopy,
    pub dpb_idx_col: [u32; 4],
    /// 上一行底部 4 个 4x4 块的运动矢量 (x, y)
    pub above_mv: [(u16, u16); 4],
    /// 本宏块其余 14 个 4x4 块的运动矢量
    pub col_mv: [(u16, u16); 14],
}

impl Default for MacroblockRecord {
    fn default() -> Self {
        Self {
            kind: MbKind::Intra,
            available_top: false,
            available_left: false,
            block_sizes: [0; 4],
            qp: 0,
            qp_cb: 0,
            qp_cr: 0,
            transform_zero: 0,
            slice: SliceCopy::default(),
            dpb_idx_col: [0; 4],
            above_mv: [(0, 0); 4],
            col_mv: [(0, 0); 14],
        }
    }
}

impl MacroblockRecord {
    pub fn decode(record: &[u8]) -> Self {
        assert!(record.len() >= MB_RECORD_BYTES, "宏块记录不足 {MB_RECORD_BYTES} 字节");
        let mut block_sizes = [0; 4];
        for (i, size) in block_sizes.iter_mut().enumerate() {
            *size = read_record_table_field(record, &MB_BLOCK_PREDICTION_SIZE, i);
        }
        let mut dpb_idx_col = [0; 4];
        for (i, idx) in dpb_idx_col.iter_mut().enumerate() {
            *idx = read_record_table_field(record, &MB_DPB_IDX_COL, i);
        }
        let mv = |x: &FieldDescriptor, y: &FieldDescriptor, i: usize| {
            (
                read_record_table_field(record, x, i) as u16,
                read_record_table_field(record, y, i) as u16,
            )
        };
        let mut above_mv = [(0, 0); 4];
        for (i, v) in above_mv.iter_mut().enumerate() {
            *v = mv(&MB_COMP_X_ABOVE, &MB_COMP_Y_ABOVE, i);
        }
        let mut col_mv = [(0, 0); 14];
        for (i, v) in col_mv.iter_mut().enumerate() {
            *v = mv(&MB_COMP_X_COL, &MB_COMP_Y_COL, i);
        }
        Self {
            kind: MbKind::from_raw(read_record_field(record, &MB_TYPE)),
            available_top: read_record_field(record, &MB_AVAILABLE_TOP) == 1,
            available_left: read_record_field(record, &MB_AVAILABLE_LEFT) == 1,
            block_sizes,
            qp: read_record_field(record, &MB_QP),
            qp_cb: read_record_field(record, &MB_QP_CB),
            qp_cr: read_record_field(record, &MB_QP_CR),
            transform_zero: read_record_field(record, &MB_TRANSFORM_ZERO),
            slice: SliceCopy {
                disable_deblock: read_record_field(record, &MB_COPY_DISABLE_DEBLOCK),
                alpha_c0_offset_div2: read_record_field(record, &MB_COPY_ALPHA_CO_OFFSET_DIV2),
                beta_offset_div2: read_record_field(record, &MB_COPY_BETA_OFFSET_DIV2),
                field_type: read_record_field(record, &MB_COPY_FIELD_TYPE),
                code_type: read_record_field(record, &MB_COPY_CODE_TYPE),
            },
            dpb_idx_col,
            above_mv,
            col_mv,
        }
    }

    /// 编码为固件布局 (合成测试码流使用)
    pub fn encode(&self) -> [u8; MB_RECORD_BYTES] {
        let mut record = [0u8; MB_RECORD_BYTES];
        write_record_field(&mut record, &MB_TYPE, self.kind.raw());
        write_record_field(&mut record, &MB_AVAILABLE_TOP, self.available_top as u32);
        write_record_field(&mut record, &MB_AVAILABLE_LEFT, self.available_left as u32);
        for (i, &size) in self.block_sizes.iter().enumerate() {
            write_record_table_field(&mut record, &MB_BLOCK_PREDICTION_SIZE, i, size);
        }
        write_record_field(&mut record, &MB_QP, self.qp);
        write_record_field(&mut record, &MB_QP_CB, self.qp_cb);
        write_record_field(&mut record, &MB_QP_CR, self.qp_cr);
        write_record_field(&mut record, &MB_TRANSFORM_ZERO, self.transform_zero);
        write_record_field(&mut record, &MB_COPY_DISABLE_DEBLOCK, self.slice.disable_deblock);
        write_record_field(
            &mut record,
            &MB_COPY_ALPHA_CO_OFFSET_DIV2,
            self.slice.alpha_c0_offset_div2,
        );
        write_record_field(&mut record, &MB_COPY_BETA_OFFSET_DIV2, self.slice.beta_offset_div2);
        write_record_field(&mut record, &MB_COPY_FIELD_TYPE, self.slice.field_type);
        write_record_field(&mut record, &MB_COPY_CODE_TYPE, self.slice.code_type);
        for (i, &idx) in self.dpb_idx_col.iter().enumerate() {
            write_record_table_field(&mut record, &MB_DPB_IDX_COL, i, idx);
        }
        for (i, &(x, y)) in self.above_mv.iter().enumerate() {
            write_record_table_field(&mut record, &MB_COMP_X_ABOVE, i, x as u32);
            write_record_table_field(&mut record, &MB_COMP_Y_ABOVE, i, y as u32);
        }
        for (i, &(x, y)) in self.col_mv.iter().enumerate() {
            write_record_table_field(&mut record, &MB_COMP_X_COL, i, x as u32);
            write_record_table_field(&mut record, &MB_COMP_Y_COL, i, y as u32);
        }
        record
    }
}

// ============================================================
// 分块映射表
// ============================================================

/// 预测尺寸编号: 16x16, 16x8, 8x16, 8x8, 8x4, 4x8, 4x4
const MAX_BLOCK_SIZE: u32 = 6;

/// 上一行预读时把块 2/3 的尺寸归并为 ?x8
const BLOCK_DOWNSIZE_MAP: [u32; 7] = [1, 1, 3, 3, 3, 5, 5];
const BLOCKS_TO_SEND_MAP: [usize; 7] = [1, 2, 2, 4, 4, 4, 4];
const BLOCK_ADDRESS_MAP: [[usize; 4]; 7] = [
    [0, 0, 0, 0],
    [0, 2, 0, 0],
    [0, 1, 0, 0],
    [0, 1, 2, 3],
    [0, 1, 2, 3],
    [0, 1, 2, 3],
    [0, 1, 2, 3],
];
const VECTORS_TO_SEND_MAP: [usize; 7] = [1, 1, 1, 1, 2, 2, 4];
const VECTOR_OFFSET_MAP: [[usize; 4]; 7] = [
    [0, 0, 0, 0],
    [0, 0, 0, 0],
    [0, 0, 0, 0],
    [0, 0, 0, 0],
    [0, 2, 0, 0],
    [0, 1, 0, 0],
    [0, 1, 2, 3],
];
const ABOVE1_ABOVE_TILE_MAP: [usize; 4] = [13, 12, 9, 8];
const CURRENT_ABOVE_TILE_MAP: [usize; 4] = [15, 14, 11, 10];
const CURRENT_COL_TILE_MAP: [usize; 14] = [10, 15, 0, 5, 8, 13, 2, 7, 1, 4, 3, 6, 9, 12];
const COL_BLOCK_MAP: [usize; 4] = [2, 3, 0, 1];

/// 上一行预读只发送子块 10, 11, 14, 15 的零变换标志
const ABOVE1_TRANSFORM_ZERO_MASK: u32 = 0x0000_cc00;

fn clamp_block_size(size: u32) -> u32 {
    if size > MAX_BLOCK_SIZE {
        warn!("宏块预测尺寸 {} 越界, 按 4x4 处理", size);
        MAX_BLOCK_SIZE
    } else {
        size
    }
}

fn table_reg(reg: u32, index: usize) -> u32 {
    reg + (index as u32) * 4
}

// ============================================================
// 序列器
// ============================================================

/// 暂存命令流中的宏块命令写入器
pub struct MacroblockSequencer<'a> {
    cmdbuf: &'a mut CommandBuffer,
    width_mb: u32,
    height_mb: u32,
}

impl<'a> MacroblockSequencer<'a> {
    pub fn new(cmdbuf: &'a mut CommandBuffer, width_mb: u32, height_mb: u32) -> Self {
        Self {
            cmdbuf,
            width_mb,
            height_mb,
        }
    }

    fn poll(&mut self, count: u32) -> VdxResult<()> {
        self.cmdbuf.staging_poll_n(CORE_COMMAND_SPACE, count)
    }

    /// 写入整幅图像的二次去块命令流, 返回暂存命令字数
    pub fn run(
        &mut self,
        target: PlaneRef<'_>,
        operating_mode: u32,
        records: &[u8],
    ) -> VdxResult<u32> {
        if self.width_mb == 0 || self.height_mb == 0 {
            return Err(VdxError::InvalidArgument(format!(
                "图像尺寸 {}x{} 宏块无效",
                self.width_mb, self.height_mb
            )));
        }
        let pic_size = (self.width_mb * self.height_mb) as usize;
        if records.len() < pic_size * MB_RECORD_BYTES {
            return Err(VdxError::InvalidData(format!(
                "宏块参数 {} 字节, {} 个宏块需要 {} 字节",
                records.len(),
                pic_size,
                pic_size * MB_RECORD_BYTES
            )));
        }
        let mbs: Vec<MacroblockRecord> = records
            .chunks_exact(MB_RECORD_BYTES)
            .take(pic_size)
            .map(MacroblockRecord::decode)
            .collect();

        self.cmdbuf.begin_second_pass()?;
        self.prologue(target)?;
        self.picture(operating_mode, &mbs)?;
        let words = self.cmdbuf.end_second_pass();
        debug!(
            "二次去块: {}x{} 宏块, 暂存命令 {} 字",
            self.width_mb, self.height_mb, words
        );
        Ok(words)
    }

    /// 重建地址、图像尺寸与范围映射复位
    fn prologue(&mut self, target: PlaneRef<'_>) -> VdxResult<()> {
        self.poll(4)?;
        self.cmdbuf.staging_set_address(
            CMDS_LUMA_RECONSTRUCTED_PICTURE_BASE,
            target.object,
            target.offset,
        )?;
        self.cmdbuf.staging_set_address(
            CMDS_CHROMA_RECONSTRUCTED_PICTURE_BASE,
            target.object,
            target.offset + target.chroma_offset,
        )?;
        let size = pack_fields(&[
            (&PICTURE_SIZE_HEIGHT, self.height_mb * 16 - 1),
            (&PICTURE_SIZE_WIDTH, self.width_mb * 16 - 1),
        ]);
        self.cmdbuf.staging_set(CMDS_DISPLAY_PICTURE_SIZE, size)?;
        self.cmdbuf.staging_set(CMDS_CODED_PICTURE_SIZE, size)?;
        self.cmdbuf.staging_set(CMDS_RANGE_MAPPING_LUMA_BASE, 0)?;
        self.cmdbuf.staging_set(CMDS_RANGE_MAPPING_CHROMA_BASE, 0)?;
        self.cmdbuf.staging_set(CMDS_RANGE_MAPPING_FLAGS, 0)?;
        Ok(())
    }

    fn picture(&mut self, mut operating_mode: u32, mbs: &[MacroblockRecord]) -> VdxResult<()> {
        let width = self.width_mb as usize;
        let end_of_slice = pack_fields(&[(&END_SLICE_PICTURE_PICTURE_END, 0)]);

        // 去块单元单独运行
        write_field(&mut operating_mode, &OPMODE_ASYNC_MODE, ASYNC_MODE_SECOND_PASS);
        self.poll(1)?;
        self.cmdbuf.staging_get(CORE_COMMAND_SPACE)?;
        self.cmdbuf.staging_set(CMDS_OPERATING_MODE, operating_mode)?;
        self.cmdbuf.staging_poll_x(CORE_COMMAND_SPACE)?;

        let mut slice_cmd = mbs[0].slice.command();
        self.poll(2)?;
        self.cmdbuf.staging_set(CMDS_SLICE_PARAMS, slice_cmd)?;
        self.cmdbuf.staging_set(CMDS_SLICE_PARAMS_ABOVE1, slice_cmd)?;

        for (i, mb) in mbs.iter().enumerate() {
            let previous = slice_cmd;
            slice_cmd = mb.slice.command();
            if previous != slice_cmd {
                self.poll(2)?;
                self.cmdbuf.staging_set(CMDS_END_SLICE_PICTURE, end_of_slice)?;
                self.cmdbuf.staging_set(CMDS_SLICE_PARAMS, slice_cmd)?;
            }
            let x = (i % width) as u32;
            let y = (i / width) as u32;
            if y > 0 {
                self.macroblock(&mbs[i - width], x, y - 1, false)?;
            }
            self.macroblock(mb, x, y, true)?;
        }

        let end_of_picture = pack_fields(&[(&END_SLICE_PICTURE_PICTURE_END, 1)]);
        self.poll(2)?;
        self.cmdbuf.staging_set(CMDS_END_SLICE_PICTURE, end_of_slice)?;
        self.cmdbuf.staging_set(CMDS_END_SLICE_PICTURE, end_of_picture)?;
        Ok(())
    }

    /// 单个宏块的命令; current 为假时写入上一行预读寄存器
    fn macroblock(&mut self, mb: &MacroblockRecord, x: u32, y: u32, current: bool) -> VdxResult<()> {
        let mut number = pack_fields(&[
            (&MB_NUMBER_CODE_TYPE, mb.kind.code_type()),
            (&MB_NUMBER_Y, y),
            (&MB_NUMBER_X, x),
        ]);
        let quant = pack_fields(&[
            (&QUANT_CR, mb.qp_cr),
            (&QUANT_CB, mb.qp_cb),
            (&QUANT_LUMA, mb.qp),
        ]);

        self.poll(2)?;
        if current {
            // 条带边界标志只随当前行发送
            write_field(&mut number, &MB_NUMBER_SLICE_TOP, (!mb.available_top) as u32);
            write_field(&mut number, &MB_NUMBER_SLICE_LHS, (!mb.available_left) as u32);
            self.cmdbuf.staging_set(CMDS_MACROBLOCK_NUMBER, number)?;
            self.cmdbuf.staging_set(CMDS_MACROBLOCK_H264_QUANT, quant)?;
        } else {
            self.cmdbuf.staging_set(above1(CMDS_MACROBLOCK_NUMBER), number)?;
            self.cmdbuf.staging_set(above1(CMDS_MACROBLOCK_H264_QUANT), quant)?;
        }

        match mb.kind {
            MbKind::Intra | MbKind::Ipcm => {
                let ipcm = mb.kind == MbKind::Ipcm;
                if current {
                    self.current_intra(ipcm)?;
                } else {
                    self.above1_intra(ipcm)?;
                }
            }
            MbKind::Inter => {
                if current {
                    self.current_inter(mb)?;
                } else {
                    self.above1_inter(mb)?;
                }
            }
            MbKind::BiPred => {
                debug!("宏块 ({}, {}) 为双向预测, 跳过预测命令", x, y);
            }
        }

        self.poll(1)?;
        if current {
            self.cmdbuf
                .staging_set(CMDS_MACROBLOCK_BLOCK_TRANSFORM_ZERO, mb.transform_zero)?;
        } else {
            self.cmdbuf.staging_set(
                above1(CMDS_MACROBLOCK_BLOCK_TRANSFORM_ZERO),
                mb.transform_zero & ABOVE1_TRANSFORM_ZERO_MASK,
            )?;
        }
        Ok(())
    }

    fn current_intra(&mut self, ipcm: bool) -> VdxResult<()> {
        let luma = pack_fields(&[(&BLOCK_SIZE, if ipcm { 3 } else { 0 })]);
        let chroma = pack_fields(&[(&BLOCK_SIZE, if ipcm { 3 } else { 1 })]);
        self.poll(2)?;
        self.cmdbuf
            .staging_set(table_reg(CMDS_INTRA_BLOCK_PREDICTION, 0), luma)?;
        self.cmdbuf
            .staging_set(table_reg(CMDS_INTRA_BLOCK_PREDICTION, 4), chroma)?;
        Ok(())
    }

    fn above1_intra(&mut self, ipcm: bool) -> VdxResult<()> {
        let luma = pack_fields(&[(&BLOCK_SIZE, if ipcm { 3 } else { 0 })]);
        self.poll(1)?;
        self.cmdbuf
            .staging_set(table_reg(above1(CMDS_INTRA_BLOCK_PREDICTION), 0), luma)
    }

    fn current_inter(&mut self, mb: &MacroblockRecord) -> VdxResult<()> {
        let block_types = mb.block_sizes.map(clamp_block_size);

        let mut mv = [0u32; 16];
        for i in 1..3 {
            mv[CURRENT_ABOVE_TILE_MAP[i]] = pack_mv(mb.above_mv[i]);
        }
        for (i, &tile) in CURRENT_COL_TILE_MAP.iter().enumerate() {
            mv[tile] = pack_mv(mb.col_mv[i]);
        }
        let mut dpb_idx = [0u32; 4];
        for (i, &block) in COL_BLOCK_MAP.iter().enumerate() {
            dpb_idx[block] = mb.dpb_idx_col[i];
        }

        let outer = block_types[0] as usize;
        for block_num in 0..BLOCKS_TO_SEND_MAP[outer] {
            let block8x8 = BLOCK_ADDRESS_MAP[outer][block_num];
            self.inter_block(block8x8, block_types[block8x8], dpb_idx[block8x8], &mv, false)?;
        }
        Ok(())
    }

    fn above1_inter(&mut self, mb: &MacroblockRecord) -> VdxResult<()> {
        // 只需要底部两个块, 并统一为 ?x8
        let mut block_types = [0u32; 4];
        block_types[2] = BLOCK_DOWNSIZE_MAP[clamp_block_size(mb.block_sizes[2]) as usize];
        block_types[3] = BLOCK_DOWNSIZE_MAP[clamp_block_size(mb.block_sizes[3]) as usize];

        let mut mv = [0u32; 16];
        for (i, &tile) in ABOVE1_ABOVE_TILE_MAP.iter().enumerate() {
            mv[tile] = pack_mv(mb.above_mv[i]);
        }
        let mut dpb_idx = [0u32; 4];
        for i in 0..2 {
            dpb_idx[COL_BLOCK_MAP[i]] = mb.dpb_idx_col[i];
        }

        let outer = block_types[2] as usize;
        let blocks = BLOCKS_TO_SEND_MAP[outer];
        for block_num in blocks / 2..blocks {
            let block8x8 = BLOCK_ADDRESS_MAP[outer][block_num];
            self.inter_block(block8x8, block_types[block8x8], dpb_idx[block8x8], &mv, true)?;
        }
        Ok(())
    }

    fn inter_block(
        &mut self,
        block8x8: usize,
        block_type: u32,
        dpb_idx: u32,
        mv: &[u32; 16],
        is_above1: bool,
    ) -> VdxResult<()> {
        let (inter_reg, mv_reg) = if is_above1 {
            (above1(CMDS_INTER_BLOCK_PREDICTION), above1(CMDS_MOTION_VECTOR))
        } else {
            (CMDS_INTER_BLOCK_PREDICTION, CMDS_MOTION_VECTOR)
        };
        let cmd = pack_fields(&[
            (&BLOCK_SIZE, block_type),
            (&REF_INDEX_A_VALID, 1),
            (&REF_INDEX_A, dpb_idx),
        ]);
        let vectors = VECTORS_TO_SEND_MAP[block_type as usize];
        self.poll(1 + vectors as u32)?;
        self.cmdbuf.staging_set(table_reg(inter_reg, block8x8), cmd)?;
        for &offset in &VECTOR_OFFSET_MAP[block_type as usize][..vectors] {
            let addr = 2 * 4 * block8x8 + offset;
            let tile = 4 * block8x8 + offset;
            self.cmdbuf.staging_set(table_reg(mv_reg, addr), mv[tile])?;
        }
        Ok(())
    }
}

fn pack_mv((x, y): (u16, u16)) -> u32 {
    pack_fields(&[(&MV_X, x as u32), (&MV_Y, y as u32)])
}

/// 为 target 生成整幅图像的二次去块暂存命令流, 返回命令字数
pub fn second_pass(
    cmdbuf: &mut CommandBuffer,
    target: PlaneRef<'_>,
    operating_mode: u32,
    records: &[u8],
    width_mb: u32,
    height_mb: u32,
) -> VdxResult<u32> {
    MacroblockSequencer::new(cmdbuf, width_mb, height_mb).run(target, operating_mode, records)
}
