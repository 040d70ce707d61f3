//! 图像与条带参数.
//!
//! 调用方在码流层解析完成后按图像提交 [`PictureParams`], 按条带提交
//! [`SliceParams`]; 本模块只描述参数, 不做熵解码.

use bitflags::bitflags;

/// 解码表面标识
pub type SurfaceId = u32;

/// 参考帧数组与 DPB 的容量
pub const MAX_REFERENCE_FRAMES: usize = 16;
/// 每个参考列表的容量
pub const MAX_LIST_ENTRIES: usize = 32;

bitflags! {
    /// 图像标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PictureFlags: u32 {
        const INVALID = 0x01;
        const TOP_FIELD = 0x02;
        const BOTTOM_FIELD = 0x04;
        const SHORT_TERM_REFERENCE = 0x08;
        const LONG_TERM_REFERENCE = 0x10;
    }
}

impl PictureFlags {
    /// 是否作为参考图像
    pub fn is_reference(&self) -> bool {
        self.intersects(Self::SHORT_TERM_REFERENCE | Self::LONG_TERM_REFERENCE)
    }
}

/// 图像引用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureRef {
    pub surface: SurfaceId,
    pub frame_idx: u32,
    pub flags: PictureFlags,
    pub top_field_order_cnt: i32,
    pub bottom_field_order_cnt: i32,
}

impl PictureRef {
    /// 空位
    pub const INVALID: Self = Self {
        surface: u32::MAX,
        frame_idx: 0,
        flags: PictureFlags::INVALID,
        top_field_order_cnt: 0,
        bottom_field_order_cnt: 0,
    };

    /// 以同一 POC 作为顶 / 底场的短期参考帧
    pub fn frame(surface: SurfaceId, poc: i32) -> Self {
        Self {
            surface,
            frame_idx: 0,
            flags: PictureFlags::SHORT_TERM_REFERENCE,
            top_field_order_cnt: poc,
            bottom_field_order_cnt: poc,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.flags.contains(PictureFlags::INVALID)
    }

    pub fn is_bottom_field(&self) -> bool {
        self.flags.contains(PictureFlags::BOTTOM_FIELD)
    }
}

impl Default for PictureRef {
    fn default() -> Self {
        Self::INVALID
    }
}

// ============================================================
// 档次与条带类型
// ============================================================

/// H.264 档次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// 基线 (含受限基线)
    Baseline,
    Main,
    High,
}

impl Profile {
    /// 前端 / 后端控制寄存器与操作模式中的档次编码
    pub fn code(self) -> u32 {
        match self {
            Self::Baseline => 0,
            Self::Main => 1,
            Self::High => 2,
        }
    }

    /// SPS0 中的后端档次标识
    pub fn idc(self) -> u32 {
        match self {
            Self::Baseline => 0,
            Self::Main => 1,
            Self::High => 3,
        }
    }

    /// 该档次可解码的最大图像尺寸
    pub fn max_picture_size(self) -> (u32, u32) {
        match self {
            Self::Baseline => (720, 576),
            Self::Main | Self::High => (1920, 1088),
        }
    }
}

/// 条带类型 (码流值对 5 取模)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    pub fn from_raw(raw: u8) -> Self {
        match raw % 5 {
            0 => Self::P,
            1 => Self::B,
            2 => Self::I,
            3 => Self::Sp,
            _ => Self::Si,
        }
    }

    /// 硬件的条带编码类型: I/SI 为 0, P/SP 为 1, B 为 2
    pub fn code(self) -> u32 {
        match self {
            Self::I | Self::Si => 0,
            Self::P | Self::Sp => 1,
            Self::B => 2,
        }
    }
}

// ============================================================
// 图像参数
// ============================================================

/// 图像参数
#[derive(Debug, Clone)]
pub struct PictureParams {
    /// 当前图像, surface 为解码目标
    pub curr_pic: PictureRef,
    pub reference_frames: [PictureRef; MAX_REFERENCE_FRAMES],
    pub picture_width_in_mbs_minus1: u32,
    pub picture_height_in_mbs_minus1: u32,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    /// reference_frames 中有效的项数, 超过 16 时被截断
    pub num_ref_frames: u32,

    // 序列字段
    pub chroma_format_idc: u8,
    pub residual_colour_transform_flag: bool,
    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub min_luma_bipred_size_8x8: bool,

    pub num_slice_groups_minus1: u32,
    pub pic_init_qp_minus26: i32,
    pub chroma_qp_index_offset: i32,
    pub second_chroma_qp_index_offset: i32,

    // 图像字段
    pub entropy_coding_mode_flag: bool,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u32,
    pub transform_8x8_mode_flag: bool,
    pub field_pic_flag: bool,
    pub constrained_intra_pred_flag: bool,

    pub frame_num: u32,
}

impl Default for PictureParams {
    fn default() -> Self {
        Self {
            curr_pic: PictureRef::INVALID,
            reference_frames: [PictureRef::INVALID; MAX_REFERENCE_FRAMES],
            picture_width_in_mbs_minus1: 0,
            picture_height_in_mbs_minus1: 0,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            num_ref_frames: 0,
            chroma_format_idc: 1,
            residual_colour_transform_flag: false,
            frame_mbs_only_flag: true,
            mb_adaptive_frame_field_flag: false,
            direct_8x8_inference_flag: true,
            min_luma_bipred_size_8x8: false,
            num_slice_groups_minus1: 0,
            pic_init_qp_minus26: 0,
            chroma_qp_index_offset: 0,
            second_chroma_qp_index_offset: 0,
            entropy_coding_mode_flag: false,
            weighted_pred_flag: false,
            weighted_bipred_idc: 0,
            transform_8x8_mode_flag: false,
            field_pic_flag: false,
            constrained_intra_pred_flag: false,
            frame_num: 0,
        }
    }
}

/// 缩放矩阵
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IqMatrix {
    /// 4x4: 帧内 Y/Cb/Cr, 帧间 Y/Cb/Cr
    pub lists_4x4: [[u8; 16]; 6],
    /// 8x8: 帧内 Y, 帧间 Y
    pub lists_8x8: [[u8; 64]; 2],
}

impl IqMatrix {
    /// 全零矩阵, 缺少缩放矩阵时发送
    pub fn zeroed() -> Self {
        Self {
            lists_4x4: [[0; 16]; 6],
            lists_8x8: [[0; 64]; 2],
        }
    }

    /// 平坦矩阵 (全部为 16)
    pub fn flat() -> Self {
        Self {
            lists_4x4: [[16; 16]; 6],
            lists_8x8: [[16; 64]; 2],
        }
    }
}

// ============================================================
// 条带参数
// ============================================================

/// 条带数据在码流缓冲区中的分段方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceDataFlag {
    /// 完整条带
    #[default]
    All,
    /// 首段, 后续还有分段
    Begin,
    Middle,
    /// 末段
    End,
}

/// 单个参考项的加权预测系数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightEntry {
    pub luma_weight: i32,
    pub luma_offset: i32,
    /// [Cb, Cr]
    pub chroma_weight: [i32; 2],
    pub chroma_offset: [i32; 2],
}

/// 加权预测表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u32,
    pub chroma_log2_weight_denom: u32,
    pub l0: [WeightEntry; MAX_LIST_ENTRIES],
    pub l1: [WeightEntry; MAX_LIST_ENTRIES],
}

impl Default for PredWeightTable {
    fn default() -> Self {
        Self {
            luma_log2_weight_denom: 0,
            chroma_log2_weight_denom: 0,
            l0: [WeightEntry::default(); MAX_LIST_ENTRIES],
            l1: [WeightEntry::default(); MAX_LIST_ENTRIES],
        }
    }
}

/// 条带参数
#[derive(Debug, Clone)]
pub struct SliceParams {
    pub slice_data_size: u32,
    /// 条带数据在码流对象中的字节偏移
    pub slice_data_offset: u32,
    /// 条带头之后第一个宏块的位偏移
    pub slice_data_bit_offset: u32,
    pub slice_data_flag: SliceDataFlag,
    pub first_mb_in_slice: u32,
    /// 码流中的 slice_type (0..9)
    pub slice_type: u8,
    pub direct_spatial_mv_pred_flag: bool,
    pub num_ref_idx_l0_active_minus1: u32,
    pub num_ref_idx_l1_active_minus1: u32,
    pub cabac_init_idc: u32,
    pub slice_qp_delta: i32,
    pub disable_deblocking_filter_idc: u32,
    pub slice_alpha_c0_offset_div2: i32,
    pub slice_beta_offset_div2: i32,
    pub ref_pic_list0: [PictureRef; MAX_LIST_ENTRIES],
    pub ref_pic_list1: [PictureRef; MAX_LIST_ENTRIES],
    pub weights: PredWeightTable,
}

impl SliceParams {
    pub fn slice_type(&self) -> SliceType {
        SliceType::from_raw(self.slice_type)
    }
}

impl Default for SliceParams {
    fn default() -> Self {
        Self {
            slice_data_size: 0,
            slice_data_offset: 0,
            slice_data_bit_offset: 0,
            slice_data_flag: SliceDataFlag::All,
            first_mb_in_slice: 0,
            slice_type: 2,
            direct_spatial_mv_pred_flag: false,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            cabac_init_idc: 0,
            slice_qp_delta: 0,
            disable_deblocking_filter_idc: 0,
            slice_alpha_c0_offset_div2: 0,
            slice_beta_offset_div2: 0,
            ref_pic_list0: [PictureRef::INVALID; MAX_LIST_ENTRIES],
            ref_pic_list1: [PictureRef::INVALID; MAX_LIST_ENTRIES],
            weights: PredWeightTable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_type_code_map() {
        let codes: Vec<u32> = (0..10).map(|raw| SliceType::from_raw(raw).code()).collect();
        assert_eq!(codes, vec![1, 2, 0, 1, 0, 1, 2, 0, 1, 0]);
    }

    #[test]
    fn test_reference_flags() {
        assert!(PictureRef::frame(3, 8).flags.is_reference());
        assert!(!PictureRef::INVALID.is_valid());
        assert!(!PictureFlags::TOP_FIELD.is_reference());
    }
}
