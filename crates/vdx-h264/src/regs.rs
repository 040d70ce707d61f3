//! H.264 寄存器地址与字段布局.
//!
//! 前端寄存器通过寄存器写对块写入; 后端寄存器通过 rendec 块写入,
//! 目标为字节地址, 字索引不超过 12 位. 二次去块命令通过暂存命令流写入
//! 命令寄存器区.

use vdx_core::FieldDescriptor;

// ============================================================
// 前端 (寄存器写对块)
// ============================================================

pub const ENTDEC_FE_CONTROL: u32 = 0x0824;
/// 22 个 VLC 子表地址寄存器的起点
pub const VLC_TABLE_ADDR0: u32 = 0x0900;

pub const H264_FE_SPS0: u32 = 0x0a00;
pub const H264_FE_PPS0: u32 = 0x0a04;
pub const H264_FE_CUR_PIC0: u32 = 0x0a08;
pub const H264_FE_SLICE0: u32 = 0x0a0c;
pub const H264_FE_SLICE1: u32 = 0x0a10;
pub const H264_FE_SLICE2: u32 = 0x0a14;
/// 条带组映射基址
pub const H264_FE_BASE_ADDR_SGM: u32 = 0x0a18;

/// 命令空间剩余量, 暂存命令流轮询该寄存器
pub const CORE_COMMAND_SPACE: u32 = 0x0664;

// ============================================================
// 后端 (rendec 块目标)
// ============================================================

pub const ENTDEC_BE_CONTROL: u32 = 0x0880;

/// SPS0, PPS0, PIC0, SLICE0, SLICE1, 共位基址, REF0 连续排列
pub const H264_BE_SPS0: u32 = 0x0c00;
/// 当前图像顶 / 底场 POC, 随后 16 个 DPB 槽的顶 / 底场 POC
pub const H264_BE_FOC_CUR_TOP: u32 = 0x0c40;
/// 共位图像参数、共位基址、list0 反查表与 list1 索引
pub const H264_BE_COL_PIC0: u32 = 0x0d00;
pub const H264_BE_LIST0: u32 = 0x0d80;
/// 缩放矩阵 RAM
pub const H264_BE_IQ_RAM: u32 = 0x3000;

// 命令寄存器区
pub const CMDS_DISPLAY_PICTURE_SIZE: u32 = 0x1000;
pub const CMDS_CODED_PICTURE_SIZE: u32 = 0x1004;
pub const CMDS_OPERATING_MODE: u32 = 0x1008;
pub const CMDS_LUMA_RECONSTRUCTED_PICTURE_BASE: u32 = 0x100c;
pub const CMDS_CHROMA_RECONSTRUCTED_PICTURE_BASE: u32 = 0x1010;
pub const CMDS_AUX_MSB_BUFFER_BASE: u32 = 0x1014;
pub const CMDS_INTRA_BUFFER_BASE: u32 = 0x1018;
pub const CMDS_MC_CACHE_CONFIGURATION: u32 = 0x101c;
pub const CMDS_VC1_INTENSITY_COMPENSATION: u32 = 0x1020;
pub const CMDS_H264_WEIGHTED_FACTOR_DENOMINATOR: u32 = 0x1024;

pub const CMDS_RANGE_MAPPING_LUMA_BASE: u32 = 0x1040;
pub const CMDS_RANGE_MAPPING_CHROMA_BASE: u32 = 0x1044;
pub const CMDS_RANGE_MAPPING_FLAGS: u32 = 0x1048;
pub const CMDS_ALTERNATIVE_OUTPUT_PICTURE_ROTATION: u32 = 0x1050;
pub const CMDS_EXTENDED_ROW_STRIDE: u32 = 0x1054;

/// 16 个 DPB 槽的亮度 / 色度基址对
pub const CMDS_REFERENCE_PICTURE_BASE_ADDRESSES: u32 = 0x1100;
/// list0 加权系数 (32 字), 随后 32 个偏移字
pub const CMDS_H264_WEIGHTED_FACTORS_A: u32 = 0x1200;
pub const CMDS_H264_WEIGHTED_FACTORS_B: u32 = 0x1300;

pub const CMDS_SLICE_PARAMS: u32 = 0x1400;
pub const CMDS_SLICE_PARAMS_ABOVE1: u32 = 0x1404;
pub const CMDS_END_SLICE_PICTURE: u32 = 0x1410;

// 宏块命令 (当前行), 上一行预读在 ABOVE1 偏移处
pub const CMDS_MACROBLOCK_NUMBER: u32 = 0x1500;
pub const CMDS_MACROBLOCK_H264_QUANT: u32 = 0x1504;
pub const CMDS_MACROBLOCK_BLOCK_TRANSFORM_ZERO: u32 = 0x1508;
pub const CMDS_INTRA_BLOCK_PREDICTION: u32 = 0x1540;
pub const CMDS_INTER_BLOCK_PREDICTION: u32 = 0x1560;
pub const CMDS_MOTION_VECTOR: u32 = 0x1580;
pub const CMDS_ABOVE1_OFFSET: u32 = 0x0100;

// ============================================================
// 字段
// ============================================================

pub const ENTDEC_PROFILE: FieldDescriptor = FieldDescriptor::reg("ENTDEC_PROFILE", 0, 2);
pub const ENTDEC_MODE: FieldDescriptor = FieldDescriptor::reg("ENTDEC_MODE", 4, 4);

pub const SPS0_PICWIDTHINMBSLESS1: FieldDescriptor =
    FieldDescriptor::reg("SPS0_PICWIDTHINMBSLESS1", 0, 8);
pub const SPS0_FRAME_MBS_ONLY_FLAG: FieldDescriptor =
    FieldDescriptor::reg("SPS0_FRAME_MBS_ONLY_FLAG", 8, 1);
pub const SPS0_CHROMA_FORMAT_IDC: FieldDescriptor =
    FieldDescriptor::reg("SPS0_CHROMA_FORMAT_IDC", 9, 2);
pub const SPS0_DIRECT_8X8_INFERENCE_FLAG: FieldDescriptor =
    FieldDescriptor::reg("SPS0_DIRECT_8X8_INFERENCE_FLAG", 11, 1);
pub const SPS0_MIN_LUMA_BIPRED_SIZE_8X8: FieldDescriptor =
    FieldDescriptor::reg("SPS0_MIN_LUMA_BIPRED_SIZE_8X8", 12, 1);
pub const SPS0_BE_PROFILEIDC: FieldDescriptor = FieldDescriptor::reg("SPS0_BE_PROFILEIDC", 13, 2);
pub const SPS0_4BIT_SGM_FLAG: FieldDescriptor = FieldDescriptor::reg("SPS0_4BIT_SGM_FLAG", 15, 1);
pub const SPS0_2PASS_FLAG: FieldDescriptor = FieldDescriptor::reg("SPS0_2PASS_FLAG", 16, 1);
pub const SPS0_DEFAULT_SCALING_MATRIX_FLAG: FieldDescriptor =
    FieldDescriptor::reg("SPS0_DEFAULT_SCALING_MATRIX_FLAG", 17, 1);

pub const PPS0_NUM_SLICE_GROUPS_MINUS1: FieldDescriptor =
    FieldDescriptor::reg("PPS0_NUM_SLICE_GROUPS_MINUS1", 0, 3);
pub const PPS0_ENTROPY_CODING_MODE_FLAG: FieldDescriptor =
    FieldDescriptor::reg("PPS0_ENTROPY_CODING_MODE_FLAG", 3, 1);
pub const PPS0_CONSTRAINED_INTRA_PRED_FLAG: FieldDescriptor =
    FieldDescriptor::reg("PPS0_CONSTRAINED_INTRA_PRED_FLAG", 4, 1);
pub const PPS0_TRANSFORM_8X8_MODE_FLAG: FieldDescriptor =
    FieldDescriptor::reg("PPS0_TRANSFORM_8X8_MODE_FLAG", 5, 1);
pub const PPS0_BE_WEIGHTED_BIPRED_IDC: FieldDescriptor =
    FieldDescriptor::reg("PPS0_BE_WEIGHTED_BIPRED_IDC", 6, 2);
pub const PPS0_BE_CHROMA_QP_INDEX_OFFSET: FieldDescriptor =
    FieldDescriptor::reg("PPS0_BE_CHROMA_QP_INDEX_OFFSET", 8, 5);
pub const PPS0_BE_SECOND_CHROMA_QP_INDEX_OFFSET: FieldDescriptor =
    FieldDescriptor::reg("PPS0_BE_SECOND_CHROMA_QP_INDEX_OFFSET", 16, 5);

pub const PIC0_PICSIZEINMBSLESS1: FieldDescriptor =
    FieldDescriptor::reg("PIC0_PICSIZEINMBSLESS1", 0, 14);
pub const PIC0_PICHEIGHTINMBSLESS1: FieldDescriptor =
    FieldDescriptor::reg("PIC0_PICHEIGHTINMBSLESS1", 16, 8);
pub const PIC0_BE_REFERENCE_FLAG: FieldDescriptor =
    FieldDescriptor::reg("PIC0_BE_REFERENCE_FLAG", 24, 1);
pub const PIC0_MBAFFFRAMEFLAG: FieldDescriptor = FieldDescriptor::reg("PIC0_MBAFFFRAMEFLAG", 25, 1);
pub const PIC0_FIELD_PIC_FLAG: FieldDescriptor = FieldDescriptor::reg("PIC0_FIELD_PIC_FLAG", 26, 1);
pub const PIC0_BOTTOM_FIELD_FLAG: FieldDescriptor =
    FieldDescriptor::reg("PIC0_BOTTOM_FIELD_FLAG", 27, 1);

pub const COL_NOTFRAMEFLAG: FieldDescriptor = FieldDescriptor::reg("COL_NOTFRAMEFLAG", 0, 1);
pub const COL_MBAFFFRAMEFLAG: FieldDescriptor = FieldDescriptor::reg("COL_MBAFFFRAMEFLAG", 1, 1);
pub const COL_BOTTOM_FIELD_FLAG: FieldDescriptor =
    FieldDescriptor::reg("COL_BOTTOM_FIELD_FLAG", 2, 1);

pub const SLICE0_SLICETYPE: FieldDescriptor = FieldDescriptor::reg("SLICE0_SLICETYPE", 0, 2);
pub const SLICE0_CABAC_INIT_IDC: FieldDescriptor =
    FieldDescriptor::reg("SLICE0_CABAC_INIT_IDC", 2, 2);
pub const SLICE0_SLICECOUNT: FieldDescriptor = FieldDescriptor::reg("SLICE0_SLICECOUNT", 4, 8);
pub const SLICE0_DIRECT_SPATIAL_MV_PRED_FLAG: FieldDescriptor =
    FieldDescriptor::reg("SLICE0_DIRECT_SPATIAL_MV_PRED_FLAG", 12, 1);
pub const SLICE0_DISABLE_DEBLOCKING_FILTER_IDC: FieldDescriptor =
    FieldDescriptor::reg("SLICE0_DISABLE_DEBLOCKING_FILTER_IDC", 13, 2);
pub const SLICE0_ALPHA_CO_OFFSET_DIV2: FieldDescriptor =
    FieldDescriptor::reg("SLICE0_ALPHA_CO_OFFSET_DIV2", 16, 4);
pub const SLICE0_BETA_OFFSET_DIV2: FieldDescriptor =
    FieldDescriptor::reg("SLICE0_BETA_OFFSET_DIV2", 20, 4);
pub const SLICE0_FIELD_TYPE: FieldDescriptor = FieldDescriptor::reg("SLICE0_FIELD_TYPE", 24, 2);

pub const SLICE1_FIRST_MB_IN_SLICE_X: FieldDescriptor =
    FieldDescriptor::reg("SLICE1_FIRST_MB_IN_SLICE_X", 0, 8);
pub const SLICE1_FIRST_MB_IN_SLICE_Y: FieldDescriptor =
    FieldDescriptor::reg("SLICE1_FIRST_MB_IN_SLICE_Y", 8, 8);
pub const SLICE1_SLICEQPY: FieldDescriptor = FieldDescriptor::reg("SLICE1_SLICEQPY", 16, 6);
pub const SLICE1_NUM_REF_IDX_L0_ACTIVE_MINUS1: FieldDescriptor =
    FieldDescriptor::reg("SLICE1_NUM_REF_IDX_L0_ACTIVE_MINUS1", 22, 5);
pub const SLICE1_NUM_REF_IDX_L1_ACTIVE_MINUS1: FieldDescriptor =
    FieldDescriptor::reg("SLICE1_NUM_REF_IDX_L1_ACTIVE_MINUS1", 27, 5);

pub const SLICE2_FIRST_MB_IN_SLICE: FieldDescriptor =
    FieldDescriptor::reg("SLICE2_FIRST_MB_IN_SLICE", 0, 16);

pub const REF0_LONGTERMFRAMEFLAG: FieldDescriptor =
    FieldDescriptor::reg("REF0_LONGTERMFRAMEFLAG", 0, 16);

pub const PICTURE_SIZE_WIDTH: FieldDescriptor = FieldDescriptor::reg("PICTURE_SIZE_WIDTH", 0, 12);
pub const PICTURE_SIZE_HEIGHT: FieldDescriptor = FieldDescriptor::reg("PICTURE_SIZE_HEIGHT", 12, 12);

pub const OPMODE_CODEC_MODE: FieldDescriptor = FieldDescriptor::reg("OPMODE_CODEC_MODE", 0, 4);
pub const OPMODE_CODEC_PROFILE: FieldDescriptor = FieldDescriptor::reg("OPMODE_CODEC_PROFILE", 4, 2);
pub const OPMODE_CHROMA_FORMAT: FieldDescriptor = FieldDescriptor::reg("OPMODE_CHROMA_FORMAT", 6, 1);
pub const OPMODE_ROW_STRIDE: FieldDescriptor = FieldDescriptor::reg("OPMODE_ROW_STRIDE", 8, 3);
pub const OPMODE_ASYNC_MODE: FieldDescriptor = FieldDescriptor::reg("OPMODE_ASYNC_MODE", 12, 2);
pub const OPMODE_CHROMA_INTERLEAVED: FieldDescriptor =
    FieldDescriptor::reg("OPMODE_CHROMA_INTERLEAVED", 16, 1);

/// H.264 的编解码模式编号
pub const CODEC_MODE_H264: u32 = 1;
/// 二次去块时前端与后端异步运行
pub const ASYNC_MODE_SECOND_PASS: u32 = 2;

pub const MC_CACHE_REF_OFFSET: FieldDescriptor = FieldDescriptor::reg("MC_CACHE_REF_OFFSET", 0, 10);
pub const MC_CACHE_ROW_OFFSET: FieldDescriptor = FieldDescriptor::reg("MC_CACHE_ROW_OFFSET", 16, 6);

pub const WEIGHT_DENOM_LUMA_LOG2: FieldDescriptor =
    FieldDescriptor::reg("WEIGHT_DENOM_LUMA_LOG2", 0, 3);
pub const WEIGHT_DENOM_CHROMA_LOG2: FieldDescriptor =
    FieldDescriptor::reg("WEIGHT_DENOM_CHROMA_LOG2", 4, 3);

pub const WEIGHT_Y: FieldDescriptor = FieldDescriptor::reg("WEIGHT_Y", 0, 8);
pub const WEIGHT_CB: FieldDescriptor = FieldDescriptor::reg("WEIGHT_CB", 8, 8);
pub const WEIGHT_CR: FieldDescriptor = FieldDescriptor::reg("WEIGHT_CR", 16, 8);

pub const SLICE_PARAMS_CODE_TYPE: FieldDescriptor =
    FieldDescriptor::reg("SLICE_PARAMS_CODE_TYPE", 0, 2);
pub const SLICE_PARAMS_FIELD_TYPE: FieldDescriptor =
    FieldDescriptor::reg("SLICE_PARAMS_FIELD_TYPE", 2, 2);
pub const SLICE_PARAMS_BETA_OFFSET_DIV2: FieldDescriptor =
    FieldDescriptor::reg("SLICE_PARAMS_BETA_OFFSET_DIV2", 4, 4);
pub const SLICE_PARAMS_ALPHA_CO_OFFSET_DIV2: FieldDescriptor =
    FieldDescriptor::reg("SLICE_PARAMS_ALPHA_CO_OFFSET_DIV2", 8, 4);
pub const SLICE_PARAMS_DISABLE_DEBLOCK_FILTER_IDC: FieldDescriptor =
    FieldDescriptor::reg("SLICE_PARAMS_DISABLE_DEBLOCK_FILTER_IDC", 12, 2);
pub const SLICE_PARAMS_MODE_CONFIG: FieldDescriptor =
    FieldDescriptor::reg("SLICE_PARAMS_MODE_CONFIG", 14, 3);
pub const SLICE_PARAMS_CONSTRAINED_INTRA_PRED: FieldDescriptor =
    FieldDescriptor::reg("SLICE_PARAMS_CONSTRAINED_INTRA_PRED", 17, 1);

pub const ROTATION_MODE: FieldDescriptor = FieldDescriptor::reg("ROTATION_MODE", 0, 2);
pub const ROTATION_RECON_WRITE_DISABLE: FieldDescriptor =
    FieldDescriptor::reg("ROTATION_RECON_WRITE_DISABLE", 2, 1);
pub const ROTATION_ROW_STRIDE: FieldDescriptor = FieldDescriptor::reg("ROTATION_ROW_STRIDE", 3, 3);
pub const ROTATION_ALT_PICTURE_ENABLE: FieldDescriptor =
    FieldDescriptor::reg("ROTATION_ALT_PICTURE_ENABLE", 6, 1);

pub const EXT_ROW_STRIDE: FieldDescriptor = FieldDescriptor::reg("EXT_ROW_STRIDE", 0, 10);

// 二次去块宏块命令
pub const MB_NUMBER_X: FieldDescriptor = FieldDescriptor::reg("MB_NUMBER_X", 0, 8);
pub const MB_NUMBER_Y: FieldDescriptor = FieldDescriptor::reg("MB_NUMBER_Y", 8, 8);
pub const MB_NUMBER_CODE_TYPE: FieldDescriptor = FieldDescriptor::reg("MB_NUMBER_CODE_TYPE", 16, 2);
pub const MB_NUMBER_SLICE_LHS: FieldDescriptor = FieldDescriptor::reg("MB_NUMBER_SLICE_LHS", 18, 1);
pub const MB_NUMBER_SLICE_TOP: FieldDescriptor = FieldDescriptor::reg("MB_NUMBER_SLICE_TOP", 19, 1);

pub const QUANT_LUMA: FieldDescriptor = FieldDescriptor::reg("QUANT_LUMA", 0, 6);
pub const QUANT_CB: FieldDescriptor = FieldDescriptor::reg("QUANT_CB", 8, 6);
pub const QUANT_CR: FieldDescriptor = FieldDescriptor::reg("QUANT_CR", 16, 6);

pub const BLOCK_SIZE: FieldDescriptor = FieldDescriptor::reg("BLOCK_SIZE", 0, 3);
pub const REF_INDEX_A_VALID: FieldDescriptor = FieldDescriptor::reg("REF_INDEX_A_VALID", 4, 1);
pub const REF_INDEX_A: FieldDescriptor = FieldDescriptor::reg("REF_INDEX_A", 8, 5);

pub const MV_Y: FieldDescriptor = FieldDescriptor::reg("MV_Y", 0, 16);
pub const MV_X: FieldDescriptor = FieldDescriptor::reg("MV_X", 16, 16);

pub const END_SLICE_PICTURE_PICTURE_END: FieldDescriptor =
    FieldDescriptor::reg("END_SLICE_PICTURE_PICTURE_END", 0, 1);

// ============================================================
// 辅助
// ============================================================

/// 17 位有符号截断: 符号位移到第 16 位, 保留低 16 位
pub fn sign_trunc(value: i32) -> u32 {
    let value = value as u32;
    ((value >> 15) & 0x1_0000) | (value & 0xffff)
}

/// 有符号值按字段宽度截断后的补码表示
pub fn masked(value: i32, field: &FieldDescriptor) -> u32 {
    (value as u32) & field.lsb_mask()
}

/// 宏块命令寄存器在上一行预读区中的地址
pub const fn above1(reg: u32) -> u32 {
    reg + CMDS_ABOVE1_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_trunc_keeps_sign_bit_at_16() {
        assert_eq!(sign_trunc(5), 5);
        assert_eq!(sign_trunc(-1), 0x1_ffff);
        assert_eq!(sign_trunc(-2), 0x1_fffe);
        assert_eq!(sign_trunc(0x1_2345), 0x2345, "超出 16 位的正值只保留低位");
    }

    #[test]
    fn test_rendec_targets_fit_word_index() {
        for dest in [
            ENTDEC_BE_CONTROL,
            H264_BE_SPS0,
            H264_BE_FOC_CUR_TOP,
            H264_BE_COL_PIC0,
            H264_BE_LIST0,
            H264_BE_IQ_RAM,
            CMDS_REFERENCE_PICTURE_BASE_ADDRESSES,
            CMDS_H264_WEIGHTED_FACTORS_B,
            above1(CMDS_MOTION_VECTOR),
        ] {
            assert!(dest >> 2 < 0x1000, "rendec 目标 {dest:#x} 超出字索引范围");
        }
    }

    #[test]
    fn test_masked_negative_offset() {
        assert_eq!(masked(-2, &SLICE0_ALPHA_CO_OFFSET_DIV2), 0xe);
        assert_eq!(masked(-12, &PPS0_BE_CHROMA_QP_INDEX_OFFSET), 0x14);
    }
}
