//! 命令流二进制编码.
//!
//! 每个命令字的高 4 位是命令标签, 其余字段由 [`FieldDescriptor`] 描述,
//! 头部字的打包与解包成对提供.

use bitflags::bitflags;
use vdx_core::field::{FieldDescriptor, pack_fields, read_field};

// ============================================================
// 命令标签
// ============================================================

/// 标签字段 (最高 4 位)
pub const CMD_TAG: FieldDescriptor = FieldDescriptor::reg("CMD_TAG", 28, 4);

pub const CMD_NOP: u32 = 0x0;
pub const CMD_REGVALPAIR_WRITE: u32 = 0x1;
pub const CMD_RENDEC_BLOCK: u32 = 0x5;
pub const CMD_COMPLETION: u32 = 0x6;
pub const CMD_CONDITIONAL_SKIP: u32 = 0x8;
pub const CMD_CTRL_ALLOC_HEADER: u32 = 0x9;
pub const CMD_BITSTREAM_DMA: u32 = 0xa;
pub const CMD_SR_SETUP: u32 = 0xb;
pub const CMD_DMA: u32 = 0xe;

/// 命令字的标签
pub fn command_tag(word: u32) -> u32 {
    read_field(word, &CMD_TAG)
}

/// 完成标记 (kick)
pub const COMPLETION_WORD: u32 = CMD_COMPLETION << 28;

// ============================================================
// 寄存器写对块
// ============================================================

pub const REGPAIR_ADDR: FieldDescriptor = FieldDescriptor::reg("REGPAIR_ADDR", 0, 16);
pub const REGPAIR_COUNT: FieldDescriptor = FieldDescriptor::reg("REGPAIR_COUNT", 16, 8);
pub const REGPAIR_FLAGS: FieldDescriptor = FieldDescriptor::reg("REGPAIR_FLAGS", 24, 4);

/// 单个块头可合并的最大寄存器数
pub const REGPAIR_MAX_COUNT: u32 = 0xff;

bitflags! {
    /// 寄存器块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegBlockFlags: u32 {
        /// 宏块层寄存器
        const MB_LAYER = 1 << 0;
        /// 高层寄存器
        const HL_LAYER = 1 << 1;
        /// 预载上下文
        const PRELOAD = 1 << 2;
    }
}

/// 寄存器写对块头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegPairHeader {
    pub flags: RegBlockFlags,
    pub count: u32,
    pub reg: u32,
}

impl RegPairHeader {
    pub fn pack(&self) -> u32 {
        pack_fields(&[
            (&CMD_TAG, CMD_REGVALPAIR_WRITE),
            (&REGPAIR_FLAGS, self.flags.bits()),
            (&REGPAIR_COUNT, self.count),
            (&REGPAIR_ADDR, self.reg),
        ])
    }

    pub fn unpack(word: u32) -> Option<Self> {
        if command_tag(word) != CMD_REGVALPAIR_WRITE {
            return None;
        }
        Some(Self {
            flags: RegBlockFlags::from_bits_truncate(read_field(word, &REGPAIR_FLAGS)),
            count: read_field(word, &REGPAIR_COUNT),
            reg: read_field(word, &REGPAIR_ADDR),
        })
    }
}

// ============================================================
// Rendec 块
// ============================================================

pub const RENDEC_DEST: FieldDescriptor = FieldDescriptor::reg("RENDEC_DEST", 0, 14);
/// 块内数据字数 (块总字数减一, 不含块头)
pub const RENDEC_COUNT: FieldDescriptor = FieldDescriptor::reg("RENDEC_COUNT", 16, 8);

/// 单个 rendec 块最多容纳的数据字
pub const RENDEC_MAX_WORDS: u32 = 0xff;

/// Rendec 块头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendecHeader {
    /// 目标地址 (字节, 字对齐)
    pub dest: u32,
    /// 数据字数 (不含块头)
    pub words: u32,
}

impl RendecHeader {
    pub fn pack(&self) -> u32 {
        pack_fields(&[
            (&CMD_TAG, CMD_RENDEC_BLOCK),
            (&RENDEC_COUNT, self.words),
            (&RENDEC_DEST, self.dest),
        ])
    }

    pub fn unpack(word: u32) -> Option<Self> {
        if command_tag(word) != CMD_RENDEC_BLOCK {
            return None;
        }
        Some(Self {
            dest: read_field(word, &RENDEC_DEST),
            words: read_field(word, &RENDEC_COUNT),
        })
    }
}

// ============================================================
// 条件跳过块
// ============================================================

pub const SKIP_LENGTH: FieldDescriptor = FieldDescriptor::reg("SKIP_LENGTH", 0, 20);
pub const SKIP_CONDITION: FieldDescriptor = FieldDescriptor::reg("SKIP_CONDITION", 20, 8);

/// 硬件上下文未切换时跳过
pub const SKIP_ON_CONTEXT_SWITCH: u32 = 1;

/// 条件跳过块头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipHeader {
    pub condition: u32,
    /// 块体字数
    pub body_words: u32,
}

impl SkipHeader {
    pub fn pack(&self) -> u32 {
        pack_fields(&[
            (&CMD_TAG, CMD_CONDITIONAL_SKIP),
            (&SKIP_CONDITION, self.condition),
            (&SKIP_LENGTH, self.body_words),
        ])
    }

    pub fn unpack(word: u32) -> Option<Self> {
        if command_tag(word) != CMD_CONDITIONAL_SKIP {
            return None;
        }
        Some(Self {
            condition: read_field(word, &SKIP_CONDITION),
            body_words: read_field(word, &SKIP_LENGTH),
        })
    }
}

// ============================================================
// DMA 命令
// ============================================================

pub const DMA_SIZE: FieldDescriptor = FieldDescriptor::reg("DMA_SIZE", 0, 16);
pub const DMA_OFFSET_FLAG: FieldDescriptor = FieldDescriptor::reg("DMA_OFFSET_FLAG", 19, 1);
pub const DMA_TYPE: FieldDescriptor = FieldDescriptor::reg("DMA_TYPE", 24, 4);

/// DMA 传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DmaType {
    VlcTable = 0,
    Residual = 1,
    Bitstream = 2,
    RenderBufferMc = 3,
    RenderBufferVld = 4,
    Mpeg4FeSave = 5,
    Mpeg4FeRestore = 6,
    PreloadSave = 7,
    PreloadRestore = 8,
    MemSet = 9,
}

impl DmaType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::VlcTable,
            1 => Self::Residual,
            2 => Self::Bitstream,
            3 => Self::RenderBufferMc,
            4 => Self::RenderBufferVld,
            5 => Self::Mpeg4FeSave,
            6 => Self::Mpeg4FeRestore,
            7 => Self::PreloadSave,
            8 => Self::PreloadRestore,
            9 => Self::MemSet,
            _ => return None,
        })
    }
}

/// DMA 命令头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaHeader {
    pub dma_type: DmaType,
    pub size: u32,
    /// 后随一个目标偏移字
    pub has_offset: bool,
}

impl DmaHeader {
    pub fn pack(&self) -> u32 {
        pack_fields(&[
            (&CMD_TAG, CMD_DMA),
            (&DMA_TYPE, self.dma_type as u32),
            (&DMA_OFFSET_FLAG, u32::from(self.has_offset)),
            (&DMA_SIZE, self.size),
        ])
    }

    pub fn unpack(word: u32) -> Option<Self> {
        if command_tag(word) != CMD_DMA {
            return None;
        }
        Some(Self {
            dma_type: DmaType::from_u32(read_field(word, &DMA_TYPE))?,
            size: read_field(word, &DMA_SIZE),
            has_offset: read_field(word, &DMA_OFFSET_FLAG) != 0,
        })
    }
}

bitflags! {
    /// 码流读取器 (shift register) 设置标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SrFlags: u32 {
        /// 去除防竞争字节
        const ENABLE_RBDU_EXTRACTION = 1 << 0;
        /// 校验起始码
        const VERIFY_STARTCODE = 1 << 2;
        /// 使用解析密钥
        const BITSTR_PARSE_KEY = 1 << 4;
    }
}

/// 码流 DMA 长度字段
pub const BITSTREAM_SIZE: FieldDescriptor = FieldDescriptor::reg("BITSTREAM_SIZE", 0, 28);

// ============================================================
// 控制分配头
// ============================================================

/// 每个 slice 的控制分配头在命令区中占用的字数
pub const CTRL_ALLOC_HEADER_WORDS: usize = 8;

/// 控制分配头内各字的位置
pub mod ctrl_alloc {
    /// 命令字
    pub const CMD: usize = 0;
    /// 外部状态缓冲区地址
    pub const EXTERN_STATE: usize = 1;
    /// 宏块参数地址 (仅错误隐藏使用)
    pub const MB_PARAM: usize = 2;
    /// slice 参数字
    pub const SLICE_PARAMS: usize = 3;
    /// 首宏块 / 末宏块
    pub const SLICE_FIRST_PIC_LAST: usize = 4;
    /// 备用输出亮度 / 色度地址
    pub const ALT_OUTPUT_ADDR0: usize = 5;
    pub const ALT_OUTPUT_ADDR1: usize = 6;
    /// 备用输出标志
    pub const ALT_OUTPUT_FLAGS: usize = 7;
}

// ============================================================
// 二次去块暂存命令
// ============================================================

pub const STAGING_REG_SET: u32 = 0x1000_0000;
pub const STAGING_REG_GET: u32 = 0x2000_0000;
pub const STAGING_POLL_N: u32 = 0x3000_0000;
pub const STAGING_POLL_X: u32 = 0x4000_0000;
