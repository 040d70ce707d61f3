//! 重定位记录.
//!
//! 构建阶段用地址提示立即修补命令字 (乐观), 同时记录足够的信息, 使提交时设备驱动
//! 可以用真实地址重新计算同一个字 (权威).

use byteorder::{ByteOrder, LittleEndian};

/// 地址未知时写入的占位值
pub const RELOC_UNRESOLVED: u32 = 0x6767_6767;

/// 重定位操作: 写入偏移地址
pub const RELOC_OP_OFFSET: u32 = 0;

/// 编码后每条记录的字数
pub const RELOC_RECORD_WORDS: usize = 8;
/// 编码后每条记录的字节数
pub const RELOC_RECORD_BYTES: usize = RELOC_RECORD_WORDS * 4;

/// 被修补字所在的区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RelocDest {
    /// 固件消息区 (与重定位记录同属一个设备对象)
    Message = 0,
    /// 命令字区与链式 DMA 描述符区
    Command = 1,
    /// 二次去块暂存区
    Staging = 2,
}

impl RelocDest {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            1 => Some(Self::Command),
            2 => Some(Self::Staging),
            _ => None,
        }
    }
}

/// 地址如何写入目标字
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocMode {
    pub mask: u32,
    pub shift: u32,
    pub background: u32,
}

impl RelocMode {
    /// 完整 32 位地址
    pub const FULL: RelocMode = RelocMode {
        mask: 0xffff_ffff,
        shift: 0,
        background: 0,
    };

    /// 16 字节对齐地址, 右移 4 位写入低 28 位
    pub const SHIFT4: RelocMode = RelocMode {
        mask: 0x0fff_ffff,
        shift: 4,
        background: 0,
    };

    /// 在已有背景位上叠加
    pub const fn with_background(self, background: u32) -> Self {
        Self {
            mask: self.mask,
            shift: self.shift,
            background,
        }
    }
}

/// 根据设备地址计算修补后的字
pub fn patch_value(address: u64, offset: u32, mode: RelocMode) -> u32 {
    let target = (address.wrapping_add(u64::from(offset)) as u32) >> mode.shift;
    (target & mode.mask) | (mode.background & !mode.mask)
}

/// 单条重定位记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationRecord {
    /// 目标区域
    pub dest: RelocDest,
    /// 目标字在所属设备对象内的字偏移
    pub word_offset: u32,
    /// 引用表索引
    pub buffer: u32,
    pub mask: u32,
    pub shift: u32,
    /// 地址附加的字节偏移
    pub pre_add: u32,
    pub background: u32,
}

impl RelocationRecord {
    pub fn mode(&self) -> RelocMode {
        RelocMode {
            mask: self.mask,
            shift: self.shift,
            background: self.background,
        }
    }

    /// 用真实地址重新计算目标字
    pub fn resolve(&self, address: u64) -> u32 {
        patch_value(address, self.pre_add, self.mode())
    }

    pub fn encode(&self) -> [u32; RELOC_RECORD_WORDS] {
        [
            RELOC_OP_OFFSET,
            self.word_offset,
            self.buffer,
            self.mask,
            self.shift,
            self.pre_add,
            self.background,
            self.dest as u32,
        ]
    }

    pub fn decode(words: &[u32; RELOC_RECORD_WORDS]) -> Option<Self> {
        if words[0] != RELOC_OP_OFFSET {
            return None;
        }
        Some(Self {
            word_offset: words[1],
            buffer: words[2],
            mask: words[3],
            shift: words[4],
            pre_add: words[5],
            background: words[6],
            dest: RelocDest::from_u32(words[7])?,
        })
    }
}

/// 解析重定位区的字节内容
pub fn decode_records(bytes: &[u8]) -> Vec<RelocationRecord> {
    bytes
        .chunks_exact(RELOC_RECORD_BYTES)
        .filter_map(|chunk| {
            let mut words = [0u32; RELOC_RECORD_WORDS];
            LittleEndian::read_u32_into(chunk, &mut words);
            RelocationRecord::decode(&words)
        })
        .collect()
}
