//! 命令缓冲区内存区域.
//!
//! 每个区域是一块定长字节 arena, 带写游标和余量阈值. 写入前检查剩余容量,
//! 空间不足时返回 [`VdxError::WouldOverflow`], 而不是依赖指针比较断言.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Bytes, BytesMut};
use vdx_core::{VdxError, VdxResult};

/// 命令字区域大小
pub const CMD_SIZE: usize = 0x3000;
/// 链式 DMA 描述符区域大小
pub const LLDMA_SIZE: usize = 0x2000;
/// 固件消息区域大小
pub const MTXMSG_SIZE: usize = 0x1000;
/// 重定位记录区域大小
pub const RELOC_SIZE: usize = 0x3000;

/// 命令字区域余量
pub const CMD_MARGIN: usize = 0x400;
/// 链式 DMA 描述符区域余量
pub const LLDMA_MARGIN: usize = 0x400;
/// 固件消息区域余量
pub const MTXMSG_MARGIN: usize = 0x40;
/// 重定位记录区域余量
pub const RELOC_MARGIN: usize = 0x800;

/// 每个宏块在二次去块暂存区中预留的字节数
pub const REGIO_BYTES_PER_MB: usize = 172;

/// 二次去块暂存区大小 (按宏块数计算, 至少一个字)
pub fn regio_size(width: u32, height: u32) -> usize {
    let mbs = (width as usize >> 4) * (height as usize >> 4);
    (mbs * REGIO_BYTES_PER_MB).max(4)
}

/// 区域尺寸配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSizes {
    pub cmd: usize,
    pub lldma: usize,
    pub msg: usize,
    pub reloc: usize,
    pub regio: usize,
}

impl RegionSizes {
    /// 默认尺寸, 暂存区按图像尺寸计算
    pub fn for_picture(width: u32, height: u32) -> Self {
        Self {
            cmd: CMD_SIZE,
            lldma: LLDMA_SIZE,
            msg: MTXMSG_SIZE,
            reloc: RELOC_SIZE,
            regio: regio_size(width, height),
        }
    }
}

/// 单个字节区域
#[derive(Debug)]
pub struct Region {
    name: &'static str,
    data: BytesMut,
    /// 区域在所属设备对象内的字节偏移
    base: usize,
    cursor: usize,
    margin: usize,
    mapped: bool,
}

impl Region {
    pub fn new(name: &'static str, size: usize, base: usize, margin: usize) -> Self {
        Self {
            name,
            data: BytesMut::zeroed(size),
            base,
            cursor: 0,
            margin,
            mapped: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// 当前写游标 (字节)
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn margin(&self) -> usize {
        self.margin
    }

    /// 剩余空间是否已低于余量阈值
    pub fn below_margin(&self) -> bool {
        self.remaining() < self.margin
    }

    /// 区域在所属设备对象内的字节偏移
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub(crate) fn map(&mut self) {
        self.mapped = true;
    }

    pub(crate) fn unmap(&mut self) {
        self.mapped = false;
    }

    /// 游标归零并清空已写内容
    pub(crate) fn rewind(&mut self) {
        self.data[..self.cursor].fill(0);
        self.cursor = 0;
    }

    /// 检查能否再写入 bytes 字节
    pub fn ensure(&self, bytes: usize) -> VdxResult<()> {
        if bytes > self.remaining() {
            return Err(VdxError::WouldOverflow {
                region: self.name,
                requested: bytes,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    /// 预留 bytes 字节 (清零), 返回起始偏移
    pub fn reserve(&mut self, bytes: usize) -> VdxResult<usize> {
        assert!(self.mapped, "区域 {} 未映射", self.name);
        self.ensure(bytes)?;
        let pos = self.cursor;
        self.data[pos..pos + bytes].fill(0);
        self.cursor += bytes;
        Ok(pos)
    }

    /// 追加一个字, 返回其偏移
    pub fn push_word(&mut self, word: u32) -> VdxResult<usize> {
        let pos = self.reserve(4)?;
        LittleEndian::write_u32(&mut self.data[pos..pos + 4], word);
        Ok(pos)
    }

    /// 追加多个字, 返回首字偏移
    pub fn push_words(&mut self, words: &[u32]) -> VdxResult<usize> {
        let pos = self.reserve(words.len() * 4)?;
        LittleEndian::write_u32_into(words, &mut self.data[pos..pos + words.len() * 4]);
        Ok(pos)
    }

    /// 读取已写入范围内的字
    pub fn word_at(&self, pos: usize) -> u32 {
        assert!(pos % 4 == 0 && pos + 4 <= self.cursor, "区域 {} 读越界: {:#x}", self.name, pos);
        LittleEndian::read_u32(&self.data[pos..pos + 4])
    }

    /// 改写已写入范围内的字
    pub fn set_word(&mut self, pos: usize, word: u32) {
        assert!(
            pos % 4 == 0 && pos + 4 <= self.cursor,
            "区域 {} 写越界: {:#x}",
            self.name,
            pos
        );
        LittleEndian::write_u32(&mut self.data[pos..pos + 4], word);
    }

    /// 偏移是否落在区域范围内
    pub fn contains(&self, pos: usize) -> bool {
        pos < self.data.len()
    }

    /// 已写入的字节
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.cursor]
    }

    /// 已写入范围 [start, end) 的字
    pub fn words(&self, start: usize, end: usize) -> Vec<u32> {
        let mut out = vec![0u32; (end - start) / 4];
        LittleEndian::read_u32_into(&self.data[start..end], &mut out);
        out
    }

    /// 已写入内容的只读快照
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}
