//! 寄存器块、rendec 块与条件跳过块构建.
//!
//! 三种块都有显式的打开 / 关闭状态. 重复打开同类块、在没有打开的块时关闭,
//! 或在寄存器 / rendec 块内打开跳过块, 都属于调用方违约, 以断言报告.

use vdx_core::VdxResult;
use vdx_core::field::{read_field, write_field};

use crate::buffer::BufferObject;
use crate::cmdbuf::{CommandBuffer, WordSlot};
use crate::command::{
    REGPAIR_COUNT, REGPAIR_MAX_COUNT, RENDEC_MAX_WORDS, RegBlockFlags, RegPairHeader,
    RendecHeader, SkipHeader,
};
use crate::reloc::{RELOC_UNRESOLVED, RelocMode};

/// 构建中的块状态
#[derive(Debug, Default)]
pub(crate) struct BlockState {
    reg: Option<RegBlock>,
    /// 打开的 rendec 块头偏移
    rendec: Option<usize>,
    skip: Option<SkipBlock>,
}

#[derive(Debug)]
struct RegBlock {
    flags: RegBlockFlags,
    /// 当前写对头偏移 (尚未写任何寄存器时为空)
    header: Option<usize>,
    /// 可合并进当前头的下一个寄存器地址
    next_reg: u32,
}

#[derive(Debug)]
struct SkipBlock {
    header: usize,
    condition: u32,
}

impl BlockState {
    pub(crate) fn any_open(&self) -> bool {
        self.reg.is_some() || self.rendec.is_some() || self.skip.is_some()
    }
}

impl CommandBuffer {
    // ============================================================
    // 寄存器写对块
    // ============================================================

    /// 打开寄存器块
    pub fn reg_start_block(&mut self, flags: RegBlockFlags) {
        assert!(self.blocks.reg.is_none(), "寄存器块已打开");
        self.blocks.reg = Some(RegBlock {
            flags,
            header: None,
            next_reg: 0,
        });
    }

    /// 为下一次写入定位块头: 与上一个寄存器连续时合并计数, 否则新建块头
    fn reg_prepare(&mut self, reg: u32) -> VdxResult<()> {
        let (flags, header, next_reg) = {
            let block = self.blocks.reg.as_ref().expect("寄存器块未打开");
            (block.flags, block.header, block.next_reg)
        };
        self.cmd.ensure(8)?;
        if let Some(pos) = header {
            let mut word = self.cmd.word_at(pos);
            let count = read_field(word, &REGPAIR_COUNT);
            if reg == next_reg && count < REGPAIR_MAX_COUNT {
                write_field(&mut word, &REGPAIR_COUNT, count + 1);
                self.cmd.set_word(pos, word);
                return Ok(());
            }
        }
        let pos = self.cmd.push_word(
            RegPairHeader {
                flags,
                count: 1,
                reg,
            }
            .pack(),
        )?;
        if let Some(block) = self.blocks.reg.as_mut() {
            block.header = Some(pos);
        }
        Ok(())
    }

    fn reg_advance(&mut self, reg: u32) {
        if let Some(block) = self.blocks.reg.as_mut() {
            block.next_reg = reg.wrapping_add(4);
        }
    }

    /// 写一个寄存器值
    pub fn reg_set(&mut self, reg: u32, value: u32) -> VdxResult<()> {
        self.reg_prepare(reg)?;
        self.cmd.push_word(value)?;
        self.reg_advance(reg);
        Ok(())
    }

    /// 写一个寄存器地址值 (重定位)
    pub fn reg_set_address(
        &mut self,
        reg: u32,
        object: &BufferObject,
        offset: u32,
    ) -> VdxResult<()> {
        self.reg_prepare(reg)?;
        let pos = self.cmd.push_word(RELOC_UNRESOLVED)?;
        self.add_relocation(WordSlot::Command(pos), object, offset, RelocMode::FULL)?;
        self.reg_advance(reg);
        Ok(())
    }

    /// 关闭寄存器块
    pub fn reg_end_block(&mut self) {
        assert!(self.blocks.reg.is_some(), "没有打开的寄存器块");
        self.blocks.reg = None;
    }

    // ============================================================
    // Rendec 块
    // ============================================================

    /// 打开 rendec 块, dest 为目标字节地址
    pub fn rendec_start(&mut self, dest: u32) -> VdxResult<()> {
        assert!(self.blocks.rendec.is_none(), "rendec 块已打开");
        assert!(((dest >> 2) & !0xfff) == 0, "rendec 目标地址 {dest:#x} 超出 12 位字索引");
        let pos = self.cmd.push_word(RendecHeader { dest, words: 0 }.pack())?;
        self.blocks.rendec = Some(pos);
        Ok(())
    }

    pub fn rendec_write(&mut self, value: u32) -> VdxResult<()> {
        assert!(self.blocks.rendec.is_some(), "没有打开的 rendec 块");
        self.cmd.push_word(value)?;
        Ok(())
    }

    /// 写一个地址字 (重定位)
    pub fn rendec_write_address(&mut self, object: &BufferObject, offset: u32) -> VdxResult<()> {
        assert!(self.blocks.rendec.is_some(), "没有打开的 rendec 块");
        let pos = self.cmd.push_word(RELOC_UNRESOLVED)?;
        self.add_relocation(WordSlot::Command(pos), object, offset, RelocMode::FULL)
    }

    /// 以小端字写入字节块, 末尾不足一个字的部分补零
    pub fn rendec_write_block(&mut self, block: &[u8]) -> VdxResult<()> {
        for chunk in block.chunks(4) {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            self.rendec_write(u32::from_le_bytes(bytes))?;
        }
        Ok(())
    }

    /// 关闭 rendec 块, 回填数据字数
    pub fn rendec_end(&mut self) {
        let pos = self.blocks.rendec.take().expect("没有打开的 rendec 块");
        let words = ((self.cmd.cursor() - pos) / 4 - 1) as u32;
        assert!(words <= RENDEC_MAX_WORDS, "rendec 块过大: {words} 字");
        let header = RendecHeader::unpack(self.cmd.word_at(pos)).expect("rendec 块头损坏");
        self.cmd.set_word(
            pos,
            RendecHeader {
                dest: header.dest,
                words,
            }
            .pack(),
        );
    }

    // ============================================================
    // 条件跳过块
    // ============================================================

    /// 打开条件跳过块, 预留块头
    pub fn skip_start_block(&mut self, condition: u32) -> VdxResult<()> {
        assert!(self.blocks.rendec.is_none(), "rendec 块内不能打开跳过块");
        assert!(self.blocks.reg.is_none(), "寄存器块内不能打开跳过块");
        assert!(self.blocks.skip.is_none(), "跳过块不能嵌套");
        let header = self.cmd.push_word(0)?;
        self.blocks.skip = Some(SkipBlock { header, condition });
        Ok(())
    }

    /// 关闭条件跳过块, 回填块体长度
    pub fn skip_end_block(&mut self) {
        assert!(self.blocks.rendec.is_none(), "rendec 块必须先关闭");
        assert!(self.blocks.reg.is_none(), "寄存器块必须先关闭");
        let block = self.blocks.skip.take().expect("没有打开的跳过块");
        let body_words = ((self.cmd.cursor() - block.header) / 4 - 1) as u32;
        self.cmd.set_word(
            block.header,
            SkipHeader {
                condition: block.condition,
                body_words,
            }
            .pack(),
        );
    }
}
