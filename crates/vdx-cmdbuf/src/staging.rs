//! 二次去块暂存区写入.
//!
//! 暂存区首字记录后续字数 (不含首字), 其后是暂存命令流:
//! `0x1000_0000 | addr` + 值 (写寄存器), `0x2000_0000 | addr` (读寄存器),
//! `0x3000_0000 | addr` + n (轮询直到命令空间容纳 n 条命令),
//! `0x4000_0000 | addr` (轮询直到命令空间容纳后续全部命令).

use log::debug;
use vdx_core::VdxResult;

use crate::buffer::BufferObject;
use crate::cmdbuf::{CommandBuffer, WordSlot};
use crate::command::{STAGING_POLL_N, STAGING_POLL_X, STAGING_REG_GET, STAGING_REG_SET};
use crate::reloc::{RELOC_UNRESOLVED, RelocMode};

const STAGING_ADDR_MASK: u32 = 0x0fff_ffff;

impl CommandBuffer {
    /// 映射暂存区并引用其对象, 预留首字
    pub fn begin_second_pass(&mut self) -> VdxResult<()> {
        assert!(!self.regio.is_mapped(), "二次去块暂存区已打开");
        self.regio.rewind();
        self.regio.map();
        let regio_buf = self.staging_object().clone();
        self.refs.reference(&regio_buf)?;
        self.regio.push_word(0)?;
        Ok(())
    }

    /// 回填首字并解除暂存区映射, 返回暂存命令字数
    pub fn end_second_pass(&mut self) -> u32 {
        assert!(self.regio.is_mapped(), "二次去块暂存区未打开");
        let words = (self.regio.cursor() / 4 - 1) as u32;
        self.regio.set_word(0, words);
        self.regio.unmap();
        debug!("二次去块: 暂存命令 {} 字", words);
        words
    }

    /// 暂存区是否处于写入中
    pub fn in_second_pass(&self) -> bool {
        self.regio.is_mapped()
    }

    pub fn staging_set(&mut self, reg: u32, value: u32) -> VdxResult<()> {
        self.regio.ensure(8)?;
        self.regio.push_word(STAGING_REG_SET | (reg & STAGING_ADDR_MASK))?;
        self.regio.push_word(value)?;
        Ok(())
    }

    /// 写寄存器地址值 (重定位到暂存区)
    pub fn staging_set_address(
        &mut self,
        reg: u32,
        object: &BufferObject,
        offset: u32,
    ) -> VdxResult<()> {
        self.regio.ensure(8)?;
        self.regio.push_word(STAGING_REG_SET | (reg & STAGING_ADDR_MASK))?;
        let pos = self.regio.push_word(RELOC_UNRESOLVED)?;
        self.add_relocation(WordSlot::Staging(pos), object, offset, RelocMode::FULL)
    }

    pub fn staging_get(&mut self, reg: u32) -> VdxResult<()> {
        self.regio.push_word(STAGING_REG_GET | (reg & STAGING_ADDR_MASK))?;
        Ok(())
    }

    /// 轮询 reg 直到其值不小于 count
    pub fn staging_poll_n(&mut self, reg: u32, count: u32) -> VdxResult<()> {
        self.regio.ensure(8)?;
        self.regio
            .push_words(&[STAGING_POLL_N | (reg & STAGING_ADDR_MASK), count])?;
        Ok(())
    }

    /// 轮询 reg, 等待数由固件按剩余命令计算
    pub fn staging_poll_x(&mut self, reg: u32) -> VdxResult<()> {
        self.regio.push_word(STAGING_POLL_X | (reg & STAGING_ADDR_MASK))?;
        Ok(())
    }

    /// 暂存区已写入的字 (含首字)
    pub fn staging_words(&self) -> Vec<u32> {
        self.regio.words(0, self.regio.cursor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DeviceHandle, Placement};
    use crate::device::MemoryDevice;
    use crate::region::RegionSizes;
    use crate::reloc::RelocDest;

    #[test]
    fn test_second_pass_size_word_and_relocation() {
        let device = MemoryDevice::new();
        let mut cmdbuf =
            CommandBuffer::create(&device, RegionSizes::for_picture(64, 64)).expect("创建失败");
        cmdbuf.reset().expect("复位失败");
        let target = BufferObject::new(DeviceHandle(77), 0x2000, Placement::VPU_ONLY);

        cmdbuf.begin_second_pass().expect("打开失败");
        assert_eq!(cmdbuf.references().len(), 3, "暂存对象应被引用");
        cmdbuf.staging_poll_n(0x0664, 4).expect("写入失败");
        cmdbuf.staging_set_address(0x0a10, &target, 0x800).expect("写入失败");
        cmdbuf.staging_set(0x0a20, 0x0003_0003).expect("写入失败");
        cmdbuf.staging_poll_x(0x0664).expect("写入失败");
        assert_eq!(cmdbuf.end_second_pass(), 7);

        let words = cmdbuf.staging_words();
        assert_eq!(words[0], 7);
        assert_eq!(&words[1..3], &[0x3000_0664, 4]);
        assert_eq!(words[3], 0x1000_0a10);
        assert_eq!(words[4], RELOC_UNRESOLVED);
        assert_eq!(words[7], 0x4000_0664);
        let record = cmdbuf.relocation_records()[0];
        assert_eq!(record.dest, RelocDest::Staging);
        assert_eq!(record.word_offset, 4);
        assert!(!cmdbuf.in_second_pass());
    }

    #[test]
    fn test_staging_overflow_is_typed_error() {
        let device = MemoryDevice::new();
        let mut sizes = RegionSizes::for_picture(16, 16);
        sizes.regio = 8;
        let mut cmdbuf = CommandBuffer::create(&device, sizes).expect("创建失败");
        cmdbuf.reset().expect("复位失败");
        cmdbuf.begin_second_pass().expect("打开失败");
        let err = cmdbuf.staging_set(0x10, 1).expect_err("应当溢出");
        assert!(matches!(err, vdx_core::VdxError::WouldOverflow { region: "regio", .. }));
    }
}
