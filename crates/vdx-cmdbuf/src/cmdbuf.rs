//! 命令缓冲区.
//!
//! 一个 [`CommandBuffer`] 由三个设备对象承载五个区域:
//! - 命令对象: 命令字区 (偏移 0) + 链式 DMA 描述符区 (紧随其后)
//! - 消息对象: 固件消息区 (偏移 0) + 重定位记录区 (紧随其后)
//! - 暂存对象: 二次去块暂存区
//!
//! 生命周期: `Empty → Building` (reset) `→ Queued` (写入首条消息)
//! `→ Submitted` (flush) `→ Empty` (对账完成).

use log::{debug, trace};
use vdx_core::{VdxError, VdxResult};

use crate::buffer::{BufferObject, BufferStatus, Placement};
use crate::builder::BlockState;
use crate::device::Device;
use crate::message::MessageCounts;
use crate::reference::ReferenceTable;
use crate::region::{
    CMD_MARGIN, LLDMA_MARGIN, MTXMSG_MARGIN, RELOC_MARGIN, Region, RegionSizes,
};
use crate::reloc::{
    RELOC_RECORD_BYTES, RELOC_UNRESOLVED, RelocDest, RelocMode, RelocationRecord, patch_value,
};

/// 命令缓冲区状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdbufState {
    /// 未映射, 可被重新获取
    Empty,
    /// 已映射, 尚无消息
    Building,
    /// 至少有一条待提交消息
    Queued,
    /// 已交给设备, 等待对账
    Submitted,
}

/// 重定位目标字的位置 (区域内字节偏移)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSlot {
    Command(usize),
    Lldma(usize),
    Message(usize),
    Staging(usize),
}

/// 命令缓冲区
#[derive(Debug)]
pub struct CommandBuffer {
    cmd_buf: BufferObject,
    reloc_buf: BufferObject,
    regio_buf: BufferObject,
    pub(crate) cmd: Region,
    pub(crate) lldma: Region,
    pub(crate) msg: Region,
    pub(crate) reloc: Region,
    pub(crate) regio: Region,
    /// 当前命令段的起始偏移
    pub(crate) cmd_start: usize,
    pub(crate) refs: ReferenceTable,
    pub(crate) counts: MessageCounts,
    pub(crate) blocks: BlockState,
    /// 最近一次码流 DMA 的长度字位置
    pub(crate) bitstream_size_pos: Option<usize>,
    pub(crate) state: CmdbufState,
}

impl CommandBuffer {
    /// 分配三个设备对象与全部区域
    pub fn create(device: &dyn Device, sizes: RegionSizes) -> VdxResult<Self> {
        let placement = Placement::CPU_MAPPABLE | Placement::COMMAND;
        let cmd_buf = device.create_buffer(object_size(sizes.cmd + sizes.lldma)?, placement)?;
        let reloc_buf = match device.create_buffer(object_size(sizes.msg + sizes.reloc)?, placement) {
            Ok(buf) => buf,
            Err(err) => {
                device.destroy_buffer(&cmd_buf);
                return Err(err);
            }
        };
        let regio_buf = match device.create_buffer(object_size(sizes.regio)?, placement) {
            Ok(buf) => buf,
            Err(err) => {
                device.destroy_buffer(&cmd_buf);
                device.destroy_buffer(&reloc_buf);
                return Err(err);
            }
        };
        debug!(
            "命令缓冲区: 创建 cmd={} msg={} regio={} (regio {} 字节)",
            cmd_buf.handle(),
            reloc_buf.handle(),
            regio_buf.handle(),
            sizes.regio
        );

        Ok(Self {
            cmd: Region::new("cmd", sizes.cmd, 0, CMD_MARGIN),
            lldma: Region::new("lldma", sizes.lldma, sizes.cmd, LLDMA_MARGIN),
            msg: Region::new("msg", sizes.msg, 0, MTXMSG_MARGIN),
            reloc: Region::new("reloc", sizes.reloc, sizes.msg, RELOC_MARGIN),
            regio: Region::new("regio", sizes.regio, 0, 0),
            cmd_buf,
            reloc_buf,
            regio_buf,
            cmd_start: 0,
            refs: ReferenceTable::new(),
            counts: MessageCounts::default(),
            blocks: BlockState::default(),
            bitstream_size_pos: None,
            state: CmdbufState::Empty,
        })
    }

    /// 释放设备对象
    pub fn destroy(&self, device: &dyn Device) {
        for object in [&self.cmd_buf, &self.reloc_buf, &self.regio_buf] {
            device.destroy_buffer(object);
        }
    }

    /// 复位游标与计数并映射区域
    ///
    /// 引用表以消息对象 (索引 0) 和命令对象 (索引 1) 开头.
    pub fn reset(&mut self) -> VdxResult<()> {
        for object in [&self.cmd_buf, &self.reloc_buf] {
            if matches!(
                object.status(),
                BufferStatus::Abandoned | BufferStatus::Destroyed
            ) {
                return Err(VdxError::MapFailed(format!("{} 已释放", object.handle())));
            }
        }

        for region in [
            &mut self.cmd,
            &mut self.lldma,
            &mut self.msg,
            &mut self.reloc,
            &mut self.regio,
        ] {
            region.rewind();
            region.unmap();
        }
        self.cmd.map();
        self.lldma.map();
        self.msg.map();
        self.reloc.map();

        self.cmd_start = 0;
        self.counts = MessageCounts::default();
        self.blocks = BlockState::default();
        self.bitstream_size_pos = None;
        self.refs.clear();
        self.refs.reference(&self.reloc_buf)?;
        self.refs.reference(&self.cmd_buf)?;
        self.state = CmdbufState::Building;
        Ok(())
    }

    /// 解除映射, 保留存储与内容
    pub fn unmap(&mut self) {
        self.cmd.unmap();
        self.lldma.unmap();
        self.msg.unmap();
        self.reloc.unmap();
        self.regio.unmap();
    }

    pub fn state(&self) -> CmdbufState {
        self.state
    }

    pub fn counts(&self) -> &MessageCounts {
        &self.counts
    }

    pub fn references(&self) -> &ReferenceTable {
        &self.refs
    }

    pub fn command_region(&self) -> &Region {
        &self.cmd
    }

    pub fn lldma_region(&self) -> &Region {
        &self.lldma
    }

    pub fn message_region(&self) -> &Region {
        &self.msg
    }

    pub fn relocation_region(&self) -> &Region {
        &self.reloc
    }

    pub fn staging_region(&self) -> &Region {
        &self.regio
    }

    /// 命令字与链式 DMA 区所在对象
    pub fn command_object(&self) -> &BufferObject {
        &self.cmd_buf
    }

    /// 消息与重定位记录所在对象
    pub fn message_object(&self) -> &BufferObject {
        &self.reloc_buf
    }

    /// 二次去块暂存对象
    pub fn staging_object(&self) -> &BufferObject {
        &self.regio_buf
    }

    /// 当前命令段起始偏移
    pub fn segment_start(&self) -> usize {
        self.cmd_start
    }

    /// 当前命令段的字
    pub fn segment_words(&self) -> Vec<u32> {
        self.cmd.words(self.cmd_start, self.cmd.cursor())
    }

    pub fn relocation_count(&self) -> usize {
        self.reloc.cursor() / RELOC_RECORD_BYTES
    }

    /// 已写入的重定位记录
    pub fn relocation_records(&self) -> Vec<RelocationRecord> {
        crate::reloc::decode_records(self.reloc.as_bytes())
    }

    /// 任一区域剩余空间低于余量
    pub fn below_margin(&self) -> bool {
        self.cmd.below_margin()
            || self.lldma.below_margin()
            || self.msg.below_margin()
            || self.reloc.below_margin()
    }

    /// 引用对象, 返回引用表索引
    pub fn reference(&mut self, object: &BufferObject) -> VdxResult<u32> {
        self.refs.reference(object)
    }

    pub(crate) fn mark_queued(&mut self) {
        if self.state == CmdbufState::Building {
            self.state = CmdbufState::Queued;
        }
    }

    // ============================================================
    // 重定位
    // ============================================================

    /// 为已写入的字添加重定位
    ///
    /// 已知设备地址时立即修补, 否则写入占位值; 记录追加到重定位区.
    pub fn add_relocation(
        &mut self,
        slot: WordSlot,
        object: &BufferObject,
        offset: u32,
        mode: RelocMode,
    ) -> VdxResult<()> {
        let (dest, region) = match slot {
            WordSlot::Command(_) => (RelocDest::Command, &self.cmd),
            WordSlot::Lldma(_) => (RelocDest::Command, &self.lldma),
            WordSlot::Message(_) => (RelocDest::Message, &self.msg),
            WordSlot::Staging(_) => (RelocDest::Staging, &self.regio),
        };
        let pos = match slot {
            WordSlot::Command(pos)
            | WordSlot::Lldma(pos)
            | WordSlot::Message(pos)
            | WordSlot::Staging(pos) => pos,
        };
        assert!(
            region.contains(pos) && pos < region.cursor(),
            "重定位目标 {:#x} 不在区域 {} 内",
            pos,
            region.name()
        );
        let word_offset = ((region.base() + pos) / 4) as u32;

        self.reloc.ensure(RELOC_RECORD_BYTES)?;
        let buffer = self.refs.reference(object)?;
        let value = match object.offset_hint() {
            Some(address) => patch_value(address, offset, mode),
            None => RELOC_UNRESOLVED,
        };
        trace!(
            "重定位: {:?} 字 {:#x} -> {} + {:#x} (索引 {}) = {:#010x}",
            dest,
            word_offset,
            object.handle(),
            offset,
            buffer,
            value
        );

        let region = match slot {
            WordSlot::Command(_) => &mut self.cmd,
            WordSlot::Lldma(_) => &mut self.lldma,
            WordSlot::Message(_) => &mut self.msg,
            WordSlot::Staging(_) => &mut self.regio,
        };
        region.set_word(pos, value);

        let record = RelocationRecord {
            dest,
            word_offset,
            buffer,
            mask: mode.mask,
            shift: mode.shift,
            pre_add: offset,
            background: mode.background,
        };
        self.reloc.push_words(&record.encode())?;
        Ok(())
    }

    // ============================================================
    // 命令字写入
    // ============================================================

    /// 当前命令字写游标
    pub fn cmd_cursor(&self) -> usize {
        self.cmd.cursor()
    }

    /// 追加一个命令字, 返回其偏移
    pub fn write_cmd(&mut self, word: u32) -> VdxResult<usize> {
        self.cmd.push_word(word)
    }

    pub fn write_cmds(&mut self, words: &[u32]) -> VdxResult<usize> {
        self.cmd.push_words(words)
    }

    /// 追加一个需要重定位的地址字
    pub fn write_cmd_reloc(
        &mut self,
        object: &BufferObject,
        offset: u32,
        mode: RelocMode,
    ) -> VdxResult<usize> {
        self.reloc.ensure(RELOC_RECORD_BYTES)?;
        let pos = self.cmd.push_word(RELOC_UNRESOLVED)?;
        self.add_relocation(WordSlot::Command(pos), object, offset, mode)?;
        Ok(pos)
    }

    pub fn cmd_word(&self, pos: usize) -> u32 {
        self.cmd.word_at(pos)
    }

    /// 改写已写入的命令字
    pub fn set_cmd_word(&mut self, pos: usize, word: u32) {
        self.cmd.set_word(pos, word);
    }
}

fn object_size(bytes: usize) -> VdxResult<u32> {
    u32::try_from(bytes)
        .map_err(|_| VdxError::InvalidArgument(format!("区域总大小 {bytes} 超出设备对象上限")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DeviceHandle;
    use crate::device::MemoryDevice;

    fn fresh() -> (MemoryDevice, CommandBuffer) {
        let device = MemoryDevice::new();
        let mut cmdbuf =
            CommandBuffer::create(&device, RegionSizes::for_picture(64, 64)).expect("创建失败");
        cmdbuf.reset().expect("复位失败");
        (device, cmdbuf)
    }

    #[test]
    fn test_reset_seeds_reference_table() {
        let (_device, cmdbuf) = fresh();
        let refs = cmdbuf.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs.entries()[0].handle(), cmdbuf.message_object().handle());
        assert_eq!(refs.entries()[1].handle(), cmdbuf.command_object().handle());
        assert_eq!(cmdbuf.state(), CmdbufState::Building);
    }

    #[test]
    fn test_relocation_without_hint_writes_sentinel() {
        let (_device, mut cmdbuf) = fresh();
        let target = BufferObject::new(DeviceHandle(99), 4096, Placement::VPU_ONLY);
        let pos = cmdbuf
            .write_cmd_reloc(&target, 0x40, RelocMode::FULL)
            .expect("写入失败");
        assert_eq!(cmdbuf.cmd_word(pos), RELOC_UNRESOLVED);

        let records = cmdbuf.relocation_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dest, RelocDest::Command);
        assert_eq!(records[0].buffer, 2);
        assert_eq!(records[0].pre_add, 0x40);
    }

    #[test]
    fn test_relocation_with_hint_patches_immediately() {
        let (_device, mut cmdbuf) = fresh();
        let target = BufferObject::new(DeviceHandle(99), 4096, Placement::VPU_ONLY);
        target.update_from_device(0x2000_0000, Placement::VPU_ONLY, 1);
        cmdbuf.write_cmd(0).expect("写入失败");
        let pos = cmdbuf
            .write_cmd_reloc(&target, 0x100, RelocMode::SHIFT4)
            .expect("写入失败");
        assert_eq!(cmdbuf.cmd_word(pos), 0x0200_0010);
        let record = cmdbuf.relocation_records()[0];
        assert_eq!(record.word_offset, 1);
        assert_eq!(record.resolve(0x2000_0000), cmdbuf.cmd_word(pos));
    }

    #[test]
    fn test_lldma_relocation_offsets_past_command_region() {
        let (_device, mut cmdbuf) = fresh();
        let target = BufferObject::new(DeviceHandle(99), 4096, Placement::VPU_ONLY);
        let pos = cmdbuf.lldma.push_word(0).expect("写入失败");
        cmdbuf
            .add_relocation(WordSlot::Lldma(pos), &target, 0, RelocMode::FULL)
            .expect("重定位失败");
        let record = cmdbuf.relocation_records()[0];
        assert_eq!(record.word_offset as usize, cmdbuf.command_region().capacity() / 4);
    }

    #[test]
    #[should_panic(expected = "不在区域")]
    fn test_relocation_outside_written_range_panics() {
        let (_device, mut cmdbuf) = fresh();
        let target = BufferObject::new(DeviceHandle(99), 4096, Placement::VPU_ONLY);
        let _ = cmdbuf.add_relocation(WordSlot::Command(0x40), &target, 0, RelocMode::FULL);
    }

    #[test]
    fn test_reset_after_destroy_fails() {
        let (device, mut cmdbuf) = fresh();
        cmdbuf.destroy(&device);
        cmdbuf.command_object().release();
        assert!(matches!(cmdbuf.reset(), Err(VdxError::MapFailed(_))));
    }
}
