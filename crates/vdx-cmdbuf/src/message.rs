//! 固件消息.
//!
//! 消息区只追加, 顺序固定: 帧信息消息在渲染消息之前, 渲染消息在去块与
//! 主机后端消息之前. flush 时按此顺序遍历并回填渲染消息的中断标志.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use vdx_core::VdxResult;
use vdx_core::field::{FieldDescriptor, read_record_field, write_record_field};

use crate::buffer::BufferObject;
use crate::cmdbuf::{CommandBuffer, WordSlot};
use crate::reloc::{RELOC_RECORD_BYTES, RELOC_UNRESOLVED, RelocMode};

/// 渲染消息字节数
pub const RENDER_MSG_SIZE: usize = 20;
/// 去块 / 主机后端消息字节数
pub const DEBLOCK_MSG_SIZE: usize = 48;
/// 帧信息消息字节数
pub const FRAME_INFO_MSG_SIZE: usize = 24;

/// 各类消息计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub render: u32,
    pub deblock: u32,
    pub host_be_opp: u32,
    pub frame_info: u32,
}

impl MessageCounts {
    pub fn total(&self) -> u32 {
        self.render + self.deblock + self.host_be_opp + self.frame_info
    }

    /// 消息区应有的总字节数
    pub fn message_bytes(&self) -> usize {
        self.frame_info as usize * FRAME_INFO_MSG_SIZE
            + self.render as usize * RENDER_MSG_SIZE
            + (self.deblock + self.host_be_opp) as usize * DEBLOCK_MSG_SIZE
    }
}

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    Render = 0x23,
    Deblock = 0x24,
    /// 环外去块
    Oold = 0x25,
    /// 主机后端错误隐藏
    HostBeOpp = 0x26,
    FrameInfo = 0x27,
}

bitflags! {
    /// 消息标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u32 {
        const FIRST_SLICE = 1 << 0;
        const MBAFF = 1 << 1;
        const LAST_SLICE = 1 << 2;
        const TWO_PASS = 1 << 3;
        /// VLD 模式 (非 MC)
        const VLD_NOT_MC = 1 << 4;
        /// 完成后中断主机
        const HOST_INT = 1 << 6;
        /// 不需要回应
        const NO_RESPONSE = 1 << 8;
        const ERROR_DETECTION = 1 << 9;
        const DEBLOCK_ENABLE = 1 << 10;
    }
}

// ============================================================
// 字段布局
// ============================================================

pub const MSG_SIZE: FieldDescriptor = FieldDescriptor::mem("MSG_SIZE", 0, 0, 8);
pub const MSG_ID: FieldDescriptor = FieldDescriptor::mem("MSG_ID", 0, 8, 8);
pub const MSG_FENCE: FieldDescriptor = FieldDescriptor::mem("MSG_FENCE", 0, 16, 16);

pub const RENDER_FLAGS: FieldDescriptor = FieldDescriptor::mem("RENDER_FLAGS", 4, 0, 16);
/// 命令段字数
pub const RENDER_BUFFER_SIZE: FieldDescriptor = FieldDescriptor::mem("RENDER_BUFFER_SIZE", 4, 16, 16);
pub const RENDER_LLDMA_ADDRESS: FieldDescriptor =
    FieldDescriptor::mem("RENDER_LLDMA_ADDRESS", 8, 0, 32);
pub const RENDER_CONTEXT: FieldDescriptor = FieldDescriptor::mem("RENDER_CONTEXT", 12, 0, 8);
pub const RENDER_MMUPTD: FieldDescriptor = FieldDescriptor::mem("RENDER_MMUPTD", 12, 8, 24);
pub const RENDER_OPERATING_MODE: FieldDescriptor =
    FieldDescriptor::mem("RENDER_OPERATING_MODE", 16, 0, 32);

pub const DEBLOCK_FLAGS: FieldDescriptor = FieldDescriptor::mem("DEBLOCK_FLAGS", 4, 0, 16);
pub const DEBLOCK_SLICE_TYPE: FieldDescriptor = FieldDescriptor::mem("DEBLOCK_SLICE_TYPE", 4, 16, 8);
pub const DEBLOCK_OPERATING_MODE: FieldDescriptor =
    FieldDescriptor::mem("DEBLOCK_OPERATING_MODE", 8, 0, 32);
pub const DEBLOCK_CONTEXT: FieldDescriptor = FieldDescriptor::mem("DEBLOCK_CONTEXT", 12, 0, 8);
pub const DEBLOCK_FRAME_HEIGHT_MB: FieldDescriptor =
    FieldDescriptor::mem("DEBLOCK_FRAME_HEIGHT_MB", 16, 0, 16);
pub const DEBLOCK_PIC_WIDTH_MB: FieldDescriptor =
    FieldDescriptor::mem("DEBLOCK_PIC_WIDTH_MB", 16, 16, 16);
pub const DEBLOCK_ADDRESS_A0: FieldDescriptor = FieldDescriptor::mem("DEBLOCK_ADDRESS_A0", 20, 0, 32);
pub const DEBLOCK_ADDRESS_A1: FieldDescriptor = FieldDescriptor::mem("DEBLOCK_ADDRESS_A1", 24, 0, 32);
pub const DEBLOCK_MB_PARAM: FieldDescriptor = FieldDescriptor::mem("DEBLOCK_MB_PARAM", 28, 0, 32);
pub const DEBLOCK_EXT_STRIDE_A: FieldDescriptor =
    FieldDescriptor::mem("DEBLOCK_EXT_STRIDE_A", 32, 0, 32);
pub const DEBLOCK_ADDRESS_B0: FieldDescriptor = FieldDescriptor::mem("DEBLOCK_ADDRESS_B0", 36, 0, 32);
pub const DEBLOCK_ADDRESS_B1: FieldDescriptor = FieldDescriptor::mem("DEBLOCK_ADDRESS_B1", 40, 0, 32);
pub const DEBLOCK_ROTATION: FieldDescriptor = FieldDescriptor::mem("DEBLOCK_ROTATION", 44, 0, 32);

pub const FRAME_INFO_ADDRESS: FieldDescriptor = FieldDescriptor::mem("FRAME_INFO_ADDRESS", 4, 0, 32);
pub const FRAME_INFO_STRIDE: FieldDescriptor = FieldDescriptor::mem("FRAME_INFO_STRIDE", 8, 0, 32);
pub const FRAME_INFO_SIZE: FieldDescriptor = FieldDescriptor::mem("FRAME_INFO_SIZE", 12, 0, 32);
pub const FRAME_INFO_PIC_WIDTH_MB: FieldDescriptor =
    FieldDescriptor::mem("FRAME_INFO_PIC_WIDTH_MB", 16, 0, 32);
pub const FRAME_INFO_SIZE_MB: FieldDescriptor = FieldDescriptor::mem("FRAME_INFO_SIZE_MB", 20, 0, 32);

// ============================================================
// 消息参数
// ============================================================

/// 每条消息共有的上下文字段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageContext {
    pub context_id: u8,
    pub operating_mode: u32,
    /// 渲染消息的基础标志
    pub flags: MsgFlags,
}

/// 一个图像平面对: 亮度位于 offset, 色度位于 offset + chroma_offset
#[derive(Debug, Clone, Copy)]
pub struct PlaneRef<'a> {
    pub object: &'a BufferObject,
    pub offset: u32,
    pub chroma_offset: u32,
}

/// 去块 / 环外去块消息参数
#[derive(Debug, Clone, Copy)]
pub struct DeblockParams<'a> {
    pub target: PlaneRef<'a>,
    /// 备用输出 (旋转等)
    pub alternate: Option<PlaneRef<'a>>,
    /// 宏块参数或二次去块暂存对象
    pub mb_params: &'a BufferObject,
    pub mb_params_offset: u32,
    pub pic_width_mb: u32,
    pub frame_height_mb: u32,
    /// 场类型 (底场 1, 顶场 0, 帧 2, MBAFF 帧 3)
    pub field_type: u32,
    pub ext_stride: u32,
    pub rotation: u32,
    /// 使用环外去块消息类型
    pub is_oold: bool,
}

/// 主机后端错误隐藏消息参数
#[derive(Debug, Clone, Copy)]
pub struct HostBeOppParams<'a> {
    pub target: PlaneRef<'a>,
    /// 错误隐藏输出
    pub output: PlaneRef<'a>,
    pub pic_width_mb: u32,
    pub frame_height_mb: u32,
    pub field_type: u32,
    pub ext_stride: u32,
}

/// 帧信息消息参数
#[derive(Debug, Clone, Copy)]
pub struct FrameInfoParams<'a> {
    pub target: &'a BufferObject,
    pub stride: u32,
    pub size: u32,
    pub pic_width_mb: u32,
    pub size_mb: u32,
}

// ============================================================
// 写入
// ============================================================

impl CommandBuffer {
    /// 结束当前命令段并为其写入一条渲染消息
    ///
    /// 消息指向命令对象内的段起始处, 段后写入一个零字, 下一段从零字之后开始.
    pub fn append_render_message(&mut self, ctx: &MessageContext) -> VdxResult<()> {
        assert!(!self.blocks.any_open(), "提交命令段时仍有未关闭的块");
        assert!(
            self.counts.deblock == 0 && self.counts.host_be_opp == 0,
            "渲染消息必须位于去块消息之前"
        );
        self.msg.ensure(RENDER_MSG_SIZE)?;
        self.cmd.ensure(4)?;
        self.reloc.ensure(RELOC_RECORD_BYTES)?;

        let segment_bytes = self.cmd.cursor() - self.cmd_start;
        let mut record = [0u8; RENDER_MSG_SIZE];
        write_record_field(&mut record, &MSG_SIZE, RENDER_MSG_SIZE as u32);
        write_record_field(&mut record, &MSG_ID, MsgType::Render as u32);
        write_record_field(&mut record, &RENDER_FLAGS, ctx.flags.bits());
        write_record_field(&mut record, &RENDER_BUFFER_SIZE, (segment_bytes / 4) as u32);
        write_record_field(&mut record, &RENDER_LLDMA_ADDRESS, RELOC_UNRESOLVED);
        write_record_field(&mut record, &RENDER_CONTEXT, u32::from(ctx.context_id));
        write_record_field(&mut record, &RENDER_OPERATING_MODE, ctx.operating_mode);
        let pos = self.push_message(&record)?;

        let cmd_buf = self.command_object().clone();
        self.add_relocation(
            WordSlot::Message(pos + RENDER_LLDMA_ADDRESS.offset),
            &cmd_buf,
            self.cmd_start as u32,
            RelocMode::FULL,
        )?;
        debug!(
            "渲染消息 #{}: 段 {:#x} 共 {} 字",
            self.counts.render,
            self.cmd_start,
            segment_bytes / 4
        );

        self.counts.render += 1;
        self.cmd.push_word(0)?;
        self.cmd_start = self.cmd.cursor();
        self.bitstream_size_pos = None;
        self.mark_queued();
        Ok(())
    }

    /// 写入去块或环外去块消息
    pub fn append_deblock_message(
        &mut self,
        ctx: &MessageContext,
        params: &DeblockParams<'_>,
    ) -> VdxResult<()> {
        let flags = MsgFlags::HOST_INT | MsgFlags::LAST_SLICE | MsgFlags::DEBLOCK_ENABLE;
        let msg_type = if params.is_oold {
            MsgType::Oold
        } else {
            MsgType::Deblock
        };
        let mut record = deblock_record(msg_type, flags, ctx);
        write_record_field(&mut record, &DEBLOCK_SLICE_TYPE, params.field_type);
        write_record_field(&mut record, &DEBLOCK_PIC_WIDTH_MB, params.pic_width_mb);
        write_record_field(&mut record, &DEBLOCK_FRAME_HEIGHT_MB, params.frame_height_mb);
        write_record_field(&mut record, &DEBLOCK_EXT_STRIDE_A, params.ext_stride);
        write_record_field(&mut record, &DEBLOCK_ROTATION, params.rotation);

        let mut relocs = vec![
            (DEBLOCK_ADDRESS_A0, params.target.object, params.target.offset),
            (
                DEBLOCK_ADDRESS_A1,
                params.target.object,
                params.target.offset + params.target.chroma_offset,
            ),
            (DEBLOCK_MB_PARAM, params.mb_params, params.mb_params_offset),
        ];
        if let Some(alt) = params.alternate {
            relocs.push((DEBLOCK_ADDRESS_B0, alt.object, alt.offset));
            relocs.push((DEBLOCK_ADDRESS_B1, alt.object, alt.offset + alt.chroma_offset));
        }
        self.append_trailing_message(&mut record, &relocs)?;
        self.counts.deblock += 1;
        debug!(
            "{:?} 消息: {}x{} 宏块",
            msg_type, params.pic_width_mb, params.frame_height_mb
        );
        Ok(())
    }

    /// 写入主机后端错误隐藏消息, 宏块参数字记录目标对象句柄
    pub fn append_host_be_opp_message(
        &mut self,
        ctx: &MessageContext,
        params: &HostBeOppParams<'_>,
    ) -> VdxResult<()> {
        let flags = MsgFlags::HOST_INT | MsgFlags::ERROR_DETECTION;
        let mut record = deblock_record(MsgType::HostBeOpp, flags, ctx);
        write_record_field(&mut record, &DEBLOCK_SLICE_TYPE, params.field_type);
        write_record_field(&mut record, &DEBLOCK_PIC_WIDTH_MB, params.pic_width_mb);
        write_record_field(&mut record, &DEBLOCK_FRAME_HEIGHT_MB, params.frame_height_mb);
        write_record_field(&mut record, &DEBLOCK_EXT_STRIDE_A, params.ext_stride);
        write_record_field(&mut record, &DEBLOCK_MB_PARAM, params.target.object.handle().0);

        let relocs = [
            (DEBLOCK_ADDRESS_A0, params.target.object, params.target.offset),
            (
                DEBLOCK_ADDRESS_A1,
                params.target.object,
                params.target.offset + params.target.chroma_offset,
            ),
            (DEBLOCK_ADDRESS_B0, params.output.object, params.output.offset),
            (
                DEBLOCK_ADDRESS_B1,
                params.output.object,
                params.output.offset + params.output.chroma_offset,
            ),
        ];
        self.append_trailing_message(&mut record, &relocs)?;
        self.counts.host_be_opp += 1;
        Ok(())
    }

    /// 写入帧信息消息, 必须先于渲染与去块消息
    pub fn append_frame_info_message(&mut self, params: &FrameInfoParams<'_>) -> VdxResult<()> {
        assert!(
            self.counts.render == 0 && self.counts.deblock == 0 && self.counts.host_be_opp == 0,
            "帧信息消息必须位于其他消息之前"
        );
        self.msg.ensure(FRAME_INFO_MSG_SIZE)?;
        self.reloc.ensure(RELOC_RECORD_BYTES)?;
        let mut record = [0u8; FRAME_INFO_MSG_SIZE];
        write_record_field(&mut record, &MSG_SIZE, FRAME_INFO_MSG_SIZE as u32);
        write_record_field(&mut record, &MSG_ID, MsgType::FrameInfo as u32);
        write_record_field(&mut record, &FRAME_INFO_ADDRESS, RELOC_UNRESOLVED);
        write_record_field(&mut record, &FRAME_INFO_STRIDE, params.stride);
        write_record_field(&mut record, &FRAME_INFO_SIZE, params.size);
        write_record_field(&mut record, &FRAME_INFO_PIC_WIDTH_MB, params.pic_width_mb);
        write_record_field(&mut record, &FRAME_INFO_SIZE_MB, params.size_mb);
        let pos = self.push_message(&record)?;
        self.add_relocation(
            WordSlot::Message(pos + FRAME_INFO_ADDRESS.offset),
            params.target,
            0,
            RelocMode::FULL,
        )?;
        self.counts.frame_info += 1;
        self.mark_queued();
        Ok(())
    }

    /// 追加 48 字节消息及其地址重定位
    fn append_trailing_message(
        &mut self,
        record: &mut [u8; DEBLOCK_MSG_SIZE],
        relocs: &[(FieldDescriptor, &BufferObject, u32)],
    ) -> VdxResult<()> {
        self.msg.ensure(DEBLOCK_MSG_SIZE)?;
        self.reloc.ensure(RELOC_RECORD_BYTES * relocs.len())?;
        for (field, _, _) in relocs {
            write_record_field(record, field, RELOC_UNRESOLVED);
        }
        let pos = self.push_message(record)?;
        for (field, object, offset) in relocs {
            self.add_relocation(
                WordSlot::Message(pos + field.offset),
                object,
                *offset,
                RelocMode::FULL,
            )?;
        }
        self.mark_queued();
        Ok(())
    }

    fn push_message(&mut self, record: &[u8]) -> VdxResult<usize> {
        let mut words = vec![0u32; record.len() / 4];
        LittleEndian::read_u32_into(record, &mut words);
        self.msg.push_words(&words)
    }

    // ============================================================
    // 提交前处理
    // ============================================================

    /// 回填渲染消息标志并返回消息总字节数
    ///
    /// 整批最后一条消息请求中断, 其余渲染消息不需要回应.
    pub(crate) fn finalize_messages(&mut self, error_detection: bool) -> u32 {
        let msg_size = self.counts.message_bytes();
        assert_eq!(msg_size, self.msg.cursor(), "消息区大小与计数不一致");

        let render_start = self.counts.frame_info as usize * FRAME_INFO_MSG_SIZE;
        let batch = self.counts.render + self.counts.deblock + self.counts.host_be_opp;
        for i in 0..self.counts.render {
            let pos = render_start + i as usize * RENDER_MSG_SIZE + RENDER_FLAGS.offset;
            let mut word = self.msg.word_at(pos);
            let mut flags = MsgFlags::from_bits_retain(word & 0xffff);
            flags |= if i + 1 == batch {
                MsgFlags::HOST_INT
            } else {
                MsgFlags::NO_RESPONSE
            };
            if error_detection {
                flags |= MsgFlags::ERROR_DETECTION;
            }
            word = (word & !0xffff) | flags.bits();
            self.msg.set_word(pos, word);
        }
        msg_size as u32
    }
}

fn deblock_record(
    msg_type: MsgType,
    flags: MsgFlags,
    ctx: &MessageContext,
) -> [u8; DEBLOCK_MSG_SIZE] {
    let mut record = [0u8; DEBLOCK_MSG_SIZE];
    write_record_field(&mut record, &MSG_SIZE, DEBLOCK_MSG_SIZE as u32);
    write_record_field(&mut record, &MSG_ID, msg_type as u32);
    write_record_field(&mut record, &DEBLOCK_FLAGS, flags.bits());
    write_record_field(&mut record, &DEBLOCK_OPERATING_MODE, ctx.operating_mode);
    write_record_field(&mut record, &DEBLOCK_CONTEXT, u32::from(ctx.context_id));
    record
}

/// 按消息头的大小字段切分消息区, 返回 (类型, 消息字节)
pub fn split_messages(bytes: &[u8]) -> Vec<(u32, &[u8])> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + 4 <= bytes.len() {
        let size = read_record_field(&bytes[pos..], &MSG_SIZE) as usize;
        if size == 0 || pos + size > bytes.len() {
            break;
        }
        let id = read_record_field(&bytes[pos..], &MSG_ID);
        out.push((id, &bytes[pos..pos + size]));
        pos += size;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DeviceHandle, Placement};
    use crate::device::MemoryDevice;
    use crate::region::RegionSizes;
    use crate::reloc::RelocDest;

    fn fresh() -> CommandBuffer {
        let device = MemoryDevice::new();
        let mut cmdbuf =
            CommandBuffer::create(&device, RegionSizes::for_picture(64, 64)).expect("创建失败");
        cmdbuf.reset().expect("复位失败");
        cmdbuf
    }

    fn ctx() -> MessageContext {
        MessageContext {
            context_id: 3,
            operating_mode: 0x55,
            flags: MsgFlags::FIRST_SLICE,
        }
    }

    #[test]
    fn test_render_message_points_at_segment() {
        let mut cmdbuf = fresh();
        cmdbuf.write_cmds(&[1, 2, 3]).expect("写入失败");
        cmdbuf.append_render_message(&ctx()).expect("写入失败");
        cmdbuf.write_cmds(&[4, 5]).expect("写入失败");
        cmdbuf.append_render_message(&ctx()).expect("写入失败");

        assert_eq!(cmdbuf.counts().render, 2);
        assert_eq!(cmdbuf.segment_start(), 28, "两段各自带一个结尾零字");
        let bytes = cmdbuf.message_region().as_bytes();
        let messages = split_messages(bytes);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, MsgType::Render as u32);
        assert_eq!(read_record_field(messages[0].1, &RENDER_BUFFER_SIZE), 3);
        assert_eq!(read_record_field(messages[1].1, &RENDER_BUFFER_SIZE), 2);
        assert_eq!(read_record_field(messages[1].1, &RENDER_CONTEXT), 3);

        let records = cmdbuf.relocation_records();
        assert_eq!(records[1].dest, RelocDest::Message);
        assert_eq!(records[1].pre_add, 16, "第二段从第 16 字节开始");
        assert_eq!(records[1].buffer, 1, "指向命令对象");
    }

    #[test]
    fn test_last_message_requests_interrupt() {
        let mut cmdbuf = fresh();
        for _ in 0..3 {
            cmdbuf.write_cmd(0).expect("写入失败");
            cmdbuf.append_render_message(&ctx()).expect("写入失败");
        }
        let size = cmdbuf.finalize_messages(true);
        assert_eq!(size as usize, 3 * RENDER_MSG_SIZE);
        let messages = split_messages(cmdbuf.message_region().as_bytes());
        let flags: Vec<_> = messages
            .iter()
            .map(|(_, m)| MsgFlags::from_bits_retain(read_record_field(m, &RENDER_FLAGS)))
            .collect();
        assert!(flags[0].contains(MsgFlags::NO_RESPONSE | MsgFlags::ERROR_DETECTION));
        assert!(flags[1].contains(MsgFlags::NO_RESPONSE));
        assert!(flags[2].contains(MsgFlags::HOST_INT | MsgFlags::FIRST_SLICE));
        assert!(!flags[2].contains(MsgFlags::NO_RESPONSE));
    }

    #[test]
    fn test_deblock_after_render_takes_interrupt() {
        let mut cmdbuf = fresh();
        let target = BufferObject::new(DeviceHandle(40), 0x6000, Placement::VPU_ONLY);
        let params_bo = BufferObject::new(DeviceHandle(41), 0x1000, Placement::VPU_ONLY);
        cmdbuf.write_cmd(0).expect("写入失败");
        cmdbuf.append_render_message(&ctx()).expect("写入失败");
        cmdbuf
            .append_deblock_message(
                &ctx(),
                &DeblockParams {
                    target: PlaneRef {
                        object: &target,
                        offset: 0,
                        chroma_offset: 0x4000,
                    },
                    alternate: None,
                    mb_params: &params_bo,
                    mb_params_offset: 0,
                    pic_width_mb: 4,
                    frame_height_mb: 3,
                    field_type: 2,
                    ext_stride: 64,
                    rotation: 0,
                    is_oold: true,
                },
            )
            .expect("写入失败");
        assert_eq!(cmdbuf.finalize_messages(false) as usize, 20 + 48);

        let messages = split_messages(cmdbuf.message_region().as_bytes());
        let render_flags = MsgFlags::from_bits_retain(read_record_field(messages[0].1, &RENDER_FLAGS));
        assert!(render_flags.contains(MsgFlags::NO_RESPONSE));
        let deblock = messages[1].1;
        assert_eq!(messages[1].0, MsgType::Oold as u32);
        assert_eq!(read_record_field(deblock, &DEBLOCK_PIC_WIDTH_MB), 4);
        assert_eq!(read_record_field(deblock, &DEBLOCK_FRAME_HEIGHT_MB), 3);
        assert_eq!(read_record_field(deblock, &DEBLOCK_SLICE_TYPE), 2);

        let chroma = cmdbuf
            .relocation_records()
            .into_iter()
            .find(|r| r.word_offset as usize == (20 + DEBLOCK_ADDRESS_A1.offset) / 4)
            .expect("缺少色度地址重定位");
        assert_eq!(chroma.pre_add, 0x4000);
    }

    #[test]
    #[should_panic(expected = "帧信息消息必须位于其他消息之前")]
    fn test_frame_info_after_render_panics() {
        let mut cmdbuf = fresh();
        let target = BufferObject::new(DeviceHandle(40), 0x6000, Placement::VPU_ONLY);
        cmdbuf.write_cmd(0).expect("写入失败");
        cmdbuf.append_render_message(&ctx()).expect("写入失败");
        let _ = cmdbuf.append_frame_info_message(&FrameInfoParams {
            target: &target,
            stride: 64,
            size: 0x6000,
            pic_width_mb: 4,
            size_mb: 12,
        });
    }
}
