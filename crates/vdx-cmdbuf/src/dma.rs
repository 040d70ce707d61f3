//! DMA 命令、码流 DMA、链式 DMA 描述符与控制头.

use vdx_core::VdxResult;
use vdx_core::field::{FieldDescriptor, pack_fields, read_record_field, write_record_field};

use crate::buffer::BufferObject;
use crate::cmdbuf::{CommandBuffer, WordSlot};
use crate::command::{
    BITSTREAM_SIZE, CMD_BITSTREAM_DMA, CMD_CTRL_ALLOC_HEADER, CMD_SR_SETUP, CMD_TAG, COMPLETION_WORD,
    CTRL_ALLOC_HEADER_WORDS, DmaHeader, DmaType, SrFlags, ctrl_alloc,
};
use crate::reloc::{RELOC_UNRESOLVED, RelocMode};

/// 单条 DMA 命令的最大传输长度
pub const MAX_DMA_LEN: u32 = 0xffff;

// ============================================================
// 单条 DMA 与码流 DMA
// ============================================================

impl CommandBuffer {
    /// DMA 命令: 从 object + offset 传输 size 字节到 dma_type 对应的外设
    ///
    /// dest_offset 非零时附带一个目标偏移字.
    pub fn dma_write(
        &mut self,
        object: &BufferObject,
        offset: u32,
        size: u32,
        dest_offset: u32,
        dma_type: DmaType,
    ) -> VdxResult<()> {
        assert!(size < MAX_DMA_LEN, "DMA 长度 {size:#x} 超出上限");
        let header = DmaHeader {
            dma_type,
            size,
            has_offset: dest_offset != 0,
        };
        self.cmd.ensure(if header.has_offset { 12 } else { 8 })?;
        self.write_cmd(header.pack())?;
        if header.has_offset {
            self.write_cmd(dest_offset)?;
        }
        self.write_cmd_reloc(object, offset, RelocMode::FULL)?;
        Ok(())
    }

    /// 码流 DMA: 码流读取器设置 + 位偏移 + 长度 + DMA 命令 + 源地址
    pub fn dma_write_bitstream(
        &mut self,
        object: &BufferObject,
        offset: u32,
        size: u32,
        bit_offset: u32,
        flags: SrFlags,
    ) -> VdxResult<()> {
        self.cmd.ensure(20)?;
        self.write_cmd((CMD_SR_SETUP << 28) | flags.bits())?;
        self.write_cmd(bit_offset)?;
        let size_pos = self.write_cmd(size)?;
        self.bitstream_size_pos = Some(size_pos);
        self.write_cmd(pack_fields(&[
            (&CMD_TAG, CMD_BITSTREAM_DMA),
            (&BITSTREAM_SIZE, size),
        ]))?;
        self.write_cmd_reloc(object, offset, RelocMode::FULL)?;
        Ok(())
    }

    /// 追加一个码流分段, 并累加到上一次码流 DMA 的长度字
    pub fn dma_write_bitstream_chained(&mut self, object: &BufferObject, size: u32) -> VdxResult<()> {
        let size_pos = self
            .bitstream_size_pos
            .expect("链式码流 DMA 之前必须有一次码流 DMA");
        self.cmd.ensure(8)?;
        self.write_cmd(pack_fields(&[
            (&CMD_TAG, CMD_BITSTREAM_DMA),
            (&BITSTREAM_SIZE, size),
        ]))?;
        self.write_cmd_reloc(object, 0, RelocMode::FULL)?;
        let total = self.cmd_word(size_pos).wrapping_add(size);
        self.set_cmd_word(size_pos, total);
        Ok(())
    }

    // ============================================================
    // 控制头与完成标记
    // ============================================================

    /// 写入每个 slice 的控制分配头, 返回头的起始偏移
    ///
    /// 外部状态地址指向 preload 对象; slice 参数与首末宏块字先写零,
    /// 由调用方在 slice 构建完成后回填.
    pub fn begin_frontend_header(&mut self, preload: &BufferObject) -> VdxResult<FrontendHeader> {
        self.cmd.ensure(CTRL_ALLOC_HEADER_WORDS * 4)?;
        let mut words = [0u32; CTRL_ALLOC_HEADER_WORDS];
        words[ctrl_alloc::CMD] = CMD_CTRL_ALLOC_HEADER << 28;
        words[ctrl_alloc::EXTERN_STATE] = RELOC_UNRESOLVED;
        let pos = self.write_cmds(&words)?;
        let header = FrontendHeader { pos };
        self.add_relocation(
            WordSlot::Command(header.slot(ctrl_alloc::EXTERN_STATE)),
            preload,
            0,
            RelocMode::FULL,
        )?;
        Ok(header)
    }

    /// 完成标记, 固件执行到此处开始解码
    pub fn write_kick(&mut self) -> VdxResult<usize> {
        self.write_cmd(COMPLETION_WORD)
    }

    // ============================================================
    // 链式 DMA 描述符
    // ============================================================

    /// 追加一条链式 DMA 描述符, 返回其在命令对象内的字节偏移
    ///
    /// 主机地址指向 object + offset, 描述符为链表末项.
    pub fn lldma_write(
        &mut self,
        object: &BufferObject,
        offset: u32,
        size: u32,
        dest_offset: u32,
        dma_type: DmaType,
    ) -> VdxResult<u32> {
        assert!(size <= MAX_DMA_LEN, "链式 DMA 长度 {size:#x} 超出上限");
        self.lldma.ensure(LLDMA_RECORD_BYTES)?;
        let detail = dma_detail(dma_type);
        let width_bytes = 1u32 << detail.width as u32;
        let descriptor = LinkedListDescriptor {
            byte_swap: false,
            direction: detail.direction,
            peripheral_width: detail.width,
            last: true,
            interrupt: false,
            peripheral_incr_size: detail.incr_size,
            peripheral_incr: detail.incr,
            length: size / width_bytes,
            peripheral_address: detail.peripheral_address + dest_offset,
            access_delay: 0,
            burst: detail.burst,
            ext_address: 0,
            mode_2d: false,
            repeat_count: 0,
            line_add_offset: 0,
            row_length: 0,
            host_address: RELOC_UNRESOLVED,
            next: 0,
        };
        let pos = self.lldma.reserve(LLDMA_RECORD_BYTES)?;
        let encoded = descriptor.encode();
        for (i, chunk) in encoded.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.lldma.set_word(pos + i * 4, word);
        }
        self.add_relocation(
            WordSlot::Lldma(pos + LLDMA_SA.offset),
            object,
            offset,
            RelocMode::FULL,
        )?;
        Ok((self.lldma.base() + pos) as u32)
    }

    /// 已写入的链式 DMA 描述符数
    pub fn lldma_count(&self) -> usize {
        self.lldma.cursor() / LLDMA_RECORD_BYTES
    }
}

/// 控制分配头在命令区中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontendHeader {
    pos: usize,
}

impl FrontendHeader {
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// 头内第 index 个字的偏移
    pub fn slot(&self, index: usize) -> usize {
        debug_assert!(index < CTRL_ALLOC_HEADER_WORDS);
        self.pos + index * 4
    }
}

// ============================================================
// 链式 DMA 描述符编码
// ============================================================

/// 每条描述符的字节数
pub const LLDMA_RECORD_BYTES: usize = 32;

pub const LLDMA_BSWAP: FieldDescriptor = FieldDescriptor::mem("BSWAP", 0, 31, 1);
pub const LLDMA_DIR: FieldDescriptor = FieldDescriptor::mem("DIR", 0, 30, 1);
pub const LLDMA_PW: FieldDescriptor = FieldDescriptor::mem("PW", 0, 28, 2);
pub const LLDMA_LIST_FIN: FieldDescriptor = FieldDescriptor::mem("LIST_FIN", 4, 31, 1);
pub const LLDMA_LIST_INT: FieldDescriptor = FieldDescriptor::mem("LIST_INT", 4, 30, 1);
pub const LLDMA_PI: FieldDescriptor = FieldDescriptor::mem("PI", 4, 17, 2);
pub const LLDMA_INCR: FieldDescriptor = FieldDescriptor::mem("INCR", 4, 16, 1);
pub const LLDMA_LEN: FieldDescriptor = FieldDescriptor::mem("LEN", 4, 0, 16);
pub const LLDMA_ADDR: FieldDescriptor = FieldDescriptor::mem("ADDR", 8, 0, 23);
pub const LLDMA_ACC_DEL: FieldDescriptor = FieldDescriptor::mem("ACC_DEL", 12, 29, 3);
pub const LLDMA_BURST: FieldDescriptor = FieldDescriptor::mem("BURST", 12, 26, 3);
pub const LLDMA_EXT_SA: FieldDescriptor = FieldDescriptor::mem("EXT_SA", 12, 0, 4);
pub const LLDMA_2D_MODE: FieldDescriptor = FieldDescriptor::mem("2D_MODE", 16, 16, 1);
pub const LLDMA_REP_COUNT: FieldDescriptor = FieldDescriptor::mem("REP_COUNT", 16, 0, 11);
pub const LLDMA_LINE_ADD_OFF: FieldDescriptor = FieldDescriptor::mem("LINE_ADD_OFF", 20, 16, 10);
pub const LLDMA_ROW_LENGTH: FieldDescriptor = FieldDescriptor::mem("ROW_LENGTH", 20, 0, 10);
pub const LLDMA_SA: FieldDescriptor = FieldDescriptor::mem("SA", 24, 0, 32);
pub const LLDMA_LISTPTR: FieldDescriptor = FieldDescriptor::mem("LISTPTR", 28, 0, 28);

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}

/// 外设数据宽度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralWidth {
    Bits32 = 0,
    Bits16 = 1,
    Bits8 = 2,
}

impl PeripheralWidth {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Bits16,
            2 => Self::Bits8,
            _ => Self::Bits32,
        }
    }
}

/// 链式 DMA 描述符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedListDescriptor {
    pub byte_swap: bool,
    pub direction: DmaDirection,
    pub peripheral_width: PeripheralWidth,
    /// 链表末项
    pub last: bool,
    pub interrupt: bool,
    pub peripheral_incr_size: u32,
    pub peripheral_incr: bool,
    /// 以外设宽度为单位的传输长度
    pub length: u32,
    pub peripheral_address: u32,
    pub access_delay: u32,
    pub burst: u32,
    pub ext_address: u32,
    pub mode_2d: bool,
    pub repeat_count: u32,
    pub line_add_offset: u32,
    pub row_length: u32,
    pub host_address: u32,
    /// 下一条描述符的偏移 (以 16 字节为单位)
    pub next: u32,
}

impl LinkedListDescriptor {
    pub fn encode(&self) -> [u8; LLDMA_RECORD_BYTES] {
        let mut out = [0u8; LLDMA_RECORD_BYTES];
        let fields: [(&FieldDescriptor, u32); 18] = [
            (&LLDMA_BSWAP, u32::from(self.byte_swap)),
            (&LLDMA_DIR, self.direction as u32),
            (&LLDMA_PW, self.peripheral_width as u32),
            (&LLDMA_LIST_FIN, u32::from(self.last)),
            (&LLDMA_LIST_INT, u32::from(self.interrupt)),
            (&LLDMA_PI, self.peripheral_incr_size),
            (&LLDMA_INCR, u32::from(self.peripheral_incr)),
            (&LLDMA_LEN, self.length),
            (&LLDMA_ADDR, self.peripheral_address),
            (&LLDMA_ACC_DEL, self.access_delay),
            (&LLDMA_BURST, self.burst),
            (&LLDMA_EXT_SA, self.ext_address),
            (&LLDMA_2D_MODE, u32::from(self.mode_2d)),
            (&LLDMA_REP_COUNT, self.repeat_count),
            (&LLDMA_LINE_ADD_OFF, self.line_add_offset),
            (&LLDMA_ROW_LENGTH, self.row_length),
            (&LLDMA_SA, self.host_address),
            (&LLDMA_LISTPTR, self.next),
        ];
        for (field, value) in fields {
            write_record_field(&mut out, field, value);
        }
        out
    }

    pub fn decode(record: &[u8]) -> Self {
        let flag = |field: &FieldDescriptor| read_record_field(record, field) != 0;
        Self {
            byte_swap: flag(&LLDMA_BSWAP),
            direction: if flag(&LLDMA_DIR) {
                DmaDirection::DeviceToHost
            } else {
                DmaDirection::HostToDevice
            },
            peripheral_width: PeripheralWidth::from_u32(read_record_field(record, &LLDMA_PW)),
            last: flag(&LLDMA_LIST_FIN),
            interrupt: flag(&LLDMA_LIST_INT),
            peripheral_incr_size: read_record_field(record, &LLDMA_PI),
            peripheral_incr: flag(&LLDMA_INCR),
            length: read_record_field(record, &LLDMA_LEN),
            peripheral_address: read_record_field(record, &LLDMA_ADDR),
            access_delay: read_record_field(record, &LLDMA_ACC_DEL),
            burst: read_record_field(record, &LLDMA_BURST),
            ext_address: read_record_field(record, &LLDMA_EXT_SA),
            mode_2d: flag(&LLDMA_2D_MODE),
            repeat_count: read_record_field(record, &LLDMA_REP_COUNT),
            line_add_offset: read_record_field(record, &LLDMA_LINE_ADD_OFF),
            row_length: read_record_field(record, &LLDMA_ROW_LENGTH),
            host_address: read_record_field(record, &LLDMA_SA),
            next: read_record_field(record, &LLDMA_LISTPTR),
        }
    }
}

/// 每种 DMA 类型的外设参数
#[derive(Debug, Clone, Copy)]
struct DmaDetail {
    peripheral_address: u32,
    width: PeripheralWidth,
    incr_size: u32,
    incr: bool,
    direction: DmaDirection,
    burst: u32,
}

// 外设地址: VLC RAM / 码流移位寄存器 / 残差插入 / MTX 数据口 / VLR
const VEC_VLC_RAM: u32 = 0x2000;
const VEC_SHIFTREG_STREAMIN: u32 = 0x0890;
const VDMC_RESIDUAL_INSERT: u32 = 0x0440;
const MTX_SYSC_CDMAT: u32 = 0x0350;
const VEC_RAM_FESTATE: u32 = 0x3b90;
const VEC_RAM_MEMSET: u32 = 0x3cc0;

fn dma_detail(dma_type: DmaType) -> DmaDetail {
    use DmaDirection::{DeviceToHost, HostToDevice};
    use PeripheralWidth::{Bits8, Bits16, Bits32};
    let (peripheral_address, width, incr_size, incr, direction, burst) = match dma_type {
        DmaType::VlcTable => (VEC_VLC_RAM, Bits16, 2, true, HostToDevice, 1),
        DmaType::Bitstream => (VEC_SHIFTREG_STREAMIN, Bits8, 0, false, HostToDevice, 3),
        DmaType::Residual => (VDMC_RESIDUAL_INSERT, Bits32, 0, false, HostToDevice, 3),
        DmaType::RenderBufferMc | DmaType::RenderBufferVld => {
            (MTX_SYSC_CDMAT, Bits32, 0, false, HostToDevice, 0)
        }
        DmaType::Mpeg4FeSave => (VEC_RAM_FESTATE, Bits32, 2, true, DeviceToHost, 1),
        DmaType::Mpeg4FeRestore => (VEC_RAM_FESTATE, Bits32, 2, true, HostToDevice, 1),
        DmaType::PreloadSave => (MTX_SYSC_CDMAT, Bits32, 0, false, DeviceToHost, 0),
        DmaType::PreloadRestore => (MTX_SYSC_CDMAT, Bits32, 0, false, HostToDevice, 0),
        DmaType::MemSet => (VEC_RAM_MEMSET, Bits32, 2, false, DeviceToHost, 3),
    };
    DmaDetail {
        peripheral_address,
        width,
        incr_size,
        incr,
        direction,
        burst,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DeviceHandle, Placement};
    use crate::command::{CMD_COMPLETION, command_tag};
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

    fn object(handle: u32) -> BufferObject {
        BufferObject::new(DeviceHandle(handle), 0x10000, Placement::VPU_ONLY)
    }

    #[test]
    fn test_dma_with_destination_offset() {
        let mut cmdbuf = fresh();
        cmdbuf
            .dma_write(&object(7), 0x20, 0x80, 0x40, DmaType::Residual)
            .expect("写入失败");
        let words = cmdbuf.segment_words();
        assert_eq!(words.len(), 3);
        assert_eq!(words[0], 0xe108_0080);
        assert_eq!(words[1], 0x40);
        assert_eq!(words[2], RELOC_UNRESOLVED);
    }

    #[test]
    fn test_chained_bitstream_accumulates_size() {
        let mut cmdbuf = fresh();
        cmdbuf
            .dma_write_bitstream(
                &object(7),
                0,
                100,
                5,
                SrFlags::ENABLE_RBDU_EXTRACTION,
            )
            .expect("写入失败");
        cmdbuf
            .dma_write_bitstream_chained(&object(8), 60)
            .expect("写入失败");
        let words = cmdbuf.segment_words();
        assert_eq!(words[0], 0xb000_0001);
        assert_eq!(words[1], 5);
        assert_eq!(words[2], 160, "长度字应累加分段长度");
        assert_eq!(words[3], 0xa000_0000 | 100);
        assert_eq!(words[5], 0xa000_0000 | 60);
        assert_eq!(cmdbuf.references().len(), 4);
    }

    #[test]
    fn test_frontend_header_and_kick() {
        let mut cmdbuf = fresh();
        let preload = object(9);
        let header = cmdbuf.begin_frontend_header(&preload).expect("写入失败");
        let kick = cmdbuf.write_kick().expect("写入失败");
        assert_eq!(header.pos(), 0);
        assert_eq!(cmdbuf.cmd_word(header.slot(ctrl_alloc::CMD)), 0x9000_0000);
        assert_eq!(command_tag(cmdbuf.cmd_word(kick)), CMD_COMPLETION);
        let records = cmdbuf.relocation_records();
        assert_eq!(records[0].word_offset, ctrl_alloc::EXTERN_STATE as u32);
    }

    #[test]
    fn test_lldma_descriptor_round_trip_and_relocation() {
        let mut cmdbuf = fresh();
        let source = object(10);
        let offset = cmdbuf
            .lldma_write(&source, 0x100, 0x400, 0, DmaType::PreloadRestore)
            .expect("写入失败");
        assert_eq!(offset as usize, cmdbuf.command_region().capacity());
        assert_eq!(cmdbuf.lldma_count(), 1);

        let descriptor = LinkedListDescriptor::decode(cmdbuf.lldma_region().as_bytes());
        assert!(descriptor.last);
        assert_eq!(descriptor.length, 0x100, "32 位外设按字计数");
        assert_eq!(descriptor.direction, DmaDirection::HostToDevice);
        assert_eq!(descriptor.host_address, RELOC_UNRESOLVED);

        let record = cmdbuf.relocation_records()[0];
        assert_eq!(record.dest, RelocDest::Command);
        assert_eq!(record.word_offset as usize, (offset as usize + 24) / 4);
        assert_eq!(record.pre_add, 0x100);
    }

    #[test]
    #[should_panic(expected = "链式码流 DMA 之前")]
    fn test_chained_without_first_segment_panics() {
        let mut cmdbuf = fresh();
        let _ = cmdbuf.dma_write_bitstream_chained(&object(8), 60);
    }
}
