//! 硬件字段描述符.
//!
//! 每个硬件字段用一个 [`FieldDescriptor`] 描述 (所在字的字节偏移、位移、位宽、表步长),
//! 通过通用的 [`read_field`] / [`write_field`] 读写, 不依赖内存布局重叠的位域联合体.
//!
//! 寄存器命令字只使用 `shift` / `width`; 内存记录 (如宏块参数块) 额外使用 `offset`
//! 定位所在的 32 位小端字, `stride` 用于表字段按索引寻址.

use byteorder::{ByteOrder, LittleEndian};

/// 单个硬件字段的描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// 字段名, 用于调试输出
    pub name: &'static str,
    /// 所在 32 位字在记录中的字节偏移 (寄存器字为 0)
    pub offset: usize,
    /// 字内起始位
    pub shift: u32,
    /// 位宽 (1..=32)
    pub width: u32,
    /// 表字段相邻元素的位步长 (非表字段为 0)
    pub stride: u32,
}

impl FieldDescriptor {
    /// 寄存器字内字段
    pub const fn reg(name: &'static str, shift: u32, width: u32) -> Self {
        Self {
            name,
            offset: 0,
            shift,
            width,
            stride: 0,
        }
    }

    /// 内存记录中的字段
    pub const fn mem(name: &'static str, offset: usize, shift: u32, width: u32) -> Self {
        Self {
            name,
            offset,
            shift,
            width,
            stride: 0,
        }
    }

    /// 内存记录中的表字段, 第 i 个元素位于 `offset * 8 + shift + i * stride` 位
    pub const fn table(
        name: &'static str,
        offset: usize,
        shift: u32,
        width: u32,
        stride: u32,
    ) -> Self {
        Self {
            name,
            offset,
            shift,
            width,
            stride,
        }
    }

    /// 右对齐的值掩码
    pub const fn lsb_mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    /// 字内掩码
    pub const fn mask(&self) -> u32 {
        self.lsb_mask() << self.shift
    }

    /// 表字段第 index 个元素的 (字节偏移, 字内位移)
    const fn locate(&self, index: usize) -> (usize, u32) {
        let bit = self.offset * 8 + self.shift as usize + index * self.stride as usize;
        ((bit / 32) * 4, (bit % 32) as u32)
    }
}

// ============================================================
// 寄存器字读写
// ============================================================

/// 从命令字读取字段
pub fn read_field(word: u32, field: &FieldDescriptor) -> u32 {
    (word >> field.shift) & field.lsb_mask()
}

/// 向命令字写入字段, 超宽的值被截断
pub fn write_field(word: &mut u32, field: &FieldDescriptor, value: u32) {
    *word = (*word & !field.mask()) | ((value & field.lsb_mask()) << field.shift);
}

/// 以符号扩展方式读取字段 (运动矢量等有符号字段)
pub fn read_signed_field(word: u32, field: &FieldDescriptor) -> i32 {
    let raw = read_field(word, field);
    let unused = 32 - field.width;
    ((raw << unused) as i32) >> unused
}

/// 构造只包含若干字段的命令字
pub fn pack_fields(fields: &[(&FieldDescriptor, u32)]) -> u32 {
    let mut word = 0;
    for (field, value) in fields {
        write_field(&mut word, field, *value);
    }
    word
}

// ============================================================
// 内存记录读写
// ============================================================

/// 从小端内存记录读取字段
pub fn read_record_field(record: &[u8], field: &FieldDescriptor) -> u32 {
    read_record_table_field(record, field, 0)
}

/// 从小端内存记录读取表字段的第 index 个元素
pub fn read_record_table_field(record: &[u8], field: &FieldDescriptor, index: usize) -> u32 {
    let (byte, shift) = field.locate(index);
    let word = LittleEndian::read_u32(&record[byte..byte + 4]);
    (word >> shift) & field.lsb_mask()
}

/// 向小端内存记录写入字段
pub fn write_record_field(record: &mut [u8], field: &FieldDescriptor, value: u32) {
    write_record_table_field(record, field, 0, value);
}

/// 向小端内存记录写入表字段的第 index 个元素
pub fn write_record_table_field(
    record: &mut [u8],
    field: &FieldDescriptor,
    index: usize,
    value: u32,
) {
    let (byte, shift) = field.locate(index);
    let slot = &mut record[byte..byte + 4];
    let mask = field.lsb_mask() << shift;
    let word = LittleEndian::read_u32(slot);
    LittleEndian::write_u32(slot, (word & !mask) | ((value & field.lsb_mask()) << shift));
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOW: FieldDescriptor = FieldDescriptor::reg("LOW", 0, 12);
    const HIGH: FieldDescriptor = FieldDescriptor::reg("HIGH", 16, 16);
    const FULL: FieldDescriptor = FieldDescriptor::reg("FULL", 0, 32);

    #[test]
    fn test_write_then_read_keeps_neighbours() {
        let mut word = 0xffff_ffff;
        write_field(&mut word, &LOW, 0x123);
        assert_eq!(word, 0xffff_f123);
        write_field(&mut word, &HIGH, 0xabcd);
        assert_eq!(read_field(word, &HIGH), 0xabcd);
        assert_eq!(read_field(word, &LOW), 0x123);
    }

    #[test]
    fn test_write_truncates_wide_value() {
        let mut word = 0;
        write_field(&mut word, &LOW, 0x1fff);
        assert_eq!(word, 0xfff, "超出位宽的部分应被截断");
    }

    #[test]
    fn test_full_width_field() {
        assert_eq!(FULL.mask(), u32::MAX);
        let mut word = 0;
        write_field(&mut word, &FULL, 0xdead_beef);
        assert_eq!(word, 0xdead_beef);
    }

    #[test]
    fn test_signed_field() {
        let mv = FieldDescriptor::reg("MV", 16, 16);
        let mut word = 0;
        write_field(&mut word, &mv, (-5i32) as u32);
        assert_eq!(read_signed_field(word, &mv), -5);
    }

    #[test]
    fn test_record_table_field_crosses_words() {
        // 每个元素 16 位, 第 2 个元素落在第二个字
        let table = FieldDescriptor::table("T", 4, 0, 16, 16);
        let mut record = vec![0u8; 16];
        write_record_table_field(&mut record, &table, 0, 0x1111);
        write_record_table_field(&mut record, &table, 1, 0x2222);
        write_record_table_field(&mut record, &table, 2, 0x3333);
        assert_eq!(&record[4..8], &[0x11, 0x11, 0x22, 0x22]);
        assert_eq!(read_record_table_field(&record, &table, 2), 0x3333);
        assert_eq!(&record[0..4], &[0, 0, 0, 0], "记录前部不应被改写");
    }

    #[test]
    fn test_pack_fields() {
        let word = pack_fields(&[(&LOW, 7), (&HIGH, 2)]);
        assert_eq!(word, 0x0002_0007);
    }
}
