//! DPB 槽位表.
//!
//! 硬件以 16 个固定槽位描述参考图像. 槽位在图像之间保持稳定: 仍被引用的表面
//! 沿用原槽位, 不再被引用的槽位释放, 新参考取最低的空闲槽位.

use log::{error, warn};

use crate::params::{MAX_REFERENCE_FRAMES, PictureFlags, PictureRef, SurfaceId};

/// 槽位未被当前图像的参考帧数组引用
pub const NO_REFIDX: u8 = 0xff;

/// DPB 槽位表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpbIndexTable {
    slots: [Option<SurfaceId>; MAX_REFERENCE_FRAMES],
    /// 槽位 → 参考帧数组下标
    refidx: [u8; MAX_REFERENCE_FRAMES],
    long_term_flags: u32,
}

impl Default for DpbIndexTable {
    fn default() -> Self {
        Self {
            slots: [None; MAX_REFERENCE_FRAMES],
            refidx: [NO_REFIDX; MAX_REFERENCE_FRAMES],
            long_term_flags: 0,
        }
    }
}

impl DpbIndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按当前图像的参考帧数组更新槽位
    ///
    /// num_ref_frames 超过 16 时截断. 返回实际使用的参考帧数.
    pub fn update(&mut self, references: &[PictureRef], num_ref_frames: u32) -> usize {
        let mut count = num_ref_frames as usize;
        if count > MAX_REFERENCE_FRAMES {
            warn!("参考帧数 {} 超过 {}, 截断", count, MAX_REFERENCE_FRAMES);
            count = MAX_REFERENCE_FRAMES;
        }
        let references = &references[..count.min(references.len())];

        let mut used = 0u32;
        let mut new_ids: Vec<SurfaceId> = Vec::new();
        for reference in references.iter().filter(|r| r.is_valid()) {
            match self.slot_of(reference.surface) {
                Some(slot) => used |= 1 << slot,
                None => {
                    if !new_ids.contains(&reference.surface) {
                        new_ids.push(reference.surface);
                    }
                }
            }
        }

        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if used & (1 << slot) == 0 {
                *entry = None;
            }
        }

        let mut free = 0;
        for id in new_ids {
            while free < MAX_REFERENCE_FRAMES && self.slots[free].is_some() {
                free += 1;
            }
            if free == MAX_REFERENCE_FRAMES {
                error!("DPB 没有空闲槽位容纳表面 {}", id);
                break;
            }
            self.slots[free] = Some(id);
        }

        self.refidx = [NO_REFIDX; MAX_REFERENCE_FRAMES];
        self.long_term_flags = 0;
        for (i, reference) in references.iter().enumerate() {
            if !reference.is_valid() {
                continue;
            }
            if let Some(slot) = self.slot_of(reference.surface) {
                self.refidx[slot] = i as u8;
                if reference.flags.contains(PictureFlags::LONG_TERM_REFERENCE) {
                    self.long_term_flags |= 1 << slot;
                }
            }
        }
        count
    }

    /// 表面所在的槽位
    pub fn slot_of(&self, surface: SurfaceId) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(surface))
    }

    /// 槽位中的表面
    pub fn surface_at(&self, slot: usize) -> Option<SurfaceId> {
        self.slots[slot]
    }

    /// 槽位对应的参考帧数组下标, 未引用时为 [`NO_REFIDX`]
    pub fn refidx(&self, slot: usize) -> u8 {
        self.refidx[slot]
    }

    /// 长期参考标志, 第 n 位对应第 n 个槽位
    pub fn long_term_flags(&self) -> u32 {
        self.long_term_flags
    }

    /// 已占用的槽位及其表面
    pub fn occupied(&self) -> impl Iterator<Item = (usize, SurfaceId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| s.map(|id| (slot, id)))
    }

    /// 表面被销毁时释放其槽位
    pub fn forget(&mut self, surface: SurfaceId) {
        if let Some(slot) = self.slot_of(surface) {
            self.slots[slot] = None;
            self.refidx[slot] = NO_REFIDX;
            self.long_term_flags &= !(1 << slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(ids: &[SurfaceId]) -> Vec<PictureRef> {
        ids.iter().map(|&id| PictureRef::frame(id, id as i32 * 2)).collect()
    }

    #[test]
    fn test_slots_stay_stable_across_pictures() {
        let mut dpb = DpbIndexTable::new();
        dpb.update(&refs(&[10, 11, 12]), 3);
        assert_eq!(dpb.slot_of(10), Some(0));
        assert_eq!(dpb.slot_of(12), Some(2));

        // 11 退出, 13 进入: 12 保持槽位 2, 13 取最低空闲槽位 1
        dpb.update(&refs(&[12, 10, 13]), 3);
        assert_eq!(dpb.slot_of(10), Some(0));
        assert_eq!(dpb.slot_of(12), Some(2));
        assert_eq!(dpb.slot_of(13), Some(1));
        assert_eq!(dpb.slot_of(11), None);
        assert_eq!(dpb.refidx(2), 0);
        assert_eq!(dpb.refidx(0), 1);
        assert_eq!(dpb.refidx(1), 2);
        assert_eq!(dpb.refidx(3), NO_REFIDX);
    }

    #[test]
    fn test_duplicate_reference_takes_one_slot() {
        let mut dpb = DpbIndexTable::new();
        dpb.update(&refs(&[4, 4, 5]), 3);
        assert_eq!(dpb.occupied().count(), 2);
        let slots: Vec<usize> = dpb.occupied().map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![0, 1]);
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let mut dpb = DpbIndexTable::new();
        let mut list = refs(&[1, 2]);
        list.insert(1, PictureRef::INVALID);
        dpb.update(&list, 3);
        assert_eq!(dpb.occupied().count(), 2);
        assert_eq!(dpb.refidx(dpb.slot_of(2).expect("缺少槽位")), 2);
    }

    #[test]
    fn test_num_ref_frames_clamped() {
        let mut dpb = DpbIndexTable::new();
        let ids: Vec<SurfaceId> = (0..20).collect();
        let used = dpb.update(&refs(&ids), 20);
        assert_eq!(used, MAX_REFERENCE_FRAMES);
        assert_eq!(dpb.occupied().count(), MAX_REFERENCE_FRAMES);
        assert_eq!(dpb.slot_of(16), None);
    }

    #[test]
    fn test_long_term_flags_follow_slots() {
        let mut dpb = DpbIndexTable::new();
        let mut list = refs(&[7, 8]);
        list[1].flags = PictureFlags::LONG_TERM_REFERENCE;
        dpb.update(&list, 2);
        assert_eq!(dpb.long_term_flags(), 1 << 1);
        dpb.forget(8);
        assert_eq!(dpb.long_term_flags(), 0);
        assert_eq!(dpb.slot_of(8), None);
    }
}
