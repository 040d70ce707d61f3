//! 缓冲区引用表.
//!
//! 记录当前命令缓冲区引用的每个设备对象, 按内核句柄去重并分配稳定的小整数索引,
//! 该索引供重定位记录和最终提交使用.

use log::debug;
use vdx_core::{VdxError, VdxResult};

use crate::buffer::{BufferObject, BufferStatus, DeviceHandle};

/// 初始容量, 也是每次扩容的增量
pub const REFS_INCREMENT: usize = 10;

/// 单个引用条目
///
/// `owners[0]` 是首个引用者, 其余为共享同一内核句柄的受限内存别名.
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    handle: DeviceHandle,
    owners: Vec<BufferObject>,
}

impl ReferenceEntry {
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// 首个引用者
    pub fn primary(&self) -> &BufferObject {
        &self.owners[0]
    }

    /// 全部持有者 (包含别名)
    pub fn owners(&self) -> &[BufferObject] {
        &self.owners
    }
}

/// 对账统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// `Queued → Ready`
    pub readied: usize,
    /// `Abandoned → Destroyed`
    pub destroyed: usize,
}

/// 引用表
#[derive(Debug, Default)]
pub struct ReferenceTable {
    entries: Vec<ReferenceEntry>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(REFS_INCREMENT),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    pub fn get(&self, index: u32) -> Option<&ReferenceEntry> {
        self.entries.get(index as usize)
    }

    /// 查找句柄对应的索引
    pub fn index_of(&self, handle: DeviceHandle) -> Option<u32> {
        self.entries
            .iter()
            .position(|entry| entry.handle == handle)
            .map(|i| i as u32)
    }

    /// 引用对象, 返回其在表中的索引
    ///
    /// 同一句柄只占一个条目; 带别名标识的不同逻辑对象加入已有条目的持有者列表.
    pub fn reference(&mut self, object: &BufferObject) -> VdxResult<u32> {
        let handle = object.handle();
        if let Some(index) = self.index_of(handle) {
            let entry = &mut self.entries[index as usize];
            if object.alias_id() != 0 && !entry.owners.iter().any(|o| o.same_object(object)) {
                debug!("引用表: {} 加入别名 {}", handle, object.alias_id());
                entry.owners.push(object.clone());
                object.set_status(BufferStatus::Queued);
            }
            return Ok(index);
        }

        if self.entries.len() == self.entries.capacity() {
            self.entries
                .try_reserve_exact(REFS_INCREMENT)
                .map_err(|err| VdxError::OutOfMemory(format!("引用表扩容失败: {err}")))?;
        }
        self.entries.push(ReferenceEntry {
            handle,
            owners: vec![object.clone()],
        });
        object.set_status(BufferStatus::Queued);
        Ok((self.entries.len() - 1) as u32)
    }

    /// 提交返回后对账: 排队对象转为就绪, 已放弃对象销毁
    ///
    /// `destroy` 对每个需要销毁的对象调用一次. 对账后引用表清空.
    pub fn reconcile(&mut self, mut destroy: impl FnMut(&BufferObject)) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for entry in self.entries.drain(..) {
            for owner in &entry.owners {
                match owner.status() {
                    BufferStatus::Queued => {
                        owner.set_status(BufferStatus::Ready);
                        stats.readied += 1;
                    }
                    BufferStatus::Abandoned => {
                        owner.set_status(BufferStatus::Destroyed);
                        destroy(owner);
                        stats.destroyed += 1;
                    }
                    status => {
                        debug!("引用表: {} 对账时状态异常 {:?}", entry.handle, status);
                    }
                }
            }
        }
        stats
    }

    /// 丢弃全部条目, 不改变对象状态
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Placement;

    fn bo(handle: u32) -> BufferObject {
        BufferObject::new(DeviceHandle(handle), 4096, Placement::VPU_ONLY)
    }

    #[test]
    fn test_repeated_reference_returns_same_index() {
        let mut table = ReferenceTable::new();
        let a = bo(7);
        let first = table.reference(&a).expect("引用失败");
        for _ in 0..5 {
            assert_eq!(table.reference(&a).expect("引用失败"), first);
        }
        assert_eq!(table.len(), 1, "同一句柄只应占一个条目");
        assert_eq!(a.status(), BufferStatus::Queued);
    }

    #[test]
    fn test_table_grows_in_fixed_increments() {
        let mut table = ReferenceTable::new();
        let objects: Vec<_> = (0..25).map(bo).collect();
        for (i, object) in objects.iter().enumerate() {
            assert_eq!(table.reference(object).expect("引用失败"), i as u32);
        }
        assert_eq!(table.len(), 25);
        assert!(table.capacity() >= 25);
    }

    #[test]
    fn test_restricted_alias_joins_existing_entry() {
        let mut table = ReferenceTable::new();
        let surface = BufferObject::with_alias(DeviceHandle(4), 64, Placement::RESTRICTED, 2);
        let slice = BufferObject::with_alias(DeviceHandle(4), 64, Placement::RESTRICTED, 2);
        let a = table.reference(&surface).expect("引用失败");
        let b = table.reference(&slice).expect("引用失败");
        let c = table.reference(&slice).expect("引用失败");
        assert_eq!((a, b, c), (0, 0, 0));
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries()[0].owners().len(), 2, "别名应只加入一次");
    }

    #[test]
    fn test_reconcile_walks_aliases() {
        let mut table = ReferenceTable::new();
        let surface = BufferObject::with_alias(DeviceHandle(4), 64, Placement::RESTRICTED, 2);
        let slice = BufferObject::with_alias(DeviceHandle(4), 64, Placement::RESTRICTED, 2);
        let other = bo(5);
        table.reference(&surface).expect("引用失败");
        table.reference(&slice).expect("引用失败");
        table.reference(&other).expect("引用失败");
        slice.release();

        let mut destroyed = Vec::new();
        let stats = table.reconcile(|object| destroyed.push(object.handle()));
        assert_eq!(stats.readied, 2);
        assert_eq!(stats.destroyed, 1);
        assert_eq!(destroyed, vec![DeviceHandle(4)]);
        assert_eq!(surface.status(), BufferStatus::Ready);
        assert_eq!(slice.status(), BufferStatus::Destroyed);
        assert!(table.is_empty());
    }
}
