//! 设备内存对象.
//!
//! [`BufferObject`] 是对一块设备分配的共享引用 (`Arc`). 多个逻辑对象可以共享同一个
//! 内核句柄 (受限内存别名), 引用表按句柄去重, 别名作为同一条目的额外持有者.
//!
//! 状态机: `Ready → Queued` (被命令缓冲区引用) `→ Ready` (提交后对账);
//! 持有者在 `Queued` 期间释放对象时改为 `Abandoned`, 由对账步骤真正销毁.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;

/// 内核缓冲区句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u32);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bo#{}", self.0)
    }
}

bitflags! {
    /// 缓冲区放置标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Placement: u32 {
        /// 仅设备可见
        const VPU_ONLY = 1 << 0;
        /// CPU 可映射
        const CPU_MAPPABLE = 1 << 1;
        /// 受限 (加密) 内存
        const RESTRICTED = 1 << 2;
        /// 命令缓冲区
        const COMMAND = 1 << 3;
    }
}

/// 引用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferStatus {
    /// 空闲, 未被在途命令缓冲区引用
    Ready = 0,
    /// 已被当前命令缓冲区引用, 等待提交
    Queued = 1,
    /// 持有者已释放, 但仍被在途命令缓冲区引用
    Abandoned = 2,
    /// 已销毁
    Destroyed = 3,
}

impl BufferStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Queued,
            2 => Self::Abandoned,
            3 => Self::Destroyed,
            _ => Self::Ready,
        }
    }
}

/// 释放请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// 可立即销毁
    Destroy,
    /// 仍被引用, 推迟到提交对账时销毁
    Deferred,
    /// 已经处于放弃或销毁状态
    AlreadyReleased,
}

struct BufferShared {
    handle: DeviceHandle,
    size: u32,
    /// 受限内存别名标识, 0 表示无别名
    alias_id: u32,
    status: AtomicU8,
    /// 设备地址提示, 0 表示未知
    offset_hint: AtomicU64,
    placement: AtomicU32,
    fence_type_mask: AtomicU32,
    unfence: AtomicBool,
}

/// 设备内存对象的共享引用
#[derive(Clone)]
pub struct BufferObject {
    inner: Arc<BufferShared>,
}

impl BufferObject {
    pub fn new(handle: DeviceHandle, size: u32, placement: Placement) -> Self {
        Self::with_alias(handle, size, placement, 0)
    }

    /// 创建共享内核句柄的受限内存别名对象
    pub fn with_alias(handle: DeviceHandle, size: u32, placement: Placement, alias_id: u32) -> Self {
        Self {
            inner: Arc::new(BufferShared {
                handle,
                size,
                alias_id,
                status: AtomicU8::new(BufferStatus::Ready as u8),
                offset_hint: AtomicU64::new(0),
                placement: AtomicU32::new(placement.bits()),
                fence_type_mask: AtomicU32::new(0),
                unfence: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> DeviceHandle {
        self.inner.handle
    }

    pub fn size(&self) -> u32 {
        self.inner.size
    }

    pub fn alias_id(&self) -> u32 {
        self.inner.alias_id
    }

    /// 是否为同一逻辑对象
    pub fn same_object(&self, other: &BufferObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn status(&self) -> BufferStatus {
        BufferStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: BufferStatus) {
        self.inner.status.store(status as u8, Ordering::Release);
    }

    /// 已知的设备地址
    pub fn offset_hint(&self) -> Option<u64> {
        match self.inner.offset_hint.load(Ordering::Acquire) {
            0 => None,
            offset => Some(offset),
        }
    }

    pub fn placement(&self) -> Placement {
        Placement::from_bits_truncate(self.inner.placement.load(Ordering::Acquire))
    }

    pub fn fence_type_mask(&self) -> u32 {
        self.inner.fence_type_mask.load(Ordering::Acquire)
    }

    pub fn unfence(&self) -> bool {
        self.inner.unfence.load(Ordering::Acquire)
    }

    /// 提交时不等待该对象的栅栏
    pub fn set_unfence(&self, unfence: bool) {
        self.inner.unfence.store(unfence, Ordering::Release);
    }

    /// 用设备回报更新地址、放置与栅栏信息
    pub fn update_from_device(&self, gpu_offset: u64, placement: Placement, fence_type_mask: u32) {
        self.inner.offset_hint.store(gpu_offset, Ordering::Release);
        self.inner
            .placement
            .store(placement.bits(), Ordering::Release);
        self.inner
            .fence_type_mask
            .store(fence_type_mask, Ordering::Release);
    }

    /// 持有者释放对象
    ///
    /// 仍在排队的对象只标记为放弃, 由提交对账销毁.
    pub fn release(&self) -> ReleaseOutcome {
        match self.status() {
            BufferStatus::Queued => {
                self.set_status(BufferStatus::Abandoned);
                ReleaseOutcome::Deferred
            }
            BufferStatus::Ready => {
                self.set_status(BufferStatus::Destroyed);
                ReleaseOutcome::Destroy
            }
            BufferStatus::Abandoned | BufferStatus::Destroyed => ReleaseOutcome::AlreadyReleased,
        }
    }
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("handle", &self.inner.handle)
            .field("size", &self.inner.size)
            .field("alias_id", &self.inner.alias_id)
            .field("status", &self.status())
            .field("offset_hint", &self.offset_hint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_ready_destroys_immediately() {
        let bo = BufferObject::new(DeviceHandle(3), 64, Placement::VPU_ONLY);
        assert_eq!(bo.release(), ReleaseOutcome::Destroy);
        assert_eq!(bo.status(), BufferStatus::Destroyed);
        assert_eq!(bo.release(), ReleaseOutcome::AlreadyReleased);
    }

    #[test]
    fn test_release_queued_is_deferred() {
        let bo = BufferObject::new(DeviceHandle(3), 64, Placement::VPU_ONLY);
        bo.set_status(BufferStatus::Queued);
        assert_eq!(bo.release(), ReleaseOutcome::Deferred);
        assert_eq!(bo.status(), BufferStatus::Abandoned);
    }

    #[test]
    fn test_clones_share_state_but_aliases_do_not() {
        let bo = BufferObject::new(DeviceHandle(9), 64, Placement::RESTRICTED);
        let clone = bo.clone();
        let alias = BufferObject::with_alias(DeviceHandle(9), 64, Placement::RESTRICTED, 1);
        bo.update_from_device(0x1000, Placement::VPU_ONLY, 1);
        assert_eq!(clone.offset_hint(), Some(0x1000));
        assert!(bo.same_object(&clone));
        assert!(!bo.same_object(&alias));
        assert_eq!(alias.offset_hint(), None);
    }
}
