//! 设备提交接口.
//!
//! [`Device`] 抽象了内核驱动的能力: 分配、销毁、映射读写与 "提交并等待".
//! 提交请求携带引用表对应的校验参数以及各区域的只读视图.
//!
//! [`MemoryDevice`] 是一个进程内实现: 为句柄分配设备地址, 用重定位记录修补
//! 区域副本, 并记录每次提交, 供测试与命令行工具检查.

use std::collections::HashMap;
use std::sync::Mutex;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use log::debug;
use thiserror::Error;
use vdx_core::{VdxError, VdxResult};

use crate::buffer::{BufferObject, DeviceHandle, Placement};
use crate::reloc::{RELOC_RECORD_BYTES, RelocDest, RelocationRecord, decode_records};

/// 解码引擎编号
pub const ENGINE_DECODE: u32 = 0;

/// 设备地址空间起点
const MEMORY_DEVICE_BASE: u64 = 0x1000_0000;
/// 设备地址按页对齐
const MEMORY_DEVICE_PAGE: u64 = 0x1000;

bitflags! {
    /// GPU 访问标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GpuAccess: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

bitflags! {
    /// 提交时的栅栏标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FenceFlags: u32 {
        /// 不需要用户态等待栅栏
        const NO_USER = 1 << 1;
    }
}

/// 设备调用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// 暂时忙, 可重试
    #[error("设备忙")]
    Busy,
    /// 不可恢复的失败
    #[error("设备返回错误码 {0}")]
    Failed(i32),
}

/// 单个缓冲区的校验请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateArg {
    pub handle: DeviceHandle,
    pub set_flags: GpuAccess,
    pub clear_flags: GpuAccess,
    /// 预期设备地址, 0 表示未知
    pub presumed_offset: u64,
    pub placement: Placement,
    /// 不等待该缓冲区的栅栏, 回报被忽略
    pub unfence: bool,
}

impl ValidateArg {
    pub fn for_object(object: &BufferObject) -> Self {
        let access = GpuAccess::READ | GpuAccess::WRITE;
        Self {
            handle: object.handle(),
            set_flags: access,
            clear_flags: !access,
            presumed_offset: object.offset_hint().unwrap_or(0),
            placement: object.placement(),
            unfence: object.unfence(),
        }
    }
}

/// 单个缓冲区的校验回报
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateReply {
    /// 内核是否处理了该条目
    pub handled: bool,
    /// 0 表示成功
    pub ret: i32,
    pub gpu_offset: u64,
    pub placement: Placement,
    pub fence_type_mask: u32,
}

/// 栅栏描述
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FenceRep {
    pub fence_class: u32,
    pub fence_type: u32,
    pub sequence: u32,
    pub error: i32,
}

/// 区域内容视图, `base` 为区域在所属设备对象内的字节偏移
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionView<'a> {
    pub base: usize,
    pub bytes: &'a [u8],
}

/// 一次设备提交
#[derive(Debug)]
pub struct ExecRequest<'a> {
    /// 引用表, 顺序即重定位记录中的缓冲区索引
    pub buffers: Vec<ValidateArg>,
    /// 消息所在对象
    pub msg_handle: DeviceHandle,
    pub msg_offset: u32,
    /// 消息总字节数
    pub msg_size: u32,
    /// 重定位记录所在对象
    pub reloc_handle: DeviceHandle,
    pub reloc_offset: u32,
    pub num_relocs: u32,
    pub engine: u32,
    pub fence_flags: FenceFlags,
    pub messages: RegionView<'a>,
    pub relocations: RegionView<'a>,
    pub commands: RegionView<'a>,
    pub lldma: RegionView<'a>,
    pub staging: RegionView<'a>,
}

/// 提交回报, `buffers` 与请求一一对应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecReply {
    pub buffers: Vec<ValidateReply>,
    pub fence: FenceRep,
}

/// 内核驱动接口
pub trait Device: Send + Sync {
    /// 分配设备内存
    fn create_buffer(&self, size: u32, placement: Placement) -> VdxResult<BufferObject>;

    /// 销毁设备内存
    fn destroy_buffer(&self, object: &BufferObject);

    /// 提交并等待内核接收
    fn execute(&self, request: &ExecRequest<'_>) -> Result<ExecReply, DeviceError>;

    /// 映射对象并读取 [offset, offset + len) 的内容
    fn read_buffer(&self, object: &BufferObject, offset: u32, len: usize) -> VdxResult<Bytes>;

    /// 映射对象并在 offset 处写入 data (上传表数据, 测试中模拟固件写回)
    fn write_buffer(&self, object: &BufferObject, offset: u32, data: &[u8]) -> VdxResult<()>;
}

// ============================================================
// 进程内设备
// ============================================================

/// 一次被接受的提交
#[derive(Debug, Clone)]
pub struct Submission {
    pub sequence: u32,
    pub engine: u32,
    pub fence_flags: FenceFlags,
    pub buffers: Vec<DeviceHandle>,
    pub msg_size: u32,
    /// 重定位后的消息
    pub messages: Bytes,
    /// 重定位后的命令字 (不含链式 DMA 区)
    pub commands: Bytes,
    /// 重定位后的链式 DMA 描述符
    pub lldma: Bytes,
    /// 重定位后的二次去块暂存区
    pub staging: Bytes,
    /// 提交时的原始命令字 (构建阶段的乐观修补结果)
    pub raw_commands: Bytes,
    pub relocations: Vec<RelocationRecord>,
}

impl Submission {
    /// 按字读取已重定位的命令
    pub fn command_words(&self) -> Vec<u32> {
        words_of(&self.commands)
    }

    pub fn message_words(&self) -> Vec<u32> {
        words_of(&self.messages)
    }

    pub fn staging_words(&self) -> Vec<u32> {
        words_of(&self.staging)
    }
}

fn words_of(bytes: &[u8]) -> Vec<u32> {
    let mut out = vec![0u32; bytes.len() / 4];
    LittleEndian::read_u32_into(&bytes[..out.len() * 4], &mut out);
    out
}

#[derive(Debug, Clone, Copy)]
struct Allocation {
    size: u32,
    gpu_offset: u64,
    placement: Placement,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_handle: u32,
    next_offset: u64,
    allocations: HashMap<DeviceHandle, Allocation>,
    /// 由主机写入过的对象内容
    contents: HashMap<DeviceHandle, Vec<u8>>,
    destroyed: Vec<DeviceHandle>,
    submissions: Vec<Submission>,
    busy_remaining: u32,
    busy_forever: bool,
    fail_code: Option<i32>,
    unhandled: Option<DeviceHandle>,
    execute_calls: u32,
}

/// 进程内设备实现
#[derive(Debug)]
pub struct MemoryDevice {
    state: Mutex<MemoryState>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_handle: 1,
                next_offset: MEMORY_DEVICE_BASE,
                ..MemoryState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // 状态只包含计数与记录, 中毒后仍可继续使用
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 接下来 n 次提交返回忙
    pub fn script_busy(&self, times: u32) {
        self.state().busy_remaining = times;
    }

    /// 之后每次提交都返回忙
    pub fn script_always_busy(&self) {
        self.state().busy_forever = true;
    }

    /// 下一次提交返回错误码
    pub fn script_failure(&self, code: i32) {
        self.state().fail_code = Some(code);
    }

    /// 下一次提交中不处理指定句柄
    pub fn script_unhandled(&self, handle: DeviceHandle) {
        self.state().unhandled = Some(handle);
    }

    /// 全部已接受的提交
    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn last_submission(&self) -> Option<Submission> {
        self.state().submissions.last().cloned()
    }

    /// 已销毁的句柄 (按销毁顺序)
    pub fn destroyed(&self) -> Vec<DeviceHandle> {
        self.state().destroyed.clone()
    }

    /// 调用 `execute` 的次数, 包括返回忙与失败的调用
    pub fn execute_calls(&self) -> u32 {
        self.state().execute_calls
    }

    /// 句柄被分配的设备地址
    pub fn gpu_offset(&self, handle: DeviceHandle) -> Option<u64> {
        self.state().allocations.get(&handle).map(|a| a.gpu_offset)
    }

    pub fn buffer_size(&self, handle: DeviceHandle) -> Option<u32> {
        self.state().allocations.get(&handle).map(|a| a.size)
    }

    pub fn live_buffers(&self) -> usize {
        self.state().allocations.len()
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for MemoryDevice {
    fn create_buffer(&self, size: u32, placement: Placement) -> VdxResult<BufferObject> {
        if size == 0 {
            return Err(VdxError::InvalidArgument("缓冲区大小为 0".into()));
        }
        let mut state = self.state();
        let handle = DeviceHandle(state.next_handle);
        state.next_handle += 1;
        let gpu_offset = state.next_offset;
        let span = u64::from(size).div_ceil(MEMORY_DEVICE_PAGE) * MEMORY_DEVICE_PAGE;
        state.next_offset += span;
        state.allocations.insert(
            handle,
            Allocation {
                size,
                gpu_offset,
                placement,
            },
        );
        debug!("内存设备: 分配 {} ({} 字节) @ {:#x}", handle, size, gpu_offset);
        Ok(BufferObject::new(handle, size, placement))
    }

    fn destroy_buffer(&self, object: &BufferObject) {
        let mut state = self.state();
        if state.allocations.remove(&object.handle()).is_some() {
            state.contents.remove(&object.handle());
            state.destroyed.push(object.handle());
        }
    }

    fn read_buffer(&self, object: &BufferObject, offset: u32, len: usize) -> VdxResult<Bytes> {
        let state = self.state();
        let size = state
            .allocations
            .get(&object.handle())
            .map(|a| a.size as usize)
            .ok_or_else(|| VdxError::MapFailed(format!("{} 未分配", object.handle())))?;
        let start = offset as usize;
        if start + len > size {
            return Err(VdxError::InvalidArgument(format!(
                "读取 {}+{} 超出 {} 的大小 {}",
                start,
                len,
                object.handle(),
                size
            )));
        }
        Ok(match state.contents.get(&object.handle()) {
            Some(contents) => Bytes::copy_from_slice(&contents[start..start + len]),
            None => Bytes::from(vec![0; len]),
        })
    }

    fn write_buffer(&self, object: &BufferObject, offset: u32, data: &[u8]) -> VdxResult<()> {
        let mut state = self.state();
        let size = state
            .allocations
            .get(&object.handle())
            .map(|a| a.size as usize)
            .ok_or_else(|| VdxError::MapFailed(format!("{} 未分配", object.handle())))?;
        let start = offset as usize;
        if start + data.len() > size {
            return Err(VdxError::InvalidArgument(format!(
                "写入 {}+{} 超出 {} 的大小 {}",
                start,
                data.len(),
                object.handle(),
                size
            )));
        }
        let contents = state
            .contents
            .entry(object.handle())
            .or_insert_with(|| vec![0; size]);
        contents[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn execute(&self, request: &ExecRequest<'_>) -> Result<ExecReply, DeviceError> {
        let mut state = self.state();
        state.execute_calls += 1;
        if state.busy_forever {
            return Err(DeviceError::Busy);
        }
        if state.busy_remaining > 0 {
            state.busy_remaining -= 1;
            return Err(DeviceError::Busy);
        }
        if let Some(code) = state.fail_code.take() {
            return Err(DeviceError::Failed(code));
        }

        let mut replies = Vec::with_capacity(request.buffers.len());
        let mut addresses = Vec::with_capacity(request.buffers.len());
        let unhandled = state.unhandled.take();
        for arg in &request.buffers {
            let allocation = state.allocations.get(&arg.handle).copied();
            let handled = allocation.is_some() && Some(arg.handle) != unhandled;
            let (gpu_offset, placement) = allocation
                .map(|a| (a.gpu_offset, a.placement))
                .unwrap_or((0, arg.placement));
            addresses.push(gpu_offset);
            replies.push(ValidateReply {
                handled,
                ret: 0,
                gpu_offset,
                placement,
                fence_type_mask: u32::from(handled),
            });
        }

        let relocations = decode_records(
            &request.relocations.bytes[..request.num_relocs as usize * RELOC_RECORD_BYTES],
        );
        let mut messages = request.messages.bytes[..request.msg_size as usize].to_vec();
        let image_len = request
            .commands
            .bytes
            .len()
            .max(request.lldma.base + request.lldma.bytes.len());
        let mut command_image = vec![0u8; image_len];
        command_image[..request.commands.bytes.len()].copy_from_slice(request.commands.bytes);
        command_image[request.lldma.base..request.lldma.base + request.lldma.bytes.len()]
            .copy_from_slice(request.lldma.bytes);
        let mut staging = request.staging.bytes.to_vec();

        for record in &relocations {
            let Some(&address) = addresses.get(record.buffer as usize) else {
                return Err(DeviceError::Failed(-22));
            };
            let value = record.resolve(address);
            let target: &mut Vec<u8> = match record.dest {
                RelocDest::Message => &mut messages,
                RelocDest::Command => &mut command_image,
                RelocDest::Staging => &mut staging,
            };
            let byte = record.word_offset as usize * 4;
            if byte + 4 > target.len() {
                return Err(DeviceError::Failed(-14));
            }
            LittleEndian::write_u32(&mut target[byte..byte + 4], value);
        }

        let sequence = state.submissions.len() as u32 + 1;
        let lldma_start = request.lldma.base;
        let submission = Submission {
            sequence,
            engine: request.engine,
            fence_flags: request.fence_flags,
            buffers: request.buffers.iter().map(|arg| arg.handle).collect(),
            msg_size: request.msg_size,
            messages: Bytes::from(messages),
            commands: Bytes::copy_from_slice(&command_image[..request.commands.bytes.len()]),
            lldma: Bytes::copy_from_slice(
                &command_image[lldma_start..lldma_start + request.lldma.bytes.len()],
            ),
            staging: Bytes::from(staging),
            raw_commands: Bytes::copy_from_slice(request.commands.bytes),
            relocations,
        };
        debug!(
            "内存设备: 第 {} 次提交, {} 个缓冲区, {} 条重定位",
            sequence,
            submission.buffers.len(),
            submission.relocations.len()
        );
        state.submissions.push(submission);

        Ok(ExecReply {
            buffers: replies,
            fence: FenceRep {
                fence_class: 0,
                fence_type: 1,
                sequence,
                error: 0,
            },
        })
    }
}
