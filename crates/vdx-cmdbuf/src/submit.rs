//! 提交与对账.
//!
//! 一次提交: 回填消息标志 → 解除映射 → 在全局硬件锁下调用设备 (忙时在时间预算内重试)
//! → 按回报更新对象 → 对账引用表. 对账无论设备调用成败都会执行.

use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use vdx_core::{DebugContext, TraceLevel, VdxError, VdxResult};

use crate::cmdbuf::{CmdbufState, CommandBuffer};
use crate::device::{
    Device, DeviceError, ENGINE_DECODE, ExecReply, ExecRequest, FenceFlags, FenceRep, RegionView,
    ValidateArg,
};
use crate::reference::ReconcileStats;
use crate::reloc::RELOC_RECORD_BYTES;

/// 默认忙重试预算
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_micros(990_000);

/// 内核未处理缓冲区时的错误码
const EFAULT: i32 = -14;

static HARDWARE_LOCK: Mutex<()> = Mutex::new(());

/// 进程级硬件锁, 串行化所有设备提交
pub fn hardware_lock() -> MutexGuard<'static, ()> {
    HARDWARE_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 提交参数
#[derive(Debug, Clone, Copy)]
pub struct SubmitParams {
    pub timeout: Duration,
    pub error_detection: bool,
}

impl Default for SubmitParams {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SUBMIT_TIMEOUT,
            error_detection: false,
        }
    }
}

/// 一次成功提交的摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub messages: u32,
    pub msg_size: u32,
    pub relocations: u32,
    pub busy_retries: u32,
    pub fence: FenceRep,
    pub reconcile: ReconcileStats,
}

impl CommandBuffer {
    /// 提交全部已排队消息
    ///
    /// 没有任何消息时直接返回 `Ok(None)`, 状态不变. 否则调用结束后命令缓冲区
    /// 回到 `Empty`, 引用表已对账.
    pub fn submit(
        &mut self,
        device: &dyn Device,
        params: &SubmitParams,
        debug_ctx: &mut DebugContext,
    ) -> VdxResult<Option<SubmitOutcome>> {
        let messages = self.counts.total();
        if messages == 0 {
            return Ok(None);
        }
        assert!(!self.blocks.any_open(), "提交时仍有未关闭的块");

        let _guard = hardware_lock();
        let msg_size = self.finalize_messages(params.error_detection);
        let num_relocs = (self.reloc.cursor() / RELOC_RECORD_BYTES) as u32;
        self.dump(debug_ctx);
        self.unmap();
        self.state = CmdbufState::Submitted;

        let fence_flags = if debug_ctx.enabled(TraceLevel::CMDMSG) {
            FenceFlags::empty()
        } else {
            FenceFlags::NO_USER
        };
        let (result, busy_retries) = {
            let request = ExecRequest {
                buffers: self
                    .refs
                    .entries()
                    .iter()
                    .map(|entry| ValidateArg::for_object(entry.primary()))
                    .collect(),
                msg_handle: self.message_object().handle(),
                msg_offset: self.msg.base() as u32,
                msg_size,
                reloc_handle: self.message_object().handle(),
                reloc_offset: self.reloc.base() as u32,
                num_relocs,
                engine: ENGINE_DECODE,
                fence_flags,
                messages: view(&self.msg),
                relocations: view(&self.reloc),
                commands: view(&self.cmd),
                lldma: view(&self.lldma),
                staging: view(&self.regio),
            };
            debug!(
                "提交: {} 条消息 ({} 字节), {} 个缓冲区, {} 条重定位",
                messages,
                msg_size,
                request.buffers.len(),
                num_relocs
            );
            execute_with_retry(device, &request, params.timeout)
        };

        let result = result.and_then(|reply| self.apply_replies(&reply).map(|()| reply.fence));
        let reconcile = self.refs.reconcile(|object| device.destroy_buffer(object));
        self.state = CmdbufState::Empty;

        let counters = debug_ctx.counters_mut();
        counters.flushes += 1;
        counters.busy_retries += u64::from(busy_retries);
        counters.render_messages += u64::from(self.counts.render);
        counters.deblock_messages += u64::from(self.counts.deblock + self.counts.host_be_opp);
        counters.lldma_records += self.lldma_count() as u64;
        counters.relocations += u64::from(num_relocs);
        debug_ctx.flush();

        match result {
            Ok(fence) => Ok(Some(SubmitOutcome {
                messages,
                msg_size,
                relocations: num_relocs,
                busy_retries,
                fence,
                reconcile,
            })),
            Err(err) => {
                error!("提交失败: {}", err);
                Err(err)
            }
        }
    }

    /// 按回报更新每个引用对象的地址、放置与栅栏
    fn apply_replies(&self, reply: &ExecReply) -> VdxResult<()> {
        if reply.buffers.len() != self.refs.len() {
            return Err(VdxError::Internal(format!(
                "设备回报 {} 项, 引用表 {} 项",
                reply.buffers.len(),
                self.refs.len()
            )));
        }
        for (entry, rep) in self.refs.entries().iter().zip(&reply.buffers) {
            if entry.primary().unfence() {
                continue;
            }
            if !rep.handled {
                warn!("设备未处理 {}", entry.handle());
                return Err(VdxError::Device(EFAULT));
            }
            if rep.ret != 0 {
                return Err(VdxError::Device(rep.ret));
            }
            for owner in entry.owners() {
                owner.update_from_device(rep.gpu_offset, rep.placement, rep.fence_type_mask);
            }
        }
        Ok(())
    }

    fn dump(&self, debug_ctx: &mut DebugContext) {
        if debug_ctx.enabled(TraceLevel::CMDMSG) {
            for region in [&self.msg, &self.cmd] {
                let words = region.words(0, region.cursor());
                debug_ctx.dump_words(TraceLevel::CMDMSG, region.name(), region.base(), &words);
            }
        }
        if debug_ctx.enabled(TraceLevel::LLDMA) {
            let lldma = &self.lldma;
            debug_ctx.dump_words(
                TraceLevel::LLDMA,
                "lldma",
                lldma.base(),
                &lldma.words(0, lldma.cursor()),
            );
        }
        if debug_ctx.enabled(TraceLevel::RELOC) {
            for record in self.relocation_records() {
                debug_ctx.trace(TraceLevel::RELOC, format_args!("{record:?}"));
            }
        }
        if debug_ctx.enabled(TraceLevel::REGIO) {
            let words = self.regio.words(0, self.regio.cursor());
            debug_ctx.dump_words(TraceLevel::REGIO, "regio", 0, &words);
        }
    }
}

fn view(region: &crate::region::Region) -> RegionView<'_> {
    RegionView {
        base: region.base(),
        bytes: region.as_bytes(),
    }
}

/// 设备忙时让出 CPU 并重试, 自首次忙起超过预算后放弃
fn execute_with_retry(
    device: &dyn Device,
    request: &ExecRequest<'_>,
    timeout: Duration,
) -> (VdxResult<ExecReply>, u32) {
    let mut busy_since: Option<Instant> = None;
    let mut retries = 0u32;
    loop {
        match device.execute(request) {
            Ok(reply) => return (Ok(reply), retries),
            Err(DeviceError::Failed(code)) => return (Err(VdxError::Device(code)), retries),
            Err(DeviceError::Busy) => {
                let elapsed = busy_since.get_or_insert_with(Instant::now).elapsed();
                if elapsed >= timeout {
                    return (
                        Err(VdxError::DeviceTimeout {
                            elapsed_ms: elapsed.as_millis() as u64,
                        }),
                        retries,
                    );
                }
                retries += 1;
                thread::yield_now();
            }
        }
    }
}
