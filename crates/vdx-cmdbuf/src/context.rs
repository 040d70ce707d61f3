//! 解码上下文.
//!
//! 持有设备、命令缓冲区环与当前命令缓冲区. 同一时刻最多一个当前命令缓冲区,
//! flush 之后 (无论成败) 当前命令缓冲区被释放, 下次获取时取环中的下一个.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use vdx_core::{DebugContext, VdxError, VdxResult};

use crate::cmdbuf::CommandBuffer;
use crate::device::Device;
use crate::message::{DeblockParams, FrameInfoParams, HostBeOppParams, MessageContext, MsgFlags};
use crate::region::RegionSizes;
use crate::submit::{DEFAULT_SUBMIT_TIMEOUT, SubmitOutcome, SubmitParams};

/// 命令缓冲区环的默认长度
pub const DEFAULT_CMDBUF_COUNT: usize = 10;
/// 单个命令缓冲区最多累积的渲染消息数, 达到后立即提交
pub const DEFAULT_MAX_RENDER_MESSAGES: u32 = 12;

/// 解码上下文配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// 固件上下文编号
    pub context_id: u8,
    pub operating_mode: u32,
    /// 使用环外去块
    pub is_oold: bool,
    /// 错误隐藏 (消息带错误检测标志, 图像结束时发送主机后端消息)
    pub error_concealment: bool,
    pub submit_timeout: Duration,
    pub max_render_messages: u32,
    pub cmdbuf_count: usize,
    pub sizes: RegionSizes,
}

impl ContextConfig {
    pub fn for_picture(width: u32, height: u32) -> Self {
        Self {
            context_id: 0,
            operating_mode: 0,
            is_oold: false,
            error_concealment: false,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            max_render_messages: DEFAULT_MAX_RENDER_MESSAGES,
            cmdbuf_count: DEFAULT_CMDBUF_COUNT,
            sizes: RegionSizes::for_picture(width, height),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::for_picture(1920, 1088)
    }
}

/// 解码上下文
pub struct DecodeContext {
    device: Arc<dyn Device>,
    config: ContextConfig,
    ring: Vec<CommandBuffer>,
    current: Option<usize>,
    next_slot: usize,
    /// 成功提交的次数
    submitted: u64,
    debug: DebugContext,
}

impl DecodeContext {
    /// 预分配命令缓冲区环
    pub fn new(
        device: Arc<dyn Device>,
        config: ContextConfig,
        debug: DebugContext,
    ) -> VdxResult<Self> {
        if config.cmdbuf_count == 0 {
            return Err(VdxError::InvalidArgument("命令缓冲区环不能为空".into()));
        }
        let mut ring = Vec::with_capacity(config.cmdbuf_count);
        for _ in 0..config.cmdbuf_count {
            match CommandBuffer::create(device.as_ref(), config.sizes) {
                Ok(cmdbuf) => ring.push(cmdbuf),
                Err(err) => {
                    for cmdbuf in &ring {
                        cmdbuf.destroy(device.as_ref());
                    }
                    return Err(err);
                }
            }
        }
        info!(
            "解码上下文 {}: {} 个命令缓冲区, 暂存区 {} 字节",
            config.context_id, config.cmdbuf_count, config.sizes.regio
        );
        Ok(Self {
            device,
            config,
            ring,
            current: None,
            next_slot: 0,
            submitted: 0,
            debug,
        })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn debug(&self) -> &DebugContext {
        &self.debug
    }

    pub fn debug_mut(&mut self) -> &mut DebugContext {
        &mut self.debug
    }

    /// 成功提交的次数
    pub fn submitted_count(&self) -> u64 {
        self.submitted
    }

    /// 更新消息携带的操作模式
    pub fn set_operating_mode(&mut self, operating_mode: u32) {
        self.config.operating_mode = operating_mode;
    }

    /// 以上下文参数构造消息公共字段
    pub fn message_context(&self, flags: MsgFlags) -> MessageContext {
        MessageContext {
            context_id: self.config.context_id,
            operating_mode: self.config.operating_mode,
            flags,
        }
    }

    // ============================================================
    // 当前命令缓冲区
    // ============================================================

    /// 获取当前命令缓冲区, 没有时从环中取下一个并复位
    pub fn get_next_cmdbuf(&mut self) -> VdxResult<&mut CommandBuffer> {
        let index = match self.current {
            Some(index) => index,
            None => {
                let index = self.next_slot;
                self.ring[index].reset()?;
                self.next_slot = (index + 1) % self.ring.len();
                self.current = Some(index);
                self.debug.counters_mut().cmdbufs += 1;
                debug!("获取命令缓冲区 #{}", index);
                index
            }
        };
        Ok(&mut self.ring[index])
    }

    pub fn cmdbuf(&self) -> Option<&CommandBuffer> {
        self.current.map(|index| &self.ring[index])
    }

    /// 当前命令缓冲区, 调用方必须先获取
    pub fn cmdbuf_mut(&mut self) -> &mut CommandBuffer {
        let index = self.current.expect("没有当前命令缓冲区");
        &mut self.ring[index]
    }

    // ============================================================
    // 消息与提交
    // ============================================================

    /// 结束当前命令段并写入渲染消息; 渲染消息达到上限或任一区域低于余量时立即提交
    pub fn append_render_command(&mut self, flags: MsgFlags) -> VdxResult<()> {
        self.append_render_command_deferred(flags)?;
        let max = self.config.max_render_messages;
        let cmdbuf = self.cmdbuf_mut();
        if cmdbuf.counts().render >= max || cmdbuf.below_margin() {
            debug!("渲染消息达到上限或区域低于余量, 提前提交");
            self.flush()?;
        }
        Ok(())
    }

    /// 写入渲染消息但不检查提交条件
    pub fn append_render_command_deferred(&mut self, flags: MsgFlags) -> VdxResult<()> {
        let ctx = self.message_context(flags);
        self.cmdbuf_mut().append_render_message(&ctx)
    }

    /// 提交当前命令缓冲区
    ///
    /// 没有当前命令缓冲区或没有消息时不做任何事. 一旦调用设备, 当前命令缓冲区
    /// 都会被释放; 只有成功时提交计数才增加.
    pub fn flush(&mut self) -> VdxResult<Option<SubmitOutcome>> {
        let Some(index) = self.current else {
            return Ok(None);
        };
        let params = SubmitParams {
            timeout: self.config.submit_timeout,
            error_detection: self.config.error_concealment,
        };
        let result = self.ring[index].submit(self.device.as_ref(), &params, &mut self.debug);
        if matches!(result, Ok(None)) {
            return result;
        }
        if result.is_ok() {
            self.submitted += 1;
        }
        self.current = None;
        result
    }

    /// 追加去块消息
    pub fn submit_deblock(&mut self, params: &DeblockParams<'_>) -> VdxResult<()> {
        let ctx = self.message_context(MsgFlags::empty());
        self.get_next_cmdbuf()?.append_deblock_message(&ctx, params)
    }

    /// 追加主机后端错误隐藏消息
    pub fn submit_host_be_opp(&mut self, params: &HostBeOppParams<'_>) -> VdxResult<()> {
        let ctx = self.message_context(MsgFlags::empty());
        self.get_next_cmdbuf()?.append_host_be_opp_message(&ctx, params)
    }

    /// 追加帧信息消息
    pub fn submit_frame_info(&mut self, params: &FrameInfoParams<'_>) -> VdxResult<()> {
        self.get_next_cmdbuf()?.append_frame_info_message(params)
    }
}

impl Drop for DecodeContext {
    fn drop(&mut self) {
        for cmdbuf in &self.ring {
            cmdbuf.destroy(self.device.as_ref());
        }
    }
}

impl std::fmt::Debug for DecodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeContext")
            .field("config", &self.config)
            .field("current", &self.current)
            .field("next_slot", &self.next_slot)
            .field("submitted", &self.submitted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmdbuf::CmdbufState;
    use crate::device::MemoryDevice;
    use crate::region::CMD_MARGIN;

    fn context(device: &Arc<MemoryDevice>) -> DecodeContext {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut config = ContextConfig::for_picture(64, 64);
        config.cmdbuf_count = 3;
        DecodeContext::new(device.clone(), config, DebugContext::disabled()).expect("创建失败")
    }

    #[test]
    fn test_ring_rotates_after_flush() {
        let device = Arc::new(MemoryDevice::new());
        let mut ctx = context(&device);
        assert_eq!(device.live_buffers(), 9);

        let first = ctx.get_next_cmdbuf().expect("获取失败").command_object().handle();
        ctx.cmdbuf_mut().write_cmd(1).expect("写入失败");
        ctx.append_render_command(MsgFlags::empty()).expect("写入失败");
        assert!(ctx.flush().expect("提交失败").is_some());
        assert!(ctx.cmdbuf().is_none());
        assert_eq!(ctx.submitted_count(), 1);

        let second = ctx.get_next_cmdbuf().expect("获取失败").command_object().handle();
        assert_ne!(first, second);
    }

    #[test]
    fn test_flush_without_messages_keeps_current() {
        let device = Arc::new(MemoryDevice::new());
        let mut ctx = context(&device);
        ctx.get_next_cmdbuf().expect("获取失败");
        assert!(ctx.flush().expect("提交失败").is_none());
        assert!(ctx.cmdbuf().is_some());
        assert_eq!(device.execute_calls(), 0);
    }

    #[test]
    fn test_render_limit_triggers_flush() {
        let device = Arc::new(MemoryDevice::new());
        let mut ctx = context(&device);
        for i in 0..DEFAULT_MAX_RENDER_MESSAGES {
            ctx.get_next_cmdbuf().expect("获取失败").write_cmd(i).expect("写入失败");
            ctx.append_render_command(MsgFlags::empty()).expect("写入失败");
        }
        assert_eq!(device.submissions().len(), 1);
        assert!(ctx.cmdbuf().is_none());
        let submission = device.last_submission().expect("缺少提交记录");
        assert_eq!(submission.msg_size as usize, 12 * crate::message::RENDER_MSG_SIZE);
    }

    #[test]
    fn test_margin_crossing_flushes_exactly_once() {
        let device = Arc::new(MemoryDevice::new());
        let mut ctx = context(&device);

        // 两段各自留在余量之上, 不触发提交
        for _ in 0..2 {
            let cmdbuf = ctx.get_next_cmdbuf().expect("获取失败");
            cmdbuf.write_cmds(&[0; 0x100]).expect("写入失败");
            ctx.append_render_command(MsgFlags::empty()).expect("写入失败");
        }
        assert!(device.submissions().is_empty());

        // 第三段写到恰好等于余量, 结尾零字使剩余空间低于余量
        let cmdbuf = ctx.get_next_cmdbuf().expect("获取失败");
        while cmdbuf.command_region().remaining() > CMD_MARGIN {
            cmdbuf.write_cmd(0).expect("写入失败");
        }
        ctx.append_render_command(MsgFlags::empty()).expect("写入失败");
        assert_eq!(device.submissions().len(), 1, "越过余量应恰好提交一次");
        assert_eq!(device.last_submission().expect("缺少提交记录").msg_size, 60);

        let cmdbuf = ctx.get_next_cmdbuf().expect("获取失败");
        assert_eq!(cmdbuf.cmd_cursor(), 0, "新命令缓冲区从区域起点开始");
        assert_eq!(cmdbuf.state(), CmdbufState::Building);
        assert_eq!(device.submissions().len(), 1);
    }

    #[test]
    fn test_empty_ring_rejected() {
        let device = Arc::new(MemoryDevice::new());
        let mut config = ContextConfig::for_picture(64, 64);
        config.cmdbuf_count = 0;
        let err = DecodeContext::new(device.clone(), config, DebugContext::disabled())
            .expect_err("空环应失败");
        assert!(matches!(err, VdxError::InvalidArgument(_)), "错误类型: {err:?}");
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_drop_destroys_ring() {
        let device = Arc::new(MemoryDevice::new());
        {
            let _ctx = context(&device);
        }
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.destroyed().len(), 9);
    }
}
