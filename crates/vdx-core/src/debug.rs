//! 解码会话调试上下文.
//!
//! 计数器与命令流转储的生命周期限定在一个解码会话内, 由调用方显式传入,
//! 转储目标 (文件或关闭) 由配置决定.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use bitflags::bitflags;
use log::warn;

use crate::error::VdxResult;

bitflags! {
    /// 转储内容选择
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TraceLevel: u32 {
        /// 固件消息与命令段
        const CMDMSG = 1 << 0;
        /// 链式 DMA 描述符
        const LLDMA = 1 << 1;
        /// 重定位记录
        const RELOC = 1 << 2;
        /// 二次去块暂存区
        const REGIO = 1 << 3;
    }
}

/// 转储目标
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TraceSink {
    /// 不转储
    #[default]
    None,
    /// 转储到文件 (覆盖写)
    File(PathBuf),
}

/// 会话级计数器
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugCounters {
    /// 获取过的命令缓冲区次数
    pub cmdbufs: u64,
    /// 渲染消息数
    pub render_messages: u64,
    /// 去块 / 隐藏消息数
    pub deblock_messages: u64,
    /// 链式 DMA 描述符数
    pub lldma_records: u64,
    /// 重定位记录数
    pub relocations: u64,
    /// 设备提交次数
    pub flushes: u64,
    /// 设备忙导致的重试次数
    pub busy_retries: u64,
    /// 已转储的字数
    pub dumped_words: u64,
}

/// 调试上下文
pub struct DebugContext {
    level: TraceLevel,
    writer: Option<BufWriter<File>>,
    counters: DebugCounters,
}

impl DebugContext {
    /// 不转储, 只计数
    pub fn disabled() -> Self {
        Self {
            level: TraceLevel::empty(),
            writer: None,
            counters: DebugCounters::default(),
        }
    }

    /// 按配置打开转储目标
    pub fn open(sink: &TraceSink, level: TraceLevel) -> VdxResult<Self> {
        let writer = match sink {
            TraceSink::None => None,
            TraceSink::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Some(BufWriter::new(File::create(path)?))
            }
        };
        Ok(Self {
            level: if writer.is_some() {
                level
            } else {
                TraceLevel::empty()
            },
            writer,
            counters: DebugCounters::default(),
        })
    }

    /// 指定内容是否需要转储
    pub fn enabled(&self, level: TraceLevel) -> bool {
        self.writer.is_some() && self.level.contains(level)
    }

    pub fn counters(&self) -> &DebugCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut DebugCounters {
        &mut self.counters
    }

    /// 写一行转储文本
    pub fn trace(&mut self, level: TraceLevel, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.write_fmt(args).and_then(|_| writer.write_all(b"\n")) {
                warn!("写入转储失败, 关闭转储: {}", err);
                self.writer = None;
            }
        }
    }

    /// 以 `偏移: 字` 的形式转储一段命令字
    pub fn dump_words(&mut self, level: TraceLevel, label: &str, base: usize, words: &[u32]) {
        if !self.enabled(level) {
            return;
        }
        self.trace(level, format_args!("{} ({} words)", label, words.len()));
        for (i, word) in words.iter().enumerate() {
            self.trace(level, format_args!("  {:08x}: {:08x}", base + i * 4, word));
        }
        self.counters.dumped_words += words.len() as u64;
    }

    /// 刷新缓冲写入
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                warn!("刷新转储失败: {}", err);
            }
        }
    }
}

impl Default for DebugContext {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for DebugContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugContext")
            .field("level", &self.level)
            .field("sink_open", &self.writer.is_some())
            .field("counters", &self.counters)
            .finish()
    }
}

impl Drop for DebugContext {
    fn drop(&mut self) {
        self.flush();
    }
}
