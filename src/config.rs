//! 驱动配置.
//!
//! 配置以 JSON 保存, 缺省字段取默认值. 加载后转换为命令缓冲区上下文配置、
//! H.264 解码器配置和调试上下文.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use vdx_cmdbuf::ContextConfig;
use vdx_core::{DebugContext, TraceLevel, TraceSink};
use vdx_h264::{DeblockStrategy, H264Config, Profile};

use crate::logging::LoggingConfig;

/// 二次去块执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeblockSetting {
    Firmware,
    #[default]
    HostSequenced,
}

impl From<DeblockSetting> for DeblockStrategy {
    fn from(value: DeblockSetting) -> Self {
        match value {
            DeblockSetting::Firmware => DeblockStrategy::Firmware,
            DeblockSetting::HostSequenced => DeblockStrategy::HostSequenced,
        }
    }
}

/// 命令流转储
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TraceConfig {
    /// 转储文件路径, 为空时不转储
    #[serde(default)]
    pub sink: Option<PathBuf>,
    /// [`TraceLevel`] 位掩码
    #[serde(default)]
    pub level: u32,
}

impl TraceConfig {
    pub fn sink(&self) -> TraceSink {
        match &self.sink {
            Some(path) => TraceSink::File(path.clone()),
            None => TraceSink::None,
        }
    }

    pub fn level(&self) -> TraceLevel {
        TraceLevel::from_bits_truncate(self.level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DriverConfig {
    /// 关闭去块的条带改走环外去块
    #[serde(default)]
    pub is_oold: bool,
    #[serde(default)]
    pub error_concealment: bool,
    #[serde(default)]
    pub deblock: DeblockSetting,
    /// 备用输出旋转模式 (0..=3)
    #[serde(default)]
    pub rotation: u32,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    #[serde(default = "default_cmdbuf_count")]
    pub cmdbuf_count: usize,
    #[serde(default = "default_max_render_messages")]
    pub max_render_messages: u32,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

fn default_submit_timeout_ms() -> u64 {
    990
}

fn default_cmdbuf_count() -> usize {
    10
}

fn default_max_render_messages() -> u32 {
    12
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            is_oold: false,
            error_concealment: false,
            deblock: DeblockSetting::default(),
            rotation: 0,
            submit_timeout_ms: default_submit_timeout_ms(),
            cmdbuf_count: default_cmdbuf_count(),
            max_render_messages: default_max_render_messages(),
            trace: TraceConfig::default(),
            logging: None,
        }
    }
}

impl DriverConfig {
    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取驱动配置失败, path={}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("驱动配置无效, path={}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("解析驱动配置 JSON 失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).context("序列化驱动配置失败")?;
        std::fs::write(path, text)
            .with_context(|| format!("写入驱动配置失败, path={}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.rotation <= 3, "旋转模式 {} 超出 0..=3", self.rotation);
        anyhow::ensure!(self.cmdbuf_count > 0, "命令缓冲区数量不能为 0");
        anyhow::ensure!(
            self.max_render_messages > 0,
            "每个命令缓冲区的渲染消息上限不能为 0"
        );
        Ok(())
    }

    /// 指定图像尺寸的上下文配置
    pub fn context_config(&self, width: u32, height: u32) -> ContextConfig {
        ContextConfig {
            is_oold: self.is_oold,
            error_concealment: self.error_concealment,
            submit_timeout: Duration::from_millis(self.submit_timeout_ms),
            max_render_messages: self.max_render_messages,
            cmdbuf_count: self.cmdbuf_count,
            ..ContextConfig::for_picture(width, height)
        }
    }

    pub fn h264_config(&self, profile: Profile, width: u32, height: u32) -> H264Config {
        H264Config {
            deblock: self.deblock.into(),
            rotation: self.rotation,
            ..H264Config::new(profile, width, height)
        }
    }

    /// 按转储配置打开调试上下文
    pub fn debug_context(&self) -> Result<DebugContext> {
        DebugContext::open(&self.trace.sink(), self.trace.level()).context("打开命令流转储失败")
    }
}
