//! # VDX
//!
//! VDX 视频解码加速器的用户态命令流驱动.
//!
//! 驱动把调用方已经解析好的 H.264 图像 / 条带参数翻译为固件命令流: 寄存器块、
//! rendec 块、码流 DMA 和固件消息, 在提交时解析缓冲区重定位, 并在二次去块模式下
//! 读回宏块参数生成去块命令.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vdx::cmdbuf::MemoryDevice;
//! use vdx::config::DriverConfig;
//! use vdx::h264::Profile;
//!
//! let config = DriverConfig::load("vdx.json").unwrap();
//! let device = Arc::new(MemoryDevice::new());
//! let decoder = vdx::open_decoder(device, &config, Profile::High, 1920, 1088).unwrap();
//! println!("{decoder:?}");
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `vdx-core` | 错误类型、字段描述符、调试上下文 |
//! | `vdx-cmdbuf` | 命令缓冲区、重定位、固件消息与提交协议 |
//! | `vdx-h264` | H.264 条带状态机与二次去块宏块序列器 |

use std::sync::Arc;

use anyhow::{Context, Result};

pub mod config;
pub mod logging;

/// 核心类型与工具
pub use vdx_core as core;

/// 命令缓冲区与设备接口
pub use vdx_cmdbuf as cmdbuf;

/// H.264 解码
pub use vdx_h264 as h264;

/// 获取驱动版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 按驱动配置创建 H.264 解码器
pub fn open_decoder(
    device: Arc<dyn vdx_cmdbuf::Device>,
    config: &config::DriverConfig,
    profile: vdx_h264::Profile,
    width: u32,
    height: u32,
) -> Result<vdx_h264::H264Decoder> {
    let debug = config.debug_context()?;
    vdx_h264::H264Decoder::new(
        device,
        config.h264_config(profile, width, height),
        config.context_config(width, height),
        debug,
    )
    .with_context(|| format!("创建 {profile:?} {width}x{height} 解码器失败"))
}
