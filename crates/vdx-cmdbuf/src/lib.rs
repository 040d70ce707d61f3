//! # vdx-cmdbuf
//!
//! VDX 命令缓冲区库: 区域分配、缓冲区引用表、重定位、寄存器 / rendec / 跳过块构建、
//! DMA 命令、固件消息以及带忙重试的提交协议.
//!
//! ## 使用示例
//!
//! ```rust
//! use std::sync::Arc;
//! use vdx_cmdbuf::{ContextConfig, DecodeContext, MemoryDevice, MsgFlags, RegBlockFlags};
//! use vdx_core::DebugContext;
//!
//! let device = Arc::new(MemoryDevice::new());
//! let mut ctx = DecodeContext::new(
//!     device.clone(),
//!     ContextConfig::for_picture(64, 64),
//!     DebugContext::disabled(),
//! )
//! .unwrap();
//!
//! let cmdbuf = ctx.get_next_cmdbuf().unwrap();
//! cmdbuf.reg_start_block(RegBlockFlags::empty());
//! cmdbuf.reg_set(0x0600, 1).unwrap();
//! cmdbuf.reg_end_block();
//! ctx.append_render_command(MsgFlags::FIRST_SLICE).unwrap();
//! ctx.flush().unwrap();
//! assert_eq!(device.submissions().len(), 1);
//! ```

pub mod buffer;
pub mod builder;
pub mod cmdbuf;
pub mod command;
pub mod context;
pub mod device;
pub mod dma;
pub mod message;
pub mod reference;
pub mod region;
pub mod reloc;
pub mod staging;
pub mod submit;

// 重导出常用类型
pub use buffer::{BufferObject, BufferStatus, DeviceHandle, Placement, ReleaseOutcome};
pub use cmdbuf::{CmdbufState, CommandBuffer, WordSlot};
pub use command::{DmaType, RegBlockFlags, SrFlags};
pub use context::{ContextConfig, DecodeContext};
pub use device::{Device, DeviceError, MemoryDevice, Submission};
pub use dma::FrontendHeader;
pub use message::{
    DeblockParams, FrameInfoParams, HostBeOppParams, MessageContext, MsgFlags, MsgType, PlaneRef,
};
pub use region::RegionSizes;
pub use reloc::{RELOC_UNRESOLVED, RelocDest, RelocMode, RelocationRecord};
pub use submit::{SubmitOutcome, SubmitParams};
