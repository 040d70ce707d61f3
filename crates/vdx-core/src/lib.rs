//! # vdx-core
//!
//! VDX 核心库, 提供错误类型、硬件字段描述符和解码会话调试上下文.

pub mod debug;
pub mod error;
pub mod field;

// 重导出常用类型
pub use debug::{DebugContext, DebugCounters, TraceLevel, TraceSink};
pub use error::{VdxError, VdxResult};
pub use field::{FieldDescriptor, read_field, write_field};
