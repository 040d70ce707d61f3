//! 统一错误类型定义.
//!
//! 所有 VDX crate 共用的错误类型, 支持跨模块传播.

use thiserror::Error;

/// VDX 统一错误类型
#[derive(Debug, Error)]
pub enum VdxError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 区域空间不足, 写入会越界
    #[error("区域 {region} 空间不足: 需要 {requested} 字节, 剩余 {remaining} 字节")]
    WouldOverflow {
        region: &'static str,
        requested: usize,
        remaining: usize,
    },

    /// 内存分配失败
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 缓冲区映射失败
    #[error("缓冲区映射失败: {0}")]
    MapFailed(String),

    /// 设备持续忙, 重试超时
    #[error("设备忙, 重试 {elapsed_ms} ms 后放弃")]
    DeviceTimeout { elapsed_ms: u64 },

    /// 设备调用失败
    #[error("设备调用失败: 错误码 {0}")]
    Device(i32),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 无效数据
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// VDX 统一 Result 类型
pub type VdxResult<T> = Result<T, VdxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_overflow_message() {
        let err = VdxError::WouldOverflow {
            region: "cmd",
            requested: 8,
            remaining: 4,
        };
        let text = err.to_string();
        assert!(text.contains("cmd"), "错误信息应包含区域名: {text}");
        assert!(text.contains('8') && text.contains('4'));
    }

    #[test]
    fn test_io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: VdxError = io.into();
        assert!(matches!(err, VdxError::Io(_)));
    }
}
