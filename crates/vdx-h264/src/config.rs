//! H.264 解码器配置.

use crate::params::Profile;

/// 二次去块的执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeblockStrategy {
    /// 固件直接读取共位缓冲区中的宏块参数完成去块
    Firmware,
    /// 主机读取宏块参数, 由宏块序列器生成暂存命令流后提交去块
    #[default]
    HostSequenced,
}

/// H.264 解码器配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H264Config {
    pub profile: Profile,
    /// 上下文图像宽度 (像素)
    pub width: u32,
    /// 上下文图像高度 (像素)
    pub height: u32,
    pub deblock: DeblockStrategy,
    /// 备用输出旋转模式, 0 表示不旋转
    pub rotation: u32,
}

impl H264Config {
    pub fn new(profile: Profile, width: u32, height: u32) -> Self {
        Self {
            profile,
            width,
            height,
            deblock: DeblockStrategy::default(),
            rotation: 0,
        }
    }

    /// 图像尺寸是否在档次能力范围内
    pub fn is_legal(&self) -> bool {
        let (max_w, max_h) = self.profile.max_picture_size();
        self.width > 0 && self.width <= max_w && self.height > 0 && self.height <= max_h
    }
}

impl Default for H264Config {
    fn default() -> Self {
        Self::new(Profile::High, 1920, 1088)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_picture_per_profile() {
        assert!(H264Config::new(Profile::Baseline, 720, 576).is_legal());
        assert!(!H264Config::new(Profile::Baseline, 1280, 720).is_legal());
        assert!(H264Config::new(Profile::Main, 1920, 1088).is_legal());
        assert!(!H264Config::new(Profile::High, 0, 64).is_legal());
    }
}
