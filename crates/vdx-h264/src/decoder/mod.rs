//! H.264 条带状态机.
//!
//! 调用顺序固定: `begin_picture` → `set_picture_params` (可选 `set_iq_matrix` /
//! `set_slice_group_map`) → 若干次 `render_slice` → `end_picture`. 每个条带按固定顺序
//! 写入控制头、VLC 跳过块、码流 DMA、前端寄存器块和后端 rendec 块, 最后写入完成
//! 标记和渲染消息. 二次去块模式在图像结束时追加去块消息.

mod finish;
mod picture;
mod slice;

use std::sync::Arc;

use log::{debug, info};
use vdx_cmdbuf::{
    BufferObject, ContextConfig, DecodeContext, Device, FrontendHeader, Placement, ReleaseOutcome,
};
use vdx_core::{DebugContext, VdxError, VdxResult};

use crate::config::H264Config;
use crate::dpb::DpbIndexTable;
use crate::params::{IqMatrix, PictureParams, SurfaceId};
use crate::surface::{Surface, SurfacePool};
use crate::vlc::{VLC_TABLE_BYTES, packed_table_bytes};

/// 前端预载状态 (上下文切换时由固件保存 / 恢复)
const PRELOAD_BYTES: u32 = 0x1000;
/// 帧内参考缓存
const REFERENCE_CACHE_BYTES: u32 = 512 * 1024;

// ============================================================
// 状态
// ============================================================

/// 条带状态机的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// 没有进行中的图像, 或已调用 begin_picture 但尚未提交图像参数
    Idle,
    PictureReady,
    /// 条带预处理完成, 码流 DMA 已写入
    SliceBegin,
    /// 寄存器块与 rendec 块已写入
    SliceParamsBuilt,
    /// 渲染消息已写入
    SliceDispatched,
    PictureEnd,
}

/// 去块方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeblockMode {
    /// 环内去块
    Std,
    /// 条带关闭去块且使用环外去块: 重建写入环内缓冲区, 二次去块输出到主缓冲区
    IntraOold,
}

/// 图像几何
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub width_mb: u32,
    pub height_mb: u32,
    pub size_mb: u32,
    /// 色度宏块宽 / 高 (单色为 0)
    pub mb_width_c: u32,
    pub mb_height_c: u32,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub colocated_size: u32,
}

impl Geometry {
    pub fn from_params(params: &PictureParams) -> Self {
        let width_mb = params.picture_width_in_mbs_minus1 + 1;
        let height_mb = params.picture_height_in_mbs_minus1 + 1;
        let size_mb = width_mb * height_mb;
        let (mb_width_c, mb_height_c) = match params.chroma_format_idc {
            0 => (0, 0),
            1 => (8, 8),
            2 => (8, 16),
            _ => (16, 16),
        };
        Self {
            width_mb,
            height_mb,
            size_mb,
            mb_width_c,
            mb_height_c,
            bit_depth_luma: 8 + params.bit_depth_luma_minus8 as u32,
            bit_depth_chroma: 8 + params.bit_depth_chroma_minus8 as u32,
            colocated_size: colocated_size(size_mb),
        }
    }
}

/// 共位缓冲区大小: 每宏块 128 字节另加 100 个宏块余量, 按 4 KiB 对齐
pub fn colocated_size(size_mb: u32) -> u32 {
    ((size_mb + 100) * 128 + 0xfff) & !0xfff
}

/// 进行中的条带 (跨越分段提交)
#[derive(Debug, Clone, Copy)]
pub(crate) struct SliceProgress {
    pub header: FrontendHeader,
    pub first_mb_x: u32,
    pub first_mb_y: u32,
    pub slice0: u32,
    pub slice1: u32,
}

/// 当前图像的状态
#[derive(Debug)]
pub(crate) struct PictureState {
    pub target: SurfaceId,
    pub params: Option<PictureParams>,
    pub iq_matrix: Option<IqMatrix>,
    pub slice_group_map: Option<BufferObject>,
    pub geometry: Geometry,
    pub field_type: u32,
    pub mbaff: bool,
    pub two_pass: bool,
    pub deblock_mode: DeblockMode,
    pub reg_sps0: u32,
    pub reg_pps0: u32,
    pub reg_pic0: u32,
    pub operating_mode: u32,
    pub slice_count: u32,
    pub slice: Option<SliceProgress>,
    /// 最后一个条带的 list0 首项与条带类型, 用于选择错误隐藏来源
    pub last_list0_head: Option<SurfaceId>,
    pub last_slice_is_b: bool,
    /// 本图像是否允许错误隐藏
    pub error_concealment: bool,
}

impl PictureState {
    fn new(target: SurfaceId, error_concealment: bool) -> Self {
        Self {
            target,
            params: None,
            iq_matrix: None,
            slice_group_map: None,
            geometry: Geometry::default(),
            field_type: 2,
            mbaff: false,
            two_pass: false,
            deblock_mode: DeblockMode::Std,
            reg_sps0: 0,
            reg_pps0: 0,
            reg_pic0: 0,
            operating_mode: 0,
            slice_count: 0,
            slice: None,
            last_list0_head: None,
            last_slice_is_b: false,
            error_concealment,
        }
    }

    pub fn params(&self) -> &PictureParams {
        self.params.as_ref().expect("尚未提交图像参数")
    }
}

// ============================================================
// 解码器
// ============================================================

/// H.264 解码器
pub struct H264Decoder {
    ctx: DecodeContext,
    config: H264Config,
    surfaces: SurfacePool,
    dpb: DpbIndexTable,
    preload: BufferObject,
    reference_cache: BufferObject,
    vlc_table: BufferObject,
    state: DecodeState,
    picture: Option<PictureState>,
    /// 最近一幅非 B 图像, 下一幅 I 图像从它隐藏错误
    ec_candidate: Option<SurfaceId>,
}

impl H264Decoder {
    /// 创建解码器
    ///
    /// 图像尺寸超出档次能力时返回 [`VdxError::Unsupported`].
    pub fn new(
        device: Arc<dyn Device>,
        config: H264Config,
        ctx_config: ContextConfig,
        debug: DebugContext,
    ) -> VdxResult<Self> {
        if !config.is_legal() {
            return Err(VdxError::Unsupported(format!(
                "{:?} 档次不支持 {}x{} 图像",
                config.profile, config.width, config.height
            )));
        }
        let ctx = DecodeContext::new(device.clone(), ctx_config, debug)?;

        let preload = device.create_buffer(PRELOAD_BYTES, Placement::VPU_ONLY)?;
        let reference_cache = device.create_buffer(REFERENCE_CACHE_BYTES, Placement::VPU_ONLY)?;
        let vlc_table = device.create_buffer(VLC_TABLE_BYTES, Placement::CPU_MAPPABLE)?;
        device.write_buffer(&vlc_table, 0, &packed_table_bytes())?;

        info!(
            "H.264 解码器: {:?} {}x{}, 去块 {:?}, 环外去块 {}, 错误隐藏 {}",
            config.profile,
            config.width,
            config.height,
            config.deblock,
            ctx_config.is_oold,
            ctx_config.error_concealment
        );
        Ok(Self {
            ctx,
            config,
            surfaces: SurfacePool::new(),
            dpb: DpbIndexTable::new(),
            preload,
            reference_cache,
            vlc_table,
            state: DecodeState::Idle,
            picture: None,
            ec_candidate: None,
        })
    }

    pub fn config(&self) -> &H264Config {
        &self.config
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn context(&self) -> &DecodeContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DecodeContext {
        &mut self.ctx
    }

    pub fn dpb(&self) -> &DpbIndexTable {
        &self.dpb
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(id)
    }

    /// 当前图像的几何, 提交图像参数之前为 None
    pub fn geometry(&self) -> Option<Geometry> {
        self.picture
            .as_ref()
            .filter(|p| p.params.is_some())
            .map(|p| p.geometry)
    }

    /// 当前图像是否进入二次去块模式
    pub fn two_pass(&self) -> bool {
        self.picture.as_ref().is_some_and(|p| p.two_pass)
    }

    // ============================================================
    // 表面
    // ============================================================

    /// 分配解码表面; 环外去块时附带环内缓冲区, 配置旋转时附带旋转输出
    pub fn create_surface(&mut self, id: SurfaceId, width: u32, height: u32) -> VdxResult<()> {
        if self.surfaces.contains(id) {
            return Err(VdxError::InvalidArgument(format!("表面 {id} 已存在")));
        }
        let surface = Surface::create(
            self.ctx.device().as_ref(),
            id,
            width,
            height,
            self.ctx.config().is_oold,
            self.config.rotation,
        )?;
        self.surfaces.insert(surface);
        Ok(())
    }

    /// 销毁表面并释放其 DPB 槽位
    pub fn destroy_surface(&mut self, id: SurfaceId) -> VdxResult<()> {
        assert!(
            self.picture.as_ref().is_none_or(|p| p.target != id)
                || self.state == DecodeState::PictureEnd,
            "不能销毁正在解码的表面 {id}"
        );
        let surface = self
            .surfaces
            .remove(id)
            .ok_or_else(|| VdxError::InvalidArgument(format!("表面 {id} 不存在")))?;
        self.dpb.forget(id);
        if self.ec_candidate == Some(id) {
            self.ec_candidate = None;
        }
        surface.destroy(self.ctx.device().as_ref());
        debug!("销毁表面 {}", id);
        Ok(())
    }

    // ============================================================
    // 图像开始
    // ============================================================

    /// 开始一幅图像, target 为解码目标表面
    pub fn begin_picture(&mut self, target: SurfaceId) -> VdxResult<()> {
        assert!(
            matches!(self.state, DecodeState::Idle | DecodeState::PictureEnd),
            "上一幅图像尚未结束 (状态 {:?})",
            self.state
        );
        if !self.surfaces.contains(target) {
            return Err(VdxError::InvalidArgument(format!("目标表面 {target} 不存在")));
        }
        debug!("开始图像: 目标表面 {}", target);
        let error_concealment = self.ctx.config().error_concealment;
        self.picture = Some(PictureState::new(target, error_concealment));
        self.state = DecodeState::Idle;
        Ok(())
    }

    fn picture_mut(&mut self) -> &mut PictureState {
        self.picture.as_mut().expect("没有进行中的图像")
    }
}

impl Drop for H264Decoder {
    fn drop(&mut self) {
        let device = self.ctx.device().clone();
        self.surfaces.destroy_all(device.as_ref());
        for object in [&self.preload, &self.reference_cache, &self.vlc_table] {
            if object.release() == ReleaseOutcome::Destroy {
                device.destroy_buffer(object);
            }
        }
        if let Some(map) = self.picture.as_mut().and_then(|p| p.slice_group_map.take()) {
            if map.release() == ReleaseOutcome::Destroy {
                device.destroy_buffer(&map);
            }
        }
    }
}

impl std::fmt::Debug for H264Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H264Decoder")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("surfaces", &self.surfaces.len())
            .field("dpb", &self.dpb)
            .finish()
    }
}
