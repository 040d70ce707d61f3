//! 解码表面.
//!
//! 表面是 NV12 布局的设备对象: 亮度平面位于偏移 0, 交织色度平面位于
//! `stride * height`. 除像素外, 表面还记录解码状态: DPB 槽位、共位图像参数、
//! 共位 (宏块参数) 缓冲区与作为参考时使用的缓冲区.

use std::collections::HashMap;

use log::debug;
use vdx_cmdbuf::{BufferObject, Device, PlaneRef, Placement, ReleaseOutcome};
use vdx_core::{VdxError, VdxResult};

use crate::params::SurfaceId;

/// 行跨度模式, 写入操作模式寄存器的 ROW_STRIDE 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StrideMode {
    S512 = 0,
    S1024 = 1,
    S2048 = 2,
    S4096 = 3,
    S1280 = 4,
    /// 非标准跨度, 只能通过扩展行跨度寄存器描述
    Extended = 7,
}

impl StrideMode {
    /// 按宽度选择跨度
    pub fn for_width(width: u32) -> (Self, u32) {
        match width {
            0..=512 => (Self::S512, 512),
            513..=1024 => (Self::S1024, 1024),
            1025..=1280 => (Self::S1280, 1280),
            1281..=2048 => (Self::S2048, 2048),
            2049..=4096 => (Self::S4096, 4096),
            _ => (Self::Extended, (width + 0x3f) & !0x3f),
        }
    }

    pub fn bits(self) -> u32 {
        self as u32
    }
}

/// 解码表面
#[derive(Debug)]
pub struct Surface {
    id: SurfaceId,
    width: u32,
    height: u32,
    stride: u32,
    stride_mode: StrideMode,
    chroma_offset: u32,
    buffer: BufferObject,
    /// 环外去块时固件写入的环内重建结果
    in_loop: Option<BufferObject>,
    /// 旋转备用输出
    rotated: Option<BufferObject>,
    rotation: u32,

    /// 该表面在 DPB 中的槽位
    pub(crate) dpb_idx: Option<u8>,
    /// 作为共位图像时的参数 (非帧 / MBAFF)
    pub(crate) col_pic_params: u32,
    pub(crate) colocated: Option<BufferObject>,
    /// 作为参考时固件读取的缓冲区
    pub(crate) ref_buf: Option<BufferObject>,
}

impl Surface {
    /// 分配表面; with_in_loop 额外分配环内缓冲区, rotation 非零时分配旋转输出
    pub fn create(
        device: &dyn Device,
        id: SurfaceId,
        width: u32,
        height: u32,
        with_in_loop: bool,
        rotation: u32,
    ) -> VdxResult<Self> {
        if width == 0 || height == 0 || width * height > 5120 * 5120 {
            return Err(VdxError::InvalidArgument(format!(
                "表面尺寸 {width}x{height} 无效"
            )));
        }
        let (stride_mode, stride) = StrideMode::for_width(width);
        let chroma_offset = stride * height;
        let size = stride * height * 3 / 2;
        let buffer = device.create_buffer(size, Placement::CPU_MAPPABLE)?;
        let in_loop = if with_in_loop {
            Some(device.create_buffer(size, Placement::VPU_ONLY)?)
        } else {
            None
        };
        let rotated = if rotation != 0 {
            Some(device.create_buffer(size, Placement::CPU_MAPPABLE)?)
        } else {
            None
        };
        debug!(
            "表面 {}: {}x{} 跨度 {} ({:?}), {}",
            id,
            width,
            height,
            stride,
            stride_mode,
            buffer.handle()
        );
        Ok(Self {
            id,
            width,
            height,
            stride,
            stride_mode,
            chroma_offset,
            buffer,
            in_loop,
            rotated,
            rotation,
            dpb_idx: None,
            col_pic_params: 0,
            colocated: None,
            ref_buf: None,
        })
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn stride_mode(&self) -> StrideMode {
        self.stride_mode
    }

    pub fn chroma_offset(&self) -> u32 {
        self.chroma_offset
    }

    pub fn size(&self) -> u32 {
        self.buffer.size()
    }

    pub fn buffer(&self) -> &BufferObject {
        &self.buffer
    }

    pub fn in_loop(&self) -> Option<&BufferObject> {
        self.in_loop.as_ref()
    }

    pub fn rotated(&self) -> Option<&BufferObject> {
        self.rotated.as_ref()
    }

    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    pub fn dpb_idx(&self) -> Option<u8> {
        self.dpb_idx
    }

    pub fn colocated(&self) -> Option<&BufferObject> {
        self.colocated.as_ref()
    }

    pub fn ref_buf(&self) -> Option<&BufferObject> {
        self.ref_buf.as_ref()
    }

    /// 主缓冲区的平面对
    pub fn plane(&self) -> PlaneRef<'_> {
        PlaneRef {
            object: &self.buffer,
            offset: 0,
            chroma_offset: self.chroma_offset,
        }
    }

    pub fn in_loop_plane(&self) -> Option<PlaneRef<'_>> {
        self.in_loop.as_ref().map(|object| PlaneRef {
            object,
            offset: 0,
            chroma_offset: self.chroma_offset,
        })
    }

    pub fn rotated_plane(&self) -> Option<PlaneRef<'_>> {
        self.rotated.as_ref().map(|object| PlaneRef {
            object,
            offset: 0,
            chroma_offset: self.chroma_offset,
        })
    }

    /// 首次作为解码目标时分配共位缓冲区
    pub(crate) fn ensure_colocated(&mut self, device: &dyn Device, size: u32) -> VdxResult<()> {
        if self.colocated.is_none() {
            debug!("表面 {}: 分配共位缓冲区 {:#x} 字节", self.id, size);
            self.colocated = Some(device.create_buffer(size, Placement::CPU_MAPPABLE)?);
        }
        Ok(())
    }

    /// 用常量填充色度平面 (单色码流)
    pub fn set_chroma(&self, device: &dyn Device, value: u8) -> VdxResult<()> {
        let len = (self.stride * self.height / 2) as usize;
        device.write_buffer(&self.buffer, self.chroma_offset, &vec![value; len])
    }

    /// 释放所有设备对象; 仍在排队的对象推迟到提交对账时销毁
    pub fn destroy(self, device: &dyn Device) {
        let objects = [Some(self.buffer), self.in_loop, self.rotated, self.colocated];
        for object in objects.into_iter().flatten() {
            if object.release() == ReleaseOutcome::Destroy {
                device.destroy_buffer(&object);
            }
        }
    }
}

// ============================================================
// 表面池
// ============================================================

/// 按标识索引的表面集合
#[derive(Debug, Default)]
pub struct SurfacePool {
    surfaces: HashMap<SurfaceId, Surface>,
}

impl SurfacePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, surface: Surface) {
        let id = surface.id();
        assert!(!self.surfaces.contains_key(&id), "表面 {id} 已存在");
        self.surfaces.insert(id, surface);
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.get_mut(&id)
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.surfaces.contains_key(&id)
    }

    pub fn remove(&mut self, id: SurfaceId) -> Option<Surface> {
        self.surfaces.remove(&id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Surface> + '_ {
        self.surfaces.values_mut()
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn destroy_all(&mut self, device: &dyn Device) {
        for (_, surface) in self.surfaces.drain() {
            surface.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdx_cmdbuf::MemoryDevice;

    #[test]
    fn test_stride_selection() {
        assert_eq!(StrideMode::for_width(176), (StrideMode::S512, 512));
        assert_eq!(StrideMode::for_width(1280), (StrideMode::S1280, 1280));
        assert_eq!(StrideMode::for_width(1920), (StrideMode::S2048, 2048));
        assert_eq!(StrideMode::for_width(4100), (StrideMode::Extended, 4160));
    }

    #[test]
    fn test_surface_layout_and_destroy() {
        let device = MemoryDevice::new();
        let surface = Surface::create(&device, 7, 64, 32, true, 0).expect("创建表面失败");
        assert_eq!(surface.chroma_offset(), 512 * 32);
        assert_eq!(surface.size(), 512 * 32 * 3 / 2);
        assert!(surface.in_loop().is_some());
        assert!(surface.rotated().is_none());
        assert_eq!(device.live_buffers(), 2);
        surface.destroy(&device);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_set_chroma_fills_plane() {
        let device = MemoryDevice::new();
        let surface = Surface::create(&device, 1, 16, 16, false, 0).expect("创建表面失败");
        surface.set_chroma(&device, 128).expect("填充色度失败");
        let chroma = device
            .read_buffer(surface.buffer(), surface.chroma_offset(), 16)
            .expect("读取失败");
        assert!(chroma.iter().all(|&v| v == 128));
        let luma = device.read_buffer(surface.buffer(), 0, 16).expect("读取失败");
        assert!(luma.iter().all(|&v| v == 0));
    }
}
