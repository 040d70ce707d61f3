//! # vdx-h264
//!
//! VDX H.264 条带级解码驱动: 把调用方已解析的图像 / 条带参数翻译为固件命令流,
//! 管理解码表面与 DPB 槽位, 并在二次去块模式下由主机读取宏块参数生成去块命令.
//!
//! ## 使用示例
//!
//! ```rust
//! use std::sync::Arc;
//! use vdx_cmdbuf::{ContextConfig, Device, MemoryDevice, Placement};
//! use vdx_core::DebugContext;
//! use vdx_h264::{H264Config, H264Decoder, PictureParams, PictureRef, Profile, SliceParams};
//!
//! let device = Arc::new(MemoryDevice::new());
//! let mut decoder = H264Decoder::new(
//!     device.clone(),
//!     H264Config::new(Profile::High, 64, 64),
//!     ContextConfig::for_picture(64, 64),
//!     DebugContext::disabled(),
//! )
//! .unwrap();
//! decoder.create_surface(0, 64, 64).unwrap();
//!
//! let bitstream = device.create_buffer(0x1000, Placement::CPU_MAPPABLE).unwrap();
//! decoder.begin_picture(0).unwrap();
//! decoder
//!     .set_picture_params(PictureParams {
//!         curr_pic: PictureRef::frame(0, 0),
//!         picture_width_in_mbs_minus1: 3,
//!         picture_height_in_mbs_minus1: 3,
//!         ..PictureParams::default()
//!     })
//!     .unwrap();
//! let slice = SliceParams {
//!     slice_data_size: 0x100,
//!     ..SliceParams::default()
//! };
//! decoder.render_slice(&slice, &bitstream).unwrap();
//! decoder.end_picture().unwrap();
//! assert_eq!(device.submissions().len(), 1);
//! ```

pub mod config;
pub mod decoder;
pub mod dpb;
pub mod params;
pub mod regs;
pub mod sequencer;
pub mod surface;
pub mod vlc;

// 重导出常用类型
pub use config::{DeblockStrategy, H264Config};
pub use decoder::{DecodeState, Geometry, H264Decoder, colocated_size};
pub use dpb::DpbIndexTable;
pub use params::{
    IqMatrix, PictureFlags, PictureParams, PictureRef, PredWeightTable, Profile, SliceDataFlag,
    SliceParams, SliceType, SurfaceId, WeightEntry,
};
pub use sequencer::{MacroblockRecord, MacroblockSequencer, second_pass};
pub use surface::{StrideMode, Surface};
