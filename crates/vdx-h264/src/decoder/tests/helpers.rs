use std::sync::Arc;

use vdx_cmdbuf::command::RendecHeader;
use vdx_cmdbuf::message::MSG_ID;
use vdx_cmdbuf::{BufferObject, ContextConfig, Device, MemoryDevice, MsgType, Placement, Submission};
use vdx_core::DebugContext;
use vdx_core::field::read_record_field;

pub use crate::config::{DeblockStrategy, H264Config};
pub use crate::params::{PictureParams, PictureRef, Profile, SliceDataFlag, SliceParams, SurfaceId};

pub use super::super::{DecodeState, H264Decoder};

/// 测试图像: 64x64, 4x4 宏块
pub const TEST_WIDTH: u32 = 64;
pub const TEST_HEIGHT: u32 = 64;
pub const TEST_BITSTREAM_BYTES: u32 = 0x1000;

pub const SENTINEL: u32 = 0xdead_beef;

pub struct Harness {
    pub device: Arc<MemoryDevice>,
    pub decoder: H264Decoder,
    pub bitstream: BufferObject,
}

pub fn build_test_harness() -> Harness {
    build_test_harness_with(|_, _| {})
}

/// setup 可以在创建解码器前修改解码器配置与上下文配置
pub fn build_test_harness_with(setup: impl FnOnce(&mut H264Config, &mut ContextConfig)) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = Arc::new(MemoryDevice::new());
    let mut config = H264Config::new(Profile::High, TEST_WIDTH, TEST_HEIGHT);
    let mut ctx_config = ContextConfig::for_picture(TEST_WIDTH, TEST_HEIGHT);
    setup(&mut config, &mut ctx_config);

    let decoder = H264Decoder::new(
        device.clone() as Arc<dyn Device>,
        config,
        ctx_config,
        DebugContext::disabled(),
    )
    .expect("创建解码器失败");
    let bitstream = device
        .create_buffer(TEST_BITSTREAM_BYTES, Placement::CPU_MAPPABLE)
        .expect("创建码流对象失败");
    device
        .write_buffer(&bitstream, 0, &[0x65, 0x88, 0x84, 0x00, 0x33, 0xff])
        .expect("写入码流失败");
    Harness {
        device,
        decoder,
        bitstream,
    }
}

impl Harness {
    pub fn create_surfaces(&mut self, ids: &[SurfaceId]) {
        for &id in ids {
            self.decoder
                .create_surface(id, TEST_WIDTH, TEST_HEIGHT)
                .expect("创建表面失败");
        }
    }

    pub fn last_submission(&self) -> Submission {
        self.device.last_submission().expect("没有任何提交")
    }

    /// 表面主缓冲区的设备地址
    pub fn surface_address(&self, id: SurfaceId) -> u32 {
        let surface = self.decoder.surface(id).expect("表面不存在");
        self.device
            .gpu_offset(surface.buffer().handle())
            .expect("表面未分配") as u32
    }

    /// 以单条带解码一幅图像
    pub fn decode_picture(&mut self, params: PictureParams, slice: &SliceParams) {
        let target = params.curr_pic.surface;
        self.decoder.begin_picture(target).expect("开始图像失败");
        self.decoder
            .set_picture_params(params)
            .expect("提交图像参数失败");
        self.decoder
            .render_slice(slice, &self.bitstream)
            .expect("提交条带失败");
        self.decoder.end_picture().expect("结束图像失败");
    }

    pub fn decode_intra(&mut self, target: SurfaceId, poc: i32) {
        self.decode_picture(build_test_picture(target, poc), &build_test_slice(2));
    }
}

/// 4x4 宏块的逐行帧, 不带参考
pub fn build_test_picture(target: SurfaceId, poc: i32) -> PictureParams {
    PictureParams {
        curr_pic: PictureRef::frame(target, poc),
        picture_width_in_mbs_minus1: TEST_WIDTH / 16 - 1,
        picture_height_in_mbs_minus1: TEST_HEIGHT / 16 - 1,
        ..PictureParams::default()
    }
}

/// 以 (表面, POC) 列表填充参考帧数组
pub fn with_references(mut params: PictureParams, references: &[(SurfaceId, i32)]) -> PictureParams {
    for (i, &(surface, poc)) in references.iter().enumerate() {
        params.reference_frames[i] = PictureRef::frame(surface, poc);
    }
    params.num_ref_frames = references.len() as u32;
    params
}

/// 码流中的 slice_type 为 raw 的完整条带
pub fn build_test_slice(raw_type: u8) -> SliceParams {
    SliceParams {
        slice_data_size: 0x100,
        slice_data_bit_offset: 24,
        slice_type: raw_type,
        ..SliceParams::default()
    }
}

/// 以 (表面, POC) 列表填充 list0
pub fn with_list0(mut slice: SliceParams, list: &[(SurfaceId, i32)]) -> SliceParams {
    for (i, &(surface, poc)) in list.iter().enumerate() {
        slice.ref_pic_list0[i] = PictureRef::frame(surface, poc);
    }
    slice.num_ref_idx_l0_active_minus1 = list.len().saturating_sub(1) as u32;
    slice
}

/// 按消息头中的大小遍历消息, 返回各消息的类型
pub fn message_types(submission: &Submission) -> Vec<u32> {
    let messages = &submission.messages[..submission.msg_size as usize];
    let mut types = Vec::new();
    let mut pos = 0;
    while pos < messages.len() {
        let size = messages[pos] as usize;
        assert!(size > 0, "消息大小不能为 0");
        types.push(read_record_field(&messages[pos..], &MSG_ID));
        pos += size;
    }
    types
}

/// 指定类型的第一条消息
pub fn find_message(submission: &Submission, msg_type: MsgType) -> Option<Vec<u8>> {
    let messages = &submission.messages[..submission.msg_size as usize];
    let mut pos = 0;
    while pos < messages.len() {
        let size = messages[pos] as usize;
        if read_record_field(&messages[pos..], &MSG_ID) == msg_type as u32 {
            return Some(messages[pos..pos + size].to_vec());
        }
        pos += size;
    }
    None
}

pub fn count_messages(submission: &Submission, msg_type: MsgType) -> usize {
    message_types(submission)
        .into_iter()
        .filter(|&t| t == msg_type as u32)
        .count()
}

/// 已重定位命令字中写往 dest 的第一个 rendec 块的数据
pub fn find_rendec(words: &[u32], dest: u32) -> Option<Vec<u32>> {
    words.iter().enumerate().find_map(|(i, &word)| {
        let header = RendecHeader::unpack(word)?;
        if header.dest != dest {
            return None;
        }
        let end = i + 1 + header.words as usize;
        (end <= words.len()).then(|| words[i + 1..end].to_vec())
    })
}
