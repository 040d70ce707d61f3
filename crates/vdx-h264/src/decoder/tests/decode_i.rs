use vdx_cmdbuf::MsgType;
use vdx_core::read_field;

use crate::regs::{
    CMDS_DISPLAY_PICTURE_SIZE, CMDS_REFERENCE_PICTURE_BASE_ADDRESSES, CMDS_SLICE_PARAMS,
    H264_BE_IQ_RAM, SLICE_PARAMS_CODE_TYPE,
};

use super::helpers::*;

#[test]
fn test_single_slice_intra_picture() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decode_intra(0, 0);

    assert_eq!(h.decoder.state(), DecodeState::PictureEnd);
    assert_eq!(h.device.submissions().len(), 1, "I 帧应只提交一次");
    let submission = h.last_submission();
    assert_eq!(count_messages(&submission, MsgType::Render), 1, "渲染消息数量错误");
    assert_eq!(count_messages(&submission, MsgType::Deblock), 0, "单遍图像不应有去块消息");

    let words = submission.command_words();
    let slice_params = find_rendec(&words, CMDS_SLICE_PARAMS).expect("缺少条带参数块");
    assert_eq!(
        read_field(slice_params[0], &SLICE_PARAMS_CODE_TYPE),
        0,
        "slice_type 2 应编码为 I"
    );
    assert!(
        find_rendec(&words, CMDS_REFERENCE_PICTURE_BASE_ADDRESSES).is_none(),
        "I 条带不应写 DPB 地址"
    );

    let sequence = find_rendec(&words, CMDS_DISPLAY_PICTURE_SIZE).expect("缺少序列块");
    assert_eq!(sequence.len(), 10);
    assert_eq!(sequence[0], (63 << 12) | 63, "图像尺寸字错误");
    assert_eq!(sequence[3], h.surface_address(0), "重建亮度地址应指向目标表面");
}

#[test]
fn test_raw_slice_type_seven_is_intra() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decode_picture(build_test_picture(0, 0), &build_test_slice(7));

    let words = h.last_submission().command_words();
    let slice_params = find_rendec(&words, CMDS_SLICE_PARAMS).expect("缺少条带参数块");
    assert_eq!(read_field(slice_params[0], &SLICE_PARAMS_CODE_TYPE), 0);
}

#[test]
fn test_scaling_lists_only_on_first_high_slice() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(build_test_picture(0, 0))
        .expect("提交图像参数失败");
    let mut first = build_test_slice(2);
    first.slice_data_size = 0x80;
    h.decoder.render_slice(&first, &h.bitstream).expect("首条带失败");
    let mut second = build_test_slice(2);
    second.first_mb_in_slice = 8;
    second.slice_data_offset = 0x80;
    second.slice_data_size = 0x80;
    h.decoder.render_slice(&second, &h.bitstream).expect("次条带失败");
    h.decoder.end_picture().expect("结束图像失败");

    let submission = h.last_submission();
    assert_eq!(count_messages(&submission, MsgType::Render), 2);
    let words = submission.command_words();
    let iq_blocks = words
        .iter()
        .filter(|&&w| {
            vdx_cmdbuf::command::RendecHeader::unpack(w).is_some_and(|r| r.dest == H264_BE_IQ_RAM)
        })
        .count();
    assert_eq!(iq_blocks, 1, "缩放矩阵只在首条带发送");
}

#[test]
fn test_baseline_profile_skips_scaling_lists() {
    let mut h = build_test_harness_with(|config, _| config.profile = Profile::Baseline);
    h.create_surfaces(&[0]);
    h.decode_intra(0, 0);
    let words = h.last_submission().command_words();
    assert!(find_rendec(&words, H264_BE_IQ_RAM).is_none(), "基线档次不发送缩放矩阵");
}

#[test]
fn test_segmented_slice_dispatches_once() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(build_test_picture(0, 0))
        .expect("提交图像参数失败");

    let mut slice = build_test_slice(2);
    slice.slice_data_size = 0x40;
    slice.slice_data_flag = SliceDataFlag::Begin;
    h.decoder.render_slice(&slice, &h.bitstream).expect("首段失败");
    assert_eq!(h.decoder.state(), DecodeState::SliceBegin);

    slice.slice_data_flag = SliceDataFlag::Middle;
    h.decoder.render_slice(&slice, &h.bitstream).expect("中间段失败");
    assert_eq!(h.decoder.state(), DecodeState::SliceBegin, "中间段不应分派条带");

    slice.slice_data_flag = SliceDataFlag::End;
    h.decoder.render_slice(&slice, &h.bitstream).expect("末段失败");
    assert_eq!(h.decoder.state(), DecodeState::SliceDispatched);

    h.decoder.end_picture().expect("结束图像失败");
    let submission = h.last_submission();
    assert_eq!(count_messages(&submission, MsgType::Render), 1, "分段条带只产生一条渲染消息");
}

#[test]
fn test_slice_outside_bitstream_rejected() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(build_test_picture(0, 0))
        .expect("提交图像参数失败");
    let mut slice = build_test_slice(2);
    slice.slice_data_offset = TEST_BITSTREAM_BYTES - 0x10;
    let err = h
        .decoder
        .render_slice(&slice, &h.bitstream)
        .expect_err("越界条带应失败");
    assert!(matches!(err, vdx_core::VdxError::InvalidArgument(_)), "错误类型: {err:?}");
    assert_eq!(h.decoder.state(), DecodeState::PictureReady, "失败的条带不应改变状态");
}

#[test]
fn test_slice_end_wrapping_address_space_rejected() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(build_test_picture(0, 0))
        .expect("提交图像参数失败");
    let mut slice = build_test_slice(2);
    slice.slice_data_offset = 0xffff_fff0;
    slice.slice_data_size = 0x20;
    let err = h
        .decoder
        .render_slice(&slice, &h.bitstream)
        .expect_err("回绕的条带范围应失败");
    assert!(matches!(err, vdx_core::VdxError::InvalidArgument(_)), "错误类型: {err:?}");
    assert_eq!(h.decoder.state(), DecodeState::PictureReady, "失败的条带不应改变状态");
}

#[test]
fn test_single_row_field_picture_decodes() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    let mut params = build_test_picture(0, 0);
    params.picture_height_in_mbs_minus1 = 0;
    params.field_pic_flag = true;
    h.decode_picture(params, &build_test_slice(2));
    assert_eq!(h.decoder.state(), DecodeState::PictureEnd);
    let submission = h.last_submission();
    assert_eq!(count_messages(&submission, MsgType::Render), 1, "单行场图像应正常分派");
}

#[test]
fn test_first_mb_outside_picture_rejected() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(build_test_picture(0, 0))
        .expect("提交图像参数失败");
    let mut slice = build_test_slice(2);
    slice.first_mb_in_slice = 16;
    let err = h
        .decoder
        .render_slice(&slice, &h.bitstream)
        .expect_err("首宏块越界应失败");
    assert!(matches!(err, vdx_core::VdxError::InvalidData(_)), "错误类型: {err:?}");
}

#[test]
fn test_unknown_target_surface_rejected() {
    let mut h = build_test_harness();
    let err = h.decoder.begin_picture(9).expect_err("未知表面应失败");
    assert!(matches!(err, vdx_core::VdxError::InvalidArgument(_)), "错误类型: {err:?}");
}

#[test]
fn test_picture_larger_than_surface_rejected() {
    let mut h = build_test_harness();
    h.decoder.create_surface(0, 32, 32).expect("创建表面失败");
    h.decoder.begin_picture(0).expect("开始图像失败");
    let err = h
        .decoder
        .set_picture_params(build_test_picture(0, 0))
        .expect_err("超出表面的图像应失败");
    assert!(matches!(err, vdx_core::VdxError::InvalidData(_)), "错误类型: {err:?}");
}

#[test]
fn test_empty_picture_submits_nothing() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(build_test_picture(0, 0))
        .expect("提交图像参数失败");
    h.decoder.end_picture().expect("结束空图像失败");
    assert_eq!(h.decoder.state(), DecodeState::PictureEnd);
    assert!(h.device.submissions().is_empty(), "没有条带时不应提交");
}

#[test]
#[should_panic(expected = "条带开始前必须提交图像参数")]
fn test_slice_before_picture_params_panics() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    let _ = h.decoder.render_slice(&build_test_slice(2), &h.bitstream);
}

#[test]
#[should_panic(expected = "上一幅图像尚未结束")]
fn test_begin_picture_twice_panics() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0, 1]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(build_test_picture(0, 0))
        .expect("提交图像参数失败");
    let _ = h.decoder.begin_picture(1);
}

#[test]
fn test_oversized_context_unsupported() {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = std::sync::Arc::new(vdx_cmdbuf::MemoryDevice::new());
    let err = H264Decoder::new(
        device as std::sync::Arc<dyn vdx_cmdbuf::Device>,
        H264Config::new(Profile::Baseline, 1280, 720),
        vdx_cmdbuf::ContextConfig::for_picture(1280, 720),
        vdx_core::DebugContext::disabled(),
    )
    .expect_err("基线档次不支持 720p");
    assert!(matches!(err, vdx_core::VdxError::Unsupported(_)), "错误类型: {err:?}");
}
