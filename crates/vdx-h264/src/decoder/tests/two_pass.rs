use vdx_cmdbuf::message::{DEBLOCK_ADDRESS_A0, DEBLOCK_ADDRESS_B0, RENDER_FLAGS};
use vdx_cmdbuf::{MsgFlags, MsgType};
use vdx_core::VdxError;
use vdx_core::field::read_record_field;

use crate::regs::CMDS_DISPLAY_PICTURE_SIZE;

use super::helpers::*;

fn render_flags(submission: &vdx_cmdbuf::Submission) -> MsgFlags {
    let render = find_message(submission, MsgType::Render).expect("缺少渲染消息");
    MsgFlags::from_bits_truncate(read_record_field(&render, &RENDER_FLAGS))
}

/// 使用条带组的图像
fn slice_group_picture(target: SurfaceId) -> PictureParams {
    let mut params = build_test_picture(target, 0);
    params.num_slice_groups_minus1 = 1;
    params
}

#[test]
fn test_firmware_out_of_loop_deblock() {
    let mut h = build_test_harness_with(|config, ctx| {
        config.deblock = DeblockStrategy::Firmware;
        ctx.is_oold = true;
    });
    h.create_surfaces(&[0]);
    let mut slice = build_test_slice(2);
    slice.disable_deblocking_filter_idc = 1;
    h.decode_picture(build_test_picture(0, 0), &slice);

    assert_eq!(h.device.submissions().len(), 1, "固件去块只提交一次");
    let submission = h.last_submission();
    assert_eq!(
        message_types(&submission),
        vec![MsgType::Render as u32, MsgType::Oold as u32],
        "消息顺序错误"
    );
    assert!(render_flags(&submission).contains(MsgFlags::TWO_PASS));

    let surface = h.decoder.surface(0).expect("表面不存在");
    let in_loop = h
        .device
        .gpu_offset(surface.in_loop().expect("缺少环内缓冲区").handle())
        .expect("环内缓冲区未分配") as u32;
    let sequence = find_rendec(&submission.command_words(), CMDS_DISPLAY_PICTURE_SIZE)
        .expect("缺少序列块");
    assert_eq!(sequence[3], in_loop, "环外去块时重建写入环内缓冲区");

    let deblock = find_message(&submission, MsgType::Oold).expect("缺少环外去块消息");
    assert_eq!(read_record_field(&deblock, &DEBLOCK_ADDRESS_A0), in_loop);
    assert_eq!(
        read_record_field(&deblock, &DEBLOCK_ADDRESS_B0),
        h.surface_address(0),
        "去块输出应写回主缓冲区"
    );
}

#[test]
fn test_deblocked_slice_stays_single_pass() {
    let mut h = build_test_harness_with(|_, ctx| ctx.is_oold = true);
    h.create_surfaces(&[0]);
    h.decode_intra(0, 0);

    let submission = h.last_submission();
    assert_eq!(message_types(&submission), vec![MsgType::Render as u32]);
    assert!(!render_flags(&submission).contains(MsgFlags::TWO_PASS));
    assert!(!h.decoder.two_pass());
}

#[test]
fn test_host_sequenced_slice_group_deblock() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(slice_group_picture(0))
        .expect("提交图像参数失败");
    h.decoder
        .set_slice_group_map(&[0x01; 16])
        .expect("提交条带组映射失败");
    assert!(h.decoder.two_pass(), "条带组应启用二次去块");
    h.decoder
        .render_slice(&build_test_slice(2), &h.bitstream)
        .expect("提交条带失败");
    h.decoder.end_picture().expect("结束图像失败");

    let submissions = h.device.submissions();
    assert_eq!(submissions.len(), 2, "主机序列去块需要两次提交");
    assert_eq!(message_types(&submissions[0]), vec![MsgType::Render as u32]);
    assert!(render_flags(&submissions[0]).contains(MsgFlags::TWO_PASS));
    assert_eq!(message_types(&submissions[1]), vec![MsgType::Deblock as u32]);

    let staging = submissions[1].staging_words();
    assert!(!staging.is_empty(), "第二次提交应携带暂存命令");
    assert!(
        staging[0] > 0 && staging[0] as usize <= staging.len(),
        "暂存区首字应为命令字数"
    );
    assert_eq!(h.decoder.context().submitted_count(), 2);
}

#[test]
fn test_slice_groups_without_map_rejected() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(slice_group_picture(0))
        .expect("提交图像参数失败");
    let err = h
        .decoder
        .render_slice(&build_test_slice(2), &h.bitstream)
        .expect_err("缺少条带组映射应失败");
    assert!(matches!(err, VdxError::InvalidData(_)), "错误类型: {err:?}");
}

#[test]
fn test_empty_slice_group_map_rejected() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(slice_group_picture(0))
        .expect("提交图像参数失败");
    let err = h
        .decoder
        .set_slice_group_map(&[])
        .expect_err("空映射应失败");
    assert!(matches!(err, VdxError::InvalidArgument(_)), "错误类型: {err:?}");
}

#[test]
fn test_mbaff_slice_groups_stay_single_pass() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    let mut params = slice_group_picture(0);
    params.frame_mbs_only_flag = false;
    params.mb_adaptive_frame_field_flag = true;
    h.decoder.set_picture_params(params).expect("提交图像参数失败");
    assert!(!h.decoder.two_pass(), "MBAFF 图像不进入二次去块");
}

#[test]
fn test_slice_group_map_released_at_end_of_picture() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    h.decoder
        .set_picture_params(slice_group_picture(0))
        .expect("提交图像参数失败");
    let before = h.device.live_buffers();
    h.decoder
        .set_slice_group_map(&[0x01; 16])
        .expect("提交条带组映射失败");
    assert_eq!(h.device.live_buffers(), before + 1);
    h.decoder.end_picture().expect("结束图像失败");
    assert_eq!(h.device.live_buffers(), before, "图像结束后映射应被释放");
}
