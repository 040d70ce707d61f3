use vdx_cmdbuf::message::{DEBLOCK_ADDRESS_A0, DEBLOCK_ADDRESS_B0, RENDER_FLAGS};
use vdx_cmdbuf::{MsgFlags, MsgType};
use vdx_core::field::read_record_field;

use super::helpers::*;

fn build_concealment_harness() -> Harness {
    build_test_harness_with(|config, ctx| {
        config.deblock = DeblockStrategy::Firmware;
        ctx.error_concealment = true;
    })
}

/// 最后一次提交中错误隐藏消息的 (目标, 来源) 地址
fn concealment_addresses(h: &Harness) -> (u32, u32) {
    let submission = h.last_submission();
    let message = find_message(&submission, MsgType::HostBeOpp).expect("缺少错误隐藏消息");
    (
        read_record_field(&message, &DEBLOCK_ADDRESS_A0),
        read_record_field(&message, &DEBLOCK_ADDRESS_B0),
    )
}

#[test]
fn test_concealment_messages_surround_render() {
    let mut h = build_concealment_harness();
    h.create_surfaces(&[0]);
    h.decode_intra(0, 0);

    let submission = h.last_submission();
    assert_eq!(
        message_types(&submission),
        vec![
            MsgType::FrameInfo as u32,
            MsgType::Render as u32,
            MsgType::HostBeOpp as u32
        ],
        "帧信息在前, 错误隐藏在后"
    );
    let render = find_message(&submission, MsgType::Render).expect("缺少渲染消息");
    let flags = MsgFlags::from_bits_truncate(read_record_field(&render, &RENDER_FLAGS));
    assert!(flags.contains(MsgFlags::ERROR_DETECTION), "渲染消息应请求错误检测");

    let target = h.surface_address(0);
    assert_eq!(concealment_addresses(&h), (target, target), "首幅图像从自身隐藏");
}

#[test]
fn test_concealment_prefers_list0_head() {
    let mut h = build_concealment_harness();
    h.create_surfaces(&[0, 1, 2]);
    h.decode_intra(0, 0);
    h.decode_intra(1, 2);

    let params = with_references(build_test_picture(2, 4), &[(0, 0), (1, 2)]);
    h.decode_picture(params, &with_list0(build_test_slice(0), &[(0, 0), (1, 2)]));
    assert_eq!(
        concealment_addresses(&h),
        (h.surface_address(2), h.surface_address(0)),
        "应从 list0 首项隐藏"
    );
}

#[test]
fn test_intra_picture_conceals_from_last_non_b() {
    let mut h = build_concealment_harness();
    h.create_surfaces(&[0, 1, 2]);
    h.decode_intra(0, 0);

    // B 图像不会成为后续 I 图像的隐藏来源
    let params = with_references(build_test_picture(1, 2), &[(0, 0)]);
    h.decode_picture(params, &with_list0(build_test_slice(1), &[(0, 0)]));
    assert_eq!(concealment_addresses(&h).1, h.surface_address(0));

    h.decode_intra(2, 4);
    assert_eq!(
        concealment_addresses(&h),
        (h.surface_address(2), h.surface_address(0)),
        "I 图像应从最近的非 B 图像隐藏"
    );
}

#[test]
fn test_destroyed_candidate_falls_back_to_target() {
    let mut h = build_concealment_harness();
    h.create_surfaces(&[0, 1]);
    h.decode_intra(0, 0);
    h.decoder.destroy_surface(0).expect("销毁表面失败");

    h.decode_intra(1, 2);
    let target = h.surface_address(1);
    assert_eq!(concealment_addresses(&h), (target, target));
}

#[test]
fn test_slice_groups_disable_concealment() {
    let mut h = build_concealment_harness();
    h.create_surfaces(&[0]);
    h.decoder.begin_picture(0).expect("开始图像失败");
    let mut params = build_test_picture(0, 0);
    params.num_slice_groups_minus1 = 1;
    h.decoder.set_picture_params(params).expect("提交图像参数失败");
    h.decoder
        .set_slice_group_map(&[0x00; 16])
        .expect("提交条带组映射失败");
    h.decoder
        .render_slice(&build_test_slice(2), &h.bitstream)
        .expect("提交条带失败");
    h.decoder.end_picture().expect("结束图像失败");

    let submission = h.last_submission();
    assert_eq!(count_messages(&submission, MsgType::HostBeOpp), 0, "条带组图像不做错误隐藏");
    assert_eq!(count_messages(&submission, MsgType::Deblock), 1);
    let render = find_message(&submission, MsgType::Render).expect("缺少渲染消息");
    let flags = MsgFlags::from_bits_truncate(read_record_field(&render, &RENDER_FLAGS));
    assert!(!flags.contains(MsgFlags::ERROR_DETECTION));
}
