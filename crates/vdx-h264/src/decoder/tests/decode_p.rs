use vdx_cmdbuf::MsgType;
use vdx_core::read_field;

use crate::params::{PictureFlags, WeightEntry};
use crate::regs::{
    CMDS_H264_WEIGHTED_FACTORS_A, CMDS_H264_WEIGHTED_FACTORS_B,
    CMDS_REFERENCE_PICTURE_BASE_ADDRESSES, CMDS_SLICE_PARAMS, H264_BE_COL_PIC0,
    H264_BE_FOC_CUR_TOP, H264_BE_LIST0, H264_BE_SPS0, REF0_LONGTERMFRAMEFLAG,
    SLICE_PARAMS_CODE_TYPE, WEIGHT_Y,
};

use super::helpers::*;

/// 解码两幅 I 帧作为参考, 再以两帧参考解码 P 帧
fn decode_p_with_two_references(h: &mut Harness) {
    h.create_surfaces(&[0, 1, 2]);
    h.decode_intra(0, 0);
    h.decode_intra(1, 2);

    let params = with_references(build_test_picture(2, 4), &[(0, 0), (1, 2)]);
    let slice = with_list0(build_test_slice(0), &[(1, 2), (0, 0)]);
    h.decode_picture(params, &slice);
}

#[test]
fn test_p_slice_dpb_addresses() {
    let mut h = build_test_harness();
    decode_p_with_two_references(&mut h);

    let submission = h.last_submission();
    assert_eq!(count_messages(&submission, MsgType::Render), 1);
    let words = submission.command_words();
    let dpb = find_rendec(&words, CMDS_REFERENCE_PICTURE_BASE_ADDRESSES).expect("缺少 DPB 地址块");
    assert_eq!(dpb.len(), 32, "DPB 地址块应有 16 对地址");

    let sentinel_pairs = dpb
        .chunks(2)
        .filter(|pair| pair[0] == SENTINEL && pair[1] == SENTINEL)
        .count();
    assert_eq!(sentinel_pairs, 14, "空槽应写占位地址");

    for surface in [0, 1] {
        let slot = h.decoder.dpb().slot_of(surface).expect("参考表面应在 DPB 中");
        let chroma_offset = h.decoder.surface(surface).expect("表面不存在").chroma_offset();
        let luma = h.surface_address(surface);
        assert_eq!(dpb[slot * 2], luma, "表面 {surface} 亮度地址错误");
        assert_eq!(dpb[slot * 2 + 1], luma + chroma_offset, "表面 {surface} 色度地址错误");
    }
}

#[test]
fn test_p_slice_code_type_and_list0() {
    let mut h = build_test_harness();
    decode_p_with_two_references(&mut h);

    let words = h.last_submission().command_words();
    let slice_params = find_rendec(&words, CMDS_SLICE_PARAMS).expect("缺少条带参数块");
    assert_eq!(read_field(slice_params[0], &SLICE_PARAMS_CODE_TYPE), 1, "P 条带编码类型应为 1");

    let list0 = find_rendec(&words, H264_BE_LIST0).expect("缺少 list0 块");
    assert_eq!(list0.len(), 1, "两项 list0 打包为一个字");
    let slot0 = h.decoder.dpb().slot_of(0).expect("表面 0 应在 DPB 中") as u32;
    let slot1 = h.decoder.dpb().slot_of(1).expect("表面 1 应在 DPB 中") as u32;
    assert_eq!(list0[0], slot1 | (slot0 << 8), "list0 应低字节在前");

    assert!(find_rendec(&words, H264_BE_FOC_CUR_TOP).is_none(), "P 条带不发送 POC 块");
    assert!(find_rendec(&words, H264_BE_COL_PIC0).is_none(), "P 条带不发送共位块");
}

#[test]
fn test_long_term_reference_flags() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0, 1, 2]);
    h.decode_intra(0, 0);
    h.decode_intra(1, 2);

    let mut params = with_references(build_test_picture(2, 4), &[(0, 0), (1, 2)]);
    params.reference_frames[1].flags = PictureFlags::LONG_TERM_REFERENCE;
    let slice = with_list0(build_test_slice(5), &[(1, 2)]);
    h.decode_picture(params, &slice);

    let words = h.last_submission().command_words();
    let sps = find_rendec(&words, H264_BE_SPS0).expect("缺少 SPS 块");
    assert_eq!(sps.len(), 7);
    let slot = h.decoder.dpb().slot_of(1).expect("表面 1 应在 DPB 中");
    assert_eq!(
        read_field(sps[6], &REF0_LONGTERMFRAMEFLAG),
        1 << slot,
        "只有长期参考帧的槽位置位"
    );
}

#[test]
fn test_weighted_prediction_tables() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0, 1]);
    h.decode_intra(0, 0);

    let mut params = with_references(build_test_picture(1, 2), &[(0, 0)]);
    params.weighted_pred_flag = true;
    let mut slice = with_list0(build_test_slice(0), &[(0, 0)]);
    slice.weights.l0[0] = WeightEntry {
        luma_weight: -3,
        ..WeightEntry::default()
    };
    h.decode_picture(params, &slice);

    let words = h.last_submission().command_words();
    let weights = find_rendec(&words, CMDS_H264_WEIGHTED_FACTORS_A).expect("缺少加权系数块");
    assert_eq!(weights.len(), 64, "加权系数块应有 32 个系数与 32 个偏移");
    assert_eq!(
        read_field(weights[0], &WEIGHT_Y),
        0xfd,
        "负系数应截断为 8 位"
    );
    assert!(weights[1..32].iter().all(|&w| w == 0), "未使用的系数应为 0");
    assert!(
        find_rendec(&words, CMDS_H264_WEIGHTED_FACTORS_B).is_none(),
        "P 条带只发送 list0 系数"
    );
}

#[test]
fn test_b_slice_sends_poc_and_colocated() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0, 1, 2]);
    h.decode_intra(0, 0);
    h.decode_intra(1, 8);

    let params = with_references(build_test_picture(2, 4), &[(0, 0), (1, 8)]);
    let mut slice = with_list0(build_test_slice(1), &[(0, 0)]);
    slice.ref_pic_list1[0] = PictureRef::frame(1, 8);
    h.decode_picture(params, &slice);

    let words = h.last_submission().command_words();
    let slice_params = find_rendec(&words, CMDS_SLICE_PARAMS).expect("缺少条带参数块");
    assert_eq!(read_field(slice_params[0], &SLICE_PARAMS_CODE_TYPE), 2, "B 条带编码类型应为 2");

    let poc = find_rendec(&words, H264_BE_FOC_CUR_TOP).expect("缺少 POC 块");
    assert_eq!(poc.len(), 34);
    assert_eq!(&poc[..2], &[4, 4], "当前图像 POC 错误");
    let slot = h.decoder.dpb().slot_of(1).expect("表面 1 应在 DPB 中");
    assert_eq!(&poc[2 + slot * 2..4 + slot * 2], &[8, 8], "参考图像 POC 错误");

    let colocated = find_rendec(&words, H264_BE_COL_PIC0).expect("缺少共位块");
    let colocated_buffer = h
        .decoder
        .surface(1)
        .and_then(|s| s.colocated())
        .expect("参考表面应有共位缓冲区");
    let address = h
        .device
        .gpu_offset(colocated_buffer.handle())
        .expect("共位缓冲区未分配") as u32;
    assert_eq!(colocated[1], address, "共位地址应指向 list1 首项");
}

#[test]
fn test_b_slice_without_list1_uses_sentinel() {
    let mut h = build_test_harness();
    h.create_surfaces(&[0, 1]);
    h.decode_intra(0, 0);

    let params = with_references(build_test_picture(1, 2), &[(0, 0)]);
    let slice = with_list0(build_test_slice(6), &[(0, 0)]);
    h.decode_picture(params, &slice);

    let words = h.last_submission().command_words();
    let colocated = find_rendec(&words, H264_BE_COL_PIC0).expect("缺少共位块");
    assert_eq!(&colocated[..2], &[0, SENTINEL], "缺少共位图像时写占位值");
}
