//! vdx-dump - 命令流合成与检查工具
//!
//! 按命令行描述合成 I/P 图像序列, 交给内存设备执行, 逐次打印设备收到的提交:
//! 消息序列、命令字数、重定位与二次去块暂存区.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;

use vdx::cmdbuf::message::{MSG_ID, MSG_SIZE};
use vdx::cmdbuf::{BufferObject, Device, MemoryDevice, MsgType, Placement, Submission};
use vdx::config::{DeblockSetting, DriverConfig};
use vdx::core::field::read_record_field;
use vdx::h264::{H264Decoder, PictureParams, PictureRef, Profile, SliceParams, SurfaceId};

/// 每个条带占用的码流字节数
const SLICE_BYTES: u32 = 0x200;
/// 条带头之后第一个宏块的位偏移
const SLICE_HEADER_BITS: u32 = 24;
/// 轮转使用的解码表面数
const SURFACE_COUNT: u32 = 3;

/// VDX 命令流合成与检查工具
#[derive(Parser, Debug)]
#[command(name = "vdx-dump", version, about = "合成 H.264 图像并检查生成的命令流")]
struct Cli {
    /// 驱动配置文件 (JSON), 命令行选项覆盖其中的对应字段
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 档次
    #[arg(long, value_enum, default_value_t = ProfileArg::High)]
    profile: ProfileArg,

    /// 图像宽度 (像素)
    #[arg(long, default_value_t = 176)]
    width: u32,

    /// 图像高度 (像素)
    #[arg(long, default_value_t = 144)]
    height: u32,

    /// 合成的图像数量
    #[arg(short = 'n', long, default_value_t = 3)]
    frames: u32,

    /// 每幅图像的条带数
    #[arg(long, default_value_t = 1)]
    slices: u32,

    /// I 图像间隔, 0 表示只有第一幅为 I 图像
    #[arg(long, default_value_t = 0)]
    intra_period: u32,

    /// 二次去块方式
    #[arg(long, value_enum, default_value_t = TwoPassArg::None)]
    two_pass: TwoPassArg,

    /// 启用错误隐藏
    #[arg(long)]
    error_concealment: bool,

    /// 备用输出旋转模式 (0..=3)
    #[arg(long)]
    rotation: Option<u32>,

    /// 命令流转储文件
    #[arg(long)]
    trace: Option<PathBuf>,

    /// 转储级别位掩码 (1 消息与命令, 2 链式 DMA, 4 重定位, 8 暂存区)
    #[arg(long, default_value_t = 0xf)]
    trace_level: u32,

    /// 显示已重定位的命令字
    #[arg(long)]
    show_words: bool,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 静默模式 (只输出检查结果)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProfileArg {
    Baseline,
    Main,
    High,
}

impl From<ProfileArg> for Profile {
    fn from(value: ProfileArg) -> Self {
        match value {
            ProfileArg::Baseline => Profile::Baseline,
            ProfileArg::Main => Profile::Main,
            ProfileArg::High => Profile::High,
        }
    }
}

/// 二次去块的触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TwoPassArg {
    /// 单遍解码
    None,
    /// 环外去块: 条带关闭去块, 固件生成去块序列
    Firmware,
    /// 条带组: 主机读回宏块参数生成去块序列
    Host,
}

// ============================================================
// 输出结构体
// ============================================================

/// 完整检查结果
#[derive(Serialize)]
struct DumpOutput {
    stream: StreamInfo,
    pictures: Vec<PictureInfo>,
    counters: CounterInfo,
}

/// 合成参数
#[derive(Serialize)]
struct StreamInfo {
    profile: String,
    width: u32,
    height: u32,
    frames: u32,
    slices_per_picture: u32,
    two_pass: String,
    error_concealment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

/// 单幅图像
#[derive(Serialize)]
struct PictureInfo {
    index: u32,
    picture_type: String,
    target: SurfaceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<SurfaceId>,
    two_pass: bool,
    submissions: Vec<SubmissionInfo>,
}

/// 单次设备提交
#[derive(Serialize)]
struct SubmissionInfo {
    sequence: u32,
    messages: Vec<String>,
    msg_size: u32,
    buffers: usize,
    command_words: usize,
    lldma_words: usize,
    staging_words: usize,
    relocations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    words: Option<Vec<String>>,
}

/// 会话计数器
#[derive(Serialize)]
struct CounterInfo {
    cmdbufs: u64,
    render_messages: u64,
    deblock_messages: u64,
    lldma_records: u64,
    relocations: u64,
    flushes: u64,
    busy_retries: u64,
    dumped_words: u64,
}

// ============================================================
// 主逻辑
// ============================================================

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if !cli.quiet {
        eprintln!(
            "vdx-dump 版本 {} -- VDX 命令流检查工具",
            env!("CARGO_PKG_VERSION")
        );
        eprintln!(
            "合成: {:?} {}x{}, {} 幅图像, 每幅 {} 个条带",
            cli.profile, cli.width, cli.height, cli.frames, cli.slices
        );
    }

    let output = match run(&cli) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("错误: {e:#}");
            process::exit(1);
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("错误: 序列化输出失败: {e}");
                process::exit(1);
            }
        }
    } else {
        print_stream_text(&output.stream);
        for picture in &output.pictures {
            print_picture_text(picture);
        }
        print_counters_text(&output.counters);
    }
}

/// 合成并解码全部图像, 收集每次提交
fn run(cli: &Cli) -> Result<DumpOutput> {
    let config = build_driver_config(cli)?;
    let profile = Profile::from(cli.profile);
    let device = Arc::new(MemoryDevice::new());
    let mut decoder = vdx::open_decoder(device.clone(), &config, profile, cli.width, cli.height)?;

    for id in 0..SURFACE_COUNT {
        decoder
            .create_surface(id, cli.width, cli.height)
            .with_context(|| format!("创建表面 {id} 失败"))?;
    }

    let geometry = PictureGeometry::new(cli.width, cli.height);
    let first_mbs = plan_slices(geometry.total_mbs(), cli.slices);
    let bitstream = build_bitstream(device.as_ref(), first_mbs.len() as u32)?;
    let slice_group_map = (cli.two_pass == TwoPassArg::Host).then(|| geometry.slice_group_map());

    let mut pictures = Vec::with_capacity(cli.frames as usize);
    let mut previous: Option<(SurfaceId, i32)> = None;
    for index in 0..cli.frames {
        let intra = is_intra(index, cli.intra_period) || previous.is_none();
        let target = index % SURFACE_COUNT;
        let poc = (index * 2) as i32;
        let reference = if intra { None } else { previous };
        let before = device.submissions().len();

        let mut params = geometry.picture_params(target, poc, reference);
        if slice_group_map.is_some() {
            params.num_slice_groups_minus1 = 1;
        }

        decoder
            .begin_picture(target)
            .with_context(|| format!("开始图像 {index} 失败"))?;
        decoder
            .set_picture_params(params)
            .with_context(|| format!("提交图像 {index} 参数失败"))?;
        if let Some(map) = &slice_group_map {
            decoder.set_slice_group_map(map)?;
        }
        for (i, &first_mb) in first_mbs.iter().enumerate() {
            let slice = build_slice(i as u32, first_mb, reference, cli.two_pass);
            decoder
                .render_slice(&slice, &bitstream)
                .with_context(|| format!("图像 {index} 条带 {i} 提交失败"))?;
        }
        let two_pass = decoder.two_pass();
        decoder
            .end_picture()
            .with_context(|| format!("图像 {index} 提交失败"))?;

        let submissions = device.submissions()[before..]
            .iter()
            .map(|s| build_submission_info(s, cli.show_words))
            .collect();
        pictures.push(PictureInfo {
            index,
            picture_type: if intra { "I" } else { "P" }.to_string(),
            target,
            reference: reference.map(|(surface, _)| surface),
            two_pass,
            submissions,
        });
        previous = Some((target, poc));
    }

    log::info!(
        "共 {} 幅图像, {} 次提交",
        pictures.len(),
        decoder.context().submitted_count()
    );

    Ok(DumpOutput {
        stream: StreamInfo {
            profile: format!("{profile:?}"),
            width: cli.width,
            height: cli.height,
            frames: cli.frames,
            slices_per_picture: first_mbs.len() as u32,
            two_pass: format!("{:?}", cli.two_pass).to_lowercase(),
            error_concealment: config.error_concealment,
            trace: config.trace.sink.as_ref().map(|p| p.display().to_string()),
        },
        pictures,
        counters: build_counter_info(&decoder),
    })
}

/// 配置文件 (如有) 叠加命令行选项
fn build_driver_config(cli: &Cli) -> Result<DriverConfig> {
    let mut config = match &cli.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };
    if cli.error_concealment {
        config.error_concealment = true;
    }
    if let Some(rotation) = cli.rotation {
        anyhow::ensure!(rotation <= 3, "旋转模式 {rotation} 超出 0..=3");
        config.rotation = rotation;
    }
    if let Some(trace) = &cli.trace {
        config.trace.sink = Some(trace.clone());
        config.trace.level = cli.trace_level;
    }
    match cli.two_pass {
        TwoPassArg::None => {}
        TwoPassArg::Firmware => {
            config.is_oold = true;
            config.deblock = DeblockSetting::Firmware;
        }
        TwoPassArg::Host => config.deblock = DeblockSetting::HostSequenced,
    }
    Ok(config)
}

fn is_intra(index: u32, intra_period: u32) -> bool {
    index == 0 || (intra_period > 0 && index % intra_period == 0)
}

/// 均分宏块得到每个条带的首宏块, 条带数限制在 1..=宏块总数
fn plan_slices(total_mbs: u32, slices: u32) -> Vec<u32> {
    let count = slices.clamp(1, total_mbs.max(1));
    (0..count).map(|i| i * total_mbs / count).collect()
}

/// 以宏块为单位的图像尺寸
#[derive(Debug, Clone, Copy)]
struct PictureGeometry {
    width_mbs: u32,
    height_mbs: u32,
}

impl PictureGeometry {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width_mbs: width.div_ceil(16).max(1),
            height_mbs: height.div_ceil(16).max(1),
        }
    }

    fn total_mbs(&self) -> u32 {
        self.width_mbs * self.height_mbs
    }

    /// 按宏块行交替分配两个条带组
    fn slice_group_map(&self) -> Vec<u8> {
        (0..self.total_mbs())
            .map(|mb| ((mb / self.width_mbs) & 1) as u8)
            .collect()
    }

    fn picture_params(
        &self,
        target: SurfaceId,
        poc: i32,
        reference: Option<(SurfaceId, i32)>,
    ) -> PictureParams {
        let mut params = PictureParams {
            curr_pic: PictureRef::frame(target, poc),
            picture_width_in_mbs_minus1: self.width_mbs - 1,
            picture_height_in_mbs_minus1: self.height_mbs - 1,
            frame_num: (poc / 2) as u32,
            ..PictureParams::default()
        };
        if let Some((surface, ref_poc)) = reference {
            params.reference_frames[0] = PictureRef::frame(surface, ref_poc);
            params.num_ref_frames = 1;
        }
        params
    }
}

fn build_slice(
    index: u32,
    first_mb: u32,
    reference: Option<(SurfaceId, i32)>,
    two_pass: TwoPassArg,
) -> SliceParams {
    let mut slice = SliceParams {
        slice_data_size: SLICE_BYTES,
        slice_data_offset: index * SLICE_BYTES,
        slice_data_bit_offset: SLICE_HEADER_BITS,
        first_mb_in_slice: first_mb,
        slice_type: if reference.is_some() { 0 } else { 2 },
        disable_deblocking_filter_idc: u32::from(two_pass == TwoPassArg::Firmware),
        ..SliceParams::default()
    };
    if let Some((surface, poc)) = reference {
        slice.ref_pic_list0[0] = PictureRef::frame(surface, poc);
    }
    slice
}

/// 每个条带一段伪码流数据
fn build_bitstream(device: &dyn Device, slices: u32) -> Result<BufferObject> {
    let size = (slices * SLICE_BYTES + 0xfff) & !0xfff;
    let bitstream = device
        .create_buffer(size, Placement::CPU_MAPPABLE)
        .context("创建码流对象失败")?;
    let data: Vec<u8> = (0..slices * SLICE_BYTES)
        .map(|i| if i % SLICE_BYTES == 0 { 0x65 } else { (i * 7) as u8 })
        .collect();
    device
        .write_buffer(&bitstream, 0, &data)
        .context("写入码流失败")?;
    Ok(bitstream)
}

fn build_submission_info(submission: &Submission, show_words: bool) -> SubmissionInfo {
    let commands = submission.command_words();
    SubmissionInfo {
        sequence: submission.sequence,
        messages: message_names(submission),
        msg_size: submission.msg_size,
        buffers: submission.buffers.len(),
        command_words: commands.len(),
        lldma_words: submission.lldma.len() / 4,
        staging_words: submission.staging_words().len(),
        relocations: submission.relocations.len(),
        words: show_words.then(|| commands.iter().map(|w| format!("{w:08x}")).collect()),
    }
}

/// 按消息头中的大小遍历消息
fn message_names(submission: &Submission) -> Vec<String> {
    let end = (submission.msg_size as usize).min(submission.messages.len());
    let messages = &submission.messages[..end];
    let mut names = Vec::new();
    let mut pos = 0;
    while pos < messages.len() {
        let size = read_record_field(&messages[pos..], &MSG_SIZE) as usize;
        if size == 0 {
            log::warn!("提交 #{} 偏移 {} 处消息大小为 0", submission.sequence, pos);
            break;
        }
        names.push(message_name(read_record_field(&messages[pos..], &MSG_ID)));
        pos += size;
    }
    names
}

fn message_name(id: u32) -> String {
    const KNOWN: [(MsgType, &str); 5] = [
        (MsgType::Render, "render"),
        (MsgType::Deblock, "deblock"),
        (MsgType::Oold, "oold"),
        (MsgType::HostBeOpp, "host_be_opp"),
        (MsgType::FrameInfo, "frame_info"),
    ];
    KNOWN
        .iter()
        .find(|(msg_type, _)| *msg_type as u32 == id)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("0x{id:02x}"))
}

fn build_counter_info(decoder: &H264Decoder) -> CounterInfo {
    let counters = decoder.context().debug().counters();
    CounterInfo {
        cmdbufs: counters.cmdbufs,
        render_messages: counters.render_messages,
        deblock_messages: counters.deblock_messages,
        lldma_records: counters.lldma_records,
        relocations: counters.relocations,
        flushes: counters.flushes,
        busy_retries: counters.busy_retries,
        dumped_words: counters.dumped_words,
    }
}

// ============================================================
// 文本输出
// ============================================================

fn print_stream_text(info: &StreamInfo) {
    println!("[STREAM]");
    println!("  档次         : {}", info.profile);
    println!("  分辨率       : {}x{}", info.width, info.height);
    println!("  图像数       : {}", info.frames);
    println!("  每幅条带数   : {}", info.slices_per_picture);
    println!("  二次去块     : {}", info.two_pass);
    println!("  错误隐藏     : {}", info.error_concealment);
    if let Some(ref trace) = info.trace {
        println!("  转储文件     : {trace}");
    }
    println!("[/STREAM]");
    println!();
}

fn print_picture_text(picture: &PictureInfo) {
    println!("[PICTURE #{}]", picture.index);
    println!("  类型         : {}", picture.picture_type);
    println!("  目标表面     : {}", picture.target);
    if let Some(reference) = picture.reference {
        println!("  参考表面     : {reference}");
    }
    println!("  二次去块     : {}", picture.two_pass);
    for submission in &picture.submissions {
        println!("  [SUBMIT #{}]", submission.sequence);
        println!(
            "    消息         : {} ({} 字节)",
            submission.messages.join(", "),
            submission.msg_size
        );
        println!("    缓冲区       : {}", submission.buffers);
        println!("    命令字       : {}", submission.command_words);
        println!("    链式 DMA 字  : {}", submission.lldma_words);
        if submission.staging_words > 0 {
            println!("    暂存区字     : {}", submission.staging_words);
        }
        println!("    重定位       : {}", submission.relocations);
        if let Some(ref words) = submission.words {
            for line in words.chunks(8) {
                println!("      {}", line.join(" "));
            }
        }
        println!("  [/SUBMIT]");
    }
    println!("[/PICTURE]");
    println!();
}

fn print_counters_text(counters: &CounterInfo) {
    println!("[COUNTERS]");
    println!("  命令缓冲区   : {}", counters.cmdbufs);
    println!("  渲染消息     : {}", counters.render_messages);
    println!("  去块消息     : {}", counters.deblock_messages);
    println!("  链式 DMA     : {}", counters.lldma_records);
    println!("  重定位       : {}", counters.relocations);
    println!("  提交次数     : {}", counters.flushes);
    println!("  忙重试       : {}", counters.busy_retries);
    println!("  转储字数     : {}", counters.dumped_words);
    println!("[/COUNTERS]");
}
