use std::time::Duration;

use tempfile::TempDir;
use vdx::config::{DeblockSetting, DriverConfig};
use vdx::h264::{DeblockStrategy, Profile};
use vdx::logging::LoggingConfig;

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().expect("创建临时目录失败");
    let path = dir.path().join("vdx.json");
    let config = DriverConfig {
        is_oold: true,
        error_concealment: true,
        deblock: DeblockSetting::Firmware,
        rotation: 2,
        submit_timeout_ms: 500,
        logging: Some(LoggingConfig {
            level: "debug".to_string(),
            console_level: "warn".to_string(),
            directory: "logs".to_string(),
            file_prefix: "vdx".to_string(),
            trace_directory: Some("traces".to_string()),
            retention_days: 3,
            compress_history: false,
            cleanup_interval_seconds: 600,
        }),
        ..DriverConfig::default()
    };

    config.save(&path).expect("保存配置失败");
    let loaded = DriverConfig::load(&path).expect("加载配置失败");
    assert_eq!(loaded, config);

    let h264 = loaded.h264_config(Profile::Main, 720, 576);
    assert_eq!(h264.deblock, DeblockStrategy::Firmware);
    assert_eq!(h264.rotation, 2);
    let ctx = loaded.context_config(720, 576);
    assert!(ctx.is_oold && ctx.error_concealment);
    assert_eq!(ctx.submit_timeout, Duration::from_millis(500));
}

#[test]
fn test_missing_file_reports_path() {
    let dir = TempDir::new().expect("创建临时目录失败");
    let path = dir.path().join("absent.json");
    let err = DriverConfig::load(&path).expect_err("缺失的配置文件应报错");
    let message = format!("{err:#}");
    assert!(message.contains("absent.json"), "错误信息应包含路径: {message}");
}

#[test]
fn test_invalid_json_is_rejected() {
    let dir = TempDir::new().expect("创建临时目录失败");
    let path = dir.path().join("broken.json");
    std::fs::write(&path, r#"{"cmdbuf_count": 0}"#).expect("写入配置失败");
    let err = DriverConfig::load(&path).expect_err("命令缓冲区数量为 0 应被拒绝");
    assert!(format!("{err:#}").contains("命令缓冲区数量"), "错误信息: {err:#}");
}

#[test]
fn test_unsupported_size_fails_to_open() {
    let device = std::sync::Arc::new(vdx::cmdbuf::MemoryDevice::new());
    let err = vdx::open_decoder(device, &DriverConfig::default(), Profile::Baseline, 1280, 720)
        .expect_err("Baseline 不支持 720p");
    assert!(format!("{err:#}").contains("1280x720"), "错误信息: {err:#}");
}
