use super::*;

#[test]
fn defaults_validate() {
    let cfg = EngineConfig::default();
    cfg.validate().unwrap();
    assert_eq!(cfg.watermark_width_fraction, 0.15);
    assert_eq!(cfg.reorder_multiplier, 2);
    assert!(cfg.supported_input_codecs.iter().any(|c| c == "h264"));
}

#[test]
fn partial_json_fills_defaults() {
    let cfg: EngineConfig =
        serde_json::from_str(r#"{ "workerThreads": 3, "jpegQuality": 75 }"#).unwrap();
    assert_eq!(cfg.worker_threads, Some(3));
    assert_eq!(cfg.jpeg_quality, 75);
    assert_eq!(cfg.effective_workers(), 3);
    assert_eq!(cfg.reorder_capacity(), 6);
    assert_eq!(cfg.cache_budget_bytes, EngineConfig::default().cache_budget_bytes);
}

#[test]
fn validate_rejects_bad_values() {
    let cfg = EngineConfig {
        watermark_width_fraction: 1.5,
        ..EngineConfig::default()
    };
    assert!(cfg.validate().is_err());

    let cfg = EngineConfig {
        worker_threads: Some(0),
        ..EngineConfig::default()
    };
    assert!(cfg.validate().is_err());

    let cfg = EngineConfig {
        jpeg_quality: 0,
        ..EngineConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn json_file_loads_and_reports_parse_errors() {
    let dir = std::env::temp_dir().join(format!("posterkit_cfg_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let good = dir.join("good.json");
    std::fs::write(&good, r#"{ "lineHeight": 1.5 }"#).unwrap();
    let cfg = EngineConfig::from_json_file(&good).unwrap();
    assert_eq!(cfg.line_height, 1.5);

    let bad = dir.join("bad.json");
    std::fs::write(&bad, "{ not json").unwrap();
    let err = EngineConfig::from_json_file(&bad).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    let _ = std::fs::remove_dir_all(&dir);
}
