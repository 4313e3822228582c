use std::io::Cursor;

use super::*;

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "posterkit_loader_{tag}_{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_png(path: &std::path::Path, w: u32, h: u32) {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba([20, 40, 60, 255]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    std::fs::write(path, buf).unwrap();
}

#[test]
fn load_hits_cache_on_repeat() {
    let dir = temp_dir("repeat");
    let png = dir.join("a.png");
    write_png(&png, 4, 4);

    let loader = AssetLoader::new(&EngineConfig::default());
    let a = loader.load(&AssetRef::new(&png), None).unwrap();
    let b = loader.load(&AssetRef::new(&png), None).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    let stats = loader.cache_stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));

    let small = loader
        .load(&AssetRef::new(&png), Some(CanvasSize::new(2, 2).unwrap()))
        .unwrap();
    assert_eq!((small.width, small.height), (2, 2));
    assert_eq!(loader.cache_stats().entries, 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_and_unsupported_files() {
    let dir = temp_dir("errors");
    let loader = AssetLoader::new(&EngineConfig::default());

    let err = loader
        .load(&AssetRef::new(dir.join("missing.png")), None)
        .unwrap_err();
    assert!(matches!(err, AssetError::NotFound { .. }));

    let txt = dir.join("notes.png");
    std::fs::write(&txt, b"hello").unwrap();
    let err = loader.load(&AssetRef::new(&txt), None).unwrap_err();
    assert!(matches!(err, AssetError::UnsupportedFormat { .. }));

    let err = loader.load_font(&AssetRef::new(&txt)).unwrap_err();
    assert!(matches!(err, AssetError::UnsupportedFormat { .. }));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn configured_default_font_must_exist() {
    let cfg = EngineConfig {
        default_font: Some(PathBuf::from("/nope/font.ttf")),
        ..EngineConfig::default()
    };
    let loader = AssetLoader::new(&cfg);
    assert!(matches!(
        loader.load_default_font(),
        Err(AssetError::NotFound { .. })
    ));
}
