use super::*;

fn system_font() -> Option<FontAsset> {
    system_font_candidates().iter().find_map(|p| {
        let bytes = std::fs::read(p).ok()?;
        Some(FontAsset {
            path: PathBuf::from(p),
            bytes: Arc::new(bytes),
        })
    })
}

#[test]
fn fixed_advance_is_linear_in_chars_and_size() {
    let mut m = FixedAdvanceMeasurer::default();
    assert_eq!(m.measure("any", 20.0, "abcd").unwrap(), 40.0);
    assert_eq!(m.measure("any", 10.0, "").unwrap(), 0.0);
    assert_eq!(m.measure("any", 10.0, "héllo").unwrap(), 25.0);
}

#[test]
fn garbage_font_bytes_are_corrupt() {
    let mut engine = TextLayoutEngine::new();
    let font = FontAsset {
        path: PathBuf::from("bad.ttf"),
        bytes: Arc::new(b"not a font".to_vec()),
    };
    let err = engine.register_font(&font).unwrap_err();
    assert!(matches!(err, AssetError::CorruptData { .. }));
}

#[test]
fn unbound_font_key_is_invalid_template() {
    let mut engine = TextLayoutEngine::new();
    let fonts = HashMap::new();
    let mut m = ParleyMeasurer::new(&mut engine, &fonts);
    let err = m.measure("brand", 12.0, "x").unwrap_err();
    assert!(matches!(
        err,
        crate::foundation::error::EngineError::Layout(LayoutError::InvalidTemplate(_))
    ));
}

#[test]
fn parley_measure_grows_with_text_when_font_present() {
    let Some(font) = system_font() else {
        return;
    };
    let mut engine = TextLayoutEngine::new();
    let family = engine.register_font(&font).unwrap();
    assert!(!family.is_empty());
    assert_eq!(engine.register_font(&font).unwrap(), family);

    let mut fonts = HashMap::new();
    fonts.insert(DEFAULT_FONT_KEY.to_string(), font);
    let mut m = ParleyMeasurer::new(&mut engine, &fonts);
    let short = m.measure(DEFAULT_FONT_KEY, 24.0, "Hi").unwrap();
    let long = m.measure(DEFAULT_FONT_KEY, 24.0, "Hi there, friend").unwrap();
    let bigger = m.measure(DEFAULT_FONT_KEY, 48.0, "Hi").unwrap();
    assert!(short > 0.0);
    assert!(long > short);
    assert!(bigger > short * 1.5);
}
