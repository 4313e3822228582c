use super::*;

#[test]
fn hex_forms_parse() {
    assert_eq!(
        parse_color("#ff0000").unwrap().to_rgba8_premul(),
        Rgba8Premul {
            r: 255,
            g: 0,
            b: 0,
            a: 255
        }
    );
    assert_eq!(
        parse_color("#0F0").unwrap().to_rgba8_straight(),
        [0, 255, 0, 255]
    );
    assert_eq!(
        parse_color("#00000080").unwrap().to_rgba8_straight(),
        [0, 0, 0, 128]
    );
    assert!(parse_color("#12345").is_err());
    assert!(parse_color("#gg0000").is_err());
}

#[test]
fn functional_forms_and_transparent() {
    assert_eq!(
        parse_color("rgb(10, 20, 30)").unwrap().to_rgba8_straight(),
        [10, 20, 30, 255]
    );
    assert_eq!(
        parse_color("RGBA(255,255,255,0.5)")
            .unwrap()
            .to_rgba8_premul()
            .to_array(),
        [128, 128, 128, 128]
    );
    assert_eq!(
        parse_color("transparent").unwrap().to_rgba8_premul(),
        Rgba8Premul::transparent()
    );
    assert!(parse_color("rgb(1,2)").is_err());
    assert!(parse_color("papayawhip").is_err());
}

#[test]
fn deserializes_from_string_or_object() {
    let c: ColorDef = serde_json::from_str("\"#336699\"").unwrap();
    assert_eq!(c.to_rgba8_straight(), [0x33, 0x66, 0x99, 255]);

    let c: ColorDef = serde_json::from_str(r#"{ "r": 1.0, "g": 0.0, "b": 0.0 }"#).unwrap();
    assert_eq!(c.a, 1.0);

    assert!(serde_json::from_str::<ColorDef>("\"nope\"").is_err());
}
