use super::*;

#[test]
fn mul_div255_edges() {
    assert_eq!(mul_div255_u8(255, 255), 255);
    assert_eq!(mul_div255_u8(0, 255), 0);
    assert_eq!(mul_div255_u8(128, 255), 128);
    assert_eq!(mul_div255_u8(255, 128), 128);
}

#[test]
fn opacity_quantization_clamps() {
    assert_eq!(opacity_to_u8(-1.0), 0);
    assert_eq!(opacity_to_u8(0.5), 128);
    assert_eq!(opacity_to_u8(2.0), 255);
    assert_eq!(add_sat_u8(200, 100), 255);
}
