use crate::foundation::core::Rgba8Premul;
use serde::{Deserialize, Serialize};

/// Straight (non-premultiplied) color with channels in `[0,1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorDef {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ColorDef {
    pub fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub fn transparent() -> Self {
        Self::rgba(0.0, 0.0, 0.0, 0.0)
    }

    pub fn black() -> Self {
        Self::rgba(0.0, 0.0, 0.0, 1.0)
    }

    pub fn to_rgba8_premul(self) -> Rgba8Premul {
        fn to_u8(x: f64) -> u8 {
            (x.clamp(0.0, 1.0) * 255.0).round() as u8
        }

        let a = self.a.clamp(0.0, 1.0);
        Rgba8Premul {
            r: to_u8(self.r.clamp(0.0, 1.0) * a),
            g: to_u8(self.g.clamp(0.0, 1.0) * a),
            b: to_u8(self.b.clamp(0.0, 1.0) * a),
            a: to_u8(a),
        }
    }

    /// Straight RGBA8, the form vello_cpu solid paints take.
    pub fn to_rgba8_straight(self) -> [u8; 4] {
        fn to_u8(x: f64) -> u8 {
            (x.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        [to_u8(self.r), to_u8(self.g), to_u8(self.b), to_u8(self.a)]
    }
}

impl std::str::FromStr for ColorDef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_color(s)
    }
}

impl<'de> Deserialize<'de> for ColorDef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Css(String),
            RgbaObj {
                r: f64,
                g: f64,
                b: f64,
                #[serde(default = "one")]
                a: f64,
            },
        }

        fn one() -> f64 {
            1.0
        }

        match Repr::deserialize(deserializer)? {
            Repr::Css(s) => parse_color(&s).map_err(serde::de::Error::custom),
            Repr::RgbaObj { r, g, b, a } => Ok(Self::rgba(r, g, b, a)),
        }
    }
}

/// Parse `#RGB`, `#RRGGBB`, `#RRGGBBAA`, `rgb(r,g,b)`, `rgba(r,g,b,a)` or `transparent`.
///
/// `rgb`/`rgba` channels are 0..=255 and alpha is 0..=1, as in CSS.
pub fn parse_color(s: &str) -> Result<ColorDef, String> {
    let s = s.trim();
    let lower = s.to_ascii_lowercase();

    if lower == "transparent" {
        return Ok(ColorDef::transparent());
    }
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(body) = lower
        .strip_prefix("rgba(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_functional(body, true);
    }
    if let Some(body) = lower
        .strip_prefix("rgb(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_functional(body, false);
    }
    Err(format!(
        "unrecognized color \"{s}\" (expected #hex, rgb(), rgba() or transparent)"
    ))
}

fn parse_hex(s: &str) -> Result<ColorDef, String> {
    fn hex_byte(pair: &str) -> Result<u8, String> {
        u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte \"{pair}\""))
    }

    if !s.is_ascii() {
        return Err("hex color must be ascii".to_owned());
    }

    let (r, g, b, a) = match s.len() {
        3 => {
            let nib = |i: usize| hex_byte(&s[i..i + 1]).map(|v| v * 17);
            (nib(0)?, nib(1)?, nib(2)?, 255)
        }
        6 => (
            hex_byte(&s[0..2])?,
            hex_byte(&s[2..4])?,
            hex_byte(&s[4..6])?,
            255,
        ),
        8 => (
            hex_byte(&s[0..2])?,
            hex_byte(&s[2..4])?,
            hex_byte(&s[4..6])?,
            hex_byte(&s[6..8])?,
        ),
        _ => {
            return Err("hex color must be #RGB, #RRGGBB or #RRGGBBAA".to_owned());
        }
    };

    Ok(ColorDef::rgba(
        f64::from(r) / 255.0,
        f64::from(g) / 255.0,
        f64::from(b) / 255.0,
        f64::from(a) / 255.0,
    ))
}

fn parse_functional(body: &str, with_alpha: bool) -> Result<ColorDef, String> {
    let parts = body
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid color component: {e}"))?;

    let expected = if with_alpha { 4 } else { 3 };
    if parts.len() != expected {
        return Err(format!(
            "expected {expected} color components, got {}",
            parts.len()
        ));
    }
    if parts.iter().any(|v| !v.is_finite()) {
        return Err("color components must be finite".to_owned());
    }

    let ch = |v: f64| v.clamp(0.0, 255.0) / 255.0;
    let a = if with_alpha {
        parts[3].clamp(0.0, 1.0)
    } else {
        1.0
    };
    Ok(ColorDef::rgba(ch(parts[0]), ch(parts[1]), ch(parts[2]), a))
}

#[cfg(test)]
#[path = "../../tests/unit/assets/color.rs"]
mod tests;
