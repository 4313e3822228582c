use crate::assets::text::TextMeasure;
use crate::foundation::error::EngineResult;

pub const ELLIPSIS: &str = "\u{2026}";

#[derive(Clone, Debug, PartialEq)]
pub struct WrappedLine {
    pub text: String,
    pub width: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WrapOutcome {
    pub lines: Vec<WrappedLine>,
    /// Some line was cut with an ellipsis or dropped for lack of height.
    pub truncated: bool,
}

/// Greedy word wrap of `text` into at most `max_lines` lines of `max_width`.
///
/// Explicit newlines start new lines. A word wider than the box becomes its own line and is
/// cut with an ellipsis; when lines run out the last kept line ends in an ellipsis.
pub fn wrap_text(
    m: &mut dyn TextMeasure,
    font_key: &str,
    size: f64,
    text: &str,
    max_width: f64,
    max_lines: usize,
) -> EngineResult<WrapOutcome> {
    let max_lines = max_lines.max(1);
    let mut raw: Vec<String> = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let candidate = format!("{current} {word}");
            if m.measure(font_key, size, &candidate)? <= max_width {
                current = candidate;
            } else {
                raw.push(std::mem::replace(&mut current, word.to_string()));
            }
        }
        raw.push(current);
    }

    let mut truncated = false;
    if raw.len() > max_lines {
        raw.truncate(max_lines);
        truncated = true;
    }

    let mut lines = Vec::with_capacity(raw.len());
    let last = raw.len().saturating_sub(1);
    for (i, line) in raw.into_iter().enumerate() {
        let force = truncated && i == last;
        let width = m.measure(font_key, size, &line)?;
        if !force && width <= max_width {
            lines.push(WrappedLine { text: line, width });
            continue;
        }
        truncated = true;
        let cut = ellipsize(m, font_key, size, &line, max_width, force)?;
        lines.push(cut);
    }

    Ok(WrapOutcome { lines, truncated })
}

/// Longest prefix of `text` that fits with a trailing ellipsis.
///
/// With `force`, the ellipsis is appended even when `text` already fits.
pub fn ellipsize(
    m: &mut dyn TextMeasure,
    font_key: &str,
    size: f64,
    text: &str,
    max_width: f64,
    force: bool,
) -> EngineResult<WrappedLine> {
    let chars: Vec<char> = text.chars().collect();
    let with_ellipsis = |n: usize| -> String {
        let mut s: String = chars[..n].iter().collect();
        let trimmed_len = s.trim_end().len();
        s.truncate(trimmed_len);
        s.push_str(ELLIPSIS);
        s
    };

    if !force {
        let width = m.measure(font_key, size, text)?;
        if width <= max_width {
            return Ok(WrappedLine {
                text: text.to_string(),
                width,
            });
        }
    }

    // Binary search on prefix length; width is monotone in prefix length.
    let (mut lo, mut hi) = (0usize, chars.len());
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        if m.measure(font_key, size, &with_ellipsis(mid))? <= max_width {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    let text = with_ellipsis(lo);
    let width = m.measure(font_key, size, &text)?;
    Ok(WrappedLine { text, width })
}

#[cfg(test)]
#[path = "../../tests/unit/layout/wrap.rs"]
mod tests;
