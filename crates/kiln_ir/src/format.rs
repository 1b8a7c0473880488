//! Print-node format strings.
//!
//! A format string is literal text with `{N}` or `{N:S}` placeholders, where
//! `N` indexes the print's argument list and `S` picks the rendering:
//! `d` unsigned decimal (the default), `i` signed decimal, `x` hexadecimal,
//! `b` binary, `f` IEEE float. `{{` and `}}` stand for literal braces.

use kiln_common::BitVector;
use std::fmt::Write;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Style {
    Unsigned,
    Signed,
    Hex,
    Binary,
    Float,
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Brace(char),
    Arg { index: usize, style: Style },
}

fn parse(format: &str) -> Result<Vec<Segment<'_>>, String> {
    let mut segments = Vec::new();
    let bytes = format.as_bytes();
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'}' if bytes.get(i + 1) == Some(&bytes[i]) => {
                if text_start < i {
                    segments.push(Segment::Text(&format[text_start..i]));
                }
                segments.push(Segment::Brace(bytes[i] as char));
                i += 2;
                text_start = i;
            }
            b'{' => {
                if text_start < i {
                    segments.push(Segment::Text(&format[text_start..i]));
                }
                let close = format[i..]
                    .find('}')
                    .map(|p| p + i)
                    .ok_or_else(|| format!("unclosed placeholder at byte {i}"))?;
                segments.push(parse_placeholder(&format[i + 1..close])?);
                i = close + 1;
                text_start = i;
            }
            b'}' => return Err(format!("unmatched '}}' at byte {i}")),
            _ => i += 1,
        }
    }
    if text_start < bytes.len() {
        segments.push(Segment::Text(&format[text_start..]));
    }
    Ok(segments)
}

fn parse_placeholder(body: &str) -> Result<Segment<'static>, String> {
    let (index, style) = match body.split_once(':') {
        Some((index, style)) => (index, style),
        None => (body, "d"),
    };
    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|_| format!("invalid argument index '{index}'"))?;
    let style = match style {
        "d" => Style::Unsigned,
        "i" => Style::Signed,
        "x" => Style::Hex,
        "b" => Style::Binary,
        "f" => Style::Float,
        other => return Err(format!("unknown format '{other}'")),
    };
    Ok(Segment::Arg { index, style })
}

/// Checks that `format` parses and references only arguments below `nargs`.
pub(crate) fn validate(format: &str, nargs: usize) -> Result<(), String> {
    for segment in parse(format)? {
        if let Segment::Arg { index, .. } = segment {
            if index >= nargs {
                return Err(format!(
                    "argument index {index} out of range for {nargs} argument(s)"
                ));
            }
        }
    }
    Ok(())
}

/// Renders a validated format string.
pub(crate) fn render(format: &str, args: &[&BitVector]) -> String {
    let Ok(segments) = parse(format) else {
        return format.to_string();
    };
    let mut out = String::with_capacity(format.len());
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Brace(c) => out.push(c),
            Segment::Arg { index, style } => match args.get(index) {
                Some(value) => render_value(&mut out, value, style),
                None => out.push_str("<?>"),
            },
        }
    }
    out
}

fn render_value(out: &mut String, value: &BitVector, style: Style) {
    let _ = match style {
        Style::Unsigned => write!(out, "{}", value.to_decimal()),
        Style::Signed if value.width() > 0 && value.msb() => {
            write!(out, "-{}", value.neg().to_decimal())
        }
        Style::Signed => write!(out, "{}", value.to_decimal()),
        Style::Hex => write!(out, "{value:x}"),
        Style::Binary => write!(out, "{value:b}"),
        Style::Float if value.width() >= 64 => {
            let bits = value.read(0, 64).to_u64().unwrap_or(0);
            write!(out, "{}", f64::from_bits(bits))
        }
        Style::Float => {
            let bits = value.resize(32).to_u64().unwrap_or(0) as u32;
            write!(out, "{}", f32::from_bits(bits))
        }
    };
}
