//! Content stream lexer
//!
//! Splits a content stream into operators, each with the byte span it
//! occupies (operands included). Removing an operator cuts exactly that span
//! and leaves every other byte of the stream as it was, so nothing is
//! re-encoded. Inline images are stepped over as one `BI ... ID ... EI` unit;
//! a stream that ends inside one is an error rather than a short result.

use std::ops::Range;

use crate::error::UnmarkError;
use crate::geometry::Matrix;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Number(f64),
    /// Name without the leading `/`, `#xx` escapes decoded
    Name(Vec<u8>),
    /// Strings, arrays, dictionaries, booleans, null
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContentOp {
    pub operator: String,
    pub operands: Vec<Operand>,
    /// From the first operand to the end of the operator keyword
    pub span: Range<usize>,
}

impl ContentOp {
    /// Operand of `Do`, `Tf`, `gs` and the like
    pub fn name_operand(&self) -> Option<&[u8]> {
        match self.operands.last() {
            Some(Operand::Name(name)) => Some(name.as_slice()),
            _ => None,
        }
    }

    /// The six operands of `cm`
    pub fn matrix(&self) -> Option<Matrix> {
        match self.operands.as_slice() {
            [Operand::Number(a), Operand::Number(b), Operand::Number(c), Operand::Number(d), Operand::Number(e), Operand::Number(f)] => {
                Some(Matrix::new(*a, *b, *c, *d, *e, *f))
            }
            _ => None,
        }
    }
}

pub(crate) fn parse(input: &[u8]) -> Result<Vec<ContentOp>, UnmarkError> {
    let mut ops = Vec::new();
    let mut operands = Vec::new();
    let mut operands_start: Option<usize> = None;
    let mut pos = 0;

    loop {
        skip_whitespace_and_comments(input, &mut pos);
        if pos >= input.len() {
            break;
        }
        let start = pos;

        if is_keyword_start(input[pos]) {
            let keyword = read_keyword(input, &mut pos);
            match keyword.as_str() {
                "true" | "false" | "null" => {
                    operands_start.get_or_insert(start);
                    operands.push(Operand::Other);
                }
                "BI" => {
                    skip_inline_image(input, &mut pos)?;
                    ops.push(ContentOp {
                        operator: keyword,
                        operands: Vec::new(),
                        span: operands_start.take().unwrap_or(start)..pos,
                    });
                    operands.clear();
                }
                _ => ops.push(ContentOp {
                    operator: keyword,
                    operands: std::mem::take(&mut operands),
                    span: operands_start.take().unwrap_or(start)..pos,
                }),
            }
        } else {
            let operand = read_operand(input, &mut pos)?;
            operands_start.get_or_insert(start);
            operands.push(operand);
        }
    }

    Ok(ops)
}

/// Copy of `input` without the operators `drop` selects. Each cut span is
/// replaced by one space so the neighbouring tokens stay separated.
pub(crate) fn remove_ops<F>(input: &[u8], ops: &[ContentOp], drop: F) -> Vec<u8>
where
    F: Fn(&ContentOp) -> bool,
{
    let mut output = Vec::with_capacity(input.len());
    let mut cursor = 0;
    for op in ops.iter().filter(|op| drop(op)) {
        output.extend_from_slice(&input[cursor..op.span.start]);
        output.push(b' ');
        cursor = op.span.end;
    }
    output.extend_from_slice(&input[cursor..]);
    output
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0C | 0x00)
}

fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

fn is_keyword_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || matches!(b, b'*' | b'\'' | b'"')
}

fn skip_whitespace_and_comments(input: &[u8], pos: &mut usize) {
    while *pos < input.len() {
        if is_whitespace(input[*pos]) {
            *pos += 1;
        } else if input[*pos] == b'%' {
            while *pos < input.len() && input[*pos] != b'\n' && input[*pos] != b'\r' {
                *pos += 1;
            }
        } else {
            break;
        }
    }
}

/// Operators such as `d0`, `T*` and `'`
fn read_keyword(input: &[u8], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < input.len() {
        let b = input[*pos];
        if b.is_ascii_alphanumeric() || matches!(b, b'*' | b'\'' | b'"') {
            *pos += 1;
        } else {
            break;
        }
    }
    String::from_utf8_lossy(&input[start..*pos]).into_owned()
}

/// One operand. Always advances `pos` by at least one byte.
fn read_operand(input: &[u8], pos: &mut usize) -> Result<Operand, UnmarkError> {
    match input[*pos] {
        b'/' => Ok(Operand::Name(read_name(input, pos))),
        b'0'..=b'9' | b'+' | b'-' | b'.' => Ok(read_number(input, pos)),
        b'(' => {
            skip_literal_string(input, pos)?;
            Ok(Operand::Other)
        }
        b'<' if input.get(*pos + 1) == Some(&b'<') => {
            *pos += 2;
            skip_until(input, pos, b">>", "dictionary")?;
            Ok(Operand::Other)
        }
        b'<' => {
            match input[*pos..].iter().position(|&b| b == b'>') {
                Some(offset) => *pos += offset + 1,
                None => return Err(malformed("unterminated hex string")),
            }
            Ok(Operand::Other)
        }
        b'[' => {
            *pos += 1;
            skip_until(input, pos, b"]", "array")?;
            Ok(Operand::Other)
        }
        _ => {
            // keyword inside an array or dictionary, or a stray byte
            if is_keyword_start(input[*pos]) {
                read_keyword(input, pos);
            } else {
                *pos += 1;
            }
            Ok(Operand::Other)
        }
    }
}

/// Skips nested operands up to and including `close`
fn skip_until(
    input: &[u8],
    pos: &mut usize,
    close: &[u8],
    what: &str,
) -> Result<(), UnmarkError> {
    loop {
        skip_whitespace_and_comments(input, pos);
        if *pos >= input.len() {
            return Err(malformed(&format!("unterminated {}", what)));
        }
        if input[*pos..].starts_with(close) {
            *pos += close.len();
            return Ok(());
        }
        read_operand(input, pos)?;
    }
}

fn read_name(input: &[u8], pos: &mut usize) -> Vec<u8> {
    *pos += 1;
    let start = *pos;
    while *pos < input.len() && !is_whitespace(input[*pos]) && !is_delimiter(input[*pos]) {
        *pos += 1;
    }

    let raw = &input[start..*pos];
    let mut name = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok());
            if let Some(byte) = hex {
                name.push(byte);
                i += 3;
                continue;
            }
        }
        name.push(raw[i]);
        i += 1;
    }
    name
}

fn read_number(input: &[u8], pos: &mut usize) -> Operand {
    let start = *pos;
    *pos += 1;
    while *pos < input.len() && matches!(input[*pos], b'0'..=b'9' | b'.') {
        *pos += 1;
    }
    std::str::from_utf8(&input[start..*pos])
        .ok()
        .and_then(|token| token.parse::<f64>().ok())
        .map_or(Operand::Other, Operand::Number)
}

fn skip_literal_string(input: &[u8], pos: &mut usize) -> Result<(), UnmarkError> {
    *pos += 1;
    let mut depth = 1u32;
    while *pos < input.len() {
        match input[*pos] {
            b'\\' => *pos += 1,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    *pos += 1;
                    return Ok(());
                }
            }
            _ => {}
        }
        *pos += 1;
    }
    Err(malformed("unterminated literal string"))
}

/// Called after `BI`: skips the image dictionary, `ID`, the binary data and
/// the closing `EI`
fn skip_inline_image(input: &[u8], pos: &mut usize) -> Result<(), UnmarkError> {
    loop {
        skip_whitespace_and_comments(input, pos);
        if *pos >= input.len() {
            return Err(malformed("inline image without ID"));
        }
        if input[*pos..].starts_with(b"ID")
            && input.get(*pos + 2).map_or(true, |&b| is_whitespace(b))
        {
            *pos += 3;
            break;
        }
        read_operand(input, pos)?;
    }

    // EI preceded by whitespace and followed by whitespace, a delimiter or the end
    let data_start = (*pos).min(input.len());
    let mut at = data_start;
    while at + 2 <= input.len() {
        if &input[at..at + 2] == b"EI"
            && (at == data_start || is_whitespace(input[at - 1]))
            && input
                .get(at + 2)
                .map_or(true, |&b| is_whitespace(b) || is_delimiter(b))
        {
            *pos = at + 2;
            return Ok(());
        }
        at += 1;
    }
    Err(malformed("inline image without EI"))
}

fn malformed(message: &str) -> UnmarkError {
    UnmarkError::Page(format!("content stream: {}", message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn operators(input: &[u8]) -> Vec<String> {
        parse(input)
            .unwrap()
            .into_iter()
            .map(|op| op.operator)
            .collect()
    }

    const WITH_INLINE_IMAGE: &[u8] = b"q 80 0 0 30 500 20 cm /Im0 Do Q\n\
        q 10 0 0 10 0 0 cm BI /W 1 /H 1 /CS /G /BPC 8 ID \x80 EI Q\n\
        0 0 1 rg 36 36 100 20 re f BT /F1 12 Tf 72 700 Td (Keep me) Tj ET";

    #[test]
    fn test_steps_over_binary_inline_image() {
        assert_eq!(
            operators(WITH_INLINE_IMAGE),
            vec![
                "q", "cm", "Do", "Q", "q", "cm", "BI", "Q", "rg", "re", "f", "BT", "Tf", "Td",
                "Tj", "ET"
            ]
        );
    }

    #[test]
    fn test_inline_image_data_that_looks_like_operators() {
        let input = b"BI /W 2 /H 1 ID Q) EIQ EI q";
        assert_eq!(operators(input), vec!["BI", "q"]);
    }

    #[test]
    fn test_truncated_inline_image_is_an_error() {
        assert!(parse(b"q BI /W 1 /H 1 /BPC 8 ID \x80\x81").is_err());
        assert!(parse(b"q BI /W 1 /H 1").is_err());
    }

    #[test]
    fn test_operands() {
        let ops = parse(b"1.5 0 0 -2 +3 .25 cm /Im#201 Do").unwrap();
        assert_eq!(ops[0].matrix(), Some(Matrix::new(1.5, 0.0, 0.0, -2.0, 3.0, 0.25)));
        assert_eq!(ops[1].name_operand(), Some(b"Im 1".as_slice()));
    }

    #[test]
    fn test_composite_operands_do_not_split_operators() {
        let input = b"[(a) 120 (b]) -30] TJ /P <</MCID 3 /Alt (x >> y)>> BDC <48656C6C6F> Tj EMC";
        let ops = parse(input).unwrap();
        let names: Vec<&str> = ops.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(names, vec!["TJ", "BDC", "Tj", "EMC"]);
        assert_eq!(ops[1].operands.len(), 2);
    }

    #[test]
    fn test_comments_and_digit_operators() {
        assert_eq!(
            operators(b"% header\n0 0 d0 % trailing\nT*"),
            vec!["d0", "T*"]
        );
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        assert!(parse(b"BT (never closed Tj ET").is_err());
    }

    #[test]
    fn test_remove_ops_cuts_only_selected_spans() {
        let ops = parse(WITH_INLINE_IMAGE).unwrap();
        let output = remove_ops(WITH_INLINE_IMAGE, &ops, |op| {
            op.operator == "Do" && op.name_operand() == Some(b"Im0".as_slice())
        });

        let expected = [
            &WITH_INLINE_IMAGE[..22],
            b" ",
            &WITH_INLINE_IMAGE[29..],
        ]
        .concat();
        assert_eq!(output, expected);
        assert_eq!(
            operators(&output),
            vec![
                "q", "cm", "Q", "q", "cm", "BI", "Q", "rg", "re", "f", "BT", "Tf", "Td", "Tj",
                "ET"
            ]
        );
    }
}
