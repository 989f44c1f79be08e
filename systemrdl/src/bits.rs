// Licensed under the Apache-2.0 license

//! Sized integer literals.
//!
//! SystemRDL admits Verilog-style literals with an explicit bit width
//! (`4'hF`, `32'd7`, `'b101`). Arithmetic in this toolkit is capped at
//! 64 bits; literals wider than that, or whose value does not fit the
//! declared width, are rejected.

/// A decoded numeric literal. `width` is present only for sized literals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedNumber {
    pub value: u64,
    pub width: Option<u32>,
}

/// Errors from literal decoding; the expression evaluator maps these onto
/// diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NumberError {
    /// Width above 64 bits, or value does not fit the declared width.
    Overflow(String),
    /// Not a recognizable literal (bad digit for the base, empty digits).
    Malformed(String),
}

/// Mask `value` down to `width` bits. A width of 64 or more is a no-op.
pub fn mask(value: u64, width: u32) -> u64 {
    if width >= 64 {
        value
    } else {
        value & ((1u64 << width) - 1)
    }
}

/// Decode a numeric literal as lexed: decimal (`42`, `1_000`), prefixed
/// (`0x1F`, `0b101`), or sized Verilog form (`8'hFF`, `'d9`).
pub fn parse_number(text: &str) -> Result<ParsedNumber, NumberError> {
    if let Some(tick) = text.find('\'') {
        let width_part = &text[..tick];
        let rest = &text[tick + 1..];
        let width = if width_part.is_empty() {
            None
        } else {
            let w: u32 = strip_separators(width_part)
                .parse()
                .map_err(|_| NumberError::Malformed(format!("bad width in '{}'", text)))?;
            if w == 0 || w > 64 {
                return Err(NumberError::Overflow(format!(
                    "literal width {} is outside 1..=64",
                    w
                )));
            }
            Some(w)
        };
        let (base, digits) = rest.split_at(1);
        let radix = match base {
            "h" | "H" => 16,
            "d" | "D" => 10,
            "o" | "O" => 8,
            "b" | "B" => 2,
            _ => return Err(NumberError::Malformed(format!("bad base in '{}'", text))),
        };
        let value = parse_digits(&strip_separators(digits), radix, text)?;
        if let Some(w) = width {
            if value != mask(value, w) {
                return Err(NumberError::Overflow(format!(
                    "value of '{}' does not fit in {} bits",
                    text, w
                )));
            }
        }
        return Ok(ParsedNumber { value, width });
    }

    let clean = strip_separators(text);
    let value = if let Some(hex) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        parse_digits(hex, 16, text)?
    } else if let Some(bin) = clean.strip_prefix("0b").or_else(|| clean.strip_prefix("0B")) {
        parse_digits(bin, 2, text)?
    } else {
        parse_digits(&clean, 10, text)?
    };
    Ok(ParsedNumber { value, width: None })
}

fn strip_separators(text: &str) -> String {
    text.chars().filter(|c| *c != '_').collect()
}

fn parse_digits(digits: &str, radix: u32, original: &str) -> Result<u64, NumberError> {
    if digits.is_empty() {
        return Err(NumberError::Malformed(format!("empty literal '{}'", original)));
    }
    u64::from_str_radix(digits, radix).map_err(|_| {
        if digits.chars().all(|c| c.is_digit(radix)) {
            NumberError::Overflow(format!("literal '{}' exceeds 64 bits", original))
        } else {
            NumberError::Malformed(format!("bad digit in literal '{}'", original))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_forms() {
        assert_eq!(parse_number("42").unwrap(), ParsedNumber { value: 42, width: None });
        assert_eq!(parse_number("0x1F").unwrap().value, 0x1F);
        assert_eq!(parse_number("0b101").unwrap().value, 5);
        assert_eq!(parse_number("1_000").unwrap().value, 1000);
    }

    #[test]
    fn test_sized_forms() {
        assert_eq!(
            parse_number("4'hF").unwrap(),
            ParsedNumber { value: 15, width: Some(4) }
        );
        assert_eq!(parse_number("'b101").unwrap(), ParsedNumber { value: 5, width: None });
        assert_eq!(parse_number("32'd7").unwrap().width, Some(32));
    }

    #[test]
    fn test_overflow() {
        assert!(matches!(parse_number("4'h1F"), Err(NumberError::Overflow(_))));
        assert!(matches!(parse_number("65'h0"), Err(NumberError::Overflow(_))));
        assert!(matches!(
            parse_number("99999999999999999999999"),
            Err(NumberError::Overflow(_))
        ));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(parse_number("4'hZZ"), Err(NumberError::Malformed(_))));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(0xFF, 4), 0xF);
        assert_eq!(mask(0xFF, 64), 0xFF);
    }
}
