//! Lowering of hex strings into regex text.
//!
//! A hex string made only of concrete bytes stays a literal; any
//! wildcard nibble, jump or alternation forces the regex bucket. The
//! produced text escapes every non-alphanumeric byte as `\xHH`, so a
//! literal-only result can be decoded back to the raw bytes it denotes
//! with [`decode_literal`] (the exact inverse of the escaping).

use std::fmt::Write;

use itertools::Itertools;

use crate::ast::HexUnit;

/// Lowered form of one hex string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexPattern {
    pub text: String,
    pub literal_only: bool,
}

/// Convert a hex string into regex text, classifying literal vs regex
/// on the way. Never fails; a malformed tree is a parser bug.
pub fn lower(units: &[HexUnit]) -> HexPattern {
    let mut pattern = HexPattern {
        text: String::new(),
        literal_only: true,
    };
    lower_units(&mut pattern, units);
    pattern
}

fn lower_units(out: &mut HexPattern, units: &[HexUnit]) {
    for unit in units {
        match unit {
            HexUnit::Byte {
                high: Some(high),
                low: Some(low),
            } => push_byte(&mut out.text, (high << 4) | low),
            HexUnit::Byte { high: None, low: None } => {
                out.literal_only = false;
                out.text.push('.');
            }
            HexUnit::Byte {
                high: Some(high),
                low: None,
            } => {
                out.literal_only = false;
                push_alternatives(&mut out.text, (0..0x10).map(|low| (high << 4) | low));
            }
            HexUnit::Byte {
                high: None,
                low: Some(low),
            } => {
                out.literal_only = false;
                push_alternatives(&mut out.text, (0..0x10).map(|high| (high << 4) | low));
            }
            HexUnit::Jump { low, high } => {
                out.literal_only = false;
                match (*low, *high) {
                    (None, None) => out.text.push_str(".*"),
                    (Some(n), Some(m)) if n == m => {
                        let _ = write!(out.text, ".{{{n}}}");
                    }
                    (low, Some(m)) => {
                        let _ = write!(out.text, ".{{{},{m}}}", low.unwrap_or(0));
                    }
                    (low, None) => {
                        let _ = write!(out.text, ".{{{},}}", low.unwrap_or(0));
                    }
                }
            }
            HexUnit::Alt(branches) => {
                out.literal_only = false;
                out.text.push('(');
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        out.text.push('|');
                    }
                    lower_units(out, branch);
                }
                out.text.push(')');
            }
        }
    }
}

fn push_alternatives(text: &mut String, bytes: impl Iterator<Item = u8>) {
    let alternatives = bytes.map(|byte| escape_bytes(&[byte])).join("|");
    let _ = write!(text, "({alternatives})");
}

fn push_byte(text: &mut String, byte: u8) {
    if byte.is_ascii_alphanumeric() {
        text.push(byte as char);
    } else {
        let _ = write!(text, "\\x{byte:02X}");
    }
}

/// Escape raw bytes the same way hex lowering does, for display and
/// for the shared literal address space (dedup compares raw bytes, the
/// pattern table prints this form).
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for &byte in bytes {
        push_byte(&mut text, byte);
    }
    text
}

/// Decode literal-only lowered text back into the raw bytes it
/// denotes. Inverse of [`escape_bytes`] and of [`lower`] on
/// literal-only input.
pub fn decode_literal(text: &str) -> Vec<u8> {
    fn hex_digit(d: u8) -> u8 {
        match d {
            b'0'..=b'9' => d - b'0',
            b'a'..=b'f' => d - b'a' + 0xA,
            _ => d - b'A' + 0xA,
        }
    }

    let mut bytes = Vec::with_capacity(text.len());
    let src = text.as_bytes();
    let mut i = 0;
    while i < src.len() {
        match &src[i..] {
            &[b'\\', b'x', hi, lo, ..] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                bytes.push((hex_digit(hi) << 4) | hex_digit(lo));
                i += 4;
            }
            _ => {
                bytes.push(src[i]);
                i += 1;
            }
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::HexUnit;

    fn jump(low: Option<u64>, high: Option<u64>) -> HexUnit {
        HexUnit::Jump { low, high }
    }

    #[test]
    fn empty_hex_string() {
        let p = lower(&[]);
        assert!(p.literal_only);
        assert_eq!(p.text, "");
    }

    #[test]
    fn single_byte() {
        let p = lower(&[HexUnit::byte(0xAB)]);
        assert!(p.literal_only);
        assert_eq!(p.text, r"\xAB");
    }

    #[test]
    fn concrete_bytes_stay_literal() {
        let p = lower(&[
            HexUnit::byte(0xAB),
            HexUnit::byte(0xCD),
            HexUnit::byte(0xFF),
        ]);
        assert!(p.literal_only);
        assert_eq!(p.text, r"\xAB\xCD\xFF");
    }

    #[test]
    fn alphanumeric_bytes_unescaped() {
        let p = lower(&[HexUnit::byte(0x61), HexUnit::byte(0x37)]);
        assert!(p.literal_only);
        assert_eq!(p.text, "a7");
    }

    #[test]
    fn fixed_jump() {
        let p = lower(&[HexUnit::byte(0xAB), jump(Some(5), Some(5)), HexUnit::byte(0xCD)]);
        assert!(!p.literal_only);
        assert_eq!(p.text, r"\xAB.{5}\xCD");
    }

    #[test]
    fn range_jump() {
        let p = lower(&[HexUnit::byte(0xAB), jump(Some(1), Some(5)), HexUnit::byte(0xCD)]);
        assert!(!p.literal_only);
        assert_eq!(p.text, r"\xAB.{1,5}\xCD");
    }

    #[test]
    fn varying_jump() {
        let p = lower(&[HexUnit::byte(0xAB), jump(None, None), HexUnit::byte(0xCD)]);
        assert!(!p.literal_only);
        assert_eq!(p.text, r"\xAB.*\xCD");
    }

    #[test]
    fn varying_range_jump() {
        let p = lower(&[HexUnit::byte(0xAB), jump(Some(1), None), HexUnit::byte(0xCD)]);
        assert!(!p.literal_only);
        assert_eq!(p.text, r"\xAB.{1,}\xCD");
    }

    #[test]
    fn full_wildcard() {
        let p = lower(&[HexUnit::byte(0xAB), HexUnit::wildcard(), HexUnit::byte(0xCD)]);
        assert!(!p.literal_only);
        assert_eq!(p.text, r"\xAB.\xCD");
    }

    #[test]
    fn low_nibble_wildcard() {
        let p = lower(&[
            HexUnit::byte(0xAB),
            HexUnit::Byte { high: Some(0xC), low: None },
            HexUnit::byte(0xCD),
        ]);
        assert!(!p.literal_only);
        assert_eq!(
            p.text,
            r"\xAB(\xC0|\xC1|\xC2|\xC3|\xC4|\xC5|\xC6|\xC7|\xC8|\xC9|\xCA|\xCB|\xCC|\xCD|\xCE|\xCF)\xCD"
        );
    }

    #[test]
    fn high_nibble_wildcard() {
        let p = lower(&[
            HexUnit::byte(0xAB),
            HexUnit::Byte { high: None, low: Some(0xC) },
            HexUnit::byte(0xCD),
        ]);
        assert!(!p.literal_only);
        assert_eq!(
            p.text,
            r"\xAB(\x0C|\x1C|\x2C|\x3C|L|\x5C|l|\x7C|\x8C|\x9C|\xAC|\xBC|\xCC|\xDC|\xEC|\xFC)\xCD"
        );
    }

    #[test]
    fn alternation() {
        let p = lower(&[
            HexUnit::byte(0xAB),
            HexUnit::Alt(vec![
                vec![HexUnit::byte(0x61), HexUnit::byte(0x62)],
                vec![HexUnit::byte(0x70), HexUnit::byte(0x71)],
            ]),
            HexUnit::byte(0xCD),
        ]);
        assert!(!p.literal_only);
        assert_eq!(p.text, r"\xAB(ab|pq)\xCD");
    }

    #[test]
    fn decode_inverts_escaping() {
        assert_eq!(decode_literal(r"\xAB\xCD\xFF"), vec![0xAB, 0xCD, 0xFF]);
        assert_eq!(decode_literal("a7"), b"a7");
        assert_eq!(decode_literal(r"a\x00b"), vec![0x61, 0x00, 0x62]);
        assert_eq!(escape_bytes(&decode_literal(r"ab\x20cd")), r"ab\x20cd");
    }
}
