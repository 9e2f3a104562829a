//! ZWRITE format: the engine's printable, round-trippable spelling of a string.
//!
//! Canonical numbers are written bare. Anything else is a concatenation
//! (`_`) of quoted printable runs, with embedded quotes doubled, and
//! `$C(...)` runs for control characters and non-ASCII bytes.

use thiserror::Error as ThisError;

use crate::number::Number;

/// Input is not a valid ZWRITE string
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("invalid ZWRITE string at byte {position}")]
pub struct InvalidZwrite {
    pub position: usize,
}

fn printable(b: u8) -> bool {
    (0x20..0x7f).contains(&b)
}

/// Encode raw bytes in ZWRITE format
pub fn str2zwr(input: &[u8]) -> Vec<u8> {
    if Number::is_canonical(input) {
        return input.to_vec();
    }
    if input.is_empty() {
        return b"\"\"".to_vec();
    }

    let mut out = Vec::with_capacity(input.len() + 2);
    let mut i = 0;
    while i < input.len() {
        if !out.is_empty() {
            out.push(b'_');
        }
        if printable(input[i]) {
            out.push(b'"');
            while i < input.len() && printable(input[i]) {
                if input[i] == b'"' {
                    out.push(b'"');
                }
                out.push(input[i]);
                i += 1;
            }
            out.push(b'"');
        } else {
            out.extend_from_slice(b"$C(");
            let mut first = true;
            while i < input.len() && !printable(input[i]) {
                if !first {
                    out.push(b',');
                }
                out.extend_from_slice(input[i].to_string().as_bytes());
                first = false;
                i += 1;
            }
            out.push(b')');
        }
    }
    out
}

// Longest spellings first so `$C(` does not shadow `$CHAR(`
const CHAR_PREFIXES: [&[u8]; 5] = [b"$ZCHAR(", b"$CHAR(", b"$ZCH(", b"$ZC(", b"$C("];

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn fail<T>(&self) -> Result<T, InvalidZwrite> {
        Err(InvalidZwrite { position: self.pos })
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn eat(&mut self, expected: &[u8]) -> bool {
        if self.input[self.pos..].starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    fn quoted(&mut self, out: &mut Vec<u8>) -> Result<(), InvalidZwrite> {
        self.pos += 1;
        loop {
            match self.peek() {
                None => return self.fail(),
                Some(b'"') => {
                    self.pos += 1;
                    if self.peek() == Some(b'"') {
                        out.push(b'"');
                        self.pos += 1;
                    } else {
                        return Ok(());
                    }
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    fn chars(&mut self, out: &mut Vec<u8>) -> Result<(), InvalidZwrite> {
        let opened = CHAR_PREFIXES.iter().any(|prefix| self.eat(prefix));
        if !opened {
            return self.fail();
        }
        loop {
            let start = self.pos;
            let mut value: u32 = 0;
            while let Some(b) = self.peek().filter(u8::is_ascii_digit) {
                value = value * 10 + (b - b'0') as u32;
                if value > 0xff {
                    return self.fail();
                }
                self.pos += 1;
            }
            if self.pos == start {
                return self.fail();
            }
            out.push(value as u8);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b')') => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => return self.fail(),
            }
        }
    }
}

/// Decode a ZWRITE string back to raw bytes
pub fn zwr2str(input: &[u8]) -> Result<Vec<u8>, InvalidZwrite> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if Number::is_canonical(input) {
        return Ok(input.to_vec());
    }
    let mut parser = Parser { input, pos: 0 };
    let mut out = Vec::with_capacity(input.len());
    loop {
        match parser.peek() {
            Some(b'"') => parser.quoted(&mut out)?,
            Some(b'$') => parser.chars(&mut out)?,
            _ => return parser.fail(),
        }
        match parser.peek() {
            None => return Ok(out),
            Some(b'_') => parser.pos += 1,
            Some(_) => return parser.fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_plain_strings_and_numbers() {
        assert_eq!(str2zwr(b"hello"), b"\"hello\"");
        assert_eq!(str2zwr(b"say \"hi\""), b"\"say \"\"hi\"\"\"");
        assert_eq!(str2zwr(b""), b"\"\"");
        assert_eq!(str2zwr(b"-1.5"), b"-1.5");
        assert_eq!(str2zwr(b"01"), b"\"01\"");
    }

    #[test]
    fn encodes_control_characters() {
        assert_eq!(str2zwr(b"a\nb"), b"\"a\"_$C(10)_\"b\"");
        assert_eq!(str2zwr(b"\r\n"), b"$C(13,10)");
        assert_eq!(str2zwr(&[0xff, b'x']), b"$C(255)_\"x\"");
    }

    #[test]
    fn decodes() {
        assert_eq!(zwr2str(b"\"a\"_$C(10)_\"b\"").unwrap(), b"a\nb");
        assert_eq!(zwr2str(b"$CHAR(72,105)").unwrap(), b"Hi");
        assert_eq!(zwr2str(b"$ZCH(200)").unwrap(), vec![200u8]);
        assert_eq!(zwr2str(b"\"\"\"\"").unwrap(), b"\"");
        assert_eq!(zwr2str(b"42").unwrap(), b"42");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(zwr2str(b"\"open").is_err());
        assert!(zwr2str(b"abc").is_err());
        assert!(zwr2str(b"$C(256)").is_err());
        assert!(zwr2str(b"$C()").is_err());
        assert!(zwr2str(b"\"a\"\"b").is_err());
        assert!(zwr2str(b"\"a\"_").is_err());
        assert!(zwr2str(b"_").is_err());
    }

    #[test]
    fn empty_input_decodes_to_empty() {
        assert_eq!(zwr2str(b"").unwrap(), b"");
        assert_eq!(zwr2str(b"\"\"").unwrap(), b"");
    }

    #[test]
    fn decoding_inverts_encoding() {
        let samples: [&[u8]; 5] = [b"plain", b"tab\there", b"\"quoted\"", &[0, 1, 2, 200], b"7"];
        for sample in samples {
            assert_eq!(zwr2str(&str2zwr(sample)).unwrap(), sample);
        }
    }
}
