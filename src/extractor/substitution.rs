// Positional substitution cipher decoder.
//
// The host ships a packed script of the shape
//   eval(function(...){...}("<encoded>", count, "<charset>", offset, base, ...))
// where each plaintext character is written in base `base` using the
// charset's first characters as digits, shifted up by `offset`, and
// tokens are delimited by the charset's base-th character.

use regex::Regex;
use std::sync::LazyLock;

use crate::extractor::StreamDecoder;

const CALL_MARKER: &str = "}(\"";

static PARAMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\d+),\s*"([^"]+)",\s*(\d+),\s*(\d+),\s*(\d+)"#).unwrap());

pub struct SubstitutionDecoder;

impl StreamDecoder for SubstitutionDecoder {
    fn name(&self) -> &'static str {
        "substitution"
    }

    fn try_decode(&self, payload: &str) -> Option<String> {
        let start = payload.find(CALL_MARKER)? + CALL_MARKER.len();
        let rest = &payload[start..];
        let end = rest.find("\",")?;
        let encoded = &rest[..end];

        // The parameter tuple sits right after the closing quote. Cap the
        // search window without splitting a multibyte character.
        let tail = &rest[end + 2..];
        let mut cap = tail.len().min(100);
        while !tail.is_char_boundary(cap) {
            cap -= 1;
        }
        let caps = PARAMS_RE.captures(&tail[..cap])?;

        let charset = caps.get(2)?.as_str();
        let offset: u32 = caps.get(3)?.as_str().parse().ok()?;
        let base: u32 = caps.get(4)?.as_str().parse().ok()?;

        let decoded = decode_payload(encoded, charset, offset, base)?;

        // Some hosts percent-encode the plaintext, some don't.
        Some(match urlencoding::decode(&decoded) {
            Ok(plain) => plain.into_owned(),
            Err(_) => decoded,
        })
    }
}

fn decode_payload(encoded: &str, charset: &str, offset: u32, base: u32) -> Option<String> {
    let chars: Vec<char> = charset.chars().collect();
    let delimiter = *chars.get(base as usize)?;

    let mut plaintext = String::new();
    for token in encoded.split(delimiter) {
        if token.is_empty() {
            continue;
        }
        // Substitute every charset character with its index, then read
        // the digit string back in the given base.
        let mut digits = String::new();
        for c in token.chars() {
            match chars.iter().position(|&cc| cc == c) {
                Some(idx) => digits.push_str(&idx.to_string()),
                None => digits.push(c),
            }
        }
        let mut value: u32 = 0;
        for d in digits.chars() {
            let d = d.to_digit(10)?;
            value = value.checked_mul(base)?.checked_add(d)?;
        }
        plaintext.push(char::from_u32(value.checked_sub(offset)?)?);
    }
    Some(plaintext)
}
