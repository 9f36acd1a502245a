// Base64 fragment reconstruction decoder.
//
// A different host generation stores the media address as base64
// fragments in local variables, plus a small helper function wrapping
// `atob`, and rebuilds the address by concatenating helper calls:
//
//   function xk(s) { return atob(s); }
//   var p1 = 'aHR0cHM6';
//   var p2 = 'Ly9jZG4...';
//   var decoy = xk(p1) + xk(p3);
//   var src = xk(p1) + xk(p2);
//
// The decoder finds the helper by its atob reference, collects the
// quoted-literal variables, and decodes each concatenation assignment
// in call order.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::extractor::StreamDecoder;

static DECODE_FN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"function\s+([A-Za-z_$][\w$]*)\s*\([^)]*\)\s*\{[^}]*\batob\b").unwrap()
});

static VAR_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:var|let|const)\s+([A-Za-z_$][\w$]*)\s*=\s*['"]([A-Za-z0-9+/=_-]*)['"]"#)
        .unwrap()
});

pub struct FragmentDecoder;

impl StreamDecoder for FragmentDecoder {
    fn name(&self) -> &'static str {
        "fragments"
    }

    fn try_decode(&self, payload: &str) -> Option<String> {
        let script = normalize(payload);

        let fn_name = DECODE_FN_RE
            .captures(&script)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())?;

        let literals: HashMap<String, String> = VAR_LITERAL_RE
            .captures_iter(&script)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();
        if literals.is_empty() {
            return None;
        }

        // Assignments whose right-hand side is one or more helper calls
        // joined by `+`.
        let escaped = regex::escape(&fn_name);
        let concat_re = Regex::new(&format!(
            r"=\s*((?:{f}\(\s*[A-Za-z_$][\w$]*\s*\)\s*\+\s*)*{f}\(\s*[A-Za-z_$][\w$]*\s*\))",
            f = escaped
        ))
        .ok()?;
        let call_re = Regex::new(&format!(r"{}\(\s*([A-Za-z_$][\w$]*)\s*\)", escaped)).ok()?;

        let mut concatenations = Vec::new();
        for caps in concat_re.captures_iter(&script) {
            let rhs = &caps[1];
            let mut assembled = String::new();
            let mut complete = true;
            for call in call_re.captures_iter(rhs) {
                match literals.get(&call[1]).and_then(|v| decode_b64(v)) {
                    Some(part) => assembled.push_str(&part),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete && !assembled.is_empty() {
                concatenations.push(assembled);
            }
        }

        // The second assembled string has been observed to carry the
        // media address when more than one exists.
        match concatenations.len() {
            0 => None,
            1 => concatenations.into_iter().next(),
            _ => concatenations.into_iter().nth(1),
        }
    }
}

fn normalize(payload: &str) -> String {
    let unescaped = payload.replace("\\'", "'").replace("\\\"", "\"");
    let mut out = String::with_capacity(unescaped.len());
    let mut in_ws = false;
    for c in unescaped.chars() {
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

/// Decode standard or URL-safe base64, tolerating missing padding.
fn decode_b64(input: &str) -> Option<String> {
    let mut normalized = input.replace('-', "+").replace('_', "/");
    while normalized.len() % 4 != 0 {
        normalized.push('=');
    }
    let bytes = STANDARD.decode(normalized).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_b64_alphabets() {
        // "https://a?b=c" in standard and URL-safe alphabets.
        assert_eq!(decode_b64("aHR0cHM6Ly9hP2I9Yw==").as_deref(), Some("https://a?b=c"));
        assert_eq!(decode_b64("aHR0cHM6Ly9hP2I9Yw").as_deref(), Some("https://a?b=c"));
        // ">>??" exercises the +/ positions: Pj4/Pw== vs Pj4_Pw
        assert_eq!(decode_b64("Pj4/Pw==").as_deref(), Some(">>??"));
        assert_eq!(decode_b64("Pj4_Pw").as_deref(), Some(">>??"));
    }

    #[test]
    fn test_single_concatenation() {
        let script = r#"
            function dx(v) { return atob(v); }
            var a = 'aHR0cHM6Ly9jZG4uZXhhbXBsZS5vcmc=';
            var b = 'L2xpdmUvaW5kZXgubTN1OD90b2tlbj14eXo=';
            var src = dx(a) + dx(b);
        "#;
        assert_eq!(
            FragmentDecoder.try_decode(script).as_deref(),
            Some("https://cdn.example.org/live/index.m3u8?token=xyz")
        );
    }

    #[test]
    fn test_prefers_second_concatenation() {
        let script = r#"
            function dx(v) { return atob(v); }
            var a = 'ZGVjb3k=';
            var b = 'aHR0cHM6Ly9jZG4uZXhhbXBsZS5vcmcveC5tM3U4';
            var alt = dx(a);
            var src = dx(b);
        "#;
        assert_eq!(
            FragmentDecoder.try_decode(script).as_deref(),
            Some("https://cdn.example.org/x.m3u8")
        );
    }

    #[test]
    fn test_escaped_quotes_are_normalized() {
        let script =
            "function qq(s){return atob(s);} var u = \\'aHR0cHM6Ly9ob3N0L2EubTN1OA==\\'; var z = qq(u);";
        assert_eq!(
            FragmentDecoder.try_decode(script).as_deref(),
            Some("https://host/a.m3u8")
        );
    }

    #[test]
    fn test_no_helper_function_fails() {
        let script = "var a = 'aHR0cA=='; var b = a + a;";
        assert!(FragmentDecoder.try_decode(script).is_none());
    }

    #[test]
    fn test_helper_without_concatenations_fails() {
        let script = "function dx(v) { return atob(v); } var a = 'aHR0cA==';";
        assert!(FragmentDecoder.try_decode(script).is_none());
    }
}
