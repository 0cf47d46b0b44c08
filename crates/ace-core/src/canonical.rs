//! Canonical JSON and the hash functions applied to it. Signer and verifier
//! must agree on these bytes exactly, so everything that enters a hash or a
//! MAC goes through [`canonical_json`].

use std::cmp::Ordering;
use std::fmt::Write as _;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};
use crate::types::AnyJson;

type HmacSha256 = Hmac<Sha256>;

/// Deterministic serialization: object keys sorted by UTF-16 code-unit
/// order, array order preserved, compact separators, standard JSON escaping.
pub fn canonical_json(value: &AnyJson) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &AnyJson, out: &mut String) {
    match value {
        AnyJson::Null => out.push_str("null"),
        AnyJson::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        AnyJson::Number(n) => {
            let _ = write!(out, "{n}");
        }
        AnyJson::String(s) => write_string(s, out),
        AnyJson::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        AnyJson::Object(map) => {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_by(|a, b| utf16_cmp(a, b));
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Lowercase hex SHA-256 of the UTF-8 bytes of `input`.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lowercase hex HMAC-SHA-256 with UTF-8 key and message.
pub fn hmac_sha256_hex(key: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a lowercase hex HMAC-SHA-256 tag. A tag that is
/// not valid hex never matches.
pub fn hmac_sha256_verify(key: &str, message: &str, expected_hex: &str) -> Result<bool> {
    let Ok(expected) = hex::decode(expected_hex) else {
        return Ok(false);
    };
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())?;
    mac.update(message.as_bytes());
    Ok(mac.verify_slice(&expected).is_ok())
}

/// Convert a USDC amount to integer micro-USDC, rounding to nearest.
pub fn to_microusdc(usdc: f64) -> Result<u64> {
    if !usdc.is_finite() || usdc <= 0.0 {
        return Err(Error::AmountOutOfRange(format!("{usdc} USDC")));
    }
    let micro = (usdc * 1_000_000.0).round();
    if micro < 1.0 || micro > u64::MAX as f64 {
        return Err(Error::AmountOutOfRange(format!("{usdc} USDC")));
    }
    Ok(micro as u64)
}

/// Render micro-USDC with exactly six fractional digits.
pub fn format_usdc(micro: u64) -> String {
    format!("{}.{:06}", micro / 1_000_000, micro % 1_000_000)
}
