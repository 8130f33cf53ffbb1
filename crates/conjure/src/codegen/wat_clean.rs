// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Cleanup of raw model output into a bare `(module ...)` text.
//!
//! Models wrap code in markdown fences, JSON envelopes or explanatory prose
//! and still emit pre-1.0 instruction names; each of those is undone here so
//! the compiler sees only the module.

const LEGACY_MNEMONICS: [(&str, &str); 5] = [
    ("get_local", "local.get"),
    ("set_local", "local.set"),
    ("tee_local", "local.tee"),
    ("get_global", "global.get"),
    ("set_global", "global.set"),
];

pub fn normalize_wat(raw: &str) -> String {
    let mut s = strip_fences(raw.trim()).to_string();

    if s.starts_with('{') {
        if let Some(inner) = unwrap_json_envelope(&s) {
            s = inner;
        }
    }

    if s.contains("\\n") && !s.contains('\n') {
        s = s.replace("\\n", "\n").replace("\\t", "\t");
    }
    if s.starts_with("(module") && s.contains("\\\"") {
        s = s.replace("\\\"", "\"");
    }

    for (legacy, current) in LEGACY_MNEMONICS {
        if s.contains(legacy) {
            s = replace_mnemonic(&s, legacy, current);
        }
    }

    if let Some(start) = s.find("(module") {
        s.drain(..start);
        if let Some(end) = module_end(&s) {
            s.truncate(end);
        }
    }

    s.trim().to_string()
}

fn strip_fences(s: &str) -> &str {
    let mut out = s;
    if out.starts_with("```") {
        out = out.find('\n').map_or("", |pos| &out[pos + 1..]);
    }
    if let Some(stripped) = out.trim_end().strip_suffix("```") {
        out = stripped;
    }
    out.trim()
}

fn unwrap_json_envelope(s: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(s).ok()?;
    ["wat", "source", "code"]
        .iter()
        .find_map(|field| value.get(field).and_then(|v| v.as_str()))
        .map(ToString::to_string)
}

/// Replaces whole-word occurrences so identifiers such as `$get_local_sum` survive.
fn replace_mnemonic(s: &str, legacy: &str, current: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find(legacy) {
        let before = rest[..pos].chars().next_back();
        let after = rest[pos + legacy.len()..].chars().next();
        let bounded = !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char);
        out.push_str(&rest[..pos]);
        out.push_str(if bounded { current } else { legacy });
        rest = &rest[pos + legacy.len()..];
    }
    out.push_str(rest);
    out
}

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.')
}

/// Byte offset just past the paren closing the leading `(module`, skipping
/// strings and comments. `None` when the module never closes.
fn module_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b';' if bytes.get(i + 1) == Some(&b';') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'(' if bytes.get(i + 1) == Some(&b';') => {
                let close = s[i + 2..].find(";)")?;
                i += 2 + close + 1;
            }
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}
