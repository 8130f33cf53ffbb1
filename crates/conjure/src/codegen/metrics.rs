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

use serde::Serialize;

/// Rough structural counts of a generated module, logged alongside each
/// synthesis so odd generations are easy to spot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceMetrics {
    pub funcs: u32,
    pub exports: u32,
    pub imports: u32,
    pub loops: u32,
    pub arithmetic_ops: u32,
    pub length_bytes: usize,
}

impl SourceMetrics {
    pub fn analyze(wat: &str) -> Self {
        let mut metrics = Self {
            length_bytes: wat.len(),
            ..Self::default()
        };
        for line in wat.lines() {
            let code = line.split(";;").next().unwrap_or_default();
            metrics.funcs += count(code, "(func");
            metrics.exports += count(code, "(export");
            metrics.imports += count(code, "(import");
            metrics.loops += count(code, "(loop") + count_bare(code, "loop");
            metrics.arithmetic_ops += ["add", "sub", "mul", "div_s", "div_u", "div", "rem_s", "rem_u"]
                .iter()
                .map(|op| {
                    ["i32.", "i64.", "f32.", "f64."]
                        .iter()
                        .map(|ty| count_op(code, &format!("{ty}{op}")))
                        .sum::<u32>()
                })
                .sum::<u32>();
        }
        metrics
    }
}

fn count(code: &str, needle: &str) -> u32 {
    u32::try_from(code.matches(needle).count()).unwrap_or(u32::MAX)
}

/// Counts `needle` as a whole instruction token (not a prefix of a longer one).
fn count_op(code: &str, needle: &str) -> u32 {
    let hits = code
        .match_indices(needle)
        .filter(|(pos, _)| {
            code[pos + needle.len()..]
                .chars()
                .next()
                .map_or(true, |c| c.is_whitespace() || c == ')')
        })
        .count();
    u32::try_from(hits).unwrap_or(u32::MAX)
}

fn count_bare(code: &str, keyword: &str) -> u32 {
    u32::try_from(
        code.split_whitespace()
            .filter(|token| *token == keyword)
            .count(),
    )
    .unwrap_or(u32::MAX)
}
