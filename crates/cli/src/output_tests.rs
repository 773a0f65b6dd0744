// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn table_pads_columns() {
    let mut table = Table::new(vec!["NAME", "SIZE"]);
    table.row(vec!["a.txt", "120"]);
    table.row(vec!["longer-name.rs", "7"]);
    let rendered = table.render();
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines[0], "NAME            SIZE");
    assert_eq!(lines[1], "a.txt           120");
    assert_eq!(lines[2], "longer-name.rs  7");
}

#[test]
fn empty_table_renders_headers_only() {
    let table = Table::new(vec!["A"]);
    assert!(table.is_empty());
    assert_eq!(table.render(), "A");
}

#[parameterized(
    zero = { 0, 1_000_000, "-" },
    seconds = { 990_000, 1_000_000, "10s" },
    minutes = { 880_000, 1_000_000, "2m" },
    hours = { 1, 7_200_001, "2h" },
    days = { 1_000, 259_200_000, "2d" },
)]
fn age_formatting(epoch_ms: u64, now_ms: u64, expected: &str) {
    assert_eq!(format_age(epoch_ms, now_ms), expected);
}
