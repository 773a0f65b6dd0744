// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn root_base_path_uses_canonical_name() {
    assert_eq!(session_cookie_name(""), SESSION_COOKIE);
    assert_eq!(session_cookie_name("/"), SESSION_COOKIE);
}

#[test]
fn base_paths_get_stable_distinct_suffixes() {
    let a = session_cookie_name("/a");
    let b = session_cookie_name("/b");
    assert_ne!(a, b);
    assert_eq!(a, session_cookie_name("/a"));
    assert_eq!(a, session_cookie_name("a/"));
    assert!(a.starts_with(SESSION_COOKIE));
    assert_eq!(a.len(), SESSION_COOKIE.len() + 1 + 8);
}

#[parameterized(
    single = { "a=1", "a", Some("1") },
    multi = { "a=1; b=2; c=3", "b", Some("2") },
    spaces = { " a = 1 ;b=2", "a", Some("1") },
    missing = { "a=1", "z", None },
    empty_header = { "", "a", None },
    value_with_equals = { "tok=abc=def", "tok", Some("abc=def") },
)]
fn cookie_parsing(header: &str, name: &str, expected: Option<&str>) {
    assert_eq!(get_cookie(header, name), expected);
}
