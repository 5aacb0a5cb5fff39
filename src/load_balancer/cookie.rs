//! Session cookie parsing.
//!
//! Splits `Cookie` headers on `;` and looks pairs up by exact name. No regex,
//! so a configured cookie name is never interpreted as a pattern.

use axum::http::{header, HeaderMap};

/// Value of cookie `name` in a single `Cookie` header value.
pub fn find_cookie<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find_map(|(key, value)| {
            let value = value.trim();
            (key.trim() == name && !value.is_empty()).then_some(value)
        })
}

/// Value of cookie `name` across every `Cookie` header of a request.
pub fn session_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| find_cookie(v, name))
}
