//! Refresh token cookie handling.

use axum::http::{HeaderMap, header};

use crate::config::Config;

/// `Set-Cookie` value carrying a refresh token, valid for the refresh token lifetime.
pub fn refresh_cookie(token: &str, config: &Config) -> String {
    build_cookie(token, config.auth.refresh_token_ttl.as_secs(), config)
}

/// `Set-Cookie` value that removes the refresh cookie from the browser.
pub fn clear_refresh_cookie(config: &Config) -> String {
    build_cookie("", 0, config)
}

fn build_cookie(value: &str, max_age: u64, config: &Config) -> String {
    let cookie = &config.auth.cookie;
    let mut out = format!(
        "{}={}; Path={}; HttpOnly; SameSite={}; Max-Age={}",
        cookie.name,
        value,
        cookie.path,
        cookie.same_site.as_str(),
        max_age
    );
    if config.cookie_secure() {
        out.push_str("; Secure");
    }
    out
}

/// Value of the named cookie from the request's `Cookie` headers, if present and non-empty.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
