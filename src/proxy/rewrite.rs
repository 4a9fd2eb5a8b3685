//! Origin-masking rewrites applied to origin responses.
//!
//! Redirect targets and HTML bodies get a blunt global substring
//! replacement of the origin's absolute URL and of protocol-relative
//! references to the origin hostname. Incidental text matches are replaced
//! too; that is accepted.

/// Replaces every reference to the origin with the public proxy identity:
/// the origin absolute URL becomes `https://{public_host}` and
/// `//{origin_host}` becomes `//{public_host}`.
pub fn rewrite_origin_refs(text: &str, origin: &str, origin_host: &str, public_host: &str) -> String {
    text.replace(origin, &format!("https://{public_host}"))
        .replace(&format!("//{origin_host}"), &format!("//{public_host}"))
}

/// Strips the `Domain=...` attribute and the `Secure` flag from one
/// Set-Cookie value, leaving every other attribute in place.
pub fn rewrite_set_cookie(value: &str) -> String {
    value
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter(|part| !part.eq_ignore_ascii_case("secure"))
        .filter(|part| !part.to_ascii_lowercase().starts_with("domain="))
        .collect::<Vec<_>>()
        .join("; ")
}
