//! URL helpers: path encoding, query filtering and redirect locations

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;
use url::form_urlencoded;

/// Characters left unescaped in a path segment (RFC 3986 unreserved)
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode every segment of a path, keeping the separators
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode a percent-encoded request path
///
/// Returns `None` if the decoded bytes are not valid UTF-8.
pub fn decode_path(raw: &str) -> Option<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Parse a raw query string into ordered pairs
pub fn parse_query(raw: Option<&str>) -> Vec<(String, String)> {
    match raw {
        Some(raw) if !raw.is_empty() => form_urlencoded::parse(raw.as_bytes())
            .into_owned()
            .collect(),
        _ => Vec::new(),
    }
}

/// Keys never forwarded: `q` carries the site's internal route
const EXCLUDED_KEYS: &[&str] = &["q"];

/// Keep only query parameters that are safe to put in a redirect
///
/// A parameter is dropped when its key is empty or excluded, or when its key or value
/// carries a URL scheme (`http:`, `javascript:`), a protocol-relative
/// prefix (`//`, `\\`), or control characters. Order is preserved.
pub fn filter_query<I>(query: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    query
        .into_iter()
        .filter(|(key, value)| {
            let keep = !key.is_empty()
                && !EXCLUDED_KEYS.contains(&key.as_str())
                && is_clean(key)
                && is_clean(value);
            if !keep {
                debug!("Dropping query parameter {:?}", key);
            }
            keep
        })
        .collect()
}

fn is_clean(token: &str) -> bool {
    if token.chars().any(char::is_control) {
        return false;
    }

    let trimmed = token.trim_start();
    if trimmed.starts_with("//") || trimmed.starts_with("\\\\") || trimmed.contains("://") {
        return false;
    }

    !has_scheme(trimmed)
}

/// `scheme ":"` per RFC 3986: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )
fn has_scheme(token: &str) -> bool {
    let Some((prefix, _)) = token.split_once(':') else {
        return false;
    };
    let mut chars = prefix.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => chars
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        _ => false,
    }
}

/// Append `?query` to a location when there are parameters
pub fn append_query(location: &mut String, query: &[(String, String)]) {
    if query.is_empty() {
        return;
    }
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish();
    location.push('?');
    location.push_str(&encoded);
}

/// URL of a file on the origin: `{origin}/{remote_dir}/{relative_path}`
///
/// `origin_url` must already be absolute and have no trailing slash.
pub fn origin_file_url(origin_url: &str, remote_dir: &str, relative_path: &str) -> String {
    let path = format!(
        "{}/{}",
        remote_dir.trim_matches('/'),
        relative_path.trim_start_matches('/')
    );
    format!("{}/{}", origin_url, encode_path(path.trim_start_matches('/')))
}

/// Location that sends the client straight to the origin
pub fn hotlink_location(
    origin_url: &str,
    remote_dir: &str,
    relative_path: &str,
    query: &[(String, String)],
) -> String {
    let mut location = origin_file_url(origin_url, remote_dir, relative_path);
    append_query(&mut location, query);
    location
}

/// Location that repeats the original request against the local server
pub fn local_location(request_path: &str, query: &[(String, String)]) -> String {
    let mut location = format!("/{}", encode_path(request_path.trim_start_matches('/')));
    append_query(&mut location, query);
    location
}
