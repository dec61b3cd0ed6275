use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use url::Url;

/// Joins two remote path fragments with exactly one `/` at the seam.
pub fn join_remote(base: &str, rel: &str) -> String {
    match (base.ends_with('/'), rel.starts_with('/')) {
        (true, true) => format!("{}{}", base, &rel[1..]),
        (false, false) if !base.is_empty() && !rel.is_empty() => format!("{base}/{rel}"),
        _ => format!("{base}{rel}"),
    }
}

/// Removes the remote root (the folder's URL path) from a listed href.
/// Hrefs outside the root are returned unchanged.
pub fn strip_remote_root<'a>(href: &'a str, root_path: &str) -> &'a str {
    if root_path.is_empty() {
        return href;
    }
    if root_path.ends_with('/') {
        return href.strip_prefix(root_path).unwrap_or(href);
    }
    href.strip_prefix(root_path)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(href)
}

/// The URL path with percent escapes resolved, in the same form listing
/// hrefs take once parsed.
pub fn decoded_url_path(url: &Url) -> Cow<'_, str> {
    percent_decode_str(url.path()).decode_utf8_lossy()
}

pub fn last_segment(path: &str) -> Option<&str> {
    path.split('/').rev().find(|segment| !segment.is_empty())
}
