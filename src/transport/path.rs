use tracing::warn;
use url::Url;

/// File suffixes that identify static assets. Paths ending in one of these
/// never gain a trailing slash.
const STATIC_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "bmp", "avif", // images
    "css", "js", "mjs", "map", // styles and scripts
    "woff", "woff2", "ttf", "otf", "eot", // fonts
    "pdf", "txt", "csv", "xml", // documents
    "zip", "gz", "tgz", "tar", "rar", "7z", // archives
];

/// Map a caller supplied path onto the canonical request path relative to
/// `api_base`.
///
/// Accepts bare paths, absolute URLs and paths carrying a query string. The
/// result always starts with `/`, never starts with `api_base`, and ends with
/// a single `/` unless it is the root or names a static file. The query
/// string, if any, is reattached unchanged.
///
/// Normalization is idempotent: `normalize(b, &normalize(b, p)) == normalize(b, p)`.
pub fn normalize(api_base: &str, input: &str) -> String {
    let raw = if is_absolute_url(input) {
        match Url::parse(input) {
            Ok(url) => match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            },
            Err(err) => {
                warn!(input = %input, error = %err, "cannot parse absolute url, passing through");
                return input.to_string();
            }
        }
    } else {
        input.to_string()
    };

    let (path, query) = match raw.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (raw, None),
    };

    let path = canonical_path(api_base, &path);

    match query {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    }
}

pub(crate) fn is_absolute_url(input: &str) -> bool {
    match input.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Rebuild `path` from its non-empty segments after dropping every leading
/// run of the base segments. Matching is on whole segments, so `/apiary`
/// survives a base of `/api`.
fn canonical_path(api_base: &str, path: &str) -> String {
    let base: Vec<&str> = api_base.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if !base.is_empty() {
        while segments.starts_with(&base) {
            segments.drain(..base.len());
        }
    }

    let Some(last) = segments.last() else {
        return "/".to_string();
    };
    let joined = format!("/{}", segments.join("/"));
    if is_static_file(last) {
        joined
    } else {
        joined + "/"
    }
}

fn is_static_file(segment: &str) -> bool {
    match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            STATIC_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}
