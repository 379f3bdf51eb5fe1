use std::sync::LazyLock;

use regex::Regex;

/// Extensions accepted without probing the URL.
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Canonical web URL of a post on the remote service, e.g.
/// `https://bsky.app/profile/alice.example.com/post/3kabc123`.
/// Scheme and host match case-insensitively; path segments must be free of
/// slashes and whitespace.
static POST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:https?://bsky\.app)/profile/([^/\s]+)/post/([^/\s]+)").unwrap()
});

/// True iff `url` ends in one of the known image extensions, optionally
/// followed by a query string. Case-insensitive, never fails.
#[must_use]
pub fn is_image_url(url: &str) -> bool {
    let path = url.split('?').next().unwrap_or(url);
    let Some((_, ext)) = path.rsplit_once('.') else {
        return false;
    };
    IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e))
}

/// First canonical post URL embedded in `text`, if any. Later occurrences on
/// the same line are ignored; callers tracking a stream of lines keep the
/// most recent non-`None` result.
#[must_use]
pub fn extract_tracked_post_url(text: &str) -> Option<&str> {
    POST_URL.find(text).map(|m| m.as_str())
}

/// The actor and record key segments of a canonical post URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostLocator {
    pub actor: String,
    pub rkey: String,
}

#[must_use]
pub fn parse_post_url(url: &str) -> Option<PostLocator> {
    let caps = POST_URL.captures(url)?;
    Some(PostLocator {
        actor: caps[1].to_owned(),
        rkey: caps[2].to_owned(),
    })
}
