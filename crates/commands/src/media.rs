use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use mime::Mime;

use crate::url::is_image_url;

/// The posting service embeds at most four images per post.
pub const MAX_IMAGES: usize = 4;

/// Metadata fetch capability injected by the caller. The classifier only
/// looks at the declared content type; bodies are never downloaded here.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    async fn content_type(&self, url: &str) -> Result<Mime>;
}

/// Result of splitting a free-text argument into residual text and the
/// image URLs found inside it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extracted {
    pub text: String,
    pub images: Vec<String>,
}

/// Scans `text` for image URLs. URLs with a known image extension are taken
/// as-is; the remaining URL tokens are probed concurrently and classified by
/// an `image/*` content type. A failed probe means "not an image", never an
/// error. Every classified image token is removed from the residual text
/// (those past the [`MAX_IMAGES`] cap are dropped outright, keeping the
/// residual a fixed point of this function); everything else is kept in
/// order, joined by single spaces.
pub async fn extract_images(text: &str, probe: &dyn UrlProbe) -> Extracted {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    // One concurrent fan-out for every URL token without a recognizable
    // extension. Zero candidates means zero probes.
    let probed: HashMap<usize, bool> = join_all(tokens.iter().enumerate().filter_map(|(i, tok)| {
        (is_url(tok) && !is_image_url(tok)).then_some(async move { (i, probes_as_image(probe, tok).await) })
    }))
    .await
    .into_iter()
    .collect();

    let mut images = Vec::new();
    let mut words = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        let is_image = is_url(tok)
            && (is_image_url(tok) || probed.get(&i).copied().unwrap_or(false));
        if is_image {
            if images.len() < MAX_IMAGES {
                images.push((*tok).to_owned());
            }
        } else {
            words.push(*tok);
        }
    }

    Extracted {
        text: words.join(" "),
        images,
    }
}

async fn probes_as_image(probe: &dyn UrlProbe, url: &str) -> bool {
    matches!(probe.content_type(url).await, Ok(m) if m.type_() == mime::IMAGE)
}

fn is_url(token: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        token.len() > scheme.len()
            && token
                .get(..scheme.len())
                .is_some_and(|p| p.eq_ignore_ascii_case(scheme))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    /// Probe that knows a fixed set of URLs; everything else errors.
    struct StubProbe(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl UrlProbe for StubProbe {
        async fn content_type(&self, url: &str) -> Result<Mime> {
            let raw = self.0.get(url).ok_or_else(|| anyhow!("probe failed: {url}"))?;
            Ok(raw.parse()?)
        }
    }

    fn failing_probe() -> StubProbe {
        StubProbe(HashMap::new())
    }

    #[tokio::test]
    async fn plain_text_needs_no_probe() {
        let out = extract_images("hello world", &failing_probe()).await;
        assert_eq!(out.text, "hello world");
        assert!(out.images.is_empty());
    }

    #[tokio::test]
    async fn extension_urls_skip_the_probe() {
        let out = extract_images("photo https://example.com/a.png", &failing_probe()).await;
        assert_eq!(out.text, "photo");
        assert_eq!(out.images, vec!["https://example.com/a.png"]);
    }

    #[tokio::test]
    async fn probe_classifies_extensionless_urls() {
        let probe = StubProbe(HashMap::from([
            ("https://cdn.example.com/abc123", "image/png"),
            ("https://example.com/article", "text/html"),
        ]));
        let out = extract_images(
            "look https://cdn.example.com/abc123 at https://example.com/article",
            &probe,
        )
        .await;
        assert_eq!(out.text, "look at https://example.com/article");
        assert_eq!(out.images, vec!["https://cdn.example.com/abc123"]);
    }

    #[tokio::test]
    async fn probe_failure_is_not_an_image() {
        let out = extract_images("see https://cdn.example.com/broken", &failing_probe()).await;
        assert_eq!(out.text, "see https://cdn.example.com/broken");
        assert!(out.images.is_empty());
    }

    #[tokio::test]
    async fn mixed_sources_preserve_text_order() {
        let probe = StubProbe(HashMap::from([(
            "https://cdn.example.com/xyz",
            "image/jpeg",
        )]));
        let out = extract_images(
            "a https://cdn.example.com/xyz b https://example.com/c.gif d",
            &probe,
        )
        .await;
        assert_eq!(out.text, "a b d");
        assert_eq!(
            out.images,
            vec!["https://cdn.example.com/xyz", "https://example.com/c.gif"]
        );
    }

    #[tokio::test]
    async fn cap_keeps_the_first_four_and_drops_the_rest() {
        let text = "x https://e.com/1.png https://e.com/2.png https://e.com/3.png \
                    https://e.com/4.png https://e.com/5.png";
        let out = extract_images(text, &failing_probe()).await;
        assert_eq!(
            out.images,
            vec![
                "https://e.com/1.png",
                "https://e.com/2.png",
                "https://e.com/3.png",
                "https://e.com/4.png",
            ]
        );
        assert_eq!(out.text, "x");
        // Even past the cap, the residual stays a fixed point.
        let again = extract_images(&out.text, &failing_probe()).await;
        assert_eq!(again.text, out.text);
        assert!(again.images.is_empty());
    }

    #[tokio::test]
    async fn extraction_is_idempotent_on_its_own_residual() {
        let probe = StubProbe(HashMap::from([(
            "https://cdn.example.com/pic",
            "image/webp",
        )]));
        let first = extract_images("pics https://cdn.example.com/pic https://e.com/a.jpg", &probe).await;
        let second = extract_images(&first.text, &probe).await;
        assert_eq!(second.text, first.text);
        assert!(second.images.is_empty());
    }

    #[tokio::test]
    async fn duplicates_pass_through() {
        let out = extract_images("https://e.com/a.jpg https://e.com/a.jpg", &failing_probe()).await;
        assert_eq!(out.images, vec!["https://e.com/a.jpg", "https://e.com/a.jpg"]);
        assert_eq!(out.text, "");
    }
}
