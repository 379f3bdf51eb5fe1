//! Pure command-parsing core for the relay bot: classifies one chat line
//! into a typed [`Command`] (or nothing), with embedded image URLs resolved
//! through an injected [`UrlProbe`].

pub mod media;
pub mod url;

pub use media::{Extracted, MAX_IMAGES, UrlProbe, extract_images};
pub use url::{PostLocator, extract_tracked_post_url, is_image_url, parse_post_url};

/// One recognized instruction. Exactly one variant per input line; a line
/// matching no rule parses to `None` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Publish `text` with up to [`MAX_IMAGES`] images.
    Twit { text: String, images: Vec<String> },
    /// Re-publish `nick`'s last tracked message, optionally extended.
    Quote {
        nick: String,
        extra: Option<String>,
        images: Vec<String>,
    },
    /// Reply to the most recently referenced remote post.
    Reply { text: String, images: Vec<String> },
    /// Delete the bot's latest post; `force` bypasses the recency guard.
    Untwit { force: bool },
    /// Summarize the named account's latest post.
    Sup { handle: String },
    /// Report when a nick last spoke.
    Seen { nick: String },
}

/// Tries the rules in fixed priority order (`twit`, `quote`, `reply`,
/// `untwit`, `sup`, `seen`) and returns the first structural match. The
/// keyword is matched case-insensitively; the line is expected to be
/// pre-trimmed by the caller. Never fails: malformed input is ordinary
/// chat text.
pub async fn parse_command(line: &str, probe: &dyn UrlProbe) -> Option<Command> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let keyword = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    if keyword.eq_ignore_ascii_case("twit") && !rest.is_empty() {
        let Extracted { text, images } = extract_images(rest, probe).await;
        return Some(Command::Twit { text, images });
    }

    if keyword.eq_ignore_ascii_case("quote") && !rest.is_empty() {
        let mut args = rest.splitn(2, char::is_whitespace);
        let nick = args.next().unwrap_or("").to_owned();
        let Extracted { text, images } = extract_images(args.next().unwrap_or(""), probe).await;
        return Some(Command::Quote {
            nick,
            extra: (!text.is_empty()).then_some(text),
            images,
        });
    }

    if keyword.eq_ignore_ascii_case("reply") && !rest.is_empty() {
        let Extracted { text, images } = extract_images(rest, probe).await;
        return Some(Command::Reply { text, images });
    }

    // `untwit` takes no argument at all; `untwit foo` is not a command.
    if rest.is_empty() {
        if keyword.eq_ignore_ascii_case("untwit") {
            return Some(Command::Untwit { force: false });
        }
        if keyword.eq_ignore_ascii_case("untwit!") {
            return Some(Command::Untwit { force: true });
        }
    }

    if keyword.eq_ignore_ascii_case("sup") && is_single_token(rest) {
        return Some(Command::Sup {
            handle: rest.to_owned(),
        });
    }

    if keyword.eq_ignore_ascii_case("seen") && is_single_token(rest) {
        return Some(Command::Seen {
            nick: rest.to_owned(),
        });
    }

    None
}

fn is_single_token(s: &str) -> bool {
    !s.is_empty() && !s.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use mime::Mime;
    use std::collections::HashMap;

    struct StubProbe(HashMap<&'static str, &'static str>);

    #[async_trait]
    impl UrlProbe for StubProbe {
        async fn content_type(&self, url: &str) -> Result<Mime> {
            let raw = self.0.get(url).ok_or_else(|| anyhow!("probe failed: {url}"))?;
            Ok(raw.parse()?)
        }
    }

    fn no_probe() -> StubProbe {
        StubProbe(HashMap::new())
    }

    #[tokio::test]
    async fn non_commands_parse_to_none() {
        for line in [
            "hello there",
            "twitter is down",
            "twit",
            "twit   ",
            "quote",
            "reply",
            "untwit now",
            "untwit!!",
            "sup",
            "seen",
            "SEENx al",
            "",
        ] {
            assert_eq!(parse_command(line, &no_probe()).await, None, "line: {line:?}");
        }
    }

    #[tokio::test]
    async fn twit_takes_everything_as_text() {
        assert_eq!(
            parse_command("twit hello world", &no_probe()).await,
            Some(Command::Twit {
                text: "hello world".to_owned(),
                images: vec![],
            })
        );
    }

    #[tokio::test]
    async fn twit_keyword_is_case_insensitive() {
        assert_eq!(
            parse_command("TwIt hi", &no_probe()).await,
            Some(Command::Twit {
                text: "hi".to_owned(),
                images: vec![],
            })
        );
    }

    #[tokio::test]
    async fn twit_extracts_extension_images() {
        assert_eq!(
            parse_command("twit photo https://example.com/img.jpg?size=large", &no_probe()).await,
            Some(Command::Twit {
                text: "photo".to_owned(),
                images: vec!["https://example.com/img.jpg?size=large".to_owned()],
            })
        );
    }

    #[tokio::test]
    async fn twit_extracts_probed_images() {
        let probe = StubProbe(HashMap::from([(
            "https://cdn.example.com/abc",
            "image/png",
        )]));
        assert_eq!(
            parse_command("twit look https://cdn.example.com/abc", &probe).await,
            Some(Command::Twit {
                text: "look".to_owned(),
                images: vec!["https://cdn.example.com/abc".to_owned()],
            })
        );
    }

    #[tokio::test]
    async fn quote_splits_nick_and_trims_extra() {
        assert_eq!(
            parse_command("quote al   extra text  ", &no_probe()).await,
            Some(Command::Quote {
                nick: "al".to_owned(),
                extra: Some("extra text".to_owned()),
                images: vec![],
            })
        );
    }

    #[tokio::test]
    async fn quote_without_extra_text() {
        assert_eq!(
            parse_command("quote al", &no_probe()).await,
            Some(Command::Quote {
                nick: "al".to_owned(),
                extra: None,
                images: vec![],
            })
        );
    }

    #[tokio::test]
    async fn quote_extra_can_be_images_only() {
        assert_eq!(
            parse_command("quote al https://e.com/a.png", &no_probe()).await,
            Some(Command::Quote {
                nick: "al".to_owned(),
                extra: None,
                images: vec!["https://e.com/a.png".to_owned()],
            })
        );
    }

    #[tokio::test]
    async fn reply_mirrors_twit_extraction() {
        assert_eq!(
            parse_command("reply same here https://e.com/b.gif", &no_probe()).await,
            Some(Command::Reply {
                text: "same here".to_owned(),
                images: vec!["https://e.com/b.gif".to_owned()],
            })
        );
    }

    #[tokio::test]
    async fn untwit_variants() {
        assert_eq!(
            parse_command("untwit", &no_probe()).await,
            Some(Command::Untwit { force: false })
        );
        assert_eq!(
            parse_command("untwit!", &no_probe()).await,
            Some(Command::Untwit { force: true })
        );
        assert_eq!(parse_command("untwit something", &no_probe()).await, None);
    }

    #[tokio::test]
    async fn sup_requires_exactly_one_handle() {
        assert_eq!(
            parse_command("sup alice.example.com", &no_probe()).await,
            Some(Command::Sup {
                handle: "alice.example.com".to_owned(),
            })
        );
        assert_eq!(parse_command("sup alice bob", &no_probe()).await, None);
    }

    #[tokio::test]
    async fn seen_requires_exactly_one_nick() {
        assert_eq!(
            parse_command("seen testuser", &no_probe()).await,
            Some(Command::Seen {
                nick: "testuser".to_owned(),
            })
        );
        assert_eq!(parse_command("seen user extra words", &no_probe()).await, None);
    }

    #[tokio::test]
    async fn earlier_rules_win_over_later_keywords_in_the_text() {
        // Lines whose arguments spell other keywords still resolve to the
        // first rule in priority order.
        assert_eq!(
            parse_command("twit seen al", &no_probe()).await,
            Some(Command::Twit {
                text: "seen al".to_owned(),
                images: vec![],
            })
        );
        assert_eq!(
            parse_command("quote untwit", &no_probe()).await,
            Some(Command::Quote {
                nick: "untwit".to_owned(),
                extra: None,
                images: vec![],
            })
        );
    }

    #[tokio::test]
    async fn residual_text_contains_no_leftover_images() {
        let probe = StubProbe(HashMap::from([(
            "https://cdn.example.com/pic",
            "image/jpeg",
        )]));
        let Some(Command::Twit { text, .. }) = parse_command(
            "twit mixed https://cdn.example.com/pic bag https://e.com/a.jpg",
            &probe,
        )
        .await
        else {
            panic!("expected a twit");
        };
        let again = extract_images(&text, &probe).await;
        assert!(again.images.is_empty());
        assert_eq!(again.text, text);
    }
}
