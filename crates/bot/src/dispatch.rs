use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tracing::{info, warn};

use twitbot_bsky::{FeedPost, Mention};
use twitbot_commands::{Command, extract_tracked_post_url, parse_command};
use twitbot_seen::{SeenRecord, SeenStore};

use crate::probe::HttpProbe;

/// Without `untwit!`, only a post younger than this can be deleted.
const UNTWIT_WINDOW: time::Duration = time::Duration::hours(1);

const ACK_OK: &str = "ok";
const ACK_NO: &str = "no";

/// Mutable per-instance session state. Owned by the [`Dispatcher`], never
/// ambient: two bot instances in one process stay fully isolated.
#[derive(Debug, Default)]
struct SessionState {
    /// The bot's most recent post, target of `untwit`.
    last_post: Option<OwnPost>,
    /// Most recently referenced remote post URL, target of `reply`.
    tracked_url: Option<String>,
    /// Normalized nick -> last raw line, or posted text after a `twit`.
    history: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct OwnPost {
    uri: String,
    created_at: OffsetDateTime,
}

pub struct Dispatcher {
    bsky: Arc<twitbot_bsky::Client>,
    seen: SeenStore,
    probe: HttpProbe,
    state: Mutex<SessionState>,
}

impl Dispatcher {
    pub fn new(bsky: Arc<twitbot_bsky::Client>, seen: SeenStore, probe: HttpProbe) -> Self {
        Self {
            bsky,
            seen,
            probe,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Handles one inbound channel line to completion and returns the lines
    /// to send back. Lines are processed strictly one at a time; the shared
    /// state is only touched between full command cycles.
    pub async fn handle_line(&self, nick: &str, channel: &str, line: &str) -> Vec<String> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let now = OffsetDateTime::now_utc();

        if let Err(e) = self
            .seen
            .record(nick, line, channel, now.unix_timestamp())
            .await
        {
            warn!(error = %e, nick = %nick, "Failed to record seen");
        }

        // Every line refreshes the tracked post URL, command or not.
        if let Some(url) = extract_tracked_post_url(line) {
            info!(url = %url, "Tracking referenced post");
            self.state.lock().await.tracked_url = Some(url.to_owned());
        }

        let Some(command) = parse_command(line, &self.probe).await else {
            // Ordinary chat: remember it so `quote <nick>` can re-publish it.
            self.state
                .lock()
                .await
                .history
                .insert(nick.to_lowercase(), line.to_owned());
            return Vec::new();
        };

        info!(nick = %nick, command = ?command, "Dispatching command");
        match command {
            Command::Twit { text, images } => self.twit(nick, text, &images, now).await,
            Command::Quote {
                nick: target,
                extra,
                images,
            } => self.quote(&target, extra.as_deref(), &images, now).await,
            Command::Reply { text, images } => self.reply(&text, &images, now).await,
            Command::Untwit { force } => self.untwit(force, now).await,
            Command::Sup { handle } => self.sup(&handle).await,
            Command::Seen { nick: target } => self.last_seen(&target).await,
        }
    }

    /// One poll of the notification feed: echo unread mentions into the
    /// channel and let the newest one become the reply target.
    pub async fn poll_mentions(&self) -> Vec<String> {
        let mentions = match self.bsky.unread_mentions().await {
            Ok(mentions) => mentions,
            Err(e) => {
                warn!(error = %e, "Failed to poll notifications");
                return Vec::new();
            }
        };
        if mentions.is_empty() {
            return Vec::new();
        }
        let lines = {
            let mut state = self.state.lock().await;
            mentions
                .iter()
                .map(|m| {
                    state.tracked_url = Some(m.url.clone());
                    format_mention(m)
                })
                .collect()
        };
        if let Err(e) = self.bsky.mark_seen().await {
            warn!(error = %e, "Failed to mark notifications seen");
        }
        lines
    }

    async fn twit(
        &self,
        nick: &str,
        text: String,
        images: &[String],
        now: OffsetDateTime,
    ) -> Vec<String> {
        match self.bsky.create_post(&text, images, None).await {
            Ok(post) => {
                let mut state = self.state.lock().await;
                state.last_post = Some(OwnPost {
                    uri: post.uri,
                    created_at: now,
                });
                state.history.insert(nick.to_lowercase(), text);
                ack(true)
            }
            Err(e) => {
                warn!(error = %e, "Failed to post");
                ack(false)
            }
        }
    }

    async fn quote(
        &self,
        target: &str,
        extra: Option<&str>,
        images: &[String],
        now: OffsetDateTime,
    ) -> Vec<String> {
        let quoted = self
            .state
            .lock()
            .await
            .history
            .get(&target.to_lowercase())
            .cloned();
        let Some(quoted) = quoted else {
            info!(target = %target, "Nothing on record to quote");
            return ack(false);
        };
        let text = compose_quote(target, &quoted, extra);
        match self.bsky.create_post(&text, images, None).await {
            Ok(post) => {
                self.state.lock().await.last_post = Some(OwnPost {
                    uri: post.uri,
                    created_at: now,
                });
                ack(true)
            }
            Err(e) => {
                warn!(error = %e, target = %target, "Failed to post quote");
                ack(false)
            }
        }
    }

    async fn reply(&self, text: &str, images: &[String], now: OffsetDateTime) -> Vec<String> {
        let target = self.state.lock().await.tracked_url.clone();
        let Some(url) = target else {
            info!("No referenced post to reply to");
            return ack(false);
        };
        let refs = match self.bsky.reply_refs(&url).await {
            Ok(refs) => refs,
            Err(e) => {
                warn!(error = %e, url = %url, "Failed to resolve reply target");
                return ack(false);
            }
        };
        match self.bsky.create_post(text, images, Some(&refs)).await {
            Ok(post) => {
                self.state.lock().await.last_post = Some(OwnPost {
                    uri: post.uri,
                    created_at: now,
                });
                ack(true)
            }
            Err(e) => {
                warn!(error = %e, url = %url, "Failed to post reply");
                ack(false)
            }
        }
    }

    async fn untwit(&self, force: bool, now: OffsetDateTime) -> Vec<String> {
        let post = self.state.lock().await.last_post.clone();
        let Some(post) = post else {
            info!("No post on record to delete");
            return ack(false);
        };
        if !may_untwit(post.created_at, now, force) {
            info!(uri = %post.uri, "Refusing to delete a stale post without force");
            return ack(false);
        }
        match self.bsky.delete_post(&post.uri).await {
            Ok(()) => {
                self.state.lock().await.last_post = None;
                ack(true)
            }
            Err(e) => {
                warn!(error = %e, uri = %post.uri, "Failed to delete post");
                ack(false)
            }
        }
    }

    async fn sup(&self, handle: &str) -> Vec<String> {
        match self.bsky.latest_post(handle).await {
            Ok(Some(post)) => vec![format_sup(&post)],
            Ok(None) => {
                info!(handle = %handle, "No posts in feed");
                ack(false)
            }
            Err(e) => {
                warn!(error = %e, handle = %handle, "Failed to fetch feed");
                ack(false)
            }
        }
    }

    async fn last_seen(&self, target: &str) -> Vec<String> {
        match self.seen.lookup(target).await {
            Ok(Some(record)) => vec![format_seen(&record)],
            Ok(None) => ack(false),
            Err(e) => {
                warn!(error = %e, target = %target, "Seen lookup failed");
                ack(false)
            }
        }
    }
}

fn ack(ok: bool) -> Vec<String> {
    vec![if ok { ACK_OK } else { ACK_NO }.to_owned()]
}

fn may_untwit(created_at: OffsetDateTime, now: OffsetDateTime, force: bool) -> bool {
    force || now - created_at <= UNTWIT_WINDOW
}

fn compose_quote(nick: &str, quoted: &str, extra: Option<&str>) -> String {
    let base = format!("<{nick}> {quoted}");
    match extra {
        Some(extra) => format!("{base} | {extra}"),
        None => base,
    }
}

fn format_sup(post: &FeedPost) -> String {
    let who = post.display_name.as_ref().map_or_else(
        || format!("@{}", post.handle),
        |name| format!("{name} (@{})", post.handle),
    );
    format!("{who}: {} [{}]", post.text, post.url)
}

fn format_seen(record: &SeenRecord) -> String {
    let when = OffsetDateTime::from_unix_timestamp(record.at)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| record.at.to_string());
    format!(
        "{} was last seen in {} at {when}: {}",
        record.nick, record.channel, record.message
    )
}

fn format_mention(mention: &Mention) -> String {
    format!("@{} mentioned the bot: {} [{}]", mention.handle, mention.text, mention.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn fresh_posts_are_deletable_without_force() {
        let created = datetime!(2024-06-01 12:00 UTC);
        let now = created + time::Duration::minutes(5);
        assert!(may_untwit(created, now, false));
    }

    #[test]
    fn stale_posts_need_force() {
        let created = datetime!(2024-06-01 12:00 UTC);
        let now = created + time::Duration::hours(2);
        assert!(!may_untwit(created, now, false));
        assert!(may_untwit(created, now, true));
    }

    #[test]
    fn quote_composition() {
        assert_eq!(compose_quote("al", "hello there", None), "<al> hello there");
        assert_eq!(
            compose_quote("al", "hello there", Some("so true")),
            "<al> hello there | so true"
        );
    }

    #[test]
    fn seen_line_formats_the_timestamp() {
        let record = SeenRecord {
            nick: "al".to_owned(),
            message: "later folks".to_owned(),
            channel: "#chat".to_owned(),
            at: 1_717_243_200,
        };
        assert_eq!(
            format_seen(&record),
            "al was last seen in #chat at 2024-06-01T12:00:00Z: later folks"
        );
    }

    #[test]
    fn sup_line_prefers_the_display_name() {
        let post = FeedPost {
            handle: "alice.test".to_owned(),
            display_name: Some("Alice".to_owned()),
            text: "shipped it".to_owned(),
            indexed_at: "2024-06-01T12:00:00Z".to_owned(),
            url: "https://bsky.app/profile/alice.test/post/3k1".to_owned(),
        };
        assert_eq!(
            format_sup(&post),
            "Alice (@alice.test): shipped it [https://bsky.app/profile/alice.test/post/3k1]"
        );
    }
}
