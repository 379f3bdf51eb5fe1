//! Minimal Bluesky XRPC client: exactly the calls the relay bot makes.
//! One session is created at startup and kept for the process lifetime.

mod types;

pub use types::{FeedPost, Mention, PostRef, ReplyRefs};

use anyhow::{Context as _, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use twitbot_commands::parse_post_url;
use types::{
    AuthorFeedResponse, CreateRecordRequest, CreateSessionRequest, CreateSessionResponse,
    DeleteRecordRequest, GetPostsResponse, ImageEmbed, ImagesEmbed, ListNotificationsResponse,
    PostRecord, PostView, ResolveHandleResponse, UpdateSeenRequest, UploadBlobResponse,
};

const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Hard cap the service places on uploaded blobs, in bytes.
const BLOB_LIMIT: usize = 1_000_000;

/// Upper bound on notification pages fetched per poll, in case the unread
/// backlog never shows a read marker.
const MAX_NOTIFICATION_PAGES: usize = 20;

#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    service: String,
    did: String,
    handle: String,
    access_jwt: String,
}

impl Client {
    /// Creates a session against `service` and returns a ready client.
    pub async fn login(service: &str, identifier: &str, password: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("twitbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building http client")?;
        let service = service.trim_end_matches('/').to_owned();
        let session: CreateSessionResponse = http
            .post(format!("{service}/xrpc/com.atproto.server.createSession"))
            .json(&CreateSessionRequest {
                identifier,
                password,
            })
            .send()
            .await
            .context("createSession request")?
            .error_for_status()
            .context("createSession")?
            .json()
            .await
            .context("decoding createSession response")?;
        debug!(did = %session.did, handle = %session.handle, "Session created");
        Ok(Self {
            http,
            service,
            did: session.did,
            handle: session.handle,
            access_jwt: session.access_jwt,
        })
    }

    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Publishes a post. Image URLs are fetched and uploaded as blobs first;
    /// an image that cannot be fetched or exceeds the blob cap is skipped
    /// with a warning rather than failing the post.
    pub async fn create_post(
        &self,
        text: &str,
        image_urls: &[String],
        reply: Option<&ReplyRefs>,
    ) -> Result<PostRef> {
        let mut images = Vec::new();
        for url in image_urls {
            match self.upload_image(url).await {
                Ok(blob) => images.push(ImageEmbed {
                    alt: String::new(),
                    image: blob,
                }),
                Err(e) => warn!(error = %e, url = %url, "Skipping image"),
            }
        }
        let record = PostRecord {
            kind: "app.bsky.feed.post",
            text,
            created_at: now_rfc3339()?,
            reply,
            embed: (!images.is_empty()).then(|| ImagesEmbed {
                kind: "app.bsky.embed.images",
                images,
            }),
        };
        self.post_json(
            "com.atproto.repo.createRecord",
            &CreateRecordRequest {
                repo: &self.did,
                collection: POST_COLLECTION,
                record,
            },
        )
        .await
        .context("createRecord")
    }

    pub async fn delete_post(&self, uri: &str) -> Result<()> {
        let rkey = rkey_of(uri)?;
        self.post_unit(
            "com.atproto.repo.deleteRecord",
            &DeleteRecordRequest {
                repo: &self.did,
                collection: POST_COLLECTION,
                rkey,
            },
        )
        .await
        .context("deleteRecord")
    }

    /// Resolves a canonical post URL into the strong refs a reply record
    /// needs: the post itself as parent and its thread root (the parent
    /// again when the target starts a thread).
    pub async fn reply_refs(&self, post_url: &str) -> Result<ReplyRefs> {
        let loc =
            parse_post_url(post_url).ok_or_else(|| anyhow!("not a post URL: {post_url}"))?;
        let did = if loc.actor.starts_with("did:") {
            loc.actor
        } else {
            self.resolve_handle(&loc.actor).await?
        };
        let at_uri = format!("at://{did}/{POST_COLLECTION}/{}", loc.rkey);
        let resp: GetPostsResponse = self
            .get_json("app.bsky.feed.getPosts", &[("uris", at_uri.as_str())])
            .await
            .context("getPosts")?;
        let post = resp
            .posts
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("post not found: {at_uri}"))?;
        Ok(reply_refs_for(&post))
    }

    /// Latest top-level post for `actor`, or `None` for an empty feed.
    pub async fn latest_post(&self, actor: &str) -> Result<Option<FeedPost>> {
        let resp: AuthorFeedResponse = self
            .get_json(
                "app.bsky.feed.getAuthorFeed",
                &[("actor", actor), ("limit", "1"), ("filter", "posts_no_replies")],
            )
            .await
            .context("getAuthorFeed")?;
        Ok(resp.feed.into_iter().next().map(|item| {
            let post = item.post;
            FeedPost {
                url: web_post_url(&post.author.handle, &post.uri),
                text: record_text(&post.record),
                display_name: post.author.display_name,
                handle: post.author.handle,
                indexed_at: post.indexed_at,
            }
        }))
    }

    /// Unread mention notifications, oldest first. The service returns
    /// pages newest-first, so the backlog is cursor-paged until a read
    /// notification (or the end of the feed) appears, then flattened and
    /// reversed. Call [`Self::mark_seen`] after handling a batch.
    pub async fn unread_mentions(&self) -> Result<Vec<Mention>> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_NOTIFICATION_PAGES {
            let resp: ListNotificationsResponse = match cursor.as_deref() {
                Some(c) => {
                    self.get_json(
                        "app.bsky.notification.listNotifications",
                        &[("limit", "50"), ("cursor", c)],
                    )
                    .await
                }
                None => {
                    self.get_json("app.bsky.notification.listNotifications", &[("limit", "50")])
                        .await
                }
            }
            .context("listNotifications")?;
            let drained = resp.notifications.is_empty()
                || resp.notifications.iter().any(|n| n.is_read)
                || resp.cursor.is_none();
            cursor.clone_from(&resp.cursor);
            pages.push(resp);
            if drained {
                break;
            }
        }
        Ok(oldest_first_mentions(pages))
    }

    pub async fn mark_seen(&self) -> Result<()> {
        self.post_unit(
            "app.bsky.notification.updateSeen",
            &UpdateSeenRequest {
                seen_at: now_rfc3339()?,
            },
        )
        .await
        .context("updateSeen")
    }

    async fn resolve_handle(&self, handle: &str) -> Result<String> {
        let resp: ResolveHandleResponse = self
            .get_json("com.atproto.identity.resolveHandle", &[("handle", handle)])
            .await
            .with_context(|| format!("resolving handle {handle}"))?;
        Ok(resp.did)
    }

    async fn upload_image(&self, url: &str) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("fetching image")?
            .error_for_status()
            .context("fetching image")?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_owned();
        let bytes = resp.bytes().await.context("reading image body")?;
        if bytes.len() > BLOB_LIMIT {
            return Err(anyhow!(
                "image is {} bytes, over the {BLOB_LIMIT}-byte blob cap",
                bytes.len()
            ));
        }
        let uploaded: UploadBlobResponse = self
            .http
            .post(self.xrpc("com.atproto.repo.uploadBlob"))
            .bearer_auth(&self.access_jwt)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .context("uploadBlob request")?
            .error_for_status()
            .context("uploadBlob")?
            .json()
            .await
            .context("decoding uploadBlob response")?;
        Ok(uploaded.blob)
    }

    fn xrpc(&self, nsid: &str) -> String {
        format!("{}/xrpc/{nsid}", self.service)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        nsid: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let resp = self
            .http
            .get(self.xrpc(nsid))
            .query(query)
            .bearer_auth(&self.access_jwt)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let resp = self
            .http
            .post(self.xrpc(nsid))
            .bearer_auth(&self.access_jwt)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn post_unit(&self, nsid: &str, body: &impl Serialize) -> Result<()> {
        self.http
            .post(self.xrpc(nsid))
            .bearer_auth(&self.access_jwt)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Canonical web URL for a post, from its author handle and at-uri.
#[must_use]
pub fn web_post_url(handle: &str, at_uri: &str) -> String {
    let rkey = at_uri.rsplit('/').next().unwrap_or_default();
    format!("https://bsky.app/profile/{handle}/post/{rkey}")
}

fn rkey_of(uri: &str) -> Result<&str> {
    uri.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("malformed at-uri: {uri}"))
}

fn record_text(record: &Value) -> String {
    record
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn reply_refs_for(post: &PostView) -> ReplyRefs {
    let parent = PostRef {
        uri: post.uri.clone(),
        cid: post.cid.clone(),
    };
    let root = post
        .record
        .get("reply")
        .and_then(|r| r.get("root"))
        .and_then(|r| serde_json::from_value(r.clone()).ok())
        .unwrap_or_else(|| parent.clone());
    ReplyRefs { root, parent }
}

fn unread_mentions_of(resp: ListNotificationsResponse) -> Vec<Mention> {
    resp.notifications
        .into_iter()
        .filter(|n| !n.is_read && n.reason == "mention")
        .map(|n| Mention {
            url: web_post_url(&n.author.handle, &n.uri),
            text: record_text(&n.record),
            handle: n.author.handle,
        })
        .collect()
}

/// Pages and the notifications inside them arrive newest-first; callers
/// echo chronologically and treat the last mention as the reply target,
/// so the flattened batch is reversed.
fn oldest_first_mentions(pages: Vec<ListNotificationsResponse>) -> Vec<Mention> {
    let mut mentions: Vec<Mention> = pages.into_iter().flat_map(unread_mentions_of).collect();
    mentions.reverse();
    mentions
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("formatting timestamp")
}
