use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(crate) struct CreateSessionRequest<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateSessionResponse {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
}

/// Strong reference to a record: the pair the service uses everywhere a post
/// is addressed (reply refs, quote embeds, deletes resolve the rkey from
/// `uri`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub uri: String,
    pub cid: String,
}

/// Thread coordinates for a reply: the post being answered and the root of
/// its thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRefs {
    pub root: PostRef,
    pub parent: PostRef,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostRecord<'a> {
    #[serde(rename = "$type")]
    pub kind: &'static str,
    pub text: &'a str,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<&'a ReplyRefs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<ImagesEmbed>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ImagesEmbed {
    #[serde(rename = "$type")]
    pub kind: &'static str,
    pub images: Vec<ImageEmbed>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ImageEmbed {
    pub alt: String,
    /// Opaque blob reference exactly as `uploadBlob` returned it.
    pub image: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadBlobResponse {
    pub blob: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRecordRequest<'a> {
    pub repo: &'a str,
    pub collection: &'static str,
    pub record: PostRecord<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteRecordRequest<'a> {
    pub repo: &'a str,
    pub collection: &'static str,
    pub rkey: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResolveHandleResponse {
    pub did: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetPostsResponse {
    pub posts: Vec<PostView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: Author,
    pub record: Value,
    pub indexed_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Author {
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthorFeedResponse {
    pub feed: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FeedItem {
    pub post: PostView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListNotificationsResponse {
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Notification {
    pub uri: String,
    pub reason: String,
    pub author: Author,
    #[serde(default)]
    pub record: Value,
    pub is_read: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateSeenRequest {
    pub seen_at: String,
}

/// A post as surfaced to the channel by `sup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPost {
    pub handle: String,
    pub display_name: Option<String>,
    pub text: String,
    pub indexed_at: String,
    pub url: String,
}

/// An unread mention pulled from the notification feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub handle: String,
    pub text: String,
    pub url: String,
}
