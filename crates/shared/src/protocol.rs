use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChatId, CommentId, GeoPoint, HouseId, HouseKind, MessageId, NoticeId, NoticeKind, PostId,
    RatingId, ReactionKind, UserId,
};

/// Paginated list body returned by every list endpoint of the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEnvelope<T> {
    #[serde(alias = "items")]
    pub results: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Like/dislike state of a post or comment as seen by the current user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(rename = "type")]
    pub kind: ReactionKind,
    pub likes: u32,
    pub dislikes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Follow {
    pub following: bool,
    pub followers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadMark {
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub peer: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub unread: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub read: ReadMark,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: PostId,
    pub author: UserSummary,
    pub body: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub reaction: Reaction,
    #[serde(default)]
    pub author_follow: Follow,
    pub comments: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub notice_id: NoticeId,
    pub kind: NoticeKind,
    pub text: String,
    #[serde(default)]
    pub read: ReadMark,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct House {
    pub house_id: HouseId,
    pub owner: UserSummary,
    pub title: String,
    pub kind: HouseKind,
    pub monthly_rent: u32,
    pub rooms: u8,
    pub location: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f32>,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: CommentId,
    pub post_id: PostId,
    pub author: UserSummary,
    pub text: String,
    #[serde(default)]
    pub reaction: Reaction,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub rating_id: RatingId,
    pub house_id: HouseId,
    pub author: UserSummary,
    pub stars: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Body of an interaction request (reaction, follow, read mark).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest<A> {
    pub action: A,
}
