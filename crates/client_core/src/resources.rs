use shared::{
    domain::{ChatId, CommentId, HouseId, MessageId, NoticeId, PostId, RatingId, UserId},
    protocol::{ChatMessage, ChatSummary, Comment, House, Notice, Post, Rating, UserSummary},
};

use crate::{page::Identified, rest::CursorStyle};

macro_rules! identified {
    ($item:ty, $id:ty, $field:ident) => {
        impl Identified for $item {
            type Id = $id;

            fn id(&self) -> $id {
                self.$field
            }
        }
    };
}

identified!(ChatSummary, ChatId, chat_id);
identified!(ChatMessage, MessageId, message_id);
identified!(Post, PostId, post_id);
identified!(Notice, NoticeId, notice_id);
identified!(House, HouseId, house_id);
identified!(Comment, CommentId, comment_id);
identified!(Rating, RatingId, rating_id);
identified!(UserSummary, UserId, user_id);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: &'static str,
    pub path: String,
    pub cursor_style: CursorStyle,
}

impl Resource {
    fn new(name: &'static str, path: impl Into<String>, cursor_style: CursorStyle) -> Self {
        Self {
            name,
            path: path.into(),
            cursor_style,
        }
    }

    pub fn chats() -> Self {
        Self::new("chats", "chats/", CursorStyle::NextUrl)
    }

    pub fn messages(chat_id: ChatId) -> Self {
        Self::new("messages", format!("chats/{chat_id}/messages/"), CursorStyle::NextUrl)
    }

    pub fn feed() -> Self {
        Self::new("feed", "posts/", CursorStyle::NextUrl)
    }

    pub fn user_posts(user_id: UserId) -> Self {
        Self::new("user_posts", format!("users/{user_id}/posts/"), CursorStyle::NextUrl)
    }

    pub fn notices() -> Self {
        Self::new("notices", "notices/", CursorStyle::NextUrl)
    }

    /// Owner's house management list and filtered house search share the
    /// page-number endpoint.
    pub fn houses() -> Self {
        Self::new("houses", "houses/", CursorStyle::PageNumber)
    }

    pub fn owned_houses(owner: UserId) -> Self {
        Self::new("owned_houses", format!("users/{owner}/houses/"), CursorStyle::PageNumber)
    }

    pub fn lookup() -> Self {
        Self::new("lookup", "houses/lookup/", CursorStyle::PageNumber)
    }

    pub fn comments(post_id: PostId) -> Self {
        Self::new("comments", format!("posts/{post_id}/comments/"), CursorStyle::NextUrl)
    }

    pub fn ratings(house_id: HouseId) -> Self {
        Self::new("ratings", format!("houses/{house_id}/ratings/"), CursorStyle::NextUrl)
    }
}

pub mod interactions {
    pub const POST_REACTION: &str = "posts/{id}/reaction/";
    pub const COMMENT_REACTION: &str = "comments/{id}/reaction/";
    pub const FOLLOW: &str = "users/{id}/follow/";
    pub const NOTICE_READ: &str = "notices/{id}/read/";
    pub const MESSAGE_READ: &str = "messages/{id}/read/";
}

pub mod submissions {
    use shared::domain::{ChatId, CommentId, HouseId, PostId};

    pub fn post() -> String {
        "posts/".into()
    }

    pub fn comment(post_id: PostId) -> String {
        format!("posts/{post_id}/comments/")
    }

    pub fn delete_comment(comment_id: CommentId) -> String {
        format!("comments/{comment_id}/")
    }

    pub fn message(chat_id: ChatId) -> String {
        format!("chats/{chat_id}/messages/")
    }

    pub fn rating(house_id: HouseId) -> String {
        format!("houses/{house_id}/ratings/")
    }

    pub fn house() -> String {
        "houses/".into()
    }

    pub fn delete_house(house_id: HouseId) -> String {
        format!("houses/{house_id}/")
    }
}
