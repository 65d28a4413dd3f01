use std::sync::Arc;

use serde::de::DeserializeOwned;
use shared::{
    domain::{ChatId, CommentId, HouseId, PostId, UserId},
    protocol::{
        ChatMessage, ChatSummary, Comment, Follow, House, Notice as NoticeItem, Post, Rating,
        ReadMark, Reaction,
    },
};
use tokio::sync::broadcast;
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod fetcher;
pub mod geo_search;
pub mod interaction;
pub mod list_controller;
pub mod optimistic;
pub mod page;
pub mod resources;
pub mod rest;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{load_settings, load_settings_from, ClientSettings};
pub use error::{ClientError, Notice, NoticeSource};
pub use fetcher::{MutationCaller, ResourceFetcher};
pub use geo_search::{GeoSearchDebouncer, GeoSearchOptions, GeoSearchState};
pub use interaction::Interaction;
pub use list_controller::{Activity, ListController, ListState, LoadOutcome};
pub use optimistic::{InteractionState, MutationOutcome, OptimisticMutator};
pub use page::{Cursor, CursorPage, FilterSet, Identified};
pub use resources::Resource;
pub use rest::{BodyEncoding, CursorStyle, RestClient, RestMutationCaller, RestResourceFetcher};
pub use timer::{ScheduledTask, Timer, TokioTimer};

use resources::{interactions, submissions};

/// Entry point for a signed-in session: builds list controllers, mutators and
/// the map search against one API, all sharing a notice channel.
pub struct MarketplaceClient {
    rest: RestClient,
    settings: ClientSettings,
    timer: Arc<dyn Timer>,
    notices: broadcast::Sender<Notice>,
}

impl MarketplaceClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        Self::new_with_timer(settings, Arc::new(TokioTimer))
    }

    pub fn new_with_timer(settings: ClientSettings, timer: Arc<dyn Timer>) -> Result<Self, ClientError> {
        let mut rest = RestClient::with_timeout(&settings.api_base_url, settings.fetch_timeout())?;
        if let Some(token) = &settings.auth_token {
            rest = rest.with_auth_token(token.clone());
        }
        let (notices, _) = broadcast::channel(256);
        Ok(Self {
            rest,
            settings,
            timer,
            notices,
        })
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn list<T>(&self, resource: Resource) -> Arc<ListController<T>>
    where
        T: Identified + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.list_with_filters(resource, FilterSet::new())
    }

    pub fn list_with_filters<T>(&self, resource: Resource, filters: FilterSet) -> Arc<ListController<T>>
    where
        T: Identified + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let fetcher = RestResourceFetcher::<T>::new(
            self.rest.clone(),
            resource.path.clone(),
            resource.cursor_style,
        );
        Arc::new(
            ListController::new(resource.name, Arc::new(fetcher))
                .with_timeout(self.settings.fetch_timeout())
                .with_filters(filters),
        )
    }

    pub fn chats(&self) -> Arc<ListController<ChatSummary>> {
        self.list(Resource::chats())
    }

    pub fn messages(&self, chat_id: ChatId) -> Arc<ListController<ChatMessage>> {
        self.list(Resource::messages(chat_id))
    }

    pub fn feed(&self) -> Arc<ListController<Post>> {
        self.list(Resource::feed())
    }

    pub fn user_posts(&self, user_id: UserId) -> Arc<ListController<Post>> {
        self.list(Resource::user_posts(user_id))
    }

    pub fn owned_houses(&self, owner: UserId) -> Arc<ListController<House>> {
        self.list(Resource::owned_houses(owner))
    }

    pub fn notices(&self) -> Arc<ListController<NoticeItem>> {
        self.list(Resource::notices())
    }

    pub fn houses(&self, filters: FilterSet) -> Arc<ListController<House>> {
        self.list_with_filters(Resource::houses(), filters)
    }

    pub fn comments(&self, post_id: PostId) -> Arc<ListController<Comment>> {
        self.list(Resource::comments(post_id))
    }

    pub fn ratings(&self, house_id: HouseId) -> Arc<ListController<Rating>> {
        self.list(Resource::ratings(house_id))
    }

    pub fn mutation_caller<V>(&self, path_template: &str) -> RestMutationCaller<V> {
        RestMutationCaller::new(self.rest.clone(), path_template, BodyEncoding::Json)
    }

    pub fn post_reactions(&self, feed: Arc<ListController<Post>>) -> OptimisticMutator<Post, Reaction> {
        OptimisticMutator::new(
            "post reaction",
            feed,
            |post: &Post| post.reaction.clone(),
            |post: &mut Post, reaction| post.reaction = reaction,
        )
        .with_notice_sender(self.notices.clone())
    }

    pub fn comment_reactions(
        &self,
        comments: Arc<ListController<Comment>>,
    ) -> OptimisticMutator<Comment, Reaction> {
        OptimisticMutator::new(
            "comment reaction",
            comments,
            |comment: &Comment| comment.reaction.clone(),
            |comment: &mut Comment, reaction| comment.reaction = reaction,
        )
        .with_notice_sender(self.notices.clone())
    }

    /// Follow state of each post's author, as shown on the post card.
    pub fn author_follows(&self, feed: Arc<ListController<Post>>) -> OptimisticMutator<Post, Follow> {
        OptimisticMutator::new(
            "follow",
            feed,
            |post: &Post| post.author_follow.clone(),
            |post: &mut Post, follow| post.author_follow = follow,
        )
        .with_notice_sender(self.notices.clone())
    }

    pub fn notice_reads(
        &self,
        notices: Arc<ListController<NoticeItem>>,
    ) -> OptimisticMutator<NoticeItem, ReadMark> {
        OptimisticMutator::new(
            "mark read",
            notices,
            |notice: &NoticeItem| notice.read,
            |notice: &mut NoticeItem, read| notice.read = read,
        )
        .with_notice_sender(self.notices.clone())
    }

    pub fn message_reads(
        &self,
        messages: Arc<ListController<ChatMessage>>,
    ) -> OptimisticMutator<ChatMessage, ReadMark> {
        OptimisticMutator::new(
            "mark message read",
            messages,
            |message: &ChatMessage| message.read,
            |message: &mut ChatMessage, read| message.read = read,
        )
        .with_notice_sender(self.notices.clone())
    }

    pub fn post_reaction_caller(&self) -> RestMutationCaller<Reaction> {
        self.mutation_caller(interactions::POST_REACTION)
    }

    pub fn comment_reaction_caller(&self) -> RestMutationCaller<Reaction> {
        self.mutation_caller(interactions::COMMENT_REACTION)
    }

    /// Keyed by the author's user id, not the post id.
    pub fn follow_caller(&self) -> RestMutationCaller<Follow> {
        self.mutation_caller(interactions::FOLLOW)
    }

    pub fn notice_read_caller(&self) -> RestMutationCaller<ReadMark> {
        self.mutation_caller(interactions::NOTICE_READ)
    }

    pub fn message_read_caller(&self) -> RestMutationCaller<ReadMark> {
        self.mutation_caller(interactions::MESSAGE_READ)
    }

    /// Follows the author of `post_id`, or unfollows when already following.
    pub async fn toggle_author_follow(
        &self,
        follows: &OptimisticMutator<Post, Follow>,
        post_id: PostId,
    ) -> MutationOutcome<Follow> {
        let Some(author) = follows.list().item(&post_id).map(|post| post.author.user_id) else {
            return MutationOutcome::NotFound;
        };
        let caller = self.follow_caller();
        follows
            .apply(post_id, true, |action| async move {
                caller.call(&author, &action).await
            })
            .await
    }

    /// Map search over the geo-indexed house lookup.
    pub fn lookup(&self) -> GeoSearchDebouncer<House> {
        let resource = Resource::lookup();
        let fetcher = RestResourceFetcher::<House>::new(
            self.rest.clone(),
            resource.path,
            resource.cursor_style,
        );
        GeoSearchDebouncer::new_with_dependencies(
            Arc::new(fetcher),
            Arc::clone(&self.timer),
            self.settings.geo_options(),
            self.notices.clone(),
        )
    }

    pub async fn add_comment(
        &self,
        comments: &ListController<Comment>,
        post_id: PostId,
        text: &str,
    ) -> Result<Comment, ClientError> {
        self.submit_into(
            comments,
            &submissions::comment(post_id),
            vec![("text".to_string(), text.to_string())],
        )
        .await
    }

    pub async fn send_message(
        &self,
        messages: &ListController<ChatMessage>,
        chat_id: ChatId,
        text: &str,
    ) -> Result<ChatMessage, ClientError> {
        self.submit_into(
            messages,
            &submissions::message(chat_id),
            vec![("text".to_string(), text.to_string())],
        )
        .await
    }

    pub async fn publish_post(
        &self,
        feed: &ListController<Post>,
        body: &str,
    ) -> Result<Post, ClientError> {
        self.submit_into(
            feed,
            &submissions::post(),
            vec![("body".to_string(), body.to_string())],
        )
        .await
    }

    pub async fn rate_house(
        &self,
        ratings: &ListController<Rating>,
        house_id: HouseId,
        stars: u8,
        text: Option<&str>,
    ) -> Result<Rating, ClientError> {
        let mut fields = vec![("stars".to_string(), stars.to_string())];
        if let Some(text) = text {
            fields.push(("text".to_string(), text.to_string()));
        }
        self.submit_into(ratings, &submissions::rating(house_id), fields)
            .await
    }

    /// Creates a listing from form fields (title, kind, rent, coordinates...).
    pub async fn create_house(
        &self,
        houses: &ListController<House>,
        fields: Vec<(String, String)>,
    ) -> Result<House, ClientError> {
        self.submit_into(houses, &submissions::house(), fields).await
    }

    pub async fn delete_comment(
        &self,
        comments: &ListController<Comment>,
        comment_id: CommentId,
    ) -> Result<(), ClientError> {
        self.delete_from(comments, &submissions::delete_comment(comment_id), &comment_id, "delete comment")
            .await
    }

    pub async fn delete_house(
        &self,
        houses: &ListController<House>,
        house_id: HouseId,
    ) -> Result<(), ClientError> {
        self.delete_from(houses, &submissions::delete_house(house_id), &house_id, "delete house")
            .await
    }

    /// Multipart submission whose created item goes to the head of `list`.
    async fn submit_into<T>(
        &self,
        list: &ListController<T>,
        path: &str,
        fields: Vec<(String, String)>,
    ) -> Result<T, ClientError>
    where
        T: Identified + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        match self.rest.submit_form::<T>(path, fields).await {
            Ok(created) => {
                list.prepend(created.clone());
                info!(list = list.label(), id = ?created.id(), "submission created");
                Ok(created)
            }
            Err(err) => {
                warn!(list = list.label(), "submission failed: {err}");
                let _ = self
                    .notices
                    .send(Notice::new(NoticeSource::Mutation, err.to_string()));
                Err(err)
            }
        }
    }

    /// Removes the item only once the server confirmed the deletion.
    async fn delete_from<T>(
        &self,
        list: &ListController<T>,
        path: &str,
        id: &T::Id,
        action: &str,
    ) -> Result<(), ClientError>
    where
        T: Identified + Clone + Send + Sync + 'static,
    {
        match self.rest.delete(path).await {
            Ok(()) => {
                list.remove_item(id);
                Ok(())
            }
            Err(err) => {
                warn!(list = list.label(), ?id, "{action} failed: {err}");
                let _ = self
                    .notices
                    .send(Notice::new(NoticeSource::Mutation, format!("{action} failed: {err}")));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
