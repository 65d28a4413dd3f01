use async_trait::async_trait;

use crate::{
    error::ClientError,
    page::{Cursor, CursorPage, FilterSet},
};

/// Source of one paginated resource.
///
/// Implementations must be idempotent for the same `(cursor, filters)` pair;
/// retries and superseded requests rely on it.
#[async_trait]
pub trait ResourceFetcher<T>: Send + Sync {
    async fn fetch(
        &self,
        cursor: Option<&Cursor>,
        filters: &FilterSet,
    ) -> Result<CursorPage<T>, ClientError>;
}

#[async_trait]
pub trait MutationCaller<Id, A, V>: Send + Sync
where
    Id: Send + Sync,
    A: Send + Sync,
{
    async fn call(&self, id: &Id, action: &A) -> Result<V, ClientError>;
}
