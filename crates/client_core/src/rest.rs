use std::{fmt::Display, marker::PhantomData, time::Duration};

use async_trait::async_trait;
use reqwest::{multipart::Form, Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    error::ApiErrorBody,
    protocol::{InteractionRequest, PageEnvelope},
};
use tracing::debug;
use url::Url;

use crate::{
    error::ClientError,
    fetcher::{MutationCaller, ResourceFetcher},
    list_controller::DEFAULT_FETCH_TIMEOUT,
    page::{Cursor, CursorPage, FilterSet},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStyle {
    NextUrl,
    /// `next` only signals more pages; the cursor is a page number sent as
    /// `page=` next to the filters.
    PageNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    Multipart,
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
    auth_token: Option<String>,
    timeout: Duration,
}

impl RestClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        // Url::join drops the last segment unless the base ends with '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|err| ClientError::Validation(format!("invalid api base url: {err}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Network(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            base_url,
            auth_token: None,
            timeout,
        })
    }

    /// Token resolved by the host; the client never persists it.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ClientError::Validation(format!("invalid endpoint '{path}': {err}")))
    }

    /// Absolute `next` URLs are used as-is; relative ones resolve against
    /// the base URL.
    fn resolve(&self, link: &str) -> Result<Url, ClientError> {
        match Url::parse(link) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.endpoint(link),
            Err(err) => Err(ClientError::InvalidPayload(format!(
                "invalid next link '{link}': {err}"
            ))),
        }
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: Url,
        query: &FilterSet,
    ) -> Result<R, ClientError> {
        debug!(%url, "GET");
        let request = self.http.get(url);
        let request = if query.is_empty() {
            request
        } else {
            request.query(query)
        };
        self.send(request).await
    }

    pub async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let url = self.endpoint(path)?;
        debug!(%url, "POST json");
        self.send(self.http.post(url).json(body)).await
    }

    pub async fn submit_form<R: DeserializeOwned>(
        &self,
        path: &str,
        fields: Vec<(String, String)>,
    ) -> Result<R, ClientError> {
        let url = self.endpoint(path)?;
        debug!(%url, fields = fields.len(), "POST multipart");
        let form = fields
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));
        self.send(self.http.post(url).multipart(form)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let url = self.endpoint(path)?;
        debug!(%url, "DELETE");
        let response = self.dispatch(self.http.delete(url)).await?;
        check_status(response).await.map(|_| ())
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, ClientError> {
        let response = self.dispatch(request).await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|err| ClientError::InvalidPayload(err.to_string()))
    }

    async fn dispatch(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let request = match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        request
            .send()
            .await
            .map_err(|err| ClientError::from_reqwest(err, self.timeout))
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.json::<ApiErrorBody>().await.unwrap_or_default();
    Err(ClientError::from_status(status.as_u16(), &body))
}

pub struct RestResourceFetcher<T> {
    client: RestClient,
    path: String,
    style: CursorStyle,
    _item: PhantomData<fn() -> T>,
}

impl<T> RestResourceFetcher<T> {
    pub fn new(client: RestClient, path: impl Into<String>, style: CursorStyle) -> Self {
        Self {
            client,
            path: path.into(),
            style,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<T> ResourceFetcher<T> for RestResourceFetcher<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch(
        &self,
        cursor: Option<&Cursor>,
        filters: &FilterSet,
    ) -> Result<CursorPage<T>, ClientError> {
        let (url, query, page) = match (self.style, cursor) {
            (_, None) => (self.client.endpoint(&self.path)?, filters.clone(), 1),
            (CursorStyle::NextUrl, Some(cursor)) => {
                (self.client.resolve(cursor.as_str())?, FilterSet::new(), 0)
            }
            (CursorStyle::PageNumber, Some(cursor)) => {
                let page: u32 = cursor.as_str().parse().map_err(|_| {
                    ClientError::Validation(format!("invalid page cursor '{cursor}'"))
                })?;
                (
                    self.client.endpoint(&self.path)?,
                    filters.clone().with("page", page),
                    page,
                )
            }
        };

        let envelope: PageEnvelope<T> = self.client.get_json(url, &query).await?;
        let next = match self.style {
            CursorStyle::NextUrl => envelope.next.map(Cursor::new),
            CursorStyle::PageNumber => envelope
                .next
                .map(|_| Cursor::new((page + 1).to_string())),
        };
        Ok(CursorPage::new(envelope.results, next))
    }
}

/// Posts `{"action": ...}` to a path template containing `{id}` and decodes
/// the canonical value from the response.
pub struct RestMutationCaller<V> {
    client: RestClient,
    path_template: String,
    encoding: BodyEncoding,
    _value: PhantomData<fn() -> V>,
}

impl<V> RestMutationCaller<V> {
    pub fn new(client: RestClient, path_template: impl Into<String>, encoding: BodyEncoding) -> Self {
        Self {
            client,
            path_template: path_template.into(),
            encoding,
            _value: PhantomData,
        }
    }

    fn path_for(&self, id: &impl Display) -> String {
        self.path_template.replace("{id}", &id.to_string())
    }
}

#[async_trait]
impl<Id, A, V> MutationCaller<Id, A, V> for RestMutationCaller<V>
where
    Id: Display + Send + Sync,
    A: Serialize + Send + Sync,
    V: DeserializeOwned + Send,
{
    async fn call(&self, id: &Id, action: &A) -> Result<V, ClientError> {
        let path = self.path_for(id);
        let body = InteractionRequest { action };
        match self.encoding {
            BodyEncoding::Json => self.client.post_json(&path, &body).await,
            BodyEncoding::Multipart => {
                self.client
                    .submit_form(&path, form_fields(&body)?)
                    .await
            }
        }
    }
}

fn form_fields<B: Serialize>(body: &B) -> Result<Vec<(String, String)>, ClientError> {
    let value = serde_json::to_value(body)
        .map_err(|err| ClientError::Validation(format!("unencodable request body: {err}")))?;
    let serde_json::Value::Object(map) = value else {
        return Err(ClientError::Validation(
            "multipart body must be a JSON object".into(),
        ));
    };
    Ok(map
        .into_iter()
        .map(|(name, value)| {
            let text = match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            (name, text)
        })
        .collect())
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
