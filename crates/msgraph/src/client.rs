//! Parameterized request builder over the Graph REST surface.

use std::time::Duration;

use bytes::Bytes;
use graphops::Context;
use reqwest::{Response, Url};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    GraphError,
    auth::{MicrosoftCredential, acquire_token, default_scope},
};

/// Authenticated Graph client for one task or trigger invocation.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: Url,
    access_token: String,
}

impl GraphClient {
    /// Creates a client for `base_url` with an already acquired token.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute URL or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: &str,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GraphError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            access_token: access_token.into(),
        })
    }

    /// Builds a client from the `microsoft` credential and the plugin config
    /// in `ctx`, acquiring a token if the credential does not carry one.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is missing or unusable, or if token
    /// acquisition fails.
    pub async fn from_ctx(ctx: &Context) -> Result<Self, GraphError> {
        let cred = MicrosoftCredential::get(ctx).map_err(|e| GraphError::Auth(e.to_string()))?;
        let settings = &ctx.config().graph;

        let endpoint = cred.endpoint.as_deref().unwrap_or(&settings.endpoint);
        let authority = cred.authority.as_deref().unwrap_or(&settings.authority);
        let base_url = parse_base_url(endpoint)?;
        let method = cred.method()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        let access_token =
            acquire_token(&http, method, authority, &default_scope(&base_url)).await?;

        Ok(Self {
            http,
            base_url,
            access_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Unauthenticated access for pre-authorized URLs such as upload
    /// sessions.
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot have path segments.
    pub fn url<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url, GraphError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                GraphError::InvalidInput("Graph endpoint must be an absolute URL".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment.as_ref());
            }
        }
        Ok(url)
    }

    /// Parses a link returned by Graph (`@odata.nextLink`,
    /// `@odata.deltaLink`), refusing links to another origin so the bearer
    /// token never leaves the Graph host.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is malformed or points elsewhere.
    pub fn link(&self, link: &str) -> Result<Url, GraphError> {
        let url = Url::parse(link)
            .map_err(|e| GraphError::Decode(format!("invalid link '{link}': {e}")))?;
        if url.origin() != self.base_url.origin() {
            return Err(GraphError::Decode(format!(
                "link '{link}' does not point at {}",
                self.base_url.origin().ascii_serialization()
            )));
        }
        Ok(url)
    }

    /// # Errors
    ///
    /// Returns an error if the request fails, Graph answers with an error
    /// status or the body does not decode as `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, GraphError> {
        let response = self.send(self.http.get(url).query(query)).await?;
        decode(response).await
    }

    /// Downloads a body. Redirects to pre-authenticated download URLs are
    /// followed.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Graph answers with an error
    /// status.
    pub async fn get_bytes(&self, url: Url, query: &[(&str, String)]) -> Result<Bytes, GraphError> {
        let response = self.send(self.http.get(url).query(query)).await?;
        Ok(response.bytes().await?)
    }

    /// # Errors
    ///
    /// Returns an error if the request fails, Graph answers with an error
    /// status or the body does not decode as `T`.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, GraphError> {
        let response = self.send(self.http.post(url).json(body)).await?;
        decode(response).await
    }

    /// Posts a JSON body to an endpoint that answers without content, such
    /// as `sendMail`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Graph answers with an error
    /// status.
    pub async fn post_no_content<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<(), GraphError> {
        self.send(self.http.post(url).json(body)).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the request fails, Graph answers with an error
    /// status or the body does not decode as `T`.
    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, GraphError> {
        let response = self.send(self.http.patch(url).json(body)).await?;
        decode(response).await
    }

    /// Uploads a raw body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, Graph answers with an error
    /// status or the body does not decode as `T`.
    pub async fn put_bytes<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
        body: Bytes,
        content_type: &str,
    ) -> Result<T, GraphError> {
        let request = self
            .http
            .put(url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        let response = self.send(request).await?;
        decode(response).await
    }

    /// # Errors
    ///
    /// Returns an error if the request fails or Graph answers with an error
    /// status.
    pub async fn delete(&self, url: Url) -> Result<(), GraphError> {
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, GraphError> {
        let response = request
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            debug!(status = status.as_u16(), url = %response.url(), "Graph request failed");
            Err(GraphError::from_response(response).await)
        }
    }
}

fn parse_base_url(endpoint: &str) -> Result<Url, GraphError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| {
        GraphError::InvalidInput(format!("invalid Graph endpoint '{endpoint}': {e}"))
    })?;
    if url.cannot_be_a_base() {
        return Err(GraphError::InvalidInput(format!(
            "Graph endpoint '{endpoint}' must be an absolute URL"
        )));
    }
    Ok(url)
}

/// Decodes a success response as JSON.
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GraphError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| {
        GraphError::Decode(format!(
            "{e}: {}",
            String::from_utf8_lossy(&body[..body.len().min(256)])
        ))
    })
}
