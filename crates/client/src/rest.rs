//! Authenticated GETs against the Business Central API.

use crate::odata::ODataQuery;
use crate::records::{BcEnvironment, Company, Record};
use bcconnect_types::{
    ApiError, Envelope, HttpRequest, HttpResponse, HttpTransport, ServiceError, TenantContext,
    TokenProvider, traits::Result,
};
use bytes::Bytes;
use futures_core::Stream;
use futures_util::{TryStreamExt as _, stream};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

pub use bcconnect_types::DEFAULT_API_BASE;

/// Generic client for the Business Central REST API v2.0.
///
/// Endpoints are relative to `{api_base}/{tenant_id}/{environment}/api/v2.0/`.
/// Every request carries a bearer token from the [`TokenProvider`]; the
/// provider decides whether that means a cache hit, a refresh or a sign-in.
pub struct RestClient {
    api_base: String,
    tenant: TenantContext,
    tokens: Arc<dyn TokenProvider>,
    http: Arc<dyn HttpTransport>,
}

impl RestClient {
    pub fn new(
        api_base: impl Into<String>,
        tenant: TenantContext,
        tokens: Arc<dyn TokenProvider>,
        http: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            tenant,
            tokens,
            http,
        }
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    /// `{api_base}/{tenant_id}/{environment}/api/v2.0/`, trailing slash included.
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidConfiguration`] for an invalid tenant context or API root.
    pub fn base_url(&self) -> Result<Url> {
        self.tenant.validate()?;
        let raw = format!(
            "{}/{}/{}/api/v2.0/",
            self.api_base.trim_end_matches('/'),
            self.tenant.tenant_id,
            self.tenant.environment
        );
        Url::parse(&raw)
            .map_err(|e| ApiError::InvalidConfiguration(format!("invalid API base {raw}: {e}")))
    }

    /// Resolve a relative endpoint such as `companies` or
    /// `companies(…)/items?$top=5` against [`Self::base_url`].
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidConfiguration`] if the base is invalid, the join
    /// fails, or the result leaves the tenant's API root (absolute URLs,
    /// `..` segments).
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        let base = self.base_url()?;
        let url = base
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidConfiguration(format!("invalid endpoint {endpoint}: {e}")))?;
        if url.origin() != base.origin() || !url.path().starts_with(base.path()) {
            return Err(ApiError::InvalidConfiguration(format!(
                "endpoint {endpoint} resolves outside {base}"
            )));
        }
        Ok(url)
    }

    /// GET `endpoint` and decode the JSON body as `T`.
    ///
    /// # Errors
    ///
    /// - [`ApiError::InvalidConfiguration`] for a bad tenant context or endpoint.
    /// - Any error of the token provider, unchanged.
    /// - [`ApiError::Unauthenticated`] on 401, [`ApiError::HttpStatus`] on any
    ///   other non-2xx status.
    /// - [`ApiError::DecodeFailure`] if the body does not match `T`.
    /// - [`ApiError::Transport`] if no response arrives.
    pub async fn fetch<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = self.endpoint_url(endpoint)?;
        self.get_json(url).await
    }

    /// [`Self::fetch`] with OData query options appended.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`].
    pub async fn fetch_with<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &ODataQuery,
    ) -> Result<T> {
        let mut url = self.endpoint_url(endpoint)?;
        query.apply(&mut url);
        self.get_json(url).await
    }

    /// Items of the first page plus, if announced, the second page.
    ///
    /// A third page is never requested even if the second announces one;
    /// use [`Self::pages`] to walk a whole collection.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`], for either request. Items of the first page
    /// are discarded if the second request fails.
    pub async fn fetch_paged<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
        let first: Envelope<T> = self.fetch(endpoint).await?;
        let mut items = first.items;
        let Some(link) = first.next_link.filter(|l| !l.is_empty()) else {
            return Ok(items);
        };

        let second: Envelope<T> = self.get_json(next_link_url(&link)?).await?;
        if second.has_next() {
            tracing::debug!(endpoint, "further pages available, not followed");
        }
        items.extend(second.items);
        Ok(items)
    }

    /// Lazily walk a collection, one page per item, until no next link is
    /// announced. The stream ends after the first error.
    pub fn pages<'a, T>(&'a self, endpoint: &str) -> impl Stream<Item = Result<Vec<T>>> + use<'a, T>
    where
        T: DeserializeOwned + 'a,
    {
        self.pages_from(self.endpoint_url(endpoint))
    }

    /// Download raw bytes (item pictures, documents) with the same
    /// authorization and status handling as [`Self::fetch`].
    ///
    /// `url` may be absolute (e.g. a `@odata.mediaReadLink`) or relative to
    /// [`Self::base_url`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`], minus [`ApiError::DecodeFailure`].
    pub async fn authorized_data(&self, url: &str) -> Result<Bytes> {
        let url = match Url::parse(url) {
            Ok(absolute) => absolute,
            Err(_) => self.endpoint_url(url)?,
        };
        self.get(&url, None).await
    }

    /// Every record of `R`, following all pages. Company-scoped sets need a
    /// `company_id` in the tenant context.
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidConfiguration`] if `R` is company scoped and no
    /// company is selected; otherwise same as [`Self::fetch`].
    pub async fn list<R: Record>(&self, query: &ODataQuery) -> Result<Vec<R>> {
        let mut url = self.endpoint_url(&self.record_path::<R>()?)?;
        query.apply(&mut url);
        self.pages_from::<R>(Ok(url)).try_concat().await
    }

    /// Companies of the environment.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`].
    pub async fn companies(&self) -> Result<Vec<Company>> {
        self.list::<Company>(&ODataQuery::new()).await
    }

    /// Environments of the signed-in tenant, from `/environments/v1.1` on the
    /// API host. Independent of the configured environment and company.
    ///
    /// # Errors
    ///
    /// Same as [`Self::fetch`].
    pub async fn environments(&self) -> Result<Vec<BcEnvironment>> {
        let url = Url::parse(&self.api_base)
            .and_then(|base| base.join("/environments/v1.1"))
            .map_err(|e| {
                ApiError::InvalidConfiguration(format!("invalid API base {}: {e}", self.api_base))
            });
        self.pages_from::<BcEnvironment>(url).try_concat().await
    }

    /// Entity-set path of `R`, prefixed with `companies({id})/` when scoped.
    fn record_path<R: Record>(&self) -> Result<String> {
        if !R::COMPANY_SCOPED {
            return Ok(R::ENTITY_SET.to_string());
        }
        let company = self
            .tenant
            .company_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ApiError::InvalidConfiguration(format!(
                    "company_id is required to list {}",
                    R::ENTITY_SET
                ))
            })?;
        Ok(format!("companies({company})/{}", R::ENTITY_SET))
    }

    fn pages_from<'a, T>(&'a self, first: Result<Url>) -> impl Stream<Item = Result<Vec<T>>> + 'a
    where
        T: DeserializeOwned + 'a,
    {
        stream::try_unfold(Some(first), move |next| async move {
            let Some(url) = next else {
                return Ok(None);
            };
            let page: Envelope<T> = self.get_json(url?).await?;
            let next = page
                .next_link
                .filter(|l| !l.is_empty())
                .map(|l| next_link_url(&l));
            Ok(Some((page.items, next)))
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let body = self.get(&url, Some("application/json")).await?;
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::DecodeFailure(format!("{}: {e}", url.path())))
    }

    async fn get(&self, url: &Url, accept: Option<&str>) -> Result<Bytes> {
        let token = self.tokens.access_token().await?;
        let mut request =
            HttpRequest::get(url.as_str()).header("Authorization", format!("Bearer {token}"));
        if let Some(accept) = accept {
            request = request.header("Accept", accept);
        }

        tracing::debug!(url = %url, "GET");
        let response = self.http.send(request).await?;
        check_status(response)
    }
}

/// 2xx passes the body through, 401 means the token was rejected, anything
/// else is a plain HTTP failure.
fn check_status(response: HttpResponse) -> Result<Bytes> {
    let HttpResponse { status, body } = response;
    match status {
        200..=299 => Ok(body),
        401 => Err(ApiError::Unauthenticated {
            status: Some(status),
            detail: ServiceError::from_body(&body),
        }),
        _ => {
            let detail = ServiceError::from_body(&body);
            tracing::debug!(status, %detail, "request failed");
            Err(ApiError::HttpStatus { status, detail })
        }
    }
}

fn next_link_url(link: &str) -> Result<Url> {
    Url::parse(link).map_err(|e| ApiError::DecodeFailure(format!("invalid @odata.nextLink {link}: {e}")))
}
