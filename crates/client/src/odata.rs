//! OData system query options.

use url::{Url, form_urlencoded};

/// Fluent builder for `$filter`, `$select`, `$orderby`, `$top`, `$skip` and
/// `$expand`.
///
/// ```
/// use bcconnect_client::ODataQuery;
///
/// let q = ODataQuery::new()
///     .filter("displayName eq 'Adatum'")
///     .select(["id", "number"])
///     .top(10);
/// assert_eq!(
///     q.to_query_string(),
///     "$filter=displayName+eq+%27Adatum%27&$select=id%2Cnumber&$top=10"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ODataQuery {
    filter: Option<String>,
    select: Vec<String>,
    orderby: Vec<String>,
    top: Option<u32>,
    skip: Option<u32>,
    expand: Vec<String>,
}

impl ODataQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `$filter`. A second call replaces the first.
    #[must_use]
    pub fn filter(mut self, expr: impl Into<String>) -> Self {
        self.filter = Some(expr.into());
        self
    }

    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Append a sort key, e.g. `"number desc"`.
    #[must_use]
    pub fn orderby(mut self, key: impl Into<String>) -> Self {
        self.orderby.push(key.into());
        self
    }

    #[must_use]
    pub fn top(mut self, n: u32) -> Self {
        self.top = Some(n);
        self
    }

    #[must_use]
    pub fn skip(mut self, n: u32) -> Self {
        self.skip = Some(n);
        self
    }

    #[must_use]
    pub fn expand(mut self, navigation: impl Into<String>) -> Self {
        self.expand.push(navigation.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Options in a fixed order with form-encoded values. The `$` prefix of
    /// each option name is kept literal.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(filter) = &self.filter {
            pairs.push(("$filter", filter.clone()));
        }
        if !self.select.is_empty() {
            pairs.push(("$select", self.select.join(",")));
        }
        if !self.orderby.is_empty() {
            pairs.push(("$orderby", self.orderby.join(",")));
        }
        if let Some(top) = self.top {
            pairs.push(("$top", top.to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("$skip", skip.to_string()));
        }
        if !self.expand.is_empty() {
            pairs.push(("$expand", self.expand.join(",")));
        }

        pairs
            .into_iter()
            .map(|(name, value)| {
                let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
                format!("{name}={encoded}")
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Append the options to `url`, after any query it already has.
    pub fn apply(&self, url: &mut Url) {
        if self.is_empty() {
            return;
        }
        let options = self.to_query_string();
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{options}"),
            _ => options,
        };
        url.set_query(Some(&query));
    }
}
