//! One page of an OData collection response.

use serde::{Deserialize, Serialize};

/// `{"@odata.context": .., "value": [..], "@odata.nextLink"?: ..}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "@odata.context", default)]
    pub context: String,
    #[serde(rename = "value")]
    pub items: Vec<T>,
    #[serde(
        rename = "@odata.nextLink",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_link: Option<String>,
}

impl<T> Envelope<T> {
    /// `true` when the server announced a further page.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.next_link.as_deref().is_some_and(|l| !l.is_empty())
    }
}
