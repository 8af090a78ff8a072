//! Virtual documentation page URIs.
//!
//! The backend renders documentation pages addressed as
//! `solargraph:/<page>?<query>`:
//! - `solargraph:/document?query=String%23upcase`
//! - `solargraph:/search?query=each_with_object`
//! - `solargraph:/environment`
//!
//! Each page maps to the protocol method `$/solargraph/<page>` with the
//! decoded query pairs as params.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use url::Url;

use super::rewriter::PSEUDO_SCHEME;
use crate::error::{BridgeError, BridgeResult};

/// Characters escaped inside a query value. `#` must never reach the URI as
/// a fragment separator and `+` would otherwise decode to a space.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>');

/// A parsed documentation page URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDocumentUri {
    page: String,
    params: Vec<(String, String)>,
    canonical: String,
}

impl VirtualDocumentUri {
    /// Parse a `solargraph:` page URI. The fragment, if any, is discarded.
    pub fn parse(uri: &str) -> BridgeResult<Self> {
        let mut url =
            Url::parse(uri).map_err(|e| BridgeError::config(format!("invalid page URI {}: {}", uri, e)))?;
        if url.scheme() != PSEUDO_SCHEME {
            return Err(BridgeError::config(format!(
                "unsupported page URI scheme: {}",
                url.scheme()
            )));
        }
        url.set_fragment(None);

        let page = url.path().trim_matches('/').to_string();
        if page.is_empty() {
            return Err(BridgeError::config(format!("page URI has no page: {}", uri)));
        }
        let params = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        Ok(Self {
            page,
            params,
            canonical: url.to_string(),
        })
    }

    /// URI of the documentation page for a cross-reference path.
    pub fn document(path: &str) -> String {
        format!(
            "{}:/document?query={}",
            PSEUDO_SCHEME,
            utf8_percent_encode(path, QUERY_VALUE)
        )
    }

    /// URI of the search results page for a free-text term.
    pub fn search(term: &str) -> String {
        format!(
            "{}:/search?query={}",
            PSEUDO_SCHEME,
            utf8_percent_encode(term, QUERY_VALUE)
        )
    }

    /// URI of the backend environment report.
    pub fn environment() -> String {
        format!("{}:/environment", PSEUDO_SCHEME)
    }

    /// Cache key: scheme, path and query.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    /// Value of the `query` parameter, if present.
    pub fn query(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == "query")
            .map(|(_, value)| value.as_str())
    }

    /// Protocol method that renders this page.
    pub fn method(&self) -> String {
        format!("$/solargraph/{}", self.page)
    }

    /// Decoded query pairs as request params.
    pub fn params(&self) -> serde_json::Value {
        let map = self
            .params
            .iter()
            .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// Title for the view showing this page.
    pub fn title(&self) -> String {
        match (self.page.as_str(), self.query()) {
            ("search", Some(query)) => format!("Search for {}", query),
            (_, Some(query)) if !query.is_empty() => query.to_string(),
            (page, _) => page.to_string(),
        }
    }
}
