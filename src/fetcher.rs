//! An HTTP client that fetches the datafile.
use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;

use crate::FetchError;

/// A parsed datafile document as last fetched.
///
/// Two snapshots are equal when their compact serializations are equal. Whitespace does not
/// matter, key order does: reordering the fields of a document is a change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    value: Value,
    serialized: String,
}

impl Snapshot {
    pub fn new(value: Value) -> Snapshot {
        // `preserve_order` keeps object keys in document order.
        let serialized = value.to_string();
        Snapshot { value, serialized }
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Snapshot) -> bool {
        self.serialized == other.serialized
    }
}

impl Eq for Snapshot {}

/// Produces the current datafile on request.
pub trait DatafileSource: Send {
    fn fetch(&mut self) -> Result<Snapshot, FetchError>;
}

impl<T: FnMut() -> Result<Snapshot, FetchError> + Send> DatafileSource for T {
    fn fetch(&mut self) -> Result<Snapshot, FetchError> {
        self()
    }
}

/// Fetches the datafile from a fixed URL with a blocking HTTP GET.
///
/// Must be used from a thread that is not driving an async runtime.
pub struct DatafileFetcher {
    url: Url,
    // Client holds a connection pool internally, so we're reusing the client between requests. It
    // is created on first fetch so that the fetcher can be constructed inside an async context.
    client: Option<reqwest::blocking::Client>,
}

impl DatafileFetcher {
    pub fn new(url: Url) -> DatafileFetcher {
        DatafileFetcher { url, client: None }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl DatafileSource for DatafileFetcher {
    fn fetch(&mut self) -> Result<Snapshot, FetchError> {
        let client = match self.client.take() {
            Some(client) => client,
            // reqwest defaults to a 30 second timeout. A fetch has none: a slow server stalls the
            // poller until it answers.
            None => reqwest::blocking::Client::builder().timeout(None).build()?,
        };
        let client = self.client.insert(client);

        log::debug!(target: "abserve", url:display = self.url; "fetching datafile");
        let response = client.get(self.url.clone()).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.text()?;
        parse_snapshot(&body)
    }
}

/// Parse a response body into a [`Snapshot`].
///
/// An empty body, or one that is JSON `null`, is reported as [`FetchError::EmptyBody`].
pub fn parse_snapshot(body: &str) -> Result<Snapshot, FetchError> {
    if body.trim().is_empty() {
        return Err(FetchError::EmptyBody);
    }

    let value: Value =
        serde_json::from_str(body).map_err(|err| FetchError::InvalidJson(Arc::new(err)))?;
    if value.is_null() {
        return Err(FetchError::EmptyBody);
    }

    Ok(Snapshot::new(value))
}
