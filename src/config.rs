use std::time::Duration;

use reqwest::Url;

use crate::{events::DEFAULT_EVENT_ENDPOINT, poller::DEFAULT_REFRESH_INTERVAL, Error, Result};

/// Configuration for [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) port: u16,
    pub(crate) datafile_url: String,
    pub(crate) refresh_interval: Duration,
    pub(crate) event_endpoint: String,
    pub(crate) session_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            port: ServerConfig::DEFAULT_PORT,
            datafile_url: ServerConfig::DEFAULT_DATAFILE_URL.to_owned(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            event_endpoint: DEFAULT_EVENT_ENDPOINT.to_owned(),
            session_ttl: ServerConfig::DEFAULT_SESSION_TTL,
        }
    }
}

impl ServerConfig {
    /// Default port the server listens on.
    pub const DEFAULT_PORT: u16 = 3000;

    /// Default URL the datafile is fetched from.
    pub const DEFAULT_DATAFILE_URL: &'static str =
        "https://cdn.optimizely.com/datafiles/C31EvBBW1SPigwRNwkDe88.json";

    /// Default lifetime of a session.
    pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60_000);

    /// Create a configuration with every setting at its default.
    ///
    /// ```
    /// # use abserve::ServerConfig;
    /// let mut config = ServerConfig::new();
    /// config.port(8080).datafile_url("http://localhost:9000/datafile.json");
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn new() -> ServerConfig {
        ServerConfig::default()
    }

    pub fn port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    /// URL of the remote datafile.
    pub fn datafile_url(&mut self, datafile_url: impl Into<String>) -> &mut Self {
        self.datafile_url = datafile_url.into();
        self
    }

    /// Time between two datafile fetches.
    pub fn refresh_interval(&mut self, refresh_interval: Duration) -> &mut Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// URL that impression and conversion events are posted to.
    pub fn event_endpoint(&mut self, event_endpoint: impl Into<String>) -> &mut Self {
        self.event_endpoint = event_endpoint.into();
        self
    }

    pub fn session_ttl(&mut self, session_ttl: Duration) -> &mut Self {
        self.session_ttl = session_ttl;
        self
    }

    /// Check that both configured URLs are valid and that the refresh interval is not zero.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval.is_zero() {
            return Err(Error::InvalidRefreshInterval);
        }
        self.parsed_datafile_url()?;
        parse_url(&self.event_endpoint)?;
        Ok(())
    }

    pub(crate) fn parsed_datafile_url(&self) -> Result<Url> {
        parse_url(&self.datafile_url)
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|source| Error::InvalidUrl {
        url: url.to_owned(),
        source,
    })
}
