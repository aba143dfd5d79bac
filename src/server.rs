use std::{sync::Arc, time::Duration};

use tokio::net::TcpListener;

use crate::{
    fetcher::DatafileFetcher,
    handle::ClientHandle,
    http::{create_router, AppState},
    poller::{PollerThread, PollerThreadConfig},
    refresh::Refresher,
    session::SessionStore,
    ClientFactory, Error, Result, ServerConfig,
};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// The demo server: an HTTP front door over a hot-reloaded evaluation client.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a server, validating `config`.
    pub fn new(config: ServerConfig) -> Result<Server> {
        config.validate()?;
        let state = AppState::new(
            Arc::new(ClientHandle::new()),
            SessionStore::new(config.session_ttl),
        );
        Ok(Server { config, state })
    }

    /// Get the shared application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Start polling the configured datafile URL. Every client is built by `factory`, with its event
    /// endpoint taken from the configuration.
    ///
    /// The first refresh is not awaited. Until it succeeds, evaluation routes answer `default`.
    pub fn start_poller(&self, factory: ClientFactory) -> Result<PollerThread> {
        let url = self.config.parsed_datafile_url()?;
        log::info!(target: "abserve", datafile_url:display = url; "starting datafile poller");

        let refresher = Refresher::new(
            DatafileFetcher::new(url),
            factory.with_event_endpoint(self.config.event_endpoint.clone()),
            Arc::clone(&self.state.clients),
        );
        PollerThread::start_with_config(
            refresher,
            PollerThreadConfig::new().with_interval(self.config.refresh_interval),
        )
    }

    /// Run the server until ctrl-c is received.
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|err| Error::Bind {
                addr: addr.clone(),
                source: Arc::new(err),
            })?;

        log::info!(target: "abserve", "listening on {addr}");

        self.start_session_purge();

        let router = create_router(self.state);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        log::info!(target: "abserve", "server stopped");
        Ok(())
    }

    /// Start a background task that drops expired sessions.
    fn start_session_purge(&self) {
        let sessions = self.state.sessions.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = sessions.purge_expired();
                if purged > 0 {
                    log::debug!(target: "abserve", purged; "purged expired sessions");
                }
            }
        });
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!(target: "abserve", "failed to listen for ctrl-c: {err}");
        // Without a signal handler the server can only be stopped externally.
        std::future::pending::<()>().await;
    }
    log::info!(target: "abserve", "shutting down");
}
