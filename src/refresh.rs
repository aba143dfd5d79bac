use std::sync::Arc;

use crate::{
    factory::ClientFactory,
    fetcher::{DatafileSource, Snapshot},
    handle::ClientHandle,
    Result,
};

/// Result of a successful refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The fetched datafile equals the held snapshot. Nothing was rebuilt.
    Unchanged,
    /// A new client was built and published.
    Rebuilt,
}

/// One fetch, compare and rebuild cycle.
///
/// The refresher holds the snapshot that the currently published client was built from. The
/// snapshot is only replaced once a client has been built from the new document, so a document
/// that fails to build is tried again on the next cycle.
pub struct Refresher<S> {
    source: S,
    factory: ClientFactory,
    handle: Arc<ClientHandle>,
    snapshot: Option<Snapshot>,
}

impl<S: DatafileSource> Refresher<S> {
    pub fn new(source: S, factory: ClientFactory, handle: Arc<ClientHandle>) -> Refresher<S> {
        Refresher {
            source,
            factory,
            handle,
            snapshot: None,
        }
    }

    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.handle
    }

    pub fn refresh(&mut self) -> Result<RefreshOutcome> {
        let snapshot = self.source.fetch()?;

        if self.snapshot.as_ref() == Some(&snapshot) {
            log::debug!(target: "abserve", "datafile unchanged");
            return Ok(RefreshOutcome::Unchanged);
        }

        let client = self.factory.build(&snapshot)?;
        log::info!(target: "abserve", revision:display = client.revision(); "created new client");

        self.handle.replace(client);
        self.snapshot = Some(snapshot);
        Ok(RefreshOutcome::Rebuilt)
    }
}
