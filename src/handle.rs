use std::sync::{Arc, PoisonError, RwLock};

use crate::Client;

/// `ClientHandle` holds the currently published evaluation client and allows it to be replaced
/// while request handlers keep reading it.
///
/// A reader gets an `Arc` to the client that was current when it asked. The client stays alive for
/// as long as the reader holds it, even if a newer one gets published in the meantime.
#[derive(Default)]
pub struct ClientHandle {
    client: RwLock<Option<Arc<Client>>>,
}

impl ClientHandle {
    pub fn new() -> ClientHandle {
        ClientHandle::default()
    }

    /// Returns `None` until the first client gets published.
    pub fn current(&self) -> Option<Arc<Client>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish a new client, returning the previous one.
    pub fn replace(&self, client: Client) -> Option<Arc<Client>> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Some(Arc::new(client));

        let mut slot = self.client.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut slot, new_value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::ClientHandle;
    use crate::{Client, ClientOptions};

    fn client(revision: &str) -> Client {
        Client::from_datafile(
            &json!({"version": "4", "revision": revision}),
            ClientOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn empty_until_first_publish() {
        let handle = ClientHandle::new();

        assert!(handle.current().is_none());
        assert!(handle.replace(client("1")).is_none());
        assert_eq!(handle.current().unwrap().revision(), "1");
    }

    #[test]
    fn readers_keep_their_client_after_replace() {
        let handle = ClientHandle::new();
        handle.replace(client("1"));

        let held = handle.current().unwrap();
        let previous = handle.replace(client("2")).unwrap();

        assert!(Arc::ptr_eq(&held, &previous));
        assert_eq!(held.revision(), "1");
        assert_eq!(handle.current().unwrap().revision(), "2");
    }

    #[test]
    fn can_publish_from_another_thread() {
        let handle = Arc::new(ClientHandle::new());

        {
            let handle = handle.clone();
            let _ = std::thread::spawn(move || {
                handle.replace(client("1"));
            })
            .join();
        }

        assert!(handle.current().is_some());
    }
}
