//! Routing table mapping destination identities to their coalescing channels.
//!
//! Entries are created lazily on the first submission for a destination and
//! only leave the table through [`RoutingTable::drain`], which teardown uses.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::backend::BackendClient;
use crate::batch::Channel;
use crate::{Error, ErrorContext, Result};

pub struct RoutingTable<C: BackendClient> {
    channels: RwLock<HashMap<String, Arc<Channel<C>>>>,
}

impl<C: BackendClient> RoutingTable<C> {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Return the channel for `client`'s destination, creating it with `create`
    /// if none exists.
    ///
    /// With `replace_connection`, an existing channel switches to `client` for
    /// its future dispatches; requests already accumulated stay where they are.
    /// `create` runs under the write lock, so concurrent first submissions for
    /// one destination produce a single channel.
    pub fn get_or_create<F>(
        &self,
        client: &Arc<C>,
        replace_connection: bool,
        create: F,
    ) -> Result<Arc<Channel<C>>>
    where
        F: FnOnce(Arc<C>) -> Result<Channel<C>>,
    {
        let destination = client.endpoint();

        {
            let channels = self.channels.read().map_err(|_| poisoned())?;
            if let Some(channel) = channels.get(destination) {
                if replace_connection {
                    channel.replace_client(Arc::clone(client));
                }
                return Ok(Arc::clone(channel));
            }
        }

        let mut channels = self.channels.write().map_err(|_| poisoned())?;
        if let Some(channel) = channels.get(destination) {
            // Lost the race to another first submission.
            if replace_connection {
                channel.replace_client(Arc::clone(client));
            }
            return Ok(Arc::clone(channel));
        }
        let channel = Arc::new(create(Arc::clone(client))?);
        channels.insert(destination.to_string(), Arc::clone(&channel));
        Ok(channel)
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        destinations.sort();
        destinations
    }

    pub fn len(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every channel. Works on a poisoned table too, since
    /// teardown must always be able to empty it.
    pub fn drain(&self) -> Vec<Arc<Channel<C>>> {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, channel)| channel)
            .collect()
    }
}

impl<C: BackendClient> Default for RoutingTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> Error {
    Error::runtime_with_context(
        "routing table lock poisoned",
        ErrorContext::new().with_source("routing_table"),
    )
}
