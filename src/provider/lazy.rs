//! Connect-once broker handles

use crate::error::Result;
use std::future::Future;
use tokio::sync::OnceCell;

/// A broker client created by the first caller that needs it
///
/// Concurrent first callers wait for a single connection attempt and share
/// its result. A failed attempt is not cached: the next caller retries.
#[derive(Debug)]
pub struct LazyClient<T> {
    cell: OnceCell<T>,
}

impl<T> Default for LazyClient<T> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }
}

impl<T> LazyClient<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client, connecting with `connect` if no client exists yet
    pub async fn get_or_connect<F, Fut>(&self, connect: F) -> Result<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cell.get_or_try_init(connect).await
    }

    /// The client, if a connection was already established
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }
}
