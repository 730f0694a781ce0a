use futures::future::BoxFuture;
use futures::stream::{FusedStream, FuturesUnordered};
use futures::{FutureExt, Stream, StreamExt};
use std::collections::HashSet;
use std::hash::Hash;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A set of keyed futures polled concurrently, yielding `(key, output)`.
///
/// At most one future per key is in flight at any time.
pub struct StreamMap<'a, K, V> {
    in_progress: HashSet<K>,
    futures: FuturesUnordered<BoxFuture<'a, (K, V)>>,
}

impl<K, V> Default for StreamMap<'_, K, V> {
    fn default() -> Self {
        Self {
            in_progress: HashSet::new(),
            futures: FuturesUnordered::new(),
        }
    }
}

impl<'a, K, V> StreamMap<'a, K, V>
where
    K: Clone + Eq + Hash + Send + 'a,
    V: 'a,
{
    /// Returns `false` without queueing when `key` is already running.
    pub fn add_if_not_in_progress(&mut self, key: K, future: BoxFuture<'a, V>) -> bool {
        if !self.in_progress.insert(key.clone()) {
            return false;
        }

        self.futures
            .push(future.map(move |output| (key, output)).boxed());
        true
    }

    pub fn len(&self) -> usize {
        self.in_progress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_progress.is_empty()
    }
}

impl<K, V> Stream for StreamMap<'_, K, V>
where
    K: Eq + Hash + Unpin,
{
    type Item = (K, V);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.futures.poll_next_unpin(cx) {
            Poll::Ready(Some((key, output))) => {
                self.in_progress.remove(&key);
                Poll::Ready(Some((key, output)))
            }
            other => other,
        }
    }
}

impl<K, V> FusedStream for StreamMap<'_, K, V>
where
    K: Eq + Hash + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.futures.is_terminated()
    }
}
