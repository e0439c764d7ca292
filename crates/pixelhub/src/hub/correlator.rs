//! Request/response correlation.
//!
//! A caller sends one command to several targets over fire-and-forget
//! channels and wants a single aggregated answer. Each request gets a fresh
//! UUID token; targets echo the token in their reply and [`Correlator::resolve`]
//! files the reply under it. The request settles when every target replied
//! or when its single timer fires, whichever comes first. Targets that never
//! answered come back as [`Outcome::TimedOut`].

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, trace};
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    Replied(R),
    TimedOut,
}

impl<R> Outcome<R> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut)
    }
}

/// One target's slot in a settled request.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetReply<T, R> {
    pub target: T,
    pub outcome: Outcome<R>,
}

/// A settled request: exactly one entry per target, in target order.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled<T, R> {
    pub token: Uuid,
    pub replies: Vec<TargetReply<T, R>>,
}

impl<T, R> Settled<T, R> {
    pub fn all_replied(&self) -> bool {
        self.replies.iter().all(|r| !r.outcome.is_timed_out())
    }
}

struct PendingRequest<T, R> {
    targets: Vec<T>,
    replies: HashMap<T, R>,
    settle: Option<oneshot::Sender<HashMap<T, R>>>,
}

type PendingMap<T, R> = DashMap<Uuid, PendingRequest<T, R>>;

/// Pending-request table shared by every in-flight call.
pub struct Correlator<T, R> {
    pending: Arc<PendingMap<T, R>>,
}

impl<T, R> Correlator<T, R>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Register a request for `targets` (duplicates dropped, order kept).
    ///
    /// With no targets nothing is registered and the call settles
    /// immediately with an empty result.
    pub fn begin(&self, targets: Vec<T>) -> PendingCall<T, R> {
        let mut unique: Vec<T> = Vec::with_capacity(targets.len());
        for target in targets {
            if !unique.contains(&target) {
                unique.push(target);
            }
        }

        let token = Uuid::new_v4();
        let rx = if unique.is_empty() {
            None
        } else {
            let (tx, rx) = oneshot::channel();
            self.pending.insert(
                token,
                PendingRequest {
                    targets: unique.clone(),
                    replies: HashMap::with_capacity(unique.len()),
                    settle: Some(tx),
                },
            );
            trace!("Registered pending request {} for {} target(s)", token, unique.len());
            Some(rx)
        };

        PendingCall {
            token,
            targets: unique,
            rx,
            pending: Arc::clone(&self.pending),
        }
    }

    /// Send-and-collect in one step: registers the request, calls `emit`
    /// once per target with the token, then waits up to `timeout`.
    pub async fn call<F, Fut>(
        &self,
        targets: Vec<T>,
        timeout: Duration,
        mut emit: F,
    ) -> Settled<T, R>
    where
        F: FnMut(T, Uuid) -> Fut,
        Fut: Future<Output = ()>,
    {
        let call = self.begin(targets);
        for target in call.targets().to_vec() {
            emit(target, call.token()).await;
        }
        call.wait(timeout).await
    }

    /// File `reply` from `from` under `token`.
    ///
    /// Returns `false` for unknown tokens, senders that were not targeted
    /// and repeat replies; the first reply per target wins.
    pub fn resolve(&self, token: &Uuid, from: &T, reply: R) -> bool {
        let complete = {
            let Some(mut entry) = self.pending.get_mut(token) else {
                debug!("Dropping reply for unknown token {}", token);
                return false;
            };
            if !entry.targets.contains(from) || entry.replies.contains_key(from) {
                return false;
            }
            entry.replies.insert(from.clone(), reply);
            entry.replies.len() == entry.targets.len()
        };

        if complete && let Some((_, mut request)) = self.pending.remove(token) {
            if let Some(settle) = request.settle.take() {
                let _ = settle.send(request.replies);
            }
        }
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, token: &Uuid) -> bool {
        self.pending.contains_key(token)
    }
}

impl<T, R> Default for Correlator<T, R>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on one in-flight request.
///
/// Dropping it before [`PendingCall::wait`] completes removes the pending
/// entry, so late replies are ignored.
pub struct PendingCall<T, R>
where
    T: Eq + Hash,
{
    token: Uuid,
    targets: Vec<T>,
    rx: Option<oneshot::Receiver<HashMap<T, R>>>,
    pending: Arc<PendingMap<T, R>>,
}

impl<T, R> PendingCall<T, R>
where
    T: Clone + Eq + Hash,
{
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn targets(&self) -> &[T] {
        &self.targets
    }

    /// Wait until every target replied or `timeout` elapsed.
    pub async fn wait(mut self, timeout: Duration) -> Settled<T, R> {
        let targets = std::mem::take(&mut self.targets);
        let mut replies = match self.rx.take() {
            None => HashMap::new(),
            Some(mut rx) => match tokio::time::timeout(timeout, &mut rx).await {
                Ok(settled) => settled.unwrap_or_default(),
                Err(_) => match self.pending.remove(&self.token) {
                    Some((_, request)) => {
                        debug!(
                            "Request {} timed out with {}/{} replies",
                            self.token,
                            request.replies.len(),
                            request.targets.len()
                        );
                        request.replies
                    }
                    // The last reply won the race and is already on its way.
                    None => rx.await.unwrap_or_default(),
                },
            },
        };

        let replies = targets
            .into_iter()
            .map(|target| {
                let outcome = match replies.remove(&target) {
                    Some(reply) => Outcome::Replied(reply),
                    None => Outcome::TimedOut,
                };
                TargetReply { target, outcome }
            })
            .collect();

        Settled {
            token: self.token,
            replies,
        }
    }
}

impl<T, R> Drop for PendingCall<T, R>
where
    T: Eq + Hash,
{
    fn drop(&mut self) {
        self.pending.remove(&self.token);
    }
}
