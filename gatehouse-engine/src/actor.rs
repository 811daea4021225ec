// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::time::Duration;

use gatehouse_core::{BucketId, MemberId, now};
use gatehouse_store::EntitlementStore;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::allocator::BucketSelector;
use crate::engine::{EngineError, EntitlementEngine};
use crate::traits::{LiveMembership, Notifier};

/// Events sent to the engine actor.
#[derive(Debug)]
pub enum ToEngineActor {
    /// A member joined the space.
    MemberJoined {
        member: MemberId,
        /// Age of the member's platform account at join time.
        account_age: Duration,
    },

    /// A member's live bucket set changed.
    BucketsChanged {
        member: MemberId,
        old_buckets: HashSet<BucketId>,
        new_buckets: HashSet<BucketId>,
    },

    /// Stop the actor and reply once the current trigger finished.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Single task processing all triggers: platform events from the inbox and sweep ticks from a
/// periodic timer.
///
/// Running both through one `select!` loop is the per-member serialization point: triggers only
/// interleave at `.await` boundaries inside this task, so two handlers never race on the same
/// record. The sweep timer ticks immediately on startup, reconciling trials that lapsed while
/// the process was down.
#[derive(Debug)]
pub struct EngineActor<St, L, S, N> {
    engine: EntitlementEngine<St, L, S, N>,
    inbox: Receiver<ToEngineActor>,
    sweep_interval: Duration,
}

impl<St, L, S, N> EngineActor<St, L, S, N>
where
    St: EntitlementStore,
    L: LiveMembership,
    S: BucketSelector,
    N: Notifier,
{
    /// Create a new instance of the `EngineActor` and return it along with a channel sender.
    pub fn new(engine: EntitlementEngine<St, L, S, N>) -> (Self, Sender<ToEngineActor>) {
        let (actor_tx, actor_rx) = mpsc::channel(256);
        let sweep_interval = engine.config().sweep_interval;

        let actor = Self {
            engine,
            inbox: actor_rx,
            sweep_interval,
        };

        (actor, actor_tx)
    }

    pub async fn run(
        mut self,
        shutdown_token: CancellationToken,
    ) -> Result<(), EngineError<St::Error>> {
        let mut sweep_interval = interval(self.sweep_interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_token.cancelled() => {
                    debug!("engine actor shutting down");
                    break;
                }
                msg = self.inbox.recv() => {
                    let Some(msg) = msg else {
                        debug!("engine actor inbox closed");
                        break;
                    };
                    match msg {
                        ToEngineActor::Shutdown { reply } => {
                            reply.send(()).ok();
                            break;
                        }
                        msg => self.on_actor_message(msg).await?,
                    }
                }
                _ = sweep_interval.tick() => {
                    self.engine.sweep(now()).await?;
                }
            }
        }

        Ok(())
    }

    async fn on_actor_message(
        &mut self,
        msg: ToEngineActor,
    ) -> Result<(), EngineError<St::Error>> {
        match msg {
            ToEngineActor::MemberJoined {
                member,
                account_age,
            } => {
                let state = self.engine.handle_join(&member, account_age, now()).await?;
                debug!(member = %member, %state, "join handled");
            }
            ToEngineActor::BucketsChanged {
                member,
                old_buckets,
                new_buckets,
            } => {
                let state = self
                    .engine
                    .handle_buckets_changed(&member, &old_buckets, &new_buckets)
                    .await?;
                debug!(member = %member, %state, "bucket change handled");
            }
            ToEngineActor::Shutdown { .. } => unreachable!("handled by the run loop"),
        }

        Ok(())
    }
}
