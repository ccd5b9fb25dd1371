//! Community actor: one chat room and its members.
//!
//! Each community runs a control loop in its own task. The loop is the
//! only code that touches the member map, so membership changes and
//! broadcasts are serialized without a lock. The outside world talks to
//! it through [`Action`]s and reads a [`CommunityInfo`] snapshot through
//! a `watch` channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use chatrelay_protocol::{Message, SessionId};
use chatrelay_session::{
    invariant_violation, Action, ActionKind, ActionReceiver, ActionResult,
    ActionSender, ClientSession, CommunityId, MembershipError,
};
use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::{CommunityError, DoneSignal};

/// The member map, owned by the control loop and handed back when it exits.
type Members = HashMap<SessionId, Arc<ClientSession>>;

/// A snapshot of a community's membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityInfo {
    pub id: CommunityId,
    /// Member ids in ascending order.
    pub members: Vec<SessionId>,
}

/// Handle to a running community. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommunityHandle {
    id: CommunityId,
    sender: ActionSender,
    info: watch::Receiver<CommunityInfo>,
}

impl CommunityHandle {
    pub fn id(&self) -> &CommunityId {
        &self.id
    }

    /// The community's action channel.
    pub fn sender(&self) -> &ActionSender {
        &self.sender
    }

    /// The latest published membership snapshot.
    pub fn info(&self) -> CommunityInfo {
        self.info.borrow().clone()
    }

    pub fn members(&self) -> Vec<SessionId> {
        self.info.borrow().members.clone()
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.info.borrow().members.binary_search(&session).is_ok()
    }

    /// Waits until the published snapshot satisfies `f`.
    ///
    /// Returns `None` if the community stops first.
    pub async fn wait_for(
        &self,
        f: impl FnMut(&CommunityInfo) -> bool,
    ) -> Option<CommunityInfo> {
        let mut info = self.info.clone();
        let snapshot = info.wait_for(f).await.ok()?;
        Some(CommunityInfo::clone(&snapshot))
    }

    /// Asks the community to add `session` as a member.
    pub async fn add(&self, session: Arc<ClientSession>) -> ActionResult {
        Action::join_community(self.id.clone(), session)
            .request(&self.sender, self)
            .await
    }

    /// Asks the community to remove `session`.
    pub async fn remove(&self, session: Arc<ClientSession>) -> ActionResult {
        Action::leave_community(self.id.clone(), session)
            .request(&self.sender, self)
            .await
    }

    /// Queues a text line from `sender` for the other members.
    pub async fn send_text(&self, sender: SessionId, text: Bytes) -> ActionResult {
        self.sender
            .send(Action::text(sender, text))
            .await
            .map_err(|_| MembershipError::Unavailable(self.to_string()))
    }
}

impl fmt::Display for CommunityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "community {}", self.id)
    }
}

/// A running community: its handle plus what it takes to stop it.
///
/// Owned by exactly one server. Dropping it without calling
/// [`shutdown`](Self::shutdown) leaves the task running until every
/// sender is gone.
pub struct Community {
    handle: CommunityHandle,
    done: DoneSignal,
    task: Mutex<Option<JoinHandle<Members>>>,
}

impl Community {
    /// Starts a community's control loop.
    ///
    /// `capacity` bounds the action channel; senders wait when it's full.
    pub fn spawn(id: CommunityId, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (info_tx, info_rx) = watch::channel(CommunityInfo {
            id: id.clone(),
            members: Vec::new(),
        });
        let done = DoneSignal::new();

        let actor = CommunityActor {
            id: id.clone(),
            members: HashMap::new(),
            receiver: rx,
            done: done.clone(),
            info: info_tx,
        };
        let task = tokio::spawn(actor.run());

        Self {
            handle: CommunityHandle {
                id,
                sender: tx,
                info: info_rx,
            },
            done,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> &CommunityId {
        &self.handle.id
    }

    pub fn handle(&self) -> &CommunityHandle {
        &self.handle
    }

    /// Stops the control loop, then disconnects every member.
    ///
    /// Returns only after all disconnects have finished. A second call
    /// returns [`CommunityError::CommunityStopped`] and touches nothing.
    pub async fn shutdown(&self) -> Result<(), CommunityError> {
        if !self.done.fire() {
            return Err(CommunityError::CommunityStopped(self.id().clone()));
        }
        tracing::info!(community_id = %self.id(), "shutting down community");

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let members = match task {
            Some(task) => task.await.unwrap_or_else(|e| {
                tracing::error!(community_id = %self.id(), error = %e, "community loop failed");
                Members::new()
            }),
            None => Members::new(),
        };

        let count = members.len();
        join_all(members.values().map(|session| session.disconnect())).await;

        tracing::info!(community_id = %self.id(), members = count, "community stopped");
        Ok(())
    }
}

impl fmt::Debug for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Community")
            .field("id", self.id())
            .field("stopped", &self.done.is_fired())
            .finish_non_exhaustive()
    }
}

/// State owned by the control loop.
struct CommunityActor {
    id: CommunityId,
    members: Members,
    receiver: ActionReceiver,
    done: DoneSignal,
    info: watch::Sender<CommunityInfo>,
}

impl CommunityActor {
    async fn run(mut self) -> Members {
        tracing::info!(community_id = %self.id, "community control loop started");

        loop {
            let action = tokio::select! {
                biased;
                () = self.done.wait() => break,
                action = self.receiver.recv() => action,
            };
            match action {
                Some(action) => self.handle(action).await,
                None => break,
            }
        }

        tracing::info!(
            community_id = %self.id,
            members = self.members.len(),
            "community control loop stopped"
        );
        self.members
    }

    async fn handle(&mut self, action: Action) {
        let Action {
            session_id,
            kind,
            reply,
        } = action;

        match kind {
            ActionKind::JoinCommunity {
                community_id,
                session,
            } => {
                if community_id != self.id {
                    tracing::warn!(
                        community_id = %self.id,
                        requested = %community_id,
                        "join addressed to another community"
                    );
                }
                Action::respond(reply, self.add(session));
            }
            ActionKind::LeaveCommunity { session, .. } => {
                Action::respond(reply, self.remove(session.id()));
            }
            ActionKind::Text { sender, text } => {
                self.broadcast(sender, text).await;
            }
            kind @ (ActionKind::JoinServer { .. } | ActionKind::LeaveServer { .. }) => {
                invariant_violation(
                    &format!("community {}", self.id),
                    &Action {
                        session_id,
                        kind,
                        reply,
                    },
                );
            }
        }
    }

    fn add(&mut self, session: Arc<ClientSession>) -> ActionResult {
        let session_id = session.id();
        if session.is_disconnected() {
            return Err(MembershipError::Disconnected(session_id));
        }
        if self.members.contains_key(&session_id) {
            return Err(MembershipError::AlreadyMember {
                session: session_id,
                community: self.id.clone(),
            });
        }

        self.members.insert(session_id, session);
        self.publish();
        tracing::info!(
            community_id = %self.id,
            %session_id,
            members = self.members.len(),
            "member joined"
        );
        Ok(())
    }

    fn remove(&mut self, session_id: SessionId) -> ActionResult {
        if self.members.remove(&session_id).is_none() {
            return Err(MembershipError::NotMember {
                session: session_id,
                community: self.id.clone(),
            });
        }

        self.publish();
        tracing::info!(
            community_id = %self.id,
            %session_id,
            members = self.members.len(),
            "member left"
        );
        Ok(())
    }

    /// Writes a text frame to every member except `sender`, concurrently.
    ///
    /// Members whose write fails are disconnected and dropped from the map.
    /// Writes still pending when the done signal fires are abandoned.
    async fn broadcast(&mut self, sender: SessionId, text: Bytes) {
        if !self.members.contains_key(&sender) {
            tracing::warn!(
                community_id = %self.id,
                %sender,
                "text from non-member, ignoring"
            );
            return;
        }

        let message = Message::ClientText { sender, text };
        let recipients: Vec<Arc<ClientSession>> = self
            .members
            .values()
            .filter(|s| s.id() != sender)
            .cloned()
            .collect();

        let writes = join_all(recipients.iter().map(|session| {
            let message = &message;
            async move { (session, session.write(message).await) }
        }));
        // A member that stops reading stalls its write; shutdown must not
        // wait behind it. Its connection is closed by the shutdown.
        let results = tokio::select! {
            biased;
            () = self.done.wait() => {
                tracing::info!(
                    community_id = %self.id,
                    %sender,
                    "stopped mid-broadcast, abandoning pending writes"
                );
                return;
            }
            results = writes => results,
        };

        let mut dropped = false;
        for (session, result) in results {
            if let Err(e) = result {
                tracing::info!(
                    community_id = %self.id,
                    session_id = %session.id(),
                    error = %e,
                    "write failed, dropping member"
                );
                session.disconnect().await;
                dropped |= self.members.remove(&session.id()).is_some();
            }
        }
        if dropped {
            self.publish();
        }

        tracing::debug!(
            community_id = %self.id,
            %sender,
            recipients = recipients.len(),
            "relayed text"
        );
    }

    fn publish(&self) {
        let mut members: Vec<SessionId> = self.members.keys().copied().collect();
        members.sort_unstable();
        self.info.send_replace(CommunityInfo {
            id: self.id.clone(),
            members,
        });
    }
}
