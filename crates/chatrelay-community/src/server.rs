//! Server actor: one region's communities.
//!
//! A server always owns a `root` community, created with it, and lazily
//! creates others as sessions ask for them. It is the only node that
//! rewires a session's [`Route`]; communities just keep member maps.
//!
//! Every placement follows the same order: add the session to the
//! destination community first (waiting for its reply), then swap the
//! session's route once. A move between communities removes the session
//! from the old one before adding it to the new one, so it is never a
//! member of both.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chatrelay_session::{
    invariant_violation, Action, ActionKind, ActionReceiver, ActionResult,
    ActionSender, ClientSession, CommunityId, MembershipError, Route, ServerId,
};
use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::{
    Community, CommunityError, CommunityHandle, CommunityPolicy, DoneSignal,
    PermissivePolicy,
};

type Communities = HashMap<CommunityId, Community>;

/// Published view of a server's communities.
pub type CommunityMap = BTreeMap<CommunityId, CommunityHandle>;

/// Handle to a running server. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    id: ServerId,
    sender: ActionSender,
    communities: watch::Receiver<CommunityMap>,
}

impl ServerHandle {
    pub fn id(&self) -> &ServerId {
        &self.id
    }

    /// The server's action channel.
    pub fn sender(&self) -> &ActionSender {
        &self.sender
    }

    pub fn community(&self, id: &CommunityId) -> Option<CommunityHandle> {
        self.communities.borrow().get(id).cloned()
    }

    pub fn root(&self) -> Option<CommunityHandle> {
        self.community(&CommunityId::root())
    }

    pub fn community_ids(&self) -> Vec<CommunityId> {
        self.communities.borrow().keys().cloned().collect()
    }

    /// Waits until `id` exists, returning its handle.
    ///
    /// Returns `None` if the server stops first.
    pub async fn wait_for_community(&self, id: &CommunityId) -> Option<CommunityHandle> {
        let mut communities = self.communities.clone();
        let snapshot = communities.wait_for(|map| map.contains_key(id)).await.ok()?;
        snapshot.get(id).cloned()
    }

    /// Places `session` in this server's `root` community.
    pub async fn join(&self, session: Arc<ClientSession>) -> ActionResult {
        Action::join_server(self.id.clone(), session)
            .request(&self.sender, self)
            .await
    }

    /// Moves `session` to `community`, creating it if policy allows.
    pub async fn join_community(
        &self,
        community: CommunityId,
        session: Arc<ClientSession>,
    ) -> ActionResult {
        Action::join_community(community, session)
            .request(&self.sender, self)
            .await
    }

    /// Moves `session` out of `community` and back to `root`.
    pub async fn leave_community(
        &self,
        community: CommunityId,
        session: Arc<ClientSession>,
    ) -> ActionResult {
        Action::leave_community(community, session)
            .request(&self.sender, self)
            .await
    }

    /// Takes `session` out of this server entirely.
    pub async fn leave(&self, session: Arc<ClientSession>) -> ActionResult {
        Action::leave_server(self.id.clone(), session)
            .request(&self.sender, self)
            .await
    }
}

impl fmt::Display for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server {}", self.id)
    }
}

/// A running server: its handle plus what it takes to stop it.
pub struct Server {
    handle: ServerHandle,
    done: DoneSignal,
    task: Mutex<Option<JoinHandle<Communities>>>,
}

impl Server {
    /// Starts a server that may create any community.
    pub fn spawn(id: ServerId, capacity: usize) -> Self {
        Self::spawn_with_policy(id, capacity, Arc::new(PermissivePolicy))
    }

    /// Starts a server whose on-demand community creation is gated by
    /// `policy`. The `root` community is created here, before the control
    /// loop runs.
    pub fn spawn_with_policy(
        id: ServerId,
        capacity: usize,
        policy: Arc<dyn CommunityPolicy>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let root = Community::spawn(CommunityId::root(), capacity);

        let mut published = CommunityMap::new();
        published.insert(CommunityId::root(), root.handle().clone());
        let (communities_tx, communities_rx) = watch::channel(published);

        let mut communities = Communities::new();
        communities.insert(CommunityId::root(), root);

        let done = DoneSignal::new();
        let actor = ServerActor {
            id: id.clone(),
            sender: tx.clone(),
            receiver: rx,
            done: done.clone(),
            communities,
            published: communities_tx,
            policy,
            capacity,
        };
        let task = tokio::spawn(actor.run());

        tracing::info!(server_id = %id, "server created");
        Self {
            handle: ServerHandle {
                id,
                sender: tx,
                communities: communities_rx,
            },
            done,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> &ServerId {
        &self.handle.id
    }

    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// Stops the control loop, then shuts down every community
    /// concurrently.
    ///
    /// Returns once all communities (and so all their members) are shut
    /// down. A second call returns [`CommunityError::ServerStopped`].
    pub async fn shutdown(&self) -> Result<(), CommunityError> {
        if !self.done.fire() {
            return Err(CommunityError::ServerStopped(self.id().clone()));
        }
        tracing::info!(server_id = %self.id(), "shutting down server");

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let communities = match task {
            Some(task) => task.await.unwrap_or_else(|e| {
                tracing::error!(server_id = %self.id(), error = %e, "server loop failed");
                Communities::new()
            }),
            None => Communities::new(),
        };

        let results = join_all(communities.values().map(|community| community.shutdown())).await;
        for result in results {
            if let Err(e) = result {
                tracing::warn!(server_id = %self.id(), error = %e, "community shutdown failed");
            }
        }

        tracing::info!(
            server_id = %self.id(),
            communities = communities.len(),
            "server stopped"
        );
        Ok(())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", self.id())
            .field("stopped", &self.done.is_fired())
            .finish_non_exhaustive()
    }
}

/// State owned by the control loop.
struct ServerActor {
    id: ServerId,
    /// Our own action channel, handed to sessions in their route.
    sender: ActionSender,
    receiver: ActionReceiver,
    done: DoneSignal,
    communities: Communities,
    published: watch::Sender<CommunityMap>,
    policy: Arc<dyn CommunityPolicy>,
    capacity: usize,
}

impl ServerActor {
    async fn run(mut self) -> Communities {
        tracing::info!(server_id = %self.id, "server control loop started");

        // Handling an action waits on the node below, which may itself be
        // stuck; the done signal interrupts that wait too.
        let done = self.done.clone();
        loop {
            let action = tokio::select! {
                biased;
                () = done.wait() => break,
                action = self.receiver.recv() => action,
            };
            let Some(action) = action else {
                break;
            };

            let session = action.session().cloned();
            tokio::select! {
                biased;
                () = done.wait() => {
                    // Mid-move, the session may be in no community at all.
                    if let Some(session) = session {
                        session.disconnect().await;
                    }
                    break;
                }
                () = self.handle(action) => {}
            }
        }

        // A session queued for placement is in no community yet, so no
        // community shutdown would ever close it.
        self.receiver.close();
        while let Ok(action) = self.receiver.try_recv() {
            if let ActionKind::JoinServer { session, .. } = action.kind {
                session.disconnect().await;
            }
        }

        tracing::info!(server_id = %self.id, "server control loop stopped");
        self.communities
    }

    async fn handle(&mut self, action: Action) {
        let Action {
            session_id,
            kind,
            reply,
        } = action;

        let result = match kind {
            ActionKind::JoinServer { server_id, session } => {
                if server_id != self.id {
                    tracing::warn!(
                        server_id = %self.id,
                        requested = %server_id,
                        "join addressed to another server"
                    );
                }
                self.add_session(session, CommunityId::root()).await
            }
            ActionKind::JoinCommunity {
                community_id,
                session,
            } => self.migrate(session, community_id).await,
            ActionKind::LeaveCommunity {
                community_id,
                session,
            } => self.remove_session(session, community_id).await,
            ActionKind::LeaveServer { server_id, session } => {
                if server_id != self.id {
                    tracing::warn!(
                        server_id = %self.id,
                        requested = %server_id,
                        "leave addressed to another server"
                    );
                }
                self.evict(session).await
            }
            kind @ ActionKind::Text { .. } => invariant_violation(
                &format!("server {}", self.id),
                &Action {
                    session_id,
                    kind,
                    reply,
                },
            ),
        };

        if let Err(e) = &result {
            tracing::info!(server_id = %self.id, %session_id, error = %e, "membership change refused");
        }
        Action::respond(reply, result);
    }

    /// Adds `session` to `community_id` and points its route there.
    async fn add_session(
        &mut self,
        session: Arc<ClientSession>,
        community_id: CommunityId,
    ) -> ActionResult {
        if session.is_disconnected() {
            return Err(MembershipError::Disconnected(session.id()));
        }
        let community = self.community_or_create(&community_id)?;
        community.add(Arc::clone(&session)).await?;

        session.set_route(self.route_to(&community));

        // A hang-up that landed before the route existed sent no departure
        // notice, so nobody else will take the session out.
        if session.is_disconnected() {
            tracing::info!(
                server_id = %self.id,
                %community_id,
                session_id = %session.id(),
                "session hung up during placement"
            );
            self.evict(Arc::clone(&session)).await?;
            return Err(MembershipError::Disconnected(session.id()));
        }

        tracing::info!(
            server_id = %self.id,
            %community_id,
            session_id = %session.id(),
            "session placed"
        );
        Ok(())
    }

    /// Moves an owned session from its current community to `target`.
    ///
    /// If the session can't be added to `target` after leaving its old
    /// community, it is put back in `root`.
    async fn migrate(
        &mut self,
        session: Arc<ClientSession>,
        target: CommunityId,
    ) -> ActionResult {
        let session_id = session.id();
        if session.is_disconnected() {
            return Err(MembershipError::Disconnected(session_id));
        }
        let route = self.owned_route(&session)?;
        if route.community_id == target {
            return Err(MembershipError::AlreadyMember {
                session: session_id,
                community: target,
            });
        }

        let destination = self.community_or_create(&target)?;
        self.leave_current(&session, &route.community_id).await?;

        match destination.add(Arc::clone(&session)).await {
            Ok(()) => {
                session.set_route(self.route_to(&destination));
                tracing::info!(
                    server_id = %self.id,
                    %session_id,
                    from = %route.community_id,
                    to = %target,
                    "session migrated"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    server_id = %self.id,
                    %session_id,
                    community_id = %target,
                    error = %e,
                    "migration failed, falling back to root"
                );
                self.fall_back_to_root(session).await;
                Err(e)
            }
        }
    }

    /// Takes `session` out of `community_id` and re-adds it to `root`.
    async fn remove_session(
        &mut self,
        session: Arc<ClientSession>,
        community_id: CommunityId,
    ) -> ActionResult {
        let route = self.owned_route(&session)?;
        if route.community_id != community_id {
            return Err(MembershipError::NotMember {
                session: session.id(),
                community: community_id,
            });
        }

        self.leave_current(&session, &community_id).await?;
        self.fall_back_to_root(session).await;
        Ok(())
    }

    /// Takes `session` out of this server: leaves its community and
    /// clears its route.
    async fn evict(&mut self, session: Arc<ClientSession>) -> ActionResult {
        let route = self.owned_route(&session)?;

        match self.leave_current(&session, &route.community_id).await {
            Ok(()) | Err(MembershipError::NotMember { .. }) => {}
            Err(e) => return Err(e),
        }
        session.clear_route();

        tracing::info!(
            server_id = %self.id,
            session_id = %session.id(),
            community_id = %route.community_id,
            "session left server"
        );
        Ok(())
    }

    async fn fall_back_to_root(&mut self, session: Arc<ClientSession>) {
        let session_id = session.id();
        if let Err(e) = self.add_session(Arc::clone(&session), CommunityId::root()).await {
            tracing::warn!(
                server_id = %self.id,
                %session_id,
                error = %e,
                "could not return session to root"
            );
            session.clear_route();
        }
    }

    async fn leave_current(
        &self,
        session: &Arc<ClientSession>,
        community_id: &CommunityId,
    ) -> ActionResult {
        match self.communities.get(community_id) {
            Some(community) => community.handle().remove(Arc::clone(session)).await,
            None => Err(MembershipError::NotMember {
                session: session.id(),
                community: community_id.clone(),
            }),
        }
    }

    /// The session's route, if it leads to this server.
    fn owned_route(&self, session: &ClientSession) -> Result<Route, MembershipError> {
        session
            .route()
            .filter(|route| route.server_id == self.id)
            .ok_or_else(|| MembershipError::NotOnServer {
                session: session.id(),
                server: self.id.clone(),
            })
    }

    fn community_or_create(
        &mut self,
        id: &CommunityId,
    ) -> Result<CommunityHandle, MembershipError> {
        if let Some(community) = self.communities.get(id) {
            return Ok(community.handle().clone());
        }
        if !self.policy.permits(&self.id, id) {
            return Err(MembershipError::CreationDenied {
                server: self.id.clone(),
                community: id.clone(),
            });
        }

        let community = Community::spawn(id.clone(), self.capacity);
        let handle = community.handle().clone();
        self.communities.insert(id.clone(), community);
        self.published.send_modify(|map| {
            map.insert(id.clone(), handle.clone());
        });
        tracing::info!(server_id = %self.id, community_id = %id, "community created");
        Ok(handle)
    }

    fn route_to(&self, community: &CommunityHandle) -> Route {
        Route {
            server_id: self.id.clone(),
            server: self.sender.clone(),
            community_id: community.id().clone(),
            community: community.sender().clone(),
        }
    }
}
