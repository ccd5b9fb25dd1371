//! The top of the hierarchy: the listening socket and every server.
//!
//! A [`Wrapper`] runs three loops, each in its own task:
//!
//! ```text
//!   accept ──(TcpConnection)──→ build ──(JoinServer action)──→ control ──→ Server
//! ```
//!
//! - **accept** takes connections off the listener and hands them to the
//!   build loop through a bounded channel.
//! - **build** authenticates each connection, resolves its region, and
//!   activates the session. Failures drop the connection there; nothing
//!   half-built reaches the hierarchy.
//! - **control** owns the server map. It creates servers on demand,
//!   moves a session out of its previous server, and forwards the join to
//!   the target server's own control loop.
//!
//! All three stop on one [`DoneSignal`]. [`Wrapper::shutdown`] fires it,
//! joins the loops, and then shuts every server down concurrently.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use chatrelay_community::{CommunityPolicy, DoneSignal, PermissivePolicy, Server, ServerHandle};
use chatrelay_protocol::WireCodec;
use chatrelay_session::{
    invariant_violation, Action, ActionKind, ActionReceiver, ActionResult, ActionSender,
    Authenticator, ClientSession, IdentityAllocator, PendingSession,
    PlaceholderAuthenticator, ServerId,
};
use chatrelay_transport::{TcpConnection, TcpTransport, Transport};
use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::{RegionResolver, RelayConfig, RelayError, StaticRegion};

/// Published view of the relay's servers.
pub type ServerMap = BTreeMap<ServerId, ServerHandle>;

type Servers = HashMap<ServerId, Server>;

/// Builder for configuring and starting a [`Wrapper`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use chatrelay::prelude::*;
///
/// # async fn run() -> Result<(), RelayError> {
/// let allocator = Arc::new(IdentityAllocator::new());
/// let relay = Wrapper::builder(RelayConfig::new("127.0.0.1", 9000, 9001))
///     .resolver(StaticRegion::new("eu"))
///     .bind(PlaceholderAuthenticator::new(allocator))
///     .await?;
/// relay.shutdown().await
/// # }
/// ```
pub struct WrapperBuilder {
    config: RelayConfig,
    resolver: Arc<dyn RegionResolver>,
    policy: Arc<dyn CommunityPolicy>,
    codec: Arc<WireCodec>,
}

impl WrapperBuilder {
    /// Sets how new sessions are assigned to servers. Defaults to
    /// [`StaticRegion`] (`"main"`).
    pub fn resolver(mut self, resolver: impl RegionResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Sets which communities servers may create on demand. Defaults to
    /// [`PermissivePolicy`].
    pub fn policy(mut self, policy: impl CommunityPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Replaces the wire codec, e.g. to register extra message types.
    pub fn codec(mut self, codec: WireCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Binds the listener and starts the relay's loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn bind<A: Authenticator>(self, authenticator: A) -> Result<Wrapper, RelayError> {
        let transport = TcpTransport::bind(&self.config.bind_addr()).await?;
        let local_addr = transport.local_addr()?;
        let capacity = self.config.channel_capacity.max(1);

        let done = DoneSignal::new();
        let (handoff_tx, handoff_rx) = mpsc::channel(capacity);
        let (control_tx, control_rx) = mpsc::channel(capacity);
        let (servers_tx, servers_rx) = watch::channel(ServerMap::new());

        let accept = tokio::spawn(accept_loop(transport, handoff_tx, done.clone()));
        let build = tokio::spawn(build_loop(
            handoff_rx,
            control_tx.clone(),
            SessionBuilder {
                authenticator,
                resolver: self.resolver,
                codec: self.codec,
            },
            done.clone(),
        ));
        let control = tokio::spawn(
            ControlLoop {
                receiver: control_rx,
                done: done.clone(),
                servers: Servers::new(),
                published: servers_tx,
                policy: self.policy,
                capacity,
            }
            .run(),
        );

        tracing::info!(%local_addr, "chatrelay running");
        Ok(Wrapper {
            local_addr,
            done,
            control: control_tx,
            servers: servers_rx,
            tasks: Mutex::new(Some(Tasks {
                accept,
                build,
                control,
            })),
        })
    }
}

struct Tasks {
    accept: JoinHandle<()>,
    build: JoinHandle<()>,
    control: JoinHandle<Servers>,
}

/// A running relay.
pub struct Wrapper {
    local_addr: SocketAddr,
    done: DoneSignal,
    control: ActionSender,
    servers: watch::Receiver<ServerMap>,
    tasks: Mutex<Option<Tasks>>,
}

impl Wrapper {
    /// Creates a builder with default resolver, policy, and codec.
    pub fn builder(config: RelayConfig) -> WrapperBuilder {
        WrapperBuilder {
            config,
            resolver: Arc::new(StaticRegion::default()),
            policy: Arc::new(PermissivePolicy),
            codec: Arc::new(WireCodec::standard()),
        }
    }

    /// Starts a relay with all defaults and the placeholder authenticator.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let authenticator = PlaceholderAuthenticator::new(Arc::new(IdentityAllocator::new()));
        Self::builder(config).bind(authenticator).await
    }

    /// The address the listener actually bound, useful with port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server(&self, id: &ServerId) -> Option<ServerHandle> {
        self.servers.borrow().get(id).cloned()
    }

    pub fn servers(&self) -> Vec<ServerHandle> {
        self.servers.borrow().values().cloned().collect()
    }

    pub fn server_ids(&self) -> Vec<ServerId> {
        self.servers.borrow().keys().cloned().collect()
    }

    /// Waits until server `id` exists, returning its handle.
    ///
    /// Returns `None` if the relay stops first.
    pub async fn wait_for_server(&self, id: &ServerId) -> Option<ServerHandle> {
        let mut servers = self.servers.clone();
        let snapshot = servers.wait_for(|map| map.contains_key(id)).await.ok()?;
        snapshot.get(id).cloned()
    }

    /// Moves an active session to server `server_id`, creating it if
    /// needed. The session lands in that server's `root` community.
    pub async fn join_server(
        &self,
        server_id: ServerId,
        session: Arc<ClientSession>,
    ) -> ActionResult {
        Action::join_server(server_id, session)
            .request(&self.control, "relay")
            .await
    }

    /// Stops accepting, stops all three loops, then shuts down every
    /// server concurrently.
    ///
    /// Returns once every client connection has been closed. A second
    /// call returns [`RelayError::AlreadyStopped`].
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        if !self.done.fire() {
            return Err(RelayError::AlreadyStopped);
        }
        tracing::info!("shutting down relay");

        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tasks) = tasks else {
            return Ok(());
        };

        // The accept loop releases the listener and the handoff sender on
        // exit; the build loop drops whatever was still queued.
        if let Err(e) = tasks.accept.await {
            tracing::error!(error = %e, "accept loop failed");
        }
        if let Err(e) = tasks.build.await {
            tracing::error!(error = %e, "build loop failed");
        }
        let servers = tasks.control.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "control loop failed");
            Servers::new()
        });

        let results = join_all(servers.values().map(|server| server.shutdown())).await;
        for result in results {
            if let Err(e) = result {
                tracing::warn!(error = %e, "server shutdown failed");
            }
        }

        tracing::info!(servers = servers.len(), "relay stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapper")
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.done.is_fired())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// accept loop
// ---------------------------------------------------------------------------

async fn accept_loop(
    mut transport: TcpTransport,
    handoff: mpsc::Sender<TcpConnection>,
    done: DoneSignal,
) {
    tracing::debug!("accept loop started");

    loop {
        let result = tokio::select! {
            biased;
            () = done.wait() => break,
            result = transport.accept() => result,
        };

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                continue;
            }
        };

        if done.is_fired() {
            tracing::debug!(conn_id = %conn.id(), "closing connection accepted during shutdown");
            break;
        }

        tokio::select! {
            biased;
            () = done.wait() => break,
            sent = handoff.send(conn) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    transport.shutdown();
    tracing::debug!("accept loop stopped");
}

// ---------------------------------------------------------------------------
// build loop
// ---------------------------------------------------------------------------

/// Everything needed to turn a raw connection into an active session.
struct SessionBuilder<A> {
    authenticator: A,
    resolver: Arc<dyn RegionResolver>,
    codec: Arc<WireCodec>,
}

impl<A: Authenticator> SessionBuilder<A> {
    /// Authenticates, resolves the region, then activates.
    ///
    /// The region is resolved before activation so a failure never starts
    /// a read loop.
    async fn build(
        &self,
        conn: TcpConnection,
    ) -> Result<(ServerId, Arc<ClientSession>), RelayError> {
        let peer_addr = conn.peer_addr();
        let mut pending = PendingSession::new(conn, Arc::clone(&self.codec));
        let identity = self.authenticator.authenticate(&mut pending).await?;
        let server_id = self.resolver.resolve(peer_addr)?;
        Ok((server_id, pending.activate(identity)))
    }
}

async fn build_loop<A: Authenticator>(
    mut handoff: mpsc::Receiver<TcpConnection>,
    control: ActionSender,
    builder: SessionBuilder<A>,
    done: DoneSignal,
) {
    tracing::debug!("build loop started");

    loop {
        let conn = tokio::select! {
            biased;
            () = done.wait() => break,
            conn = handoff.recv() => match conn {
                Some(conn) => conn,
                None => break,
            },
        };

        let conn_id = conn.id();
        let peer_addr = conn.peer_addr();
        let built = tokio::select! {
            biased;
            () = done.wait() => break,
            built = builder.build(conn) => built,
        };

        let (server_id, session) = match built {
            Ok(built) => built,
            Err(e) => {
                tracing::info!(%conn_id, %peer_addr, error = %e, "session build failed, dropping connection");
                continue;
            }
        };
        tracing::debug!(session_id = %session.id(), %server_id, "session built");

        let action = Action::join_server(server_id, Arc::clone(&session));
        tokio::select! {
            biased;
            () = done.wait() => {
                session.disconnect().await;
                break;
            }
            sent = control.send(action) => {
                if sent.is_err() {
                    session.disconnect().await;
                    break;
                }
            }
        }
    }

    // Queued connections close as the receiver drops.
    handoff.close();
    tracing::debug!("build loop stopped");
}

// ---------------------------------------------------------------------------
// control loop
// ---------------------------------------------------------------------------

/// State owned by the control loop.
struct ControlLoop {
    receiver: ActionReceiver,
    done: DoneSignal,
    servers: Servers,
    published: watch::Sender<ServerMap>,
    policy: Arc<dyn CommunityPolicy>,
    capacity: usize,
}

impl ControlLoop {
    async fn run(mut self) -> Servers {
        tracing::debug!("control loop started");

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
                    // Mid-transfer, the session may be on no server at all.
                    if let Some(session) = session {
                        session.disconnect().await;
                    }
                    break;
                }
                () = self.handle(action) => {}
            }
        }

        // Sessions still waiting for placement belong to nobody; close them.
        self.receiver.close();
        while let Ok(action) = self.receiver.try_recv() {
            if let ActionKind::JoinServer { session, .. } = action.kind {
                session.disconnect().await;
            }
        }

        tracing::debug!(servers = self.servers.len(), "control loop stopped");
        self.servers
    }

    async fn handle(&mut self, action: Action) {
        let Action {
            session_id,
            kind,
            reply,
        } = action;

        match kind {
            ActionKind::JoinServer { server_id, session } => {
                let target = self.server_or_create(&server_id);
                self.transfer_out(&session).await;

                tracing::debug!(%session_id, %server_id, "forwarding join");
                let forwarded = Action {
                    session_id,
                    kind: ActionKind::JoinServer { server_id, session },
                    reply,
                };
                if target.sender().send(forwarded).await.is_err() {
                    tracing::warn!(%session_id, server_id = %target.id(), "server stopped, join dropped");
                }
            }
            kind @ (ActionKind::JoinCommunity { .. }
            | ActionKind::LeaveCommunity { .. }
            | ActionKind::LeaveServer { .. }
            | ActionKind::Text { .. }) => invariant_violation(
                "relay",
                &Action {
                    session_id,
                    kind,
                    reply,
                },
            ),
        }
    }

    /// Takes `session` out of whichever server currently holds it, and
    /// waits until it has.
    async fn transfer_out(&self, session: &Arc<ClientSession>) {
        let Some(previous) = session.server_id() else {
            return;
        };
        let Some(server) = self.servers.get(&previous) else {
            tracing::warn!(session_id = %session.id(), server_id = %previous, "previous server is gone");
            return;
        };

        match server.handle().leave(Arc::clone(session)).await {
            Ok(()) => {
                tracing::info!(session_id = %session.id(), server_id = %previous, "session moved out of server");
            }
            Err(e) => {
                tracing::info!(session_id = %session.id(), server_id = %previous, error = %e, "transfer out refused");
            }
        }
    }

    fn server_or_create(&mut self, id: &ServerId) -> ServerHandle {
        if let Some(server) = self.servers.get(id) {
            return server.handle().clone();
        }

        let server = Server::spawn_with_policy(id.clone(), self.capacity, Arc::clone(&self.policy));
        let handle = server.handle().clone();
        self.servers.insert(id.clone(), server);
        self.published.send_modify(|map| {
            map.insert(id.clone(), handle.clone());
        });
        handle
    }
}
