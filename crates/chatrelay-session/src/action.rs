//! Actions: the only unit of communication between hierarchy nodes.
//!
//! Every node (wrapper, server, community) runs one control loop that
//! reads [`Action`]s from a bounded channel. An action is an envelope
//! `{session_id, kind}`; `kind` is a closed sum type matched exhaustively
//! by every handler. New intents are new [`ActionKind`] variants.
//!
//! Membership changes can carry a `oneshot` reply so the requester learns
//! about `AlreadyMember`/`NotMember` without ever touching the target
//! node's state.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chatrelay_protocol::SessionId;
use tokio::sync::{mpsc, oneshot};

use crate::{ClientSession, CommunityId, MembershipError, ServerId};

/// Outcome of a membership action.
pub type ActionResult = Result<(), MembershipError>;

/// Reply channel attached to an action.
pub type Reply = oneshot::Sender<ActionResult>;

/// The sending side of a node's action channel.
pub type ActionSender = mpsc::Sender<Action>;

/// The receiving side of a node's action channel, owned by its control loop.
pub type ActionReceiver = mpsc::Receiver<Action>;

/// What a session (or a node acting on its behalf) wants to happen.
#[derive(Debug)]
pub enum ActionKind {
    /// Place `session` into server `server_id`.
    ///
    /// Wrapper: get-or-create the server, move the session out of any
    /// previous server, forward. Server: add to `root`.
    JoinServer {
        server_id: ServerId,
        session: Arc<ClientSession>,
    },

    /// Place `session` into community `community_id`.
    ///
    /// Server: migrate from the current community. Community: add member.
    JoinCommunity {
        community_id: CommunityId,
        session: Arc<ClientSession>,
    },

    /// Take `session` out of community `community_id`.
    ///
    /// Server: remove and fall back to `root`. Community: remove member.
    LeaveCommunity {
        community_id: CommunityId,
        session: Arc<ClientSession>,
    },

    /// Take `session` out of server `server_id` entirely.
    LeaveServer {
        server_id: ServerId,
        session: Arc<ClientSession>,
    },

    /// A chat line from `sender` for everyone else in its community.
    Text { sender: SessionId, text: Bytes },
}

/// The envelope that travels on every action channel.
#[derive(Debug)]
pub struct Action {
    /// The session this action is about.
    pub session_id: SessionId,
    /// The intent.
    pub kind: ActionKind,
    /// Where to send the outcome, if the requester is waiting for one.
    pub reply: Option<Reply>,
}

impl Action {
    fn new(session_id: SessionId, kind: ActionKind) -> Self {
        Self {
            session_id,
            kind,
            reply: None,
        }
    }

    pub fn join_server(server_id: ServerId, session: Arc<ClientSession>) -> Self {
        Self::new(session.id(), ActionKind::JoinServer { server_id, session })
    }

    pub fn join_community(
        community_id: CommunityId,
        session: Arc<ClientSession>,
    ) -> Self {
        Self::new(
            session.id(),
            ActionKind::JoinCommunity {
                community_id,
                session,
            },
        )
    }

    pub fn leave_community(
        community_id: CommunityId,
        session: Arc<ClientSession>,
    ) -> Self {
        Self::new(
            session.id(),
            ActionKind::LeaveCommunity {
                community_id,
                session,
            },
        )
    }

    pub fn leave_server(server_id: ServerId, session: Arc<ClientSession>) -> Self {
        Self::new(session.id(), ActionKind::LeaveServer { server_id, session })
    }

    pub fn text(sender: SessionId, text: Bytes) -> Self {
        Self::new(sender, ActionKind::Text { sender, text })
    }

    /// Attaches a reply channel, returning the receiving end.
    pub fn with_reply(mut self) -> (Self, oneshot::Receiver<ActionResult>) {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        (self, rx)
    }

    /// Sends this action to `target` and waits for its outcome.
    ///
    /// `node` names the target in the [`MembershipError::Unavailable`]
    /// returned when its control loop has already stopped.
    pub async fn request(
        self,
        target: &ActionSender,
        node: impl fmt::Display,
    ) -> ActionResult {
        let (action, rx) = self.with_reply();
        target
            .send(action)
            .await
            .map_err(|_| MembershipError::Unavailable(node.to_string()))?;
        rx.await
            .map_err(|_| MembershipError::Unavailable(node.to_string()))?
    }

    /// Delivers `result` to the requester, if one is waiting.
    ///
    /// A requester that gave up is not an error.
    pub fn respond(reply: Option<Reply>, result: ActionResult) {
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    /// The session a membership action carries. `None` for text.
    pub fn session(&self) -> Option<&Arc<ClientSession>> {
        match &self.kind {
            ActionKind::JoinServer { session, .. }
            | ActionKind::JoinCommunity { session, .. }
            | ActionKind::LeaveCommunity { session, .. }
            | ActionKind::LeaveServer { session, .. } => Some(session),
            ActionKind::Text { .. } => None,
        }
    }

    /// Variant name, for logs.
    pub fn name(&self) -> &'static str {
        match self.kind {
            ActionKind::JoinServer { .. } => "JoinServer",
            ActionKind::JoinCommunity { .. } => "JoinCommunity",
            ActionKind::LeaveCommunity { .. } => "LeaveCommunity",
            ActionKind::LeaveServer { .. } => "LeaveServer",
            ActionKind::Text { .. } => "Text",
        }
    }
}

/// Stops the process after a node receives an action it must never see.
///
/// Such an action means a routing path is corrupted; continuing would
/// silently drop client intent, so this is fatal rather than a logged
/// warning.
pub fn invariant_violation(node: &str, action: &Action) -> ! {
    tracing::error!(
        node,
        action = action.name(),
        session_id = %action.session_id,
        "received an action this node never handles; aborting"
    );
    std::process::exit(70)
}
