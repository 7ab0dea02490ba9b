//! Per-room broadcast hub
//!
//! A [`Hub`] owns the live connections of one room. All membership changes
//! and fan-out happen on a single event-loop task that drains one command
//! queue, so joins, leaves and broadcasts are applied in one strict order and
//! the member set needs no lock.
//!
//! Fan-out never waits on a member: each delivery is a non-blocking enqueue
//! onto that member's bounded outbound queue. A member whose queue is full is
//! treated as unresponsive and evicted; the rest of the room is unaffected.

use crate::config::HubConfig;
use crate::connection::{self, Connection, ConnectionId, Transport, UserInfo};
use crate::error::{JoinRejected, RejectReason};
use crate::room::RoomId;
use log::{debug, info, warn};
use shared::{Envelope, EnvelopeKind};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};

/// Depth of the queue shared by every reader pump, join and leave request.
const COMMAND_QUEUE_DEPTH: usize = 1024;

/// Requests processed by the hub's event loop.
#[derive(Debug)]
pub(crate) enum HubCommand {
    Join {
        member: Member,
        reply: oneshot::Sender<bool>,
    },
    Leave {
        id: ConnectionId,
    },
    Broadcast {
        origin: Option<ConnectionId>,
        envelope: Envelope,
    },
    Members {
        reply: oneshot::Sender<Vec<MemberInfo>>,
    },
}

/// A member as the event loop holds it. Dropping it closes the outbound
/// queue, which shuts the writer pump down, and stops the reader pump.
#[derive(Debug)]
pub(crate) struct Member {
    pub(crate) id: ConnectionId,
    pub(crate) user: UserInfo,
    pub(crate) outbound: mpsc::Sender<Arc<Envelope>>,
    pub(crate) _membership: oneshot::Sender<()>,
}

/// Public view of a current member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: ConnectionId,
    pub user: UserInfo,
}

#[derive(Debug)]
pub struct Hub {
    room_id: RoomId,
    config: HubConfig,
    commands: mpsc::Sender<HubCommand>,
    shutdown: watch::Sender<bool>,
    member_count: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl Hub {
    /// Creates the hub and spawns its event loop on the current runtime.
    pub fn new(room_id: impl Into<RoomId>, config: HubConfig) -> Self {
        let room_id = room_id.into();
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let member_count = Arc::new(AtomicUsize::new(0));

        let event_loop = HubLoop {
            room_id: room_id.clone(),
            config: config.clone(),
            members: HashMap::new(),
            member_count: Arc::clone(&member_count),
        };
        tokio::spawn(event_loop.run(receiver, shutdown_rx));

        Self {
            room_id,
            config,
            commands,
            shutdown,
            member_count,
            closed: AtomicBool::new(false),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Admits `transport` as a new member and starts its pumps.
    ///
    /// Fails with [`RejectReason::RoomFull`] when the room is at capacity and
    /// [`RejectReason::HubClosed`] once [`Hub::close`] has been called. The
    /// rejected transport is handed back untouched; closing it is up to the
    /// caller.
    pub async fn join<T: Transport>(
        &self,
        transport: T,
        user: UserInfo,
    ) -> Result<Connection, JoinRejected<T>> {
        if self.is_closed() {
            return Err(JoinRejected {
                reason: RejectReason::HubClosed,
                transport,
            });
        }

        let id = ConnectionId::next();
        let (outbound, outbound_rx) = mpsc::channel(self.config.outbound_channel_capacity());
        let (reply, admitted) = oneshot::channel();
        let (membership, removed) = oneshot::channel();
        let member = Member {
            id,
            user: user.clone(),
            outbound,
            _membership: membership,
        };

        if self
            .commands
            .send(HubCommand::Join { member, reply })
            .await
            .is_err()
        {
            return Err(JoinRejected {
                reason: RejectReason::HubClosed,
                transport,
            });
        }

        match admitted.await {
            Ok(true) => Ok(connection::spawn(
                id,
                user,
                self.room_id.clone(),
                transport,
                outbound_rx,
                removed,
                self.commands.clone(),
                &self.config,
            )),
            Ok(false) => Err(JoinRejected {
                reason: RejectReason::RoomFull,
                transport,
            }),
            // Loop exited with our request still queued
            Err(_) => Err(JoinRejected {
                reason: RejectReason::HubClosed,
                transport,
            }),
        }
    }

    /// Removes a member. Leaving twice, or after eviction, is a no-op.
    pub async fn leave(&self, id: ConnectionId) {
        let _ = self.commands.send(HubCommand::Leave { id }).await;
    }

    /// Fans `envelope` out to every member, as sent by the server itself.
    pub async fn broadcast(&self, envelope: Envelope) {
        let _ = self
            .commands
            .send(HubCommand::Broadcast {
                origin: None,
                envelope,
            })
            .await;
    }

    /// Snapshot of the current members, in admission order.
    pub async fn members(&self) -> Vec<MemberInfo> {
        let (reply, members) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Members { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        members.await.unwrap_or_default()
    }

    pub fn member_count(&self) -> usize {
        self.member_count.load(Ordering::Acquire)
    }

    /// Disconnects every member and stops the event loop. Later joins are
    /// rejected.
    ///
    /// Shutdown is signalled outside the command queue and takes effect
    /// before any queued command.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing hub for room {}", self.room_id);
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Hub for room {} dropped without close", self.room_id);
            self.shutdown.send_replace(true);
        }
    }
}

/// State owned by the event-loop task. Nothing else touches `members`.
struct HubLoop {
    room_id: RoomId,
    config: HubConfig,
    members: HashMap<ConnectionId, Member>,
    member_count: Arc<AtomicUsize>,
}

impl HubLoop {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<HubCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("Hub event loop for room {} started", self.room_id);

        loop {
            let command = tokio::select! {
                biased;
                // A dropped sender counts as shutdown too
                _ = shutdown.changed() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                HubCommand::Join { member, reply } => self.handle_join(member, reply),
                HubCommand::Leave { id } => self.handle_leave(id),
                HubCommand::Broadcast { origin, envelope } => {
                    self.handle_broadcast(origin, envelope)
                }
                HubCommand::Members { reply } => {
                    let _ = reply.send(self.member_infos());
                }
            }
        }

        self.disconnect_all();
        debug!("Hub event loop for room {} stopped", self.room_id);
    }

    fn handle_join(&mut self, member: Member, reply: oneshot::Sender<bool>) {
        if self.config.capacity > 0 && self.members.len() >= self.config.capacity {
            debug!(
                "Room {} full ({} members), rejecting {}",
                self.room_id,
                self.members.len(),
                member.user.display_name
            );
            let _ = reply.send(false);
            return;
        }

        let id = member.id;
        let notice = presence(EnvelopeKind::PresenceJoin, &member.user);
        let name = member.user.display_name.clone();
        self.members.insert(id, member);
        self.publish_count();

        // The joiner stopped waiting; its outbound queue is already gone
        if reply.send(true).is_err() {
            self.remove(id);
            return;
        }

        info!("Connection {} ({}) joined room {}", id, name, self.room_id);

        // The joiner never hears about itself, echo or not
        if self.config.announce_presence {
            self.fan_out(Some(id), notice);
        }
    }

    fn handle_leave(&mut self, id: ConnectionId) {
        if let Some(member) = self.remove(id) {
            info!(
                "Connection {} ({}) left room {}",
                id, member.user.display_name, self.room_id
            );
            if self.config.announce_presence {
                self.fan_out(None, presence(EnvelopeKind::PresenceLeave, &member.user));
            }
        }
    }

    /// Broadcasts on behalf of `origin`, which must still be a member.
    fn handle_broadcast(&mut self, origin: Option<ConnectionId>, envelope: Envelope) {
        if let Some(id) = origin {
            if !self.members.contains_key(&id) {
                debug!(
                    "Dropping {} envelope from {}, no longer in room {}",
                    envelope.kind(),
                    id,
                    self.room_id
                );
                return;
            }
        }

        let skip = origin.filter(|_| !self.config.echo_to_sender);
        self.fan_out(skip, envelope);
    }

    /// Delivers to every member except `skip`.
    ///
    /// Members that cannot take the envelope right now are evicted. Their
    /// leave notices are queued and delivered in turn, which may evict
    /// further members; the work list drains until nothing is left.
    fn fan_out(&mut self, skip: Option<ConnectionId>, envelope: Envelope) {
        let mut pending = VecDeque::from([(skip, Arc::new(envelope))]);

        while let Some((skip, envelope)) = pending.pop_front() {
            let mut evicted = Vec::new();

            for (id, member) in &self.members {
                if Some(*id) == skip {
                    continue;
                }
                match member.outbound.try_send(Arc::clone(&envelope)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Connection {} in room {} is not keeping up, evicting",
                            id, self.room_id
                        );
                        evicted.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Connection {} writer already gone, evicting", id);
                        evicted.push(*id);
                    }
                }
            }

            for id in evicted {
                if let Some(member) = self.remove(id) {
                    if self.config.announce_presence {
                        pending.push_back((
                            None,
                            Arc::new(presence(EnvelopeKind::PresenceLeave, &member.user)),
                        ));
                    }
                }
            }
        }
    }

    fn remove(&mut self, id: ConnectionId) -> Option<Member> {
        let member = self.members.remove(&id)?;
        self.publish_count();
        Some(member)
    }

    fn disconnect_all(&mut self) {
        if !self.members.is_empty() {
            info!(
                "Disconnecting {} members from room {}",
                self.members.len(),
                self.room_id
            );
        }
        self.members.clear();
        self.publish_count();
    }

    fn member_infos(&self) -> Vec<MemberInfo> {
        let mut infos: Vec<MemberInfo> = self
            .members
            .values()
            .map(|member| MemberInfo {
                id: member.id,
                user: member.user.clone(),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    fn publish_count(&self) {
        self.member_count.store(self.members.len(), Ordering::Release);
    }
}

fn presence(kind: EnvelopeKind, user: &UserInfo) -> Envelope {
    Envelope::new(kind, user.user_id.clone(), user.display_name.as_bytes())
}
