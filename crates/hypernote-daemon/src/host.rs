//! Sync host: accepts and dials peers, gates their frames through the join
//! state machine, and routes sync traffic to the note workspace.
//!
//! All connection events funnel through one channel into `handle_event`, so
//! sessions, documents and status are only touched from the event loop.
//! Peers are keyed in the status store by their sender id once known, and by
//! connection id until then.

use crate::config::InboundPolicy;
use crate::connection::{ConnectionEvent, InboundMessage, PeerConnection};
use crate::workspace::NoteWorkspace;
use anyhow::Result;
use hypernote_core::protocol::{
    self, error_code, ErrorPayload, Frame, FramePayload, JoinDirection, JoinEvent, JoinPeerState,
};
use hypernote_core::{JoinTarget, NoteStore, PeerId, PeerInfo, PeerStatusStore};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Frames that are not about a single note carry this note id.
const NO_NOTE: &str = "";

/// Inbound connections that have not finished the WebSocket upgrade by now
/// are dropped.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Upgraded = (WebSocketStream<TcpStream>, SocketAddr);

struct PeerSession {
    conn: PeerConnection,
    join: JoinPeerState,
    /// Remote socket address, or the URL we dialed
    address: String,
    /// Sender id of the remote peer, learned from its first admitted frame
    remote_peer_id: Option<String>,
    /// Notes the remote peer has open
    remote_notes: BTreeSet<String>,
}

impl PeerSession {
    fn status_key<'a>(&'a self, conn_id: &'a str) -> &'a str {
        self.remote_peer_id.as_deref().unwrap_or(conn_id)
    }

    fn shares(&self, note_id: &str) -> bool {
        self.join.allows_outbound_sync() && self.remote_notes.contains(note_id)
    }
}

pub struct SyncHost<S> {
    peer_id: PeerId,
    sender_id: String,
    policy: InboundPolicy,
    workspace: NoteWorkspace<S>,
    status: Arc<PeerStatusStore>,
    sessions: HashMap<String, PeerSession>,
    next_conn_id: u64,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    upgraded_tx: mpsc::UnboundedSender<Upgraded>,
    upgraded_rx: mpsc::UnboundedReceiver<Upgraded>,
}

impl<S: NoteStore + 'static> SyncHost<S> {
    pub fn new(workspace: NoteWorkspace<S>, policy: InboundPolicy) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (upgraded_tx, upgraded_rx) = mpsc::unbounded_channel();
        let peer_id = workspace.peer_id();
        let initial_note = workspace.note_ids().into_iter().next().unwrap_or_default();

        Self {
            peer_id,
            sender_id: peer_id.to_string(),
            policy,
            workspace,
            status: Arc::new(PeerStatusStore::new(initial_note)),
            sessions: HashMap::new(),
            next_conn_id: 1,
            event_tx,
            event_rx,
            upgraded_tx,
            upgraded_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: SocketAddr) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Sync host listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn workspace(&self) -> &NoteWorkspace<S> {
        &self.workspace
    }

    pub fn status(&self) -> Arc<PeerStatusStore> {
        Arc::clone(&self.status)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Serve connections and peer traffic until `shutdown` resolves.
    pub async fn run(&mut self, listener: &TcpListener, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }

                Some((ws_stream, addr)) = self.upgraded_rx.recv() => {
                    self.admit(ws_stream, addr);
                }

                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }

                _ = &mut shutdown => {
                    info!("Sync host stopping");
                    break;
                }
            }
        }
    }

    fn next_conn_id(&mut self) -> String {
        let conn_id = format!("conn-{}", self.next_conn_id);
        self.next_conn_id += 1;
        conn_id
    }

    /// Upgrade an inbound TCP connection in the background. The finished
    /// stream comes back to `run`, which admits it.
    pub fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        let upgraded_tx = self.upgraded_tx.clone();
        tokio::spawn(async move {
            match timeout(HANDSHAKE_TIMEOUT, accept_async(stream)).await {
                Ok(Ok(ws_stream)) => {
                    // Host already stopped
                    let _ = upgraded_tx.send((ws_stream, addr));
                }
                Ok(Err(e)) => {
                    // Port probes connect and hang up without a handshake
                    let err_str = e.to_string();
                    if err_str.contains("Handshake not finished")
                        || err_str.contains("Connection reset")
                        || err_str.contains("unexpected EOF")
                    {
                        debug!("Connection closed before handshake from {}", addr);
                    } else {
                        error!("WebSocket upgrade failed for {}: {}", addr, e);
                    }
                }
                Err(_) => warn!("WebSocket handshake from {} timed out", addr),
            }
        });
    }

    /// Register an upgraded inbound connection and decide admission right away.
    pub fn admit(&mut self, ws_stream: WebSocketStream<TcpStream>, addr: SocketAddr) {
        let conn_id = self.next_conn_id();
        info!("New connection from {} (conn_id: {})", addr, conn_id);

        let conn = PeerConnection::spawn(conn_id.clone(), ws_stream, self.event_tx.clone());
        let session = PeerSession {
            conn,
            join: JoinPeerState::new(JoinDirection::Inbound),
            address: addr.to_string(),
            remote_peer_id: None,
            remote_notes: BTreeSet::new(),
        };
        self.status.upsert_peer(PeerInfo::new(
            &conn_id,
            format!("ws://{addr}"),
            session.join.peer_status(),
        ));
        self.sessions.insert(conn_id.clone(), session);

        match self.policy {
            InboundPolicy::Approve => self.approve_inbound(&conn_id),
            InboundPolicy::Reject => self.reject_inbound(&conn_id),
        }
    }

    fn approve_inbound(&mut self, conn_id: &str) {
        self.fire(conn_id, JoinEvent::HostApproved);
        let hello = Frame::hello(NO_NOTE, &self.sender_id, self.workspace.note_ids());
        self.send(conn_id, &hello);
        info!("Approved inbound peer {}", conn_id);
    }

    fn reject_inbound(&mut self, conn_id: &str) {
        self.fire(conn_id, JoinEvent::HostRejected);
        let error = Frame::error(
            NO_NOTE,
            &self.sender_id,
            error_code::JOIN_REJECTED,
            "This host does not accept new peers",
        );
        self.send(conn_id, &error);
        if let Some(session) = self.sessions.get(conn_id) {
            session.conn.close();
        }
        info!("Rejected inbound peer {}", conn_id);
    }

    /// Dial a host. The connection waits for the host's `hello` before any
    /// sync traffic flows.
    pub async fn join(&mut self, target: &JoinTarget) -> Result<String> {
        let url = target.to_ws_url();
        info!("Joining {}", url);
        let (ws_stream, _) = connect_async(url.as_str()).await?;

        let conn_id = self.next_conn_id();
        let conn = PeerConnection::spawn(conn_id.clone(), ws_stream, self.event_tx.clone());
        let session = PeerSession {
            conn,
            join: JoinPeerState::new(JoinDirection::Outbound),
            address: url.clone(),
            remote_peer_id: None,
            remote_notes: BTreeSet::new(),
        };
        self.status
            .upsert_peer(PeerInfo::new(&conn_id, &url, session.join.peer_status()));
        self.sessions.insert(conn_id.clone(), session);

        debug!("Connected to {} (conn_id: {}), awaiting host hello", url, conn_id);
        Ok(conn_id)
    }

    /// Wait for the next connection event.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message { conn_id, data } => self.on_message(&conn_id, data),
            ConnectionEvent::Closed { conn_id } => self.on_closed(&conn_id),
        }
    }

    /// Create a note locally and announce it to approved peers.
    pub fn create_note(&mut self, title: &str) -> Result<String> {
        let note_id = self.workspace.create_note(title)?;
        self.announce_note_list();
        Ok(note_id)
    }

    /// Replace a note's text and push the resulting update to peers sharing it.
    pub fn edit_note(&mut self, note_id: &str, text: &str) -> Result<()> {
        if let Some(update) = self.workspace.edit(note_id, text)? {
            let frame = Frame::update(note_id, &self.sender_id, &update);
            self.broadcast_for_note(note_id, &frame, None);
        }
        Ok(())
    }

    // ==================== Inbound traffic ====================

    fn on_message(&mut self, conn_id: &str, data: InboundMessage) {
        let Some(session) = self.sessions.get(conn_id) else {
            debug!("Message for unknown connection {}", conn_id);
            return;
        };
        let join = session.join;

        let frame = match protocol::decode(data.as_raw()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Undecodable frame from {}: {}", conn_id, e);
                let reply = Frame::error(NO_NOTE, &self.sender_id, error_code::BAD_FRAME, e.to_string());
                self.send(conn_id, &reply);
                return;
            }
        };

        if !join.allows_inbound_frame(frame.frame_type()) {
            debug!(
                "Dropping {} frame from {} in state {:?}",
                frame.frame_type(),
                conn_id,
                join.lifecycle
            );
            return;
        }

        self.learn_peer_id(conn_id, &frame.sender_id);

        let Frame {
            note_id,
            sender_id,
            payload,
            ..
        } = frame;
        match payload {
            FramePayload::Hello(hello) => self.on_hello(conn_id, hello.open_note_ids),
            FramePayload::NoteList(list) => self.on_note_list(conn_id, list.note_ids),
            FramePayload::StateVector(sv) => self.on_state_vector(conn_id, &note_id, &sv.to_bytes()),
            FramePayload::Update(update) => self.on_update(conn_id, &note_id, &update.to_bytes()),
            FramePayload::Presence(presence) => {
                let frame = Frame::presence(note_id.as_str(), sender_id, presence);
                self.broadcast_for_note(&note_id, &frame, Some(conn_id));
            }
            FramePayload::Error(error) => self.on_error(conn_id, &note_id, error),
        }
    }

    fn on_hello(&mut self, conn_id: &str, open_note_ids: Vec<String>) {
        let Some(session) = self.sessions.get(conn_id) else {
            return;
        };

        // An outbound join is approved by the host's hello and answers with ours
        if session.join.direction == JoinDirection::Outbound && !session.join.is_approved() {
            self.fire(conn_id, JoinEvent::HostHello);
            let hello = Frame::hello(NO_NOTE, &self.sender_id, self.workspace.note_ids());
            self.send(conn_id, &hello);
            info!("Joined host via {}", conn_id);
        }

        self.set_remote_notes(conn_id, open_note_ids);
    }

    fn on_note_list(&mut self, conn_id: &str, note_ids: Vec<String>) {
        self.set_remote_notes(conn_id, note_ids);
    }

    /// Replace the peer's note membership, open replicas for notes we have
    /// never seen, and ask for whatever is new on the notes just shared.
    fn set_remote_notes(&mut self, conn_id: &str, note_ids: Vec<String>) {
        let Some(session) = self.sessions.get_mut(conn_id) else {
            return;
        };
        let next: BTreeSet<String> = note_ids.into_iter().filter(|id| !id.is_empty()).collect();
        let added: Vec<String> = next.difference(&session.remote_notes).cloned().collect();
        session.remote_notes = next;

        let key = session.status_key(conn_id).to_string();
        self.status.set_peer_note_ids(&key, session.remote_notes.iter().cloned());

        let mut created = false;
        for note_id in added {
            match self.workspace.ensure_replica(&note_id) {
                Ok(replica) => created |= replica,
                Err(e) => {
                    warn!(note_id = %note_id, "Could not open replica: {}", e);
                    continue;
                }
            }
            self.request_sync(conn_id, &note_id);
        }

        // Peers only push edits for notes they know we hold
        if created {
            self.announce_note_list();
        }
    }

    fn request_sync(&mut self, conn_id: &str, note_id: &str) {
        let Some(state_vector) = self.workspace.state_vector(note_id) else {
            return;
        };
        self.status.mark_sync_started(note_id);
        let frame = Frame::state_vector(note_id, &self.sender_id, &state_vector);
        self.send(conn_id, &frame);
    }

    fn on_state_vector(&mut self, conn_id: &str, note_id: &str, state_vector: &[u8]) {
        if !self.workspace.contains(note_id) {
            debug!(note_id, "State vector for a note we do not have from {}", conn_id);
            return;
        }
        match self.workspace.update_since(note_id, state_vector) {
            Ok(update) => {
                let frame = Frame::update(note_id, &self.sender_id, &update);
                self.send(conn_id, &frame);
            }
            Err(e) => {
                warn!(note_id, "Could not answer state vector from {}: {}", conn_id, e);
                let reply = Frame::error(note_id, &self.sender_id, error_code::SYNC_FAILED, e.to_string());
                self.send(conn_id, &reply);
            }
        }
    }

    fn on_update(&mut self, conn_id: &str, note_id: &str, update: &[u8]) {
        if note_id.is_empty() {
            debug!("Update without a note id from {}", conn_id);
            return;
        }
        if let Err(e) = self.workspace.ensure_replica(note_id) {
            warn!(note_id, "Could not open replica: {}", e);
            return;
        }

        match self.workspace.apply_remote(note_id, update) {
            Ok(changed) => {
                self.status.mark_sync_completed(note_id);
                self.status.clear_sync_error(note_id);
                if changed {
                    debug!(note_id, "Applied update from {} ({} bytes)", conn_id, update.len());
                    let frame = Frame::update(note_id, &self.sender_id, update);
                    self.broadcast_for_note(note_id, &frame, Some(conn_id));
                }
            }
            Err(e) => {
                warn!(note_id, "Failed to apply update from {}: {}", conn_id, e);
                self.status.mark_sync_error(note_id, e.to_string());
                let reply = Frame::error(note_id, &self.sender_id, error_code::SYNC_FAILED, e.to_string());
                self.send(conn_id, &reply);
            }
        }
    }

    fn on_error(&mut self, conn_id: &str, note_id: &str, error: ErrorPayload) {
        if error.code == error_code::JOIN_REJECTED {
            self.fire(conn_id, JoinEvent::HostRejected);
            warn!("Join rejected by {}: {}", conn_id, error.message);
            if let Some(session) = self.sessions.get(conn_id) {
                session.conn.close();
            }
            return;
        }

        warn!("Peer {} reported {}: {}", conn_id, error.code, error.message);
        if !note_id.is_empty() {
            self.status.mark_sync_error(note_id, error.message);
        }
    }

    fn on_closed(&mut self, conn_id: &str) {
        let Some(mut session) = self.sessions.remove(conn_id) else {
            return;
        };
        let before = session.join;
        session.join = session.join.transition(JoinEvent::TransportClosed);
        debug!(
            "{} closed: {:?} -> {:?}",
            conn_id, before.lifecycle, session.join.lifecycle
        );

        self.status.remove_peer(session.status_key(conn_id));
        info!("Peer disconnected: {} ({})", conn_id, session.address);
    }

    // ==================== Helpers ====================

    /// Run the join state machine and mirror the result into the status store.
    fn fire(&mut self, conn_id: &str, event: JoinEvent) {
        let Some(session) = self.sessions.get_mut(conn_id) else {
            return;
        };
        let before = session.join;
        session.join = before.transition(event);
        debug!(
            "{}: {:?} + {:?} -> {:?}",
            conn_id, before.lifecycle, event, session.join.lifecycle
        );
        self.status
            .set_peer_status(session.status_key(conn_id), session.join.peer_status());
    }

    /// Re-key the status entry from the connection id to the peer's own id.
    fn learn_peer_id(&mut self, conn_id: &str, sender_id: &str) {
        let Some(session) = self.sessions.get(conn_id) else {
            return;
        };
        if session.remote_peer_id.is_some() || sender_id.is_empty() {
            return;
        }
        // A peer id names one connection at a time
        let claimed = self.sessions.contains_key(sender_id)
            || self.sessions.iter().any(|(id, other)| {
                id != conn_id && other.remote_peer_id.as_deref() == Some(sender_id)
            });
        if claimed {
            warn!(
                "{} claims peer id {} held by another connection; keeping it keyed by connection",
                conn_id, sender_id
            );
            return;
        }
        let Some(session) = self.sessions.get_mut(conn_id) else {
            return;
        };
        session.remote_peer_id = Some(sender_id.to_string());

        let ws_url = self
            .status
            .snapshot()
            .peers
            .get(conn_id)
            .map(|peer| peer.ws_url.clone())
            .unwrap_or_else(|| session.address.clone());
        self.status.remove_peer(conn_id);
        self.status.upsert_peer(
            PeerInfo::new(sender_id, ws_url, session.join.peer_status())
                .with_note_ids(session.remote_notes.iter().cloned()),
        );
        debug!("{} identified as peer {}", conn_id, sender_id);
    }

    fn send(&self, conn_id: &str, frame: &Frame) {
        let Some(session) = self.sessions.get(conn_id) else {
            return;
        };
        if let Err(e) = session.conn.send_frame(frame) {
            debug!("Failed to send {} frame to {}: {}", frame.frame_type(), conn_id, e);
        }
    }

    fn broadcast_for_note(&self, note_id: &str, frame: &Frame, except: Option<&str>) {
        for (conn_id, session) in &self.sessions {
            if Some(conn_id.as_str()) == except || !session.shares(note_id) {
                continue;
            }
            if let Err(e) = session.conn.send_frame(frame) {
                debug!("Failed to relay {} frame to {}: {}", frame.frame_type(), conn_id, e);
            }
        }
    }

    fn announce_note_list(&self) {
        let frame = Frame::note_list(NO_NOTE, &self.sender_id, self.workspace.note_ids());
        for (conn_id, session) in &self.sessions {
            if !session.join.allows_outbound_sync() {
                continue;
            }
            if let Err(e) = session.conn.send_frame(&frame) {
                debug!("Failed to send note list to {}: {}", conn_id, e);
            }
        }
    }

    /// Write every open note and close all peer connections.
    pub async fn shutdown(&mut self) -> Result<()> {
        for session in self.sessions.values() {
            session.conn.close();
        }
        self.workspace.flush_all().await
    }
}
