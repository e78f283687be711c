//! Connection hub routing messages between clients and the game
//!
//! One control loop processes connect, disconnect, inbound, and outbound
//! events strictly in series, so the connection registry is only ever touched
//! from a single task and needs no locks. Pumps and the simulation loop talk
//! to the hub exclusively through its channels.

use crate::game::Game;
use crate::player::{generate_player_name, Player};
use crate::spatial::ObjectId;
use log::{debug, info, warn};
use shared::{Command, Update};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::RwLock;

/// Identifier assigned to each accepted connection by the listener.
pub type ConnId = u32;

/// Hub-side view of a live connection: the address and the sending half of
/// its bounded outbound queue. Dropping the sender closes the queue and
/// tells the write pump to exit.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ConnId,
    pub addr: SocketAddr,
    pub sender: mpsc::Sender<Vec<u8>>,
}

/// A raw sub-message payload forwarded by a connection's read pump.
#[derive(Debug)]
pub struct InboundMessage {
    pub conn: ConnId,
    pub payload: Vec<u8>,
}

/// A payload bound for one connection, or for all of them.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub target: Option<ConnId>,
    pub payload: Vec<u8>,
}

impl OutboundEvent {
    pub fn to(conn: ConnId, payload: Vec<u8>) -> Self {
        Self {
            target: Some(conn),
            payload,
        }
    }

    pub fn broadcast(payload: Vec<u8>) -> Self {
        Self {
            target: None,
            payload,
        }
    }
}

struct Receivers {
    register: mpsc::UnboundedReceiver<ClientHandle>,
    unregister: mpsc::UnboundedReceiver<ConnId>,
    inbound: mpsc::UnboundedReceiver<InboundMessage>,
    outbound: mpsc::UnboundedReceiver<OutboundEvent>,
    shutdown: mpsc::UnboundedReceiver<()>,
}

/// Cloneable sending side of the hub's event queues, handed to pumps, the
/// listener, and the simulation loop.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<ClientHandle>,
    unregister_tx: mpsc::UnboundedSender<ConnId>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundEvent>,
    shutdown_tx: mpsc::UnboundedSender<()>,
}

impl HubHandle {
    pub fn register(&self, client: ClientHandle) {
        let _ = self.register_tx.send(client);
    }

    pub fn unregister(&self, conn: ConnId) {
        let _ = self.unregister_tx.send(conn);
    }

    pub fn inbound(&self, conn: ConnId, payload: Vec<u8>) {
        let _ = self.inbound_tx.send(InboundMessage { conn, payload });
    }

    pub fn outbound(&self, event: OutboundEvent) {
        let _ = self.outbound_tx.send(event);
    }

    /// The raw outbound sender, for the simulation loop to push render
    /// output through.
    pub fn outbound_sender(&self) -> mpsc::UnboundedSender<OutboundEvent> {
        self.outbound_tx.clone()
    }

    /// Asks the hub to stop serving and drop every remaining connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Registry state owned exclusively by the hub's control loop.
struct HubState {
    game: Arc<RwLock<Game>>,
    clients: HashMap<ConnId, ClientHandle>,
    registry: HashMap<ConnId, ObjectId>,
}

/// Message manager between connected clients and the game.
pub struct Hub {
    receivers: Receivers,
    state: HubState,
}

impl Hub {
    pub fn new(game: Arc<RwLock<Game>>) -> (Self, HubHandle) {
        let (register_tx, register) = mpsc::unbounded_channel();
        let (unregister_tx, unregister) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = mpsc::unbounded_channel();

        let hub = Self {
            receivers: Receivers {
                register,
                unregister,
                inbound,
                outbound,
                shutdown,
            },
            state: HubState {
                game,
                clients: HashMap::new(),
                registry: HashMap::new(),
            },
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            inbound_tx,
            outbound_tx,
            shutdown_tx,
        };
        (hub, handle)
    }

    /// Core serving loop. Runs until shutdown is requested or every handle
    /// is gone, then drops all remaining connections.
    pub async fn run(self) {
        let Hub {
            mut receivers,
            mut state,
        } = self;

        info!("Hub serving clients");

        loop {
            tokio::select! {
                Some(client) = receivers.register.recv() => state.handle_register(client).await,
                Some(conn) = receivers.unregister.recv() => state.handle_unregister(conn).await,
                Some(message) = receivers.inbound.recv() => state.handle_inbound(message),
                Some(event) = receivers.outbound.recv() => state.handle_outbound(event).await,
                Some(()) = receivers.shutdown.recv() => break,
                else => break,
            }
        }

        state.drain().await;
        info!("Hub stopped");
    }
}

impl HubState {
    async fn handle_register(&mut self, client: ClientHandle) {
        info!("Client {} connected from {}", client.id, client.addr);

        let (player_id, minimap) = {
            let mut game = self.game.write().await;
            let spawn = game.world().random_position();
            let minimap = game.world().block_grid();
            let player_id = game.allocate_id();
            let player = Player::new(player_id, generate_player_name(), spawn, minimap);
            game.add_object(Box::new(player));
            (player_id, minimap)
        };

        let conn = client.id;
        self.registry.insert(conn, player_id);
        self.clients.insert(conn, client);

        let welcome = Update::Welcome {
            player_id,
            minimap_width: minimap.width,
            minimap_height: minimap.height,
        };
        match bincode::serialize(&welcome) {
            Ok(payload) => self.handle_outbound(OutboundEvent::to(conn, payload)).await,
            Err(e) => warn!("Failed to encode welcome for client {}: {}", conn, e),
        }
    }

    async fn handle_unregister(&mut self, conn: ConnId) {
        if self.registry.contains_key(&conn) {
            info!("Client {} disconnected; own volition", conn);
            self.remove_connection(conn).await;
        }
    }

    fn handle_inbound(&mut self, message: InboundMessage) {
        let Some(&object_id) = self.registry.get(&message.conn) else {
            debug!(
                "Inbound message from unregistered connection {}",
                message.conn
            );
            return;
        };

        // Game-logic dispatch runs concurrently per message; ordering across
        // connections is deliberately relaxed.
        let game = Arc::clone(&self.game);
        tokio::spawn(dispatch_command(game, message.conn, object_id, message.payload));
    }

    async fn handle_outbound(&mut self, event: OutboundEvent) {
        match event.target {
            Some(conn) => self.deliver(conn, event.payload).await,
            None => {
                let conns: Vec<ConnId> = self.clients.keys().copied().collect();
                for conn in conns {
                    self.deliver(conn, event.payload.clone()).await;
                }
            }
        }
    }

    /// Non-blocking enqueue onto a connection's bounded outbound queue. A
    /// full queue marks the consumer too slow to keep: the connection is
    /// evicted rather than allowed to stall the hub.
    async fn deliver(&mut self, conn: ConnId, payload: Vec<u8>) {
        let Some(client) = self.clients.get(&conn) else {
            return;
        };

        match client.sender.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                info!("Client {} disconnected; outbound buffer full", conn);
                self.remove_connection(conn).await;
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Client {} outbound queue already closed", conn);
                self.remove_connection(conn).await;
            }
        }
    }

    /// Removes the connection's entity from the game, erases the registry
    /// entry, and closes the outbound queue by dropping its sender.
    async fn remove_connection(&mut self, conn: ConnId) {
        if let Some(object_id) = self.registry.remove(&conn) {
            self.game.write().await.remove_object(object_id);
        }
        self.clients.remove(&conn);
    }

    /// Drops every remaining connection, exactly as the full-queue case
    /// does, so no orphaned entities survive hub teardown.
    async fn drain(&mut self) {
        let conns: Vec<ConnId> = self.clients.keys().copied().collect();
        for conn in conns {
            info!("Client {} disconnected; hub stopping", conn);
            self.remove_connection(conn).await;
        }
    }
}

async fn dispatch_command(
    game: Arc<RwLock<Game>>,
    conn: ConnId,
    object_id: ObjectId,
    payload: Vec<u8>,
) {
    // A malformed envelope costs only itself: drop it and keep serving.
    let command: Command = match bincode::deserialize(&payload) {
        Ok(command) => command,
        Err(e) => {
            warn!("Dropping malformed message from connection {}: {}", conn, e);
            return;
        }
    };

    match &command {
        Command::Move { direction } => {
            debug!("Move command from connection {}: {:?}", conn, direction)
        }
        Command::Attack { target } => {
            debug!("Attack command from connection {}: target {}", conn, target)
        }
    }

    if !game.write().await.apply_command(object_id, &command) {
        debug!(
            "Command from connection {} arrived after object {} was removed",
            conn, object_id
        );
    }
}
