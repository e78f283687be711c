//! Player game object backing a connected client

use crate::game::{GameObject, ObjectError, TickContext, TrackedBounds};
use crate::spatial::{ObjectId, TypeFlags};
use bitflags::bitflags;
use log::debug;
use rand::Rng;
use shared::{Command, Direction, GridSize, Rect, Size, Update, Vec2};
use std::time::Duration;

/// Side length of the player collision AABB, centered on the position.
pub const PLAYER_COLLISION_SIZE: f64 = 0.1;

/// Movement speed in world units per second.
pub const PLAYER_SPEED: f64 = 2.0;

bitflags! {
    /// Player state that has changed since the client last heard about it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirtyFlags: u8 {
        const POSITION = 1 << 0;
        const ORIENTATION = 1 << 1;
        const HEALTH = 1 << 2;
        const INVENTORY = 1 << 3;
    }
}

pub struct Player {
    id: ObjectId,
    name: String,
    position: Vec2,
    velocity: Vec2,
    dirty: DirtyFlags,
    minimap: GridSize,
    flags: TypeFlags,
}

impl Player {
    /// Creates a player spawned at `position`, with a minimap sized from the
    /// world's block grid. The initial position is dirty so the first render
    /// announces it.
    pub fn new(id: ObjectId, name: String, position: Vec2, minimap: GridSize) -> Self {
        Self {
            id,
            name,
            position,
            velocity: Vec2::default(),
            dirty: DirtyFlags::POSITION,
            minimap,
            flags: TypeFlags::PLAYER,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn minimap(&self) -> GridSize {
        self.minimap
    }

    /// The player collision AABB: a small square centered on the position.
    pub fn aabb(&self) -> Rect {
        Rect::new(
            Vec2::new(
                self.position.x - PLAYER_COLLISION_SIZE / 2.0,
                self.position.y - PLAYER_COLLISION_SIZE / 2.0,
            ),
            Size::new(PLAYER_COLLISION_SIZE, PLAYER_COLLISION_SIZE),
        )
    }
}

impl GameObject for Player {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn update(&mut self, dt: Duration, ctx: &mut TickContext) -> Result<(), ObjectError> {
        if self.velocity == Vec2::default() {
            return Ok(());
        }

        let dt = dt.as_secs_f64();
        let next = Vec2::new(
            self.position.x + self.velocity.x * dt,
            self.position.y + self.velocity.y * dt,
        );
        self.position = ctx.world.clamp(next);
        self.dirty |= DirtyFlags::POSITION;

        // Moved, so the index must hear about the new bounds.
        ctx.spatial.update(self.id, self.aabb())?;
        Ok(())
    }

    fn render(&mut self, dt: Duration, ctx: &mut TickContext) -> Result<(), ObjectError> {
        if !self.dirty.contains(DirtyFlags::POSITION) {
            return Ok(());
        }

        // Extrapolate dt into the future for smooth client display; the
        // authoritative position is untouched.
        let dt = dt.as_secs_f64();
        let update = Update::Position {
            player_id: self.id,
            x: self.position.x + self.velocity.x * dt,
            y: self.position.y + self.velocity.y * dt,
        };

        let payload = bincode::serialize(&update)?;
        ctx.outbound.push(crate::hub::OutboundEvent::broadcast(payload));
        self.dirty.remove(DirtyFlags::POSITION);
        Ok(())
    }

    fn tracked(&self) -> Option<TrackedBounds> {
        Some(TrackedBounds {
            rect: self.aabb(),
            flags: self.flags,
        })
    }

    fn command(&mut self, command: &Command) {
        match command {
            Command::Move { direction } => {
                self.velocity = match direction {
                    Direction::Up => Vec2::new(0.0, PLAYER_SPEED),
                    Direction::Down => Vec2::new(0.0, -PLAYER_SPEED),
                    Direction::Left => Vec2::new(-PLAYER_SPEED, 0.0),
                    Direction::Right => Vec2::new(PLAYER_SPEED, 0.0),
                };
                self.dirty |= DirtyFlags::ORIENTATION;
            }
            Command::Attack { target } => {
                debug!("Player {} ({}) attacks target {}", self.id, self.name, target);
            }
        }
    }
}

/// Creates a placeholder name for a newly connected player.
pub fn generate_player_name() -> String {
    format!("anon{}", rand::thread_rng().gen_range(0..1000))
}
