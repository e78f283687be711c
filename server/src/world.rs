//! World map surface consumed by the core
//!
//! The core only needs spawn positions and bounds from the map; terrain
//! generation lives outside this crate and hands the finished dimensions in.

use rand::Rng;
use shared::{GridSize, Size, Vec2};

/// Spatial bounds of the game world plus its transport block grid.
#[derive(Debug, Clone)]
pub struct World {
    bounds: Size,
    block_grid: GridSize,
}

impl World {
    /// Builds a world of `width` x `height` units, broken into square blocks
    /// of `block_size` units for transport. Partial blocks round up.
    pub fn new(width: f64, height: f64, block_size: u32) -> Self {
        let block = block_size.max(1) as f64;
        Self {
            bounds: Size::new(width, height),
            block_grid: GridSize {
                width: (width / block).ceil() as u32,
                height: (height / block).ceil() as u32,
            },
        }
    }

    pub fn bounds(&self) -> Size {
        self.bounds
    }

    /// Size of the world in blocks; sizes each new player's minimap.
    pub fn block_grid(&self) -> GridSize {
        self.block_grid
    }

    /// A uniformly random high-resolution position within the world bounds.
    pub fn random_position(&self) -> Vec2 {
        let mut rng = rand::thread_rng();
        Vec2::new(
            rng.gen_range(0.0..self.bounds.width),
            rng.gen_range(0.0..self.bounds.height),
        )
    }

    /// Restricts a position to the world bounds, inclusive.
    pub fn clamp(&self, position: Vec2) -> Vec2 {
        Vec2::new(
            position.x.clamp(0.0, self.bounds.width),
            position.y.clamp(0.0, self.bounds.height),
        )
    }
}
