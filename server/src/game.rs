//! Entity registry and fixed-timestep simulation loop
//!
//! The game advances on a fixed 8 ms step fed by a wall-clock accumulator:
//! however much real time a scheduling tick delivers, simulation only ever
//! consumes it in constant-size steps, and whatever is left over drives an
//! interpolating render pass. Objects that expose trackable bounds are kept
//! registered in the spatial index for the duration of their lifetime.

use crate::hub::OutboundEvent;
use crate::spatial::{ObjectId, SpatialError, SpatialIndex, TypeFlags};
use crate::world::World;
use log::{debug, info, warn};
use shared::{Command, Rect};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Fixed simulation step consumed from the accumulator.
pub const SIMULATION_STEP: Duration = Duration::from_millis(8);

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error(transparent)]
    Spatial(#[from] SpatialError),
    #[error("failed to encode outbound payload: {0}")]
    Encode(#[from] bincode::Error),
}

/// Trackable capability: an AABB plus type flags, reported by objects that
/// opt into the spatial index.
#[derive(Debug, Clone, Copy)]
pub struct TrackedBounds {
    pub rect: Rect,
    pub flags: TypeFlags,
}

/// Per-tick view handed to object callbacks. Render output goes through
/// `outbound`; authoritative spatial state goes through `spatial`.
pub struct TickContext<'a> {
    pub world: &'a World,
    pub spatial: &'a mut SpatialIndex,
    pub outbound: &'a mut Vec<OutboundEvent>,
}

/// Anything the game simulates in its loop.
pub trait GameObject: Send + Sync {
    /// The registry id this object was created with.
    fn id(&self) -> ObjectId;

    /// Computes the state change to the next authoritative state over a
    /// fixed delta. Must be deterministic given the same delta.
    fn update(&mut self, dt: Duration, ctx: &mut TickContext) -> Result<(), ObjectError>;

    /// Interpolates a partial state change `dt` into the future and emits it.
    /// Must not mutate authoritative state beyond clearing dirty markers.
    fn render(&mut self, dt: Duration, ctx: &mut TickContext) -> Result<(), ObjectError>;

    /// Reports trackable bounds when the object participates in spatial
    /// queries. Checked once, at registration.
    fn tracked(&self) -> Option<TrackedBounds> {
        None
    }

    /// Applies a decoded client command to this object.
    fn command(&mut self, _command: &Command) {}
}

/// Owns the set of live simulated objects and the simulation clock state.
pub struct Game {
    world: World,
    objects: HashMap<ObjectId, Box<dyn GameObject>>,
    spatial: SpatialIndex,
    accumulator: Duration,
    frame: u16,
    next_object_id: ObjectId,
}

impl Game {
    pub fn new(world: World) -> Self {
        Self {
            world,
            objects: HashMap::new(),
            spatial: SpatialIndex::new(),
            accumulator: Duration::ZERO,
            frame: 0,
            next_object_id: 1,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn frame(&self) -> u16 {
        self.frame
    }

    pub fn accumulator(&self) -> Duration {
        self.accumulator
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Hands out the next free object id.
    pub fn allocate_id(&mut self) -> ObjectId {
        let id = self.next_object_id;
        self.next_object_id = self.next_object_id.wrapping_add(1);
        id
    }

    /// Registers an object for update/render. Objects exposing trackable
    /// bounds are additionally inserted into the spatial index; a rejected
    /// insert fails only that registration, the object still simulates.
    pub fn add_object(&mut self, object: Box<dyn GameObject>) -> ObjectId {
        let id = object.id();
        if let Some(bounds) = object.tracked() {
            if let Err(e) = self.spatial.insert(id, bounds.rect, bounds.flags) {
                warn!("Object {} not spatially tracked: {}", id, e);
            }
        }
        self.objects.insert(id, object);
        id
    }

    /// Removes an object from the game. The spatial index entry goes first,
    /// before the object itself is dropped.
    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        self.spatial.remove(id);
        self.objects.remove(&id).is_some()
    }

    /// Routes a decoded client command to its target object. Returns false
    /// if the object is already gone.
    pub fn apply_command(&mut self, id: ObjectId, command: &Command) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) => {
                object.command(command);
                true
            }
            None => false,
        }
    }

    /// Zeroes the simulation clock. Called when the loop starts.
    pub fn reset_clock(&mut self) {
        self.accumulator = Duration::ZERO;
    }

    /// One scheduling callback: consumes `elapsed` wall time in fixed steps,
    /// renders the leftover fraction, and advances the frame counter.
    pub fn advance(&mut self, elapsed: Duration) -> Vec<OutboundEvent> {
        self.accumulator += elapsed;

        debug!(
            "Game tick: elapsed={:?} accumulated={:?}",
            elapsed, self.accumulator
        );

        let mut outbound = Vec::new();
        while self.accumulator >= SIMULATION_STEP {
            self.run_phase(SIMULATION_STEP, &mut outbound, Phase::Update);
            self.accumulator -= SIMULATION_STEP;
        }

        let fraction = self.accumulator.as_secs_f64() / SIMULATION_STEP.as_secs_f64();
        let render_dt = SIMULATION_STEP.mul_f64(fraction);
        self.run_phase(render_dt, &mut outbound, Phase::Render);

        self.frame = self.frame.wrapping_add(1);
        outbound
    }

    fn run_phase(&mut self, dt: Duration, outbound: &mut Vec<OutboundEvent>, phase: Phase) {
        let Game {
            world,
            objects,
            spatial,
            ..
        } = self;

        let mut ctx = TickContext {
            world,
            spatial,
            outbound,
        };

        // Iteration order across objects is unspecified; one object's failure
        // must not disturb the rest of the pass.
        for (id, object) in objects.iter_mut() {
            let result = match phase {
                Phase::Update => object.update(dt, &mut ctx),
                Phase::Render => object.render(dt, &mut ctx),
            };
            if let Err(e) = result {
                warn!("Object {} failed during {:?}: {}", id, phase, e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Update,
    Render,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Stopped,
    Running,
    Stopping,
}

/// Drives a shared [`Game`] with a periodic scheduling task.
pub struct Simulation {
    game: Arc<RwLock<Game>>,
    state: LoopState,
    started_at: Option<Instant>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Simulation {
    pub fn new(game: Arc<RwLock<Game>>) -> Self {
        Self {
            game,
            state: LoopState::Stopped,
            started_at: None,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Launches the scheduling task firing every `1 / tick_rate` seconds.
    /// Render output is forwarded to the hub's outbound queue.
    pub fn start(&mut self, tick_rate: u32, outbound: mpsc::UnboundedSender<OutboundEvent>) {
        if self.state != LoopState::Stopped {
            warn!("Simulation already running; start ignored");
            return;
        }
        if tick_rate == 0 {
            warn!("Refusing to start simulation with a zero tick rate");
            return;
        }

        info!("Starting game at {} ticks per second", tick_rate);
        self.state = LoopState::Running;
        self.started_at = Some(Instant::now());

        let game = Arc::clone(&self.game);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        self.task = Some(tokio::spawn(async move {
            let period = Duration::from_secs_f64(1.0 / f64::from(tick_rate));
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            game.write().await.reset_clock();
            let mut previous_tick = Instant::now();

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let elapsed = now.duration_since(previous_tick);
                        previous_tick = now;

                        let events = {
                            let mut game = game.write().await;
                            game.advance(elapsed)
                        };

                        for event in events {
                            if outbound.send(event).is_err() {
                                debug!("Hub outbound queue closed; dropping render output");
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Cancels the scheduling task and logs cumulative uptime and frames.
    pub async fn stop(&mut self) {
        if self.state != LoopState::Running {
            return;
        }
        self.state = LoopState::Stopping;

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        let frame = self.game.read().await.frame();
        let uptime = self
            .started_at
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        info!("Stopping game. uptime={:?} total_frames={}", uptime, frame);

        self.state = LoopState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;
    use shared::{Size, Vec2};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Test object that records every callback it receives.
    struct Probe {
        id: ObjectId,
        tracked: Option<TrackedBounds>,
        updates: Arc<AtomicUsize>,
        render_dts: Arc<Mutex<Vec<Duration>>>,
    }

    impl Probe {
        fn new(id: ObjectId) -> (Self, Arc<AtomicUsize>, Arc<Mutex<Vec<Duration>>>) {
            let updates = Arc::new(AtomicUsize::new(0));
            let render_dts = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    id,
                    tracked: None,
                    updates: Arc::clone(&updates),
                    render_dts: Arc::clone(&render_dts),
                },
                updates,
                render_dts,
            )
        }

        fn with_bounds(mut self, rect: Rect, flags: TypeFlags) -> Self {
            self.tracked = Some(TrackedBounds { rect, flags });
            self
        }
    }

    impl GameObject for Probe {
        fn id(&self) -> ObjectId {
            self.id
        }

        fn update(&mut self, dt: Duration, _ctx: &mut TickContext) -> Result<(), ObjectError> {
            assert_eq!(dt, SIMULATION_STEP);
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn render(&mut self, dt: Duration, _ctx: &mut TickContext) -> Result<(), ObjectError> {
            self.render_dts.lock().unwrap().push(dt);
            Ok(())
        }

        fn tracked(&self) -> Option<TrackedBounds> {
            self.tracked
        }
    }

    struct Faulty {
        id: ObjectId,
    }

    impl GameObject for Faulty {
        fn id(&self) -> ObjectId {
            self.id
        }

        fn update(&mut self, _dt: Duration, _ctx: &mut TickContext) -> Result<(), ObjectError> {
            Err(ObjectError::Spatial(SpatialError::NotTracked(self.id)))
        }

        fn render(&mut self, _dt: Duration, _ctx: &mut TickContext) -> Result<(), ObjectError> {
            Ok(())
        }
    }

    fn test_game() -> Game {
        Game::new(World::new(64.0, 64.0, 4))
    }

    #[test]
    fn accumulator_consumes_fixed_steps() {
        let mut game = test_game();
        let (probe, updates, renders) = Probe::new(game.allocate_id());
        game.add_object(Box::new(probe));

        // 20 ms = 2 full steps with 4 ms left over.
        game.advance(Duration::from_millis(20));
        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert_eq!(game.accumulator(), Duration::from_millis(4));

        // 4 ms more completes a third step exactly.
        game.advance(Duration::from_millis(4));
        assert_eq!(updates.load(Ordering::SeqCst), 3);
        assert_eq!(game.accumulator(), Duration::ZERO);

        // Less than a step: no update, only render.
        game.advance(Duration::from_millis(3));
        assert_eq!(updates.load(Ordering::SeqCst), 3);
        assert_eq!(game.accumulator(), Duration::from_millis(3));

        assert_eq!(renders.lock().unwrap().len(), 3);
    }

    #[test]
    fn accumulator_stays_below_one_step() {
        let mut game = test_game();
        for elapsed_ms in [1u64, 7, 9, 15, 16, 33, 100] {
            game.advance(Duration::from_millis(elapsed_ms));
            assert!(game.accumulator() < SIMULATION_STEP);
        }
    }

    #[test]
    fn render_receives_leftover_fraction() {
        let mut game = test_game();
        let (probe, _, renders) = Probe::new(game.allocate_id());
        game.add_object(Box::new(probe));

        game.advance(Duration::from_millis(10));

        // 10 ms leaves 2 ms in the accumulator; render dt = 2 ms.
        let dts = renders.lock().unwrap();
        assert_eq!(dts.len(), 1);
        assert_eq!(dts[0], Duration::from_millis(2));
    }

    #[test]
    fn frame_counter_increments_and_wraps() {
        let mut game = test_game();
        game.advance(Duration::ZERO);
        assert_eq!(game.frame(), 1);
        game.advance(Duration::ZERO);
        assert_eq!(game.frame(), 2);

        game.frame = u16::MAX;
        game.advance(Duration::ZERO);
        assert_eq!(game.frame(), 0);
    }

    #[test]
    fn tracked_objects_register_in_spatial_index() {
        let mut game = test_game();
        let id = game.allocate_id();
        let bounds = Rect::new(Vec2::new(1.0, 1.0), Size::new(0.5, 0.5));
        let (probe, _, _) = Probe::new(id);
        game.add_object(Box::new(probe.with_bounds(bounds, TypeFlags::PLAYER)));

        assert!(game.spatial().contains(id));
        assert_eq!(game.spatial().query_rect(&bounds), vec![id]);

        assert!(game.remove_object(id));
        assert!(!game.spatial().contains(id));
        assert_eq!(game.object_count(), 0);
    }

    #[test]
    fn untracked_objects_skip_spatial_index() {
        let mut game = test_game();
        let id = game.allocate_id();
        let (probe, _, _) = Probe::new(id);
        game.add_object(Box::new(probe));

        assert_eq!(game.object_count(), 1);
        assert!(game.spatial().is_empty());
    }

    #[test]
    fn failing_object_does_not_disturb_others() {
        let mut game = test_game();
        let faulty_id = game.allocate_id();
        game.add_object(Box::new(Faulty { id: faulty_id }));
        let (probe, updates, _) = Probe::new(game.allocate_id());
        game.add_object(Box::new(probe));

        game.advance(Duration::from_millis(8));

        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(game.object_count(), 2);
    }

    #[test]
    fn apply_command_to_missing_object() {
        let mut game = test_game();
        assert!(!game.apply_command(
            99,
            &Command::Move {
                direction: shared::Direction::Up
            }
        ));
    }

    #[tokio::test]
    async fn simulation_start_stop_lifecycle() {
        let game = Arc::new(RwLock::new(test_game()));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        let mut simulation = Simulation::new(Arc::clone(&game));
        simulation.start(120, outbound_tx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        simulation.stop().await;

        let frame = game.read().await.frame();
        assert!(frame > 0, "scheduling task never fired");

        // Stopping twice is a no-op.
        simulation.stop().await;
        outbound_rx.close();
    }
}
