//! Fixed-timestep tick loop for deterministic simulation.
//!
//! The [`TickLoop`] drives the Paradox Runtime simulation forward. Each tick:
//!
//! 1. All registered systems run in declaration order, each receiving a shared
//!    reference to the [`World`] and a mutable reference to the [`CommandBuffer`].
//! 2. The command buffer is applied to the world (FIFO, deterministic).
//! 3. The tick counter and simulation time advance.
//!
//! Because system ordering is fixed, the command buffer is FIFO, and there is no
//! non-deterministic input (randomness must use a seeded RNG), the tick loop is
//! fully deterministic: same initial state + same systems + same inputs = same
//! final state.
//!
//! # Example
//!
//! ```
//! use paradox_runtime::tick::{TickConfig, TickLoop};
//! use paradox_ecs::prelude::*;
//!
//! let world = World::new();
//! let config = TickConfig { fixed_dt: 1.0 / 60.0, ..Default::default() };
//! let mut tick_loop = TickLoop::new(world, config);
//!
//! // Register systems.
//! tick_loop.add_system("physics", |_world, _cmds| {
//!     // physics logic here
//! });
//!
//! // Run 10 ticks.
//! for _ in 0..10 {
//!     tick_loop.tick();
//! }
//!
//! assert_eq!(tick_loop.tick_count(), 10);
//! ```

use std::time::{Duration, Instant};

use paradox_ecs::command::CommandBuffer;
use paradox_ecs::world::World;

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Configuration for the fixed-timestep tick loop.
///
/// The `fixed_dt` is the duration in seconds of each simulation tick. A value
/// of `1.0 / 60.0` gives 60 ticks per second.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
    /// Headless mode: no rendering, tick as fast as possible.
    pub headless: bool,
}

impl Default for TickConfig {
    /// Defaults to 60 Hz (1/60 second per tick), headless off.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            headless: false,
        }
    }
}

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// Timing diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Wall-clock time per system (in order of execution).
    pub system_times: Vec<(String, Duration)>,
    /// Total time for the tick (systems + command apply).
    pub total_time: Duration,
    /// Time spent applying commands.
    pub command_apply_time: Duration,
}

// ---------------------------------------------------------------------------
// InputFrame
// ---------------------------------------------------------------------------

/// A single frame of recorded input for replay.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct InputFrame {
    /// Arbitrary key-value pairs representing inputs for this tick.
    pub inputs: std::collections::HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// SystemFn
// ---------------------------------------------------------------------------

/// A system function that operates on the world each tick.
///
/// Systems receive a shared reference to the [`World`] (read-only) and a
/// mutable reference to the [`CommandBuffer`] where they queue mutations.
/// All mutations happen via the command buffer to ensure determinism and
/// manifest traceability.
pub type SystemFn = fn(&World, &mut CommandBuffer);

// ---------------------------------------------------------------------------
// RegisteredSystem
// ---------------------------------------------------------------------------

/// A named system in the registry.
///
/// The name is used for debugging, logging, and manifest integration.
/// The `after` field lists the names of systems that must execute before
/// this system.
#[derive(Debug)]
struct RegisteredSystem {
    /// Human-readable name for this system (e.g., `"physics"`, `"movement"`).
    name: String,
    /// The system function to invoke each tick.
    func: SystemFn,
    /// Names of systems that must execute before this one.
    after: Vec<String>,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// The deterministic fixed-timestep tick loop.
///
/// Drives the simulation forward by running systems in a fixed order each tick,
/// applying the resulting command buffer, and advancing the tick counter and
/// simulation time.
///
/// # Determinism Guarantee
///
/// Given the same initial [`World`] state, the same registered systems (in the
/// same order), and the same external inputs, the tick loop will produce
/// identical results across runs and platforms. This is guaranteed by:
///
/// - Fixed system execution order (declaration order).
/// - Deterministic command buffer application (FIFO).
/// - No floating-point non-determinism in the tick counter (uses `f64`
///   multiplication by tick count, not accumulation).
pub struct TickLoop {
    /// The ECS world containing all entities and components.
    world: World,
    /// The shared command buffer used each tick.
    command_buffer: CommandBuffer,
    /// Ordered list of systems to run each tick.
    systems: Vec<RegisteredSystem>,
    /// Number of ticks executed so far.
    tick_counter: u64,
    /// Fixed time step in seconds per tick.
    fixed_dt: f64,
    /// Configuration used to create this tick loop.
    config: TickConfig,
    /// Diagnostics from the last tick.
    last_diagnostics: TickDiagnostics,
    /// Current tick's input frame (set before tick() for replay).
    current_input: InputFrame,
}

impl TickLoop {
    /// Create a new tick loop with the given world and configuration.
    ///
    /// The tick counter starts at 0 and simulation time at 0.0.
    pub fn new(world: World, config: TickConfig) -> Self {
        assert!(
            config.fixed_dt > 0.0 && config.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            config.fixed_dt
        );
        Self {
            world,
            command_buffer: CommandBuffer::new(),
            systems: Vec::new(),
            tick_counter: 0,
            fixed_dt: config.fixed_dt,
            config,
            last_diagnostics: TickDiagnostics::default(),
            current_input: InputFrame::default(),
        }
    }

    /// Register a system to be run each tick.
    ///
    /// Systems are executed in the order they are registered. The `name` is
    /// used for debugging and manifest integration.
    ///
    /// # Panics
    ///
    /// Panics if a system with the same name is already registered.
    pub fn add_system(&mut self, name: &str, func: SystemFn) {
        self.add_system_after(name, &[], func);
    }

    /// Register a system with explicit execution dependencies.
    ///
    /// `after` lists system names that must execute before this system.
    /// Validates that all referenced systems exist and that no cycles would
    /// be created.
    ///
    /// # Panics
    ///
    /// - If any system in `after` is not already registered.
    /// - If a system with this name already exists.
    /// - If adding this system would create a dependency cycle.
    pub fn add_system_after(&mut self, name: &str, after: &[&str], func: SystemFn) {
        // Validate all "after" systems exist.
        for dep in after {
            assert!(
                self.systems.iter().any(|s| s.name == *dep),
                "system '{name}' declares dependency on '{dep}', but '{dep}' is not registered"
            );
        }

        assert!(
            !self.systems.iter().any(|s| s.name == name),
            "duplicate system name: {name:?}"
        );

        self.systems.push(RegisteredSystem {
            name: name.to_owned(),
            func,
            after: after.iter().map(|s| s.to_string()).collect(),
        });

        // Validate no cycles after insertion.
        self.validate_system_order();
    }

    /// Validate that there are no cycles in the system dependency graph.
    ///
    /// Uses depth-first search with a recursion stack to detect back edges.
    ///
    /// # Panics
    ///
    /// Panics if a cycle is detected in the dependency graph.
    fn validate_system_order(&self) {
        let mut visited = vec![false; self.systems.len()];
        let mut in_stack = vec![false; self.systems.len()];

        fn dfs(
            systems: &[RegisteredSystem],
            idx: usize,
            visited: &mut [bool],
            in_stack: &mut [bool],
        ) -> bool {
            if in_stack[idx] {
                return false; // cycle detected
            }
            if visited[idx] {
                return true;
            }
            visited[idx] = true;
            in_stack[idx] = true;
            for dep_name in &systems[idx].after {
                if let Some(dep_idx) = systems.iter().position(|s| s.name == *dep_name) {
                    if !dfs(systems, dep_idx, visited, in_stack) {
                        return false;
                    }
                }
            }
            in_stack[idx] = false;
            true
        }

        for i in 0..self.systems.len() {
            assert!(
                dfs(&self.systems, i, &mut visited, &mut in_stack),
                "cycle detected in system dependencies"
            );
        }
    }

    /// Execute one simulation tick.
    ///
    /// 1. Runs all registered systems in order. Each system reads from the
    ///    world and writes commands to the shared command buffer.
    /// 2. Applies the command buffer to the world (deterministic FIFO order).
    /// 3. Advances the tick counter and simulation time.
    ///
    /// Returns the list of processed commands from this tick (useful for the
    /// change journal / manifest pipeline). Check each command's
    /// `applied_successfully` field to distinguish real mutations from failed
    /// attempts.
    pub fn tick(&mut self) -> Vec<paradox_ecs::command::Command> {
        let tick_start = Instant::now();
        let mut system_times = Vec::with_capacity(self.systems.len());

        // Phase 1: Run all systems in registered order with timing.
        for system in &self.systems {
            let sys_start = Instant::now();
            (system.func)(&self.world, &mut self.command_buffer);
            system_times.push((system.name.clone(), sys_start.elapsed()));
        }

        // Phase 2: Apply command buffer to the world with timing.
        let apply_start = Instant::now();
        let applied = self.command_buffer.apply(&mut self.world);
        let command_apply_time = apply_start.elapsed();

        // Phase 3: Advance tick counter.
        self.tick_counter += 1;

        self.last_diagnostics = TickDiagnostics {
            system_times,
            total_time: tick_start.elapsed(),
            command_apply_time,
        };

        applied
    }

    /// Run multiple ticks in sequence.
    ///
    /// Equivalent to calling [`tick`](Self::tick) `count` times. Returns the
    /// total number of commands processed (both successful and failed) across
    /// all ticks. Use [`Command::applied_successfully`](paradox_ecs::command::Command::applied_successfully)
    /// to distinguish successful mutations from failed attempts.
    pub fn run_ticks(&mut self, count: u64) -> u64 {
        let mut total_commands = 0u64;
        for _ in 0..count {
            let applied = self.tick();
            total_commands += applied.len() as u64;
        }
        total_commands
    }

    // -- accessors ----------------------------------------------------------

    /// The number of ticks executed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// The current simulation time in seconds.
    ///
    /// Computed as `tick_count * fixed_dt` to avoid floating-point drift from
    /// repeated addition.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.fixed_dt
    }

    /// The fixed time step in seconds per tick.
    pub fn fixed_dt(&self) -> f64 {
        self.fixed_dt
    }

    /// Read-only access to the ECS world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the ECS world.
    ///
    /// Use sparingly -- prefer the command buffer for mutations during
    /// simulation. Direct world access is appropriate for initial setup
    /// and testing.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The number of registered systems.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// The names of all registered systems, in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    /// Diagnostics from the last tick (timing per system).
    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    /// Set the input frame for the next tick (used for replay).
    pub fn set_input(&mut self, input: InputFrame) {
        self.current_input = input;
    }

    /// Read the current tick's input frame.
    pub fn current_input(&self) -> &InputFrame {
        &self.current_input
    }

    /// Whether headless mode is enabled.
    pub fn is_headless(&self) -> bool {
        self.config.headless
    }

    /// Overwrite the tick counter directly. Used by snapshot restore, which
    /// bypasses the normal tick-by-tick advance.
    pub(crate) fn set_tick_counter(&mut self, tick: u64) {
        self.tick_counter = tick;
    }

    /// Overwrite the fixed time step directly, without the construction-time
    /// `assert!`. Used by snapshot restore, which validates the incoming
    /// value itself before calling this.
    pub(crate) fn set_fixed_dt(&mut self, dt: f64) {
        self.fixed_dt = dt;
    }

    /// Drop any commands queued since the last `tick()`. Used by snapshot
    /// restore so stale commands from before the restore point don't leak
    /// into the next tick.
    pub(crate) fn clear_command_buffer(&mut self) {
        self.command_buffer = CommandBuffer::new();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
