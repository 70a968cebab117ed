//! Paradox Runtime -- Game engine core with deterministic tick loop and command buffer.
//!
//! This crate builds on [`paradox_ecs`] to provide the simulation driver: a
//! fixed-timestep tick loop that runs systems in a deterministic order, applies
//! commands via the [`CommandBuffer`](paradox_ecs::command::CommandBuffer), and
//! advances simulation time. [`timeslice`] drives a single [`Cosmos`](paradox_ecs::cosmos::Cosmos)'s
//! cadence against its timestream neighbors; [`parallel`] forks, replays,
//! and extracts a resolution cycle when a divergence needs resolving.
//! [`snapshot`] and [`replay`] provide BLAKE3-verified determinism
//! checkpoints and recorded-input playback over a [`tick::TickLoop`].
//!
//! # Quick Start
//!
//! ```
//! use paradox_runtime::prelude::*;
//!
//! let mut world = World::new();
//! world.register_component::<u32>("score");
//!
//! let config = TickConfig { fixed_dt: 1.0 / 60.0 };
//! let mut tick_loop = TickLoop::new(world, config);
//!
//! tick_loop.add_system("example", |_world, _cmds| {
//!     // game logic here
//! });
//!
//! tick_loop.run_ticks(100);
//! assert_eq!(tick_loop.tick_count(), 100);
//! ```

#![deny(unsafe_code)]

pub mod parallel;
pub mod replay;
pub mod snapshot;
pub mod tick;
pub mod timeslice;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use paradox_ecs;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    // Re-export everything from the ECS prelude.
    pub use paradox_ecs::prelude::*;

    // Engine-specific exports.
    pub use crate::parallel::{ExtractOutcome, ParallelCosmosContext, RecycleOutcome, RunOutcome};
    pub use crate::replay::{replay, ReplayDivergence, ReplayEntry, ReplayLog, ReplayRecorder, ReplayResult};
    pub use crate::snapshot::EngineSnapshot;
    pub use crate::tick::{SystemFn, TickConfig, TickLoop};
    pub use crate::timeslice::{DynamoFn, TimesliceContext};
}
