//! Command buffer with causality metadata for deferred ECS mutations.
//!
//! The [`CommandBuffer`] collects deferred mutations to the ECS world during a
//! tick. Each command carries causality metadata ([`SystemId`], [`CausalReason`])
//! that feeds the manifest's causal chains. Commands are applied in deterministic
//! FIFO order after all systems have run.
//!
//! # Design
//!
//! Every ECS state change in the Nomai Engine flows through the command buffer.
//! This is non-negotiable -- it is what makes the manifest useful. Direct
//! `world.set_component()` is only allowed in tests and initial setup.
//!
//! Component values in commands are stored as [`serde_json::Value`] for
//! flexibility and manifest compatibility. The [`CommandBuffer::apply`] method
//! uses the [`World`]'s deserializer registry to convert JSON values back to
//! typed components.
//!
//! # Example
//!
//! ```
//! use paradox_ecs::prelude::*;
//! use paradox_ecs::command::{CausalReason, CommandBuffer};
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Health(u32);
//!
//! let mut world = World::new();
//! world.register_component::<Health>("health");
//! let entity = world.spawn_with(Health(100));
//!
//! let mut cmds = CommandBuffer::new();
//! cmds.set_component(
//!     entity,
//!     "health",
//!     serde_json::json!(50),
//!     SystemId(0),
//!     CausalReason::GameRule("damage_applied".to_owned()),
//! );
//!
//! let applied = cmds.apply(&mut world);
//! assert_eq!(applied.len(), 1);
//! assert_eq!(world.get_component::<Health>(entity), Some(&Health(50)));
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entity::Entity;
use crate::identity::{EntityIdentity, PoolIdentity, SystemId};
use crate::world::World;

// ---------------------------------------------------------------------------
// CausalReason
// ---------------------------------------------------------------------------

/// Why a command was issued. This feeds the manifest's causal chains.
///
/// Prefer the most specific variant possible. `SystemInternal` is a last
/// resort -- using it weakens the manifest's diagnostic value
/// (see anti-pattern "The Broken Chain" in CLAUDE.md).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CausalReason {
    /// Caused by player input.
    PlayerInput(String),
    /// Caused by a collision between two entities.
    CollisionResponse(Entity, Entity),
    /// Caused by a game rule (e.g. "brick_destroyed_on_hit").
    GameRule(String),
    /// Caused by a state transition.
    StateTransition {
        /// The state being transitioned from.
        from: String,
        /// The state being transitioned to.
        to: String,
    },
    /// Caused by a timer firing.
    Timer(String),
    /// Internal system logic -- last resort, prefer more specific reasons.
    SystemInternal(String),
}

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

/// The data payload for a command -- what mutation to perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandKind {
    /// Set a component value on an entity (insert or overwrite).
    SetComponent {
        /// Registered name of the component type.
        component_name: String,
        /// Serialized component value (JSON for flexibility and manifest compat).
        value: serde_json::Value,
    },
    /// Remove a component from an entity.
    RemoveComponent {
        /// Registered name of the component type.
        component_name: String,
    },
    /// Despawn an entity entirely.
    Despawn,
    /// Spawn a semantic-tier entity with full identity and optional components.
    SpawnSemantic {
        /// The entity's semantic identity.
        identity: EntityIdentity,
        /// Serialized component values (name -> JSON) to attach on spawn.
        components: Vec<(String, serde_json::Value)>,
    },
    /// Spawn a pooled-tier entity with type-level identity and optional components.
    SpawnPooled {
        /// The entity's pool identity.
        identity: PoolIdentity,
        /// Serialized component values (name -> JSON) to attach on spawn.
        components: Vec<(String, serde_json::Value)>,
    },
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A single deferred mutation with full causality metadata.
///
/// Commands are the atomic unit of ECS mutation in the Nomai Engine.
/// They carry enough context to reconstruct the full causal chain
/// in the manifest.
///
/// For spawn commands (`SpawnSemantic`, `SpawnPooled`), the `target` field is
/// `None` because the entity does not exist yet. After application, the
/// `spawned_entity` field is set to the newly created entity ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Which entity this command targets. `None` for spawn commands.
    pub target: Option<Entity>,
    /// What mutation to perform.
    pub kind: CommandKind,
    /// Which system issued this command.
    pub issued_by: SystemId,
    /// Why this command was issued (feeds manifest causality).
    pub reason: CausalReason,
    /// Sequential index within the buffer (set on insertion).
    pub command_index: u32,
    /// For spawn commands: the entity ID that was created after application.
    /// `None` before `apply()` is called.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub spawned_entity: Option<Entity>,
    /// Whether the command was applied successfully.
    ///
    /// `false` before `apply()` is called. Set to `true` if the command
    /// mutated the world, `false` if it was skipped (e.g. stale entity).
    /// The change journal should only record entries for successful commands.
    #[serde(default)]
    pub applied_successfully: bool,
}

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

/// Summary of the last [`CommandBuffer::apply`] call.
///
/// This report provides visibility into command-buffer health for each tick.
/// `conflict_count` tracks how many (entity, component) pairs were targeted
/// by multiple commands in a single tick (last-write-wins semantics apply --
/// conflicts are warnings, not errors). `success_count` and `failed_count`
/// track how many commands applied successfully vs. failed (e.g. due to stale
/// entity references).
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Number of (entity, component) pairs targeted by multiple commands.
    pub conflict_count: usize,
    /// Number of commands that failed to apply.
    pub failed_count: usize,
    /// Number of commands that applied successfully.
    pub success_count: usize,
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// Collects commands during a tick and applies them deterministically.
///
/// Commands are applied in strict insertion order (FIFO). This is the
/// deterministic ordering guarantee: given the same set of systems running
/// in the same declared order, the same commands will be emitted and applied
/// in the same sequence.
///
/// After [`apply`](Self::apply), the buffer is cleared and the applied
/// commands are returned so that downstream consumers (change journal,
/// manifest) can record them.
pub struct CommandBuffer {
    commands: Vec<Command>,
    next_index: u32,
    last_apply_report: ApplyReport,
}

impl CommandBuffer {
    /// Create a new, empty command buffer.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            next_index: 0,
            last_apply_report: ApplyReport::default(),
        }
    }

    /// Queue a `SetComponent` command.
    ///
    /// The `value` is a JSON representation of the component. It will be
    /// deserialized into the correct type when [`apply`](Self::apply) is called.
    pub fn set_component(
        &mut self,
        target: Entity,
        component_name: &str,
        value: serde_json::Value,
        issued_by: SystemId,
        reason: CausalReason,
    ) {
        self.push(
            Some(target),
            CommandKind::SetComponent {
                component_name: component_name.to_owned(),
                value,
            },
            issued_by,
            reason,
        );
    }

    /// Queue a `RemoveComponent` command.
    pub fn remove_component(
        &mut self,
        target: Entity,
        component_name: &str,
        issued_by: SystemId,
        reason: CausalReason,
    ) {
        self.push(
            Some(target),
            CommandKind::RemoveComponent {
                component_name: component_name.to_owned(),
            },
            issued_by,
            reason,
        );
    }

    /// Queue a `Despawn` command.
    pub fn despawn(&mut self, target: Entity, issued_by: SystemId, reason: CausalReason) {
        self.push(Some(target), CommandKind::Despawn, issued_by, reason);
    }

    /// Queue a `SpawnSemantic` command.
    ///
    /// Spawns a new semantic-tier entity when the buffer is applied.
    /// Components are provided as `(name, JSON value)` pairs and will be
    /// deserialized using the world's registered deserializers.
    ///
    /// The spawned entity's ID is available on the returned `Command` after
    /// [`apply`](Self::apply) via the `spawned_entity` field.
    pub fn spawn_semantic(
        &mut self,
        identity: EntityIdentity,
        components: Vec<(String, serde_json::Value)>,
        issued_by: SystemId,
        reason: CausalReason,
    ) {
        self.push(
            None,
            CommandKind::SpawnSemantic {
                identity,
                components,
            },
            issued_by,
            reason,
        );
    }

    /// Queue a `SpawnPooled` command.
    ///
    /// Spawns a new pooled-tier entity when the buffer is applied.
    /// Components are provided as `(name, JSON value)` pairs and will be
    /// deserialized using the world's registered deserializers.
    ///
    /// The spawned entity's ID is available on the returned `Command` after
    /// [`apply`](Self::apply) via the `spawned_entity` field.
    pub fn spawn_pooled(
        &mut self,
        identity: PoolIdentity,
        components: Vec<(String, serde_json::Value)>,
        issued_by: SystemId,
        reason: CausalReason,
    ) {
        self.push(
            None,
            CommandKind::SpawnPooled {
                identity,
                components,
            },
            issued_by,
            reason,
        );
    }

    /// Get all queued commands in insertion order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Report from the last [`apply`](Self::apply) call.
    ///
    /// Returns a default (all-zero) report if `apply()` has never been called.
    pub fn last_apply_report(&self) -> &ApplyReport {
        &self.last_apply_report
    }

    /// Apply all commands to the world in deterministic insertion order.
    ///
    /// Returns the list of all commands (successful and failed) so the
    /// change journal (A6) and manifest can consume them. The buffer is
    /// cleared after application. Check each command's
    /// [`applied_successfully`](Command::applied_successfully) field to
    /// distinguish real mutations from failed attempts.
    ///
    /// Commands that target stale or non-existent entities are logged as
    /// warnings and skipped -- they are still included in the returned list
    /// so the manifest can record the attempted mutation.
    ///
    /// For spawn commands, the `spawned_entity` field on the returned
    /// `Command` is set to the newly created entity ID.
    pub fn apply(&mut self, world: &mut World) -> Vec<Command> {
        let mut commands = std::mem::take(&mut self.commands);
        self.next_index = 0;

        // --- Conflict detection ---
        use std::collections::HashMap;
        let mut seen: HashMap<(Entity, String), Vec<u32>> = HashMap::new();
        for cmd in &commands {
            if let Some(target) = cmd.target {
                let component_name = match &cmd.kind {
                    CommandKind::SetComponent { component_name, .. } => {
                        Some(component_name.clone())
                    }
                    CommandKind::RemoveComponent { component_name } => Some(component_name.clone()),
                    _ => None,
                };
                if let Some(name) = component_name {
                    seen.entry((target, name))
                        .or_default()
                        .push(cmd.command_index);
                }
            }
        }
        let mut conflict_count = 0;
        for ((entity, component), indices) in &seen {
            if indices.len() > 1 {
                conflict_count += 1;
                tracing::warn!(
                    entity = ?entity,
                    component = %component,
                    command_indices = ?indices,
                    "conflict: {} commands target the same entity+component in this tick (last-write-wins)",
                    indices.len()
                );
            }
        }

        // --- Apply loop ---
        let mut success_count: usize = 0;
        let mut failed_count: usize = 0;

        for cmd in &mut commands {
            // Clone the kind to avoid borrow checker issues when spawn
            // commands need to set cmd.spawned_entity.
            let kind = cmd.kind.clone();
            let result = match &kind {
                CommandKind::SetComponent {
                    component_name,
                    value,
                } => {
                    let target = cmd
                        .target
                        .expect("SetComponent command must have a target entity");
                    world.set_component_by_name(target, component_name, value)
                }
                CommandKind::RemoveComponent { component_name } => {
                    let target = cmd
                        .target
                        .expect("RemoveComponent command must have a target entity");
                    world.remove_component_by_name(target, component_name)
                }
                CommandKind::Despawn => {
                    let target = cmd
                        .target
                        .expect("Despawn command must have a target entity");
                    world.despawn(target)
                }
                CommandKind::SpawnSemantic {
                    identity,
                    components,
                } => Self::apply_spawn_semantic(world, cmd, identity, components),
                CommandKind::SpawnPooled {
                    identity,
                    components,
                } => Self::apply_spawn_pooled(world, cmd, identity, components),
            };

            match result {
                Ok(()) => {
                    cmd.applied_successfully = true;
                    success_count += 1;
                }
                Err(e) => {
                    failed_count += 1;
                    warn!(
                        command_index = cmd.command_index,
                        target = ?cmd.target,
                        system_id = cmd.issued_by.0,
                        error = %e,
                        "command application failed"
                    );
                }
            }
        }

        // --- Store report ---
        self.last_apply_report = ApplyReport {
            conflict_count,
            success_count,
            failed_count,
        };

        commands
    }

    /// Apply a `SpawnSemantic` command. Sets `cmd.spawned_entity` on success.
    fn apply_spawn_semantic(
        world: &mut World,
        cmd: &mut Command,
        identity: &EntityIdentity,
        components: &[(String, serde_json::Value)],
    ) -> Result<(), crate::EcsError> {
        use crate::world::ComponentBundle;

        let bundle = ComponentBundle::new();
        let entity = world.spawn_semantic(identity.clone(), bundle)?;

        // Record the spawned entity immediately so downstream causality
        // bookkeeping is consistent even if a component set fails.
        cmd.spawned_entity = Some(entity);

        // The entity was created — mark the spawn itself as successful.
        // Component-set failures below are logged but don't un-create the entity.
        cmd.applied_successfully = true;

        // Set additional components via deserialization.
        for (name, value) in components {
            if let Err(e) = world.set_component_by_name(entity, name, value) {
                warn!(
                    command_index = cmd.command_index,
                    entity = ?entity,
                    component = %name,
                    error = %e,
                    "spawn component set failed (entity was still created)"
                );
            }
        }

        Ok(())
    }

    /// Apply a `SpawnPooled` command. Sets `cmd.spawned_entity` on success.
    fn apply_spawn_pooled(
        world: &mut World,
        cmd: &mut Command,
        identity: &PoolIdentity,
        components: &[(String, serde_json::Value)],
    ) -> Result<(), crate::EcsError> {
        use crate::world::ComponentBundle;

        let bundle = ComponentBundle::new();
        let entity = world.spawn_pooled(identity.clone(), bundle)?;

        // Record the spawned entity immediately so downstream causality
        // bookkeeping is consistent even if a component set fails.
        cmd.spawned_entity = Some(entity);

        // The entity was created — mark the spawn itself as successful.
        // Component-set failures below are logged but don't un-create the entity.
        cmd.applied_successfully = true;

        // Set additional components via deserialization.
        for (name, value) in components {
            if let Err(e) = world.set_component_by_name(entity, name, value) {
                warn!(
                    command_index = cmd.command_index,
                    entity = ?entity,
                    component = %name,
                    error = %e,
                    "spawn component set failed (entity was still created)"
                );
            }
        }

        Ok(())
    }

    /// Push a pre-built command into the buffer.
    ///
    /// Used for merging commands from external sources (e.g., WASM modules)
    /// into the main command buffer. The command index is reassigned to
    /// maintain ordering within this buffer.
    pub fn push_raw(&mut self, mut cmd: Command) {
        cmd.command_index = self.next_index;
        self.next_index += 1;
        self.commands.push(cmd);
    }

    /// Clear the buffer without applying any commands.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.next_index = 0;
    }

    // -- internal helpers ---------------------------------------------------

    fn push(
        &mut self,
        target: Option<Entity>,
        kind: CommandKind,
        issued_by: SystemId,
        reason: CausalReason,
    ) {
        let index = self.next_index;
        self.next_index += 1;
        self.commands.push(Command {
            target,
            kind,
            issued_by,
            reason,
            command_index: index,
            spawned_entity: None,
            applied_successfully: false,
        });
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
