//! Nomai WASM Host -- Wasmtime integration for sandboxed gameplay logic.
//!
//! This crate provides the WASM sandbox for AI-generated gameplay modules in
//! the Nomai Engine. Gameplay scripts (compiled from AssemblyScript to WASM)
//! run inside a fuel-metered Wasmtime instance with no filesystem, network,
//! threading, or wall-clock access.
//!
//! # Architecture
//!
//! - **`WasmConfig`**: Configuration for fuel budgets and memory limits.
//! - **`WasmModule`**: Loads, validates, and executes a WASM module with a
//!   required `tick()` export.
//! - **`HostState`**: State held inside the Wasmtime store; accumulates
//!   commands and events from WASM host function calls.
//! - **`WasmError`**: Error type covering compilation, missing exports, fuel
//!   exhaustion, and runtime traps.
//!
//! # Host API
//!
//! WASM modules can import functions from the `"paradox"` namespace to read
//! world state and emit deferred commands with causality metadata. All
//! mutations use [`SystemId::WASM_GAMEPLAY`] and carry a reason string for
//! manifest causality tracking.
//!
//! # Example
//!
//! ```no_run
//! use paradox_behaviors::{WasmConfig, WasmModule};
//!
//! let config = WasmConfig::default();
//! let wat = r#"(module (func (export "tick") nop))"#;
//! let mut module = WasmModule::from_bytes(&config, wat.as_bytes()).unwrap();
//! let fuel_consumed = module.call_tick().unwrap();
//! assert!(fuel_consumed > 0);
//! ```

#![deny(unsafe_code)]

pub mod host_api;
mod module;

pub use host_api::HostState;
pub use module::{WasmConfig, WasmModule};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by WASM module operations.
#[derive(Debug, thiserror::Error)]
pub enum WasmError {
    /// The WASM binary could not be compiled (invalid bytecode or WAT syntax).
    #[error("WASM compilation failed: {0}")]
    CompileError(String),

    /// The module does not export a required function (e.g. `tick()`).
    #[error("missing required export '{name}' -- the WASM module must export a `tick()` function")]
    MissingExport {
        /// The name of the missing export.
        name: String,
    },

    /// The module exhausted its fuel budget during execution.
    #[error("WASM module ran out of fuel (budget: {budget} units) -- possible infinite loop or excessive computation")]
    OutOfFuel {
        /// The fuel budget that was exceeded.
        budget: u64,
    },

    /// A WASM trap occurred during execution (e.g. unreachable instruction,
    /// division by zero, out-of-bounds memory access).
    #[error("WASM trap: {0}")]
    Trap(String),

    /// The module attempted to exceed its memory limit.
    #[error("WASM module exceeded memory limit of {limit_bytes} bytes")]
    MemoryLimitExceeded {
        /// The configured memory limit in bytes.
        limit_bytes: usize,
    },

    /// A general runtime error from the Wasmtime engine.
    #[error("WASM runtime error: {0}")]
    Runtime(String),
}

// ---------------------------------------------------------------------------
// Tests -- B1 tests (unchanged, still passing with HostState store)
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// B2 Tests -- Host API
// ---------------------------------------------------------------------------
