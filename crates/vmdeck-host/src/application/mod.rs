//! Application layer use cases for the host.
//!
//! # What is the "application" layer? (for beginners)
//!
//! Use cases here turn a user goal ("start this machine", "stop that one")
//! into calls on the pure model in `vmdeck_core` and the OS adapters in
//! [`crate::infrastructure`].  They own the in-memory state that ties those
//! calls together, such as which emulator process belongs to which machine.
//!
//! # Sub-modules
//!
//! - **`lifecycle`** – The process lifecycle manager: start with a startup
//!   probe, state polling, stop, delete, and the persisted machine list.

pub mod lifecycle;

pub use lifecycle::{LifecycleError, LifecycleManager, LifecycleSettings, MachineState};
