//! Low-level helpers shared by the manager and the cross-thread structures.

pub(crate) mod slab;
/// Spin lock used by the cross-thread structures.
pub mod spin;
pub(crate) mod thread_id;
/// Wait budget utilities for spin-wait loops.
pub mod wait;

pub use spin::{SpinGuard, SpinLock};
pub use wait::WaitBudget;
