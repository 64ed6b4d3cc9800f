#![forbid(unsafe_op_in_unsafe_fn)]
#![deny(missing_docs)]

//! Per-thread cooperative task manager: one-shot futures and promises,
//! clocks, tasks and combinators scheduled by one [`Manager`] per OS thread,
//! plus cross-thread completion handoff and bounded channels built on them.
//!
//! Tasks are ordinary Rust futures owned by a manager. They resume inline
//! when whatever they wait on settles, or through the manager's local queue
//! when settled with a `*_later` method. Other threads reach a manager only
//! through [`AsyncPromise`], [`AsyncChannel`], [`AsyncSemaphore`] and
//! [`RemoteHandle`].
//!
//! ```
//! use std::time::Duration;
//! use tee_manager::{Channel, Manager};
//!
//! let m = Manager::new();
//! let ch = Channel::new(&m, 4, []);
//! let tx = ch.clone();
//! let h = m.handle();
//! m.spawn_later(async move {
//!     h.sleep(Duration::from_millis(1)).await.unwrap();
//!     tx.send(1..=6).await.unwrap();
//! })
//! .detach();
//! let got = m.block_on(async move { ch.receive(6).await });
//! assert_eq!(got, Ok(vec![1, 2, 3, 4, 5, 6]));
//! ```

mod affinity;
mod async_future;
mod awaiter;
mod channel;
mod combinator;
mod config;
mod error;
mod future;
mod latch;
mod manager;
mod semaphore;
mod task;
mod timer;
pub mod util;

pub use affinity::{PinConfig, pin_current_thread};
pub use async_future::{AsyncFuture, AsyncPromise};
pub use channel::{AsyncChannel, Channel, ChannelShare};
pub use combinator::{Awaitable, Policy, Select, race, wait_all, wait_all_settled, wait_any};
pub use config::{
    ENV_MAX_INLINE_DEPTH, ENV_MAX_QUANTUM_MS, ENV_PIN_CORE, ENV_POOL_VACANCY_LIMIT, ManagerConfig,
};
pub use error::{ConfigError, Error, Result};
pub use future::{Clock, Future, Promise, Status};
pub use latch::{Latch, LatchGuard};
pub use manager::{Handle, Manager, ManagerStats, Parker, RemoteHandle, ThreadParker};
pub use semaphore::{AsyncSemaphore, SemaphoreShare};
pub use task::TaskHandle;
pub use timer::{Countdown, Counter, Stopwatch};
pub use util::{SpinGuard, SpinLock, WaitBudget};

/// The types most programs need.
pub mod prelude {
    pub use crate::{
        AsyncChannel, AsyncFuture, AsyncPromise, Channel, Clock, Error, Future, Handle, Manager,
        Promise, TaskHandle,
    };
}
