//! Bounded data movers between tasks.
//!
//! - [`Channel`]: one thread, ring buffer, exact submission order.
//! - [`AsyncChannel`]: any threads, linked segments under a spin lock,
//!   order kept for one producer and one consumer.

mod async_chan;
mod local;
mod ring;

pub use async_chan::{AsyncChannel, ChannelShare};
pub use local::Channel;
