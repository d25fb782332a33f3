//! Runtime-agnostic async synchronization primitives
//!
//! The primitives in this crate only rely on [`std::task::Waker`], so they
//! work under any executor (compio, tokio, `futures::executor`) and from
//! plain threads.
//!
//! # Primitives
//!
//! - [`Gate`] - Reusable open/closed latch; `open` releases every waiter
//!
//! # Example
//!
//! ```rust,no_run
//! use latchpool_sync::Gate;
//!
//! #[compio::main]
//! async fn main() {
//!     let ready = Gate::default();
//!
//!     let waiter = ready.clone();
//!     let task = compio::runtime::spawn(async move {
//!         waiter.wait().await;
//!         println!("Gate opened");
//!     });
//!
//!     ready.open();
//!     task.await.unwrap();
//! }
//! ```

mod gate;
mod release;

pub use gate::{Gate, GateWait};
