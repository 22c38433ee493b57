//! arbord — the Arbor transport engine.
//!
//! The daemon binary is a thin bootstrap over this library; the integration
//! tests drive several engines in one process through the same API.

pub mod keepalive;
pub mod transport;

pub use keepalive::keepalive_loop;
pub use transport::{listener_loop, reaper_loop, EngineTasks, RequestError, Transport};
