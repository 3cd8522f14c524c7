//! Test harness for the rt-share relay.
//!
//! Two ways to drive a [`Hub`](rtshare_server::Hub) from tests:
//!
//! - [`TestPeer`]: a client connected over an in-memory duplex pipe to a hub
//!   running in the same runtime. Fast, and works with tokio's paused clock.
//! - [`run_sim_server`] / [`SimClient`]: the relay served over turmoil's
//!   simulated TCP, for end-to-end tests across hosts with deterministic
//!   timing and injected network faults.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod faults;
mod peer;
mod sim_server;

pub use error::HarnessError;
pub use faults::FaultyWriter;
pub use peer::{RECV_TIMEOUT, TestPeer};
pub use sim_server::{SimClient, run_sim_server};
