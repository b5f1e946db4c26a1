//! End-to-end tests over the gRPC relay
//!
//! This test suite validates:
//! - message delivery between clients through a relay
//! - sync replies and health probes answered by the relay
//! - redundancy-aware routing on the wire
//! - control messages applied by auto-mode receivers
//! - the command surface against a live relay

pub mod test_utils;

#[cfg(test)]
mod relay_tests;

#[cfg(test)]
mod routing_tests;

#[cfg(test)]
mod command_tests;
