#![allow(dead_code, clippy::unwrap_used)]

pub mod range_server;
pub mod socket_guard;
pub mod stalling_server;
