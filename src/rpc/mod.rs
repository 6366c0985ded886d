/// RPC boundary between the daemon and its device-frontend clients.
///
/// Two independent services on two Unix sockets: the world-writable
/// unprivileged service for consumers, and the root-only privileged
/// service for pool management. Alongside the sockets, a status shared
/// memory segment plus a named semaphore broadcast every state change to
/// passive observers.
pub mod client;
pub mod protocol;
pub mod server;
pub mod shm;

#[cfg(test)]
mod rpc_tests;

pub use client::{EsdmClient, EsdmPrivClient};
pub use protocol::{PrivRequest, Response, UnprivRequest};
pub use server::RpcService;
pub use shm::{StatusPublisher, StatusReader};

use std::path::PathBuf;

pub const UNPRIV_SOCKET: &str = "/var/run/esdm-rpc-unpriv";
pub const PRIV_SOCKET: &str = "/var/run/esdm-rpc-priv";

/// Socket paths, with the `-testmode` suffix applied when requested.
pub fn socket_paths(test_mode: bool) -> (PathBuf, PathBuf) {
    if test_mode {
        (
            PathBuf::from(format!("{UNPRIV_SOCKET}-testmode")),
            PathBuf::from(format!("{PRIV_SOCKET}-testmode")),
        )
    } else {
        (PathBuf::from(UNPRIV_SOCKET), PathBuf::from(PRIV_SOCKET))
    }
}
