//! Host for the embedded packet-driven engine
//!
//! The engine is synchronous and runs on its own OS thread. It reaches the
//! virtual network only through the two calls on [`EngineNetwork`], which
//! block on the async bridge through a runtime handle.

use crate::net::{Datagram, VirtualNetwork};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;

/// Receive/send callbacks registered with the engine
#[derive(Clone)]
pub struct EngineNetwork {
    network: Arc<VirtualNetwork>,
    runtime: Handle,
    poll_timeout: Duration,
}

impl EngineNetwork {
    pub fn new(network: Arc<VirtualNetwork>, runtime: Handle, poll_timeout: Duration) -> Self {
        Self {
            network,
            runtime,
            poll_timeout,
        }
    }

    /// Next datagram from any session, or `None` after the poll timeout
    pub fn recvfrom(&self) -> Option<Datagram> {
        self.recvfrom_timeout(self.poll_timeout)
    }

    pub fn recvfrom_timeout(&self, timeout: Duration) -> Option<Datagram> {
        self.runtime.block_on(self.network.poll(timeout))
    }

    /// Deliver to the session bound at the datagram's address; dropped if none
    pub fn sendto(&self, datagram: Datagram) {
        self.runtime.block_on(self.network.send(datagram))
    }
}

pub trait Engine: Send + 'static {
    fn name(&self) -> &str;

    /// Runs until the engine decides to stop
    fn run(&mut self, net: EngineNetwork);
}

/// Returns every datagram to the address it came from
pub struct EchoEngine {
    running: Arc<AtomicBool>,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Clearing the flag stops the engine after its current poll
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    fn run(&mut self, net: EngineNetwork) {
        let mut echoed = 0u64;
        while self.running.load(Ordering::SeqCst) {
            let Some(datagram) = net.recvfrom() else {
                continue;
            };

            net.sendto(datagram);
            echoed += 1;
            if echoed % 1000 == 1 {
                tracing::debug!("Echo engine returned {} datagrams", echoed);
            }
        }
        tracing::info!("Echo engine stopped after {} datagrams", echoed);
    }
}

/// Start `engine` on a dedicated thread
pub fn spawn_engine<E: Engine>(mut engine: E, net: EngineNetwork) -> std::io::Result<JoinHandle<()>> {
    let name = format!("engine-{}", engine.name());
    std::thread::Builder::new().name(name).spawn(move || {
        tracing::info!("Engine {} started", engine.name());
        engine.run(net);
    })
}
