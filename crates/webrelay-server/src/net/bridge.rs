//! Virtual network bridge
//!
//! Exposes per-session datagram channels to the embedded engine as a flat
//! packet-switched network: inbound reads from every session land in one
//! bounded queue, outbound sends are routed by address slot.

use super::address_table::{AddressError, AddressTable, Reservation};
use super::endpoint::{DatagramReader, DatagramWriter};
use super::queue::DatagramQueue;
use super::{Datagram, VirtualAddr, MAX_DATAGRAM_SIZE};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct VirtualNetwork {
    table: AddressTable,
    queue: DatagramQueue,
}

/// Address slot held for the lifetime of one session. Dropping the lease
/// releases the slot, so it is released exactly once.
pub struct AddressLease {
    network: Arc<VirtualNetwork>,
    reservation: Reservation,
}

impl AddressLease {
    pub fn addr(&self) -> VirtualAddr {
        self.reservation.addr()
    }

    pub fn reservation(&self) -> Reservation {
        self.reservation
    }
}

impl Drop for AddressLease {
    fn drop(&mut self) {
        if self.network.table.unbind(&self.reservation) {
            tracing::debug!("Released address {}", self.reservation.addr());
        }
    }
}

impl VirtualNetwork {
    pub fn new(address_capacity: usize, queue_capacity: usize) -> Result<Self, AddressError> {
        Ok(Self {
            table: AddressTable::new(address_capacity)?,
            queue: DatagramQueue::new(queue_capacity),
        })
    }

    pub fn table(&self) -> &AddressTable {
        &self.table
    }

    pub fn queue(&self) -> &DatagramQueue {
        &self.queue
    }

    /// Reserve an address for a new session
    pub fn reserve(self: &Arc<Self>) -> Result<AddressLease, AddressError> {
        let reservation = self.table.reserve()?;
        tracing::debug!("Reserved address {}", reservation.addr());
        Ok(AddressLease {
            network: Arc::clone(self),
            reservation,
        })
    }

    /// Bind the session's outbound endpoint once it is ready
    pub fn bind(
        &self,
        reservation: &Reservation,
        writer: Arc<dyn DatagramWriter>,
    ) -> Result<(), AddressError> {
        self.table.bind(reservation, writer)?;
        tracing::info!("Address {} bound", reservation.addr());
        Ok(())
    }

    /// Start the read worker for a session's inbound endpoint.
    ///
    /// The worker ends when a read fails, which happens when the session's
    /// transport is closed. Datagrams read while the slot is not bound are
    /// discarded: a reserved-but-unbound slot carries no traffic.
    pub fn attach_inbound(
        self: &Arc<Self>,
        reservation: Reservation,
        reader: Arc<dyn DatagramReader>,
    ) -> JoinHandle<()> {
        let network = Arc::clone(self);
        let producer = self.queue.producer();
        let addr = reservation.addr();

        tracing::info!("Attaching inbound reader for address {}", addr);

        tokio::spawn(async move {
            let mut received = 0u64;
            loop {
                let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
                let n = match reader.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::info!(
                            "Inbound channel for {} closed after {} datagrams: {}",
                            addr,
                            received,
                            e
                        );
                        return;
                    }
                };

                if !network.table.is_bound(&reservation) {
                    tracing::debug!("Dropping datagram from unbound address {}", addr);
                    continue;
                }

                buf.truncate(n);
                received += 1;
                producer.push(Datagram::new(addr, Bytes::from(buf))).await;
            }
        })
    }

    /// Engine receive: one datagram or `None` after `timeout`
    pub async fn poll(&self, timeout: Duration) -> Option<Datagram> {
        self.queue.poll(timeout).await
    }

    /// Engine send: best effort, silently dropped if the address is not bound
    pub async fn send(&self, datagram: Datagram) {
        let writer = match self.table.lookup(datagram.addr.index()) {
            Ok(writer) => writer,
            Err(_) => {
                tracing::trace!("Dropping datagram for unbound address {}", datagram.addr);
                return;
            }
        };

        if let Err(e) = writer.write(&datagram.payload).await {
            tracing::debug!("Failed to deliver datagram to {}: {}", datagram.addr, e);
        }
    }
}
