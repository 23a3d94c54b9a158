//! Virtual packet-switched network between sessions and the embedded engine

mod address;
pub mod address_table;
mod bridge;
pub mod endpoint;
pub mod queue;
#[cfg(test)]
pub(crate) mod testing;

pub use address::{Datagram, VirtualAddr, MAX_DATAGRAM_SIZE};
pub use address_table::{AddressError, AddressTable, Reservation, SlotState};
pub use bridge::{AddressLease, VirtualNetwork};
pub use endpoint::{DatagramReader, DatagramWriter};
pub use queue::DatagramQueue;
