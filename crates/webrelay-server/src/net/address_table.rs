//! Fixed-capacity slot allocator mapping a small integer address to a
//! bound datagram endpoint.
//!
//! Slot lifecycle: `Free -> Reserved -> Bound -> Free`. Every reservation
//! gets a fresh generation number so a stale holder (a late `on_open`
//! callback, a read worker outliving its session) can never touch a slot
//! that has since been handed to another session.

use super::endpoint::DatagramWriter;
use super::VirtualAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Addresses are one octet wide, so no table can hold more slots than this
pub const MAX_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address space exhausted ({capacity} slots in use)")]
    Exhausted { capacity: usize },

    #[error("Address {0} is not bound")]
    NotBound(u8),

    #[error("Address {0} is not reserved by this holder")]
    StaleReservation(u8),

    #[error("Invalid address table capacity {0} (must be 1..=256)")]
    InvalidCapacity(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Reserved,
    Bound,
}

/// Proof of one occupancy of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    addr: VirtualAddr,
    generation: u64,
}

impl Reservation {
    pub fn addr(&self) -> VirtualAddr {
        self.addr
    }

    pub fn index(&self) -> u8 {
        self.addr.index()
    }
}

#[derive(Default)]
enum Occupancy {
    #[default]
    Free,
    Reserved,
    Bound(Arc<dyn DatagramWriter>),
}

#[derive(Default)]
struct Slot {
    occupancy: Occupancy,
    generation: u64,
}

impl Slot {
    fn state(&self) -> SlotState {
        match self.occupancy {
            Occupancy::Free => SlotState::Free,
            Occupancy::Reserved => SlotState::Reserved,
            Occupancy::Bound(_) => SlotState::Bound,
        }
    }

    fn held_by(&self, reservation: &Reservation) -> bool {
        !matches!(self.occupancy, Occupancy::Free) && self.generation == reservation.generation
    }
}

struct TableState {
    slots: Vec<Slot>,
    next_generation: u64,
}

pub struct AddressTable {
    state: Mutex<TableState>,
}

impl AddressTable {
    pub fn new(capacity: usize) -> Result<Self, AddressError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(AddressError::InvalidCapacity(capacity));
        }

        let slots = (0..capacity).map(|_| Slot::default()).collect();
        Ok(Self {
            state: Mutex::new(TableState {
                slots,
                next_generation: 1,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }

    /// Claim the lowest free slot
    pub fn reserve(&self) -> Result<Reservation, AddressError> {
        let mut state = self.lock();
        let capacity = state.slots.len();

        let index = state
            .slots
            .iter()
            .position(|slot| matches!(slot.occupancy, Occupancy::Free))
            .ok_or(AddressError::Exhausted { capacity })?;

        let generation = state.next_generation;
        state.next_generation += 1;

        let slot = &mut state.slots[index];
        slot.occupancy = Occupancy::Reserved;
        slot.generation = generation;

        // index < MAX_CAPACITY, so it fits the routing octet
        Ok(Reservation {
            addr: VirtualAddr::new(index as u8),
            generation,
        })
    }

    /// Attach the outbound endpoint. Binding an already bound slot replaces
    /// its endpoint.
    pub fn bind(
        &self,
        reservation: &Reservation,
        writer: Arc<dyn DatagramWriter>,
    ) -> Result<(), AddressError> {
        let mut state = self.lock();
        match state.slots.get_mut(reservation.index() as usize) {
            Some(slot) if slot.held_by(reservation) => {
                slot.occupancy = Occupancy::Bound(writer);
                Ok(())
            }
            _ => Err(AddressError::StaleReservation(reservation.index())),
        }
    }

    /// Return the slot to `Free` and drop its endpoint.
    ///
    /// Returns false if the reservation no longer holds the slot.
    pub fn unbind(&self, reservation: &Reservation) -> bool {
        let mut state = self.lock();
        match state.slots.get_mut(reservation.index() as usize) {
            Some(slot) if slot.held_by(reservation) => {
                slot.occupancy = Occupancy::Free;
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, index: u8) -> Result<Arc<dyn DatagramWriter>, AddressError> {
        let state = self.lock();
        match state.slots.get(index as usize).map(|slot| &slot.occupancy) {
            Some(Occupancy::Bound(writer)) => Ok(Arc::clone(writer)),
            _ => Err(AddressError::NotBound(index)),
        }
    }

    /// True while the reservation holds a bound slot
    pub fn is_bound(&self, reservation: &Reservation) -> bool {
        let state = self.lock();
        state
            .slots
            .get(reservation.index() as usize)
            .is_some_and(|slot| slot.held_by(reservation) && slot.state() == SlotState::Bound)
    }

    pub fn state(&self, index: u8) -> Option<SlotState> {
        self.lock().slots.get(index as usize).map(Slot::state)
    }

    /// Number of slots that are reserved or bound
    pub fn occupied(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter(|slot| slot.state() != SlotState::Free)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::io;

    struct NullWriter;

    #[async_trait]
    impl DatagramWriter for NullWriter {
        async fn write(&self, payload: &Bytes) -> io::Result<usize> {
            Ok(payload.len())
        }
    }

    #[test]
    fn test_capacity_bounds() {
        assert_eq!(
            AddressTable::new(0).err(),
            Some(AddressError::InvalidCapacity(0))
        );
        assert_eq!(
            AddressTable::new(257).err(),
            Some(AddressError::InvalidCapacity(257))
        );
        assert_eq!(AddressTable::new(256).unwrap().capacity(), 256);
    }

    #[test]
    fn test_slot_lifecycle() {
        let table = AddressTable::new(4).unwrap();
        let reservation = table.reserve().unwrap();
        let index = reservation.index();

        assert_eq!(table.state(index), Some(SlotState::Reserved));
        assert_eq!(table.lookup(index).err(), Some(AddressError::NotBound(index)));
        assert!(!table.is_bound(&reservation));

        table.bind(&reservation, Arc::new(NullWriter)).unwrap();
        assert_eq!(table.state(index), Some(SlotState::Bound));
        assert!(table.lookup(index).is_ok());
        assert!(table.is_bound(&reservation));

        assert!(table.unbind(&reservation));
        assert_eq!(table.state(index), Some(SlotState::Free));
        assert!(table.lookup(index).is_err());
        assert!(!table.unbind(&reservation));
    }

    #[test]
    fn test_exhaustion_after_capacity_reservations() {
        let table = AddressTable::new(128).unwrap();
        let reservations: Vec<_> = (0..128).map(|_| table.reserve().unwrap()).collect();

        assert_eq!(
            table.reserve().err(),
            Some(AddressError::Exhausted { capacity: 128 })
        );
        assert_eq!(table.occupied(), 128);

        let mut indices: Vec<u8> = reservations.iter().map(Reservation::index).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 128);

        // A failed reservation leaks nothing; one release makes room again
        assert!(table.unbind(&reservations[42]));
        assert_eq!(table.occupied(), 127);
        assert_eq!(table.reserve().unwrap().index(), 42);
    }

    #[test]
    fn test_stale_reservation_cannot_touch_reused_slot() {
        let table = AddressTable::new(1).unwrap();
        let old = table.reserve().unwrap();
        assert!(table.unbind(&old));

        let new = table.reserve().unwrap();
        assert_eq!(old.index(), new.index());

        assert_eq!(
            table.bind(&old, Arc::new(NullWriter)).err(),
            Some(AddressError::StaleReservation(old.index()))
        );
        assert!(!table.unbind(&old));
        assert_eq!(table.state(new.index()), Some(SlotState::Reserved));
    }

    #[test]
    fn test_lookup_out_of_range_is_not_bound() {
        let table = AddressTable::new(2).unwrap();
        assert_eq!(table.lookup(200).err(), Some(AddressError::NotBound(200)));
    }
}
