//! Address source.
//!
//! Sessions never touch the address book directly, every access is mediated
//! by the node so address deconfliction and channel counting stay
//! consistent. The [`Hosts`] trait is the seam an application plugs its own
//! (persistent) address book into, [`HostPool`] is the in-memory default.

use bitcoin_peers_connection::{Address, Error};
use log::debug;
use rand::Rng;
use std::collections::HashSet;
use std::net::SocketAddr;

/// An address book consumed by the node.
pub trait Hosts: Send {
    /// Load the address book.
    fn start(&mut self) -> Result<(), Error>;

    /// Persist the address book.
    fn stop(&mut self) -> Result<(), Error>;

    /// Check out one candidate, [`Error::AddressNotFound`] if none remain.
    fn take(&mut self) -> Result<Address, Error>;

    /// Check a previously taken candidate back in.
    fn restore(&mut self, address: Address);

    /// Up to `limit` candidates, without checking them out.
    fn fetch(&self, limit: usize) -> Vec<Address>;

    /// Store received addresses, returns how many were new.
    fn save(&mut self, addresses: &[Address]) -> usize;

    /// Reserve the authority of a new channel, `false` if already reserved.
    fn reserve(&mut self, authority: SocketAddr) -> bool;

    /// Release a reservation, `false` if there was none.
    fn unreserve(&mut self, authority: SocketAddr) -> bool;

    /// Number of stored candidates.
    fn count(&self) -> usize;

    /// Number of reserved authorities.
    fn reserved(&self) -> usize;
}

/// Bounded in-memory address book.
///
/// Addresses are de-duplicated on ip and port, and [`take`] hands out a
/// random candidate so outbound slots spread over the pool.
///
/// [`take`]: Hosts::take
#[derive(Debug, Default)]
pub struct HostPool {
    capacity: usize,
    addresses: Vec<Address>,
    index: HashSet<Address>,
    reservations: HashSet<SocketAddr>,
}

impl HostPool {
    /// An empty pool holding at most `capacity` addresses.
    pub fn new(capacity: usize) -> Self {
        HostPool {
            capacity,
            ..Default::default()
        }
    }

    /// A pool pre-loaded with `addresses`, which bypass the capacity bound.
    pub fn with_addresses<I: IntoIterator<Item = Address>>(capacity: usize, addresses: I) -> Self {
        let mut pool = HostPool::new(capacity);
        for address in addresses {
            pool.insert(address);
        }
        pool
    }

    fn insert(&mut self, address: Address) -> bool {
        if !self.index.insert(address) {
            return false;
        }

        self.addresses.push(address);
        true
    }
}

impl Hosts for HostPool {
    fn start(&mut self) -> Result<(), Error> {
        debug!("Address pool started with {} addresses", self.addresses.len());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        debug!("Address pool stopped with {} addresses", self.addresses.len());
        Ok(())
    }

    fn take(&mut self) -> Result<Address, Error> {
        if self.addresses.is_empty() {
            return Err(Error::AddressNotFound);
        }

        let position = rand::thread_rng().gen_range(0..self.addresses.len());
        let address = self.addresses.swap_remove(position);
        self.index.remove(&address);
        Ok(address)
    }

    fn restore(&mut self, address: Address) {
        if self.addresses.len() < self.capacity {
            self.insert(address);
        }
    }

    fn fetch(&self, limit: usize) -> Vec<Address> {
        self.addresses.iter().take(limit).copied().collect()
    }

    fn save(&mut self, addresses: &[Address]) -> usize {
        let mut saved = 0;
        for address in addresses {
            if self.addresses.len() >= self.capacity {
                break;
            }

            if address.port != 0 && self.insert(*address) {
                saved += 1;
            }
        }
        saved
    }

    fn reserve(&mut self, authority: SocketAddr) -> bool {
        self.reservations.insert(authority)
    }

    fn unreserve(&mut self, authority: SocketAddr) -> bool {
        self.reservations.remove(&authority)
    }

    fn count(&self) -> usize {
        self.addresses.len()
    }

    fn reserved(&self) -> usize {
        self.reservations.len()
    }
}
