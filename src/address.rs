//! Loopback address allocation for concurrently running instances.
//!
//! Every instance listens on the same well-known ports (AMI, SIP), so each
//! one gets its own `127.x.y.z` address instead. The allocator is a plain
//! octet counter behind a mutex:
//!
//! - Addresses are never returned to the pool, even after an instance stops.
//! - Once the counter runs past its last mutable octet the allocator is
//!   depleted for good, and every later call fails.
//!
//! [`AddressAllocator::reserve`] additionally holds a listening socket on
//! the allocated address so collisions with other processes (e.g. a
//! parallel test run) are detected and skipped.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::constants::{BASE_ADDRESS, MAX_OCTET, MUTABLE_OCTETS};
use crate::error::{Error, Result};

/// Counter state, mutated atomically under the allocator's lock.
#[derive(Debug)]
struct PoolState {
    octets: [u8; 4],
    depleted: bool,
}

/// Hands out unique loopback addresses.
///
/// Construct one per test run and share it through `Arc`, or use
/// [`AddressAllocator::shared`] for the process-wide pool.
#[derive(Debug)]
pub struct AddressAllocator {
    state: Mutex<PoolState>,
    /// Index of the highest octet the counter may carry into.
    first_mutable: usize,
}

static SHARED: LazyLock<Arc<AddressAllocator>> =
    LazyLock::new(|| Arc::new(AddressAllocator::new(BASE_ADDRESS)));

impl AddressAllocator {
    /// Create an allocator seeded at `base`; the first address is `base + 1`.
    #[must_use]
    pub fn new(base: Ipv4Addr) -> Self {
        Self::with_mutable_octets(base, MUTABLE_OCTETS)
    }

    /// Create an allocator that only advances the last `count` octets.
    ///
    /// `count` is clamped to `1..=3`; the first octet never changes.
    #[must_use]
    pub fn with_mutable_octets(base: Ipv4Addr, count: usize) -> Self {
        let count = count.clamp(1, MUTABLE_OCTETS);
        Self {
            state: Mutex::new(PoolState {
                octets: base.octets(),
                depleted: false,
            }),
            first_mutable: 4 - count,
        }
    }

    /// The process-wide allocator seeded at `127.0.0.0`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Allocate the next address.
    ///
    /// Increments the last octet; an octet that passes [`MAX_OCTET`] carries
    /// into the one above it and the octets below restart at 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressSpaceExhausted`] once the carry passes the
    /// highest mutable octet, and on every call after that.
    pub fn next_address(&self) -> Result<Ipv4Addr> {
        let mut state = self.state.lock();
        if state.depleted {
            return Err(Error::AddressSpaceExhausted);
        }

        for idx in (self.first_mutable..4).rev() {
            if state.octets[idx] < MAX_OCTET {
                state.octets[idx] += 1;
                for lower in &mut state.octets[idx + 1..] {
                    *lower = 1;
                }
                return Ok(Ipv4Addr::from(state.octets));
            }
        }

        state.depleted = true;
        Err(Error::AddressSpaceExhausted)
    }

    /// Returns true once the pool has been exhausted.
    #[must_use]
    pub fn is_depleted(&self) -> bool {
        self.state.lock().depleted
    }

    /// Allocate an address and hold `port` open on it.
    ///
    /// Addresses whose port is already bound elsewhere are skipped. Pass
    /// port 0 to allocate without contending for a fixed port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressSpaceExhausted`] when the pool runs out, or
    /// [`Error::AddressBind`] for any socket error other than `AddrInUse`.
    pub fn reserve(&self, port: u16) -> Result<AddressReservation> {
        loop {
            let address = self.next_address()?;
            match TcpListener::bind(SocketAddrV4::new(address, port)) {
                Ok(listener) => {
                    info!(%address, port, "Reserved loopback address");
                    return Ok(AddressReservation {
                        address,
                        _hold: listener,
                    });
                },
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    debug!(%address, port, "Address in use, trying next");
                },
                Err(source) => {
                    return Err(Error::AddressBind {
                        address,
                        port,
                        source,
                    });
                },
            }
        }
    }
}

impl Default for AddressAllocator {
    fn default() -> Self {
        Self::new(BASE_ADDRESS)
    }
}

/// An allocated address together with the socket that holds it.
///
/// The socket stays bound until the reservation is dropped; the address
/// itself is never handed out again by the same allocator.
#[derive(Debug)]
pub struct AddressReservation {
    address: Ipv4Addr,
    _hold: TcpListener,
}

impl AddressReservation {
    /// The reserved address.
    #[must_use]
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }
}
