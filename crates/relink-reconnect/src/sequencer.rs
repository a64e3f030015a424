//! Picks the address for each connect attempt.
//!
//! Priority, highest first:
//!
//! 1. a pending override in the connection state (a one-shot override is
//!    consumed, a sticky one is kept)
//! 2. the sticky `reconnect_url` from the options
//! 3. the rotation over `[base] ++ failover_urls`
//!
//! The rotation cursor is reduced modulo the current list length when it is
//! read, so a failover list that grows between attempts continues at the next
//! slot rather than jumping back to the base address.

use crate::options::ConnectionOptions;
use crate::state::ConnectionState;
use relink_core::Address;

/// The target of the initial attempt: always the base address.
pub fn first(state: &mut ConnectionState, base: &Address) -> Address {
    state.failover_cursor = 1;
    base.clone()
}

/// The target of the next retry.
pub fn next(state: &mut ConnectionState, base: &Address, options: &ConnectionOptions) -> Address {
    if let Some(address) = state.one_shot.take() {
        return address;
    }
    if let Some(address) = &state.sticky {
        return address.clone();
    }
    if let Some(address) = options.reconnect_url() {
        return address.clone();
    }

    let failover = options.failover_urls();
    let slot = state.failover_cursor % (failover.len() + 1);
    state.failover_cursor = slot + 1;

    match slot {
        0 => base.clone(),
        n => failover[n - 1].clone(),
    }
}
