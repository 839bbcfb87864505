//! Per-mutator rendezvous channel.
//!
//! One channel exists per live mutator. The collector raises `pending` to
//! request a handshake; the mutator answers by publishing its dirty flag
//! (and its infants when requested), clearing `pending`, and notifying the
//! condvar. A mutator that leaves marks the channel `abandoned` so the
//! collector can adopt whatever it left behind.
//!
//! The channel mutex is the only blocking point a mutator ever has with the
//! collector, and it is held only for the duration of the exchange.

use parking_lot::{Condvar, Mutex};

use crate::infants::ChunkedDeque;
use crate::object::GcRef;

#[derive(Default)]
pub(crate) struct ChannelState {
    /// The owning mutator has left; the collector adopts `infants` and
    /// releases the channel.
    pub abandoned: bool,
    /// Raised by the collector to request a handshake.
    pub pending: bool,
    /// The mutator shaded at least one object white→gray since this flag was
    /// last observed.
    pub dirty: bool,
    /// Raised together with `pending` when the collector also wants the
    /// mutator's allocation list.
    pub request_infants: bool,
    /// Objects the mutator allocated since its last handoff.
    pub infants: ChunkedDeque<GcRef>,
}

pub(crate) struct Channel {
    pub state: Mutex<ChannelState>,
    pub cv: Condvar,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            cv: Condvar::new(),
        }
    }
}
