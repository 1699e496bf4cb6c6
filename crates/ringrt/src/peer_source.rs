//! The random peer source: an external collaborator that hands RM-TMan
//! a uniformly sampled view of the overlay ("cyclon cache"). The core
//! only ever consumes the response; this module stops at the trait
//! boundary plus a minimal in-memory stand-in for tests and the demo CLI.

use rand::seq::SliceRandom;

use crate::neighborhood::{NodeDescriptor, ProcessAddress};

/// Where RM-TMan gets its random view from. Responses are delivered by
/// calling `reply_to` asynchronously (from the caller's perspective);
/// they may be unordered, may contain duplicates or `self`, and an empty
/// response is legal.
pub trait PeerSource<A: ProcessAddress>: Send + Sync {
    fn request(&self, n: usize, reply_to: &mut dyn FnMut(Vec<NodeDescriptor<A>>));
}

/// An in-memory reference implementation: a fixed pool sampled without
/// replacement, delivered synchronously. Good enough for tests and the
/// `ringctl` demo; a real Cyclon protocol implementation is out of scope.
pub struct CyclonCacheStub<A: ProcessAddress> {
    pool: parking_lot::Mutex<Vec<NodeDescriptor<A>>>,
}

impl<A: ProcessAddress> CyclonCacheStub<A> {
    pub fn new(pool: Vec<NodeDescriptor<A>>) -> Self {
        CyclonCacheStub {
            pool: parking_lot::Mutex::new(pool),
        }
    }

    pub fn set_pool(&self, pool: Vec<NodeDescriptor<A>>) {
        *self.pool.lock() = pool;
    }
}

impl<A: ProcessAddress> PeerSource<A> for CyclonCacheStub<A> {
    fn request(&self, n: usize, reply_to: &mut dyn FnMut(Vec<NodeDescriptor<A>>)) {
        let mut rng = rand::rng();
        let mut sample: Vec<NodeDescriptor<A>> = self.pool.lock().clone();
        sample.shuffle(&mut rng);
        sample.truncate(n);
        reply_to(sample);
    }
}
