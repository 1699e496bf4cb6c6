//! The deterministic protocol scheduler itself: a registry of per-trace
//! state, serialized by a single mutex -- matching the spec's "ProtoSched
//! owns the in-flight queue set and trace map, serialized by being itself
//! a single message loop."

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::actor::ProcessId;
use crate::error::SchedError;

use super::trace::{Channel, DeliveredRecord, TraceInfos, TraceState, TraceStatus};

pub type TraceId = String;

pub fn default_trace() -> TraceId {
    "default".to_string()
}

/// One delivery step's outcome, returned so the caller can perform the
/// actual send (ProtoSched itself does not own a `MessageBus`).
pub struct DeliveryStep<M> {
    pub src: ProcessId,
    pub dst: ProcessId,
    pub msg: M,
    pub fan_out: usize,
}

struct Registry<M> {
    traces: FxHashMap<TraceId, TraceState<M>>,
}

/// The scheduler. Generic over the captured message payload type; a
/// process instrumenting more than one message type runs more than one
/// `ProtoSched<M>` (or erases to a common envelope type upstream).
pub struct ProtoSched<M> {
    inner: Mutex<Registry<M>>,
    drained: Condvar,
    released: Condvar,
}

impl<M> ProtoSched<M> {
    pub fn new() -> Self {
        ProtoSched {
            inner: Mutex::new(Registry {
                traces: FxHashMap::default(),
            }),
            drained: Condvar::new(),
            released: Condvar::new(),
        }
    }

    /// Declare that `n` threads will participate in `trace`. Fails if
    /// called twice, or if any thread has already begun.
    pub fn thread_num(&self, trace: &str, n: u32) -> Result<(), SchedError> {
        let mut reg = self.inner.lock();
        let st = reg.traces.entry(trace.to_string()).or_default();
        if st.registered_threads.is_some() {
            return Err(SchedError::ThreadNumCalledTwice);
        }
        if st.threads_begun > 0 {
            return Err(SchedError::ThreadBeginAfterRunning);
        }
        st.registered_threads = Some(n);
        Ok(())
    }

    /// Enqueue the calling thread. Once `threads_begun == thread_num`,
    /// the trace transitions `new -> running`.
    pub fn thread_begin(&self, trace: &str) -> Result<(), SchedError> {
        let mut reg = self.inner.lock();
        let st = reg.traces.entry(trace.to_string()).or_default();
        if st.status != TraceStatus::New {
            return Err(SchedError::ThreadBeginAfterRunning);
        }
        st.threads_begun += 1;
        if Some(st.threads_begun) == st.registered_threads {
            st.status = TraceStatus::Running;
        }
        drop(reg);
        crate::infection::set(trace);
        Ok(())
    }

    /// Capture a message as infected, queueing it on `(src, dst)`'s
    /// channel rather than delivering it directly.
    pub fn capture(&self, trace: &str, src: ProcessId, dst: ProcessId, msg: M) {
        let mut reg = self.inner.lock();
        let st = reg.traces.entry(trace.to_string()).or_default();
        st.capture(src, dst, msg);
    }

    /// Pick a non-empty channel uniformly at random, dequeue its head, and
    /// return the delivery for the caller to actually perform. Returns
    /// `None` once the queue set is empty (the trace has transitioned to
    /// `stopped`).
    pub fn next_delivery(&self, trace: &str) -> Option<DeliveryStep<M>> {
        let mut reg = self.inner.lock();
        let st = reg.traces.get_mut(trace)?;
        if st.status != TraceStatus::Running {
            return None;
        }

        let non_empty: Vec<Channel> = st
            .channels
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(c, _)| *c)
            .collect();

        if non_empty.is_empty() {
            st.status = TraceStatus::Stopped;
            drop(reg);
            self.drained.notify_all();
            return None;
        }

        let k = non_empty.len();
        let chosen = non_empty[rand::rng().random_range(0..k)];
        let msg = st.channels.get_mut(&chosen).unwrap().pop_front().unwrap();

        st.num_possible_executions = st.num_possible_executions.saturating_mul(k as u128);
        st.nums_chosen_from.push(k);
        st.delivered_log.push(DeliveredRecord {
            src: chosen.0,
            dst: chosen.1,
        });
        st.status = TraceStatus::Delivered { to: chosen.1 };
        drop(reg);
        self.released.notify_all();

        Some(DeliveryStep {
            src: chosen.0,
            dst: chosen.1,
            msg,
            fan_out: k,
        })
    }

    /// Block the calling thread until ProtoSched releases it to run `me`'s
    /// next handler call, then mark the thread infected by `trace`. Returns
    /// immediately (without infecting) once the trace has stopped, since
    /// there is nothing left to be released for.
    pub fn thread_yield(&self, trace: &str, me: ProcessId) -> Result<(), SchedError> {
        let mut reg = self.inner.lock();
        loop {
            match reg.traces.get(trace) {
                None => return Err(SchedError::TraceNotFound),
                Some(st) => match st.status {
                    TraceStatus::Delivered { to } if to == me => {
                        drop(reg);
                        crate::infection::set(trace);
                        return Ok(());
                    }
                    TraceStatus::Stopped => return Ok(()),
                    _ => {}
                },
            }
            self.released.wait(&mut reg);
        }
    }

    /// Whether `trace` currently has a delivery in flight to `dst`. Used by
    /// the monitor-polling side of a delivery to notice the delivery has
    /// already resolved through the normal completion path.
    pub fn is_delivering_to(&self, trace: &str, dst: ProcessId) -> bool {
        let reg = self.inner.lock();
        matches!(
            reg.traces.get(trace).map(|st| st.status),
            Some(TraceStatus::Delivered { to }) if to == dst
        )
    }

    /// The delivered handler signaled completion (`on_handler_done`), a
    /// shepherd reported a send error, or a monitor reported the
    /// destination's death -- all three demote the trace back to
    /// `running` per the spec.
    pub fn on_handler_done(&self, trace: &str) {
        let mut reg = self.inner.lock();
        if let Some(st) = reg.traces.get_mut(trace) {
            if matches!(st.status, TraceStatus::Delivered { .. }) {
                st.status = TraceStatus::Running;
            }
        }
    }

    /// An infected thread signals completion and clears its infection.
    pub fn thread_end(&self, trace: &str) {
        self.on_handler_done(trace);
        crate::infection::clear();
    }

    /// Block until the trace's queue set drains (`stopped`).
    pub fn wait_for_end(&self, trace: &str) -> Result<(), SchedError> {
        let mut reg = self.inner.lock();
        loop {
            match reg.traces.get(trace) {
                None => return Err(SchedError::TraceNotFound),
                Some(st) if matches!(st.status, TraceStatus::Delivered { .. }) => {
                    return Err(SchedError::WaitWhileInfected);
                }
                Some(st) if st.status == TraceStatus::Stopped => return Ok(()),
                _ => self.drained.wait(&mut reg),
            }
        }
    }

    pub fn get_infos(&self, trace: &str) -> Result<TraceInfos, SchedError> {
        let reg = self.inner.lock();
        reg.traces
            .get(trace)
            .map(|st| st.infos())
            .ok_or(SchedError::TraceNotFound)
    }

    /// Drain any remaining queued messages directly, bypassing ordering,
    /// and discard the trace's state. A delivery in flight makes this
    /// unsafe to do underfoot, so it fails rather than silently deferring.
    pub fn cleanup(&self, trace: &str) -> Result<(), SchedError> {
        let mut reg = self.inner.lock();
        match reg.traces.get_mut(trace) {
            None => Err(SchedError::TraceNotFound),
            Some(st) if matches!(st.status, TraceStatus::Delivered { .. }) => {
                Err(SchedError::CleanupWhileInfected)
            }
            Some(st) => {
                Self::drain_into(st);
                reg.traces.remove(trace);
                Ok(())
            }
        }
    }

    fn drain_into(st: &mut TraceState<M>) {
        st.channels.clear();
        st.status = TraceStatus::Stopped;
    }

    pub fn register_callback(&self, _trace: &str, _cb: ()) {
        // Placeholder for the on-deliver observer hook; the demo CLI and
        // tests read `get_infos`/`next_delivery` directly instead of
        // registering a callback, so this is unused for now.
    }
}

impl<M> Default for ProtoSched<M> {
    fn default() -> Self {
        Self::new()
    }
}
