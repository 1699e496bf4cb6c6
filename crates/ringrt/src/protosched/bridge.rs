//! Wiring between ProtoSched and the messaging substrate / component
//! runtime: a send performed by an infected thread is captured instead of
//! delivered, an [`Instrumented`] handler reports completion back to the
//! scheduler, and [`pump_one`] drives one step of the scheduling loop,
//! installing a death monitor on the destination so a crash cancels the
//! delivery rather than hanging it (the spec's "ProtoSched uses
//! process-death monitors to cancel in-flight deliveries" design note).

use std::collections::HashMap;
use std::time::Duration;

use crate::actor::{Handler, Next, ProcessHandle, ProcessId};
use crate::messaging::MessageBus;

use super::scheduler::ProtoSched;

/// Route a send performed on the calling thread: if the thread is
/// infected by a trace, capture the send into that trace's queue set
/// instead of delivering it; otherwise send it straight over the bus.
/// This is what makes a handler's ordinary `bus.send(...)` calls
/// transparently interleavable once the handler is running under
/// [`Instrumented`].
pub fn route_send<S, M>(bus: &MessageBus<ProcessId, S, M>, sched: &ProtoSched<M>, me: ProcessId, dst: ProcessId, msg: M) {
    match crate::infection::current() {
        Some(trace) => sched.capture(&trace, me, dst, msg),
        None => bus.send_shepherded(dst, msg, |err| {
            tracing::warn!(?err, ?dst, "send failed");
        }),
    }
}

/// Wraps a process's real handler so that, once a delivery completes, the
/// scheduler is told so it can demote the trace back to `running` and pick
/// its next delivery. The receiving process itself doesn't need to know
/// it's instrumented; the driver loop's `Envelope::Infected` branch
/// already sets the ambient trace tag this reads.
pub struct Instrumented<S, M> {
    inner: Box<dyn Handler<S, M>>,
    sched: std::sync::Arc<ProtoSched<M>>,
}

impl<S, M> Instrumented<S, M> {
    pub fn new(inner: Box<dyn Handler<S, M>>, sched: std::sync::Arc<ProtoSched<M>>) -> Self {
        Instrumented { inner, sched }
    }
}

impl<S: Send, M: Send> Handler<S, M> for Instrumented<S, M> {
    fn on(&mut self, msg: M, state: S) -> Next<S, M> {
        let next = self.inner.on(msg, state);
        if let Some(trace) = crate::infection::current() {
            self.sched.on_handler_done(&trace);
        }
        next
    }
}

/// Drive one step of `trace`'s scheduling loop: ask ProtoSched which
/// queued message goes next, deliver it infected, and block until the
/// delivery resolves (handler completion, a shepherd-reported send
/// failure, or the destination process dying mid-delivery). Returns
/// `false` once the trace's queue set has drained.
pub fn pump_one<S, M>(
    sched: &ProtoSched<M>,
    bus: &MessageBus<ProcessId, S, M>,
    handles: &HashMap<ProcessId, ProcessHandle<S, M>>,
    trace: &str,
) -> bool
where
    S: 'static,
{
    let step = match sched.next_delivery(trace) {
        Some(step) => step,
        None => return false,
    };

    let monitor = handles.get(&step.dst).map(|h| h.monitor());

    bus.send_infected_shepherded(trace, step.src, step.dst, step.msg, |_err| {
        sched.on_handler_done(trace);
    });

    if let Some((monitor_ref, down_rx)) = monitor {
        loop {
            if !sched.is_delivering_to(trace, step.dst) {
                if let Some(h) = handles.get(&step.dst) {
                    h.demonitor(monitor_ref);
                }
                break;
            }
            if down_rx.recv_timeout(Duration::from_millis(20)).is_ok() {
                sched.on_handler_done(trace);
                break;
            }
        }
    }

    true
}
