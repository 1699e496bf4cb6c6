//! The component-runtime message loop.
//!
//! Each logical process runs [`drive`] on its own OS thread: a cooperative
//! loop that owns one `state: S` value, pops from its ordinary mailbox,
//! and calls into a [`Handler`]. The sum type returned by the handler
//! (`Next`) tells the loop what to do before it goes back to receive,
//! exactly as described in the spec's "handler switching / post-op"
//! design note.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::link::{Down, MonitorRef};
use super::mailbox::Mailbox;
use super::process::{ExitReason, ProcessId, ProcessLinks};

/// A message type usable with the breakpoint discipline must expose a
/// stable tag for `bp_set`-style matching.
pub trait Tagged {
    fn tag(&self) -> &'static str;
}

/// What a [`Handler`] wants the driver loop to do after processing one
/// message.
pub enum Next<S, M> {
    /// Keep running with the updated state.
    Continue(S),
    /// Swap in a new handler and keep running with the updated state.
    ChangeHandler(S, Box<dyn Handler<S, M>>),
    /// The message was not recognized; state is unchanged.
    Unknown(S),
    /// Terminate the process normally.
    Kill,
    /// Re-enter the handler immediately with `msg`, before the next
    /// ordinary receive -- preserves the "no message was dequeued"
    /// illusion for the message actually dequeued this round.
    PostOp(S, M),
}

/// A process's message handler. `on` is called once per ordinary message;
/// its return value drives the loop (see [`Next`]).
pub trait Handler<S, M>: Send {
    fn on(&mut self, msg: M, state: S) -> Next<S, M>;
}

/// The envelope every send goes through: either a user payload, a
/// `$runtime` control tag, or a non-intrusive state query -- per the
/// spec's messaging-substrate and `get_state`/`get_component_state`
/// sections. `Query` backs both: the caller supplies a closure that reads
/// whatever projection of `state` it needs (the whole state for
/// `get_state`, a capability-set dump for `get_component_state`).
pub enum Envelope<S, M> {
    User(M),
    Control(ControlTag),
    Query(Box<dyn FnOnce(&S) + Send>),
    /// A ProtoSched-infected delivery: `{trace, src, payload}` from the
    /// spec's messaging-substrate vocabulary (`pstate`/`dst` are implicit
    /// in, respectively, the per-process infection context set while this
    /// is processed and the mailbox it was pushed into). Handled exactly
    /// like `User`, except the receiving process is infected by `trace`
    /// for the duration of the handler call.
    Infected { trace: String, src: ProcessId, payload: M },
}

/// Control tags that don't depend on the process's state type, so they
/// can flow through a single non-generic mailbox alongside user messages.
#[derive(Clone)]
pub enum ControlTag {
    Kill,
    Sleep(u64),
}

/// A breakpoint predicate: `(msg, state) -> bool`.
pub type BreakpointPred<S, M> = Arc<dyn Fn(&M, &S) -> bool + Send + Sync>;

/// One entry in the active-breakpoint stack.
pub enum BreakpointMatch<S, M> {
    ByTag(&'static str),
    ByPredicate(BreakpointPred<S, M>),
}

/// A named breakpoint-control message, delivered through the process's
/// independent breakpoint-control mailbox.
pub enum BpControl<S, M> {
    Set {
        name: String,
        matcher: BreakpointMatch<S, M>,
    },
    Del {
        name: String,
    },
    /// Release exactly one paused message, then reblock at the next match.
    Step {
        reply_to: Sender<()>,
    },
    /// Release the current pause; the breakpoint stays active for the
    /// next match.
    Cont,
    /// Hold further breakpoint-control processing until a breakpoint
    /// actually fires on an ordinary message.
    Barrier,
}

struct NamedBreakpoint<S, M> {
    name: String,
    matcher: BreakpointMatch<S, M>,
}

/// Per-process breakpoint bookkeeping: the active-breakpoint stack plus
/// the barrier flag.
struct BreakpointState<S, M> {
    active: Vec<NamedBreakpoint<S, M>>,
    barrier_held: bool,
}

impl<S, M> BreakpointState<S, M> {
    fn new() -> Self {
        BreakpointState {
            active: Vec::new(),
            barrier_held: false,
        }
    }

    fn matches(&self, msg: &M, state: &S) -> bool
    where
        M: Tagged,
    {
        self.active.iter().any(|bp| match &bp.matcher {
            BreakpointMatch::ByTag(tag) => msg.tag() == *tag,
            BreakpointMatch::ByPredicate(pred) => pred(msg, state),
        })
    }

    fn apply(&mut self, ctrl: BpControl<S, M>) -> BpOutcome {
        match ctrl {
            BpControl::Set { name, matcher } => {
                self.active.push(NamedBreakpoint { name, matcher });
                BpOutcome::Applied
            }
            BpControl::Del { name } => {
                self.active.retain(|bp| bp.name != name);
                BpOutcome::Applied
            }
            BpControl::Step { reply_to } => {
                let _ = reply_to.send(());
                BpOutcome::ReleaseOne
            }
            BpControl::Cont => BpOutcome::ReleaseUntilNextMatch,
            BpControl::Barrier => {
                self.barrier_held = true;
                BpOutcome::Applied
            }
        }
    }
}

enum BpOutcome {
    Applied,
    ReleaseOne,
    ReleaseUntilNextMatch,
}

/// A running process: its ordinary and breakpoint-control mailboxes, PID,
/// and a shutdown flag the driver checks between messages.
pub struct ProcessHandle<S, M> {
    pub pid: ProcessId,
    pub ordinary: Arc<Mailbox<Envelope<S, M>>>,
    bp_control: Arc<Mailbox<BpControl<S, M>>>,
    shutdown: Arc<AtomicBool>,
    links: Arc<Mutex<ProcessLinks>>,
    join: Option<JoinHandle<()>>,
}

impl<S, M> ProcessHandle<S, M>
where
    S: 'static,
{
    pub fn send(&self, msg: M) {
        self.ordinary.push(Envelope::User(msg));
    }

    pub fn send_control(&self, tag: ControlTag) {
        self.ordinary.push(Envelope::Control(tag));
    }

    /// Enqueue a non-intrusive read of the last-committed state, answered
    /// out-of-band once the query reaches the head of the ordinary queue.
    /// Backs both `get_state` (pass `S::clone`) and `get_component_state`
    /// (pass a projection into a capability-set dump).
    pub fn get_state<R: Send + 'static>(
        &self,
        project: impl FnOnce(&S) -> R + Send + 'static,
    ) -> crossbeam_channel::Receiver<R> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.ordinary.push(Envelope::Query(Box::new(move |s: &S| {
            let _ = tx.send(project(s));
        })));
        rx
    }

    pub fn bp_set(&self, name: impl Into<String>, matcher: BreakpointMatch<S, M>) {
        self.bp_control.push(BpControl::Set {
            name: name.into(),
            matcher,
        });
    }

    pub fn bp_del(&self, name: impl Into<String>) {
        self.bp_control.push(BpControl::Del { name: name.into() });
    }

    pub fn bp_step(&self) -> crossbeam_channel::Receiver<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.bp_control.push(BpControl::Step { reply_to: tx });
        rx
    }

    pub fn bp_cont(&self) {
        self.bp_control.push(BpControl::Cont);
    }

    pub fn bp_barrier(&self) {
        self.bp_control.push(BpControl::Barrier);
    }

    /// Watch this process for death: the returned receiver gets exactly
    /// one [`Down`] once the process exits, however it exits. ProtoSched
    /// uses this to cancel an in-flight delivery when its destination
    /// crashes without ever calling `thread_end`.
    pub fn monitor(&self) -> (MonitorRef, crossbeam_channel::Receiver<Down>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let r = self.links.lock().down_watchers.add(tx);
        (r, rx)
    }

    /// Stop watching this process; `r` will not receive a `Down`.
    pub fn demonitor(&self, r: MonitorRef) {
        self.links.lock().down_watchers.remove(r);
    }

    /// Request termination and wait for the driver thread to exit.
    pub fn kill_and_join(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.ordinary.push(Envelope::Control(ControlTag::Kill));
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// What to do after one `handler.on` call: feed back into the ordinary
/// per-message loop below.
enum HandlerOutcome<M> {
    Continue,
    Kill,
    PostOp(M),
}

/// Run one handler call under `panic::catch_unwind`, preserving the
/// pre-call state across a panic instead of losing it: `state` is cloned
/// before the call so a panicking handler still leaves the process with
/// a valid, pre-handler state to resume from (spec: "a single message is
/// effectively dropped", not the whole process).
fn run_handler<S, M>(handler: &mut Box<dyn Handler<S, M>>, state: S, msg: M) -> (S, HandlerOutcome<M>)
where
    S: Clone,
{
    let pre_handler = state.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| handler.on(msg, state))) {
        Ok(Next::Continue(s)) => (s, HandlerOutcome::Continue),
        Ok(Next::ChangeHandler(s, h)) => {
            *handler = h;
            (s, HandlerOutcome::Continue)
        }
        Ok(Next::Unknown(s)) => {
            tracing::warn!("unknown event delivered to process");
            (s, HandlerOutcome::Continue)
        }
        Ok(Next::Kill) => (pre_handler, HandlerOutcome::Kill),
        Ok(Next::PostOp(s, next_msg)) => (s, HandlerOutcome::PostOp(next_msg)),
        Err(_) => {
            tracing::error!("handler panicked; dropping this message");
            (pre_handler, HandlerOutcome::Continue)
        }
    }
}

/// Notify every outstanding monitor that this process exited, consuming
/// the watcher set (a process can only exit once).
fn notify_exit(links: &Mutex<ProcessLinks>, pid: ProcessId, reason: ExitReason) {
    let links = std::mem::take(&mut *links.lock());
    links.down_watchers.notify_all(pid, reason);
}

/// Spawn a process running `handler` over `state` on its own OS thread.
pub fn spawn<S, M>(mut state: S, mut handler: Box<dyn Handler<S, M>>) -> ProcessHandle<S, M>
where
    S: Clone + Send + 'static,
    M: Send + Tagged + 'static,
{
    let pid = ProcessId::next();
    let ordinary: Arc<Mailbox<Envelope<S, M>>> = Arc::new(Mailbox::new());
    let bp_control: Arc<Mailbox<BpControl<S, M>>> = Arc::new(Mailbox::new());
    let shutdown = Arc::new(AtomicBool::new(false));
    let links: Arc<Mutex<ProcessLinks>> = Arc::new(Mutex::new(ProcessLinks::new()));

    let loop_ordinary = Arc::clone(&ordinary);
    let loop_bp = Arc::clone(&bp_control);
    let loop_shutdown = Arc::clone(&shutdown);
    let loop_links = Arc::clone(&links);

    let join = std::thread::Builder::new()
        .name(format!("proc-{}", pid.as_u64()))
        .spawn(move || {
            let mut bp_state: BreakpointState<S, M> = BreakpointState::new();
            loop {
                if loop_shutdown.load(Ordering::SeqCst) {
                    notify_exit(&loop_links, pid, ExitReason::Shutdown);
                    return;
                }

                if !bp_state.barrier_held {
                    while let Some(ctrl) = loop_bp.pop() {
                        bp_state.apply(ctrl);
                    }
                }

                // The breakpoint pause loop: peek the ordinary head; if it
                // matches an active breakpoint, block on bp-control
                // messages until released.
                loop {
                    let should_pause = loop_ordinary.peek_with(|head| match head {
                        Some(Envelope::User(m)) => bp_state.matches(m, &state),
                        Some(Envelope::Infected { payload, .. }) => bp_state.matches(payload, &state),
                        _ => false,
                    });
                    if !should_pause {
                        break;
                    }
                    match loop_bp.pop_blocking().apply_outer(&mut bp_state) {
                        BpOutcome::Applied => continue,
                        BpOutcome::ReleaseOne | BpOutcome::ReleaseUntilNextMatch => break,
                    }
                }

                let env = loop_ordinary.pop_blocking();
                match env {
                    Envelope::Control(ControlTag::Kill) => {
                        notify_exit(&loop_links, pid, ExitReason::Shutdown);
                        return;
                    }
                    Envelope::Control(ControlTag::Sleep(ms)) => {
                        std::thread::sleep(std::time::Duration::from_millis(ms));
                    }
                    Envelope::Query(project) => {
                        project(&state);
                    }
                    Envelope::User(msg) => {
                        let mut pending = Some(msg);
                        while let Some(m) = pending.take() {
                            let (new_state, outcome) = run_handler(&mut handler, state, m);
                            state = new_state;
                            match outcome {
                                HandlerOutcome::Continue => {}
                                HandlerOutcome::Kill => {
                                    notify_exit(&loop_links, pid, ExitReason::Normal);
                                    return;
                                }
                                HandlerOutcome::PostOp(next_msg) => pending = Some(next_msg),
                            }
                        }
                    }
                    Envelope::Infected { trace, src, payload } => {
                        tracing::trace!(?src, trace = %trace, "infected message delivered");
                        crate::infection::set(&trace);
                        let mut pending = Some(payload);
                        while let Some(m) = pending.take() {
                            let (new_state, outcome) = run_handler(&mut handler, state, m);
                            state = new_state;
                            match outcome {
                                HandlerOutcome::Continue => {}
                                HandlerOutcome::Kill => {
                                    crate::infection::clear();
                                    notify_exit(&loop_links, pid, ExitReason::Normal);
                                    return;
                                }
                                HandlerOutcome::PostOp(next_msg) => pending = Some(next_msg),
                            }
                        }
                        crate::infection::clear();
                    }
                }
            }
        })
        .expect("failed to spawn process thread");

    ProcessHandle {
        pid,
        ordinary,
        bp_control,
        shutdown,
        links,
        join: Some(join),
    }
}

impl<S, M> BpControl<S, M> {
    fn apply_outer(self, bp_state: &mut BreakpointState<S, M>) -> BpOutcome {
        bp_state.apply(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    enum Msg {
        Inc,
        Ping(crossbeam_channel::Sender<i64>),
    }

    impl Tagged for Msg {
        fn tag(&self) -> &'static str {
            match self {
                Msg::Inc => "inc",
                Msg::Ping(_) => "ping",
            }
        }
    }

    struct Counter;
    impl Handler<i64, Msg> for Counter {
        fn on(&mut self, msg: Msg, state: i64) -> Next<i64, Msg> {
            match msg {
                Msg::Inc => Next::Continue(state + 1),
                Msg::Ping(reply) => {
                    let _ = reply.send(state);
                    Next::Continue(state)
                }
            }
        }
    }

    #[test]
    fn delivers_messages_in_order() {
        let handle = spawn(0i64, Box::new(Counter));
        for _ in 0..5 {
            handle.send(Msg::Inc);
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        handle.send(Msg::Ping(tx));
        assert_eq!(rx.recv().unwrap(), 5);
        handle.kill_and_join();
    }

    struct Panicky;
    impl Handler<i64, Msg> for Panicky {
        fn on(&mut self, msg: Msg, state: i64) -> Next<i64, Msg> {
            match msg {
                Msg::Inc => panic!("boom"),
                Msg::Ping(reply) => {
                    let _ = reply.send(state);
                    Next::Continue(state)
                }
            }
        }
    }

    #[test]
    fn handler_panic_drops_the_message_and_keeps_the_process_running() {
        // The process survives a handler panic with the pre-panic state
        // intact and keeps serving later messages, per the "a single
        // message is effectively dropped" failure semantics.
        let handle = spawn(7i64, Box::new(Panicky));
        handle.send(Msg::Inc);

        let (tx, rx) = crossbeam_channel::bounded(1);
        handle.send(Msg::Ping(tx));
        assert_eq!(rx.recv_timeout(std::time::Duration::from_millis(200)).unwrap(), 7);

        handle.kill_and_join();
    }

    #[test]
    fn breakpoint_pauses_matching_tag_until_step() {
        let handle = spawn(0i64, Box::new(Counter));
        handle.bp_set("stop-inc", BreakpointMatch::ByTag("inc"));
        handle.send(Msg::Inc);

        std::thread::sleep(std::time::Duration::from_millis(30));
        let (tx, rx) = crossbeam_channel::bounded(1);
        handle.send(Msg::Ping(tx.clone()));
        // Ping is queued behind the paused Inc, so it should not have
        // been answered yet (paused at the head of the ordinary queue).
        assert!(rx.try_recv().is_err());

        let ack = handle.bp_step();
        ack.recv_timeout(std::time::Duration::from_millis(200)).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(30));
        let (tx2, rx2) = crossbeam_channel::bounded(1);
        handle.send(Msg::Ping(tx2));
        assert_eq!(rx2.recv_timeout(std::time::Duration::from_millis(200)).unwrap(), 1);

        handle.kill_and_join();
    }

    #[test]
    fn monitor_fires_down_on_kill() {
        let handle = spawn(0i64, Box::new(Counter));
        let pid = handle.pid;
        let (_r, down_rx) = handle.monitor();
        handle.kill_and_join();
        let down = down_rx.recv_timeout(std::time::Duration::from_millis(200)).unwrap();
        assert_eq!(down.pid, pid);
    }

    #[test]
    fn infected_envelope_still_delivers_to_the_handler() {
        let handle = spawn(0i64, Box::new(Counter));
        handle.ordinary.push(Envelope::Infected {
            trace: "t".to_string(),
            src: handle.pid,
            payload: Msg::Inc,
        });
        let (tx, rx) = crossbeam_channel::bounded(1);
        handle.send(Msg::Ping(tx));
        assert_eq!(rx.recv_timeout(std::time::Duration::from_millis(200)).unwrap(), 1);
        handle.kill_and_join();
    }
}
