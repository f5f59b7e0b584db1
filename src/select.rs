//! The select operator: races a set of [`SelectCase`]s and reports which one
//! (if any) fired first.
//!
//! Order is randomized with a Fisher-Yates shuffle before each synchronous
//! pass and before arming, so that when several cases are simultaneously
//! ready no case is systematically favored — the same guarantee Go's
//! `select` makes over its case list.
//!
//! First-wins is enforced with a single `AtomicBool` gate shared by every
//! armed case plus the cancellation subscription: whichever fires first
//! flips it and wakes the waiting thread, every later firing is dropped.
//! This is airtight for the primary execution model this crate targets
//! (select calls never overlap on a single cooperative thread) and for the
//! common case of channels each guarded by their own mutex; see the note on
//! cross-channel races in the crate's design notes for the one scenario
//! (two *different* OS threads committing two *different* channels'
//! rendezvous in the same instant) this gate does not make linearizable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use rand::seq::SliceRandom;

use crate::case::{CaseId, ParkResult, SelectCase};
use crate::cancel::CancelSignal;
use crate::error::CancelReason;

/// Configures one [`select`] call.
#[derive(Default)]
pub struct SelectOptions {
    /// If set, `select` never blocks: it returns [`SelectOutcome::Default`]
    /// immediately when no case is ready on the first synchronous pass.
    pub default: bool,
    /// If set, aborting this signal while `select` is blocked wakes it with
    /// [`SelectOutcome::Cancelled`].
    pub signal: Option<Arc<dyn CancelSignal>>,
}

/// What [`select`] decided.
pub enum SelectOutcome {
    /// The case with this id fired; read its outcome off the case itself.
    Fired(CaseId),
    /// No case was ready and `opts.default` was set.
    Default,
    /// `opts.signal` aborted before any case fired.
    Cancelled(CancelReason),
}

enum Winner {
    Case(CaseId),
    Cancelled(CancelReason),
}

type Gate = (Mutex<Option<Winner>>, Condvar);

/// Races `cases`, returning as soon as one is ready (or, with `opts.default`
/// set, as soon as none is ready on the first pass). Every case is `reset()`
/// first, so a case object that fired in a previous round can be reused.
///
/// Blocks the calling thread when no case is immediately ready and no
/// default branch or cancellation ends the wait — callers on a cooperative
/// single-threaded scheduler should only call this from a context that
/// expects to suspend (e.g. inside a task driven by that scheduler), exactly
/// as a bare [`crate::channel::Channel::read`] future would suspend the task
/// polling it.
pub fn select(cases: &[&dyn SelectCase], opts: SelectOptions) -> SelectOutcome {
    for case in cases {
        case.reset();
    }

    let mut order: Vec<usize> = (0..cases.len()).collect();
    order.shuffle(&mut rand::thread_rng());

    for &i in &order {
        if cases[i].try_invoke() {
            return SelectOutcome::Fired(cases[i].id());
        }
    }

    if opts.default {
        return SelectOutcome::Default;
    }

    if cases.is_empty() {
        return block_on_signal_only(opts.signal);
    }

    let claimed = Arc::new(AtomicBool::new(false));
    let gate: Arc<Gate> = Arc::new((Mutex::new(None), Condvar::new()));

    let mut connections = Vec::with_capacity(cases.len());
    let mut winner = None;

    for &i in &order {
        let case = cases[i];
        let id = case.id();
        let claimed = claimed.clone();
        let gate = gate.clone();
        let on_fire: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            if claimed.swap(true, Ordering::AcqRel) {
                return;
            }
            let (state, cvar) = &*gate;
            *state.lock().expect("select gate poisoned") = Some(Winner::Case(id));
            cvar.notify_all();
        });

        match case.park(on_fire) {
            ParkResult::CompletedImmediately => {
                winner = Some(id);
                break;
            }
            ParkResult::Parked(conn) => connections.push(conn),
        }
    }

    let cancel_guard = winner.is_none().then(|| {
        opts.signal.as_ref().map(|sig| {
            let claimed = claimed.clone();
            let gate = gate.clone();
            sig.subscribe(Box::new(move |reason| {
                if claimed.swap(true, Ordering::AcqRel) {
                    return;
                }
                let (state, cvar) = &*gate;
                *state.lock().expect("select gate poisoned") = Some(Winner::Cancelled(reason));
                cvar.notify_all();
            }))
        })
    });

    let winner = match winner {
        Some(id) => Winner::Case(id),
        None => {
            let (state, cvar) = &*gate;
            let mut guard = state.lock().expect("select gate poisoned");
            while guard.is_none() {
                guard = cvar.wait(guard).expect("select gate poisoned");
            }
            guard.take().expect("checked is_none in loop condition")
        }
    };

    if let Some(Some(guard)) = cancel_guard {
        guard.unsubscribe();
    }
    for conn in connections {
        conn.disconnect();
    }

    match winner {
        Winner::Case(id) => SelectOutcome::Fired(id),
        Winner::Cancelled(reason) => SelectOutcome::Cancelled(reason),
    }
}

fn block_on_signal_only(signal: Option<Arc<dyn CancelSignal>>) -> SelectOutcome {
    let Some(signal) = signal else {
        // No cases, no default, no signal: nothing can ever wake this
        // select, matching Go's `select {}` deadlock semantics.
        loop {
            std::thread::park();
        }
    };
    let gate: Arc<(Mutex<Option<CancelReason>>, Condvar)> = Arc::new((Mutex::new(None), Condvar::new()));
    let gate_c = gate.clone();
    let guard = signal.subscribe(Box::new(move |reason| {
        let (state, cvar) = &*gate_c;
        *state.lock().expect("select gate poisoned") = Some(reason);
        cvar.notify_all();
    }));
    let (state, cvar) = &*gate;
    let mut locked = state.lock().expect("select gate poisoned");
    while locked.is_none() {
        locked = cvar.wait(locked).expect("select gate poisoned");
    }
    let reason = locked.take().expect("checked is_none in loop condition");
    drop(locked);
    guard.unsubscribe();
    SelectOutcome::Cancelled(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{ReadCase, WriteCase};
    use crate::cancel::Cancellation;
    use crate::engine::Engine;
    use std::time::Duration;

    #[test]
    fn select_fires_synchronously_ready_case() {
        let engine = Arc::new(Engine::<i32>::new(1));
        engine.try_write(7);
        let read = ReadCase::new(engine.clone());
        let outcome = select(&[&read], SelectOptions::default());
        match outcome {
            SelectOutcome::Fired(id) => assert_eq!(id, read.id()),
            _ => panic!("expected a fired case"),
        }
        assert_eq!(read.read().unwrap().value, Some(7));
    }

    #[test]
    fn select_with_default_returns_default_when_nothing_ready() {
        let engine = Arc::new(Engine::<i32>::new(0));
        let read = ReadCase::new(engine);
        let outcome = select(&[&read], SelectOptions { default: true, signal: None });
        assert!(matches!(outcome, SelectOutcome::Default));
    }

    #[test]
    fn select_picks_one_of_several_ready_cases() {
        let a = Arc::new(Engine::<i32>::new(1));
        let b = Arc::new(Engine::<i32>::new(1));
        a.try_write(1);
        b.try_write(2);
        let ra = ReadCase::new(a);
        let rb = ReadCase::new(b);
        let outcome = select(&[&ra, &rb], SelectOptions::default());
        match outcome {
            SelectOutcome::Fired(id) => assert!(id == ra.id() || id == rb.id()),
            _ => panic!("expected a fired case"),
        }
        // exactly one of the two fired
        assert_ne!(ra.read().is_some(), rb.read().is_some());
    }

    #[test]
    fn select_blocks_until_a_writer_arrives() {
        let engine = Arc::new(Engine::<i32>::new(0));
        let read = ReadCase::new(engine.clone());
        let writer_engine = engine.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer_engine.try_write(42);
        });
        let outcome = select(&[&read], SelectOptions::default());
        handle.join().unwrap();
        match outcome {
            SelectOutcome::Fired(id) => assert_eq!(id, read.id()),
            _ => panic!("expected a fired case"),
        }
        assert_eq!(read.read().unwrap().value, Some(42));
    }

    #[test]
    fn select_wakes_on_cancellation() {
        let engine = Arc::new(Engine::<i32>::new(0));
        let read = ReadCase::new(engine);
        let ctl = Cancellation::new();
        let ctl_c = ctl.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            ctl_c.cancel(CancelReason::message("give up"));
        });
        let outcome = select(
            &[&read],
            SelectOptions { default: false, signal: Some(ctl.signal()) },
        );
        handle.join().unwrap();
        match outcome {
            SelectOutcome::Cancelled(reason) => assert_eq!(reason.to_string(), "give up"),
            _ => panic!("expected cancellation"),
        }
    }

    #[test]
    fn select_mixes_read_and_write_cases() {
        let full_for_read = Arc::new(Engine::<i32>::new(1));
        full_for_read.try_write(1);
        let empty_for_write = Arc::new(Engine::<i32>::new(1));
        let read = ReadCase::new(full_for_read);
        let write = WriteCase::new(empty_for_write, 99);
        let outcome = select(&[&read, &write], SelectOptions::default());
        assert!(matches!(outcome, SelectOutcome::Fired(_)));
    }

    #[test]
    fn select_write_case_can_be_reused_after_losing_a_round() {
        let winner = Arc::new(Engine::<i32>::new(1));
        winner.try_write(0);
        let loser = Arc::new(Engine::<i32>::new(0));
        let read = ReadCase::new(winner);
        let write = WriteCase::new(loser.clone(), 5);
        // the read wins because the write target is full; run select again
        // reusing the same WriteCase to make sure it still carries its value.
        let _ = select(&[&read, &write], SelectOptions::default());
        assert!(matches!(select(&[&write], SelectOptions { default: true, signal: None }), SelectOutcome::Default));
        loser.close();
        match select(&[&write], SelectOptions::default()) {
            SelectOutcome::Fired(id) => {
                assert_eq!(id, write.id());
                assert!(write.write().unwrap().error);
            }
            _ => panic!("expected the write case to fire against the closed channel"),
        }
    }
}
