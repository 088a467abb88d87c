//! Single-threaded cooperative scheduling over Win32 wait handles.
//!
//! One thread owns a set of {handle, observer} pairs and blocks on
//! whichever handle signals first. Observers never run concurrently, and
//! a dispatched observer is detached before it runs so it can re-install
//! itself (or anything else) without duplication.

use windows::Win32::Foundation::{HANDLE, WAIT_FAILED, WAIT_OBJECT_0};
use windows::Win32::System::Threading::{WaitForMultipleObjects, INFINITE};

use recc_common::Win32Error;

use crate::error::ClientResult;

/// Reacts to a signaled wait handle.
pub trait SignalObserver {
    /// Whether this wake should be ignored, leaving the pair installed.
    fn is_spurious(&mut self) -> bool {
        false
    }

    /// Consumes the detached observer. May install new waits on `ctx`.
    fn on_signaled(self: Box<Self>, ctx: &mut SignalContext) -> ClientResult<()>;
}

/// The signal set: equal-length handle and observer sequences, paired by
/// index.
#[derive(Default)]
pub struct SignalContext {
    handles: Vec<HANDLE>,
    observers: Vec<Box<dyn SignalObserver>>,
}

impl SignalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pair to the set. The handle must stay alive until its
    /// observer is dispatched; ownership stays with the observer or its
    /// captures.
    pub fn install(&mut self, handle: HANDLE, observer: Box<dyn SignalObserver>) {
        debug_assert!(
            !self.handles.contains(&handle),
            "handle installed twice in the signal set"
        );
        self.handles.push(handle);
        self.observers.push(observer);
    }

    /// Dispatches until the set is empty.
    ///
    /// At most one observer runs per wake. When several handles are
    /// signaled at once the lowest index wins, which is deterministic but
    /// not fair; observers yield quickly enough for that not to matter.
    /// An observer error aborts the loop and surfaces here.
    pub fn run(&mut self) -> ClientResult<()> {
        while !self.handles.is_empty() {
            let wait = unsafe { WaitForMultipleObjects(&self.handles, false, INFINITE) };
            if wait == WAIT_FAILED {
                return Err(Win32Error::last("WaitForMultipleObjects").into());
            }
            let index = wait.0.wrapping_sub(WAIT_OBJECT_0.0) as usize;
            if index >= self.handles.len() {
                continue;
            }
            if self.observers[index].is_spurious() {
                continue;
            }
            // Detach before dispatch: the observer may install itself
            // again, and the set must stay duplicate-free meanwhile.
            self.handles.remove(index);
            let observer = self.observers.remove(index);
            observer.on_signaled(self)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use windows::core::PCWSTR;
    use windows::Win32::System::Threading::{CreateEventW, SetEvent};

    use recc_common::OwnedHandle;

    fn manual_event(signaled: bool) -> OwnedHandle {
        let event =
            unsafe { CreateEventW(None, true, signaled, PCWSTR::null()) }.expect("CreateEventW");
        OwnedHandle::from_raw(event)
    }

    struct Recorder {
        name: &'static str,
        order: Rc<RefCell<Vec<&'static str>>>,
        then: Option<Box<dyn FnOnce(&mut SignalContext)>>,
    }

    impl SignalObserver for Recorder {
        fn on_signaled(self: Box<Self>, ctx: &mut SignalContext) -> ClientResult<()> {
            self.order.borrow_mut().push(self.name);
            if let Some(then) = self.then {
                then(ctx);
            }
            Ok(())
        }
    }

    #[test]
    fn runs_each_observer_once_and_terminates() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let first = manual_event(true);
        let second = manual_event(true);

        let mut ctx = SignalContext::new();
        ctx.install(
            first.as_raw(),
            Box::new(Recorder {
                name: "first",
                order: order.clone(),
                then: None,
            }),
        );
        ctx.install(
            second.as_raw(),
            Box::new(Recorder {
                name: "second",
                order: order.clone(),
                then: None,
            }),
        );
        ctx.run().expect("run");
        // Lowest index wins per wake; both dispatch exactly once.
        assert_eq!(*order.borrow(), ["first", "second"]);
    }

    #[test]
    fn observers_can_chain_new_waits() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let first = manual_event(true);
        let second = manual_event(false);

        let chained = Recorder {
            name: "chained",
            order: order.clone(),
            then: None,
        };
        let second_raw = second.as_raw();
        let starter = Recorder {
            name: "starter",
            order: order.clone(),
            then: Some(Box::new(move |ctx: &mut SignalContext| {
                unsafe { SetEvent(second_raw) }.expect("SetEvent");
                ctx.install(second_raw, Box::new(chained));
            })),
        };

        let mut ctx = SignalContext::new();
        ctx.install(first.as_raw(), Box::new(starter));
        ctx.run().expect("run");
        assert_eq!(*order.borrow(), ["starter", "chained"]);
    }

    #[test]
    fn spurious_wakes_leave_the_pair_installed() {
        struct Flaky {
            spurious_left: u32,
            dispatched: Rc<RefCell<u32>>,
        }
        impl SignalObserver for Flaky {
            fn is_spurious(&mut self) -> bool {
                if self.spurious_left > 0 {
                    self.spurious_left -= 1;
                    true
                } else {
                    false
                }
            }
            fn on_signaled(self: Box<Self>, _ctx: &mut SignalContext) -> ClientResult<()> {
                *self.dispatched.borrow_mut() += 1;
                Ok(())
            }
        }

        let dispatched = Rc::new(RefCell::new(0));
        let event = manual_event(true);
        let mut ctx = SignalContext::new();
        ctx.install(
            event.as_raw(),
            Box::new(Flaky {
                spurious_left: 3,
                dispatched: dispatched.clone(),
            }),
        );
        // The manual-reset event stays signaled, so the loop spins through
        // the spurious wakes and then dispatches exactly once.
        ctx.run().expect("run");
        assert_eq!(*dispatched.borrow(), 1);
    }
}
