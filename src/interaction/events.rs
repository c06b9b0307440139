//! Synchronous interaction events.
//!
//! Subscribers run inline, in subscription order, at the point in the tick
//! where the transition happens. Events carry ids only; subscribers query
//! the system afterwards for any state they need.

use super::{CandidateId, GrabberId};

/// A state transition observed by the interaction system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionEvent {
    HoverEnter { grabber: GrabberId, candidate: CandidateId },
    HoverExit { grabber: GrabberId, candidate: CandidateId },
    Grabbed { grabber: GrabberId, candidate: CandidateId },
    Released { grabber: GrabberId, candidate: CandidateId },
    /// Trigger pressed while holding.
    Activated { grabber: GrabberId, candidate: CandidateId },
    /// Trigger released while holding.
    Deactivated { grabber: GrabberId, candidate: CandidateId },
    /// Candidate unregistered; all holds were force-released first.
    CandidateRemoved { candidate: CandidateId },
}

/// Mutable veto passed to before-grab subscribers.
#[derive(Debug)]
pub struct BeforeGrabArgs {
    pub grabber: GrabberId,
    pub candidate: CandidateId,
    /// Set to true to cancel the grab. The candidate's body state is
    /// rolled back as if the grab never started.
    pub cancel: bool,
}

type EventFn = Box<dyn FnMut(&InteractionEvent)>;
type BeforeGrabFn = Box<dyn FnMut(&mut BeforeGrabArgs)>;

/// Subscriber lists, kept as a separate field of the system so events can
/// be emitted while grabber and candidate borrows are live elsewhere.
#[derive(Default)]
pub struct EventDispatch {
    subscribers: Vec<EventFn>,
    before_grab: Vec<BeforeGrabFn>,
}

impl EventDispatch {
    pub fn subscribe(&mut self, f: impl FnMut(&InteractionEvent) + 'static) {
        self.subscribers.push(Box::new(f));
    }

    pub fn subscribe_before_grab(&mut self, f: impl FnMut(&mut BeforeGrabArgs) + 'static) {
        self.before_grab.push(Box::new(f));
    }

    pub fn emit(&mut self, event: InteractionEvent) {
        for sub in &mut self.subscribers {
            sub(&event);
        }
    }

    /// Runs before-grab subscribers. Returns true when any of them
    /// canceled the grab.
    pub fn check_before_grab(&mut self, grabber: GrabberId, candidate: CandidateId) -> bool {
        let mut args = BeforeGrabArgs { grabber, candidate, cancel: false };
        for sub in &mut self.before_grab {
            sub(&mut args);
        }
        args.cancel
    }
}

impl std::fmt::Debug for EventDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatch")
            .field("subscribers", &self.subscribers.len())
            .field("before_grab", &self.before_grab.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn subscribers_run_in_subscription_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut dispatch = EventDispatch::default();
        for tag in 0..3 {
            let seen = seen.clone();
            dispatch.subscribe(move |_| seen.borrow_mut().push(tag));
        }
        dispatch.emit(InteractionEvent::CandidateRemoved { candidate: CandidateId(7) });
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn any_before_grab_subscriber_can_cancel() {
        let mut dispatch = EventDispatch::default();
        dispatch.subscribe_before_grab(|_| {});
        assert!(!dispatch.check_before_grab(GrabberId(1), CandidateId(2)));

        dispatch.subscribe_before_grab(|args| args.cancel = true);
        assert!(dispatch.check_before_grab(GrabberId(1), CandidateId(2)));
    }
}
