/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Single-shot, cancellable round change timer.
//!
//! Arming the timer spawns a thread that sleeps for the round's timeout and then delivers a
//! [`CoreEvent::Timeout`] for the view it was armed in, waiting for space if the event queue is full. Stopping or re-arming the timer cancels the
//! previous thread. A timeout that is still posted after a cancellation carries the view it was armed
//! in, and the core ignores timeouts whose view is not its current view.

use std::{
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread,
    time::Duration,
};

use crate::types::data_types::{Round, View};

use super::event_queue::{CoreEvent, EventQueueSender};

pub(crate) struct RoundChangeTimer {
    request_timeout: Duration,
    max_request_timeout: Duration,
    // Dropping this sender wakes the timer thread up and cancels the timeout.
    cancel: Option<Sender<()>>,
}

impl RoundChangeTimer {
    pub(crate) fn new(request_timeout: Duration, max_request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            max_request_timeout,
            cancel: None,
        }
    }

    /// Get the timeout of `round`: `request_timeout * 2^round`, capped at `max_request_timeout`.
    pub(crate) fn timeout(&self, round: Round) -> Duration {
        u32::try_from(round.int())
            .ok()
            .and_then(|exp| 2u32.checked_pow(exp))
            .and_then(|factor| self.request_timeout.checked_mul(factor))
            .map(|timeout| timeout.min(self.max_request_timeout))
            .unwrap_or(self.max_request_timeout)
    }

    /// Cancel the running timeout, if any, and start a new one for `view`. Returns the duration of the
    /// new timeout.
    pub(crate) fn arm(&mut self, view: View, queue: EventQueueSender) -> Duration {
        self.stop();

        let timeout = self.timeout(view.round);
        let (cancel, cancelled) = mpsc::channel::<()>();
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                queue.deliver(CoreEvent::Timeout(view));
            }
        });
        self.cancel = Some(cancel);
        timeout
    }

    /// Cancel the running timeout, if any.
    pub(crate) fn stop(&mut self) {
        self.cancel = None;
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use crate::{
        core::event_queue::{event_queue, CoreEvent, OverflowPolicy},
        types::data_types::{Round, Sequence, View},
    };

    use super::RoundChangeTimer;

    #[test]
    fn timeout_is_delivered_to_a_full_queue_test() {
        let (queue, receiver) = event_queue(1, OverflowPolicy::DropIncoming);
        assert!(queue.post(CoreEvent::FinalCommitted));
        assert!(!queue.post(CoreEvent::FinalCommitted));

        let view = View::new(Sequence::new(1), Round::init());
        let mut timer = RoundChangeTimer::new(Duration::from_millis(20), Duration::from_millis(20));
        timer.arm(view, queue.clone());
        thread::sleep(Duration::from_millis(200));

        // The timeout waits for the event ahead of it instead of being dropped.
        assert!(matches!(
            receiver.recv_timeout(Duration::from_secs(1)),
            Ok(CoreEvent::FinalCommitted)
        ));
        assert!(matches!(
            receiver.recv_timeout(Duration::from_secs(5)),
            Ok(CoreEvent::Timeout(timed_out)) if timed_out == view
        ));
    }

    #[test]
    fn timeout_doubles_every_round_up_to_the_cap_test() {
        let timer = RoundChangeTimer::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(timer.timeout(Round::init()), Duration::from_secs(1));
        assert_eq!(timer.timeout(Round::new(3)), Duration::from_secs(8));
        assert_eq!(timer.timeout(Round::new(4)), Duration::from_secs(10));
        assert_eq!(timer.timeout(Round::new(u64::MAX)), Duration::from_secs(10));
    }
}
