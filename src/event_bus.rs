/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which fires the registered handlers of every published [`Event`].

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

// How long the event bus waits for an event before checking for a shutdown signal.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct EventHandlers {
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) view_timeout_handlers: Vec<HandlerPtr<ViewTimeoutEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) prepare_handlers: Vec<HandlerPtr<PrepareEvent>>,
    pub(crate) commit_handlers: Vec<HandlerPtr<CommitEvent>>,
    pub(crate) round_change_handlers: Vec<HandlerPtr<RoundChangeEvent>>,
    pub(crate) receive_message_handlers: Vec<HandlerPtr<ReceiveMessageEvent>>,
    pub(crate) drop_message_handlers: Vec<HandlerPtr<DropMessageEvent>>,
    pub(crate) final_committed_handlers: Vec<HandlerPtr<FinalCommittedEvent>>,
    pub(crate) update_validator_set_handlers: Vec<HandlerPtr<UpdateValidatorSetEvent>>,
}

impl EventHandlers {
    /// Collect the user-provided handlers, plus the default logging handler of every event if
    /// `log_events` is set.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        start_round_handler: Option<HandlerPtr<StartRoundEvent>>,
        view_timeout_handler: Option<HandlerPtr<ViewTimeoutEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        prepare_handler: Option<HandlerPtr<PrepareEvent>>,
        commit_handler: Option<HandlerPtr<CommitEvent>>,
        round_change_handler: Option<HandlerPtr<RoundChangeEvent>>,
        receive_message_handler: Option<HandlerPtr<ReceiveMessageEvent>>,
        drop_message_handler: Option<HandlerPtr<DropMessageEvent>>,
        final_committed_handler: Option<HandlerPtr<FinalCommittedEvent>>,
        update_validator_set_handler: Option<HandlerPtr<UpdateValidatorSetEvent>>,
    ) -> EventHandlers {
        fn handlers<T: Logger>(log_events: bool, handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            if let Some(handler) = handler {
                handlers.push(handler);
            }
            handlers
        }

        EventHandlers {
            start_round_handlers: handlers(log_events, start_round_handler),
            view_timeout_handlers: handlers(log_events, view_timeout_handler),
            propose_handlers: handlers(log_events, propose_handler),
            prepare_handlers: handlers(log_events, prepare_handler),
            commit_handlers: handlers(log_events, commit_handler),
            round_change_handlers: handlers(log_events, round_change_handler),
            receive_message_handlers: handlers(log_events, receive_message_handler),
            drop_message_handlers: handlers(log_events, drop_message_handler),
            final_committed_handlers: handlers(log_events, final_committed_handler),
            update_validator_set_handlers: handlers(log_events, update_validator_set_handler),
        }
    }

    /// Check whether no handler at all is registered, in which case the event bus is not started.
    pub(crate) fn is_empty(&self) -> bool {
        self.start_round_handlers.is_empty()
            && self.view_timeout_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.prepare_handlers.is_empty()
            && self.commit_handlers.is_empty()
            && self.round_change_handlers.is_empty()
            && self.receive_message_handlers.is_empty()
            && self.drop_message_handlers.is_empty()
            && self.final_committed_handlers.is_empty()
            && self.update_validator_set_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::ViewTimeout(view_timeout_event) => self
                .view_timeout_handlers
                .iter()
                .for_each(|handler| handler(&view_timeout_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Prepare(prepare_event) => self
                .prepare_handlers
                .iter()
                .for_each(|handler| handler(&prepare_event)),

            Event::Commit(commit_event) => self
                .commit_handlers
                .iter()
                .for_each(|handler| handler(&commit_event)),

            Event::RoundChange(round_change_event) => self
                .round_change_handlers
                .iter()
                .for_each(|handler| handler(&round_change_event)),

            Event::ReceiveMessage(receive_message_event) => self
                .receive_message_handlers
                .iter()
                .for_each(|handler| handler(&receive_message_event)),

            Event::DropMessage(drop_message_event) => self
                .drop_message_handlers
                .iter()
                .for_each(|handler| handler(&drop_message_event)),

            Event::FinalCommitted(final_committed_event) => self
                .final_committed_handlers
                .iter()
                .for_each(|handler| handler(&final_committed_event)),

            Event::UpdateValidatorSet(update_validator_set_event) => self
                .update_validator_set_handlers
                .iter()
                .for_each(|handler| handler(&update_validator_set_event)),
        }
    }
}

/// Spawn the event bus thread, which fires handlers for every event received from `event_subscriber`
/// until `shutdown_signal` fires or every publisher is gone.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
