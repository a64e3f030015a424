//! Property tests for the reconnection state machine.
//!
//! Invariants tested:
//! - `on_transport_close` is requested exactly once per connection
//! - Nothing happens after a terminal phase
//! - A connection that never opens makes exactly `max_attempts + 1` attempts
//! - A retry is only scheduled while reconnection is enabled

use proptest::prelude::*;
use relink_core::{Address, TransportError, TransportErrorKind};
use relink_reconnect::{
    Command, ConnectionOptions, Coordinator, Effect, Event, Notification, ReconnectOptions,
};
use std::collections::VecDeque;
use std::time::Duration;

/// Runs `event` and answers every callback with `commands`.
fn step(coordinator: &mut Coordinator, event: Event, commands: &[Command]) -> Vec<Effect> {
    let mut pending: VecDeque<Effect> = coordinator.handle(event).into();
    let mut seen = Vec::new();
    while let Some(effect) = pending.pop_front() {
        if matches!(effect, Effect::Notify(_)) {
            let follow_up = coordinator.handle(Event::CallbackReturned(commands.to_vec()));
            for effect in follow_up.into_iter().rev() {
                pending.push_front(effect);
            }
        }
        seen.push(effect);
    }
    seen
}

fn failure() -> Event {
    Event::TransportFailed(TransportError::new(
        TransportErrorKind::Lost,
        Address::new("a"),
        "lost",
    ))
}

fn scripted_event(code: u8) -> (Event, Vec<Command>) {
    match code {
        0 => (Event::Connected, Vec::new()),
        1 => (failure(), Vec::new()),
        2 => (Event::RetryDue, Vec::new()),
        3 => (Event::Stop, Vec::new()),
        4 => (Event::Command(Command::Close), Vec::new()),
        5 => (failure(), vec![Command::Close]),
        6 => (
            Event::Command(Command::UpdateOptions(
                ConnectionOptions::builder().failover_urls(["b"]).build(),
            )),
            Vec::new(),
        ),
        _ => (Event::Start, Vec::new()),
    }
}

fn closes(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|effect| matches!(effect, Effect::Notify(Notification::TransportClose(_))))
        .count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: Exactly one final notification, and silence afterwards
    #[test]
    fn transport_close_exactly_once(
        reconnect in any::<bool>(),
        codes in prop::collection::vec(0u8..8, 1..60),
    ) {
        let options = if reconnect {
            ConnectionOptions::builder()
                .reconnect(ReconnectOptions::new().max_attempts(5))
                .build()
        } else {
            ConnectionOptions::new()
        };
        let mut coordinator = Coordinator::new(Address::new("a"), options);
        let mut total = closes(&step(&mut coordinator, Event::Start, &[]));

        for code in codes {
            let was_terminal = coordinator.phase().is_terminal();
            let (event, commands) = scripted_event(code);
            let effects = step(&mut coordinator, event, &commands);

            if was_terminal {
                prop_assert!(effects.is_empty());
            }
            if !reconnect {
                let retried = effects
                    .iter()
                    .any(|effect| matches!(effect, Effect::ScheduleRetry { .. }));
                prop_assert!(!retried);
            }
            total += closes(&effects);
            prop_assert!(total <= 1);
        }

        // Stopping always reaches a terminal phase.
        total += closes(&step(&mut coordinator, Event::Stop, &[]));
        prop_assert_eq!(total, 1);
        prop_assert!(coordinator.phase().is_terminal());
    }

    /// Property: Never opening means max_attempts + 1 connects, then failure
    #[test]
    fn attempts_bounded_by_limit(max_attempts in 1u32..=20, failover in 0usize..=3) {
        let options = ConnectionOptions::builder()
            .reconnect(
                ReconnectOptions::new()
                    .delay(Duration::from_millis(1))
                    .max_attempts(max_attempts),
            )
            .failover_urls((0..failover).map(|i| format!("f{i}")))
            .build();
        let mut coordinator = Coordinator::new(Address::new("a"), options);

        let mut connects = 0;
        let mut effects = step(&mut coordinator, Event::Start, &[]);
        for _ in 0..(max_attempts + 5) {
            connects += effects.iter().filter(|e| matches!(e, Effect::Connect { .. })).count();
            if coordinator.phase().is_terminal() {
                break;
            }
            step(&mut coordinator, failure(), &[]);
            effects = step(&mut coordinator, Event::RetryDue, &[]);
        }

        prop_assert_eq!(connects, max_attempts as usize + 1);
        prop_assert_eq!(coordinator.connects(), max_attempts + 1);
        prop_assert!(coordinator.phase().is_terminal());
    }
}
