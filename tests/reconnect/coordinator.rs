use super::support::{fail_and_retry, quiet, refused, scheduled, step};
use relink_core::{Address, ConfigError, TransportError, TransportErrorKind};
use relink_reconnect::{
    Command, ConnectionOptions, Coordinator, Disposition, Effect, Event, FailureReason,
    Notification, Phase, ReconnectOptions,
};
use std::time::Duration;

fn coordinator(options: impl Into<ConnectionOptions>) -> Coordinator {
    let mut coordinator = Coordinator::new(Address::new("a"), options.into());
    let effects = step(&mut coordinator, Event::Start, quiet);
    assert_eq!(
        effects,
        vec![Effect::Connect {
            target: Address::new("a"),
            attempt: 1
        }]
    );
    coordinator
}

fn reconnect() -> ReconnectOptions {
    ReconnectOptions::new().delay(Duration::from_millis(10))
}

fn update(options: impl Into<ConnectionOptions>) -> Command {
    Command::UpdateOptions(options.into())
}

#[test]
fn cycles_base_and_failover_with_growing_delay() {
    let mut coordinator = coordinator(
        ConnectionOptions::builder()
            .reconnect(reconnect())
            .failover_urls(["b", "c"]),
    );

    let retries: Vec<_> = (0..4).map(|_| fail_and_retry(&mut coordinator, quiet)).collect();

    assert_eq!(
        retries,
        vec![
            (1, Duration::from_millis(10), Address::new("b")),
            (2, Duration::from_millis(20), Address::new("c")),
            (3, Duration::from_millis(40), Address::new("a")),
            (4, Duration::from_millis(80), Address::new("b")),
        ]
    );
    assert_eq!(coordinator.connects(), 5);
}

#[test]
fn sticky_url_set_between_attempts_two_and_three() {
    let mut coordinator = coordinator(
        ConnectionOptions::builder()
            .reconnect(reconnect())
            .failover_urls(["b", "c"]),
    );

    let (_, _, second) = fail_and_retry(&mut coordinator, quiet);
    assert_eq!(second, Address::new("b"));

    let (_, _, third) = fail_and_retry(&mut coordinator, |notification| match notification {
        Notification::TransportError(_) => {
            vec![update(ConnectionOptions::builder().reconnect_url("x"))]
        }
        _ => Vec::new(),
    });
    assert_eq!(third, Address::new("x"));

    for _ in 0..3 {
        let (_, _, target) = fail_and_retry(&mut coordinator, quiet);
        assert_eq!(target, Address::new("x"));
    }
    assert_eq!(coordinator.options().reconnect_url(), Some(&Address::new("x")));
}

#[test]
fn clearing_sticky_url_resumes_rotation() {
    let mut coordinator = coordinator(
        ConnectionOptions::builder()
            .reconnect(reconnect())
            .reconnect_url("x")
            .failover_urls(["b"]),
    );

    assert_eq!(fail_and_retry(&mut coordinator, quiet).2, Address::new("x"));

    let (_, _, target) = fail_and_retry(&mut coordinator, |_| {
        vec![update(ConnectionOptions::builder().clear_reconnect_url())]
    });
    assert_eq!(target, Address::new("b"));
}

#[test]
fn failover_list_added_mid_retry() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));

    let effects = step(
        &mut coordinator,
        Event::TransportFailed(refused(&Address::new("a"))),
        quiet,
    );
    assert_eq!(scheduled(&effects).map(|retry| retry.2), Some(Address::new("a")));
    assert_eq!(coordinator.phase(), Phase::PendingRetry);

    // The application reconfigures while the retry timer is armed.
    let effects = step(
        &mut coordinator,
        Event::Command(update(ConnectionOptions::builder().failover_urls(["y"]))),
        quiet,
    );
    assert!(effects.is_empty());

    step(&mut coordinator, Event::RetryDue, quiet);
    let (_, _, target) = fail_and_retry(&mut coordinator, quiet);
    assert_eq!(target, Address::new("y"));
    assert_eq!(fail_and_retry(&mut coordinator, quiet).2, Address::new("a"));
}

#[test]
fn unrelated_update_keeps_rotation() {
    let mut coordinator = coordinator(
        ConnectionOptions::builder()
            .reconnect(reconnect())
            .failover_urls(["b"])
            .user("user0"),
    );

    let (_, _, first) = fail_and_retry(&mut coordinator, |_| {
        vec![update(ConnectionOptions::builder().user("user1"))]
    });
    let (_, _, second) = fail_and_retry(&mut coordinator, quiet);

    assert_eq!(first, Address::new("b"));
    assert_eq!(second, Address::new("a"));
    assert_eq!(coordinator.options().user(), Some("user1"));
    assert_eq!(coordinator.options().failover_urls(), &[Address::new("b")]);
}

#[test]
fn reconnect_options_update_applies_to_next_delay() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));

    let (_, delay, _) = fail_and_retry(&mut coordinator, |_| {
        vec![update(
            ConnectionOptions::builder().reconnect(ReconnectOptions::new().multiplier(3.0)),
        )]
    });
    // Applied before the delay of this very retry is planned.
    assert_eq!(delay, Duration::from_millis(10));

    let (_, delay, _) = fail_and_retry(&mut coordinator, quiet);
    assert_eq!(delay, Duration::from_millis(30));

    let policy = coordinator.options().reconnect_policy().unwrap();
    assert_eq!(policy.backoff.initial_delay(), Duration::from_millis(10));
    assert_eq!(policy.backoff.growth(), 3.0);
}

#[test]
fn close_from_transport_error_aborts() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));
    let error = refused(&Address::new("a"));

    let effects = step(
        &mut coordinator,
        Event::TransportFailed(error.clone()),
        |notification| match notification {
            Notification::TransportError(_) => vec![Command::Close],
            _ => Vec::new(),
        },
    );

    assert_eq!(
        effects,
        vec![
            Effect::Notify(Notification::TransportError(error)),
            Effect::Notify(Notification::TransportClose(Disposition::Aborted)),
        ]
    );
    assert_eq!(coordinator.phase(), Phase::Closed);
    assert_eq!(coordinator.connects(), 1);
    assert!(step(&mut coordinator, Event::RetryDue, quiet).is_empty());
}

#[test]
fn disabled_reconnect_reports_once() {
    let mut coordinator = coordinator(ConnectionOptions::new());
    let error = refused(&Address::new("a"));

    let effects = step(&mut coordinator, Event::TransportFailed(error.clone()), quiet);

    assert_eq!(
        effects,
        vec![
            Effect::Notify(Notification::ConnectionError(error.clone())),
            Effect::Notify(Notification::TransportClose(Disposition::Failed(
                FailureReason::ReconnectDisabled(error.clone())
            ))),
        ]
    );
    assert_eq!(coordinator.phase(), Phase::Failed);

    // A late failure from the same transport is ignored.
    assert!(step(&mut coordinator, Event::TransportFailed(error), quiet).is_empty());
}

#[test]
fn explicit_no_reconnect_overrides_lower_layer() {
    let base = ConnectionOptions::builder().reconnect(reconnect()).build();
    let options = base.overlay(&ConnectionOptions::builder().no_reconnect().build());
    let mut coordinator = coordinator(options);

    let effects = step(
        &mut coordinator,
        Event::TransportFailed(refused(&Address::new("a"))),
        quiet,
    );
    assert!(matches!(
        effects.first(),
        Some(Effect::Notify(Notification::ConnectionError(_)))
    ));
}

#[test]
fn exhausts_after_max_attempts_retries() {
    let mut coordinator = coordinator(
        ConnectionOptions::builder()
            .reconnect(reconnect().max_attempts(2))
            .failover_urls(["b"]),
    );

    fail_and_retry(&mut coordinator, quiet);
    fail_and_retry(&mut coordinator, quiet);
    assert_eq!(coordinator.connects(), 3);

    let last = TransportError::new(TransportErrorKind::Timeout, Address::new("a"), "timed out");
    let effects = step(&mut coordinator, Event::TransportFailed(last.clone()), quiet);

    match effects.last() {
        Some(Effect::Notify(Notification::TransportClose(Disposition::Failed(
            FailureReason::RetriesExhausted {
                exhausted,
                last_error,
            },
        )))) => {
            assert_eq!(exhausted.max_attempts, 2);
            assert_eq!(exhausted.attempts, 2);
            assert_eq!(last_error, &last);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert!(scheduled(&effects).is_none());
    assert_eq!(coordinator.phase(), Phase::Failed);
    assert_eq!(coordinator.connects(), 3);
}

#[test]
fn open_resets_attempt_count() {
    let mut coordinator = coordinator(
        ConnectionOptions::builder().reconnect(reconnect().max_attempts(2)),
    );

    fail_and_retry(&mut coordinator, quiet);
    fail_and_retry(&mut coordinator, quiet);
    assert_eq!(coordinator.state().attempt_count(), 2);

    step(&mut coordinator, Event::Connected, quiet);
    assert_eq!(coordinator.state().attempt_count(), 0);

    // The budget is fresh after a successful open.
    let (retry, delay, _) = fail_and_retry(&mut coordinator, quiet);
    assert_eq!((retry, delay), (1, Duration::from_millis(10)));
}

#[test]
fn reconnected_flag_follows_first_retry() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));

    let effects = step(&mut coordinator, Event::Connected, quiet);
    assert_eq!(
        effects,
        vec![Effect::Notify(Notification::ConnectionOpen { reconnected: false })]
    );

    let effects = step(
        &mut coordinator,
        Event::TransportFailed(TransportError::new(
            TransportErrorKind::Lost,
            Address::new("a"),
            "connection reset",
        )),
        quiet,
    );
    assert!(scheduled(&effects).is_some());

    step(&mut coordinator, Event::RetryDue, quiet);
    let effects = step(&mut coordinator, Event::Connected, quiet);
    assert_eq!(
        effects,
        vec![Effect::Notify(Notification::ConnectionOpen { reconnected: true })]
    );
    assert!(coordinator.state().reconnected());
}

#[test]
fn stop_during_pending_retry() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));
    step(
        &mut coordinator,
        Event::TransportFailed(refused(&Address::new("a"))),
        quiet,
    );
    assert_eq!(coordinator.phase(), Phase::PendingRetry);

    let effects = step(&mut coordinator, Event::Stop, quiet);
    assert_eq!(
        effects,
        vec![
            Effect::CancelRetry,
            Effect::Notify(Notification::TransportClose(Disposition::Stopped)),
        ]
    );
    assert_eq!(coordinator.phase(), Phase::Closed);
    assert!(step(&mut coordinator, Event::RetryDue, quiet).is_empty());
    assert_eq!(coordinator.connects(), 1);
}

#[test]
fn stop_while_open_disconnects() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));
    step(&mut coordinator, Event::Connected, quiet);

    let effects = step(&mut coordinator, Event::Stop, quiet);
    assert_eq!(
        effects,
        vec![
            Effect::Disconnect,
            Effect::Notify(Notification::TransportClose(Disposition::Stopped)),
        ]
    );
}

#[test]
fn close_from_open_callback_is_clean() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));

    let effects = step(&mut coordinator, Event::Connected, |notification| {
        match notification {
            Notification::ConnectionOpen { .. } => vec![Command::Close],
            _ => Vec::new(),
        }
    });

    assert_eq!(
        effects,
        vec![
            Effect::Notify(Notification::ConnectionOpen { reconnected: false }),
            Effect::Disconnect,
            Effect::Notify(Notification::ConnectionClose),
            Effect::Notify(Notification::TransportClose(Disposition::Clean)),
        ]
    );
    assert_eq!(coordinator.phase(), Phase::Closed);
}

#[test]
fn peer_redirect_is_used_once() {
    let mut coordinator = coordinator(
        ConnectionOptions::builder()
            .reconnect(reconnect())
            .failover_urls(["b"]),
    );

    let moved = TransportError::new(TransportErrorKind::Lost, Address::new("a"), "moved")
        .with_redirect(Address::new("r"));
    let effects = step(&mut coordinator, Event::TransportFailed(moved), quiet);
    assert_eq!(scheduled(&effects).map(|retry| retry.2), Some(Address::new("r")));

    step(&mut coordinator, Event::RetryDue, quiet);
    assert_eq!(fail_and_retry(&mut coordinator, quiet).2, Address::new("b"));
    assert_eq!(fail_and_retry(&mut coordinator, quiet).2, Address::new("a"));
}

#[test]
fn one_shot_redirect_shadows_sticky() {
    let mut coordinator = coordinator(
        ConnectionOptions::builder()
            .reconnect(reconnect())
            .failover_urls(["b"]),
    );

    let (_, _, target) = fail_and_retry(&mut coordinator, |_| {
        vec![
            Command::Redirect {
                address: Address::new("x"),
                sticky: true,
            },
            Command::Redirect {
                address: Address::new("r"),
                sticky: false,
            },
        ]
    });
    assert_eq!(target, Address::new("r"));

    assert_eq!(fail_and_retry(&mut coordinator, quiet).2, Address::new("x"));
    assert_eq!(fail_and_retry(&mut coordinator, quiet).2, Address::new("x"));
}

#[test]
fn invalid_update_from_callback_is_rejected() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));

    let effects = step(
        &mut coordinator,
        Event::TransportFailed(refused(&Address::new("a"))),
        |notification| match notification {
            Notification::TransportError(_) => vec![update(
                ConnectionOptions::builder()
                    .reconnect(ReconnectOptions::new().max_delay(Duration::from_millis(1))),
            )],
            _ => Vec::new(),
        },
    );

    assert!(effects.contains(&Effect::RejectOptions(ConfigError::InvalidDelay {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(1),
    })));
    let (_, delay, _) = scheduled(&effects).unwrap();
    assert_eq!(delay, Duration::from_millis(10));
    assert_eq!(
        coordinator.options(),
        &ConnectionOptions::builder().reconnect(reconnect()).build()
    );
}

#[test]
fn invalid_external_update_is_rejected() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));
    step(&mut coordinator, Event::Connected, quiet);

    let effects = step(
        &mut coordinator,
        Event::Command(update(
            ConnectionOptions::builder()
                .reconnect(ReconnectOptions::new().max_delay(Duration::from_millis(1))),
        )),
        quiet,
    );

    assert_eq!(
        effects,
        vec![Effect::RejectOptions(ConfigError::InvalidDelay {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1),
        })]
    );
    assert_eq!(
        coordinator.options(),
        &ConnectionOptions::builder().reconnect(reconnect()).build()
    );

    // A valid update afterwards still lands.
    let effects = step(
        &mut coordinator,
        Event::Command(update(ConnectionOptions::builder().user("user1"))),
        quiet,
    );
    assert!(effects.is_empty());
    assert_eq!(coordinator.options().user(), Some("user1"));
}

fn auth_failed(address: &Address) -> TransportError {
    TransportError::new(
        TransportErrorKind::Authentication,
        address.clone(),
        "access refused",
    )
}

#[test]
fn authentication_failure_is_retried_when_reconnecting() {
    let mut coordinator = coordinator(
        ConnectionOptions::builder()
            .reconnect(reconnect())
            .failover_urls(["b"]),
    );
    let error = auth_failed(&Address::new("a"));

    let effects = step(&mut coordinator, Event::TransportFailed(error.clone()), quiet);

    assert_eq!(
        effects,
        vec![
            Effect::Notify(Notification::TransportError(error)),
            Effect::ScheduleRetry {
                delay: Duration::from_millis(10),
                retry: 1,
                target: Address::new("b"),
            },
        ]
    );
    assert_eq!(coordinator.phase(), Phase::PendingRetry);
}

#[test]
fn authentication_failure_without_reconnect_fails() {
    let mut coordinator = coordinator(ConnectionOptions::builder());
    let error = auth_failed(&Address::new("a"));
    assert!(error.is_authentication());

    let effects = step(&mut coordinator, Event::TransportFailed(error.clone()), quiet);

    assert_eq!(
        effects,
        vec![
            Effect::Notify(Notification::ConnectionError(error.clone())),
            Effect::Notify(Notification::TransportClose(Disposition::Failed(
                FailureReason::ReconnectDisabled(error)
            ))),
        ]
    );
    assert_eq!(coordinator.phase(), Phase::Failed);
}

#[test]
fn events_out_of_phase_are_ignored() {
    let mut coordinator = coordinator(ConnectionOptions::builder().reconnect(reconnect()));

    assert!(step(&mut coordinator, Event::RetryDue, quiet).is_empty());
    assert!(step(&mut coordinator, Event::Start, quiet).is_empty());
    assert_eq!(coordinator.phase(), Phase::Connecting);

    step(&mut coordinator, Event::Connected, quiet);
    assert!(step(&mut coordinator, Event::Connected, quiet).is_empty());
    assert_eq!(coordinator.phase(), Phase::Open);
}
