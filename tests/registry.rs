//! Reaction-chain tests for the error handler registry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use function_host::lifecycle::{
    Condition, FatalError, FatalEvent, FanOutError, HandlerError, RegistryOptions, TerminationPhase,
};

mod common;

use common::{Harness, Journal, RecordingResponder, SeenReport};

fn test_options() -> RegistryOptions {
    RegistryOptions {
        install_panic_hook: false,
        ..RegistryOptions::default()
    }
}

fn event_for(condition: Condition) -> FatalEvent {
    match condition {
        Condition::UncaughtException => FatalEvent::UncaughtException(FatalError::new("boom")),
        Condition::UnhandledRejection => FatalEvent::UnhandledRejection(FatalError::new("rejected")),
        Condition::ProcessExit => FatalEvent::ProcessExit(0),
        Condition::Interrupt => FatalEvent::Interrupt,
        Condition::Terminate => FatalEvent::Terminate,
    }
}

/// Registers a handler that journals `handler:<condition>`.
fn journaling_handler(harness: &Harness, condition: Condition, tag: &'static str) {
    let journal = harness.journal.clone();
    harness.registry.on(condition, move |c| {
        let journal = journal.clone();
        async move {
            journal.push(format!("{tag}:{c}"));
            Ok::<(), HandlerError>(())
        }
    });
}

#[tokio::test]
async fn each_condition_invokes_its_handler_once() {
    for condition in Condition::ALL {
        let harness = Harness::with_options(test_options());
        harness.registry.register(harness.server()).unwrap();
        journaling_handler(&harness, condition, "handler");

        harness.registry.dispatch(event_for(condition)).await;

        let expected = format!("handler:{}", condition.name());
        assert_eq!(harness.journal.count(&expected), 1, "{condition}");
        assert_eq!(harness.registry.phase(), TerminationPhase::Terminated);
    }
}

#[tokio::test]
async fn handler_for_other_condition_is_skipped() {
    let harness = Harness::with_options(test_options());
    harness.registry.register(harness.server()).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counted = calls.clone();
    harness.registry.on(Condition::Terminate, move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        async { Ok::<(), HandlerError>(()) }
    });

    harness.registry.dispatch(FatalEvent::Interrupt).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.terminator.codes(), vec![0]);
}

#[tokio::test]
async fn every_handler_for_a_condition_runs() {
    let harness = Harness::with_options(test_options());
    journaling_handler(&harness, Condition::UnhandledRejection, "first");
    journaling_handler(&harness, Condition::UnhandledRejection, "second");
    journaling_handler(&harness, Condition::UnhandledRejection, "first");
    assert_eq!(harness.registry.handler_count(Condition::UnhandledRejection), 3);

    harness
        .registry
        .dispatch(FatalEvent::UnhandledRejection(FatalError::new("lost")))
        .await;

    assert_eq!(harness.journal.count("first:unhandledRejection"), 2);
    assert_eq!(harness.journal.count("second:unhandledRejection"), 1);
}

#[tokio::test]
async fn uncaught_fault_awaits_handler_then_crashes_with_reserved_code() {
    let harness = Harness::with_options(test_options());

    let journal = harness.journal.clone();
    harness.registry.on(Condition::UncaughtException, move |c| {
        let journal = journal.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            journal.push(format!("handler:{c}"));
            Ok::<(), HandlerError>(())
        }
    });

    harness
        .registry
        .dispatch(FatalEvent::UncaughtException(FatalError::new("boom")))
        .await;

    assert_eq!(
        harness.journal.entries(),
        vec!["handler:uncaughtException", "crash:boom", "exit:16"]
    );
    assert_eq!(
        harness.responder.reports(),
        vec![SeenReport {
            message: "boom".into(),
            silent: false,
            exit_code: Some(16),
        }]
    );
}

#[tokio::test]
async fn configured_crash_code_is_used() {
    let harness = Harness::with_options(RegistryOptions {
        crash_exit_code: 42,
        ..test_options()
    });

    harness
        .registry
        .dispatch(FatalEvent::UnhandledRejection(FatalError::new("rejected")))
        .await;

    assert_eq!(harness.terminator.codes(), vec![42]);
    assert_eq!(harness.responder.reports()[0].exit_code, Some(42));
}

#[tokio::test]
async fn clean_exit_is_silent() {
    let harness = Harness::with_options(test_options());

    harness.registry.dispatch(FatalEvent::ProcessExit(0)).await;

    let reports = harness.responder.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].silent);
    assert_eq!(reports[0].exit_code, None);
    assert_eq!(harness.terminator.codes(), vec![0]);
}

#[tokio::test]
async fn failing_exit_reports_code() {
    let harness = Harness::with_options(test_options());

    harness.registry.dispatch(FatalEvent::ProcessExit(3)).await;

    let reports = harness.responder.reports();
    assert!(!reports[0].silent);
    assert!(reports[0].message.contains('3'), "{}", reports[0].message);
    assert_eq!(harness.terminator.codes(), vec![3]);
}

#[tokio::test]
async fn sigterm_closes_server_before_exit() {
    let harness = Harness::with_options(test_options());
    harness.registry.register(harness.server()).unwrap();
    journaling_handler(&harness, Condition::Terminate, "handler");

    harness.registry.dispatch(FatalEvent::Terminate).await;

    assert_eq!(
        harness.journal.entries(),
        vec!["handler:SIGTERM", "close:start", "close:done", "exit:0"]
    );
    assert!(harness.responder.reports().is_empty());
}

#[tokio::test]
async fn sigint_without_handlers_closes_and_exits_cleanly() {
    let harness = Harness::with_options(test_options());
    harness.registry.register(harness.server()).unwrap();

    harness.registry.dispatch(FatalEvent::Interrupt).await;

    assert_eq!(harness.journal.entries(), vec!["close:start", "close:done", "exit:0"]);
    assert!(harness.responder.reports().is_empty());
}

#[tokio::test]
async fn failing_handlers_do_not_block_siblings() {
    let harness = Harness::with_options(test_options());

    harness.registry.on(Condition::UncaughtException, |_| async {
        Err::<(), HandlerError>("flush failed".into())
    });
    harness.registry.on(Condition::UncaughtException, |c| async move {
        if c.is_crash() {
            panic!("handler blew up");
        }
        Ok::<(), HandlerError>(())
    });
    let journal = harness.journal.clone();
    harness.registry.on(Condition::UncaughtException, move |_| {
        let journal = journal.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            journal.push("slow sibling");
            Ok::<(), HandlerError>(())
        }
    });

    match harness.registry.run_handlers(Condition::UncaughtException).await {
        Err(FanOutError::Failed { condition, failures }) => {
            assert_eq!(condition, Condition::UncaughtException);
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].index, 0);
            assert_eq!(failures[0].reason, "flush failed");
            assert_eq!(failures[1].index, 1);
            assert!(failures[1].reason.contains("handler blew up"));
        }
        other => panic!("unexpected fan-out result: {other:?}"),
    }
    assert_eq!(harness.journal.count("slow sibling"), 1);

    harness
        .registry
        .dispatch(FatalEvent::UncaughtException(FatalError::new("boom")))
        .await;
    assert_eq!(harness.terminator.codes(), vec![16]);
}

#[tokio::test]
async fn stuck_handler_is_cut_off_by_timeout() {
    let harness = Harness::with_options(RegistryOptions {
        handler_timeout: Some(Duration::from_millis(50)),
        ..test_options()
    });
    harness.registry.on(Condition::UnhandledRejection, |_| async {
        std::future::pending::<()>().await;
        Ok::<(), HandlerError>(())
    });

    harness
        .registry
        .dispatch(FatalEvent::UnhandledRejection(FatalError::new("lost")))
        .await;

    assert_eq!(harness.journal.entries(), vec!["crash:lost", "exit:16"]);
}

#[tokio::test]
async fn second_terminal_event_is_ignored() {
    let harness = Harness::with_options(test_options());
    harness.registry.register(harness.server()).unwrap();
    journaling_handler(&harness, Condition::UncaughtException, "handler");

    harness.registry.dispatch(FatalEvent::Terminate).await;
    harness
        .registry
        .dispatch(FatalEvent::UncaughtException(FatalError::new("late")))
        .await;

    assert_eq!(harness.terminator.codes(), vec![0]);
    assert_eq!(harness.journal.count("handler:uncaughtException"), 0);
    assert!(harness.responder.reports().is_empty());
}

#[tokio::test]
async fn dropped_callback_still_terminates() {
    let journal = Journal::default();
    let responder = Arc::new(RecordingResponder::dropping_callback(journal.clone()));
    let harness = Harness::build(journal, responder, test_options());

    harness
        .registry
        .dispatch(FatalEvent::UncaughtException(FatalError::new("boom")))
        .await;

    assert_eq!(harness.terminator.codes(), vec![16]);
}

#[tokio::test]
async fn register_is_rejected_twice() {
    let harness = Harness::with_options(test_options());
    harness.registry.register(harness.server()).unwrap();
    assert!(harness.registry.register(harness.server()).is_err());
}

#[tokio::test]
async fn reporter_events_reach_dispatcher() {
    let harness = Harness::with_options(test_options());
    journaling_handler(&harness, Condition::UnhandledRejection, "handler");
    let _dispatcher = harness.registry.register(harness.server()).unwrap();

    harness
        .registry
        .reporter()
        .spawn_watched("telemetry", async { Err::<(), _>("upstream gone") });

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.terminator.codes().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dispatcher never terminated");

    assert_eq!(
        harness.journal.entries(),
        vec![
            "handler:unhandledRejection",
            "crash:telemetry: upstream gone",
            "exit:16"
        ]
    );
}

#[tokio::test]
async fn panicking_responder_still_terminates_with_crash_code() {
    let journal = Journal::default();
    let responder = Arc::new(RecordingResponder::panicking(journal.clone()));
    let harness = Harness::build(journal, responder, test_options());
    let _dispatcher = harness.registry.register(harness.server()).unwrap();

    harness
        .registry
        .reporter()
        .report_rejection(FatalError::new("lost"));

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.registry.phase() != TerminationPhase::Terminated {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dispatcher never finished");

    assert_eq!(harness.journal.entries(), vec!["crash:lost", "exit:16"]);
    assert_eq!(harness.terminator.codes(), vec![16]);
}

#[tokio::test]
async fn panicking_exit_finalize_uses_crash_code() {
    let journal = Journal::default();
    let responder = Arc::new(RecordingResponder::panicking(journal.clone()));
    let harness = Harness::build(journal, responder, test_options());

    harness.registry.dispatch(FatalEvent::ProcessExit(0)).await;

    assert_eq!(harness.terminator.codes(), vec![16]);
    assert_eq!(harness.registry.phase(), TerminationPhase::Terminated);
}

#[tokio::test]
async fn repeated_signal_forces_exit_past_stuck_handler() {
    let harness = Harness::with_options(test_options());
    let _dispatcher = harness.registry.register(harness.server()).unwrap();
    harness.registry.on(Condition::Interrupt, |_| async {
        std::future::pending::<()>().await;
        Ok::<(), HandlerError>(())
    });

    assert!(harness.registry.deliver_signal(FatalEvent::Interrupt));
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.registry.phase() == TerminationPhase::Running {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dispatcher never started the SIGINT chain");
    assert!(harness.terminator.codes().is_empty());

    assert!(harness.registry.deliver_signal(FatalEvent::Interrupt));

    assert_eq!(harness.terminator.codes(), vec![130]);
    assert_eq!(harness.registry.phase(), TerminationPhase::Terminating);
    assert_eq!(harness.journal.count("close:start"), 0);
}

#[tokio::test]
async fn non_signal_events_pass_straight_through() {
    let harness = Harness::with_options(test_options());
    let _dispatcher = harness.registry.register(harness.server()).unwrap();

    assert!(harness.registry.deliver_signal(FatalEvent::UncaughtException(FatalError::new("boom"))));

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.terminator.codes().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dispatcher never terminated");
    assert_eq!(harness.terminator.codes(), vec![16]);
}
