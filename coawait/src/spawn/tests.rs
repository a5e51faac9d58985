use super::*;
use crate::adapter::signature::{Code, CodeValue, Failure, FailureValue, NoArgs, Value};
use crate::computation::ResultHandle;
use crate::error::{Error, ErrorCode};
use crate::runtime::{Action, LocalExecutor};
use crate::test_utils::{FakeService, init_tracing};
use crate::utils::scheduler::{Call, Method};
use anyhow::anyhow;
use futures::channel::oneshot;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type Outcomes<T> = Arc<Mutex<Vec<Result<T>>>>;

fn collect<T>() -> (Outcomes<T>, token::Callback<impl FnOnce(Result<T>) + Send + 'static>)
where
    T: Send + 'static,
{
    let outcomes: Outcomes<T> = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    (outcomes, token::callback(move |res| sink.lock().push(res)))
}

#[track_caller]
fn take_one<T>(outcomes: &Outcomes<T>) -> Result<T> {
    let mut outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1, "expected exactly one outcome");
    outcomes.pop().unwrap()
}

#[test]
fn test_value_delivered_once() {
    init_tracing();
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<u32>();

    spawn(&local, |_ctx| async { Ok(42) }, token);

    // The first resumption is posted, never run inline.
    assert!(outcomes.lock().is_empty());
    assert_eq!(local.outstanding_work(), 1);

    local.run_until_idle();
    assert_eq!(take_one(&outcomes).unwrap(), 42);
    assert_eq!(local.outstanding_work(), 0);
}

#[test]
fn test_failure_delivers_default_value() {
    let local = LocalExecutor::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    spawn(
        &local,
        |_ctx| async { Err::<String, Error>(Error::Failed(anyhow!("refused"))) },
        token::handler(move |err: Option<Error>, value: String| {
            sink.lock().push((err.map(|e| e.to_string()), value));
        }),
    );
    local.run_until_idle();

    assert_eq!(
        *seen.lock(),
        vec![(Some("refused".to_string()), String::new())]
    );
}

#[test]
fn test_success_through_error_first_handler() {
    let local = LocalExecutor::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    spawn(
        &local,
        |_ctx| async { Ok(vec![1_u8, 2]) },
        token::handler(move |err: Option<Error>, value: Vec<u8>| {
            sink.lock().push((err.is_none(), value));
        }),
    );
    local.run_until_idle();

    assert_eq!(*seen.lock(), vec![(true, vec![1, 2])]);
}

#[test]
fn test_panic_before_value_is_reported() {
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<u8>();

    spawn(
        &local,
        |_ctx| async {
            let fail = true;
            if fail {
                panic!("boom");
            }
            Ok(1)
        },
        token,
    );
    local.run_until_idle();

    match take_one(&outcomes) {
        Err(Error::Panicked(msg)) => assert_eq!(msg, "boom"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(local.tracker().num_calls(&Method::Destroy), 1);
}

#[test]
fn test_every_callback_shape() {
    init_tracing();
    let local = LocalExecutor::new();
    let svc = FakeService::new();
    let (outcomes, token) = collect::<(usize, String, u64)>();

    let s = svc.clone();
    spawn(
        &local,
        move |ctx| async move {
            ctx.initiate::<NoArgs, _>(|a| s.async_ping(a.into_fn())).await?;
            ctx.initiate::<Code, _>(|a| s.async_wait(ErrorCode::SUCCESS, a.into_fn())).await?;
            let n = ctx
                .initiate::<CodeValue<usize>, _>(|a| {
                    s.async_read(ErrorCode::SUCCESS, 12, a.into_fn())
                })
                .await?;
            ctx.initiate::<Failure, _>(|a| s.async_check(None, a.into_fn())).await?;
            let name = ctx
                .initiate::<FailureValue<String>, _>(|a| {
                    s.async_fetch(None, "db".to_string(), a.into_fn())
                })
                .await?;
            let raw = ctx
                .initiate::<Value<u64>, _>(|a| s.async_value(9, a.into_fn()))
                .await?;
            Ok::<_, Error>((n, name, raw))
        },
        token,
    );

    local.run_until_idle();
    let mut completed = 0;
    while svc.complete_next() {
        completed += 1;
        local.run_until_idle();
    }

    assert_eq!(completed, 6);
    assert_eq!(take_one(&outcomes).unwrap(), (12, "db".to_string(), 9));

    let tracker = local.tracker();
    assert_eq!(tracker.num_calls(&Method::AdapterArmed), 6);
    assert_eq!(tracker.num_calls(&Method::AdapterInvoked), 6);
    assert_eq!(tracker.num_calls(&Method::Cleanup), 1);
    assert_eq!(tracker.num_calls(&Method::Destroy), 1);
}

#[test]
fn test_reported_failure_leaves_value_empty() {
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<usize>();
    let value_slot_empty = Arc::new(AtomicBool::new(false));

    let empty = value_slot_empty.clone();
    spawn(
        &local,
        move |ctx| async move {
            let handle = ctx.initiate::<CodeValue<usize>, _>(|a| {
                a.complete((ErrorCode::from_raw(104), 99))
            });
            empty.store(handle.is_ready() && !handle.has_value(), Ordering::SeqCst);
            handle.await
        },
        token,
    );
    local.run_until_idle();

    assert!(value_slot_empty.load(Ordering::SeqCst));
    let err = take_one(&outcomes).unwrap_err();
    assert!(matches!(err, Error::System(_)));
    assert_eq!(err.raw_os_error(), Some(104));
}

#[test]
fn test_typed_failure_from_foreign_completion() {
    let local = LocalExecutor::new();
    let other = LocalExecutor::new();
    let svc = FakeService::new();
    let (outcomes, token) = collect::<u32>();

    let s = svc.clone();
    spawn(
        &local,
        move |ctx| async move {
            ctx.initiate::<FailureValue<u32>, _>(|a| {
                s.async_fetch(Some(anyhow!("row not found")), 0, a.into_fn())
            })
            .await
        },
        token,
    );

    local.run_until_idle();
    assert!(svc.complete_next_on(&other));
    assert_eq!(other.run_until_idle(), 1);
    assert!(outcomes.lock().is_empty());

    local.run_until_idle();
    let err = take_one(&outcomes).unwrap_err();
    assert_eq!(err.to_string(), "row not found");
}

#[test]
fn test_ready_handles_do_not_suspend() {
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<u8>();

    spawn(
        &local,
        |ctx| async move {
            let handle = ctx.initiate::<Value<u8>, _>(|a| a.complete((5,)));
            assert!(handle.is_ready());
            let five = handle.await?;
            let six = ResultHandle::new(async { Ok(6_u8) }).await?;
            Ok::<_, Error>(five + six)
        },
        token,
    );
    local.run_until_idle();

    assert_eq!(take_one(&outcomes).unwrap(), 11);
    assert_eq!(local.tracker().num_calls(&Method::Schedule), 1);
    assert_eq!(local.tracker().num_calls(&Method::Resume), 1);
}

#[test]
fn test_sequential_awaits_strictly_ordered() {
    let main = LocalExecutor::new();
    let worker_a = LocalExecutor::new();
    let worker_b = LocalExecutor::new();
    let svc = FakeService::new();
    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let (outcomes, token) = collect::<()>();

    let (s, l) = (svc.clone(), log.clone());
    spawn(
        &main,
        move |ctx| async move {
            l.lock().push("start");
            ctx.initiate::<NoArgs, _>(|a| s.async_ping(a.into_fn())).await?;
            l.lock().push("first done");
            ctx.initiate::<NoArgs, _>(|a| s.async_ping(a.into_fn())).await?;
            l.lock().push("second done");
            Ok::<_, Error>(())
        },
        token,
    );

    main.run_until_idle();
    assert_eq!(*log.lock(), ["start"]);
    assert_eq!(svc.pending(), 1);

    // First completion on worker A: the chain is resumed through its own
    // executor, not on A.
    svc.complete_next_on(&worker_a);
    assert_eq!(worker_a.run_until_idle(), 1);
    assert_eq!(*log.lock(), ["start"]);
    assert_eq!(svc.pending(), 0);

    main.run_until_idle();
    assert_eq!(*log.lock(), ["start", "first done"]);
    assert_eq!(svc.pending(), 1);

    svc.complete_next_on(&worker_b);
    worker_b.run_until_idle();
    main.run_until_idle();
    assert_eq!(*log.lock(), ["start", "first done", "second done"]);
    assert!(take_one(&outcomes).is_ok());
}

#[test]
fn test_completion_on_own_executor_resumes_inline() {
    let local = LocalExecutor::new();
    let svc = FakeService::new();
    let (outcomes, token) = collect::<()>();

    let s = svc.clone();
    spawn(
        &local,
        move |ctx| async move { ctx.initiate::<NoArgs, _>(|a| s.async_ping(a.into_fn())).await },
        token,
    );
    local.run_until_idle();

    svc.complete_next_on(&local);
    // Completion then cleanup: the resumption itself ran inline.
    assert_eq!(local.run_until_idle(), 2);
    assert!(take_one(&outcomes).is_ok());
    assert!(
        local
            .tracker()
            .get_calls(&Method::Dispatch)
            .contains(&Call::Dispatch { inline: true })
    );
}

#[test]
fn test_last_reference_posts_one_cleanup() {
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<()>();

    spawn(&local, |_ctx| async { Ok(()) }, token);

    assert!(local.run_one());
    assert!(take_one(&outcomes).is_ok());

    // Destruction is queued, not performed by the worker that released.
    let tracker = local.tracker();
    assert_eq!(tracker.num_calls(&Method::Cleanup), 1);
    assert_eq!(tracker.num_calls(&Method::Destroy), 0);
    assert_eq!(local.pending(), 1);

    assert!(local.run_one());
    assert_eq!(tracker.num_calls(&Method::Cleanup), 1);
    assert_eq!(tracker.num_calls(&Method::Destroy), 1);
    assert!(!local.run_one());
}

#[test]
fn test_dropped_adapter_tears_chain_down() {
    init_tracing();
    let local = LocalExecutor::new();
    let svc = FakeService::new();
    let (outcomes, token) = collect::<()>();

    let s = svc.clone();
    spawn(
        &local,
        move |ctx| async move { ctx.initiate::<NoArgs, _>(|a| s.async_ping(a.into_fn())).await },
        token,
    );
    local.run_until_idle();
    assert_eq!(local.tracker().num_calls(&Method::Cleanup), 0);

    svc.abandon_all();
    assert_eq!(local.tracker().num_calls(&Method::Cleanup), 1);
    assert_eq!(local.tracker().num_calls(&Method::Destroy), 0);

    assert!(outcomes.lock().is_empty());

    local.run_until_idle();
    assert_eq!(local.tracker().num_calls(&Method::Destroy), 1);
    assert!(matches!(take_one(&outcomes), Err(Error::Abandoned)));
    assert_eq!(local.outstanding_work(), 0);
}

#[test]
fn test_foreign_future_chain_is_abandoned() {
    let local = LocalExecutor::new();
    let (tx, rx) = oneshot::channel::<u32>();
    let (outcomes, token) = collect::<u32>();

    spawn(
        &local,
        move |_ctx| async move { rx.await.map_err(|canceled| Error::Failed(canceled.into())) },
        token,
    );

    // Nothing holds a reference while the chain waits on the channel: the
    // resume action posts the cleanup, which reports the abandonment.
    assert_eq!(local.run_until_idle(), 2);
    assert_eq!(local.tracker().num_calls(&Method::Destroy), 1);
    assert!(matches!(take_one(&outcomes), Err(Error::Abandoned)));
    assert!(tx.send(7).is_err());
}

#[test]
fn test_error_first_handler_sees_abandonment() {
    let local = LocalExecutor::new();
    let svc = FakeService::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let (s, sink) = (svc.clone(), seen.clone());
    spawn(
        &local,
        move |ctx| async move {
            ctx.initiate::<Value<String>, _>(|a| s.async_value("late".to_string(), a.into_fn()))
                .await
        },
        token::handler(move |err: Option<Error>, value: String| {
            sink.lock().push((matches!(err, Some(Error::Abandoned)), value));
        }),
    );
    local.run_until_idle();

    svc.abandon_all();
    local.run_until_idle();
    assert_eq!(*seen.lock(), vec![(true, String::new())]);
}

#[test]
fn test_detached_chain_abandoned_quietly() {
    init_tracing();
    let local = LocalExecutor::new();
    let svc = FakeService::new();

    let s = svc.clone();
    spawn(
        &local,
        move |ctx| async move { ctx.initiate::<NoArgs, _>(|a| s.async_ping(a.into_fn())).await },
        token::Detached,
    );
    local.run_until_idle();

    svc.abandon_all();
    assert_eq!(local.run_until_idle(), 1);
    assert_eq!(local.tracker().num_calls(&Method::Destroy), 1);
    assert_eq!(local.outstanding_work(), 0);
}

/// Drops everything posted to it.
#[derive(Debug, Clone)]
struct DiscardAll;

impl Executor for DiscardAll {
    fn post(&self, action: Action) {
        drop(action);
    }

    fn running_in_this_thread(&self) -> bool {
        false
    }
}

#[test]
fn test_discarded_handler_reports_abandonment() {
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<u8>();

    spawn(&local, |_ctx| async { Ok(3) }, token::bind(DiscardAll, token));
    local.run_until_idle();

    assert!(matches!(take_one(&outcomes), Err(Error::Abandoned)));
}

#[test]
fn test_discarded_cleanup_still_destroys() {
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<()>();

    // The chain lives on an executor that never runs anything.
    spawn(&DiscardAll, |_ctx| async { Ok(()) }, token::bind(local.clone(), token));

    assert!(outcomes.lock().is_empty());
    local.run_until_idle();
    assert!(matches!(take_one(&outcomes), Err(Error::Abandoned)));
    assert_eq!(local.outstanding_work(), 0);
}

#[test]
fn test_nested_spawn_completes_parent_directly() {
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<u32>();

    spawn(
        &local,
        |ctx| async move {
            let child = ctx.spawn(|_child| async { Ok(20_u32) }, &ctx);
            let twenty = child.await?;
            Ok::<_, Error>(twenty + 1)
        },
        token,
    );
    local.run_until_idle();

    assert_eq!(take_one(&outcomes).unwrap(), 21);

    let tracker = local.tracker();
    assert_eq!(tracker.num_calls(&Method::AdapterArmed), 0);
    assert_eq!(tracker.num_calls(&Method::Spawn), 2);
    assert_eq!(tracker.num_calls(&Method::Cleanup), 2);
    assert_eq!(tracker.num_calls(&Method::Destroy), 2);
    assert!(
        tracker
            .get_calls(&Method::Dispatch)
            .contains(&Call::Dispatch { inline: true })
    );
}

#[test]
fn test_nested_failure_propagates() {
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<u32>();

    spawn(
        &local,
        |ctx| async move {
            let child = ctx.spawn(
                |_child| async { Err::<u32, Error>(Error::Failed(anyhow!("child failed"))) },
                &ctx,
            );
            let value = child.await?;
            Ok::<_, Error>(value)
        },
        token,
    );
    local.run_until_idle();

    assert_eq!(take_one(&outcomes).unwrap_err().to_string(), "child failed");
}

#[test]
fn test_destroyed_child_abandons_parent() {
    let local = LocalExecutor::new();
    let svc = FakeService::new();
    let (outcomes, token) = collect::<()>();

    let s = svc.clone();
    spawn(
        &local,
        move |ctx| async move {
            let child = ctx.spawn(
                move |child| async move {
                    child.initiate::<NoArgs, _>(|a| s.async_ping(a.into_fn())).await
                },
                &ctx,
            );
            child.await
        },
        token,
    );
    local.run_until_idle();
    assert_eq!(svc.pending(), 1);

    svc.abandon_all();
    local.run_until_idle();

    assert!(matches!(take_one(&outcomes), Err(Error::Abandoned)));
    assert_eq!(local.tracker().num_calls(&Method::Destroy), 2);
}

#[test]
fn test_failure_after_completion_unwinds_worker() {
    let local = LocalExecutor::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    spawn(
        &local,
        |_ctx| async { Ok(1_i32) },
        token::callback(move |_res: Result<i32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("handler exploded");
        }),
    );

    let payload = catch_unwind(AssertUnwindSafe(|| local.run_until_idle())).unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"handler exploded"));

    // Not reported again, and the chain is still torn down once.
    local.run_until_idle();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(local.tracker().num_calls(&Method::Cleanup), 1);
    assert_eq!(local.tracker().num_calls(&Method::Destroy), 1);
    assert_eq!(local.outstanding_work(), 0);
}

#[test]
fn test_bound_handler_runs_on_other_executor() {
    let local = LocalExecutor::new();
    let other = LocalExecutor::new();
    let (outcomes, token) = collect::<u8>();

    spawn(&local, |_ctx| async { Ok(3) }, token::bind(other.clone(), token));
    assert_eq!(other.outstanding_work(), 1);
    assert_eq!(local.outstanding_work(), 0);

    local.run_until_idle();
    assert!(outcomes.lock().is_empty());

    other.run_until_idle();
    assert_eq!(take_one(&outcomes).unwrap(), 3);
    assert_eq!(other.outstanding_work(), 0);
}

#[test]
fn test_spawn_with_leading_arguments() {
    let local = LocalExecutor::new();
    let (outcomes, token) = collect::<u32>();

    spawn_with(
        &local,
        |(a, b): (u32, u32), _ctx| async move { Ok(a * b) },
        (6, 7),
        token,
    );
    local.run_until_idle();

    assert_eq!(take_one(&outcomes).unwrap(), 42);
}

#[test]
fn test_detached_failure_is_swallowed() {
    init_tracing();
    let local = LocalExecutor::new();

    spawn(
        &local,
        |_ctx| async { Err::<(), Error>(Error::Failed(anyhow!("nobody listens"))) },
        token::Detached,
    );

    assert_eq!(local.run_until_idle(), 2);
    assert_eq!(local.tracker().num_calls(&Method::Destroy), 1);
}

#[test]
fn test_function_starts_on_first_resumption() {
    let local = LocalExecutor::new();
    let started = Arc::new(AtomicBool::new(false));

    let flag = started.clone();
    spawn(
        &local,
        move |ctx| {
            flag.store(true, Ordering::SeqCst);
            async move { Ok::<_, Error>(ctx.id()) }
        },
        token::Detached,
    );

    assert!(!started.load(Ordering::SeqCst));
    local.run_until_idle();
    assert!(started.load(Ordering::SeqCst));
}
