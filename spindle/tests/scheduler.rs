use spindle::{
    Dispatch, Error, Outcome, Promise, RuntimeBuilder, Scheduler, SchedulerConfig, Transaction,
    current_transaction, current_worker, with_transaction,
};

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn scheduler(workers: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        worker_threads: workers,
        ..SchedulerConfig::default()
    })
    .expect("Failed to start scheduler")
}

/// Submits 10,000 no-op tasks from 4 producer threads and waits for all.
fn run_burst(scheduler: &Arc<Scheduler>, counter: &Arc<AtomicUsize>) {
    let barrier = Arc::new(Barrier::new(4));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = scheduler.clone();
            let counter = counter.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                let promises: Vec<_> = (0..2_500)
                    .map(|_| {
                        let counter = counter.clone();
                        scheduler.submit(move || {
                            counter.fetch_add(1, Ordering::Relaxed);
                        })
                    })
                    .collect();

                for promise in promises {
                    promise.wait().expect("task failed");
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("Producer panicked");
    }
}

#[test]
fn test_every_task_runs_exactly_once() {
    for workers in 1..=4 {
        let scheduler = Arc::new(scheduler(workers));
        let counter = Arc::new(AtomicUsize::new(0));

        run_burst(&scheduler, &counter);

        assert_eq!(
            counter.load(Ordering::SeqCst),
            10_000,
            "{workers} worker(s) must run every task once"
        );
    }
}

#[test]
fn test_values_come_back_through_promises() {
    let rt = RuntimeBuilder::new()
        .worker_threads(2)
        .enable_reactor(false)
        .build()
        .expect("Failed to build runtime");

    let squares: Vec<_> = (0..100u64).map(|i| rt.submit(move || i * i)).collect();
    let total: u64 = Promise::all(squares).wait().unwrap().into_iter().sum();

    assert_eq!(total, (0..100u64).map(|i| i * i).sum());
    assert!(rt.reactor().is_none());
}

#[test]
fn test_panicking_task_fails_its_promise() {
    let scheduler = scheduler(2);

    let boom = scheduler.submit(|| -> u32 { panic!("kaboom") });
    match boom.wait() {
        Err(Error::Panicked(message)) => assert_eq!(message, "kaboom"),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let fine = scheduler.submit(|| 7u32);
    assert_eq!(fine.wait().unwrap(), 7, "workers survive a panicking task");
}

#[test]
fn test_fallible_task_reports_its_error() {
    let scheduler = scheduler(1);

    let failed = scheduler.submit_fallible(|| -> Outcome<u32> {
        Err(Error::failed(std::io::Error::other("no luck")))
    });

    let err = failed.wait().unwrap_err();
    assert!(matches!(err, Error::Failed(_)));
    assert!(err.to_string().contains("no luck"));
}

#[test]
fn test_full_ring_runs_tasks_inline() {
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 1,
        buffer_size: 2,
        produce_spins: 0,
        ..SchedulerConfig::default()
    })
    .unwrap();

    let gate = Arc::new(Barrier::new(2));
    let blocker = {
        let gate = gate.clone();
        scheduler.submit(move || {
            gate.wait();
        })
    };

    let caller = thread::current().id();
    let threads: Vec<_> = (0..8)
        .map(|_| scheduler.submit(move || thread::current().id()))
        .collect();

    gate.wait();
    blocker.wait().unwrap();

    let ids: Vec<_> = threads.iter().map(|p| p.wait().unwrap()).collect();
    assert!(
        ids.contains(&caller),
        "with 2 slots and a blocked worker some tasks must run on the caller"
    );
}

#[test]
fn test_sleeping_worker_does_not_fill_the_ring() {
    // Workers block as soon as they go idle, so one of them sleeps through
    // many laps of an 8-slot ring while the other does all the work.
    let scheduler = Scheduler::new(SchedulerConfig {
        worker_threads: 2,
        buffer_size: 8,
        consume_spins: 0,
        consume_yields: 0,
        consume_parks: 0,
        ..SchedulerConfig::default()
    })
    .expect("Failed to start scheduler");

    let caller = thread::current().id();

    for i in 0..200 {
        let ran_on = scheduler
            .submit(move || thread::current().id())
            .wait()
            .expect("Failed to run task");

        assert_ne!(ran_on, caller, "task {i} ran on the submitting thread");
    }
}

#[test]
fn test_transaction_follows_the_task() {
    let scheduler = scheduler(2);
    let transaction = Transaction::new(String::from("tx-1"));

    let seen = with_transaction(transaction.clone(), || {
        scheduler.submit(|| current_transaction())
    });

    let seen = seen.wait().unwrap().expect("transaction propagated");
    assert!(seen.ptr_eq(&transaction));
    assert_eq!(seen.downcast_ref::<String>().unwrap(), "tx-1");

    let none = scheduler.submit(|| current_transaction().is_none());
    assert!(none.wait().unwrap(), "tasks outside a transaction run without one");
}

#[test]
fn test_workers_know_their_index() {
    let scheduler = scheduler(3);

    let ids: HashSet<_> = (0..64)
        .map(|_| scheduler.submit(current_worker))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|p| p.wait().unwrap().expect("ran on a worker"))
        .collect();

    assert!(ids.iter().all(|id| *id < 3));
    assert_eq!(current_worker(), None);
}

struct Doubler {
    calls: AtomicUsize,
}

impl Dispatch for Doubler {
    type Callable = i64;
    type Value = i64;

    fn invoke(&self, callable: &i64) -> Outcome<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(callable * 2)
    }
}

#[test]
fn test_dispatch_invokes_the_dispatcher() {
    let scheduler = scheduler(2);
    let doubler = Arc::new(Doubler {
        calls: AtomicUsize::new(0),
    });

    let results: Vec<_> = (1..=5).map(|n| scheduler.dispatch(&doubler, n)).collect();
    let values = Promise::all(results).wait().unwrap();

    assert_eq!(values, vec![2, 4, 6, 8, 10]);
    assert_eq!(doubler.calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_shutdown_drains_queued_tasks() {
    let scheduler = scheduler(1);
    let done = Arc::new(Mutex::new(Vec::new()));

    let gate = Arc::new(Barrier::new(2));
    {
        let gate = gate.clone();
        scheduler.submit(move || {
            gate.wait();
            thread::sleep(Duration::from_millis(20));
        });
    }

    let promises: Vec<_> = (0..10)
        .map(|i| {
            let done = done.clone();
            scheduler.submit(move || done.lock().unwrap().push(i))
        })
        .collect();

    gate.wait();
    scheduler.shutdown();

    for promise in &promises {
        assert!(promise.is_settled(), "shutdown runs what was queued");
    }
    assert_eq!(done.lock().unwrap().len(), 10);
    assert!(scheduler.is_shutdown());

    let late = scheduler.submit(|| 1);
    assert!(matches!(late.wait(), Err(Error::Shutdown)));
}

#[test]
fn test_continuations_run_on_the_settling_worker() {
    let scheduler = scheduler(2);
    let gate = Arc::new(Barrier::new(2));

    let task = {
        let gate = gate.clone();
        scheduler.submit(move || {
            gate.wait();
            thread::current().id()
        })
    };

    // Registered before the task can settle.
    let derived = task.map(|settled_on| settled_on == thread::current().id());
    gate.wait();

    assert!(derived.wait().unwrap());
}

#[test]
#[ignore = "timing-sensitive; run manually on an idle machine"]
fn test_more_workers_finish_sooner() {
    let mut elapsed = Vec::new();

    for workers in 1..=4 {
        let scheduler = Arc::new(scheduler(workers));
        let counter = Arc::new(AtomicUsize::new(0));

        let started = Instant::now();
        run_burst(&scheduler, &counter);
        elapsed.push(started.elapsed());
    }

    assert!(
        elapsed[3] < elapsed[0],
        "4 workers ({:?}) should beat 1 worker ({:?})",
        elapsed[3],
        elapsed[0]
    );
}
