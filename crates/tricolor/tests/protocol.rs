//! Producer and consumer loops driven across threads over an in-process ring.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tricolor::supervisor::{self, Notice, StopReason, SupervisorConfig};
use tricolor::{GeneratorExit, GeneratorStats, Graph, generator};
use tricolor_ring::{
    HeapRegion, LocalSemaphore, MAX_REMOVED, PopOutcome, Ring, RingError, SEGMENT_SIZE, Semaphore,
    Semaphores,
};

struct LocalRing {
    ring: Ring<LocalSemaphore>,
    _region: HeapRegion,
}

fn local_ring() -> Arc<LocalRing> {
    let region = HeapRegion::new_zeroed(SEGMENT_SIZE);
    // SAFETY: the region is sized for the layout and outlives the ring.
    let ring = unsafe { Ring::init(region.region(), Semaphores::local()) };
    Arc::new(LocalRing {
        ring,
        _region: region,
    })
}

fn k4() -> Graph {
    Graph::parse(["0-1", "0-2", "0-3", "1-2", "1-3", "2-3"]).unwrap()
}

/// Twenty edges over six vertices: most colourings conflict on more than
/// `MAX_REMOVED` of them.
fn dense() -> Graph {
    let args: Vec<String> = (0..20).map(|i| format!("{}-{}", i % 6, (i + 1 + i / 6) % 6)).collect();
    Graph::parse(&args).unwrap()
}

type Finished = mpsc::Receiver<Result<GeneratorStats, RingError>>;

fn spawn_generators(local: &Arc<LocalRing>, graph: &Graph, count: u64) -> Finished {
    let (tx, rx) = mpsc::channel();
    for seed in 0..count {
        let local = local.clone();
        let graph = graph.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            let stop = AtomicBool::new(false);
            let result = generator::run(local.ring.producer(), &graph, &mut rng, &stop);
            let _ = tx.send(result);
        });
    }
    rx
}

fn shut_down(local: &LocalRing) {
    local.ring.request_terminate();
    local.ring.wake_producers();
}

fn collect_finished(finished: &Finished, count: u64) -> Vec<GeneratorStats> {
    (0..count)
        .map(|_| {
            finished
                .recv_timeout(Duration::from_secs(10))
                .expect("producer did not exit after shutdown")
                .unwrap()
        })
        .collect()
}

#[test]
fn shutdown_releases_every_producer() {
    for producers in 1..=4 {
        let local = local_ring();
        let finished = spawn_generators(&local, &k4(), producers);

        let config = SupervisorConfig {
            limit: Some(100),
            ..SupervisorConfig::default()
        };
        let summary =
            supervisor::run(&local.ring, &config, &AtomicBool::new(false), |_| {}).unwrap();
        assert_eq!(summary.reason, StopReason::Limit);

        shut_down(&local);
        let stats = collect_finished(&finished, producers);
        assert!(stats.iter().all(|s| s.exit == GeneratorExit::Terminated));
    }
}

#[test]
fn enqueues_minus_dequeues_is_left_in_ring() {
    let local = local_ring();
    let finished = spawn_generators(&local, &k4(), 3);

    let config = SupervisorConfig {
        limit: Some(250),
        ..SupervisorConfig::default()
    };
    let summary = supervisor::run(&local.ring, &config, &AtomicBool::new(false), |_| {}).unwrap();

    shut_down(&local);
    let enqueued: u64 = collect_finished(&finished, 3).iter().map(|s| s.enqueued).sum();

    let used = u64::from(local.ring.semaphores().used_slots.value().unwrap());
    assert!(summary.read_count <= enqueued);
    assert_eq!(enqueued - summary.read_count, used);
}

#[test]
fn every_candidate_read_is_within_capacity() {
    let local = local_ring();
    let finished = spawn_generators(&local, &dense(), 2);

    let mut consumer = local.ring.consumer().unwrap();
    let stop = AtomicBool::new(false);
    for _ in 0..500 {
        match consumer.pop(&stop).unwrap() {
            PopOutcome::Solution(solution) => {
                assert!(solution.edge_count() as usize <= MAX_REMOVED);
                assert_eq!(solution.edges().len(), solution.edge_count() as usize);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    drop(consumer);

    shut_down(&local);
    let stats = collect_finished(&finished, 2);
    assert!(
        stats.iter().map(|s| s.discarded).sum::<u64>() > 0,
        "dense graph should produce oversized colourings"
    );
}

#[test]
fn best_only_improves() {
    let local = local_ring();
    let finished = spawn_generators(&local, &dense(), 2);

    let mut bests = Vec::new();
    let config = SupervisorConfig {
        limit: Some(400),
        ..SupervisorConfig::default()
    };
    let summary = supervisor::run(&local.ring, &config, &AtomicBool::new(false), |notice| {
        if let Notice::NewBest {
            edge_count,
            solution,
            ..
        } = notice
        {
            assert_eq!(solution.edge_count(), edge_count);
            bests.push(edge_count);
        }
    })
    .unwrap();

    shut_down(&local);
    collect_finished(&finished, 2);

    assert!(!bests.is_empty());
    assert!(bests.windows(2).all(|w| w[1] < w[0]), "{bests:?}");
    assert!(bests[0] as usize <= MAX_REMOVED);
    assert_eq!(bests.last().copied(), Some(summary.best_count));
}

#[test]
fn colourable_graph_stops_after_success_notice() {
    let local = local_ring();
    let triangle = Graph::parse(["0-1", "1-2", "2-0"]).unwrap();
    let finished = spawn_generators(&local, &triangle, 1);

    let mut last = None;
    let mut after_success = 0;
    let config = SupervisorConfig {
        limit: Some(1000),
        ..SupervisorConfig::default()
    };
    let summary = supervisor::run(&local.ring, &config, &AtomicBool::new(false), |notice| {
        if last == Some("colourable") {
            after_success += 1;
        }
        last = Some(match notice {
            Notice::Colourable => "colourable",
            _ => "other",
        });
    })
    .unwrap();

    shut_down(&local);
    collect_finished(&finished, 1);

    assert_eq!(summary.reason, StopReason::Colourable);
    assert_eq!(summary.best_count, 0);
    assert_eq!(last, Some("colourable"));
    assert_eq!(after_success, 0);
}
