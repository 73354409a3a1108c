use criterion::*;
use workgraph::{Graph, Scheduler, Task};

fn schedule_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule graph");

    for log_nodes in (0..=8).step_by(4) {
        let nodes = 1_usize << log_nodes;
        group.throughput(Throughput::Elements(nodes as u64));
        group.bench_with_input(
            BenchmarkId::new("fan-out", format!("{nodes} nodes")),
            &nodes,
            |b, &nodes| {
                let scheduler = Scheduler::new(Scheduler::AUTO_WORKER_COUNT);
                let mut graph = Graph::new();
                for _ in 0..nodes {
                    graph.emplace(|| {});
                }
                b.iter(|| {
                    scheduler.schedule(&graph);
                    graph.wait();
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("chain", format!("{nodes} nodes")),
            &nodes,
            |b, &nodes| {
                let scheduler = Scheduler::new(Scheduler::AUTO_WORKER_COUNT);
                let mut graph = Graph::new();
                let mut prev: Option<Task> = None;
                for _ in 0..nodes {
                    let node = graph.emplace(|| {});
                    if let Some(prev) = prev {
                        prev.precede(node);
                    }
                    prev = Some(node);
                }
                b.iter(|| {
                    scheduler.schedule(&graph);
                    graph.wait();
                });
            },
        );
    }
}

criterion_group!(benches, schedule_graph);
criterion_main!(benches);
