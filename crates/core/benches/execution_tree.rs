use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, TimeZone, Utc};
use replayer_core::{ExecutionTreeNode, JobSpec, ProjectSpec, RunSet};

fn runs(count: i64) -> RunSet {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count).map(|d| base + Duration::days(d)).collect()
}

fn node(name: String, project: &ProjectSpec) -> ExecutionTreeNode {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    ExecutionTreeNode::new(JobSpec::new(name, project.clone(), start), runs(30)).unwrap()
}

/// Root with `width` dependents, each fanning into a shared sink (diamond-heavy).
fn wide_tree(width: usize) -> ExecutionTreeNode {
    let project = ProjectSpec::new("bench");
    let mut root = node("root".to_string(), &project);
    for i in 0..width {
        let child = node(format!("child-{i}"), &project).with_dependent(node("sink".to_string(), &project));
        root.add_dependent(child);
    }
    root
}

/// Linear chain `depth` nodes long.
fn deep_tree(depth: usize) -> ExecutionTreeNode {
    let project = ProjectSpec::new("bench");
    let mut current = node(format!("job-{depth}"), &project);
    for i in (0..depth).rev() {
        current = node(format!("job-{i}"), &project).with_dependent(current);
    }
    current
}

fn bench_flatten(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_tree_flatten");

    for width in [10usize, 100, 1_000] {
        let tree = wide_tree(width);
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("wide", width), &tree, |b, tree| {
            b.iter(|| black_box(tree.flatten().len()))
        });
    }

    for depth in [10usize, 100, 500] {
        let tree = deep_tree(depth);
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("deep", depth), &tree, |b, tree| {
            b.iter(|| black_box(tree.flatten().len()))
        });
    }

    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let tree = deep_tree(500);
    c.bench_function("execution_tree_validate_deep_500", |b| {
        b.iter(|| black_box(tree.validate().is_ok()))
    });
}

criterion_group!(benches, bench_flatten, bench_validate);
criterion_main!(benches);
