//! Integration tests for client partitioning and sampling

use std::collections::HashSet;

use fedavg_sim::config::ShardRemainder;
use fedavg_sim::data::{iid_split, sample_clients, shard_split, ClientPartition, SyntheticSpec};

fn assert_disjoint_cover(parts: &[ClientPartition], n: usize) {
    let mut seen = HashSet::new();
    for part in parts {
        for &i in part {
            assert!(i < n, "index {} out of range", i);
            assert!(seen.insert(i), "index {} assigned twice", i);
        }
    }
    assert_eq!(seen.len(), n);
}

#[test]
fn test_iid_cover_for_many_seeds() {
    for seed in 0..25 {
        for &(n, k) in &[(100, 10), (101, 10), (7, 7), (1000, 3)] {
            let parts = iid_split(n, k, seed).unwrap();
            assert_eq!(parts.len(), k);
            assert_disjoint_cover(&parts, n);
            let min = parts.iter().map(|p| p.len()).min().unwrap();
            let max = parts.iter().map(|p| p.len()).max().unwrap();
            assert!(max - min <= 1);
        }
    }
}

#[test]
fn test_shard_cover_for_many_seeds() {
    let labels: Vec<usize> = (0..600).map(|i| (i * 7) % 10).collect();
    for seed in 0..25 {
        let parts = shard_split(&labels, 100, 2, ShardRemainder::LastShard, seed).unwrap();
        assert_eq!(parts.len(), 100);
        assert_disjoint_cover(&parts, 600);
    }
    // remainder lands in the last shard
    let parts = shard_split(&labels[..599], 100, 2, ShardRemainder::LastShard, 0).unwrap();
    assert_disjoint_cover(&parts, 599);
}

#[test]
fn test_splits_are_deterministic() {
    let labels: Vec<usize> = (0..200).map(|i| i % 10).collect();
    let a = shard_split(&labels, 10, 2, ShardRemainder::LastShard, 5).unwrap();
    let b = shard_split(&labels, 10, 2, ShardRemainder::LastShard, 5).unwrap();
    let c = shard_split(&labels, 10, 2, ShardRemainder::LastShard, 6).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);

    assert_eq!(iid_split(200, 10, 5).unwrap(), iid_split(200, 10, 5).unwrap());
    assert_ne!(iid_split(200, 10, 5).unwrap(), iid_split(200, 10, 6).unwrap());
}

#[test]
fn test_non_iid_skews_labels() {
    let spec = SyntheticSpec {
        train_items: 1000,
        test_items: 10,
        ..SyntheticSpec::default()
    };
    let (train, _) = spec.generate(3).unwrap();
    let labels = train.labels();

    let skewed = shard_split(labels, 50, 2, ShardRemainder::LastShard, 1).unwrap();
    let uniform = iid_split(labels.len(), 50, 1).unwrap();
    let classes = |p: &ClientPartition| p.iter().map(|&i| labels[i]).collect::<HashSet<_>>().len();

    let skewed_mean = skewed.iter().map(classes).sum::<usize>() as f64 / 50.0;
    let uniform_mean = uniform.iter().map(classes).sum::<usize>() as f64 / 50.0;
    assert!(skewed_mean <= 2.0, "{}", skewed_mean);
    assert!(uniform_mean > 5.0, "{}", uniform_mean);
}

#[test]
fn test_sample_clients_counts() {
    for seed in 0..50 {
        let chosen = sample_clients(100, 0.1, seed);
        assert_eq!(chosen.len(), 10);
        assert_eq!(chosen.iter().collect::<HashSet<_>>().len(), 10);
        assert!(chosen.iter().all(|&c| c < 100));
    }
    assert_eq!(sample_clients(15, 0.5, 0).len(), 7);
    assert_eq!(sample_clients(3, 0.1, 0).len(), 1);
    assert_ne!(sample_clients(100, 0.1, 1), sample_clients(100, 0.1, 2));
}
