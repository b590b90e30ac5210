//! Assignment of training items to clients, and per-round client sampling.
//!
//! Item indices and client identities are both 0-based. Every split
//! returns exactly `num_clients` index sets that are pairwise disjoint and
//! together cover `0..n_items`; each set is sorted ascending.

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;

use crate::config::{clients_per_round, PartitionKind, ShardRemainder};
use crate::error::{FedError, Result};

/// Item indices held by one client.
pub type ClientPartition = Vec<usize>;

/// Uniformly random split into `num_clients` groups whose sizes differ by
/// at most one.
///
/// The first `n_items % num_clients` clients get the larger size.
pub fn iid_split(n_items: usize, num_clients: usize, seed: u64) -> Result<Vec<ClientPartition>> {
    check_clients(n_items, num_clients)?;

    let mut order: Vec<usize> = (0..n_items).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let base = n_items / num_clients;
    let extra = n_items % num_clients;
    let mut parts = Vec::with_capacity(num_clients);
    let mut start = 0;
    for k in 0..num_clients {
        let size = base + usize::from(k < extra);
        let mut part = order[start..start + size].to_vec();
        part.sort_unstable();
        parts.push(part);
        start += size;
    }
    Ok(parts)
}

/// Label-skewed split: sort items by label, cut the sorted sequence into
/// `num_clients * shards_per_client` contiguous shards, shuffle the shards
/// and deal `shards_per_client` of them to each client in turn.
///
/// Shards hold `⌊n / shards⌋` items. Under [`ShardRemainder::LastShard`]
/// the final shard also takes the leftover items; under
/// [`ShardRemainder::Strict`] a leftover is a configuration error.
pub fn shard_split(
    labels: &[usize],
    num_clients: usize,
    shards_per_client: usize,
    remainder: ShardRemainder,
    seed: u64,
) -> Result<Vec<ClientPartition>> {
    let n_items = labels.len();
    check_clients(n_items, num_clients)?;
    if shards_per_client == 0 {
        return Err(FedError::InvalidConfig(
            "Partitioner: shards_per_client must be >= 1".to_string(),
        ));
    }

    let n_shards = num_clients * shards_per_client;
    if n_shards > n_items {
        return Err(FedError::InvalidConfig(format!(
            "Partitioner: {} shards requested for {} items",
            n_shards, n_items
        )));
    }
    if remainder == ShardRemainder::Strict && n_items % n_shards != 0 {
        return Err(FedError::InvalidConfig(format!(
            "Partitioner: {} items do not divide into {} shards",
            n_items, n_shards
        )));
    }

    let mut sorted: Vec<usize> = (0..n_items).collect();
    sorted.sort_by_key(|&i| labels[i]);

    let shard_size = n_items / n_shards;
    let shard = |s: usize| {
        let start = s * shard_size;
        let end = if s + 1 == n_shards {
            n_items
        } else {
            start + shard_size
        };
        &sorted[start..end]
    };

    let mut shard_ids: Vec<usize> = (0..n_shards).collect();
    shard_ids.shuffle(&mut StdRng::seed_from_u64(seed));

    let parts = shard_ids
        .chunks(shards_per_client)
        .map(|ids| {
            let mut part: Vec<usize> = ids.iter().flat_map(|&s| shard(s).iter().copied()).collect();
            part.sort_unstable();
            part
        })
        .collect();
    Ok(parts)
}

/// Split according to `kind`.
pub fn split(kind: &PartitionKind, labels: &[usize], num_clients: usize, seed: u64) -> Result<Vec<ClientPartition>> {
    match *kind {
        PartitionKind::Iid => iid_split(labels.len(), num_clients, seed),
        PartitionKind::Shards {
            shards_per_client,
            remainder,
        } => shard_split(labels, num_clients, shards_per_client, remainder, seed),
    }
}

/// Sample `max(1, ⌊C·K⌋)` distinct clients from `0..num_clients`,
/// returned in ascending order.
pub fn sample_clients(num_clients: usize, client_fraction: f64, seed: u64) -> Vec<usize> {
    if num_clients == 0 {
        return Vec::new();
    }
    sample_n(num_clients, clients_per_round(num_clients, client_fraction), seed)
}

/// Sample `min(n, num_clients)` distinct clients, in ascending order.
pub fn sample_n(num_clients: usize, n: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut chosen = index::sample(&mut rng, num_clients, n.min(num_clients)).into_vec();
    chosen.sort_unstable();
    chosen
}

fn check_clients(n_items: usize, num_clients: usize) -> Result<()> {
    if num_clients == 0 {
        return Err(FedError::InvalidConfig(
            "Partitioner: K must be >= 1".to_string(),
        ));
    }
    if num_clients > n_items {
        return Err(FedError::InvalidConfig(format!(
            "Partitioner: {} clients cannot share {} items without empty partitions",
            num_clients, n_items
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_cover(parts: &[ClientPartition], n: usize) {
        let mut all: Vec<usize> = parts.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn test_iid_sizes_differ_by_at_most_one() {
        let parts = iid_split(103, 10, 1).unwrap();
        assert_eq!(parts.len(), 10);
        let sizes: Vec<usize> = parts.iter().map(|p| p.len()).collect();
        assert_eq!(*sizes.iter().max().unwrap(), 11);
        assert_eq!(*sizes.iter().min().unwrap(), 10);
        assert_cover(&parts, 103);
    }

    #[test]
    fn test_iid_seeded() {
        assert_eq!(iid_split(50, 5, 9).unwrap(), iid_split(50, 5, 9).unwrap());
        assert_ne!(iid_split(50, 5, 9).unwrap(), iid_split(50, 5, 10).unwrap());
    }

    #[test]
    fn test_iid_rejects_bad_counts() {
        assert!(iid_split(10, 0, 0).is_err());
        assert!(iid_split(3, 4, 0).is_err());
    }

    #[test]
    fn test_shards_are_label_skewed() {
        // 10 classes, 20 items each
        let labels: Vec<usize> = (0..200).map(|i| i % 10).collect();
        let parts = shard_split(&labels, 10, 2, ShardRemainder::LastShard, 3).unwrap();
        assert_cover(&parts, 200);
        for part in &parts {
            assert_eq!(part.len(), 20);
            let mut classes: Vec<usize> = part.iter().map(|&i| labels[i]).collect();
            classes.dedup();
            classes.sort_unstable();
            classes.dedup();
            assert!(classes.len() <= 2, "client saw {} classes", classes.len());
        }
    }

    #[test]
    fn test_last_shard_absorbs_remainder() {
        let labels: Vec<usize> = (0..23).map(|i| i % 3).collect();
        let parts = shard_split(&labels, 5, 2, ShardRemainder::LastShard, 0).unwrap();
        assert_cover(&parts, 23);
        let sizes: Vec<usize> = parts.iter().map(|p| p.len()).collect();
        // 10 shards of 2, the last one of 5
        assert_eq!(sizes.iter().sum::<usize>(), 23);
        assert!(sizes.iter().any(|&s| s == 7));
    }

    #[test]
    fn test_strict_remainder_rejected() {
        let labels = vec![0; 23];
        let err = shard_split(&labels, 5, 2, ShardRemainder::Strict, 0).unwrap_err();
        assert!(matches!(err, FedError::InvalidConfig(_)));
    }

    #[test]
    fn test_sample_clients_sizes() {
        for seed in 0..20 {
            let s = sample_clients(100, 0.1, seed);
            assert_eq!(s.len(), 10);
            assert!(s.windows(2).all(|w| w[0] < w[1]));
            assert!(s.iter().all(|&c| c < 100));
        }
        assert_eq!(sample_clients(15, 0.5, 0).len(), 7);
        assert_eq!(sample_clients(5, 0.01, 0).len(), 1);
        assert_eq!(sample_clients(5, 1.0, 0), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sample_n_caps_at_population() {
        assert_eq!(sample_n(3, 10, 1), vec![0, 1, 2]);
        assert_eq!(sample_n(100, 5, 1).len(), 5);
        assert_eq!(sample_n(100, 5, 1), sample_n(100, 5, 1));
    }
}
