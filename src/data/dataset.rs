//! In-memory labelled dataset and borrowed client views.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::BatchSize;
use crate::error::{FedError, Result};

/// Feature rows with one class label each.
#[derive(Clone, Debug)]
pub struct Dataset {
    features: Array2<f32>,
    labels: Vec<usize>,
    num_classes: usize,
}

impl Dataset {
    /// Create a dataset, checking that rows and labels line up, labels are
    /// in range and every feature is finite.
    pub fn new(features: Array2<f32>, labels: Vec<usize>, num_classes: usize) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(FedError::InvalidConfig(format!(
                "dataset has {} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        if num_classes == 0 {
            return Err(FedError::InvalidConfig(
                "dataset must have at least one class".to_string(),
            ));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(FedError::InvalidConfig(format!(
                "label {} is outside {} classes",
                bad, num_classes
            )));
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(FedError::InvalidConfig(
                "dataset features must be finite".to_string(),
            ));
        }
        Ok(Self {
            features,
            labels,
            num_classes,
        })
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the dataset has no items.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Width of a feature row.
    pub fn feature_dim(&self) -> usize {
        self.features.ncols()
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// All feature rows.
    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    /// All labels.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Item at `index`.
    pub fn get(&self, index: usize) -> Option<(ArrayView1<'_, f32>, usize)> {
        self.labels
            .get(index)
            .map(|&label| (self.features.row(index), label))
    }

    /// Copy out the rows and labels at `indices`.
    pub fn gather(&self, indices: &[usize]) -> Batch {
        Batch {
            x: self.features.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    /// A view restricted to `indices`, without copying any data.
    pub fn subset<'a>(&'a self, indices: &'a [usize]) -> Result<ClientData<'a>> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(FedError::InvalidConfig(format!(
                "index {} out of bounds for dataset of {} items",
                bad,
                self.len()
            )));
        }
        Ok(ClientData {
            dataset: self,
            indices,
        })
    }
}

/// One mini-batch.
#[derive(Clone, Debug)]
pub struct Batch {
    /// Feature rows
    pub x: Array2<f32>,
    /// Labels, one per row
    pub labels: Vec<usize>,
}

/// One client's items, borrowed from the shared dataset.
#[derive(Clone, Copy, Debug)]
pub struct ClientData<'a> {
    dataset: &'a Dataset,
    indices: &'a [usize],
}

impl<'a> ClientData<'a> {
    /// Number of local items.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the client holds no items.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dataset positions of the local items.
    pub fn indices(&self) -> &'a [usize] {
        self.indices
    }

    /// Iterate over mini-batches of `batch_size`.
    ///
    /// With an RNG the item order is shuffled first; the final batch may
    /// be short. An unbounded size yields the whole partition once.
    pub fn batches<R: Rng + ?Sized>(&self, batch_size: BatchSize, rng: Option<&mut R>) -> Batches<'a> {
        let mut order = self.indices.to_vec();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        Batches {
            dataset: self.dataset,
            size: batch_size.effective(order.len()).max(1),
            order,
            pos: 0,
        }
    }
}

/// Iterator over the mini-batches of one epoch.
pub struct Batches<'a> {
    dataset: &'a Dataset,
    order: Vec<usize>,
    size: usize,
    pos: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.size).min(self.order.len());
        let batch = self.dataset.gather(&self.order[self.pos..end]);
        self.pos = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.pos + self.size - 1) / self.size;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny() -> Dataset {
        let x = array![[0.0f32, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]];
        Dataset::new(x, vec![0, 1, 0, 1, 0], 2).unwrap()
    }

    #[test]
    fn test_new_rejects_mismatch() {
        let x = Array2::<f32>::zeros((3, 2));
        assert!(Dataset::new(x.clone(), vec![0, 1], 2).is_err());
        assert!(Dataset::new(x.clone(), vec![0, 1, 2], 2).is_err());
        let mut bad = x;
        bad[[0, 0]] = f32::NAN;
        assert!(Dataset::new(bad, vec![0, 1, 0], 2).is_err());
    }

    #[test]
    fn test_get_and_gather() {
        let ds = tiny();
        let (row, label) = ds.get(3).unwrap();
        assert_eq!(row[0], 3.0);
        assert_eq!(label, 1);
        assert!(ds.get(5).is_none());

        let batch = ds.gather(&[4, 1]);
        assert_eq!(batch.x, array![[4.0f32, 4.0], [1.0, 1.0]]);
        assert_eq!(batch.labels, vec![0, 1]);
    }

    #[test]
    fn test_subset_bounds() {
        let ds = tiny();
        assert!(ds.subset(&[0, 5]).is_err());
        assert_eq!(ds.subset(&[0, 2]).unwrap().len(), 2);
    }

    #[test]
    fn test_bounded_batches_cover_partition() {
        let ds = tiny();
        let idx = [0, 1, 2, 3, 4];
        let view = ds.subset(&idx).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let batches: Vec<Batch> = view
            .batches(BatchSize::bounded(2).unwrap(), Some(&mut rng))
            .collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].labels.len(), 1);

        let mut seen: Vec<f32> = batches
            .iter()
            .flat_map(|b| b.x.column(0).to_vec())
            .collect();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_unbounded_is_single_batch() {
        let ds = tiny();
        let idx = [1, 3, 4];
        let view = ds.subset(&idx).unwrap();
        let batches: Vec<Batch> = view.batches::<StdRng>(BatchSize::Unbounded, None).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].labels, vec![1, 1, 0]);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let ds = tiny();
        let idx = [0, 1, 2, 3, 4];
        let view = ds.subset(&idx).unwrap();
        let order = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            view.batches(BatchSize::bounded(1).unwrap(), Some(&mut rng))
                .map(|b| b.x[[0, 0]])
                .collect::<Vec<f32>>()
        };
        assert_eq!(order(1), order(1));
    }
}
