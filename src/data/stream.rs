use serde::{Deserialize, Serialize};

use super::{Batch, Dataset};

/// Order in which a stream visits its dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationScheme {
    /// Consecutive batches in dataset order.
    Sequential { batch_size: usize },
    /// A fresh permutation every epoch, reproducible from `seed`.
    Shuffled { batch_size: usize, seed: u64 },
}

impl IterationScheme {
    pub fn batch_size(&self) -> usize {
        match *self {
            IterationScheme::Sequential { batch_size } | IterationScheme::Shuffled { batch_size, .. } => batch_size,
        }
    }
}

/// Batches of a dataset, one pass per call to `iter_epoch`.
#[derive(Debug)]
pub struct DataStream {
    dataset: Dataset,
    scheme: IterationScheme,
    rng: fastrand::Rng,
}

impl DataStream {
    pub fn new(dataset: Dataset, scheme: IterationScheme) -> Self {
        let seed = match scheme {
            IterationScheme::Shuffled { seed, .. } => seed,
            IterationScheme::Sequential { .. } => 0,
        };
        Self {
            dataset,
            scheme,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn scheme(&self) -> IterationScheme {
        self.scheme
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.num_examples().div_ceil(self.scheme.batch_size().max(1))
    }

    /// One epoch of batches. The last batch is short when the batch size
    /// does not divide the dataset.
    pub fn iter_epoch(&mut self) -> EpochIterator<'_> {
        let mut order: Vec<usize> = (0..self.dataset.num_examples()).collect();
        if let IterationScheme::Shuffled { .. } = self.scheme {
            self.rng.shuffle(&mut order);
        }
        EpochIterator {
            dataset: &self.dataset,
            order,
            batch_size: self.scheme.batch_size().max(1),
            position: 0,
        }
    }
}

pub struct EpochIterator<'a> {
    dataset: &'a Dataset,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
}

impl Iterator for EpochIterator<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let batch = self.dataset.batch(&self.order[self.position..end]);
        self.position = end;
        Some(batch)
    }
}
