use crate::core::models::point::ScanPoint;
use crate::core::resolution::{ResolutionError, ResolutionSampleSet, ResolutionSampler};
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Resolution sample sets keyed by scan-point index.
///
/// Sample sets depend only on the nominal point and the instrument, never on
/// model parameters, so one fit computes each of them once.
#[derive(Debug, Default, Clone)]
pub struct ResolutionCache {
    data: HashMap<usize, ResolutionSampleSet>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, set: ResolutionSampleSet) {
        self.data.insert(index, set);
    }

    pub fn get(&self, index: usize) -> Option<&ResolutionSampleSet> {
        self.data.get(&index)
    }

    /// Computes the sets of every point not already cached. On error the
    /// cache keeps what it had and reports the failing point.
    pub fn populate(
        &mut self,
        sampler: &ResolutionSampler,
        points: &[ScanPoint],
    ) -> Result<(), (usize, ResolutionError)> {
        let missing: Vec<usize> = (0..points.len())
            .filter(|i| !self.data.contains_key(i))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let iterator = missing.iter();

        #[cfg(feature = "parallel")]
        let iterator = missing.par_iter();

        let computed = iterator
            .map(|&i| {
                sampler
                    .sample(&points[i], i)
                    .map(|set| (i, set))
                    .map_err(|e| (i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.data.extend(computed);
        Ok(())
    }

    /// Drops every cached set, e.g. after the instrument changed.
    pub fn invalidate(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
