use crate::errors::Result;
use crate::types::{ActiveSet, Response};

use log::debug;
use ndarray::ArrayView1;
use std::collections::HashMap;

/// Insert-on-miss store of truth evaluations keyed by the exact bit patterns of `x`.
///
/// A lookup only hits when the stored response holds everything the request asks for.
/// There is no eviction.
#[derive(Clone, Debug, Default)]
pub struct EvalCache {
    entries: HashMap<Vec<u64>, Response>,
    last_id: usize,
    hits: usize,
}

fn key(x: &ArrayView1<f64>) -> Vec<u64> {
    x.iter().map(|v| v.to_bits()).collect()
}

impl EvalCache {
    /// Constructor
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored points
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of successful lookups so far
    pub fn n_hits(&self) -> usize {
        self.hits
    }

    /// Response stored at `x` if it satisfies `asv`
    pub fn lookup(&self, x: &ArrayView1<f64>, asv: ActiveSet) -> Option<&Response> {
        self.entries.get(&key(x)).filter(|resp| resp.satisfies(asv))
    }

    /// Stores `response` evaluated at `x` with a new evaluation id, returns the stored response
    pub fn insert(&mut self, x: &ArrayView1<f64>, response: Response) -> Response {
        self.last_id += 1;
        let response = response.with_eval_id(self.last_id);
        self.entries.insert(key(x), response.clone());
        response
    }

    /// Returns the cached response at `x` or evaluates and stores it
    pub fn evaluate<F>(&mut self, x: &ArrayView1<f64>, asv: ActiveSet, eval: F) -> Result<Response>
    where
        F: FnOnce(&ArrayView1<f64>, ActiveSet) -> Result<Response>,
    {
        if let Some(resp) = self.entries.get(&key(x)).filter(|resp| resp.satisfies(asv)) {
            self.hits += 1;
            debug!("Cache hit at {} (eval id {})", x, resp.eval_id);
            return Ok(resp.clone());
        }
        let response = eval(x, asv)?;
        Ok(self.insert(x, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_insert_on_miss() {
        let mut cache = EvalCache::new();
        let mut calls = 0;
        let x = array![1., 2.];
        for _ in 0..3 {
            let resp = cache
                .evaluate(&x.view(), ActiveSet::VALUE, |x, _| {
                    calls += 1;
                    Ok(Response::new(array![x.sum()]))
                })
                .unwrap();
            assert_eq!(resp.eval_id, 1);
            assert_eq!(resp.fn_vals[0], 3.);
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.n_hits(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_miss_on_missing_gradients() {
        let mut cache = EvalCache::new();
        let x = array![1., 2.];
        cache.insert(&x.view(), Response::new(array![3.]));
        assert!(cache.lookup(&x.view(), ActiveSet::VALUE).is_some());
        assert!(cache
            .lookup(&x.view(), ActiveSet::VALUE | ActiveSet::GRADIENT)
            .is_none());
        let resp = cache
            .evaluate(&x.view(), ActiveSet::VALUE | ActiveSet::GRADIENT, |_, _| {
                Ok(Response::new(array![3.]).with_gradients(array![[1., 1.]]))
            })
            .unwrap();
        assert_eq!(resp.eval_id, 2);
        assert!(cache
            .lookup(&x.view(), ActiveSet::VALUE | ActiveSet::GRADIENT)
            .is_some());
        assert!(cache.lookup(&array![1., 2.5].view(), ActiveSet::VALUE).is_none());
    }
}
