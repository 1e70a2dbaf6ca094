use serde::{Deserialize, Serialize};

/// Non dominated set of (objective, constraint violation) pairs.
///
/// A pair is accepted only when no member is at least as good on both criteria,
/// members dominated by an accepted pair are purged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParetoFilter {
    points: Vec<(f64, f64)>,
}

fn weakly_dominates(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0 <= b.0 && a.1 <= b.1
}

impl ParetoFilter {
    /// Resets the filter to the single given pair
    pub fn initialize(&mut self, obj: f64, violation: f64) {
        self.points.clear();
        self.points.push((obj, violation));
    }

    /// Inserts the pair when not dominated by a member, returns whether it was accepted
    pub fn update(&mut self, obj: f64, violation: f64) -> bool {
        let new = (obj, violation);
        if self.points.iter().any(|&p| weakly_dominates(p, new)) {
            return false;
        }
        self.points.retain(|&p| !weakly_dominates(new, p));
        self.points.push(new);
        true
    }

    /// Filter members
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the filter is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Removes all members
    pub fn clear(&mut self) {
        self.points.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_non_dominated(filter: &ParetoFilter) {
        let pts = filter.points();
        for (i, &a) in pts.iter().enumerate() {
            for (j, &b) in pts.iter().enumerate() {
                if i != j {
                    assert!(!weakly_dominates(a, b), "{:?} dominates {:?}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_dominated_point_rejected() {
        let mut filter = ParetoFilter::default();
        filter.initialize(1., 1.);
        let before = filter.clone();
        assert!(!filter.update(2., 1.));
        assert!(!filter.update(1., 1.));
        assert!(!filter.update(1.5, 3.));
        assert_eq!(filter, before);
    }

    #[test]
    fn test_insert_purges_dominated() {
        let mut filter = ParetoFilter::default();
        filter.initialize(5., 0.);
        assert!(filter.update(1., 4.));
        assert!(filter.update(3., 2.));
        assert_eq!(filter.len(), 3);
        assert_non_dominated(&filter);
        // dominates (3, 2) and (1, 4) but not (5, 0)
        assert!(filter.update(0.5, 1.));
        assert_eq!(filter.points(), &[(5., 0.), (0.5, 1.)]);
        assert_non_dominated(&filter);
    }
}
