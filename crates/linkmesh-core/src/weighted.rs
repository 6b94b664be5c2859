//! Weighted categorical choice over a small, fixed table.

use rand::Rng;

/// A categorical distribution. Entries keep their declaration order, which is
/// the order the cumulative scan walks.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTable<T> {
  entries: Vec<(T, f64)>,
  total:   f64,
}

impl<T: Copy + PartialEq> WeightedTable<T> {
  /// Build a table; non-positive and non-finite weights are dropped.
  pub fn new(entries: impl IntoIterator<Item = (T, f64)>) -> Self {
    let entries: Vec<(T, f64)> = entries
      .into_iter()
      .filter(|(_, w)| w.is_finite() && *w > 0.0)
      .collect();
    let total = entries.iter().map(|(_, w)| w).sum();
    Self { entries, total }
  }

  pub fn entries(&self) -> &[(T, f64)] { &self.entries }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// Normalised probability of `item`; zero if absent.
  pub fn probability(&self, item: T) -> f64 {
    if self.total <= 0.0 {
      return 0.0;
    }
    self
      .entries
      .iter()
      .filter(|(t, _)| *t == item)
      .map(|(_, w)| w / self.total)
      .sum()
  }

  /// Pick by scanning cumulative weights against `u`, a uniform draw in
  /// `[0, 1)`.
  pub fn pick(&self, u: f64) -> Option<T> {
    let target = u.clamp(0.0, 1.0) * self.total;
    let mut acc = 0.0;
    for (item, weight) in &self.entries {
      acc += weight;
      if target < acc {
        return Some(*item);
      }
    }
    self.entries.last().map(|(item, _)| *item)
  }

  /// Single weighted draw from `rng`.
  pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<T> {
    self.pick(rng.r#gen::<f64>())
  }
}
