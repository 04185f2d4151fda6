use std::cmp::Ordering;

/// Keep the `n` items with the highest weight, highest first.
///
/// The sort is stable: items with equal weight keep their input order. NaN
/// weights compare equal to everything and therefore never move ahead of
/// their neighbours.
pub fn top_n_by<T, F>(items: impl IntoIterator<Item = T>, n: usize, weight: F) -> Vec<T>
where
    F: Fn(&T) -> f64,
{
    let mut ranked: Vec<T> = items.into_iter().collect();
    ranked.sort_by(|a, b| weight(b).partial_cmp(&weight(a)).unwrap_or(Ordering::Equal));
    ranked.truncate(n);
    ranked
}
