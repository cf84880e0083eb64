//! Ranking metrics over a user's relevant items and a recommended list.
//! Every metric only looks at the first `k` recommendations.

use std::collections::HashSet;

/// Number of relevant items among the top `k` recommendations
pub fn intersection<T: Eq + std::hash::Hash>(relevant: &[T], recommended: &[T], k: usize) -> usize {
    let relevant: HashSet<&T> = relevant.iter().collect();
    let top: HashSet<&T> = recommended.iter().take(k).collect();
    top.intersection(&relevant).count()
}

/// 1 when any relevant item is in the top `k`, else 0
pub fn hitrate<T: Eq + std::hash::Hash>(relevant: &[T], recommended: &[T], k: usize) -> f64 {
    if intersection(relevant, recommended, k) > 0 {
        1.0
    } else {
        0.0
    }
}

/// Share of distinct relevant items found in the top `k`
pub fn recall<T: Eq + std::hash::Hash>(relevant: &[T], recommended: &[T], k: usize) -> f64 {
    let distinct = relevant.iter().collect::<HashSet<_>>().len();
    if distinct == 0 {
        return 0.0;
    }
    intersection(relevant, recommended, k) as f64 / distinct as f64
}

/// Normalized discounted cumulative gain with binary relevance
pub fn ndcg<T: Eq + std::hash::Hash>(relevant: &[T], recommended: &[T], k: usize) -> f64 {
    let relevant_set: HashSet<&T> = relevant.iter().collect();

    let dcg: f64 = recommended
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, item)| relevant_set.contains(item))
        .map(|(idx, _)| discount(idx))
        .sum();

    let idcg: f64 = (0..relevant.len().min(k)).map(discount).sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

fn discount(idx: usize) -> f64 {
    1.0 / ((idx + 2) as f64).log2()
}
