use std::collections::{HashMap, HashSet};

use crate::models::{Action, InteractionRow};

/// Most-liked items over the interaction history
///
/// Repeated likes of an item by the same user count once, so an item's score
/// is the number of distinct users who ever liked it. A later dislike does
/// not cancel an earlier like. Ties are broken by item id.
pub fn top_items(rows: &[InteractionRow], limit: usize) -> Vec<String> {
    let likes: HashSet<(&str, &str)> = rows
        .iter()
        .filter(|row| row.action == Action::Like)
        .map(|row| (row.user_id.as_str(), row.item_id.as_str()))
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_user_id, item_id) in likes {
        *counts.entry(item_id).or_insert(0) += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    ranked
        .into_iter()
        .take(limit)
        .map(|(item_id, _)| item_id.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user: &str, item: &str, action: Action, ts: f64) -> InteractionRow {
        InteractionRow {
            user_id: user.to_string(),
            item_id: item.to_string(),
            action,
            timestamp: ts,
        }
    }

    #[test]
    fn test_ranks_by_distinct_likers() {
        let rows = vec![
            row("u1", "a", Action::Like, 1.0),
            row("u2", "a", Action::Like, 2.0),
            row("u3", "a", Action::Like, 3.0),
            row("u1", "b", Action::Like, 4.0),
            row("u2", "b", Action::Like, 5.0),
            row("u1", "c", Action::Like, 6.0),
        ];
        assert_eq!(top_items(&rows, 10), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_repeated_likes_count_once() {
        let rows = vec![
            row("u1", "a", Action::Like, 1.0),
            row("u1", "a", Action::Like, 2.0),
            row("u1", "a", Action::Like, 3.0),
            row("u1", "b", Action::Like, 1.0),
            row("u2", "b", Action::Like, 1.0),
        ];
        assert_eq!(top_items(&rows, 10), vec!["b", "a"]);
    }

    #[test]
    fn test_dislikes_are_ignored() {
        let rows = vec![
            row("u1", "a", Action::Dislike, 1.0),
            row("u2", "a", Action::Dislike, 1.0),
            row("u1", "b", Action::Like, 1.0),
        ];
        assert_eq!(top_items(&rows, 10), vec!["b"]);
    }

    #[test]
    fn test_later_dislike_keeps_earlier_like() {
        let rows = vec![
            row("u1", "a", Action::Like, 1.0),
            row("u1", "a", Action::Dislike, 2.0),
        ];
        assert_eq!(top_items(&rows, 10), vec!["a"]);
    }

    #[test]
    fn test_ties_broken_by_item_id_and_limit_applied() {
        let rows = vec![
            row("u1", "z", Action::Like, 1.0),
            row("u1", "m", Action::Like, 1.0),
            row("u1", "b", Action::Like, 1.0),
        ];
        assert_eq!(top_items(&rows, 2), vec!["b", "m"]);
    }

    #[test]
    fn test_empty_history() {
        assert!(top_items(&[], 500).is_empty());
    }
}
