//! Personalization model
//!
//! Users' liked items, in time order, form sequences. The model counts how
//! often items follow each other within a window, weighting by distance, and
//! predicts the next item for a history by summing those counts over the
//! history's most recent items.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::models::{Action, InteractionRow};

/// One user's liked items, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct UserHistory {
    pub user_id: String,
    pub items: Vec<String>,
}

impl UserHistory {
    /// Everything but the last like, and the last like held out for evaluation
    pub fn split(&self) -> Option<(&[String], &String)> {
        match self.items.split_last() {
            Some((last, train)) if !train.is_empty() => Some((train, last)),
            _ => None,
        }
    }
}

/// Liked-item sequences of every user in the log
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub users: Vec<UserHistory>,
}

impl Dataset {
    pub fn from_rows(rows: &[InteractionRow]) -> Self {
        let mut likes: Vec<&InteractionRow> = rows
            .iter()
            .filter(|row| row.action == Action::Like)
            .collect();
        likes.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for row in likes {
            grouped
                .entry(row.user_id.as_str())
                .or_default()
                .push(row.item_id.clone());
        }

        Self {
            users: grouped
                .into_iter()
                .map(|(user_id, items)| UserHistory {
                    user_id: user_id.to_string(),
                    items,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Histories with a held-out item
    pub fn evaluable(&self) -> impl Iterator<Item = (&[String], &String)> {
        self.users.iter().filter_map(UserHistory::split)
    }

    /// Training parts of the evaluable histories
    pub fn train_sequences(&self) -> Vec<&[String]> {
        self.evaluable().map(|(train, _)| train).collect()
    }

    /// Complete histories
    pub fn full_sequences(&self) -> Vec<&[String]> {
        self.users.iter().map(|u| u.items.as_slice()).collect()
    }
}

/// Hyperparameters of [`NextItemModel`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Max distance between co-occurring items, and number of recent history
    /// items used at prediction time
    pub window: usize,
    /// Items liked fewer times than this are left out of the vocabulary
    pub min_count: usize,
    /// Weight multiplier per extra step of distance
    pub decay: f64,
    /// Count pairs in both directions instead of only "b follows a"
    pub symmetric: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            window: 3,
            min_count: 1,
            decay: 0.7,
            symmetric: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NextItemModel {
    params: ModelParams,
    vocabulary: HashSet<String>,
    cooccurrence: HashMap<String, HashMap<String, f64>>,
}

impl NextItemModel {
    pub fn fit(sequences: &[&[String]], params: ModelParams) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for sequence in sequences {
            for item in sequence.iter() {
                *counts.entry(item.as_str()).or_insert(0) += 1;
            }
        }

        let vocabulary: HashSet<String> = counts
            .into_iter()
            .filter(|(_, count)| *count >= params.min_count)
            .map(|(item, _)| item.to_string())
            .collect();

        let mut cooccurrence: HashMap<String, HashMap<String, f64>> = HashMap::new();
        for sequence in sequences {
            let kept: Vec<&String> = sequence
                .iter()
                .filter(|item| vocabulary.contains(item.as_str()))
                .collect();

            for (i, &from) in kept.iter().enumerate() {
                for distance in 1..=params.window {
                    let Some(&to) = kept.get(i + distance) else {
                        break;
                    };
                    if from == to {
                        continue;
                    }
                    let weight = params.decay.powi(distance as i32 - 1);
                    add_weight(&mut cooccurrence, from, to, weight);
                    if params.symmetric {
                        add_weight(&mut cooccurrence, to, from, weight);
                    }
                }
            }
        }

        Self {
            params,
            vocabulary,
            cooccurrence,
        }
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    /// Top `topn` next items for a history, oldest first
    ///
    /// Only the last `window` items of the history are scored, the most
    /// recent one weighing most. Items already in the history are never
    /// predicted. Returns `None` when none of the scored items is known.
    pub fn predict(&self, history: &[String], topn: usize) -> Option<Vec<String>> {
        let start = history.len().saturating_sub(self.params.window);
        let context = &history[start..];

        if !context.iter().any(|item| self.vocabulary.contains(item)) {
            return None;
        }

        let seen: HashSet<&str> = history.iter().map(String::as_str).collect();
        let mut scores: HashMap<&str, f64> = HashMap::new();
        for (age, item) in context.iter().rev().enumerate() {
            let recency = self.params.decay.powi(age as i32);
            if let Some(neighbours) = self.cooccurrence.get(item) {
                for (candidate, weight) in neighbours {
                    if !seen.contains(candidate.as_str()) {
                        *scores.entry(candidate.as_str()).or_insert(0.0) += recency * weight;
                    }
                }
            }
        }

        let mut ranked: Vec<(&str, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Some(
            ranked
                .into_iter()
                .take(topn)
                .map(|(item, _)| item.to_string())
                .collect(),
        )
    }
}

fn add_weight(
    cooccurrence: &mut HashMap<String, HashMap<String, f64>>,
    from: &str,
    to: &str,
    weight: f64,
) {
    *cooccurrence
        .entry(from.to_string())
        .or_default()
        .entry(to.to_string())
        .or_insert(0.0) += weight;
}

/// Personalized lists for every user, predicted from their full history
pub fn personalize(model: &NextItemModel, dataset: &Dataset, k: usize) -> Vec<(String, Vec<String>)> {
    dataset
        .users
        .iter()
        .filter_map(|user| {
            model
                .predict(&user.items, k)
                .filter(|recs| !recs.is_empty())
                .map(|recs| (user.user_id.clone(), recs))
        })
        .collect()
}
