use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::metrics;
use super::model::{Dataset, ModelParams, NextItemModel};

/// Mean ranking quality of a model over held-out likes
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Evaluation {
    pub ndcg: f64,
    pub recall: f64,
    pub users: usize,
}

/// Best hyperparameters found by [`search`]
#[derive(Debug, Clone, PartialEq)]
pub struct TuningOutcome {
    pub params: ModelParams,
    pub evaluation: Evaluation,
    pub trials: usize,
}

/// Draws one hyperparameter candidate
pub fn sample_params<R: Rng>(rng: &mut R) -> ModelParams {
    ModelParams {
        window: rng.gen_range(1..=10),
        min_count: rng.gen_range(0..=20),
        decay: rng.gen_range(0.1..=1.0),
        symmetric: rng.gen_bool(0.5),
    }
}

/// Scores the model on predicting each user's last like from the earlier ones
///
/// Users the model knows nothing about score zero.
pub fn evaluate(model: &NextItemModel, dataset: &Dataset, k: usize) -> Evaluation {
    let mut ndcg_sum = 0.0;
    let mut recall_sum = 0.0;
    let mut users = 0;

    for (train, test) in dataset.evaluable() {
        users += 1;
        let Some(predicted) = model.predict(train, k) else {
            continue;
        };
        let relevant = std::slice::from_ref(test);
        ndcg_sum += metrics::ndcg(relevant, predicted.as_slice(), k);
        recall_sum += metrics::recall(relevant, predicted.as_slice(), k);
    }

    if users == 0 {
        return Evaluation::default();
    }

    Evaluation {
        ndcg: ndcg_sum / users as f64,
        recall: recall_sum / users as f64,
        users,
    }
}

/// Seeded random search maximizing recall@k
///
/// The first candidate is always the default parameters. Earlier candidates
/// win ties. Without any evaluable user the defaults are returned untried.
pub fn search(dataset: &Dataset, trials: usize, k: usize, seed: u64) -> TuningOutcome {
    let train = dataset.train_sequences();
    if train.is_empty() || trials == 0 {
        return TuningOutcome {
            params: ModelParams::default(),
            evaluation: Evaluation::default(),
            trials: 0,
        };
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<(ModelParams, Evaluation)> = None;

    for trial in 0..trials {
        let params = if trial == 0 {
            ModelParams::default()
        } else {
            sample_params(&mut rng)
        };

        let model = NextItemModel::fit(&train, params);
        let evaluation = evaluate(&model, dataset, k);

        tracing::debug!(
            trial,
            window = params.window,
            min_count = params.min_count,
            decay = params.decay,
            symmetric = params.symmetric,
            ndcg = evaluation.ndcg,
            recall = evaluation.recall,
            "Evaluated model candidate"
        );

        let improves = best
            .as_ref()
            .map_or(true, |(_, current)| evaluation.recall > current.recall);
        if improves {
            best = Some((params, evaluation));
        }
    }

    let (params, evaluation) = best.unwrap_or_default();

    tracing::info!(
        trials,
        users = evaluation.users,
        k,
        ndcg = evaluation.ndcg,
        recall = evaluation.recall,
        ?params,
        "Model search finished"
    );

    TuningOutcome {
        params,
        evaluation,
        trials,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, InteractionRow};

    fn likes(user: &str, items: &[&str]) -> Vec<InteractionRow> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| InteractionRow {
                user_id: user.to_string(),
                item_id: item.to_string(),
                action: Action::Like,
                timestamp: i as f64,
            })
            .collect()
    }

    fn chain_dataset() -> Dataset {
        let mut rows = Vec::new();
        for user in 0..6 {
            rows.extend(likes(&format!("u{}", user), &["a", "b", "c"]));
        }
        Dataset::from_rows(&rows)
    }

    #[test]
    fn test_sample_params_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let p = sample_params(&mut rng);
            assert!((1..=10).contains(&p.window));
            assert!(p.min_count <= 20);
            assert!((0.1..=1.0).contains(&p.decay));
        }
    }

    #[test]
    fn test_evaluate_perfect_chain() {
        let dataset = chain_dataset();
        let train = dataset.full_sequences();
        let model = NextItemModel::fit(&train, ModelParams::default());

        let evaluation = evaluate(&model, &dataset, 10);
        assert_eq!(evaluation.users, 6);
        assert!((evaluation.recall - 1.0).abs() < 1e-9);
        assert!((evaluation.ndcg - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_search_without_evaluable_users() {
        let dataset = Dataset::from_rows(&likes("solo", &["a"]));
        let outcome = search(&dataset, 10, 5, 42);
        assert_eq!(outcome.trials, 0);
        assert_eq!(outcome.params, ModelParams::default());
    }

    #[test]
    fn test_search_is_deterministic_for_seed() {
        let dataset = chain_dataset();
        let first = search(&dataset, 15, 5, 42);
        let second = search(&dataset, 15, 5, 42);
        assert_eq!(first, second);
        assert_eq!(first.trials, 15);
    }

    #[test]
    fn test_search_never_worse_than_defaults() {
        let dataset = chain_dataset();
        let train = dataset.train_sequences();
        let baseline = evaluate(&NextItemModel::fit(&train, ModelParams::default()), &dataset, 5);

        let outcome = search(&dataset, 20, 5, 3);
        assert!(outcome.evaluation.recall >= baseline.recall);
    }
}
