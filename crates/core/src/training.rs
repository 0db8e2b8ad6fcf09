//! Fits the three classifier families on the Cleveland heart-disease data and
//! writes them out as JSON artifacts.

use crate::error::RiskError;
use crate::features::{FEATURE_COLUMNS, FEATURE_COUNT};
use crate::model::{
    normalized, sigmoid, ArtifactMetadata, Classifier, ForestModel, LogisticModel, ModelArtifact,
    ModelKind, ModelMetrics, StandardScaler, TreeModel, TreeNode,
};
use crate::registry::KNOWN_MODELS;
use anyhow::Context;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub rows: Vec<[f64; FEATURE_COUNT]>,
    pub labels: Vec<u8>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|l| **l == 1).count()
    }

    pub fn push(&mut self, row: [f64; FEATURE_COUNT], label: u8) {
        self.rows.push(row);
        self.labels.push(label);
    }

    fn subset(&self, idx: &[usize]) -> Dataset {
        Dataset {
            rows: idx.iter().map(|i| self.rows[*i]).collect(),
            labels: idx.iter().map(|i| self.labels[*i]).collect(),
        }
    }
}

fn is_missing(cell: &str) -> bool {
    let c = cell.trim();
    c.is_empty() || c == "?"
}

/// Reads a Cleveland-style CSV. A header row is detected when the first cell
/// is not numeric; headerless files must list the 13 features then the target.
/// Rows with missing cells (`?` or empty) or non-finite numbers are dropped. Targets above zero are
/// treated as disease present.
pub fn parse_dataset(text: &str) -> Result<Dataset, RiskError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let first = match records.next() {
        Some(r) => r.map_err(|e| RiskError::Dataset(e.to_string()))?,
        None => return Err(RiskError::Dataset("dataset is empty".into())),
    };

    let has_header = first
        .get(0)
        .map(|c| !is_missing(c) && c.parse::<f64>().is_err())
        .unwrap_or(false);

    let columns: Vec<usize> = if has_header {
        let headers: Vec<String> = first.iter().map(|h| h.to_ascii_lowercase()).collect();
        let mut cols = Vec::with_capacity(FEATURE_COUNT + 1);
        for name in FEATURE_COLUMNS {
            let idx = headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| RiskError::Dataset(format!("missing column: {name}")))?;
            cols.push(idx);
        }
        let target = headers
            .iter()
            .position(|h| h == "target" || h == "num")
            .ok_or_else(|| RiskError::Dataset("missing target column (target or num)".into()))?;
        cols.push(target);
        cols
    } else {
        (0..=FEATURE_COUNT).collect()
    };

    let mut data = Dataset::default();
    let mut dropped = 0usize;
    let body = if has_header {
        None
    } else {
        Some(Ok(first))
    };

    for (line, record) in body.into_iter().chain(records).enumerate() {
        let record = record.map_err(|e| RiskError::Dataset(e.to_string()))?;
        if record.iter().all(|c| c.is_empty()) {
            continue;
        }
        let cells: Option<Vec<&str>> = columns.iter().map(|i| record.get(*i)).collect();
        let cells = cells.ok_or_else(|| {
            RiskError::Dataset(format!(
                "record {} has {} columns, expected at least {}",
                line + 1,
                record.len(),
                columns.iter().max().map(|m| m + 1).unwrap_or(0)
            ))
        })?;
        if cells.iter().any(|c| is_missing(c)) {
            dropped += 1;
            continue;
        }
        let mut row = [0.0; FEATURE_COUNT];
        for (j, cell) in cells[..FEATURE_COUNT].iter().enumerate() {
            row[j] = cell.parse::<f64>().map_err(|_| {
                RiskError::Dataset(format!(
                    "record {}: {} is not numeric ({cell})",
                    line + 1,
                    FEATURE_COLUMNS[j]
                ))
            })?;
        }
        let target: f64 = cells[FEATURE_COUNT].parse().map_err(|_| {
            RiskError::Dataset(format!("record {}: target is not numeric", line + 1))
        })?;
        // "nan" and "inf" parse as f64 and count as missing.
        if !target.is_finite() || row.iter().any(|v| !v.is_finite()) {
            dropped += 1;
            continue;
        }
        data.push(row, u8::from(target > 0.0));
    }

    if dropped > 0 {
        warn!("Dropped {} row(s) with missing or non-finite values", dropped);
    }
    if data.is_empty() {
        return Err(RiskError::Dataset("no usable rows".into()));
    }
    Ok(data)
}

pub fn load_dataset(path: &Path) -> anyhow::Result<Dataset> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read dataset {}", path.display()))?;
    let data = parse_dataset(&text).with_context(|| format!("parse {}", path.display()))?;
    info!(
        "Loaded {} rows ({} positive) from {}",
        data.len(),
        data.positives(),
        path.display()
    );
    Ok(data)
}

/// Seeded shuffle split. The training side always keeps at least one row.
pub fn train_test_split(data: &Dataset, test_fraction: f64, seed: u64) -> (Dataset, Dataset) {
    let mut idx: Vec<usize> = (0..data.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    idx.shuffle(&mut rng);
    let fraction = test_fraction.clamp(0.0, 1.0);
    let test_n = ((data.len() as f64) * fraction).round() as usize;
    let test_n = test_n.min(data.len().saturating_sub(1));
    let (test_idx, train_idx) = idx.split_at(test_n);
    (data.subset(train_idx), data.subset(test_idx))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    pub iterations: usize,
    pub learning_rate: f64,
    /// Inverse L2 regularisation strength.
    pub c: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            iterations: 2000,
            learning_rate: 0.1,
            c: 1.0,
        }
    }
}

pub fn train_logistic(data: &Dataset, params: &LogisticParams) -> Result<LogisticModel, RiskError> {
    if data.is_empty() {
        return Err(RiskError::Dataset("cannot train on an empty dataset".into()));
    }
    let scaler = StandardScaler::fit(&data.rows);
    let xs: Vec<Vec<f64>> = data.rows.iter().map(|r| scaler.transform(r)).collect();
    let n = data.len() as f64;
    let l2 = if params.c > 0.0 { 1.0 / (params.c * n) } else { 0.0 };

    let mut w = vec![0.0; FEATURE_COUNT];
    let mut b = 0.0;
    for _ in 0..params.iterations {
        let mut grad_w = vec![0.0; FEATURE_COUNT];
        let mut grad_b = 0.0;
        for (x, y) in xs.iter().zip(data.labels.iter()) {
            let z = b + w.iter().zip(x.iter()).map(|(wi, xi)| wi * xi).sum::<f64>();
            let err = sigmoid(z) - f64::from(*y);
            for j in 0..FEATURE_COUNT {
                grad_w[j] += err * x[j] / n;
            }
            grad_b += err / n;
        }
        for j in 0..FEATURE_COUNT {
            w[j] -= params.learning_rate * (grad_w[j] + l2 * w[j]);
        }
        b -= params.learning_rate * grad_b;
    }

    Ok(LogisticModel {
        scaler: Some(scaler),
        coefficients: w,
        intercept: b,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all of them.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct TreeBuilder<'a, R: Rng> {
    data: &'a Dataset,
    params: TreeParams,
    rng: &'a mut R,
    nodes: Vec<TreeNode>,
    importances: Vec<f64>,
    total: f64,
}

impl<'a, R: Rng> TreeBuilder<'a, R> {
    fn candidate_features(&mut self) -> Vec<usize> {
        let mut features: Vec<usize> = (0..FEATURE_COUNT).collect();
        if let Some(k) = self.params.max_features {
            let k = k.clamp(1, FEATURE_COUNT);
            features.shuffle(&mut *self.rng);
            features.truncate(k);
            features.sort_unstable();
        }
        features
    }

    fn best_split(&mut self, idx: &[usize], parent_impurity: f64) -> Option<Split> {
        let n = idx.len();
        let total_pos = idx.iter().filter(|i| self.data.labels[**i] == 1).count();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<(usize, f64, f64)> = None;

        for feature in self.candidate_features() {
            let mut sorted: Vec<usize> = idx.to_vec();
            sorted.sort_by(|a, b| {
                self.data.rows[*a][feature].total_cmp(&self.data.rows[*b][feature])
            });
            let mut left_pos = 0usize;
            for i in 0..n - 1 {
                if self.data.labels[sorted[i]] == 1 {
                    left_pos += 1;
                }
                let here = self.data.rows[sorted[i]][feature];
                let next = self.data.rows[sorted[i + 1]][feature];
                if here == next {
                    continue;
                }
                let nl = i + 1;
                let nr = n - nl;
                if nl < min_leaf || nr < min_leaf {
                    continue;
                }
                let weighted = (nl as f64 * gini(left_pos, nl)
                    + nr as f64 * gini(total_pos - left_pos, nr))
                    / n as f64;
                let gain = parent_impurity - weighted;
                if gain > 1e-12 && best.map(|(_, _, g)| gain > g).unwrap_or(true) {
                    best = Some((feature, (here + next) / 2.0, gain));
                }
            }
        }

        best.map(|(feature, threshold, gain)| {
            let (left, right): (Vec<usize>, Vec<usize>) = idx
                .iter()
                .copied()
                .partition(|i| self.data.rows[*i][feature] <= threshold);
            Split {
                feature,
                threshold,
                gain,
                left,
                right,
            }
        })
    }

    fn build(&mut self, idx: &[usize], depth: usize) -> usize {
        let n = idx.len();
        let pos = idx.iter().filter(|i| self.data.labels[**i] == 1).count();
        let probability = if n == 0 { 0.0 } else { pos as f64 / n as f64 };
        let node = self.nodes.len();
        self.nodes.push(TreeNode::Leaf { probability });

        let impurity = gini(pos, n);
        if depth >= self.params.max_depth
            || n < self.params.min_samples_split.max(2)
            || impurity == 0.0
        {
            return node;
        }
        let Some(split) = self.best_split(idx, impurity) else {
            return node;
        };

        self.importances[split.feature] += (n as f64 / self.total) * split.gain;
        let left = self.build(&split.left, depth + 1);
        let right = self.build(&split.right, depth + 1);
        self.nodes[node] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node
    }
}

/// CART with Gini impurity. `idx` selects (possibly repeated) training rows.
fn grow_tree<R: Rng>(
    data: &Dataset,
    idx: &[usize],
    params: &TreeParams,
    rng: &mut R,
) -> TreeModel {
    let mut builder = TreeBuilder {
        data,
        params: *params,
        rng,
        nodes: Vec::new(),
        importances: vec![0.0; FEATURE_COUNT],
        total: idx.len().max(1) as f64,
    };
    builder.build(idx, 0);
    TreeModel {
        nodes: builder.nodes,
        feature_importances: normalized(builder.importances),
    }
}

pub fn train_tree(data: &Dataset, params: &TreeParams, seed: u64) -> Result<TreeModel, RiskError> {
    if data.is_empty() {
        return Err(RiskError::Dataset("cannot train on an empty dataset".into()));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let idx: Vec<usize> = (0..data.len()).collect();
    Ok(grow_tree(data, &idx, params, &mut rng))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub tree: TreeParams,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            tree: TreeParams {
                max_depth: 8,
                min_samples_split: 2,
                min_samples_leaf: 1,
                // sqrt(13) rounded down
                max_features: Some(3),
            },
        }
    }
}

pub fn train_forest(
    data: &Dataset,
    params: &ForestParams,
    seed: u64,
) -> Result<ForestModel, RiskError> {
    if data.is_empty() {
        return Err(RiskError::Dataset("cannot train on an empty dataset".into()));
    }
    if params.n_trees == 0 {
        return Err(RiskError::Dataset("n_trees must be at least 1".into()));
    }
    let n = data.len();
    let mut trees = Vec::with_capacity(params.n_trees);
    let mut importances = vec![0.0; FEATURE_COUNT];
    for t in 0..params.n_trees {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
        let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        let tree = grow_tree(data, &sample, &params.tree, &mut rng);
        for (acc, w) in importances.iter_mut().zip(tree.feature_importances.iter()) {
            *acc += w / params.n_trees as f64;
        }
        trees.push(tree);
    }
    Ok(ForestModel {
        trees,
        feature_importances: normalized(importances),
    })
}

/// Area under the ROC curve via the rank-sum statistic, averaging tied ranks.
/// Returns 0.5 when only one class is present.
pub fn roc_auc(scores: &[f64], labels: &[u8]) -> f64 {
    let pos = labels.iter().filter(|l| **l == 1).count();
    let neg = labels.len() - pos;
    if pos == 0 || neg == 0 {
        return 0.5;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));
    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = avg;
        }
        i = j + 1;
    }
    let pos_rank_sum: f64 = ranks
        .iter()
        .zip(labels.iter())
        .filter(|(_, l)| **l == 1)
        .map(|(r, _)| *r)
        .sum();
    let pos = pos as f64;
    (pos_rank_sum - pos * (pos + 1.0) / 2.0) / (pos * neg as f64)
}

pub fn evaluate(model: &dyn Classifier, data: &Dataset) -> Result<ModelMetrics, RiskError> {
    let mut scores = Vec::with_capacity(data.len());
    for row in &data.rows {
        scores.push(model.predict_proba(&crate::features::FeatureVector::new(*row))?);
    }
    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for (s, y) in scores.iter().zip(data.labels.iter()) {
        match (*s >= 0.5, *y == 1) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fn_ += 1,
        }
    }
    let ratio = |a: usize, b: usize| if b == 0 { 0.0 } else { a as f64 / b as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    Ok(ModelMetrics {
        accuracy: ratio(tp + tn, data.len()),
        precision,
        recall,
        f1,
        roc_auc: roc_auc(&scores, &data.labels),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub seed: u64,
    pub test_fraction: f64,
    pub logistic: LogisticParams,
    pub tree: TreeParams,
    pub forest: ForestParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            test_fraction: 0.2,
            logistic: LogisticParams::default(),
            tree: TreeParams::default(),
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub name: &'static str,
    pub file: &'static str,
    pub artifact: ModelArtifact,
}

/// Trains every known model on a seeded split and records held-out metrics.
pub fn train_all(data: &Dataset, cfg: &TrainingConfig) -> Result<Vec<TrainedModel>, RiskError> {
    let (train, test) = train_test_split(data, cfg.test_fraction, cfg.seed);
    let eval_set = if test.is_empty() {
        warn!("Test split is empty; metrics are computed on the training data");
        &train
    } else {
        &test
    };
    info!(
        "Training on {} rows, evaluating on {}",
        train.len(),
        eval_set.len()
    );

    let mut out = Vec::with_capacity(KNOWN_MODELS.len());
    for (name, file) in KNOWN_MODELS {
        let kind = match file {
            "logistic_regression.json" => {
                ModelKind::LogisticRegression(train_logistic(&train, &cfg.logistic)?)
            }
            "decision_tree.json" => ModelKind::DecisionTree(train_tree(&train, &cfg.tree, cfg.seed)?),
            _ => ModelKind::RandomForest(train_forest(&train, &cfg.forest, cfg.seed)?),
        };
        let mut artifact = ModelArtifact::new(kind);
        let metrics = evaluate(&artifact, eval_set)?;
        info!(
            model = name,
            accuracy = metrics.accuracy,
            roc_auc = metrics.roc_auc,
            "trained"
        );
        artifact.metadata = ArtifactMetadata {
            trained_at: Some(Utc::now().to_rfc3339()),
            train_samples: train.len(),
            test_samples: test.len(),
            metrics: Some(metrics),
        };
        out.push(TrainedModel {
            name,
            file,
            artifact,
        });
    }
    Ok(out)
}

pub fn save_artifact(dir: &Path, file: &str, artifact: &ModelArtifact) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(file);
    let text = serde_json::to_string_pretty(artifact)?;
    fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
