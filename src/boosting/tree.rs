//! Histogram regression trees grown on gradient statistics.

use serde::{Deserialize, Serialize};

use crate::frame::FeatureMatrix;

/// Bin code for a missing cell.
const MISSING_BIN: u16 = u16::MAX;
/// Smallest hessian mass allowed on either side of a split.
const MIN_CHILD_HESSIAN: f64 = 1e-3;
/// Splits must improve the objective by more than this.
const MIN_SPLIT_GAIN: f64 = 1e-10;

/// Features quantised into at most `max_bins` ordered bins.
///
/// A value `x` falls into bin `b` = number of cut points strictly below `x`,
/// so `bin <= b` is equivalent to `x <= cuts[b]`. Prediction therefore works
/// on raw values with the cut point as threshold.
pub(crate) struct BinnedMatrix {
    bins: Vec<Vec<u16>>,
    cuts: Vec<Vec<f64>>,
}

impl BinnedMatrix {
    pub(crate) fn new(x: &FeatureMatrix, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, 256);
        let mut bins = Vec::with_capacity(x.n_features());
        let mut cuts = Vec::with_capacity(x.n_features());
        for f in 0..x.n_features() {
            let col = x.column(f);
            let c = cut_points(col, max_bins);
            bins.push(
                col.iter()
                    .map(|&v| {
                        if v.is_nan() {
                            MISSING_BIN
                        } else {
                            c.partition_point(|&cut| cut < v) as u16
                        }
                    })
                    .collect(),
            );
            cuts.push(c);
        }
        Self { bins, cuts }
    }

    fn n_features(&self) -> usize {
        self.bins.len()
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }
}

/// Cut points between distinct finite values: midpoints when the column has
/// few distinct values, otherwise approximately equal-frequency quantiles.
fn cut_points(values: &[f64], max_bins: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    let mut distinct = sorted.clone();
    distinct.dedup();
    if distinct.len() < 2 {
        return Vec::new();
    }

    let mut cuts: Vec<f64> = if distinct.len() <= max_bins {
        distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
    } else {
        (1..max_bins)
            .map(|k| {
                let pos = k * sorted.len() / max_bins;
                let (lo, hi) = (sorted[pos.saturating_sub(1)], sorted[pos]);
                if lo < hi {
                    (lo + hi) / 2.0
                } else {
                    lo
                }
            })
            .collect()
    };
    cuts.dedup();
    // The largest value must stay in the last bin.
    if let Some(&max) = distinct.last() {
        cuts.retain(|&c| c < max);
    }
    cuts
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        missing_left: bool,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn predict_row(&self, x: impl Fn(usize) -> f64) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    missing_left,
                    left,
                    right,
                } => {
                    let v = x(*feature);
                    let go_left = if v.is_nan() {
                        *missing_left
                    } else {
                        v <= *threshold
                    };
                    i = if go_left { *left } else { *right };
                }
            }
        }
    }

    /// Highest feature index referenced by any split.
    pub fn max_feature(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Split { feature, .. } => Some(*feature),
                Node::Leaf { .. } => None,
            })
            .max()
    }

    pub(crate) fn set_leaf_value(&mut self, node: usize, value: f64) {
        if let Some(Node::Leaf { value: v }) = self.nodes.get_mut(node) {
            *v = value;
        }
    }

    pub(crate) fn leaf_value(&self, node: usize) -> f64 {
        match self.nodes.get(node) {
            Some(Node::Leaf { value }) => *value,
            _ => 0.0,
        }
    }
}

pub(crate) struct GrowParams {
    pub max_depth: usize,
    pub min_child_samples: usize,
    pub reg_lambda: f64,
    pub learning_rate: f64,
}

/// A grown tree together with the training rows that landed in each leaf.
pub(crate) struct Grown {
    pub tree: Tree,
    pub leaves: Vec<(usize, Vec<usize>)>,
}

#[derive(Default, Clone, Copy)]
struct Stats {
    g: f64,
    h: f64,
    n: usize,
}

impl Stats {
    fn add(&mut self, g: f64, h: f64) {
        self.g += g;
        self.h += h;
        self.n += 1;
    }

    fn plus(self, o: Stats) -> Stats {
        Stats {
            g: self.g + o.g,
            h: self.h + o.h,
            n: self.n + o.n,
        }
    }

    fn minus(self, o: Stats) -> Stats {
        Stats {
            g: self.g - o.g,
            h: self.h - o.h,
            n: self.n - o.n,
        }
    }

    fn score(&self, lambda: f64) -> f64 {
        self.g * self.g / (self.h + lambda)
    }
}

struct Candidate {
    feature: usize,
    bin: usize,
    missing_left: bool,
    gain: f64,
}

/// Grow one tree depth-first on the given gradient statistics.
pub(crate) fn grow(binned: &BinnedMatrix, grad: &[f64], hess: &[f64], params: &GrowParams) -> Grown {
    let mut nodes = vec![Node::Leaf { value: 0.0 }];
    let mut leaves = Vec::new();
    let mut stack = vec![(0usize, (0..grad.len()).collect::<Vec<usize>>(), 0usize)];

    while let Some((idx, rows, depth)) = stack.pop() {
        let total = rows.iter().fold(Stats::default(), |mut s, &r| {
            s.add(grad[r], hess[r]);
            s
        });

        let split = if depth < params.max_depth && rows.len() >= 2 * params.min_child_samples.max(1) {
            best_split(binned, &rows, grad, hess, total, params)
        } else {
            None
        };

        match split {
            Some(c) => {
                let column = &binned.bins[c.feature];
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                    rows.iter().partition(|&&r| {
                        let b = column[r];
                        if b == MISSING_BIN {
                            c.missing_left
                        } else {
                            usize::from(b) <= c.bin
                        }
                    });
                let left = nodes.len();
                nodes.push(Node::Leaf { value: 0.0 });
                nodes.push(Node::Leaf { value: 0.0 });
                nodes[idx] = Node::Split {
                    feature: c.feature,
                    threshold: binned.cuts[c.feature][c.bin],
                    missing_left: c.missing_left,
                    left,
                    right: left + 1,
                };
                stack.push((left + 1, right_rows, depth + 1));
                stack.push((left, left_rows, depth + 1));
            }
            None => {
                let value = -total.g / (total.h + params.reg_lambda) * params.learning_rate;
                nodes[idx] = Node::Leaf { value };
                leaves.push((idx, rows));
            }
        }
    }

    Grown {
        tree: Tree { nodes },
        leaves,
    }
}

fn best_split(
    binned: &BinnedMatrix,
    rows: &[usize],
    grad: &[f64],
    hess: &[f64],
    total: Stats,
    params: &GrowParams,
) -> Option<Candidate> {
    let lambda = params.reg_lambda;
    let min_n = params.min_child_samples.max(1);
    let parent = total.score(lambda);
    let mut best: Option<Candidate> = None;

    for f in 0..binned.n_features() {
        let n_bins = binned.n_bins(f);
        if n_bins < 2 {
            continue;
        }
        let column = &binned.bins[f];
        let mut hist = vec![Stats::default(); n_bins];
        let mut missing = Stats::default();
        for &r in rows {
            let b = column[r];
            if b == MISSING_BIN {
                missing.add(grad[r], hess[r]);
            } else {
                hist[usize::from(b)].add(grad[r], hess[r]);
            }
        }

        let mut cum = Stats::default();
        for (b, bin_stats) in hist.iter().enumerate().take(n_bins - 1) {
            cum = cum.plus(*bin_stats);
            let directions: &[bool] = if missing.n > 0 { &[false, true] } else { &[false] };
            for &missing_left in directions {
                let left = if missing_left { cum.plus(missing) } else { cum };
                let right = total.minus(left);
                if left.n < min_n || right.n < min_n {
                    continue;
                }
                if left.h < MIN_CHILD_HESSIAN || right.h < MIN_CHILD_HESSIAN {
                    continue;
                }
                let gain = left.score(lambda) + right.score(lambda) - parent;
                if gain > MIN_SPLIT_GAIN && best.as_ref().map_or(true, |c| gain > c.gain) {
                    best = Some(Candidate {
                        feature: f,
                        bin: b,
                        missing_left,
                        gain,
                    });
                }
            }
        }
    }
    best
}
