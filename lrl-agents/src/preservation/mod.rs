//! Weight preservation across sequential tasks.
//!
//! Every parameter tensor gets a precision (importance) and an anchor mean of the same shape.
//! While training, `coeff * Σ precision * (param - mean)^2` is added to the loss. At a task
//! boundary a strategy estimates a fresh precision from the task just learned, which is blended
//! into the running one, and the anchors are moved to the current parameter values.

mod ewc;
mod mas;
mod scp;

use crate::driver::RolloutDriver;
use anyhow::{Result, ensure};
use candle_core::{Tensor, Var, backprop::GradStore};
use lrl_core::{network::ActorCritic, rng::RNG};
use rand::{Rng, seq::SliceRandom};
use rand_distr::StandardNormal;
use std::collections::{BTreeMap, VecDeque};

/// Number of most recent stored states used by the state based strategies.
pub const CONSOLIDATION_SAMPLE: usize = 512;

pub type Precision = BTreeMap<String, Tensor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservationStrategy {
    /// Pure fine tuning, nothing is preserved.
    Baseline,
    /// Elastic weight consolidation, squared policy gradients over fresh rollouts.
    Ewc,
    /// Sliced Cramer preservation over stored states.
    Scp { n_slices: usize },
    /// Memory aware synapses over stored states.
    Mas,
}

impl PreservationStrategy {
    pub fn uses_state_store(&self) -> bool {
        matches!(self, Self::Scp { .. } | Self::Mas)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservationPhase {
    Idle,
    Training(usize),
    Consolidating(usize),
}

#[derive(Debug, Clone, Default)]
pub struct PreservationState {
    pub precision: Precision,
    pub means: BTreeMap<String, Tensor>,
}

pub fn zero_precision(params: &[(String, Var)]) -> Result<Precision> {
    params
        .iter()
        .map(|(name, var)| Ok((name.clone(), var.as_tensor().zeros_like()?.detach())))
        .collect()
}

/// Adds the squared gradient of every parameter present in `grads` to `acc`.
pub(crate) fn accumulate_squared_grads(
    acc: &mut Precision,
    params: &[(String, Var)],
    grads: &GradStore,
) -> Result<()> {
    for (name, var) in params {
        if let (Some(grad), Some(slot)) = (grads.get(var.as_tensor()), acc.get_mut(name)) {
            *slot = (&*slot + grad.sqr()?)?;
        }
    }
    Ok(())
}

impl PreservationState {
    pub fn zeros(params: &[(String, Var)]) -> Result<Self> {
        let precision = zero_precision(params)?;
        let means = zero_precision(params)?;
        Ok(Self { precision, means })
    }

    /// `precision = alpha * precision + (1 - alpha) * estimate`, anchors become copies of the
    /// current parameter values.
    pub fn blend(
        &mut self,
        estimate: &Precision,
        params: &[(String, Var)],
        alpha: f32,
    ) -> Result<()> {
        for (name, var) in params {
            let Some(fresh) = estimate.get(name) else {
                continue;
            };
            let blended = match self.precision.get(name) {
                Some(old) => {
                    (old.affine(alpha as f64, 0.)? + fresh.affine(1. - alpha as f64, 0.)?)?
                }
                None => fresh.affine(1. - alpha as f64, 0.)?,
            };
            self.precision.insert(name.clone(), blended.detach());
            self.means
                .insert(name.clone(), var.as_tensor().copy()?.detach());
        }
        Ok(())
    }

    pub fn penalty(&self, params: &[(String, Var)], coeff: f32) -> Result<Option<Tensor>> {
        let mut total: Option<Tensor> = None;
        for (name, var) in params {
            let (Some(precision), Some(mean)) = (self.precision.get(name), self.means.get(name))
            else {
                continue;
            };
            let term = (precision * (var.as_tensor() - mean)?.sqr()?)?.sum_all()?;
            total = Some(match total {
                Some(acc) => (acc + term)?,
                None => term,
            });
        }
        Ok(match total {
            Some(total) => Some(total.affine(coeff as f64, 0.)?),
            None => None,
        })
    }

    pub fn precision_sum(&self) -> Result<f32> {
        precision_sum(&self.precision)
    }
}

pub fn precision_sum(precision: &Precision) -> Result<f32> {
    let mut sum = 0.;
    for tensor in precision.values() {
        sum += tensor.sum_all()?.to_scalar::<f32>()?;
    }
    Ok(sum)
}

/// Most recent observation rows, bounded by `capacity`.
#[derive(Debug, Clone)]
pub struct StateStore {
    rows: VecDeque<Vec<f32>>,
    capacity: usize,
}

impl StateStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, states: &Tensor) -> Result<()> {
        if self.capacity == 0 {
            return Ok(());
        }
        for row in states.to_vec2::<f32>()? {
            if self.rows.len() == self.capacity {
                self.rows.pop_front();
            }
            self.rows.push_back(row);
        }
        Ok(())
    }

    /// The last `n` rows in storage order, shuffled.
    pub fn recent_shuffled(&self, n: usize) -> Vec<Vec<f32>> {
        let skip = self.rows.len().saturating_sub(n);
        let mut rows: Vec<Vec<f32>> = self.rows.iter().skip(skip).cloned().collect();
        RNG.with_borrow_mut(|rng| rows.shuffle(rng));
        rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

/// Precision estimated from the task just finished and the blended precision over all tasks.
#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    pub task_precision: Precision,
    pub global_precision: Precision,
}

#[derive(Debug)]
pub struct Preservation {
    pub strategy: PreservationStrategy,
    pub state: PreservationState,
    pub alpha: f32,
    pub coeff: f32,
    phase: PreservationPhase,
}

impl Preservation {
    /// `alpha` outside `[0, 1]` or a negative `coeff` would let the blended precision or the
    /// penalty turn negative, both are rejected.
    pub fn new(strategy: PreservationStrategy, alpha: f32, coeff: f32) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&alpha),
            "precision blend factor must lie in [0, 1], got {alpha}"
        );
        ensure!(coeff >= 0., "penalty coefficient must be non negative, got {coeff}");
        Ok(Self {
            strategy,
            state: PreservationState::default(),
            alpha,
            coeff,
            phase: PreservationPhase::Idle,
        })
    }

    pub fn baseline() -> Self {
        Self {
            strategy: PreservationStrategy::Baseline,
            state: PreservationState::default(),
            alpha: 0.,
            coeff: 0.,
            phase: PreservationPhase::Idle,
        }
    }

    /// Allocates zeroed precision and anchors for `params`.
    pub fn init(&mut self, params: &[(String, Var)]) -> Result<()> {
        self.state = PreservationState::zeros(params)?;
        Ok(())
    }

    pub fn phase(&self) -> PreservationPhase {
        self.phase
    }

    pub fn begin_task(&mut self, task_idx: usize) {
        self.phase = PreservationPhase::Training(task_idx);
    }

    /// `None` for the baseline, whose precision never leaves zero.
    pub fn penalty(&self, params: &[(String, Var)]) -> Result<Option<Tensor>> {
        if self.strategy == PreservationStrategy::Baseline {
            return Ok(None);
        }
        self.state.penalty(params, self.coeff)
    }

    pub fn consolidate<N: ActorCritic>(
        &mut self,
        driver: &mut RolloutDriver<N>,
        store: &StateStore,
        task_label: Option<&[f32]>,
        batch_size: usize,
    ) -> Result<ConsolidationReport> {
        let task_idx = match self.phase {
            PreservationPhase::Training(idx) | PreservationPhase::Consolidating(idx) => idx,
            PreservationPhase::Idle => 0,
        };
        self.phase = PreservationPhase::Consolidating(task_idx);
        let report = self.run_consolidation(driver, store, task_label, batch_size);
        self.phase = PreservationPhase::Idle;
        let report = report?;
        tracing::info!(
            task = task_idx,
            strategy = ?self.strategy,
            task_precision = precision_sum(&report.task_precision)?,
            global_precision = precision_sum(&report.global_precision)?,
            "consolidated"
        );
        Ok(report)
    }

    fn run_consolidation<N: ActorCritic>(
        &mut self,
        driver: &mut RolloutDriver<N>,
        store: &StateStore,
        task_label: Option<&[f32]>,
        batch_size: usize,
    ) -> Result<ConsolidationReport> {
        let params = driver.network.parameters()?;
        let estimate = match self.strategy {
            PreservationStrategy::Baseline => zero_precision(&params)?,
            PreservationStrategy::Ewc => ewc::estimate(driver, &params, task_label, batch_size)?,
            PreservationStrategy::Scp { n_slices } => scp::estimate(
                &driver.network,
                &params,
                &store.recent_shuffled(CONSOLIDATION_SAMPLE),
                task_label,
                batch_size,
                n_slices,
            )?,
            PreservationStrategy::Mas => mas::estimate(
                &driver.network,
                &params,
                &store.recent_shuffled(CONSOLIDATION_SAMPLE),
                task_label,
                batch_size,
            )?,
        };
        if self.strategy != PreservationStrategy::Baseline {
            self.state.blend(&estimate, &params, self.alpha)?;
        }
        Ok(ConsolidationReport {
            task_precision: estimate,
            global_precision: self.state.precision.clone(),
        })
    }
}

/// Per batch label tensor for state based estimators.
pub(crate) fn batch_label(
    task_label: Option<&[f32]>,
    rows: usize,
    device: &candle_core::Device,
) -> Result<Option<Tensor>> {
    Ok(task_label
        .map(|label| lrl_core::tensors::repeat_label(label, rows, device))
        .transpose()?)
}

/// A direction drawn uniformly from the unit sphere.
pub(crate) fn random_unit_direction(dim: usize) -> Vec<f32> {
    let xi: Vec<f32> =
        RNG.with_borrow_mut(|rng| (0..dim).map(|_| rng.sample(StandardNormal)).collect());
    let norm = xi.iter().map(|x| x * x).sum::<f32>().sqrt();
    xi.into_iter().map(|x| x / norm).collect()
}
