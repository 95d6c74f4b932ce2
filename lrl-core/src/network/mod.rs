mod categorical;
mod masked;
mod sequential;

pub use categorical::CategoricalActorCritic;
pub use masked::{MaskedActorCritic, MaskedLinear};
pub use sequential::{ActivationLayer, Layer, LinearLayer, Mlp, build_sequential};

use crate::rng::RNG;
use anyhow::Result;
use candle_core::{Device, Tensor, Var};
use candle_nn::ops::{log_softmax, softmax};
use derive_more::{Deref, DerefMut};
use rand::distr::{Distribution, weighted::WeightedIndex};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

/// Whether a forward pass belongs to training or to evaluation/inference. Passed explicitly to
/// every prediction instead of toggling network state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Output of one forward pass over a batch of `B` observations.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// `[B, action_dim]`
    pub logits: Tensor,
    /// `[B]`, `u32`
    pub actions: Tensor,
    /// `[B]`
    pub log_probs: Tensor,
    /// `[B]`
    pub entropy: Tensor,
    /// `[B]`
    pub values: Tensor,
}

impl Prediction {
    pub fn actions_vec(&self) -> Result<Vec<usize>> {
        Ok(self
            .actions
            .to_vec1::<u32>()?
            .into_iter()
            .map(|action| action as usize)
            .collect())
    }
}

pub trait ActorCritic {
    /// Samples actions from the policy unless `actions` is given, in which case their log
    /// probabilities are evaluated instead.
    fn predict(
        &self,
        observations: &Tensor,
        actions: Option<&Tensor>,
        task_label: Option<&Tensor>,
        mode: Mode,
    ) -> Result<Prediction>;

    /// Named parameters, sorted by name.
    fn parameters(&self) -> Result<Vec<(String, Var)>>;

    /// The variables the optimizer is allowed to touch.
    fn trainable_vars(&self) -> Result<Vec<Var>> {
        Ok(self
            .parameters()?
            .into_iter()
            .map(|(_, var)| var)
            .collect())
    }

    fn device(&self) -> &Device;

    fn as_masked(&self) -> Option<&dyn MaskedNetwork> {
        None
    }

    fn as_masked_mut(&mut self) -> Option<&mut dyn MaskedNetwork> {
        None
    }
}

/// Binary per layer masks selecting a task specific subnetwork.
#[derive(Debug, Clone, Default, Deref, DerefMut)]
pub struct Mask(pub BTreeMap<String, Tensor>);

pub trait MaskedNetwork {
    fn set_task(&mut self, task_idx: usize) -> Result<()>;

    /// Freezes the current binary mask of the active task.
    fn cache_masks(&mut self) -> Result<()>;

    fn set_num_tasks_learned(&mut self, num_tasks: usize);

    fn num_tasks_learned(&self) -> usize;

    fn get_mask(&self, task_idx: usize) -> Result<Option<Mask>>;

    fn set_mask(&mut self, mask: &Mask, task_idx: usize) -> Result<()>;
}

/// Turns logits into sampled (or given) actions with their log probabilities and the policy
/// entropy.
pub(crate) fn categorical_head(
    logits: &Tensor,
    actions: Option<&Tensor>,
) -> Result<(Tensor, Tensor, Tensor)> {
    let probs = softmax(logits, 1)?;
    let log_probs_all = log_softmax(logits, 1)?;
    let actions = match actions {
        Some(actions) => actions.clone(),
        None => {
            let rows = probs.to_vec2::<f32>()?;
            let sampled = RNG.with_borrow_mut(|rng| {
                rows.iter()
                    .map(|row| Ok(WeightedIndex::new(row)?.sample(rng) as u32))
                    .collect::<Result<Vec<u32>>>()
            })?;
            let batch = sampled.len();
            Tensor::from_vec(sampled, batch, logits.device())?
        }
    };
    let log_probs = log_probs_all
        .gather(&actions.unsqueeze(1)?, 1)?
        .squeeze(1)?;
    let entropy = (probs * log_probs_all)?.sum(1)?.neg()?;
    Ok((actions, log_probs, entropy))
}

/// Observation input, with the task label appended when the network is label conditioned.
pub(crate) fn conditioned_input(
    observations: &Tensor,
    task_label: Option<&Tensor>,
) -> Result<Tensor> {
    Ok(match task_label {
        Some(label) => Tensor::cat(&[observations, label], 1)?,
        None => observations.clone(),
    })
}

pub(crate) fn sorted_vars(vars: &Mutex<HashMap<String, Var>>) -> Result<Vec<(String, Var)>> {
    let vars = vars
        .lock()
        .map_err(|_| anyhow::anyhow!("variable map lock poisoned"))?;
    let mut named: Vec<(String, Var)> = vars
        .iter()
        .map(|(name, var)| (name.clone(), var.clone()))
        .collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(named)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_actions_are_scored_not_resampled() {
        let logits = Tensor::from_vec(vec![0f32, 0., 10., 0.], (2, 2), &Device::Cpu).unwrap();
        let actions = Tensor::from_vec(vec![1u32, 0], 2, &Device::Cpu).unwrap();
        let (out, log_probs, entropy) = categorical_head(&logits, Some(&actions)).unwrap();
        assert_eq!(out.to_vec1::<u32>().unwrap(), vec![1, 0]);
        let log_probs = log_probs.to_vec1::<f32>().unwrap();
        assert!((log_probs[0] - 0.5f32.ln()).abs() < 1e-5);
        assert!(log_probs[1] > -1e-3);
        let entropy = entropy.to_vec1::<f32>().unwrap();
        assert!((entropy[0] - 2f32.ln()).abs() < 1e-5);
        assert!(entropy[1] < 1e-2);
    }

    #[test]
    fn sampling_follows_a_degenerate_distribution() {
        let logits = Tensor::from_vec(vec![-50f32, 50., -50.], (1, 3), &Device::Cpu).unwrap();
        for _ in 0..10 {
            let (actions, _, _) = categorical_head(&logits, None).unwrap();
            assert_eq!(actions.to_vec1::<u32>().unwrap(), vec![1]);
        }
    }
}
