use crate::{
    buffer::Rollout,
    tensors::{Advantages, Logp, Returns, ValuesPred},
};
use anyhow::{Result, ensure};
use candle_core::Tensor;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdvantageMode {
    DiscountedReturn,
    Gae { tau: f32 },
}

impl AdvantageMode {
    pub fn from_config(use_gae: bool, gae_tau: f32) -> Self {
        if use_gae {
            Self::Gae { tau: gae_tau }
        } else {
            Self::DiscountedReturn
        }
    }
}

/// Backward pass over a rollout, all inputs indexed `[step][worker]`. `values` carries one
/// more entry than `rewards`, the last one being the bootstrap value. Returns
/// `(returns, advantages)` with one entry per step.
pub fn returns_and_advantages(
    rewards: &[Vec<f32>],
    continuations: &[Vec<f32>],
    values: &[Vec<f32>],
    discount: f32,
    mode: AdvantageMode,
) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let steps = rewards.len();
    assert_eq!(values.len(), steps + 1, "values must include the bootstrap entry");
    let workers = values[steps].len();
    let mut returns = vec![vec![0.; workers]; steps];
    let mut advantages = vec![vec![0.; workers]; steps];
    let mut next_return = values[steps].clone();
    let mut next_advantage = vec![0.; workers];
    for i in (0..steps).rev() {
        for w in 0..workers {
            let carry = discount * continuations[i][w];
            next_return[w] = rewards[i][w] + carry * next_return[w];
            next_advantage[w] = match mode {
                AdvantageMode::DiscountedReturn => next_return[w] - values[i][w],
                AdvantageMode::Gae { tau } => {
                    let td = rewards[i][w] + carry * values[i + 1][w] - values[i][w];
                    next_advantage[w] * tau * carry + td
                }
            };
        }
        returns[i].copy_from_slice(&next_return);
        advantages[i].copy_from_slice(&next_advantage);
    }
    (returns, advantages)
}

/// A rollout flattened step major, `index = step * num_workers + worker`. `log_probs`,
/// `values` and `entropy` keep whatever graph they were recorded with.
#[derive(Debug, Clone)]
pub struct ProcessedRollout {
    pub observations: Tensor,
    pub actions: Tensor,
    pub log_probs: Logp,
    pub values: ValuesPred,
    pub entropy: Tensor,
    pub returns: Returns,
    pub advantages: Advantages,
}

impl ProcessedRollout {
    pub fn len(&self) -> usize {
        self.returns.dims1().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn process_rollout(
    rollout: &Rollout,
    discount: f32,
    mode: AdvantageMode,
) -> Result<ProcessedRollout> {
    ensure!(!rollout.is_empty(), "cannot process an empty rollout");
    let transitions = &rollout.transitions;
    let rewards: Vec<Vec<f32>> = transitions.iter().map(|t| t.rewards.clone()).collect();
    let continuations: Vec<Vec<f32>> = transitions
        .iter()
        .map(|t| t.continuations.clone())
        .collect();
    let mut values = transitions
        .iter()
        .map(|t| t.values.detach().to_vec1::<f32>())
        .collect::<candle_core::Result<Vec<_>>>()?;
    values.push(rollout.bootstrap_values.detach().to_vec1::<f32>()?);
    let (returns, advantages) =
        returns_and_advantages(&rewards, &continuations, &values, discount, mode);

    let device = rollout.bootstrap_values.device();
    let flat_len = rewards.len() * rollout.num_workers();
    let returns = Tensor::from_vec(returns.concat(), flat_len, device)?;
    let advantages = Tensor::from_vec(advantages.concat(), flat_len, device)?;
    let cat = |select: fn(&crate::buffer::Transition) -> &Tensor| {
        let parts: Vec<&Tensor> = transitions.iter().map(select).collect();
        Tensor::cat(&parts, 0)
    };
    Ok(ProcessedRollout {
        observations: cat(|t| &t.observations)?,
        actions: cat(|t| &t.actions)?,
        log_probs: Logp(cat(|t| &t.log_probs)?),
        values: ValuesPred(cat(|t| &t.values)?),
        entropy: cat(|t| &t.entropy)?,
        returns: Returns(returns),
        advantages: Advantages(advantages),
    })
}

impl Advantages {
    /// `(a - mean) / std` with the unbiased standard deviation. Needs at least two distinct
    /// values, a constant or single entry input yields non finite advantages.
    pub fn standardize(&self) -> Result<Self> {
        let values = self.to_vec1::<f32>()?;
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / (n - 1.);
        let std = variance.sqrt();
        let standardized: Vec<f32> = values.iter().map(|x| (x - mean) / std).collect();
        Ok(Advantages(Tensor::from_vec(
            standardized,
            values.len(),
            self.device(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Transition;
    use candle_core::{DType, Device};

    fn approx(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn undiscounted_returns_are_suffix_sums() {
        let rewards = vec![vec![1.], vec![2.], vec![3.]];
        let continuations = vec![vec![1.]; 3];
        let values = vec![vec![0.5], vec![0.25], vec![1.], vec![10.]];
        let (returns, advantages) = returns_and_advantages(
            &rewards,
            &continuations,
            &values,
            1.,
            AdvantageMode::DiscountedReturn,
        );
        approx(&returns.concat(), &[16., 15., 13.]);
        approx(&advantages.concat(), &[15.5, 14.75, 12.]);
    }

    #[test]
    fn gae_with_zero_tau_is_td_error() {
        let rewards = vec![vec![1., 0.], vec![0., 2.]];
        let continuations = vec![vec![1., 1.], vec![1., 1.]];
        let values = vec![vec![0.5, 1.], vec![2., 3.], vec![4., 5.]];
        let discount = 0.9;
        let (_, advantages) = returns_and_advantages(
            &rewards,
            &continuations,
            &values,
            discount,
            AdvantageMode::Gae { tau: 0. },
        );
        for i in 0..2 {
            for w in 0..2 {
                let td = rewards[i][w] + discount * values[i + 1][w] - values[i][w];
                assert!((advantages[i][w] - td).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn terminal_step_isolates_the_future() {
        let rewards = vec![vec![1.], vec![5.], vec![7.]];
        let continuations = vec![vec![1.], vec![0.], vec![1.]];
        let values = vec![vec![0.], vec![0.], vec![100.], vec![1000.]];
        for mode in [AdvantageMode::DiscountedReturn, AdvantageMode::Gae { tau: 0.95 }] {
            let (returns, advantages) =
                returns_and_advantages(&rewards, &continuations, &values, 0.99, mode);
            assert_eq!(returns[1], vec![5.]);
            assert_eq!(advantages[1], vec![5.]);
        }
    }

    #[test]
    fn process_rollout_flattens_step_major() {
        let device = Device::Cpu;
        let transition = |rewards: Vec<f32>| Transition {
            observations: Tensor::zeros((2, 3), DType::F32, &device).unwrap(),
            actions: Tensor::zeros(2, DType::U32, &device).unwrap(),
            log_probs: Tensor::zeros(2, DType::F32, &device).unwrap(),
            values: Tensor::zeros(2, DType::F32, &device).unwrap(),
            entropy: Tensor::zeros(2, DType::F32, &device).unwrap(),
            rewards,
            continuations: vec![1., 1.],
        };
        let rollout = Rollout {
            transitions: vec![transition(vec![1., 2.]), transition(vec![3., 4.])],
            bootstrap_values: Tensor::zeros(2, DType::F32, &device).unwrap(),
        };
        let processed = process_rollout(&rollout, 1., AdvantageMode::DiscountedReturn).unwrap();
        assert_eq!(processed.len(), 4);
        assert_eq!(processed.observations.dims(), &[4, 3]);
        approx(&processed.returns.to_vec1::<f32>().unwrap(), &[4., 6., 3., 4.]);
    }

    #[test]
    fn standardize_uses_unbiased_std() {
        let advantages =
            Advantages(Tensor::from_vec(vec![1f32, 2., 3.], 3, &Device::Cpu).unwrap());
        let standardized = advantages.standardize().unwrap();
        approx(&standardized.to_vec1::<f32>().unwrap(), &[-1., 0., 1.]);
    }

    #[test]
    fn standardize_of_constant_input_is_not_finite() {
        let advantages = Advantages(Tensor::from_vec(vec![2f32; 4], 4, &Device::Cpu).unwrap());
        let standardized = advantages.standardize().unwrap().to_vec1::<f32>().unwrap();
        assert!(standardized.iter().all(|x| !x.is_finite()));
    }
}
