use crate::{UpdateStats, preservation::Preservation};
use anyhow::Result;
use candle_core::Tensor;
use lrl_core::{
    advantage::ProcessedRollout,
    batching::Batcher,
    network::{ActorCritic, Mode, Prediction},
    optimizer::OptimizerWithMaxGrad,
    tensors::{EntropyLoss, Logp, LogpDiff, PolicyLoss, ValueLoss, repeat_label},
};
use std::ops::Deref;

/// Proximal policy optimization with a clipped surrogate objective.
#[derive(Debug, Clone)]
pub struct PPO {
    pub clip_range: f32,
    pub entropy_weight: f32,
    pub optimization_epochs: usize,
    pub num_mini_batches: usize,
}

impl PPO {
    /// Losses of one mini batch: the clipped surrogate
    /// `-mean(min(r A, clip(r, 1 - eps, 1 + eps) A)) - entropy_weight * mean(H)` with
    /// `r = exp(logp - logp_old)`, and the value loss `0.5 * mean((R - V)^2)`.
    pub fn losses(
        &self,
        prediction: &Prediction,
        logp_old: &Tensor,
        advantages: &Tensor,
        returns: &Tensor,
    ) -> Result<(PolicyLoss, ValueLoss, EntropyLoss)> {
        let logp = Logp(prediction.log_probs.clone());
        let logp_diff = LogpDiff((logp.deref() - logp_old)?);
        let ratio = logp_diff.exp()?;
        let clip_adv =
            (ratio.clamp(1. - self.clip_range, 1. + self.clip_range)? * advantages)?;
        let entropy = EntropyLoss(prediction.entropy.mean_all()?);
        let policy_loss = PolicyLoss(
            (Tensor::minimum(&(&ratio * advantages)?, &clip_adv)?
                .neg()?
                .mean_all()?
                - entropy.affine(self.entropy_weight as f64, 0.)?)?,
        );
        let value_loss = ValueLoss(
            (returns - &prediction.values)?
                .sqr()?
                .mean_all()?
                .affine(0.5, 0.)?,
        );
        Ok((policy_loss, value_loss, entropy))
    }

    /// Runs `optimization_epochs` sweeps of shuffled mini batches over the rollout. Advantages
    /// are standardized once over the whole rollout. The reported stats are averages over all
    /// mini batch steps.
    pub fn update<N: ActorCritic>(
        &self,
        network: &N,
        optimizer: &mut OptimizerWithMaxGrad,
        processed: &ProcessedRollout,
        task_label: Option<&[f32]>,
        preservation: &Preservation,
    ) -> Result<UpdateStats> {
        let device = network.device().clone();
        let advantages = processed.advantages.standardize()?;
        let logp_old = processed.log_probs.detach();
        let mut batcher = Batcher::new(processed.len(), self.num_mini_batches)?;
        let mut totals = UpdateStats::default();
        let mut steps = 0usize;
        for _ in 0..self.optimization_epochs {
            batcher.shuffle();
            while let Some(batch) = batcher.next_batch() {
                let batch_len = batch.len();
                let idx: Vec<u32> = batch.iter().map(|i| *i as u32).collect();
                let idx = Tensor::from_vec(idx, batch_len, &device)?;
                let observations = processed.observations.index_select(&idx, 0)?;
                let actions = processed.actions.index_select(&idx, 0)?;
                let batch_logp_old = logp_old.index_select(&idx, 0)?;
                let batch_returns = processed.returns.index_select(&idx, 0)?;
                let batch_advantages = advantages.index_select(&idx, 0)?;
                let label = task_label
                    .map(|label| repeat_label(label, batch_len, &device))
                    .transpose()?;

                let prediction =
                    network.predict(&observations, Some(&actions), label.as_ref(), Mode::Train)?;
                let (policy_loss, value_loss, entropy) = self.losses(
                    &prediction,
                    &batch_logp_old,
                    &batch_advantages,
                    &batch_returns,
                )?;
                let mut loss = (policy_loss.deref() + value_loss.deref())?;
                if let Some(penalty) = preservation.penalty(&network.parameters()?)? {
                    totals.penalty += penalty.to_scalar::<f32>()?;
                    loss = (loss + penalty)?;
                }
                totals.grad_norm += optimizer.backward_step(&loss)?;
                totals.policy_loss += policy_loss.to_scalar::<f32>()?;
                totals.value_loss += value_loss.to_scalar::<f32>()?;
                totals.entropy += entropy.to_scalar::<f32>()?;
                steps += 1;
            }
        }
        let steps = steps.max(1) as f32;
        Ok(UpdateStats {
            policy_loss: totals.policy_loss / steps,
            value_loss: totals.value_loss / steps,
            entropy: totals.entropy / steps,
            penalty: totals.penalty / steps,
            grad_norm: totals.grad_norm / steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preservation::tests::LinearPolicy;
    use candle_core::{DType, Device};
    use lrl_core::{
        error::Error,
        tensors::{Advantages, Returns, ValuesPred},
    };

    fn ppo() -> PPO {
        PPO {
            clip_range: 0.2,
            entropy_weight: 0.1,
            optimization_epochs: 2,
            num_mini_batches: 2,
        }
    }

    #[test]
    fn clipped_surrogate_matches_hand_computation() {
        let device = Device::Cpu;
        let prediction = Prediction {
            logits: Tensor::zeros((2, 2), DType::F32, &device).unwrap(),
            actions: Tensor::zeros(2, DType::U32, &device).unwrap(),
            // ratios 1.5 and 0.5 against a zero old log probability
            log_probs: Tensor::new(&[1.5f32.ln(), 0.5f32.ln()], &device).unwrap(),
            entropy: Tensor::new(&[0.4f32, 0.6], &device).unwrap(),
            values: Tensor::new(&[0f32, 1.], &device).unwrap(),
        };
        let logp_old = Tensor::zeros(2, DType::F32, &device).unwrap();
        let advantages = Tensor::new(&[1f32, -1.], &device).unwrap();
        let returns = Tensor::new(&[1f32, 3.], &device).unwrap();
        let (policy_loss, value_loss, entropy) = ppo()
            .losses(&prediction, &logp_old, &advantages, &returns)
            .unwrap();
        // min(1.5, 1.2) = 1.2 and min(-0.5, -0.8) = -0.8, both clipped
        let expected_policy = -(1.2 - 0.8) / 2. - 0.1 * 0.5;
        assert!((policy_loss.to_scalar::<f32>().unwrap() - expected_policy).abs() < 1e-5);
        // 0.5 * mean(1, 4)
        assert!((value_loss.to_scalar::<f32>().unwrap() - 1.25).abs() < 1e-5);
        assert!((entropy.to_scalar::<f32>().unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unclipped_ratio_keeps_the_plain_surrogate() {
        let device = Device::Cpu;
        let prediction = Prediction {
            logits: Tensor::zeros((1, 2), DType::F32, &device).unwrap(),
            actions: Tensor::zeros(1, DType::U32, &device).unwrap(),
            log_probs: Tensor::new(&[1.1f32.ln()], &device).unwrap(),
            entropy: Tensor::zeros(1, DType::F32, &device).unwrap(),
            values: Tensor::new(&[2f32], &device).unwrap(),
        };
        let logp_old = Tensor::zeros(1, DType::F32, &device).unwrap();
        let advantages = Tensor::new(&[2f32], &device).unwrap();
        let returns = Tensor::new(&[2f32], &device).unwrap();
        let (policy_loss, value_loss, _) = ppo()
            .losses(&prediction, &logp_old, &advantages, &returns)
            .unwrap();
        assert!((policy_loss.to_scalar::<f32>().unwrap() + 2.2).abs() < 1e-5);
        assert_eq!(value_loss.to_scalar::<f32>().unwrap(), 0.);
    }

    fn processed(network: &LinearPolicy, advantages: Vec<f32>) -> ProcessedRollout {
        let device = Device::Cpu;
        let observations =
            Tensor::new(&[[1f32, 0.], [0., 1.], [1., 0.], [0., 1.]], &device).unwrap();
        let actions = Tensor::new(&[0u32, 1, 1, 0], &device).unwrap();
        let prediction = network
            .predict(&observations, Some(&actions), None, Mode::Eval)
            .unwrap();
        ProcessedRollout {
            observations,
            actions,
            log_probs: Logp(prediction.log_probs.detach()),
            values: ValuesPred(prediction.values.detach()),
            entropy: prediction.entropy.detach(),
            returns: Returns(Tensor::new(&[1f32, 1., 1., 1.], &device).unwrap()),
            advantages: Advantages(Tensor::new(advantages.as_slice(), &device).unwrap()),
        }
    }

    #[test]
    fn constant_advantages_skip_the_update() {
        let network = LinearPolicy::new(&[[0.5, -0.5], [0.2, 0.1]], &[[0.3], [-0.3]]);
        let mut optimizer =
            OptimizerWithMaxGrad::new(network.trainable_vars().unwrap(), 0.1, Some(0.5)).unwrap();
        let before = network.actor_values();
        let err = ppo()
            .update(
                &network,
                &mut optimizer,
                &processed(&network, vec![2., 2., 2., 2.]),
                None,
                &Preservation::baseline(),
            )
            .unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::NonFiniteGradient));
        assert_eq!(network.actor_values(), before);
    }

    #[test]
    fn update_averages_stats_over_mini_batches() {
        let network = LinearPolicy::new(&[[0.5, -0.5], [0.2, 0.1]], &[[0.3], [-0.3]]);
        let mut optimizer =
            OptimizerWithMaxGrad::new(network.trainable_vars().unwrap(), 0.1, Some(0.5)).unwrap();
        let before = network.actor_values();
        let stats = ppo()
            .update(
                &network,
                &mut optimizer,
                &processed(&network, vec![1., 2., 3., 4.]),
                None,
                &Preservation::baseline(),
            )
            .unwrap();
        for value in [stats.policy_loss, stats.value_loss, stats.entropy, stats.grad_norm] {
            assert!(value.is_finite());
        }
        assert!(stats.grad_norm > 0.);
        assert_eq!(stats.penalty, 0.);
        assert_ne!(network.actor_values(), before);
    }
}
