use crate::{UpdateStats, preservation::Preservation};
use anyhow::Result;
use candle_core::Tensor;
use lrl_core::{
    advantage::ProcessedRollout,
    network::ActorCritic,
    optimizer::OptimizerWithMaxGrad,
    tensors::{EntropyLoss, PolicyLoss, ValueLoss},
};

/// Synchronous advantage actor critic: one full batch step per rollout, gradients flow
/// through the predictions recorded while acting.
#[derive(Debug, Clone)]
pub struct A2C {
    pub entropy_weight: f32,
    pub value_loss_weight: f32,
}

impl A2C {
    pub fn losses(
        &self,
        processed: &ProcessedRollout,
    ) -> Result<(PolicyLoss, ValueLoss, EntropyLoss)> {
        let policy_loss = (processed.log_probs.neg()? * &*processed.advantages)?;
        let value_loss = (&*processed.returns - &*processed.values)?
            .sqr()?
            .affine(0.5, 0.)?;
        let entropy_loss = processed.entropy.mean_all()?;
        Ok((
            PolicyLoss(policy_loss.mean_all()?),
            ValueLoss(value_loss.mean_all()?),
            EntropyLoss(entropy_loss),
        ))
    }

    /// `mean(policy - entropy_weight * entropy + value_weight * value)`, no penalty.
    pub fn objective(&self, processed: &ProcessedRollout) -> Result<Tensor> {
        let (policy_loss, value_loss, entropy_loss) = self.losses(processed)?;
        Ok(self.combine(&policy_loss, &value_loss, &entropy_loss)?)
    }

    fn combine(
        &self,
        policy_loss: &PolicyLoss,
        value_loss: &ValueLoss,
        entropy_loss: &EntropyLoss,
    ) -> candle_core::Result<Tensor> {
        let entropy_term = entropy_loss.affine(self.entropy_weight as f64, 0.)?;
        let value_term = value_loss.affine(self.value_loss_weight as f64, 0.)?;
        (&**policy_loss - entropy_term)? + value_term
    }

    pub fn update<N: ActorCritic>(
        &self,
        network: &N,
        optimizer: &mut OptimizerWithMaxGrad,
        processed: &ProcessedRollout,
        preservation: &Preservation,
    ) -> Result<UpdateStats> {
        let (policy_loss, value_loss, entropy_loss) = self.losses(processed)?;
        let mut loss = self.combine(&policy_loss, &value_loss, &entropy_loss)?;
        let mut penalty_value = 0.;
        if let Some(penalty) = preservation.penalty(&network.parameters()?)? {
            penalty_value = penalty.to_scalar::<f32>()?;
            loss = (loss + penalty)?;
        }
        let grad_norm = optimizer.backward_step(&loss)?;
        Ok(UpdateStats {
            policy_loss: policy_loss.to_scalar::<f32>()?,
            value_loss: value_loss.to_scalar::<f32>()?,
            entropy: entropy_loss.to_scalar::<f32>()?,
            penalty: penalty_value,
            grad_norm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};
    use lrl_core::tensors::{Advantages, Logp, Returns, ValuesPred};

    fn processed(log_probs: &Var, values: &Var) -> ProcessedRollout {
        let device = Device::Cpu;
        ProcessedRollout {
            observations: Tensor::zeros((2, 1), DType::F32, &device).unwrap(),
            actions: Tensor::zeros(2, DType::U32, &device).unwrap(),
            log_probs: Logp(log_probs.as_tensor().clone()),
            values: ValuesPred(values.as_tensor().clone()),
            entropy: Tensor::new(&[0.5f32, 1.5], &device).unwrap(),
            returns: Returns(Tensor::new(&[1f32, 3.], &device).unwrap()),
            advantages: Advantages(Tensor::new(&[2f32, -1.], &device).unwrap()),
        }
    }

    #[test]
    fn objective_matches_hand_computation() {
        let log_probs = Var::new(&[-1f32, -2.], &Device::Cpu).unwrap();
        let values = Var::new(&[0f32, 1.], &Device::Cpu).unwrap();
        let a2c = A2C {
            entropy_weight: 0.1,
            value_loss_weight: 0.5,
        };
        let objective = a2c
            .objective(&processed(&log_probs, &values))
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        // policy: mean(2, -2) = 0, value: mean(0.5, 2) = 1.25, entropy: 1
        let expected = 0. - 0.1 * 1. + 0.5 * 1.25;
        assert!((objective - expected).abs() < 1e-5);
    }

    #[test]
    fn update_reports_losses_and_moves_parameters() {
        let log_probs = Var::new(&[-1f32, -2.], &Device::Cpu).unwrap();
        let values = Var::new(&[0f32, 1.], &Device::Cpu).unwrap();
        let a2c = A2C {
            entropy_weight: 0.,
            value_loss_weight: 1.,
        };
        let mut optimizer =
            OptimizerWithMaxGrad::new(vec![log_probs.clone(), values.clone()], 0.1, None).unwrap();
        let network = crate::preservation::tests::FixedParams::new(vec![]);
        let stats = a2c
            .update(
                &network,
                &mut optimizer,
                &processed(&log_probs, &values),
                &Preservation::baseline(),
            )
            .unwrap();
        assert!((stats.value_loss - 1.25).abs() < 1e-5);
        assert_eq!(stats.penalty, 0.);
        assert!(stats.grad_norm > 0.);
        // value estimates move toward the returns
        let moved = values.as_tensor().to_vec1::<f32>().unwrap();
        assert!(moved[0] > 0. && moved[1] > 1.);
    }
}
