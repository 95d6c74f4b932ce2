use super::{
    ActorCritic, Mode, Prediction, categorical_head, conditioned_input, sequential::Mlp,
    sorted_vars,
};
use crate::network::build_sequential;
use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Module, VarBuilder, VarMap};
use std::fmt::Debug;

/// Separate policy and value MLPs over the observation, optionally concatenated with a task
/// label. Every parameter is trainable.
pub struct CategoricalActorCritic {
    actor: Mlp,
    critic: Mlp,
    varmap: VarMap,
    device: Device,
}

impl CategoricalActorCritic {
    pub fn build(
        state_dim: usize,
        label_dim: usize,
        action_dim: usize,
        hidden: &[usize],
        device: Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let input_dim = state_dim + label_dim;
        let mut actor_layers = hidden.to_vec();
        actor_layers.push(action_dim);
        let mut critic_layers = hidden.to_vec();
        critic_layers.push(1);
        let actor = build_sequential(input_dim, &actor_layers, &vb, "actor")?;
        let critic = build_sequential(input_dim, &critic_layers, &vb, "critic")?;
        Ok(Self {
            actor,
            critic,
            varmap,
            device,
        })
    }
}

impl Debug for CategoricalActorCritic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoricalActorCritic")
            .field("actor", &self.actor)
            .field("critic", &self.critic)
            .field("device", &self.device)
            .finish()
    }
}

impl ActorCritic for CategoricalActorCritic {
    fn predict(
        &self,
        observations: &Tensor,
        actions: Option<&Tensor>,
        task_label: Option<&Tensor>,
        _mode: Mode,
    ) -> Result<Prediction> {
        let input = conditioned_input(observations, task_label)?;
        let logits = self.actor.forward(&input)?;
        let values = self.critic.forward(&input)?.squeeze(1)?;
        let (actions, log_probs, entropy) = categorical_head(&logits, actions)?;
        Ok(Prediction {
            logits,
            actions,
            log_probs,
            entropy,
            values,
        })
    }

    fn parameters(&self) -> Result<Vec<(String, Var)>> {
        sorted_vars(self.varmap.data())
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
