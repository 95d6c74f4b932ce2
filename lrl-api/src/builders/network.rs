use anyhow::Result;
use candle_core::{Device, Tensor, Var};
use lrl_core::{
    env::TaskSpecs,
    network::{
        ActorCritic, CategoricalActorCritic, MaskedActorCritic, MaskedNetwork, Mode, Prediction,
    },
};

pub enum NetworkType {
    /// Dense actor and critic, conditioned on the task label when one is given.
    Categorical,
    /// Frozen random weights with one learned supermask per task.
    Masked { max_tasks: usize, keep_ratio: f32 },
}

pub struct NetworkBuilder {
    pub hidden_layers: Vec<usize>,
    pub network_type: NetworkType,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self {
            hidden_layers: vec![64, 64],
            network_type: NetworkType::Categorical,
        }
    }
}

impl NetworkBuilder {
    pub fn masked(max_tasks: usize, keep_ratio: f32) -> Self {
        Self {
            network_type: NetworkType::Masked {
                max_tasks,
                keep_ratio,
            },
            ..Self::default()
        }
    }

    /// `label_dim` is the width of the task label appended to observations, 0 for none.
    pub fn build(
        &self,
        specs: &TaskSpecs,
        label_dim: usize,
        device: &Device,
    ) -> Result<NetworkKind> {
        match self.network_type {
            NetworkType::Categorical => Ok(NetworkKind::Categorical(CategoricalActorCritic::build(
                specs.state_dim,
                label_dim,
                specs.action_dim,
                &self.hidden_layers,
                device.clone(),
            )?)),
            NetworkType::Masked {
                max_tasks,
                keep_ratio,
            } => Ok(NetworkKind::Masked(MaskedActorCritic::build(
                specs.state_dim,
                specs.action_dim,
                &self.hidden_layers,
                max_tasks,
                keep_ratio,
                device.clone(),
            )?)),
        }
    }
}

pub enum NetworkKind {
    Categorical(CategoricalActorCritic),
    Masked(MaskedActorCritic),
}

impl ActorCritic for NetworkKind {
    fn predict(
        &self,
        observations: &Tensor,
        actions: Option<&Tensor>,
        task_label: Option<&Tensor>,
        mode: Mode,
    ) -> Result<Prediction> {
        match self {
            Self::Categorical(network) => network.predict(observations, actions, task_label, mode),
            Self::Masked(network) => network.predict(observations, actions, task_label, mode),
        }
    }

    fn parameters(&self) -> Result<Vec<(String, Var)>> {
        match self {
            Self::Categorical(network) => network.parameters(),
            Self::Masked(network) => network.parameters(),
        }
    }

    fn trainable_vars(&self) -> Result<Vec<Var>> {
        match self {
            Self::Categorical(network) => network.trainable_vars(),
            Self::Masked(network) => network.trainable_vars(),
        }
    }

    fn device(&self) -> &Device {
        match self {
            Self::Categorical(network) => network.device(),
            Self::Masked(network) => network.device(),
        }
    }

    fn as_masked(&self) -> Option<&dyn MaskedNetwork> {
        match self {
            Self::Categorical(_) => None,
            Self::Masked(network) => Some(network),
        }
    }

    fn as_masked_mut(&mut self) -> Option<&mut dyn MaskedNetwork> {
        match self {
            Self::Categorical(_) => None,
            Self::Masked(network) => Some(network),
        }
    }
}
