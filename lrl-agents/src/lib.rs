pub mod a2c;
pub mod agent;
pub mod config;
pub mod driver;
pub mod hooks;
pub mod ppo;
pub mod preservation;
pub mod task_switch;

use crate::{a2c::A2C, ppo::PPO};

/// The update rule applied to every collected rollout.
#[derive(Debug, Clone)]
pub enum Algorithm {
    A2C(A2C),
    PPO(PPO),
}

impl Algorithm {
    /// A2C back propagates through the rollout itself, PPO re-evaluates stored samples.
    pub fn keeps_rollout_graph(&self) -> bool {
        matches!(self, Self::A2C(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::A2C(_) => "a2c",
            Self::PPO(_) => "ppo",
        }
    }
}

/// How the network is told which task it is solving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conditioning {
    /// No task information at all.
    None,
    /// The task label is concatenated to every observation.
    Label,
    /// A task specific binary mask selects a subnetwork.
    Mask,
}

/// Losses and gradient norm of one update, averaged over mini batches where applicable.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateStats {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub penalty: f32,
    pub grad_norm: f32,
}
