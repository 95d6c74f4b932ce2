use crate::builders::{
    network::{NetworkBuilder, NetworkKind},
    task_pool::TaskPoolBuilder,
};
use anyhow::Result;
use candle_core::Device;
use lrl_agents::{
    Algorithm, Conditioning,
    a2c::A2C,
    agent::ContinualAgent,
    config::AgentConfig,
    driver::RolloutDriver,
    hooks::{AgentHooks, DefaultAgentHooks, LearningSchedule},
    ppo::PPO,
    preservation::PreservationStrategy,
};
use lrl_core::task_pool::TaskPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentType {
    A2C,
    PPO,
}

pub struct AgentBuilder {
    pub device: Device,
    pub agent_type: AgentType,
    pub config: AgentConfig,
    pub strategy: PreservationStrategy,
    pub conditioning: Conditioning,
    pub network_builder: NetworkBuilder,
    pub task_pool_builder: TaskPoolBuilder,
    pub learning_schedule: LearningSchedule,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            agent_type: AgentType::PPO,
            config: AgentConfig::default(),
            strategy: PreservationStrategy::Baseline,
            conditioning: Conditioning::Label,
            network_builder: NetworkBuilder::default(),
            task_pool_builder: TaskPoolBuilder::default(),
            learning_schedule: LearningSchedule::total_step_bound(0),
        }
    }
}

impl AgentBuilder {
    pub fn a2c() -> Self {
        Self {
            agent_type: AgentType::A2C,
            config: AgentConfig {
                rollout_length: 5,
                ..AgentConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn ppo() -> Self {
        Self::default()
    }

    /// Supermask agent: one mask per task over a frozen random network, no penalty.
    pub fn masked_ppo(max_tasks: usize, keep_ratio: f32) -> Self {
        Self {
            conditioning: Conditioning::Mask,
            network_builder: NetworkBuilder::masked(max_tasks, keep_ratio),
            ..Self::default()
        }
    }

    pub fn set_learning_schedule(&mut self, learning_schedule: LearningSchedule) {
        self.learning_schedule = learning_schedule;
    }

    pub fn algorithm(&self) -> Algorithm {
        match self.agent_type {
            AgentType::A2C => Algorithm::A2C(A2C {
                entropy_weight: self.config.entropy_weight,
                value_loss_weight: self.config.value_loss_weight,
            }),
            AgentType::PPO => Algorithm::PPO(PPO {
                clip_range: self.config.ppo_ratio_clip,
                entropy_weight: self.config.entropy_weight,
                optimization_epochs: self.config.optimization_epochs,
                num_mini_batches: self.config.num_mini_batches,
            }),
        }
    }

    pub fn build(&self) -> Result<ContinualAgent<NetworkKind>> {
        let pool = self.task_pool_builder.build()?;
        self.build_with_pool(pool)
    }

    /// Builds the agent around an existing pool, e.g. one of custom tasks.
    pub fn build_with_pool(&self, mut pool: TaskPool) -> Result<ContinualAgent<NetworkKind>> {
        let label_dim = match self.conditioning {
            Conditioning::Label => pool
                .get_all_tasks(self.config.requires_task_label)?
                .first()
                .and_then(|task| task.label.as_ref())
                .map_or(0, Vec::len),
            _ => 0,
        };
        let network = self
            .network_builder
            .build(pool.specs(), label_dim, &self.device)?;
        let driver = RolloutDriver::new(network, pool, self.config.clone())?;
        let hooks: Box<dyn AgentHooks> = Box::new(DefaultAgentHooks::new(self.learning_schedule));
        ContinualAgent::new(
            driver,
            self.algorithm(),
            self.strategy,
            self.conditioning,
            hooks,
        )
    }
}
