use crate::builders::{
    agent::{AgentBuilder, AgentType},
    network::{NetworkBuilder, NetworkKind},
    task_pool::TaskPoolBuilder,
};
use anyhow::Result;
use lrl_agents::{
    Conditioning, agent::ContinualAgent, config::AgentConfig,
    preservation::PreservationStrategy,
};
use lrl_core::{env::TaskInfo, envs::ChainTask, rng};

/// Hyper parameters small enough for a test to finish in a moment.
pub fn small_config() -> AgentConfig {
    AgentConfig {
        rollout_length: 16,
        optimization_epochs: 2,
        num_mini_batches: 4,
        lr: 1e-3,
        cl_n_slices: 4,
        state_memory: 256,
        consolidation_batch_size: 2,
        ..AgentConfig::default()
    }
}

pub fn small_builder(agent_type: AgentType, strategy: PreservationStrategy) -> AgentBuilder {
    AgentBuilder {
        agent_type,
        config: small_config(),
        strategy,
        conditioning: Conditioning::Label,
        network_builder: NetworkBuilder {
            hidden_layers: vec![16],
            ..NetworkBuilder::default()
        },
        task_pool_builder: TaskPoolBuilder {
            num_workers: 2,
            ..TaskPoolBuilder::default()
        },
        ..AgentBuilder::default()
    }
}

pub fn small_agent(
    agent_type: AgentType,
    strategy: PreservationStrategy,
) -> Result<ContinualAgent<NetworkKind>> {
    rng::seed(7);
    small_builder(agent_type, strategy).build()
}

pub fn small_masked_agent() -> Result<ContinualAgent<NetworkKind>> {
    rng::seed(7);
    let mut builder = small_builder(AgentType::PPO, PreservationStrategy::Baseline);
    builder.conditioning = Conditioning::Mask;
    builder.network_builder = NetworkBuilder {
        hidden_layers: vec![16],
        ..NetworkBuilder::masked(4, 0.5)
    };
    builder.build()
}

/// Both chain tasks with their one-hot labels.
pub fn chain_tasks() -> Vec<TaskInfo> {
    ChainTask::tasks()
}

pub fn assert_finite(value: f32) {
    assert!(value.is_finite(), "expected a finite value, got {value}");
}
