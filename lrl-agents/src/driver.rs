use crate::{config::AgentConfig, preservation::StateStore};
use anyhow::Result;
use candle_core::Tensor;
use lrl_core::{
    buffer::{EpisodeRewards, Rollout, TrajectoryBuffer, Transition},
    env::TaskInfo,
    network::{ActorCritic, Mode},
    optimizer::OptimizerWithMaxGrad,
    task_pool::TaskPool,
    tensors::{repeat_label, stack_rows},
};

/// Owns the network, its optimizer and the task pool, and turns them into rollouts.
pub struct RolloutDriver<N: ActorCritic> {
    pub network: N,
    pub optimizer: OptimizerWithMaxGrad,
    pub pool: TaskPool,
    pub config: AgentConfig,
    states: Tensor,
    buffer: TrajectoryBuffer,
    total_steps: usize,
}

impl<N: ActorCritic> RolloutDriver<N> {
    pub fn new(network: N, mut pool: TaskPool, config: AgentConfig) -> Result<Self> {
        let optimizer =
            OptimizerWithMaxGrad::new(network.trainable_vars()?, config.lr, config.gradient_clip)?;
        let states = stack_rows(&pool.reset()?, network.device())?;
        let buffer = TrajectoryBuffer::new(config.rollout_length, pool.num_workers());
        Ok(Self {
            network,
            optimizer,
            pool,
            config,
            states,
            buffer,
            total_steps: 0,
        })
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn episode_rewards(&self) -> &EpisodeRewards {
        self.buffer.episode_rewards()
    }

    pub fn reset_pool(&mut self) -> Result<()> {
        let rows = self.pool.reset()?;
        self.states = stack_rows(&rows, self.network.device())?;
        Ok(())
    }

    /// Switches every worker to `task` and restarts their episodes.
    pub fn reset_task(&mut self, task: &TaskInfo) -> Result<()> {
        let rows = self.pool.reset_task(task)?;
        self.states = stack_rows(&rows, self.network.device())?;
        Ok(())
    }

    fn label_tensor(&self, label: Option<&[f32]>) -> Result<Option<Tensor>> {
        Ok(label
            .map(|label| repeat_label(label, self.pool.num_workers(), self.network.device()))
            .transpose()?)
    }

    /// Greedy free actions for the current states, used by evaluation.
    pub fn act(&self, states: &Tensor, label: Option<&[f32]>, mode: Mode) -> Result<Vec<usize>> {
        let label = label
            .map(|label| repeat_label(label, states.dim(0)?, self.network.device()))
            .transpose()?;
        self.network
            .predict(states, None, label.as_ref(), mode)?
            .actions_vec()
    }

    /// Steps every worker `rollout_length` times. With `keep_graph` the recorded log
    /// probabilities, values and entropies stay attached to the network parameters.
    pub fn collect_rollout(
        &mut self,
        label: Option<&[f32]>,
        mode: Mode,
        keep_graph: bool,
        mut store: Option<&mut StateStore>,
    ) -> Result<Rollout> {
        let label = self.label_tensor(label)?;
        let device = self.network.device().clone();
        self.buffer.reset();
        for _ in 0..self.config.rollout_length {
            if let Some(store) = store.as_mut() {
                store.push(&self.states)?;
            }
            let prediction = self
                .network
                .predict(&self.states, None, label.as_ref(), mode)?;
            let snapshots = self.pool.step(&prediction.actions_vec()?)?;
            let rewards = snapshots.iter().map(|s| s.reward).collect();
            let continuations = snapshots.iter().map(|s| s.continuation()).collect();
            let next_rows: Vec<Vec<f32>> = snapshots.into_iter().map(|s| s.state).collect();
            let (log_probs, values, entropy) = if keep_graph {
                (prediction.log_probs, prediction.values, prediction.entropy)
            } else {
                (
                    prediction.log_probs.detach(),
                    prediction.values.detach(),
                    prediction.entropy.detach(),
                )
            };
            let next_states = stack_rows(&next_rows, &device)?;
            self.buffer.append(Transition {
                observations: std::mem::replace(&mut self.states, next_states),
                actions: prediction.actions,
                log_probs,
                values,
                entropy,
                rewards,
                continuations,
            })?;
        }
        let bootstrap = self
            .network
            .predict(&self.states, None, label.as_ref(), mode)?
            .values
            .detach();
        Ok(self.buffer.finalize(bootstrap))
    }

    /// Adds a training rollout to the step counter. Rollouts drawn for consolidation are
    /// never counted.
    pub fn count_steps(&mut self, rollout: &Rollout) {
        self.total_steps += rollout.len() * rollout.num_workers();
    }
}
