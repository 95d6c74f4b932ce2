use crate::{
    Algorithm, Conditioning, UpdateStats,
    driver::RolloutDriver,
    hooks::{AgentHooks, RolloutSummary},
    preservation::{ConsolidationReport, Preservation, PreservationStrategy, StateStore},
    task_switch::{TaskEnd, TaskStart, TaskSwitchController, select_mask},
};
use anyhow::{Result, bail};
use candle_core::Tensor;
use lrl_core::{
    advantage::process_rollout,
    buffer::Rollout,
    error::Error,
    network::{ActorCritic, Mask, MaskedNetwork, Mode},
};

macro_rules! break_on_hook_res {
    ($hook_res:expr) => {
        if $hook_res {
            break;
        }
    };
}

/// Anything that can answer a mask request for a task label.
pub trait MaskPeer {
    fn ping_response(&self, label: &[f32]) -> Result<Option<Mask>>;
}

/// An on-policy agent that learns a sequence of tasks. The update rule, the preservation
/// strategy and the way the network is conditioned on the task are all configuration.
pub struct ContinualAgent<N: ActorCritic> {
    pub driver: RolloutDriver<N>,
    pub algorithm: Algorithm,
    pub preservation: Preservation,
    pub controller: TaskSwitchController,
    pub conditioning: Conditioning,
    pub state_store: StateStore,
    pub hooks: Box<dyn AgentHooks>,
    iteration: usize,
}

impl<N: ActorCritic> ContinualAgent<N> {
    pub fn new(
        driver: RolloutDriver<N>,
        algorithm: Algorithm,
        strategy: PreservationStrategy,
        conditioning: Conditioning,
        hooks: Box<dyn AgentHooks>,
    ) -> Result<Self> {
        if conditioning == Conditioning::Mask && driver.network.as_masked().is_none() {
            bail!(Error::Unsupported("mask conditioning needs a masked network"));
        }
        let config = &driver.config;
        let mut preservation =
            Preservation::new(strategy, config.cl_alpha, config.cl_loss_coeff)?;
        preservation.init(&driver.network.parameters()?)?;
        let state_store = StateStore::new(config.state_memory);
        Ok(Self {
            driver,
            algorithm,
            preservation,
            controller: TaskSwitchController::default(),
            conditioning,
            state_store,
            hooks,
            iteration: 0,
        })
    }

    pub fn network(&self) -> &N {
        &self.driver.network
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration
    }

    fn masked_mut(&mut self) -> Result<&mut dyn MaskedNetwork> {
        self.driver
            .network
            .as_masked_mut()
            .ok_or_else(|| Error::Unsupported("network has no masks").into())
    }

    /// The label fed to a label conditioned network during training: the current training
    /// task's label, or the label of the pool's task if no task was started explicitly.
    fn train_label(&mut self) -> Result<Option<Vec<f32>>> {
        if self.conditioning != Conditioning::Label {
            return Ok(None);
        }
        let label = match self.controller.train_label() {
            Some(label) => Some(label.to_vec()),
            None => self.driver.pool.get_task()?.label,
        };
        match label {
            Some(label) => Ok(Some(label)),
            None => bail!("label conditioned agent is running a task without a label"),
        }
    }

    pub fn collect(&mut self) -> Result<Rollout> {
        let label = self.train_label()?;
        let store = if self.preservation.strategy.uses_state_store() {
            Some(&mut self.state_store)
        } else {
            None
        };
        let rollout = self.driver.collect_rollout(
            label.as_deref(),
            Mode::Train,
            self.algorithm.keeps_rollout_graph(),
            store,
        )?;
        self.driver.count_steps(&rollout);
        Ok(rollout)
    }

    pub fn learn(&mut self, rollout: &Rollout) -> Result<UpdateStats> {
        let label = self.train_label()?;
        let config = &self.driver.config;
        let processed = process_rollout(rollout, config.discount, config.advantage_mode())?;
        let driver = &mut self.driver;
        let stats = match &self.algorithm {
            Algorithm::A2C(a2c) => a2c.update(
                &driver.network,
                &mut driver.optimizer,
                &processed,
                &self.preservation,
            )?,
            Algorithm::PPO(ppo) => ppo.update(
                &driver.network,
                &mut driver.optimizer,
                &processed,
                label.as_deref(),
                &self.preservation,
            )?,
        };
        self.iteration += 1;
        tracing::debug!(
            iteration = self.iteration,
            algorithm = self.algorithm.name(),
            steps = self.driver.total_steps(),
            policy_loss = stats.policy_loss,
            value_loss = stats.value_loss,
            grad_norm = stats.grad_norm,
            "iteration"
        );
        Ok(stats)
    }

    /// One rollout followed by one update.
    pub fn iteration(&mut self) -> Result<UpdateStats> {
        let rollout = self.collect()?;
        self.learn(&rollout)
    }

    pub fn summary(&self, rollout: &Rollout) -> RolloutSummary {
        let episode_rewards = self.driver.episode_rewards();
        RolloutSummary {
            iteration: self.iteration,
            steps: rollout.len() * rollout.num_workers(),
            total_steps: self.driver.total_steps(),
            completed_episodes: rollout
                .transitions
                .iter()
                .flat_map(|t| t.continuations.iter())
                .filter(|c| **c == 0.)
                .count(),
            rollout_reward: rollout
                .transitions
                .iter()
                .flat_map(|t| t.rewards.iter())
                .sum(),
            mean_last_episode_reward: episode_rewards.mean_last_completed(),
        }
    }

    /// Alternates rollouts and updates until a hook asks to stop.
    pub fn train(&mut self) -> Result<()> {
        if self.hooks.init_hook() {
            return Ok(());
        }
        loop {
            let rollout = self.collect()?;
            let summary = self.summary(&rollout);
            break_on_hook_res!(self.hooks.post_rollout_hook(&summary));
            let stats = self.learn(&rollout)?;
            break_on_hook_res!(self.hooks.post_training_hook(&stats));
        }
        Ok(())
    }

    fn apply_start(&mut self, start: TaskStart) -> Result<()> {
        if self.conditioning == Conditioning::Mask {
            self.masked_mut()?.set_task(start.task_idx)?;
        }
        self.preservation.begin_task(start.task_idx);
        Ok(())
    }

    fn apply_end(
        &mut self,
        end: TaskEnd,
        label: Option<Vec<f32>>,
    ) -> Result<Option<ConsolidationReport>> {
        if self.conditioning == Conditioning::Mask {
            let masked = self.masked_mut()?;
            masked.cache_masks()?;
            if end.new_task {
                masked.set_num_tasks_learned(end.num_seen);
            }
            return Ok(None);
        }
        let label = if self.conditioning == Conditioning::Label {
            label
        } else {
            None
        };
        self.consolidate(label.as_deref()).map(Some)
    }

    pub fn task_train_start(&mut self, label: &[f32]) -> Result<TaskStart> {
        let start = self.controller.task_train_start(label);
        self.apply_start(start)?;
        Ok(start)
    }

    /// Closes the current task: mask agents freeze its mask, the others consolidate.
    pub fn task_train_end(&mut self) -> Result<Option<ConsolidationReport>> {
        let label = self.controller.train_label().map(<[f32]>::to_vec);
        match self.controller.task_train_end() {
            Some(end) => self.apply_end(end, label),
            None => Ok(None),
        }
    }

    pub fn consolidate(&mut self, label: Option<&[f32]>) -> Result<ConsolidationReport> {
        let batch_size = self.driver.config.consolidation_batch_size;
        self.preservation
            .consolidate(&mut self.driver, &self.state_store, label, batch_size)
    }

    pub fn task_eval_start(&mut self, label: &[f32]) -> Result<()> {
        let task_idx = self.controller.task_eval_start(label);
        if self.conditioning == Conditioning::Mask {
            self.masked_mut()?.set_task(task_idx)?;
        }
        Ok(())
    }

    pub fn task_eval_start_by_name(&mut self, name: &str) -> Result<()> {
        let task_idx = self.controller.task_eval_start_by_name(name);
        if self.conditioning == Conditioning::Mask {
            self.masked_mut()?.set_task(task_idx)?;
        }
        Ok(())
    }

    pub fn task_eval_end(&mut self) -> Result<()> {
        let resume = self.controller.task_eval_end();
        if let (Conditioning::Mask, Some(task_idx)) = (self.conditioning, resume) {
            self.masked_mut()?.set_task(task_idx)?;
        }
        Ok(())
    }

    /// Sampled actions under [`Mode::Eval`] for the evaluation task set by `task_eval_start`.
    pub fn eval_actions(&self, states: &Tensor) -> Result<Vec<usize>> {
        let label = match self.conditioning {
            Conditioning::Label => self.controller.eval_label(),
            _ => None,
        };
        self.driver.act(states, label, Mode::Eval)
    }

    pub fn set_first_task(&mut self, label: &[f32], name: &str) -> Result<TaskStart> {
        let start = self.controller.set_first_task(label, name);
        self.apply_start(start)?;
        Ok(start)
    }

    pub fn task_change_detected(
        &mut self,
        label: &[f32],
        name: &str,
    ) -> Result<(Option<ConsolidationReport>, TaskStart)> {
        let previous_label = self.controller.train_label().map(<[f32]>::to_vec);
        let (end, start) = self.controller.task_change_detected(label, name);
        let report = match end {
            Some(end) => self.apply_end(end, previous_label)?,
            None => None,
        };
        self.apply_start(start)?;
        Ok((report, start))
    }

    pub fn update_task_label(&mut self, label: &[f32]) {
        self.controller.update_task_label(label);
    }

    /// Asks `peers` in order for a mask for the current task and adopts the first one
    /// offered. Returns whether a mask was adopted.
    pub fn ping_agents(&mut self, peers: &[&dyn MaskPeer]) -> Result<bool> {
        let label = match self.controller.train_label() {
            Some(label) => Some(label.to_vec()),
            None => self.driver.pool.get_task()?.label,
        };
        let Some(label) = label else {
            return Ok(false);
        };
        let answers = peers
            .iter()
            .map(|peer| peer.ping_response(&label))
            .collect::<Result<Vec<_>>>()?;
        let Some(mask) = select_mask(answers, false)? else {
            return Ok(false);
        };
        let task_idx = self.controller.ensure_registered(&label);
        self.masked_mut()?.set_mask(&mask, task_idx)?;
        tracing::info!(task = task_idx, "adopted mask from peer");
        Ok(true)
    }

    /// Merging masks received over a distributed channel is not available.
    pub fn infuse_masks(&mut self, _masks: Vec<Mask>) -> Result<()> {
        Err(Error::Unsupported("infuse_masks").into())
    }
}

impl<N: ActorCritic> MaskPeer for ContinualAgent<N> {
    fn ping_response(&self, label: &[f32]) -> Result<Option<Mask>> {
        let Some(task_idx) = self.controller.resolve(label) else {
            return Ok(None);
        };
        match self.driver.network.as_masked() {
            Some(masked) => masked.get_mask(task_idx),
            None => Ok(None),
        }
    }
}
