use crate::UpdateStats;

#[derive(Debug, Clone, Copy)]
pub enum LearningSchedule {
    RolloutBound {
        total_rollouts: usize,
        current_rollout: usize,
    },
    TotalStepBound {
        total_steps: usize,
        current_step: usize,
    },
}

impl LearningSchedule {
    pub fn total_step_bound(total_steps: usize) -> Self {
        Self::TotalStepBound {
            total_steps,
            current_step: 0,
        }
    }

    pub fn rollout_bound(total_rollouts: usize) -> Self {
        Self::RolloutBound {
            total_rollouts,
            current_rollout: 0,
        }
    }

    /// Records one rollout of `steps` environment steps, true once the schedule is exhausted.
    pub fn advance(&mut self, steps: usize) -> bool {
        match self {
            Self::RolloutBound {
                total_rollouts,
                current_rollout,
            } => {
                *current_rollout += 1;
                current_rollout >= total_rollouts
            }
            Self::TotalStepBound {
                total_steps,
                current_step,
            } => {
                *current_step += steps;
                current_step >= total_steps
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RolloutSummary {
    pub iteration: usize,
    pub steps: usize,
    pub total_steps: usize,
    pub completed_episodes: usize,
    pub rollout_reward: f32,
    pub mean_last_episode_reward: f32,
}

/// Callbacks around the training loop. Returning `true` stops training.
pub trait AgentHooks {
    fn init_hook(&mut self) -> bool {
        false
    }

    fn post_rollout_hook(&mut self, summary: &RolloutSummary) -> bool;

    fn post_training_hook(&mut self, _stats: &UpdateStats) -> bool {
        false
    }
}

pub struct DefaultAgentHooks {
    learning_schedule: LearningSchedule,
}

impl DefaultAgentHooks {
    pub fn new(learning_schedule: LearningSchedule) -> Self {
        Self { learning_schedule }
    }
}

impl AgentHooks for DefaultAgentHooks {
    fn post_rollout_hook(&mut self, summary: &RolloutSummary) -> bool {
        tracing::info!(
            "rollout: {:<3} episodes: {:<5} total reward: {:<5.2} last episode reward: {:.2}",
            summary.iteration,
            summary.completed_episodes,
            summary.rollout_reward,
            summary.mean_last_episode_reward
        );
        self.learning_schedule.advance(summary.steps)
    }

    fn post_training_hook(&mut self, stats: &UpdateStats) -> bool {
        tracing::debug!(
            policy_loss = stats.policy_loss,
            value_loss = stats.value_loss,
            entropy = stats.entropy,
            penalty = stats.penalty,
            grad_norm = stats.grad_norm,
            "update"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules_stop_at_their_bound() {
        let mut rollouts = LearningSchedule::rollout_bound(2);
        assert!(!rollouts.advance(100));
        assert!(rollouts.advance(100));
        let mut steps = LearningSchedule::total_step_bound(250);
        assert!(!steps.advance(128));
        assert!(steps.advance(128));
    }
}
