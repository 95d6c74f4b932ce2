use crate::error::Error;
use anyhow::Result;
use candle_core::Tensor;

/// One environment step across all workers. Tensors have leading dimension `num_workers`.
#[derive(Debug, Clone)]
pub struct Transition {
    pub observations: Tensor,
    pub actions: Tensor,
    pub log_probs: Tensor,
    pub values: Tensor,
    pub entropy: Tensor,
    pub rewards: Vec<f32>,
    pub continuations: Vec<f32>,
}

/// A finished rollout window: `transitions.len()` steps plus the value estimate of the state
/// right after the window.
#[derive(Debug, Clone)]
pub struct Rollout {
    pub transitions: Vec<Transition>,
    pub bootstrap_values: Tensor,
}

impl Rollout {
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn num_workers(&self) -> usize {
        self.transitions
            .first()
            .map_or(0, |transition| transition.rewards.len())
    }
}

/// Per worker running episode reward. When a worker's episode ends the running sum moves to
/// the last completed slot and restarts from zero on the same step.
#[derive(Debug, Clone, Default)]
pub struct EpisodeRewards {
    running: Vec<f32>,
    last_completed: Vec<f32>,
    completed_episodes: usize,
}

impl EpisodeRewards {
    pub fn new(num_workers: usize) -> Self {
        Self {
            running: vec![0.; num_workers],
            last_completed: vec![0.; num_workers],
            completed_episodes: 0,
        }
    }

    pub fn record(&mut self, rewards: &[f32], continuations: &[f32]) {
        for (worker, (reward, continuation)) in rewards.iter().zip(continuations).enumerate() {
            self.running[worker] += reward;
            if *continuation == 0. {
                tracing::trace!(worker, reward = self.running[worker], "episode finished");
                self.last_completed[worker] = self.running[worker];
                self.running[worker] = 0.;
                self.completed_episodes += 1;
            }
        }
    }

    pub fn running(&self) -> &[f32] {
        &self.running
    }

    pub fn last_completed(&self) -> &[f32] {
        &self.last_completed
    }

    pub fn completed_episodes(&self) -> usize {
        self.completed_episodes
    }

    pub fn mean_last_completed(&self) -> f32 {
        if self.last_completed.is_empty() {
            return 0.;
        }
        self.last_completed.iter().sum::<f32>() / self.last_completed.len() as f32
    }
}

/// Fixed capacity storage for one rollout window.
#[derive(Debug)]
pub struct TrajectoryBuffer {
    capacity: usize,
    transitions: Vec<Transition>,
    episode_rewards: EpisodeRewards,
}

impl TrajectoryBuffer {
    pub fn new(capacity: usize, num_workers: usize) -> Self {
        Self {
            capacity,
            transitions: Vec::with_capacity(capacity),
            episode_rewards: EpisodeRewards::new(num_workers),
        }
    }

    /// Starts a new window. The episode reward accumulator carries over between windows.
    pub fn reset(&mut self) {
        self.transitions.clear();
    }

    pub fn append(&mut self, transition: Transition) -> Result<()> {
        if self.transitions.len() >= self.capacity {
            return Err(Error::BufferFull {
                capacity: self.capacity,
            }
            .into());
        }
        self.episode_rewards
            .record(&transition.rewards, &transition.continuations);
        self.transitions.push(transition);
        Ok(())
    }

    pub fn finalize(&mut self, bootstrap_values: Tensor) -> Rollout {
        Rollout {
            transitions: std::mem::take(&mut self.transitions),
            bootstrap_values,
        }
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn episode_rewards(&self) -> &EpisodeRewards {
        &self.episode_rewards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn transition(rewards: Vec<f32>, continuations: Vec<f32>) -> Transition {
        let device = Device::Cpu;
        let workers = rewards.len();
        let zeros = Tensor::zeros(workers, candle_core::DType::F32, &device).unwrap();
        Transition {
            observations: Tensor::zeros((workers, 2), candle_core::DType::F32, &device).unwrap(),
            actions: Tensor::zeros(workers, candle_core::DType::U32, &device).unwrap(),
            log_probs: zeros.clone(),
            values: zeros.clone(),
            entropy: zeros,
            rewards,
            continuations,
        }
    }

    #[test]
    fn reward_accumulator_moves_sums_on_termination() {
        // per worker sequences over three steps
        let rewards = [[1., 0., 2.], [1., 5., 0.], [1., 0., 3.]];
        let terminals = [
            [false, false, true],
            [false, true, false],
            [true, false, false],
        ];
        let mut accumulator = EpisodeRewards::new(3);
        for step in 0..3 {
            let step_rewards: Vec<f32> = (0..3).map(|w| rewards[w][step]).collect();
            let continuations: Vec<f32> = (0..3)
                .map(|w| if terminals[w][step] { 0. } else { 1. })
                .collect();
            accumulator.record(&step_rewards, &continuations);
        }
        assert_eq!(accumulator.last_completed(), &[3., 6., 1.]);
        assert_eq!(accumulator.running(), &[0., 0., 3.]);
        assert_eq!(accumulator.completed_episodes(), 3);
    }

    #[test]
    fn running_sum_restarts_on_the_terminating_step() {
        let mut accumulator = EpisodeRewards::new(1);
        accumulator.record(&[2.], &[0.]);
        assert_eq!(accumulator.last_completed(), &[2.]);
        assert_eq!(accumulator.running(), &[0.]);
        accumulator.record(&[4.], &[1.]);
        assert_eq!(accumulator.running(), &[4.]);
    }

    #[test]
    fn append_past_capacity_fails() {
        let mut buffer = TrajectoryBuffer::new(2, 1);
        buffer.reset();
        buffer.append(transition(vec![1.], vec![1.])).unwrap();
        buffer.append(transition(vec![1.], vec![1.])).unwrap();
        let err = buffer.append(transition(vec![1.], vec![1.])).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::BufferFull { capacity: 2 })
        );
    }

    #[test]
    fn partial_window_can_be_finalized() {
        let mut buffer = TrajectoryBuffer::new(4, 2);
        buffer.reset();
        buffer.append(transition(vec![1., 2.], vec![1., 0.])).unwrap();
        let bootstrap = Tensor::zeros(2, candle_core::DType::F32, &Device::Cpu).unwrap();
        let rollout = buffer.finalize(bootstrap);
        assert_eq!(rollout.len(), 1);
        assert_eq!(rollout.num_workers(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.episode_rewards().last_completed(), &[0., 2.]);
    }
}
