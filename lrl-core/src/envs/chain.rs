use crate::env::{SnapShot, Task, TaskInfo, TaskSpecs};
use anyhow::{Result, bail};
use rand::{Rng, SeedableRng, rngs::StdRng};

const LEFT: usize = 0;
const RIGHT: usize = 1;

/// A corridor of `length` cells. The agent starts in the middle and moves left or right, the
/// episode ends with reward 1 at the goal end or is truncated after `max_steps`. The first
/// payload entry picks the goal: `0.` is the left end, `1.` the right end.
#[derive(Debug, Clone)]
pub struct ChainTask {
    length: usize,
    max_steps: usize,
    position: usize,
    steps: usize,
    goal: usize,
    current: TaskInfo,
    rng: StdRng,
}

impl ChainTask {
    pub fn new(length: usize, max_steps: usize, seed: u64) -> Self {
        assert!(length >= 3, "a chain needs at least three cells");
        let current = Self::tasks()[0].clone();
        Self {
            length,
            max_steps,
            position: length / 2,
            steps: 0,
            goal: 0,
            current,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The two tasks of the family with their one-hot labels.
    pub fn tasks() -> Vec<TaskInfo> {
        vec![
            TaskInfo {
                name: "chain_left".into(),
                payload: vec![0.],
                label: Some(vec![1., 0.]),
            },
            TaskInfo {
                name: "chain_right".into(),
                payload: vec![1.],
                label: Some(vec![0., 1.]),
            },
        ]
    }

    fn observation(&self) -> Vec<f32> {
        let mut obs = vec![0.; self.length];
        obs[self.position] = 1.;
        obs
    }

    fn with_labels(
        &mut self,
        mut tasks: Vec<TaskInfo>,
        requires_task_label: bool,
    ) -> Vec<TaskInfo> {
        if requires_task_label {
            for task in tasks.iter_mut() {
                let dim = task.label.as_ref().map_or(2, Vec::len);
                task.label = Some((0..dim).map(|_| self.rng.random_range(-1.0..1.0)).collect());
            }
        }
        tasks
    }
}

impl Task for ChainTask {
    fn specs(&self) -> TaskSpecs {
        TaskSpecs {
            name: "chain".into(),
            state_dim: self.length,
            action_dim: 2,
        }
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn reset(&mut self) -> Result<Vec<f32>> {
        self.position = self.length / 2;
        self.steps = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: usize) -> Result<SnapShot> {
        match action {
            LEFT => self.position = self.position.saturating_sub(1),
            RIGHT => self.position = (self.position + 1).min(self.length - 1),
            other => bail!("chain task got invalid action {other}"),
        }
        self.steps += 1;
        let terminated = self.position == self.goal;
        let truncated = !terminated && self.steps >= self.max_steps;
        let reward = if terminated { 1. } else { 0. };
        let state = if terminated || truncated {
            self.reset()?
        } else {
            self.observation()
        };
        Ok(SnapShot {
            state,
            reward,
            terminated,
            truncated,
        })
    }

    fn set_task(&mut self, task: &TaskInfo) -> Result<()> {
        self.goal = match task.payload.first() {
            Some(side) if *side < 0.5 => 0,
            Some(_) => self.length - 1,
            None => bail!("chain task payload is empty"),
        };
        self.current = task.clone();
        Ok(())
    }

    fn get_task(&self) -> TaskInfo {
        self.current.clone()
    }

    fn get_all_tasks(&mut self, requires_task_label: bool) -> Vec<TaskInfo> {
        self.with_labels(Self::tasks(), requires_task_label)
    }

    fn random_tasks(
        &mut self,
        num_tasks: usize,
        requires_task_label: bool,
    ) -> Result<Vec<TaskInfo>> {
        let all = Self::tasks();
        let picked = (0..num_tasks)
            .map(|_| all[self.rng.random_range(0..all.len())].clone())
            .collect();
        Ok(self.with_labels(picked, requires_task_label))
    }
}
