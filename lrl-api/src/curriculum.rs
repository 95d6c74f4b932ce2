use anyhow::{Context, Result};
use lrl_agents::{agent::ContinualAgent, preservation::ConsolidationReport};
use lrl_core::{env::TaskInfo, network::ActorCritic};

/// What happened while one task of a curriculum was trained.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub task_idx: usize,
    pub new_task: bool,
    pub iterations: usize,
    pub steps: usize,
    pub mean_last_episode_reward: f32,
    pub consolidation: Option<ConsolidationReport>,
}

/// Trains an agent on a fixed sequence of tasks with known boundaries.
pub struct Curriculum {
    pub tasks: Vec<TaskInfo>,
    pub steps_per_task: usize,
}

impl Curriculum {
    pub fn new(tasks: Vec<TaskInfo>, steps_per_task: usize) -> Self {
        Self {
            tasks,
            steps_per_task,
        }
    }

    /// For every task: switch the pool to it, open the task on the agent, iterate until the
    /// step budget is spent and close the task again, which consolidates or caches masks.
    pub fn run<N: ActorCritic>(&self, agent: &mut ContinualAgent<N>) -> Result<Vec<TaskReport>> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        for task in self.tasks.iter() {
            let label = task
                .label
                .as_deref()
                .with_context(|| format!("curriculum task {} has no label", task.name))?;
            agent.driver.reset_task(task)?;
            let start = agent.task_train_start(label)?;
            tracing::info!(
                task = %task.name,
                task_idx = start.task_idx,
                new_task = start.new_task,
                "task start"
            );
            let first_step = agent.driver.total_steps();
            let mut iterations = 0;
            while agent.driver.total_steps() - first_step < self.steps_per_task {
                agent.iteration()?;
                iterations += 1;
            }
            let steps = agent.driver.total_steps() - first_step;
            let mean_last_episode_reward = agent.driver.episode_rewards().mean_last_completed();
            let consolidation = agent.task_train_end()?;
            let report = TaskReport {
                name: task.name.clone(),
                task_idx: start.task_idx,
                new_task: start.new_task,
                iterations,
                steps,
                mean_last_episode_reward,
                consolidation,
            };
            tracing::info!(
                task = %report.name,
                iterations = report.iterations,
                steps = report.steps,
                reward = report.mean_last_episode_reward,
                "task end"
            );
            reports.push(report);
        }
        Ok(reports)
    }
}
