use anyhow::{Result, ensure};
use lrl_agents::agent::ContinualAgent;
use lrl_core::{env::TaskInfo, network::ActorCritic, task_pool::TaskPool, tensors::stack_rows};

/// Runs sampled episodes with the agent in evaluation mode on a separate pool.
pub struct Evaluator {
    pub pool: TaskPool,
    pub eval_episodes: usize,
    pub evaluations_results: Vec<(String, f32)>,
}

impl Evaluator {
    pub fn new(pool: TaskPool, eval_episodes: usize) -> Self {
        Self {
            pool,
            eval_episodes,
            evaluations_results: vec![],
        }
    }

    /// Mean return of the first `eval_episodes` episodes completed on `task`.
    pub fn evaluate<N: ActorCritic>(
        &mut self,
        agent: &mut ContinualAgent<N>,
        task: &TaskInfo,
    ) -> Result<f32> {
        ensure!(self.eval_episodes > 0, "evaluation needs at least one episode");
        match task.label.as_deref() {
            Some(label) => agent.task_eval_start(label)?,
            None => agent.task_eval_start_by_name(&task.name)?,
        }
        let returns = self.run_episodes(agent, task);
        agent.task_eval_end()?;
        let returns = returns?;
        let mean = returns.iter().sum::<f32>() / returns.len() as f32;
        tracing::info!(
            task = %task.name,
            episodes = returns.len(),
            mean_return = mean,
            "evaluation"
        );
        self.evaluations_results.push((task.name.clone(), mean));
        Ok(mean)
    }

    fn run_episodes<N: ActorCritic>(
        &mut self,
        agent: &ContinualAgent<N>,
        task: &TaskInfo,
    ) -> Result<Vec<f32>> {
        let device = agent.network().device().clone();
        let mut rows = self.pool.reset_task(task)?;
        let mut running = vec![0.; rows.len()];
        let mut returns = Vec::with_capacity(self.eval_episodes);
        while returns.len() < self.eval_episodes {
            let states = stack_rows(&rows, &device)?;
            let actions = agent.eval_actions(&states)?;
            let snapshots = self.pool.step(&actions)?;
            rows = Vec::with_capacity(snapshots.len());
            for (worker, snapshot) in snapshots.into_iter().enumerate() {
                running[worker] += snapshot.reward;
                if snapshot.done() {
                    returns.push(running[worker]);
                    running[worker] = 0.;
                }
                rows.push(snapshot.state);
            }
        }
        returns.truncate(self.eval_episodes);
        Ok(returns)
    }
}
