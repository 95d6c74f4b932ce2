use anyhow::Result;
use lrl_agents::preservation::{PreservationStrategy, precision_sum};
use lrl_api::{
    builders::agent::AgentType,
    curriculum::Curriculum,
    test_utils::{assert_finite, chain_tasks, small_agent, small_builder},
};

fn run_two_tasks(
    agent_type: AgentType,
    strategy: PreservationStrategy,
) -> Result<Vec<lrl_api::curriculum::TaskReport>> {
    let mut agent = small_agent(agent_type, strategy)?;
    Curriculum::new(chain_tasks(), 64).run(&mut agent)
}

fn assert_consolidated(reports: &[lrl_api::curriculum::TaskReport]) -> Result<()> {
    assert_eq!(reports.len(), 2);
    for (idx, report) in reports.iter().enumerate() {
        assert_eq!(report.task_idx, idx);
        assert!(report.new_task);
        assert!(report.steps >= 64);
        let consolidation = report.consolidation.as_ref().expect("consolidation report");
        let task = precision_sum(&consolidation.task_precision)?;
        let global = precision_sum(&consolidation.global_precision)?;
        assert_finite(task);
        assert!(task > 0., "task precision should be positive, got {task}");
        assert!(global > 0.);
    }
    Ok(())
}

#[test]
fn ewc_consolidates_after_every_task() -> Result<()> {
    assert_consolidated(&run_two_tasks(AgentType::A2C, PreservationStrategy::Ewc)?)
}

#[test]
fn scp_consolidates_after_every_task() -> Result<()> {
    assert_consolidated(&run_two_tasks(
        AgentType::PPO,
        PreservationStrategy::Scp { n_slices: 4 },
    )?)
}

#[test]
fn mas_consolidates_after_every_task() -> Result<()> {
    assert_consolidated(&run_two_tasks(AgentType::PPO, PreservationStrategy::Mas)?)
}

#[test]
fn baseline_keeps_zero_precision() -> Result<()> {
    let reports = run_two_tasks(AgentType::PPO, PreservationStrategy::Baseline)?;
    for report in reports {
        let consolidation = report.consolidation.expect("consolidation report");
        assert_eq!(precision_sum(&consolidation.task_precision)?, 0.);
        assert_eq!(precision_sum(&consolidation.global_precision)?, 0.);
    }
    Ok(())
}

#[test]
fn penalty_pulls_towards_consolidated_weights() -> Result<()> {
    let mut agent = small_agent(AgentType::A2C, PreservationStrategy::Ewc)?;
    Curriculum::new(vec![chain_tasks()[0].clone()], 64).run(&mut agent)?;
    // anchors sit on the current weights right after consolidation
    let first = agent.iteration()?;
    assert_eq!(first.penalty, 0.);
    let second = agent.iteration()?;
    assert!(second.penalty > 0.);
    Ok(())
}

#[test]
fn revisited_task_keeps_its_index() -> Result<()> {
    let mut agent = small_agent(AgentType::PPO, PreservationStrategy::Baseline)?;
    let tasks = chain_tasks();
    let curriculum = Curriculum::new(
        vec![tasks[0].clone(), tasks[1].clone(), tasks[0].clone()],
        32,
    );
    let reports = curriculum.run(&mut agent)?;
    let indices: Vec<_> = reports.iter().map(|r| (r.task_idx, r.new_task)).collect();
    assert_eq!(indices, vec![(0, true), (1, true), (0, false)]);
    assert_eq!(agent.controller.seen_tasks().len(), 2);
    Ok(())
}

#[test]
fn ewc_consolidation_rollouts_are_not_counted_as_training_steps() -> Result<()> {
    let mut agent = small_agent(AgentType::A2C, PreservationStrategy::Ewc)?;
    let reports = Curriculum::new(vec![chain_tasks()[0].clone()], 64).run(&mut agent)?;
    let report = &reports[0];
    let config = &agent.driver.config;
    let per_iteration = config.rollout_length * agent.driver.pool.num_workers();
    // 16 steps x 2 workers, two iterations fill the budget
    assert_eq!(report.iterations, 2);
    assert_eq!(report.steps, report.iterations * per_iteration);
    assert_eq!(agent.driver.total_steps(), 64);
    Ok(())
}

#[test]
fn blend_factor_outside_unit_interval_fails_to_build() {
    let mut builder = small_builder(AgentType::PPO, PreservationStrategy::Mas);
    builder.config.cl_alpha = 1.5;
    assert!(builder.build().is_err());
    builder.config.cl_alpha = 1.;
    assert!(builder.build().is_ok());
}
