use anyhow::Result;
use lrl_agents::{Conditioning, agent::MaskPeer, preservation::PreservationStrategy};
use lrl_api::{
    builders::agent::AgentType,
    curriculum::Curriculum,
    test_utils::{chain_tasks, small_builder, small_masked_agent},
};
use lrl_core::{
    error::Error,
    network::{ActorCritic, MaskedNetwork},
};

#[test]
fn finished_tasks_freeze_their_mask() -> Result<()> {
    let mut agent = small_masked_agent()?;
    let reports = Curriculum::new(chain_tasks(), 32).run(&mut agent)?;
    assert!(reports.iter().all(|report| report.consolidation.is_none()));
    let masked = agent.network().as_masked().expect("masked network");
    assert_eq!(masked.num_tasks_learned(), 2);
    let before = masked.get_mask(0)?.expect("mask for the first task");
    // training the second task again must not touch the first task's mask
    Curriculum::new(vec![chain_tasks()[1].clone()], 32).run(&mut agent)?;
    let after = agent
        .network()
        .as_masked()
        .expect("masked network")
        .get_mask(0)?
        .expect("mask for the first task");
    for (name, mask) in before.iter() {
        assert_eq!(mask.to_vec2::<f32>()?, after[name].to_vec2::<f32>()?);
    }
    Ok(())
}

#[test]
fn agents_share_masks_for_known_labels() -> Result<()> {
    let tasks = chain_tasks();
    let left = tasks[0].label.clone().expect("label");
    let right = tasks[1].label.clone().expect("label");

    let mut expert = small_masked_agent()?;
    Curriculum::new(vec![tasks[0].clone()], 32).run(&mut expert)?;
    assert!(expert.ping_response(&left)?.is_some());
    assert!(expert.ping_response(&right)?.is_none());

    let mut learner = small_masked_agent()?;
    learner.driver.reset_task(&tasks[0])?;
    let start = learner.task_train_start(&left)?;
    let peers: [&dyn MaskPeer; 1] = [&expert];
    assert!(learner.ping_agents(&peers)?);

    let shared = expert.ping_response(&left)?.expect("expert mask");
    let adopted = learner
        .network()
        .as_masked()
        .expect("masked network")
        .get_mask(start.task_idx)?
        .expect("adopted mask");
    for (name, mask) in shared.iter() {
        assert_eq!(mask.to_vec2::<f32>()?, adopted[name].to_vec2::<f32>()?);
    }
    Ok(())
}

#[test]
fn nobody_answers_for_unknown_labels() -> Result<()> {
    let tasks = chain_tasks();
    let expert = small_masked_agent()?;
    let mut learner = small_masked_agent()?;
    learner.task_train_start(tasks[1].label.as_deref().expect("label"))?;
    let peers: [&dyn MaskPeer; 1] = [&expert];
    assert!(!learner.ping_agents(&peers)?);
    Ok(())
}

#[test]
fn infusing_masks_is_unsupported() -> Result<()> {
    let mut agent = small_masked_agent()?;
    let err = agent.infuse_masks(vec![]).unwrap_err();
    assert_eq!(
        err.downcast_ref::<Error>(),
        Some(&Error::Unsupported("infuse_masks"))
    );
    Ok(())
}

#[test]
fn mask_conditioning_needs_a_masked_network() {
    let mut builder = small_builder(AgentType::PPO, PreservationStrategy::Baseline);
    builder.conditioning = Conditioning::Mask;
    let err = builder.build().err().expect("building must fail");
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Unsupported(_))));
}
