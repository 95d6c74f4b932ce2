use super::{Precision, accumulate_squared_grads, zero_precision};
use crate::{a2c::A2C, driver::RolloutDriver};
use anyhow::Result;
use candle_core::Var;
use lrl_core::{
    advantage::process_rollout,
    network::{ActorCritic, Mode},
    optimizer::clip_grad,
};

/// Empirical Fisher diagonal: squared (clipped) gradients of the A2C objective over
/// `batch_size` fresh rollouts from a freshly reset pool.
pub(super) fn estimate<N: ActorCritic>(
    driver: &mut RolloutDriver<N>,
    params: &[(String, Var)],
    task_label: Option<&[f32]>,
    batch_size: usize,
) -> Result<Precision> {
    let mut precision = zero_precision(params)?;
    let config = driver.config.clone();
    let a2c = A2C {
        entropy_weight: config.entropy_weight,
        value_loss_weight: config.value_loss_weight,
    };
    let vars: Vec<Var> = params.iter().map(|(_, var)| var.clone()).collect();
    driver.reset_pool()?;
    for _ in 0..batch_size {
        let rollout = driver.collect_rollout(task_label, Mode::Eval, true, None)?;
        let processed = process_rollout(&rollout, config.discount, config.advantage_mode())?;
        let loss = a2c.objective(&processed)?;
        let (grads, _) = clip_grad(&loss, &vars, config.gradient_clip)?;
        accumulate_squared_grads(&mut precision, params, &grads)?;
    }
    Ok(precision)
}
