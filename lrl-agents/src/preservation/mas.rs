use super::{Precision, accumulate_squared_grads, batch_label, zero_precision};
use anyhow::Result;
use candle_core::Var;
use candle_nn::ops::softmax;
use lrl_core::{
    network::{ActorCritic, Mode},
    tensors::stack_rows,
};

/// Memory aware synapses: sensitivity of the mean L2 norm of the policy output, then of the
/// mean value estimate.
pub(super) fn estimate<N: ActorCritic>(
    network: &N,
    params: &[(String, Var)],
    states: &[Vec<f32>],
    task_label: Option<&[f32]>,
    batch_size: usize,
) -> Result<Precision> {
    let mut precision = zero_precision(params)?;
    let device = network.device();
    for chunk in states.chunks(batch_size.max(1)) {
        let observations = stack_rows(chunk, device)?;
        let label = batch_label(task_label, chunk.len(), device)?;
        let prediction = network.predict(&observations, None, label.as_ref(), Mode::Eval)?;
        let probs = softmax(&prediction.logits, 1)?;
        let actor_loss = probs.sqr()?.sum(1)?.sqrt()?.mean_all()?;
        accumulate_squared_grads(&mut precision, params, &actor_loss.backward()?)?;
        let value_loss = prediction.values.mean_all()?;
        accumulate_squared_grads(&mut precision, params, &value_loss.backward()?)?;
    }
    Ok(precision)
}
