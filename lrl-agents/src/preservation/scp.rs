use super::{
    Precision, accumulate_squared_grads, batch_label, random_unit_direction, zero_precision,
};
use anyhow::Result;
use candle_core::{Tensor, Var};
use lrl_core::{
    network::{ActorCritic, Mode},
    tensors::stack_rows,
};

/// Sliced Cramer preservation: the batch mean of the policy logits is projected onto
/// `n_slices` random unit directions and every projection contributes its squared gradient,
/// followed by the batch mean of the value estimate.
pub(super) fn estimate<N: ActorCritic>(
    network: &N,
    params: &[(String, Var)],
    states: &[Vec<f32>],
    task_label: Option<&[f32]>,
    batch_size: usize,
    n_slices: usize,
) -> Result<Precision> {
    let mut precision = zero_precision(params)?;
    let device = network.device();
    for chunk in states.chunks(batch_size.max(1)) {
        let observations = stack_rows(chunk, device)?;
        let label = batch_label(task_label, chunk.len(), device)?;
        let prediction = network.predict(&observations, None, label.as_ref(), Mode::Eval)?;
        let logits_mean = prediction.logits.mean(0)?;
        let action_dim = logits_mean.dims1()?;
        for _ in 0..n_slices {
            let xi = Tensor::from_vec(random_unit_direction(action_dim), action_dim, device)?;
            let projection = (&logits_mean * xi)?.sum_all()?;
            accumulate_squared_grads(&mut precision, params, &projection.backward()?)?;
        }
        let values_mean = prediction.values.mean_all()?;
        accumulate_squared_grads(&mut precision, params, &values_mean.backward()?)?;
    }
    Ok(precision)
}
