use candle_core::Tensor;
use derive_more::{Deref, DerefMut, Display};

#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Advantages(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Returns(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Logp(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct ValuesPred(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct PolicyLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct ValueLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct EntropyLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct LogpDiff(pub Tensor);

/// Packs row vectors into a `[rows, dim]` tensor.
pub fn stack_rows(rows: &[Vec<f32>], device: &candle_core::Device) -> candle_core::Result<Tensor> {
    let dim = rows.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<f32> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    Tensor::from_vec(flat, (rows.len(), dim), device)
}

/// Repeats a label vector once per row, giving a `[rows, label_dim]` tensor.
pub fn repeat_label(
    label: &[f32],
    rows: usize,
    device: &candle_core::Device,
) -> candle_core::Result<Tensor> {
    Tensor::from_vec(label.repeat(rows), (rows, label.len()), device)
}
