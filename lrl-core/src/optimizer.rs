use crate::error::Error;
use anyhow::Result;
use candle_core::{Tensor, Var, backprop::GradStore};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use std::fmt::Debug;

/// Back propagates `loss` and rescales the gradients of `vars` so that their joint L2 norm is at
/// most `max_norm`. Returns the gradients together with the norm measured before clipping.
pub fn clip_grad(loss: &Tensor, vars: &[Var], max_norm: Option<f32>) -> Result<(GradStore, f32)> {
    let mut grad_store = loss.backward()?;
    let mut total_norm_squared = 0.0f32;
    let mut present = vec![];
    for var in vars {
        if let Some(grad) = grad_store.get_id(var.id()) {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
            present.push(var);
        }
    }
    let total_norm = total_norm_squared.sqrt();
    if !total_norm.is_finite() {
        return Err(Error::NonFiniteGradient.into());
    }
    if let Some(max_norm) = max_norm {
        if total_norm > max_norm {
            let clip_coef = (max_norm / (total_norm + 1e-6)) as f64;
            for var in present {
                if let Some(old_grad) = grad_store.get_id(var.id()) {
                    let new_grad = old_grad.affine(clip_coef, 0.)?;
                    grad_store.insert(var.as_tensor(), new_grad);
                }
            }
        }
    }
    Ok((grad_store, total_norm))
}

/// AdamW over an explicit set of variables with optional gradient norm clipping. Non finite
/// losses or gradients abort the step with [`Error::NonFiniteGradient`].
pub struct OptimizerWithMaxGrad {
    pub optimizer: AdamW,
    pub max_grad_norm: Option<f32>,
    pub vars: Vec<Var>,
}

impl Debug for OptimizerWithMaxGrad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWithMaxGrad")
            .field("max_grad_norm", &self.max_grad_norm)
            .field("vars", &self.vars.len())
            .finish()
    }
}

impl OptimizerWithMaxGrad {
    pub fn new(vars: Vec<Var>, lr: f64, max_grad_norm: Option<f32>) -> Result<Self> {
        let params = ParamsAdamW {
            lr,
            weight_decay: 0.,
            ..Default::default()
        };
        let optimizer = AdamW::new(vars.clone(), params)?;
        Ok(Self {
            optimizer,
            max_grad_norm,
            vars,
        })
    }

    /// Returns the gradient norm before clipping.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<f32> {
        let loss_value = loss.to_scalar::<f32>()?;
        if !loss_value.is_finite() {
            return Err(Error::NonFiniteGradient.into());
        }
        let (grads, grad_norm) = clip_grad(loss, &self.vars, self.max_grad_norm)?;
        self.optimizer.step(&grads)?;
        Ok(grad_norm)
    }
}
