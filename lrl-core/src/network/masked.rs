use super::{ActorCritic, Mask, MaskedNetwork, Mode, Prediction, categorical_head};
use crate::rng::RNG;
use anyhow::{Result, bail};
use candle_core::{DType, Device, Tensor, Var};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;

fn normal_tensor(std: f32, shape: (usize, usize), device: &Device) -> Result<Tensor> {
    let normal = Normal::new(0f32, std)?;
    let data: Vec<f32> = RNG.with_borrow_mut(|rng| {
        (0..shape.0 * shape.1)
            .map(|_| normal.sample(rng))
            .collect()
    });
    Ok(Tensor::from_vec(data, shape, device)?)
}

/// Keeps the `keep_ratio` fraction of entries with the largest absolute score.
fn binarize(scores: &Tensor, keep_ratio: f32) -> Result<Tensor> {
    let abs = scores.abs()?;
    let mut flat = abs.flatten_all()?.to_vec1::<f32>()?;
    flat.sort_by(|a, b| b.total_cmp(a));
    let keep = ((flat.len() as f32 * keep_ratio).ceil() as usize).clamp(1, flat.len());
    let threshold = flat[keep - 1];
    Ok(abs.ge(threshold)?.to_dtype(DType::F32)?)
}

/// A bias free linear layer with frozen weights and one trainable score tensor per task. The
/// effective weight is `weight * mask(task)`.
#[derive(Debug)]
pub struct MaskedLinear {
    name: String,
    weight: Tensor,
    scores: Vec<Var>,
    cached: BTreeMap<usize, Tensor>,
    keep_ratio: f32,
}

impl MaskedLinear {
    pub fn new(
        name: &str,
        in_dim: usize,
        out_dim: usize,
        max_tasks: usize,
        keep_ratio: f32,
        device: &Device,
    ) -> Result<Self> {
        let std = (2. / in_dim as f32).sqrt();
        let weight = normal_tensor(std, (out_dim, in_dim), device)?;
        let scores = (0..max_tasks)
            .map(|_| Ok(Var::from_tensor(&normal_tensor(std, (out_dim, in_dim), device)?)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: name.to_owned(),
            weight,
            scores,
            cached: BTreeMap::new(),
            keep_ratio,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn scores(&self, task: usize) -> Result<&Var> {
        match self.scores.get(task) {
            Some(scores) => Ok(scores),
            None => bail!("{} has no mask slot for task {task}", self.name),
        }
    }

    /// The fixed mask of a task: the cached one if present, else the current binarization.
    pub fn mask(&self, task: usize) -> Result<Tensor> {
        match self.cached.get(&task) {
            Some(mask) => Ok(mask.clone()),
            None => binarize(self.scores(task)?.as_tensor(), self.keep_ratio),
        }
    }

    pub fn cache(&mut self, task: usize) -> Result<()> {
        let mask = binarize(self.scores(task)?.as_tensor(), self.keep_ratio)?;
        self.cached.insert(task, mask);
        Ok(())
    }

    /// Installs a mask computed elsewhere. The scores are overwritten with the mask so further
    /// training starts from it.
    pub fn adopt(&mut self, task: usize, mask: &Tensor) -> Result<()> {
        self.scores(task)?.set(mask)?;
        self.cached.insert(task, mask.clone());
        Ok(())
    }

    pub fn forward(&self, xs: &Tensor, task: usize, mode: Mode) -> Result<Tensor> {
        let mask = match mode {
            Mode::Train => {
                // straight through: binary forward, identity gradient to the scores
                let scores = self.scores(task)?.as_tensor();
                let binary = binarize(scores, self.keep_ratio)?;
                ((binary - scores)?.detach() + scores)?
            }
            Mode::Eval => self.mask(task)?,
        };
        let weight = (&self.weight * mask)?;
        Ok(xs.matmul(&weight.t()?)?)
    }
}

/// Supermask actor critic: frozen random weights, a learned binary mask per task.
#[derive(Debug)]
pub struct MaskedActorCritic {
    actor: Vec<MaskedLinear>,
    critic: Vec<MaskedLinear>,
    active_task: usize,
    num_tasks_learned: usize,
    max_tasks: usize,
    device: Device,
}

fn masked_stack(
    prefix: &str,
    input_dim: usize,
    layers: &[usize],
    max_tasks: usize,
    keep_ratio: f32,
    device: &Device,
) -> Result<Vec<MaskedLinear>> {
    let mut last_dim = input_dim;
    let mut stack = vec![];
    for (idx, size) in layers.iter().enumerate() {
        let name = format!("{prefix}{idx}");
        stack.push(MaskedLinear::new(&name, last_dim, *size, max_tasks, keep_ratio, device)?);
        last_dim = *size;
    }
    Ok(stack)
}

fn forward_stack(stack: &[MaskedLinear], xs: &Tensor, task: usize, mode: Mode) -> Result<Tensor> {
    let mut xs = xs.clone();
    for (idx, layer) in stack.iter().enumerate() {
        xs = layer.forward(&xs, task, mode)?;
        if idx + 1 != stack.len() {
            xs = xs.relu()?;
        }
    }
    Ok(xs)
}

impl MaskedActorCritic {
    pub fn build(
        state_dim: usize,
        action_dim: usize,
        hidden: &[usize],
        max_tasks: usize,
        keep_ratio: f32,
        device: Device,
    ) -> Result<Self> {
        let mut actor_layers = hidden.to_vec();
        actor_layers.push(action_dim);
        let mut critic_layers = hidden.to_vec();
        critic_layers.push(1);
        Ok(Self {
            actor: masked_stack(
                "actor",
                state_dim,
                &actor_layers,
                max_tasks,
                keep_ratio,
                &device,
            )?,
            critic: masked_stack(
                "critic",
                state_dim,
                &critic_layers,
                max_tasks,
                keep_ratio,
                &device,
            )?,
            active_task: 0,
            num_tasks_learned: 0,
            max_tasks,
            device,
        })
    }

    fn layers(&self) -> impl Iterator<Item = &MaskedLinear> {
        self.actor.iter().chain(self.critic.iter())
    }

    fn layers_mut(&mut self) -> impl Iterator<Item = &mut MaskedLinear> {
        self.actor.iter_mut().chain(self.critic.iter_mut())
    }
}

impl ActorCritic for MaskedActorCritic {
    /// Masked networks identify the task through the active mask, the label is ignored.
    fn predict(
        &self,
        observations: &Tensor,
        actions: Option<&Tensor>,
        _task_label: Option<&Tensor>,
        mode: Mode,
    ) -> Result<Prediction> {
        let logits = forward_stack(&self.actor, observations, self.active_task, mode)?;
        let values = forward_stack(&self.critic, observations, self.active_task, mode)?.squeeze(1)?;
        let (actions, log_probs, entropy) = categorical_head(&logits, actions)?;
        Ok(Prediction {
            logits,
            actions,
            log_probs,
            entropy,
            values,
        })
    }

    fn parameters(&self) -> Result<Vec<(String, Var)>> {
        let mut named = vec![];
        for layer in self.layers() {
            for (task, scores) in layer.scores.iter().enumerate() {
                named.push((format!("{}.scores{task}", layer.name), scores.clone()));
            }
        }
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(named)
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn as_masked(&self) -> Option<&dyn MaskedNetwork> {
        Some(self)
    }

    fn as_masked_mut(&mut self) -> Option<&mut dyn MaskedNetwork> {
        Some(self)
    }
}

impl MaskedNetwork for MaskedActorCritic {
    fn set_task(&mut self, task_idx: usize) -> Result<()> {
        if task_idx >= self.max_tasks {
            bail!(
                "task index {task_idx} exceeds the {} available mask slots",
                self.max_tasks
            );
        }
        self.active_task = task_idx;
        Ok(())
    }

    fn cache_masks(&mut self) -> Result<()> {
        let task = self.active_task;
        for layer in self.layers_mut() {
            layer.cache(task)?;
        }
        Ok(())
    }

    fn set_num_tasks_learned(&mut self, num_tasks: usize) {
        self.num_tasks_learned = num_tasks;
    }

    fn num_tasks_learned(&self) -> usize {
        self.num_tasks_learned
    }

    fn get_mask(&self, task_idx: usize) -> Result<Option<Mask>> {
        if task_idx >= self.max_tasks {
            return Ok(None);
        }
        let mut mask = Mask::default();
        for layer in self.layers() {
            mask.insert(layer.name.clone(), layer.mask(task_idx)?);
        }
        Ok(Some(mask))
    }

    fn set_mask(&mut self, mask: &Mask, task_idx: usize) -> Result<()> {
        for layer in self.layers_mut() {
            if let Some(layer_mask) = mask.get(&layer.name) {
                layer.adopt(task_idx, layer_mask)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net() -> MaskedActorCritic {
        MaskedActorCritic::build(4, 2, &[8], 3, 0.5, Device::Cpu).unwrap()
    }

    #[test]
    fn binarize_keeps_requested_fraction() {
        let scores = Tensor::from_vec(vec![0.1f32, -0.9, 0.5, 0.2], (2, 2), &Device::Cpu).unwrap();
        let mask = binarize(&scores, 0.5).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(mask, vec![vec![0., 1.], vec![1., 0.]]);
    }

    #[test]
    fn only_scores_are_trainable() {
        let net = net();
        let params = net.parameters().unwrap();
        // actor0, actor1, critic0, critic1 with three slots each
        assert_eq!(params.len(), 12);
        assert!(params.iter().all(|(name, _)| name.contains(".scores")));
    }

    #[test]
    fn straight_through_reaches_active_scores_only() {
        let mut net = net();
        net.set_task(1).unwrap();
        let obs = Tensor::ones((3, 4), DType::F32, &Device::Cpu).unwrap();
        let prediction = net.predict(&obs, None, None, Mode::Train).unwrap();
        let loss = prediction.values.sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let critic = &net.critic[0];
        assert!(grads.get(critic.scores[1].as_tensor()).is_some());
        assert!(grads.get(critic.scores[0].as_tensor()).is_none());
    }

    #[test]
    fn adopted_mask_is_returned_for_that_task() {
        let source = net();
        let mask = source.get_mask(0).unwrap().unwrap();
        let mut target = net();
        target.set_mask(&mask, 2).unwrap();
        let adopted = target.get_mask(2).unwrap().unwrap();
        for (name, tensor) in mask.iter() {
            assert_eq!(
                adopted[name].to_vec2::<f32>().unwrap(),
                tensor.to_vec2::<f32>().unwrap()
            );
        }
        assert!(target.get_mask(3).unwrap().is_none());
        assert!(target.set_task(3).is_err());
    }
}
