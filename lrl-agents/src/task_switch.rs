use anyhow::Result;
use lrl_core::{error::Error, network::Mask};

/// Two labels name the same task when their L2 distance is below this.
pub const LABEL_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone, PartialEq)]
pub struct SeenTask {
    pub label: Vec<f32>,
    pub name: Option<String>,
}

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (*x as f64 - *y as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Append only registry of tasks, the index of a task is its insertion position.
#[derive(Debug, Clone, Default)]
pub struct SeenTasks {
    tasks: Vec<SeenTask>,
}

impl SeenTasks {
    /// First registered task within [`LABEL_EPSILON`] of `label`.
    pub fn resolve(&self, label: &[f32]) -> Option<usize> {
        self.tasks
            .iter()
            .position(|task| l2_distance(&task.label, label) < LABEL_EPSILON as f64)
    }

    pub fn resolve_name(&self, name: &str) -> Option<usize> {
        self.tasks
            .iter()
            .position(|task| task.name.as_deref() == Some(name))
    }

    pub fn register(&mut self, label: Vec<f32>, name: Option<String>) -> usize {
        self.tasks.push(SeenTask { label, name });
        self.tasks.len() - 1
    }

    pub fn get(&self, idx: usize) -> Option<&SeenTask> {
        self.tasks.get(idx)
    }

    fn relabel(&mut self, idx: usize, label: Vec<f32>) {
        if let Some(task) = self.tasks.get_mut(idx) {
            task.label = label;
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStart {
    pub task_idx: usize,
    pub new_task: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskEnd {
    pub task_idx: usize,
    pub new_task: bool,
    /// Registry size at the end of the task.
    pub num_seen: usize,
}

#[derive(Debug, Clone)]
struct TrainTask {
    idx: usize,
    label: Vec<f32>,
}

/// Tracks task boundaries and maps labels to task indices. It only decides, the agent applies
/// the decisions to its network and preservation state.
#[derive(Debug, Clone, Default)]
pub struct TaskSwitchController {
    seen: SeenTasks,
    train: Option<TrainTask>,
    new_task: bool,
    eval_label: Option<Vec<f32>>,
}

impl TaskSwitchController {
    pub fn seen_tasks(&self) -> &SeenTasks {
        &self.seen
    }

    pub fn current_train_task(&self) -> Option<usize> {
        self.train.as_ref().map(|task| task.idx)
    }

    pub fn train_label(&self) -> Option<&[f32]> {
        self.train.as_ref().map(|task| task.label.as_slice())
    }

    pub fn eval_label(&self) -> Option<&[f32]> {
        self.eval_label.as_deref()
    }

    pub fn is_new_task(&self) -> bool {
        self.new_task
    }

    fn start(&mut self, label: &[f32], name: Option<String>) -> TaskStart {
        let (task_idx, new_task) = match self.seen.resolve(label) {
            Some(idx) => (idx, false),
            None => (self.seen.register(label.to_vec(), name), true),
        };
        self.new_task = new_task;
        self.train = Some(TrainTask {
            idx: task_idx,
            label: label.to_vec(),
        });
        TaskStart { task_idx, new_task }
    }

    pub fn task_train_start(&mut self, label: &[f32]) -> TaskStart {
        let start = self.start(label, None);
        tracing::info!(task = start.task_idx, new = start.new_task, "task train start");
        start
    }

    /// `None` when no task was being trained.
    pub fn task_train_end(&mut self) -> Option<TaskEnd> {
        let train = self.train.take()?;
        let end = TaskEnd {
            task_idx: train.idx,
            new_task: self.new_task,
            num_seen: self.seen.len(),
        };
        self.new_task = false;
        tracing::info!(task = end.task_idx, new = end.new_task, "task train end");
        Some(end)
    }

    /// The mask index to evaluate with. Unseen labels fall back to the first task.
    pub fn task_eval_start(&mut self, label: &[f32]) -> usize {
        self.eval_label = Some(label.to_vec());
        self.seen.resolve(label).unwrap_or(0)
    }

    pub fn task_eval_start_by_name(&mut self, name: &str) -> usize {
        let idx = self.seen.resolve_name(name).unwrap_or(0);
        self.eval_label = self.seen.get(idx).map(|task| task.label.clone());
        idx
    }

    /// The training task to switch back to, if training was in progress.
    pub fn task_eval_end(&mut self) -> Option<usize> {
        self.eval_label = None;
        self.current_train_task()
    }

    /// Index for `label`, registering it if it was never seen.
    pub fn ensure_registered(&mut self, label: &[f32]) -> usize {
        match self.seen.resolve(label) {
            Some(idx) => idx,
            None => self.seen.register(label.to_vec(), None),
        }
    }

    pub fn resolve(&self, label: &[f32]) -> Option<usize> {
        self.seen.resolve(label)
    }

    /// Starts the very first task without an oracle, it always gets index 0.
    pub fn set_first_task(&mut self, label: &[f32], name: &str) -> TaskStart {
        self.start(label, Some(name.to_owned()))
    }

    /// Ends the current task, if any, and starts the one identified by `label`.
    pub fn task_change_detected(
        &mut self,
        label: &[f32],
        name: &str,
    ) -> (Option<TaskEnd>, TaskStart) {
        let end = self.task_train_end();
        let start = self.start(label, Some(name.to_owned()));
        tracing::info!(task = start.task_idx, new = start.new_task, "task change detected");
        (end, start)
    }

    /// Replaces the label of the current training task, both here and in the registry.
    pub fn update_task_label(&mut self, label: &[f32]) {
        if let Some(train) = self.train.as_mut() {
            self.seen.relabel(train.idx, label.to_vec());
            train.label = label.to_vec();
        }
    }
}

/// Picks the mask to adopt from peer answers, the first non empty one wins.
pub fn select_mask(masks: Vec<Option<Mask>>, ensemble: bool) -> Result<Option<Mask>> {
    if ensemble {
        return Err(Error::Unsupported("ensemble mask selection").into());
    }
    Ok(masks.into_iter().flatten().next())
}
