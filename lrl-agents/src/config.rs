use lrl_core::advantage::AdvantageMode;

/// Hyper parameters shared by every agent variant.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub discount: f32,
    pub use_gae: bool,
    pub gae_tau: f32,
    pub entropy_weight: f32,
    /// Only used by A2C.
    pub value_loss_weight: f32,
    pub gradient_clip: Option<f32>,
    pub rollout_length: usize,
    pub optimization_epochs: usize,
    pub num_mini_batches: usize,
    pub ppo_ratio_clip: f32,
    pub lr: f64,
    pub cl_alpha: f32,
    pub cl_loss_coeff: f32,
    pub cl_n_slices: usize,
    /// Rows of observations kept for SCP and MAS consolidation.
    pub state_memory: usize,
    pub consolidation_batch_size: usize,
    pub requires_task_label: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            discount: 0.99,
            use_gae: true,
            gae_tau: 0.95,
            entropy_weight: 0.01,
            value_loss_weight: 0.5,
            gradient_clip: Some(0.5),
            rollout_length: 128,
            optimization_epochs: 4,
            num_mini_batches: 4,
            ppo_ratio_clip: 0.2,
            lr: 3e-4,
            cl_alpha: 0.25,
            cl_loss_coeff: 1e4,
            cl_n_slices: 200,
            state_memory: 10_000,
            consolidation_batch_size: 32,
            requires_task_label: false,
        }
    }
}

impl AgentConfig {
    pub fn advantage_mode(&self) -> AdvantageMode {
        AdvantageMode::from_config(self.use_gae, self.gae_tau)
    }
}
