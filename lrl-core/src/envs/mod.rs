mod chain;

pub use chain::ChainTask;
