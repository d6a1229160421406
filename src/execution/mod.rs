//! Execution Module
//! Mission: Two-leg swap execution with simulation, submission and trade records

pub mod engine;
pub mod legs;
pub mod submit;

pub use engine::{
    ExecutionConfig, ExecutionEngine, ExecutionError, ExecutionRequest, LegReport, RejectReason, SimulationReport,
};
pub use legs::{JupiterSwapRouter, LegSide, PreparedLeg, SwapLeg, SwapRouter, TransactionSimulator};
pub use submit::{PaperSubmitter, RemoteSigner, RpcSubmitter, TransactionSubmitter};
