//! Work orders pulled from the control server and their execution.

mod dispatch;
mod queue;
mod types;

pub use dispatch::{AgentWorkExecutor, GameServerOrder, StatusUpdateOrder};
pub use queue::{WorkExecutor, WorkQueue};
pub use types::{TargetCategory, TargetType, WorkItem, WorkStatus};
