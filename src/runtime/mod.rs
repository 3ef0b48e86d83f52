pub mod gateway;
pub mod heartbeat_worker;
pub mod logging;
pub mod replay_worker;
pub mod state_paths;
pub mod supervisor;
pub mod worker_primitives;
pub mod worker_registry;

pub use crate::shared::errors::RuntimeError;
pub use gateway::{parse_approval_command, ApprovalCommand, Gateway, BUSY_REPLY};
pub use heartbeat_worker::{configured_heartbeat_interval, tick_heartbeat, HEARTBEAT_OK};
pub use logging::{append_runtime_log, runtime_log};
pub use replay_worker::tick_replay;
pub use state_paths::{bootstrap_state_root, default_state_root_path, StatePaths};
pub use supervisor::{
    build_channel_manager, is_process_alive, load_runtime_state, run_gateway, run_gateway_with,
    save_runtime_state, signal_stop, GatewayParts, RuntimeState,
};
pub use worker_primitives::{sleep_with_stop, WorkerEvent};
pub use worker_registry::{WorkerHealth, WorkerState};
