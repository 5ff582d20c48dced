pub mod action_broker;
pub mod config_store;
pub mod pve_client;
pub mod task_poller;

pub use action_broker::{ActionBroker, BrokerTaskSource};
pub use config_store::ConfigStore;
pub use pve_client::{ControlPlane, ControlPlaneFactory, PveClientFactory};
pub use task_poller::{TaskEvent, TaskOutcome, TaskPoller, TaskWatch};
