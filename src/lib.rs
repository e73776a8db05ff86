pub mod can;
pub mod codec;
pub mod config;
pub mod constants;
pub mod definitions;
pub mod dtc;
pub mod engine;
pub mod error;
pub mod events;
pub mod link;
pub mod pid;
pub mod report;
pub mod simulator;
pub mod transport;
pub mod validators;
pub mod vehicle;


pub use config::{ConnectionSettings, TransportKind};
pub use definitions::{EcuType, Equipment, ProtocolDefinitionSet};
pub use engine::{connect_with_retry, DiagnosticContext, DiagnosticsEngine, RunHandle, RunStatus};
pub use error::{EngineError, SelectionError, TransportError};
pub use events::{DiagnosticEvent, EventKind};
pub use pid::Pid;
pub use report::DiagnosticReport;
pub use simulator::SimulatedAdapter;
pub use transport::Transport;
pub use vehicle::{detect_from_vin, select_adapter, VehicleModel, VehicleProfile};
