pub mod hal_modbus;
pub mod journal;
pub mod metrics;
pub mod protocol;

pub use hal_modbus::{ModbusBoard, ModbusError};
pub use journal::{JournalError, JournalSink};
pub use metrics::{init_metrics, serve_metrics, MetricsSink};
pub use protocol::JournalEntry;
