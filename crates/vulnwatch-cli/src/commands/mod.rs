pub mod migrate;
pub mod scan;
pub mod worker;

pub use migrate::MigrateCommand;
pub use scan::ScanCommand;
pub use worker::WorkerCommand;
