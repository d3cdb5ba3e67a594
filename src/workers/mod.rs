pub mod payload_sweep;

pub use payload_sweep::PayloadSweepWorker;
