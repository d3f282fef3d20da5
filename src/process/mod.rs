//! Encoder Process Supervisor (C1) and Crash Ledger (C2).

pub mod crash_ledger;
pub mod supervisor;

pub use crash_ledger::CrashLedger;
pub use supervisor::EncoderSupervisor;
