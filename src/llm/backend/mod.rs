pub mod backend;
pub mod cpu;

// Re-export the Backend trait and factory function
pub use backend::{create_backend, Backend};
// Re-export the CpuBackend for testing/debugging
pub use cpu::CpuBackend;
