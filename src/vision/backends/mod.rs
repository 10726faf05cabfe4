pub mod cpu;
pub mod stub;

pub use cpu::CpuBackend;
pub use stub::StubBackend;
