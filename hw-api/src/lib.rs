/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Hardware access traits and the security register abstraction built
    on top of them.

--*/

mod msr;

pub use msr::{DebugInterface, Msr, MsrBank, SmrrInfo};

use std::io;
use thiserror::Error;

/// Identity of the TXT-capable chipset, read from the public register
/// space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxtPublicInfo {
    pub vendor_id: u16,
    pub device_id: u16,
    pub revision_id: u16,
}

/// Failure of a single per-CPU register read.
#[derive(Debug, Error)]
pub enum MsrReadError {
    #[error("cpu {0} does not exist")]
    CpuNotFound(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Hardware access failures, each carrying the location that failed.
#[derive(Debug, Error)]
pub enum HwError {
    #[error("cannot read {msr}: {source}")]
    MsrAccess { msr: Msr, source: MsrReadError },

    /// The same register reads differently on two logical CPUs. This is
    /// a security finding in its own right, distinct from an I/O error.
    #[error(
        "{msr} diverges across cpus: cpu {cpu_a} reads {value_a:#x}, cpu {cpu_b} reads {value_b:#x}"
    )]
    CpuMismatch {
        msr: Msr,
        cpu_a: usize,
        value_a: u64,
        cpu_b: usize,
        value_b: u64,
    },

    #[error("cannot read physical memory at {addr:#x}: {source}")]
    PhysMem { addr: u64, source: io::Error },

    #[error("cannot read txt public register space: {0}")]
    TxtRegs(#[source] io::Error),
}

/// Per-logical-CPU model specific register access.
pub trait MsrReader {
    /// Number of logical CPUs the platform reports.
    fn cpu_count(&self) -> usize;

    /// Reads `msr` on one logical CPU. A CPU index the implementation
    /// cannot address must surface as [`MsrReadError::CpuNotFound`].
    fn read(&self, cpu: usize, msr: Msr) -> Result<u64, MsrReadError>;
}

/// Raw physical memory access.
pub trait PhysMem {
    fn read_byte(&self, addr: u64) -> Result<u8, HwError>;

    fn read_into(&self, addr: u64, buf: &mut [u8]) -> Result<(), HwError>;
}

/// TXT capability registers and CPU identity.
pub trait TxtRegs {
    /// Vendor/device/revision id of the chipset, from TXT.DIDVID.
    fn didvid(&self) -> Result<TxtPublicInfo, HwError>;

    /// Raw CPUID leaf 1 family/model/stepping word.
    fn cpu_signature(&self) -> u32;
}
