/*++

Licensed under the Apache-2.0 license.

File Name:

    linux.rs

Abstract:

    Linux backends for the hardware access traits: /dev/mem,
    /dev/cpu/N/msr and the TXT public register space.

--*/

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use txt_hw_api::{HwError, Msr, MsrReadError, MsrReader, PhysMem, TxtPublicInfo, TxtRegs};

/// Base of the TXT public configuration register space.
const TXT_PUBLIC_SPACE: u64 = 0xFED3_0000;

/// TXT.DIDVID offset within the public space.
const TXT_DIDVID: u64 = 0x110;

/// Physical memory via /dev/mem.
pub struct DevMem {
    file: File,
}

impl DevMem {
    pub fn open() -> io::Result<Self> {
        Ok(Self {
            file: File::open("/dev/mem")?,
        })
    }
}

impl PhysMem for DevMem {
    fn read_byte(&self, addr: u64) -> Result<u8, HwError> {
        let mut buf = [0u8; 1];
        self.read_into(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_into(&self, addr: u64, buf: &mut [u8]) -> Result<(), HwError> {
        self.file
            .read_exact_at(buf, addr)
            .map_err(|source| HwError::PhysMem { addr, source })
    }
}

/// Per-CPU MSR access via the msr kernel module's character devices.
pub struct DevCpuMsr {
    cpu_count: usize,
}

impl DevCpuMsr {
    /// Enumerates logical CPUs from the /dev/cpu directory.
    pub fn probe() -> io::Result<Self> {
        let mut cpu_count = 0;
        for entry in fs::read_dir("/dev/cpu")? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().parse::<usize>().is_ok() {
                cpu_count += 1;
            }
        }
        Ok(Self { cpu_count })
    }
}

impl MsrReader for DevCpuMsr {
    fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    fn read(&self, cpu: usize, msr: Msr) -> Result<u64, MsrReadError> {
        let path = PathBuf::from(format!("/dev/cpu/{cpu}/msr"));
        let file = File::open(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => MsrReadError::CpuNotFound(cpu),
            _ => MsrReadError::Io(err),
        })?;
        let mut buf = [0u8; 8];
        file.read_exact_at(&mut buf, u64::from(msr.address()))?;
        Ok(u64::from_le_bytes(buf))
    }
}

/// TXT public registers and CPU identity of the live platform.
pub struct LiveTxt {
    mem: DevMem,
}

impl LiveTxt {
    pub fn open() -> io::Result<Self> {
        Ok(Self {
            mem: DevMem::open()?,
        })
    }
}

impl TxtRegs for LiveTxt {
    fn didvid(&self) -> Result<TxtPublicInfo, HwError> {
        let mut buf = [0u8; 8];
        self.mem.read_into(TXT_PUBLIC_SPACE + TXT_DIDVID, &mut buf)?;
        let didvid = u64::from_le_bytes(buf);
        Ok(TxtPublicInfo {
            vendor_id: didvid as u16,
            device_id: (didvid >> 16) as u16,
            revision_id: (didvid >> 32) as u16,
        })
    }

    fn cpu_signature(&self) -> u32 {
        cpuid_signature()
    }
}

/// Raw CPUID leaf 1 family/model/stepping word of the executing CPU.
fn cpuid_signature() -> u32 {
    #[cfg(target_arch = "x86_64")]
    {
        unsafe { core::arch::x86_64::__cpuid(1) }.eax
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        0
    }
}

/// Stands in for a backend whose device could not be opened. Every
/// access surfaces the open failure, so checks depending on it degrade
/// to inconclusive instead of aborting the whole run.
pub struct Unavailable {
    device: &'static str,
    kind: io::ErrorKind,
    cause: String,
}

impl Unavailable {
    pub fn new(device: &'static str, err: io::Error) -> Self {
        Self {
            device,
            kind: err.kind(),
            cause: err.to_string(),
        }
    }

    fn error(&self) -> io::Error {
        io::Error::new(self.kind, format!("{} unavailable: {}", self.device, self.cause))
    }
}

impl PhysMem for Unavailable {
    fn read_byte(&self, addr: u64) -> Result<u8, HwError> {
        Err(HwError::PhysMem {
            addr,
            source: self.error(),
        })
    }

    fn read_into(&self, addr: u64, _buf: &mut [u8]) -> Result<(), HwError> {
        Err(HwError::PhysMem {
            addr,
            source: self.error(),
        })
    }
}

impl MsrReader for Unavailable {
    fn cpu_count(&self) -> usize {
        1
    }

    fn read(&self, _cpu: usize, _msr: Msr) -> Result<u64, MsrReadError> {
        Err(MsrReadError::Io(self.error()))
    }
}

impl TxtRegs for Unavailable {
    fn didvid(&self) -> Result<TxtPublicInfo, HwError> {
        Err(HwError::TxtRegs(self.error()))
    }

    /// CPUID needs no device, so the signature stays live.
    fn cpu_signature(&self) -> u32 {
        cpuid_signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_backend_errors_on_every_access() {
        let stub = Unavailable::new(
            "/dev/mem",
            io::Error::new(io::ErrorKind::PermissionDenied, "operation not permitted"),
        );
        match stub.read_byte(0x1000) {
            Err(HwError::PhysMem { addr: 0x1000, source }) => {
                assert!(source.to_string().contains("/dev/mem"));
            }
            other => panic!("expected phys-mem error, got {other:?}"),
        }
        assert!(matches!(
            stub.read_into(0x2000, &mut [0u8; 4]),
            Err(HwError::PhysMem { addr: 0x2000, .. })
        ));
        assert_eq!(stub.cpu_count(), 1);
        assert!(matches!(
            stub.read(0, Msr::PlatformId),
            Err(MsrReadError::Io(_))
        ));
        assert!(matches!(stub.didvid(), Err(HwError::TxtRegs(_))));
    }
}
