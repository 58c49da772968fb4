/*++

Licensed under the Apache-2.0 license.

File Name:

    msr.rs

Abstract:

    Cross-CPU-consistent reads of the security configuration MSRs and
    typed decodes of their bit fields.

--*/

use core::fmt;

use crate::{HwError, MsrReadError, MsrReader};

/// Model specific registers relevant to the measured boot chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Msr {
    PlatformId,
    FeatureControl,
    MtrrCap,
    SmrrPhysBase,
    SmrrPhysMask,
    DebugInterface,
}

impl Msr {
    pub const fn address(self) -> u32 {
        match self {
            Msr::PlatformId => 0x17,
            Msr::FeatureControl => 0x3a,
            Msr::MtrrCap => 0xfe,
            Msr::SmrrPhysBase => 0x1f2,
            Msr::SmrrPhysMask => 0x1f3,
            Msr::DebugInterface => 0xc80,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Msr::PlatformId => "IA32_PLATFORM_ID",
            Msr::FeatureControl => "IA32_FEATURE_CONTROL",
            Msr::MtrrCap => "IA32_MTRRCAP",
            Msr::SmrrPhysBase => "IA32_SMRR_PHYSBASE",
            Msr::SmrrPhysMask => "IA32_SMRR_PHYSMASK",
            Msr::DebugInterface => "IA32_DEBUG_INTERFACE",
        }
    }
}

impl fmt::Display for Msr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.name(), self.address())
    }
}

/// SMM range register configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmrrInfo {
    pub active: bool,

    /// Bits 12..32 of IA32_SMRR_PHYSBASE.
    pub phys_base: u32,

    /// Bits 12..32 of IA32_SMRR_PHYSMASK.
    pub phys_mask: u32,
}

/// Silicon debug interface state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugInterface {
    pub enabled: bool,
    pub locked: bool,
    pub pch_strap: bool,
}

/// Feature control bits that must be set for VMX inside SMX.
const VMX_IN_SMX_BITS: u64 = 1 << 1 | 1 << 5 | 1 << 6;

/// Reads the security MSRs across every logical CPU and decodes them.
///
/// Every read re-queries all CPUs; nothing is cached between calls.
pub struct MsrBank<'a> {
    reader: &'a dyn MsrReader,
}

impl<'a> MsrBank<'a> {
    pub fn new(reader: &'a dyn MsrReader) -> Self {
        Self { reader }
    }

    /// Reads `msr` on every logical CPU, requiring bit-identical values.
    ///
    /// Divergence between any two CPUs fails with
    /// [`HwError::CpuMismatch`] naming the register and both CPU
    /// indices; it is never resolved by majority.
    pub fn read_consistent(&self, msr: Msr) -> Result<u64, HwError> {
        let mut agreed: Option<u64> = None;
        for cpu in 0..self.reader.cpu_count() {
            let value = self
                .reader
                .read(cpu, msr)
                .map_err(|source| HwError::MsrAccess { msr, source })?;
            match agreed {
                None => agreed = Some(value),
                Some(expected) if expected != value => {
                    return Err(HwError::CpuMismatch {
                        msr,
                        cpu_a: 0,
                        value_a: expected,
                        cpu_b: cpu,
                        value_b: value,
                    })
                }
                Some(_) => {}
            }
        }
        agreed.ok_or(HwError::MsrAccess {
            msr,
            source: MsrReadError::CpuNotFound(0),
        })
    }

    /// True if the platform supports SMRRs (IA32_MTRRCAP bit 11).
    pub fn has_smrr(&self) -> Result<bool, HwError> {
        Ok(self.read_consistent(Msr::MtrrCap)? >> 11 & 1 != 0)
    }

    pub fn smrr_info(&self) -> Result<SmrrInfo, HwError> {
        let phys_base = self.read_consistent(Msr::SmrrPhysBase)?;
        let phys_mask = self.read_consistent(Msr::SmrrPhysMask)?;
        Ok(SmrrInfo {
            active: phys_mask >> 11 & 1 != 0,
            phys_base: (phys_base >> 12 & 0xf_ffff) as u32,
            phys_mask: (phys_mask >> 12 & 0xf_ffff) as u32,
        })
    }

    /// True if IA32_FEATURE_CONTROL is locked (bit 0).
    pub fn feature_control_locked(&self) -> Result<bool, HwError> {
        Ok(self.read_consistent(Msr::FeatureControl)? & 1 != 0)
    }

    /// Raw IA32_PLATFORM_ID value.
    pub fn platform_id(&self) -> Result<u64, HwError> {
        self.read_consistent(Msr::PlatformId)
    }

    /// True if feature control permits VMX inside SMX operation.
    pub fn vmx_allowed_in_smx(&self) -> Result<bool, HwError> {
        let feature_control = self.read_consistent(Msr::FeatureControl)?;
        Ok(feature_control & VMX_IN_SMX_BITS == VMX_IN_SMX_BITS)
    }

    /// True if the SENTER leaf functions are enabled, either through the
    /// legacy per-leaf byte (bits 8..16 all set) or the single global
    /// enable (bit 16 of the register, 0x100 of the extracted field).
    pub fn txt_leaves_enabled(&self) -> Result<bool, HwError> {
        let feature_control = self.read_consistent(Msr::FeatureControl)?;
        let leaves = feature_control >> 8 & 0x1ff;
        Ok(leaves & 0xff == 0xff || leaves & 0x100 == 0x100)
    }

    pub fn debug_interface(&self) -> Result<DebugInterface, HwError> {
        let value = self.read_consistent(Msr::DebugInterface)?;
        Ok(DebugInterface {
            enabled: value & 1 != 0,
            locked: value >> 30 & 1 != 0,
            pch_strap: value >> 31 & 1 != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;

    /// Backs each modeled CPU with its own register file; claiming more
    /// CPUs than are backed makes the extra indices unaddressable.
    struct FakeMsr {
        cpus: Vec<HashMap<u32, u64>>,
        reported: usize,
    }

    impl FakeMsr {
        fn uniform(count: usize, regs: &[(Msr, u64)]) -> Self {
            let file: HashMap<u32, u64> =
                regs.iter().map(|&(msr, value)| (msr.address(), value)).collect();
            Self {
                cpus: vec![file; count],
                reported: count,
            }
        }
    }

    impl MsrReader for FakeMsr {
        fn cpu_count(&self) -> usize {
            self.reported
        }

        fn read(&self, cpu: usize, msr: Msr) -> Result<u64, MsrReadError> {
            let file = self
                .cpus
                .get(cpu)
                .ok_or(MsrReadError::CpuNotFound(cpu))?;
            file.get(&msr.address()).copied().ok_or_else(|| {
                MsrReadError::Io(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "msr not modeled",
                ))
            })
        }
    }

    #[test]
    fn test_all_cpus_agree() {
        let fake = FakeMsr::uniform(4, &[(Msr::MtrrCap, 0x1dd9)]);
        let bank = MsrBank::new(&fake);
        assert_eq!(bank.read_consistent(Msr::MtrrCap).unwrap(), 0x1dd9);
    }

    #[test]
    fn test_single_diverging_cpu_fails() {
        let mut fake = FakeMsr::uniform(4, &[(Msr::FeatureControl, 0x5)]);
        fake.cpus[2].insert(Msr::FeatureControl.address(), 0x1);
        let bank = MsrBank::new(&fake);
        match bank.read_consistent(Msr::FeatureControl) {
            Err(HwError::CpuMismatch {
                msr: Msr::FeatureControl,
                cpu_a: 0,
                value_a: 0x5,
                cpu_b: 2,
                value_b: 0x1,
            }) => {}
            other => panic!("expected cpu mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_unaddressable_cpu_fails() {
        let mut fake = FakeMsr::uniform(2, &[(Msr::MtrrCap, 0)]);
        fake.reported = 4;
        let bank = MsrBank::new(&fake);
        match bank.read_consistent(Msr::MtrrCap) {
            Err(HwError::MsrAccess {
                msr: Msr::MtrrCap,
                source: MsrReadError::CpuNotFound(2),
            }) => {}
            other => panic!("expected cpu-not-found, got {other:?}"),
        }
    }

    #[test]
    fn test_io_error_is_wrapped_with_register_name() {
        let fake = FakeMsr::uniform(2, &[]);
        let bank = MsrBank::new(&fake);
        let err = bank.smrr_info().unwrap_err();
        assert!(err.to_string().contains("IA32_SMRR_PHYSBASE"));
    }

    #[test]
    fn test_has_smrr() {
        let fake = FakeMsr::uniform(2, &[(Msr::MtrrCap, 1 << 11)]);
        assert!(MsrBank::new(&fake).has_smrr().unwrap());

        let fake = FakeMsr::uniform(2, &[(Msr::MtrrCap, !(1u64 << 11))]);
        assert!(!MsrBank::new(&fake).has_smrr().unwrap());
    }

    #[test]
    fn test_smrr_decode() {
        let fake = FakeMsr::uniform(
            2,
            &[
                (Msr::SmrrPhysBase, 0x1234_5678),
                (Msr::SmrrPhysMask, 0xc000_0800),
            ],
        );
        let info = MsrBank::new(&fake).smrr_info().unwrap();
        assert!(info.active);
        assert_eq!(info.phys_base, 0x12345);
        assert_eq!(info.phys_mask, 0xc0000);
    }

    #[test]
    fn test_smrr_inactive_without_mask_valid_bit() {
        // Bit 11 of the mask register is clear.
        let fake = FakeMsr::uniform(
            2,
            &[(Msr::SmrrPhysBase, 0), (Msr::SmrrPhysMask, 0xffff_f000)],
        );
        let info = MsrBank::new(&fake).smrr_info().unwrap();
        assert!(!info.active);
    }

    #[test]
    fn test_feature_control_locked() {
        let fake = FakeMsr::uniform(2, &[(Msr::FeatureControl, 0x1)]);
        assert!(MsrBank::new(&fake).feature_control_locked().unwrap());

        let fake = FakeMsr::uniform(2, &[(Msr::FeatureControl, 0xfe)]);
        assert!(!MsrBank::new(&fake).feature_control_locked().unwrap());
    }

    #[test]
    fn test_vmx_in_smx_requires_all_bits() {
        let fake = FakeMsr::uniform(2, &[(Msr::FeatureControl, VMX_IN_SMX_BITS)]);
        assert!(MsrBank::new(&fake).vmx_allowed_in_smx().unwrap());

        let fake = FakeMsr::uniform(2, &[(Msr::FeatureControl, 1 << 1 | 1 << 5)]);
        assert!(!MsrBank::new(&fake).vmx_allowed_in_smx().unwrap());
    }

    #[test]
    fn test_txt_leaves_enabled() {
        // All legacy SENTER leaves enabled.
        let fake = FakeMsr::uniform(2, &[(Msr::FeatureControl, 0xff << 8)]);
        assert!(MsrBank::new(&fake).txt_leaves_enabled().unwrap());

        // Global enable only.
        let fake = FakeMsr::uniform(2, &[(Msr::FeatureControl, 0x100 << 8)]);
        assert!(MsrBank::new(&fake).txt_leaves_enabled().unwrap());

        // Partial legacy leaves, no global enable.
        let fake = FakeMsr::uniform(2, &[(Msr::FeatureControl, 0x40 << 8)]);
        assert!(!MsrBank::new(&fake).txt_leaves_enabled().unwrap());
    }

    #[test]
    fn test_debug_interface_decode() {
        let fake = FakeMsr::uniform(2, &[(Msr::DebugInterface, 1 | 1 << 31)]);
        let state = MsrBank::new(&fake).debug_interface().unwrap();
        assert!(state.enabled);
        assert!(!state.locked);
        assert!(state.pch_strap);

        let fake = FakeMsr::uniform(2, &[(Msr::DebugInterface, 1 << 30)]);
        let state = MsrBank::new(&fake).debug_interface().unwrap();
        assert!(!state.enabled);
        assert!(state.locked);
        assert!(!state.pch_strap);
    }

    #[test]
    fn test_platform_id_is_raw() {
        let fake = FakeMsr::uniform(2, &[(Msr::PlatformId, 1 << 50)]);
        assert_eq!(MsrBank::new(&fake).platform_id().unwrap(), 1 << 50);
    }
}
