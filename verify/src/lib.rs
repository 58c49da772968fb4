/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Boot integrity verification chain. Runs an ordered catalog of
    checks against the loaded firmware image and the live platform.

--*/

mod checks;
mod image;

pub use image::{FitImage, ImageError};

use thiserror::Error;
use txt_fit::{extract_fit, parse_acm, Acm, FirmwareError, FitEntry, FitEntryKind, ACM_PARSE_WINDOW};
use txt_hw_api::{HwError, MsrReader, PhysMem, TxtRegs};

/// Why a check could not be evaluated.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("no firmware image loaded")]
    NoImageLoaded,

    #[error("no startup acm entry in fit")]
    NoAcmInFit,

    #[error("unknown txt policy record version {0}")]
    UnknownPolicyVersion(u16),

    #[error("indexed i/o txt policy pointers are not supported")]
    UnsupportedPolicyPointer,

    #[error("malformed firmware structure: {0}")]
    Firmware(#[from] FirmwareError),

    #[error(transparent)]
    Hw(#[from] HwError),
}

/// Outcome of one check. `Fail` means the condition was evaluated and
/// found violated; `Inconclusive` means it could not be evaluated and
/// must never be conflated with `Fail`.
#[derive(Debug)]
pub enum CheckResult {
    Pass,
    Fail,
    Inconclusive(CheckError),
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        matches!(self, CheckResult::Pass)
    }
}

/// One named check of the verification chain.
pub struct Check {
    name: &'static str,
    required: bool,
    run: fn(&VerifyContext) -> Result<bool, CheckError>,
}

impl Check {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn run(&self, ctx: &VerifyContext) -> CheckResult {
        match (self.run)(ctx) {
            Ok(true) => CheckResult::Pass,
            Ok(false) => CheckResult::Fail,
            Err(err) => CheckResult::Inconclusive(err),
        }
    }
}

/// The verification chain, in catalog order. Checks are independent;
/// running one never affects another.
pub const CHECKS: &[Check] = &[
    Check {
        name: "Has FIT",
        required: true,
        run: checks::has_fit,
    },
    Check {
        name: "FIT has a BIOS ACM entry",
        required: true,
        run: checks::has_bios_acm,
    },
    Check {
        name: "FIT has an initial bootblock entry",
        required: true,
        run: checks::has_ibb,
    },
    Check {
        name: "FIT has a BIOS policy entry",
        required: true,
        run: checks::has_bios_policy,
    },
    Check {
        name: "Initial bootblock covers reset vector",
        required: true,
        run: checks::ibb_covers_reset_vector,
    },
    Check {
        name: "Initial bootblock entries do not overlap",
        required: true,
        run: checks::no_ibb_overlap,
    },
    Check {
        name: "BIOS ACM does not overlap initial bootblock",
        required: true,
        run: checks::no_bios_acm_overlap,
    },
    Check {
        name: "BIOS ACM is below 4 GiB",
        required: true,
        run: checks::bios_acm_below_4gib,
    },
    Check {
        name: "TXT policy record allows TXT",
        required: true,
        run: checks::policy_allows_txt,
    },
    Check {
        name: "BIOS ACM header is well formed",
        required: true,
        run: checks::bios_acm_valid,
    },
    Check {
        name: "BIOS ACM header length is a multiple of 64",
        required: true,
        run: checks::bios_acm_header_len,
    },
    Check {
        name: "BIOS ACM is aligned to 128 KiB",
        required: true,
        run: checks::bios_acm_alignment,
    },
    Check {
        name: "BIOS ACM matches the chipset",
        required: true,
        run: checks::bios_acm_matches_chipset,
    },
    Check {
        name: "BIOS ACM matches the CPU",
        required: true,
        run: checks::bios_acm_matches_cpu,
    },
];

/// Runs every check of the catalog strictly in order. One check's
/// outcome never short-circuits the rest.
pub fn run_all(ctx: &VerifyContext) -> Vec<(&'static Check, CheckResult)> {
    CHECKS.iter().map(|check| (check, check.run(ctx))).collect()
}

/// Everything one verification run operates on: the loaded image plus
/// the live hardware collaborators. Checks borrow this immutably and
/// re-derive FIT/ACM structures on every call.
pub struct VerifyContext<'a> {
    image: Option<&'a FitImage>,
    mem: &'a dyn PhysMem,
    msrs: &'a dyn MsrReader,
    txt: &'a dyn TxtRegs,
}

impl<'a> VerifyContext<'a> {
    pub fn new(mem: &'a dyn PhysMem, msrs: &'a dyn MsrReader, txt: &'a dyn TxtRegs) -> Self {
        Self {
            image: None,
            mem,
            msrs,
            txt,
        }
    }

    pub fn with_image(mut self, image: &'a FitImage) -> Self {
        self.image = Some(image);
        self
    }

    pub(crate) fn mem(&self) -> &dyn PhysMem {
        self.mem
    }

    pub(crate) fn msrs(&self) -> &dyn MsrReader {
        self.msrs
    }

    pub(crate) fn txt(&self) -> &dyn TxtRegs {
        self.txt
    }

    pub(crate) fn fit_entries(&self) -> Result<Vec<FitEntry>, CheckError> {
        let image = self.image.ok_or(CheckError::NoImageLoaded)?;
        Ok(extract_fit(image.bytes())?)
    }

    pub(crate) fn startup_acm_entry(&self) -> Result<FitEntry, CheckError> {
        self.fit_entries()?
            .into_iter()
            .find(|entry| entry.kind == FitEntryKind::StartupAcm)
            .ok_or(CheckError::NoAcmInFit)
    }

    /// Reads the ACM parse window from live memory. The module may sit
    /// below the cached image window, so this never reads the image.
    pub(crate) fn read_acm_window(&self, entry: &FitEntry) -> Result<Vec<u8>, CheckError> {
        let mut buf = vec![0u8; ACM_PARSE_WINDOW];
        self.mem.read_into(entry.address, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn startup_acm(&self) -> Result<Acm, CheckError> {
        let entry = self.startup_acm_entry()?;
        let buf = self.read_acm_window(&entry)?;
        Ok(parse_acm(&buf)?)
    }
}
