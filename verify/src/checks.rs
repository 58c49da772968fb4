/*++

Licensed under the Apache-2.0 license.

File Name:

    checks.rs

Abstract:

    The individual checks of the boot integrity verification chain.

--*/

use txt_fit::{AcmFlags, FitEntry, FitEntryKind, FOUR_GIB, RESET_VECTOR};
use txt_hw_api::MsrBank;

use crate::{CheckError, VerifyContext};

/// Load addresses of startup ACMs must be 128 KiB aligned.
const ACM_ALIGNMENT: u64 = 128 * 1024;

fn ibbs(entries: &[FitEntry]) -> impl Iterator<Item = &FitEntry> {
    entries
        .iter()
        .filter(|entry| entry.kind == FitEntryKind::BiosStartupModule)
}

pub(crate) fn has_fit(ctx: &VerifyContext) -> Result<bool, CheckError> {
    Ok(!ctx.fit_entries()?.is_empty())
}

pub(crate) fn has_bios_acm(ctx: &VerifyContext) -> Result<bool, CheckError> {
    let count = ctx
        .fit_entries()?
        .iter()
        .filter(|entry| entry.kind == FitEntryKind::StartupAcm)
        .count();
    Ok(count == 1)
}

pub(crate) fn has_ibb(ctx: &VerifyContext) -> Result<bool, CheckError> {
    Ok(ibbs(&ctx.fit_entries()?).next().is_some())
}

pub(crate) fn has_bios_policy(ctx: &VerifyContext) -> Result<bool, CheckError> {
    Ok(ctx
        .fit_entries()?
        .iter()
        .any(|entry| entry.kind == FitEntryKind::BiosPolicy))
}

pub(crate) fn ibb_covers_reset_vector(ctx: &VerifyContext) -> Result<bool, CheckError> {
    let entries = ctx.fit_entries()?;
    let covered = ibbs(&entries).any(|entry| entry.covers(RESET_VECTOR, 4));
    Ok(covered)
}

pub(crate) fn no_ibb_overlap(ctx: &VerifyContext) -> Result<bool, CheckError> {
    let entries = ctx.fit_entries()?;
    let ibbs: Vec<&FitEntry> = ibbs(&entries).collect();
    for (idx, first) in ibbs.iter().enumerate() {
        for second in &ibbs[idx + 1..] {
            if first.overlaps(second) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

pub(crate) fn no_bios_acm_overlap(ctx: &VerifyContext) -> Result<bool, CheckError> {
    let entries = ctx.fit_entries()?;
    for acm in entries
        .iter()
        .filter(|entry| entry.kind == FitEntryKind::StartupAcm)
    {
        if ibbs(&entries).any(|ibb| ibb.overlaps(acm)) {
            return Ok(false);
        }
    }
    Ok(true)
}

pub(crate) fn bios_acm_below_4gib(ctx: &VerifyContext) -> Result<bool, CheckError> {
    Ok(ctx
        .fit_entries()?
        .iter()
        .filter(|entry| entry.kind == FitEntryKind::StartupAcm)
        .all(|entry| entry.end() <= FOUR_GIB))
}

/// A TXT policy record may disable TXT. Version 1 records point at a
/// live memory byte whose bit 0 grants TXT; a missing record means TXT
/// is implicitly allowed.
pub(crate) fn policy_allows_txt(ctx: &VerifyContext) -> Result<bool, CheckError> {
    let entries = ctx.fit_entries()?;
    let Some(policy) = entries
        .iter()
        .find(|entry| entry.kind == FitEntryKind::TxtPolicy)
    else {
        return Ok(true);
    };
    match policy.version {
        0 => Err(CheckError::UnsupportedPolicyPointer),
        1 => Ok(ctx.mem().read_byte(policy.address)? & 1 != 0),
        version => Err(CheckError::UnknownPolicyVersion(version)),
    }
}

/// A module that does not parse surfaces its codec error as the cause,
/// like every other check consuming the ACM; the verdict is never
/// collapsed to a plain failure.
pub(crate) fn bios_acm_valid(ctx: &VerifyContext) -> Result<bool, CheckError> {
    ctx.startup_acm()?;
    Ok(true)
}

pub(crate) fn bios_acm_header_len(ctx: &VerifyContext) -> Result<bool, CheckError> {
    Ok(ctx.startup_acm()?.header.header_len % 64 == 0)
}

pub(crate) fn bios_acm_alignment(ctx: &VerifyContext) -> Result<bool, CheckError> {
    Ok(ctx.startup_acm_entry()?.address % ACM_ALIGNMENT == 0)
}

/// Scans the ACM's chipset id list against the live TXT DIDVID. The
/// revision comparison is masked (every revision bit the ACM names must
/// be present live) when the ACM flags select it, exact otherwise.
pub(crate) fn bios_acm_matches_chipset(ctx: &VerifyContext) -> Result<bool, CheckError> {
    let acm = ctx.startup_acm()?;
    let didvid = ctx.txt().didvid()?;
    let masked = acm
        .header
        .flags
        .contains(AcmFlags::MASKED_CHIPSET_REVISION);
    Ok(acm.chipsets.iter().any(|chipset| {
        chipset.vendor_id == didvid.vendor_id
            && chipset.device_id == didvid.device_id
            && if masked {
                chipset.revision_id & didvid.revision_id == chipset.revision_id
            } else {
                chipset.revision_id == didvid.revision_id
            }
    }))
}

pub(crate) fn bios_acm_matches_cpu(ctx: &VerifyContext) -> Result<bool, CheckError> {
    let acm = ctx.startup_acm()?;
    let fms = ctx.txt().cpu_signature();
    let platform_id = MsrBank::new(ctx.msrs()).platform_id()?;
    Ok(acm.processors.iter().any(|processor| {
        fms & processor.fms_mask == processor.fms
            && platform_id & processor.platform_mask == processor.platform_id
    }))
}
