/*++

Licensed under the Apache-2.0 license.

File Name:

    fit.rs

Abstract:

    Firmware Interface Table extraction.

--*/

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::{FirmwareError, FIT_POINTER, FOUR_GIB};

/// `_FIT_   ` in the address field of record 0.
const FIT_SIGNATURE: u64 = 0x2020_205F_5449_465F;

const FIT_RECORD_SIZE: usize = 16;

/// On-flash layout of one 16-byte FIT record.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug, Default)]
struct FitRecord {
    address: u64,
    size: [u8; 3],
    reserved: u8,
    version: u16,
    kind_and_cv: u8,
    checksum: u8,
}

impl FitRecord {
    /// 24-bit size field, in 16-byte units.
    fn size_units(&self) -> u32 {
        u32::from(self.size[0]) | u32::from(self.size[1]) << 8 | u32::from(self.size[2]) << 16
    }

    /// Record kind; bit 7 of the same byte is the checksum-valid flag.
    fn kind(&self) -> u8 {
        self.kind_and_cv & 0x7f
    }
}

/// Kinds of boot components a FIT record can describe.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FitEntryKind {
    FitHeader,
    MicrocodeUpdate,
    StartupAcm,
    DiagnosticAcm,
    BiosStartupModule,
    TpmPolicy,
    BiosPolicy,
    TxtPolicy,
    KeyManifest,
    BootPolicyManifest,
    CseSecureBoot,
    JmpDebugPolicy,
    Skip,
    Other(u8),
}

impl FitEntryKind {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::FitHeader,
            0x01 => Self::MicrocodeUpdate,
            0x02 => Self::StartupAcm,
            0x03 => Self::DiagnosticAcm,
            0x07 => Self::BiosStartupModule,
            0x08 => Self::TpmPolicy,
            0x09 => Self::BiosPolicy,
            0x0a => Self::TxtPolicy,
            0x0b => Self::KeyManifest,
            0x0c => Self::BootPolicyManifest,
            0x10 => Self::CseSecureBoot,
            0x2d => Self::JmpDebugPolicy,
            0x7f => Self::Skip,
            other => Self::Other(other),
        }
    }
}

/// One decoded FIT record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FitEntry {
    pub kind: FitEntryKind,

    /// Physical load address of the component.
    pub address: u64,

    /// Component length in bytes.
    pub size: u32,

    pub version: u16,
}

impl FitEntry {
    /// Exclusive end of the component's physical address range,
    /// saturating at the top of the address space. A record whose range
    /// would wrap stays an out-of-range record instead of folding back
    /// to low memory.
    pub fn end(&self) -> u64 {
        self.address.saturating_add(u64::from(self.size))
    }

    /// True if the half-open address ranges of `self` and `other`
    /// intersect. Ranges that merely touch do not overlap.
    pub fn overlaps(&self, other: &FitEntry) -> bool {
        !(self.address >= other.end() || other.address >= self.end())
    }

    /// True if `[address, address + len)` lies entirely inside this entry.
    pub fn covers(&self, address: u64, len: u64) -> bool {
        self.address <= address && self.end() >= address + len
    }
}

/// Decodes all FIT records from a firmware image representing the
/// physical window `[4 GiB - image.len(), 4 GiB)`.
///
/// The header record is consumed for validation and not returned.
pub fn extract_fit(image: &[u8]) -> Result<Vec<FitEntry>, FirmwareError> {
    if image.len() < 0x40 || image.len() as u64 > FOUR_GIB {
        return Err(FirmwareError::BadImageSize(image.len()));
    }
    let base = FOUR_GIB - image.len() as u64;

    let ptr_offset = (FIT_POINTER - base) as usize;
    let ptr = u64::read_from_prefix(&image[ptr_offset..ptr_offset + 8])
        .ok_or(FirmwareError::BadImageSize(image.len()))?;
    if ptr < base || ptr > FOUR_GIB - FIT_RECORD_SIZE as u64 {
        return Err(FirmwareError::FitPointerOutOfRange(ptr));
    }

    let table_offset = (ptr - base) as usize;
    let header = record_at(image, table_offset).ok_or(FirmwareError::FitTruncated { count: 1 })?;
    if header.kind() != 0 || header.address != FIT_SIGNATURE {
        return Err(FirmwareError::FitSignature);
    }

    // The header's size field holds the total record count.
    let count = header.size_units();
    if count == 0 {
        return Err(FirmwareError::FitSignature);
    }
    let table_end = table_offset as u64 + u64::from(count) * FIT_RECORD_SIZE as u64;
    if table_end > image.len() as u64 {
        return Err(FirmwareError::FitTruncated { count });
    }

    let mut entries = Vec::with_capacity(count as usize - 1);
    for idx in 1..count as usize {
        let record = record_at(image, table_offset + idx * FIT_RECORD_SIZE)
            .ok_or(FirmwareError::FitTruncated { count })?;
        entries.push(FitEntry {
            kind: FitEntryKind::from_raw(record.kind()),
            address: record.address,
            size: record.size_units().saturating_mul(16),
            version: record.version,
        });
    }
    Ok(entries)
}

fn record_at(image: &[u8], offset: usize) -> Option<FitRecord> {
    FitRecord::read_from_prefix(image.get(offset..)?)
}
