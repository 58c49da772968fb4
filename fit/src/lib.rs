/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Codec for the Firmware Interface Table and the Authenticated Code
    Modules it references.

--*/

mod acm;
mod fit;

pub use acm::{
    parse_acm, Acm, AcmChipsetId, AcmFlags, AcmHeader, AcmProcessorId, AcmTpmInfo,
    ACM_PARSE_WINDOW,
};
pub use fit::{extract_fit, FitEntry, FitEntryKind};

use thiserror::Error;

/// Size of the firmware image window at the top of 32-bit physical memory.
pub const FIT_IMAGE_SIZE: usize = 16 * 1024 * 1024;

pub const FOUR_GIB: u64 = 0x1_0000_0000;

/// Physical base address of the firmware image window.
pub const FIT_IMAGE_BASE: u64 = FOUR_GIB - FIT_IMAGE_SIZE as u64;

/// Physical address the CPU starts executing from after reset.
pub const RESET_VECTOR: u64 = 0xFFFF_FFF0;

/// Physical address of the 64-bit pointer to the FIT table.
pub const FIT_POINTER: u64 = 0xFFFF_FFC0;

/// Structural violations in externally supplied firmware bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    #[error("firmware image of {0} bytes cannot represent the top-of-memory window")]
    BadImageSize(usize),

    #[error("fit pointer {0:#x} lies outside the firmware image window")]
    FitPointerOutOfRange(u64),

    #[error("fit header record has a bad signature or type")]
    FitSignature,

    #[error("fit table with {count} records is truncated by the image boundary")]
    FitTruncated { count: u32 },

    #[error("acm buffer of {0} bytes is shorter than the fixed header and info table")]
    AcmTooShort(usize),

    #[error("acm module type {0} is not a chipset acm")]
    AcmModuleType(u16),

    #[error("acm information table uuid mismatch")]
    AcmInfoTableUuid,

    #[error("acm {list} id list at {offset:#x}..{end:#x} lies outside the parse window")]
    AcmListOutOfRange {
        list: &'static str,
        offset: u32,
        end: u64,
    },
}
