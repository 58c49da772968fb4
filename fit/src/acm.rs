/*++

Licensed under the Apache-2.0 license.

File Name:

    acm.rs

Abstract:

    Authenticated Code Module header, information table and identity
    list parsing.

--*/

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::FirmwareError;

/// Number of bytes of an ACM the verification chain reads and parses.
pub const ACM_PARSE_WINDOW: usize = 896;

/// Chipset ACMs carry module type 2.
const ACM_MODULE_TYPE_CHIPSET: u16 = 2;

/// Identifies the ACM information table that follows the fixed header.
const ACM_INFO_TABLE_UUID: [u8; 16] = [
    0xaa, 0x3a, 0xc0, 0x7f, 0xa7, 0x46, 0xdb, 0x18, 0xac, 0x2e, 0x69, 0x8f, 0x8d, 0x41, 0x7f,
    0x5a,
];

/// Fixed ACM header layout.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug)]
struct AcmHeaderRaw {
    module_type: u16,
    module_subtype: u16,
    header_len: u32,
    header_version: u32,
    chipset_id: u16,
    flags: u16,
    module_vendor: u32,
    date: u32,
    size: u32,
    txt_svn: u16,
    se_svn: u16,
    code_control: u32,
    error_entry_point: u32,
    gdt_limit: u32,
    gdt_base: u32,
    seg_sel: u32,
    entry_point: u32,
    reserved: [u8; 64],
    key_size: u32,
    scratch_size: u32,
}

/// Information table following the fixed header. The list fields are
/// byte offsets from the start of the ACM.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug)]
struct AcmInfoTableRaw {
    uuid: [u8; 16],
    chipset_acm_type: u8,
    version: u8,
    length: u16,
    chipset_id_list: u32,
    os_sinit_data_ver: u32,
    min_mle_header_ver: u32,
    capabilities: u32,
    acm_version: u8,
    reserved: [u8; 3],
    processor_id_list: u32,
    tpm_info_list: u32,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug, Default)]
struct AcmChipsetIdRaw {
    flags: u32,
    vendor_id: u16,
    device_id: u16,
    revision_id: u16,
    reserved: [u16; 3],
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug, Default)]
struct AcmProcessorIdRaw {
    fms: u32,
    fms_mask: u32,
    platform_id: u64,
    platform_mask: u64,
}

bitflags::bitflags! {
    /// ACM header flag word.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct AcmFlags: u16 {
        /// Chipset revision ids match by mask instead of equality.
        const MASKED_CHIPSET_REVISION = 1 << 0;
        const PRE_PRODUCTION = 1 << 14;
        const DEBUG_SIGNED = 1 << 15;
    }
}

/// Decoded ACM header fields the verification chain consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcmHeader {
    pub module_type: u16,
    pub header_len: u32,
    pub header_version: u32,
    pub flags: AcmFlags,
    pub module_vendor: u32,
    pub date: u32,
    pub size: u32,
}

/// One chipset the ACM is authorized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcmChipsetId {
    pub flags: u32,
    pub vendor_id: u16,
    pub device_id: u16,
    pub revision_id: u16,
}

/// One processor family/model/stepping and platform the ACM is
/// authorized for. The masks select the significant bits of the live
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcmProcessorId {
    pub fms: u32,
    pub fms_mask: u32,
    pub platform_id: u64,
    pub platform_mask: u64,
}

/// TPM requirements advertised by the ACM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcmTpmInfo {
    pub capabilities: u32,
    pub algorithms: Vec<u16>,
}

/// Fully decoded ACM prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acm {
    pub header: AcmHeader,
    pub chipsets: Vec<AcmChipsetId>,
    pub processors: Vec<AcmProcessorId>,
    pub tpm: AcmTpmInfo,
}

const HEADER_SIZE: usize = core::mem::size_of::<AcmHeaderRaw>();
const INFO_TABLE_SIZE: usize = core::mem::size_of::<AcmInfoTableRaw>();

/// Parses the leading bytes of an ACM into its header and identity
/// lists. `buf` is expected to hold [`ACM_PARSE_WINDOW`] bytes starting
/// at the module's load address; every embedded offset is bounds-checked
/// against it.
pub fn parse_acm(buf: &[u8]) -> Result<Acm, FirmwareError> {
    if buf.len() < HEADER_SIZE + INFO_TABLE_SIZE {
        return Err(FirmwareError::AcmTooShort(buf.len()));
    }

    let raw = AcmHeaderRaw::read_from_prefix(buf).ok_or(FirmwareError::AcmTooShort(buf.len()))?;
    if raw.module_type != ACM_MODULE_TYPE_CHIPSET {
        return Err(FirmwareError::AcmModuleType(raw.module_type));
    }

    let info = AcmInfoTableRaw::read_from_prefix(&buf[HEADER_SIZE..])
        .ok_or(FirmwareError::AcmTooShort(buf.len()))?;
    if info.uuid != ACM_INFO_TABLE_UUID {
        return Err(FirmwareError::AcmInfoTableUuid);
    }

    let chipsets = parse_list::<AcmChipsetIdRaw>(buf, info.chipset_id_list, "chipset")?
        .into_iter()
        .map(|raw| AcmChipsetId {
            flags: raw.flags,
            vendor_id: raw.vendor_id,
            device_id: raw.device_id,
            revision_id: raw.revision_id,
        })
        .collect();

    let processors = parse_list::<AcmProcessorIdRaw>(buf, info.processor_id_list, "processor")?
        .into_iter()
        .map(|raw| AcmProcessorId {
            fms: raw.fms,
            fms_mask: raw.fms_mask,
            platform_id: raw.platform_id,
            platform_mask: raw.platform_mask,
        })
        .collect();

    let tpm = parse_tpm_info(buf, info.tpm_info_list)?;

    Ok(Acm {
        header: AcmHeader {
            module_type: raw.module_type,
            header_len: raw.header_len,
            header_version: raw.header_version,
            flags: AcmFlags::from_bits_retain(raw.flags),
            module_vendor: raw.module_vendor,
            date: raw.date,
            size: raw.size,
        },
        chipsets,
        processors,
        tpm,
    })
}

/// Reads a `count: u32`-prefixed array of `T` at `offset`. A zero
/// offset means the ACM carries no such list.
fn parse_list<T: FromBytes + Copy>(
    buf: &[u8],
    offset: u32,
    list: &'static str,
) -> Result<Vec<T>, FirmwareError> {
    if offset == 0 {
        return Ok(Vec::new());
    }
    let count = read_u32(buf, offset, list)?;
    let body = u64::from(offset) + 4;
    let end = body + u64::from(count) * core::mem::size_of::<T>() as u64;
    if end > buf.len() as u64 {
        return Err(FirmwareError::AcmListOutOfRange { list, offset, end });
    }
    let mut items = Vec::with_capacity(count as usize);
    for idx in 0..count as usize {
        let at = body as usize + idx * core::mem::size_of::<T>();
        items.push(
            T::read_from_prefix(&buf[at..])
                .ok_or(FirmwareError::AcmListOutOfRange { list, offset, end })?,
        );
    }
    Ok(items)
}

fn parse_tpm_info(buf: &[u8], offset: u32) -> Result<AcmTpmInfo, FirmwareError> {
    const LIST: &str = "tpm";
    if offset == 0 {
        return Ok(AcmTpmInfo::default());
    }
    let capabilities = read_u32(buf, offset, LIST)?;
    let count = read_u32(buf, offset + 4, LIST)?;
    let body = u64::from(offset) + 8;
    let end = body + u64::from(count) * 2;
    if end > buf.len() as u64 {
        return Err(FirmwareError::AcmListOutOfRange { list: LIST, offset, end });
    }
    let mut algorithms = Vec::with_capacity(count as usize);
    for idx in 0..count as usize {
        let at = body as usize + idx * 2;
        algorithms.push(u16::from_le_bytes([buf[at], buf[at + 1]]));
    }
    Ok(AcmTpmInfo {
        capabilities,
        algorithms,
    })
}

fn read_u32(buf: &[u8], offset: u32, list: &'static str) -> Result<u32, FirmwareError> {
    let offset = offset as usize;
    buf.get(offset..offset + 4)
        .and_then(u32::read_from)
        .ok_or(FirmwareError::AcmListOutOfRange {
            list,
            offset: offset as u32,
            end: offset as u64 + 4,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a well-formed ACM parse window with one chipset and one
    /// processor id, plus a two-algorithm TPM list.
    fn synth_acm(flags: u16) -> Vec<u8> {
        let mut buf = vec![0u8; ACM_PARSE_WINDOW];
        let mut header = AcmHeaderRaw::new_zeroed();
        header.module_type = ACM_MODULE_TYPE_CHIPSET;
        header.header_len = 192;
        header.header_version = 0x0003_0000;
        header.flags = flags;
        header.module_vendor = 0x8086;
        header.date = 0x2024_0101;
        header.size = 0x8000;
        buf[..HEADER_SIZE].copy_from_slice(header.as_bytes());

        let chipset_off = (HEADER_SIZE + INFO_TABLE_SIZE) as u32;
        let processor_off = chipset_off + 4 + 16;
        let tpm_off = processor_off + 4 + 24;
        let mut info = AcmInfoTableRaw::new_zeroed();
        info.uuid = ACM_INFO_TABLE_UUID;
        info.chipset_acm_type = 1;
        info.version = 5;
        info.length = INFO_TABLE_SIZE as u16;
        info.chipset_id_list = chipset_off;
        info.processor_id_list = processor_off;
        info.tpm_info_list = tpm_off;
        buf[HEADER_SIZE..HEADER_SIZE + INFO_TABLE_SIZE].copy_from_slice(info.as_bytes());

        let chipset = AcmChipsetIdRaw {
            flags: 0,
            vendor_id: 0x8086,
            device_id: 0x1234,
            revision_id: 0b1010,
            reserved: [0; 3],
        };
        buf[chipset_off as usize..chipset_off as usize + 4].copy_from_slice(&1u32.to_le_bytes());
        buf[chipset_off as usize + 4..chipset_off as usize + 20]
            .copy_from_slice(chipset.as_bytes());

        let processor = AcmProcessorIdRaw {
            fms: 0x0006_06A0,
            fms_mask: 0x0fff_0ff0,
            platform_id: 1 << 50,
            platform_mask: 0x1c << 48,
        };
        buf[processor_off as usize..processor_off as usize + 4]
            .copy_from_slice(&1u32.to_le_bytes());
        buf[processor_off as usize + 4..processor_off as usize + 28]
            .copy_from_slice(processor.as_bytes());

        buf[tpm_off as usize..tpm_off as usize + 4].copy_from_slice(&0x21u32.to_le_bytes());
        buf[tpm_off as usize + 4..tpm_off as usize + 8].copy_from_slice(&2u32.to_le_bytes());
        buf[tpm_off as usize + 8..tpm_off as usize + 10]
            .copy_from_slice(&0x000bu16.to_le_bytes());
        buf[tpm_off as usize + 10..tpm_off as usize + 12]
            .copy_from_slice(&0x0004u16.to_le_bytes());
        buf
    }

    #[test]
    fn test_parse_acm() {
        let acm = parse_acm(&synth_acm(1)).unwrap();
        assert_eq!(acm.header.header_len, 192);
        assert!(acm.header.flags.contains(AcmFlags::MASKED_CHIPSET_REVISION));
        assert_eq!(acm.header.module_vendor, 0x8086);
        assert_eq!(acm.chipsets.len(), 1);
        assert_eq!(acm.chipsets[0].device_id, 0x1234);
        assert_eq!(acm.chipsets[0].revision_id, 0b1010);
        assert_eq!(acm.processors.len(), 1);
        assert_eq!(acm.processors[0].fms, 0x0006_06A0);
        assert_eq!(acm.processors[0].platform_id, 1 << 50);
        assert_eq!(acm.tpm.capabilities, 0x21);
        assert_eq!(acm.tpm.algorithms, vec![0x000b, 0x0004]);
    }

    #[test]
    fn test_flags_clear() {
        let acm = parse_acm(&synth_acm(0)).unwrap();
        assert!(!acm.header.flags.contains(AcmFlags::MASKED_CHIPSET_REVISION));
    }

    #[test]
    fn test_short_buffer() {
        assert_eq!(
            parse_acm(&[0u8; 64]),
            Err(FirmwareError::AcmTooShort(64))
        );
    }

    #[test]
    fn test_wrong_module_type() {
        let mut buf = synth_acm(0);
        buf[0] = 9;
        assert_eq!(parse_acm(&buf), Err(FirmwareError::AcmModuleType(9)));
    }

    #[test]
    fn test_bad_uuid() {
        let mut buf = synth_acm(0);
        buf[HEADER_SIZE] ^= 0xff;
        assert_eq!(parse_acm(&buf), Err(FirmwareError::AcmInfoTableUuid));
    }

    #[test]
    fn test_list_offset_out_of_bounds() {
        let mut buf = synth_acm(0);
        let info_off = HEADER_SIZE + 20;
        // Point the chipset list past the parse window.
        buf[info_off..info_off + 4].copy_from_slice(&0x4000u32.to_le_bytes());
        assert!(matches!(
            parse_acm(&buf),
            Err(FirmwareError::AcmListOutOfRange { list: "chipset", .. })
        ));
    }

    #[test]
    fn test_oversized_count_is_rejected() {
        let mut buf = synth_acm(0);
        let chipset_off = HEADER_SIZE + INFO_TABLE_SIZE;
        buf[chipset_off..chipset_off + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            parse_acm(&buf),
            Err(FirmwareError::AcmListOutOfRange { list: "chipset", .. })
        ));
    }
}
