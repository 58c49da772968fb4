/*++

Licensed under the Apache-2.0 license.

File Name:

    image.rs

Abstract:

    Loader for the firmware image window at the top of 32-bit physical
    memory.

--*/

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use txt_fit::{FIT_IMAGE_BASE, FIT_IMAGE_SIZE};
use txt_hw_api::{HwError, PhysMem};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("cannot read firmware image from {path}: {source}")]
    File { path: PathBuf, source: io::Error },

    #[error("firmware image must be {FIT_IMAGE_SIZE} bytes, got {0}")]
    WrongSize(usize),

    #[error(transparent)]
    Hw(#[from] HwError),
}

/// The 16 MiB firmware window `[4 GiB - 16 MiB, 4 GiB)`, read-only once
/// loaded. Loading either produces the full window or fails; a short
/// image is never observable.
pub struct FitImage {
    data: Box<[u8]>,
}

impl FitImage {
    /// Wraps an already-read window, validating its size.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        if data.len() != FIT_IMAGE_SIZE {
            return Err(ImageError::WrongSize(data.len()));
        }
        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    /// Reads the window from a firmware dump laid out at physical
    /// addresses, i.e. the image bytes sit at file offset 4 GiB - 16 MiB.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let wrap = |source| ImageError::File {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(wrap)?;
        file.seek(SeekFrom::Start(FIT_IMAGE_BASE)).map_err(wrap)?;
        let mut data = vec![0u8; FIT_IMAGE_SIZE];
        file.read_exact(&mut data).map_err(wrap)?;
        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    /// Reads the window from live physical memory, byte by byte,
    /// aborting on the first failed read.
    pub fn from_phys_mem(mem: &dyn PhysMem) -> Result<Self, ImageError> {
        let mut data = vec![0u8; FIT_IMAGE_SIZE];
        for (idx, slot) in data.iter_mut().enumerate() {
            *slot = mem.read_byte(FIT_IMAGE_BASE + idx as u64)?;
        }
        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_rejects_short_buffer() {
        assert!(matches!(
            FitImage::from_bytes(vec![0u8; 0x1000]),
            Err(ImageError::WrongSize(0x1000))
        ));
    }

    #[test]
    fn test_from_bytes_accepts_full_window() {
        let image = FitImage::from_bytes(vec![0u8; FIT_IMAGE_SIZE]).unwrap();
        assert_eq!(image.bytes().len(), FIT_IMAGE_SIZE);
    }

    #[test]
    fn test_from_phys_mem_aborts_on_read_error() {
        struct Faulty;
        impl PhysMem for Faulty {
            fn read_byte(&self, addr: u64) -> Result<u8, HwError> {
                Err(HwError::PhysMem {
                    addr,
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "no /dev/mem"),
                })
            }

            fn read_into(&self, addr: u64, _buf: &mut [u8]) -> Result<(), HwError> {
                Err(HwError::PhysMem {
                    addr,
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "no /dev/mem"),
                })
            }
        }
        assert!(matches!(
            FitImage::from_phys_mem(&Faulty),
            Err(ImageError::Hw(HwError::PhysMem { addr, .. })) if addr == FIT_IMAGE_BASE
        ));
    }
}
