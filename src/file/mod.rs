//! PE container access for .NET assemblies.
//!
//! [`File`] wraps a parsed PE image (via goblin) together with its backing bytes, either
//! memory-mapped from disk or owned in memory. It validates on load that the image
//! carries a CLR runtime header, and provides the two address-space services the
//! metadata layer needs: locating the CLR directory and translating RVAs to file
//! offsets through the section table.

pub(crate) mod io;
pub mod memory;
pub mod parser;
pub mod physical;

use std::path::Path;

use goblin::pe::{header::Header, section_table::SectionTable, PE};
use ouroboros::self_referencing;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};
use memory::Memory;
use physical::Physical;

/// Backend trait for file data sources.
///
/// Abstracts over where the PE bytes live (memory-mapped file or owned buffer) so the
/// rest of the crate works off plain slices.
pub trait Backend {
    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

#[self_referencing]
/// A loaded .NET PE file.
///
/// Parsing is done once at load time; accessors borrow into the parsed structure. A
/// file without a CLR runtime header directory is rejected, since nothing else in this
/// crate can do useful work with it.
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed PE structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Loads a PE file from the given path via memory mapping.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not a valid PE image, or has no
    /// CLR runtime header.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Loads a PE file from a memory buffer.
    ///
    /// # Errors
    /// Returns an error if the buffer is empty, is not a valid PE image, or has no CLR
    /// runtime header.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| {
            match PE::parse(data.as_ref().data()) {
                Ok(pe) => match &pe.header.optional_header {
                    Some(optional_header) => {
                        if optional_header
                            .data_directories
                            .get_clr_runtime_header()
                            .is_none()
                        {
                            Err(malformed_error!(
                                "File does not have a CLR runtime header directory"
                            ))
                        } else {
                            Ok(pe)
                        }
                    }
                    None => Err(malformed_error!("File does not have an OptionalHeader")),
                },
                Err(error) => Err(GoblinErr(error)),
            }
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the file has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the raw bytes of the whole file.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns a bounds-checked slice of the file data.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the requested range exceeds the file.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let data = self.data();
        let Some(end) = offset.checked_add(len) else {
            return Err(crate::Error::OutOfBounds);
        };
        if end > data.len() {
            return Err(crate::Error::OutOfBounds);
        }
        Ok(&data[offset..end])
    }

    /// Returns a reference to the PE header.
    #[must_use]
    pub fn header(&self) -> &Header {
        self.with_pe(|pe| &pe.header)
    }

    /// Returns the RVA and size of the CLR runtime header directory.
    ///
    /// Presence was validated at load time.
    #[must_use]
    pub fn clr(&self) -> (u32, u32) {
        self.with_pe(|pe| {
            match pe
                .header
                .optional_header
                .as_ref()
                .and_then(|header| header.data_directories.get_clr_runtime_header())
            {
                Some(directory) => (directory.virtual_address, directory.size),
                // Unreachable after load-time validation; a zero directory fails later
                // reads with OutOfBounds rather than panicking here.
                None => (0, 0),
            }
        })
    }

    /// Iterates over the PE section table.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// Converts a relative virtual address to a file offset via the section table.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the RVA is not covered by any section.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        self.with_pe(|pe| {
            let rva_u32 = u32::try_from(rva)
                .map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

            for section in &pe.sections {
                let Some(section_max) = section.virtual_address.checked_add(section.virtual_size)
                else {
                    return Err(malformed_error!(
                        "Section malformed, causing integer overflow - {} + {}",
                        section.virtual_address,
                        section.virtual_size
                    ));
                };

                if section.virtual_address <= rva_u32 && section_max > rva_u32 {
                    return Ok((rva - section.virtual_address as usize)
                        + section.pointer_to_raw_data as usize);
                }
            }

            Err(malformed_error!(
                "RVA could not be converted to offset - {}",
                rva
            ))
        })
    }
}
