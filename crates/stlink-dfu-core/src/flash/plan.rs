//! Chunk layout and erase planning per bootloader variant.
//!
//! The whole run is planned before the first USB exchange, so an image that
//! runs past known flash is rejected before anything is erased.

use crate::protocol::constants::*;
use crate::session::BootloaderVariant;

use super::FlashError;

/// Erase issued before a chunk is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseCommand {
    /// V2: erase the page holding this address.
    Page(u32),
    /// V3: erase the sector with this index.
    Sector(u8),
}

/// One erase/set-address/download cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkStep {
    /// Offset into the firmware image.
    pub offset: usize,
    /// Bytes of firmware in this chunk (short for the last one).
    pub length: usize,
    /// Flash address the chunk is written to.
    pub address: u32,
    pub erase: Option<EraseCommand>,
    /// DNLOAD block number of the data phase.
    pub block: u16,
}

/// Addressing and erase layout for one bootloader generation.
#[derive(Debug, Clone)]
pub struct FlashPlan {
    pub variant: BootloaderVariant,
    pub base_address: u32,
    pub chunk_size: usize,
    sectors: &'static [u32],
    flash_end: Option<u32>,
}

impl FlashPlan {
    pub fn for_variant(variant: BootloaderVariant) -> Self {
        match variant {
            BootloaderVariant::V2 => Self {
                variant,
                base_address: V2_BASE_ADDRESS,
                chunk_size: CHUNK_SIZE,
                sectors: &[],
                flash_end: None,
            },
            BootloaderVariant::V3 => Self {
                variant,
                base_address: V3_BASE_ADDRESS,
                chunk_size: CHUNK_SIZE,
                sectors: &V3_SECTOR_STARTS,
                flash_end: Some(V3_FLASH_END),
            },
        }
    }

    /// Index of the sector starting exactly at `address`.
    pub fn sector_index(&self, address: u32) -> Option<usize> {
        if address % V3_SECTOR_ALIGN != 0 {
            return None;
        }
        self.sectors.iter().position(|&start| start == address)
    }

    /// Index of the sector holding `address`.
    pub fn sector_containing(&self, address: u32) -> Option<usize> {
        let end = self.flash_end?;
        if address >= end {
            return None;
        }
        self.sectors.iter().rposition(|&start| start <= address)
    }

    /// Lay out every chunk of an image of `image_len` bytes.
    pub fn plan(&self, image_len: usize) -> Result<Vec<ChunkStep>, FlashError> {
        if image_len == 0 {
            return Err(FlashError::EmptyImage);
        }

        let mut steps = Vec::with_capacity(image_len.div_ceil(self.chunk_size));
        let mut erased_sector: Option<usize> = None;

        for offset in (0..image_len).step_by(self.chunk_size) {
            let length = self.chunk_size.min(image_len - offset);
            let address = u32::try_from(offset)
                .ok()
                .and_then(|o| self.base_address.checked_add(o))
                .ok_or(FlashError::ImageTooLarge { len: image_len })?;

            let (erase, block) = match self.variant {
                BootloaderVariant::V2 => (Some(EraseCommand::Page(address)), BLOCK_DATA),
                BootloaderVariant::V3 => match self.sector_index(address) {
                    Some(index) => {
                        erased_sector = Some(index);
                        (Some(EraseCommand::Sector(index as u8)), BLOCK_DATA)
                    }
                    None if erased_sector.is_some()
                        && self.sector_containing(address) == erased_sector =>
                    {
                        (None, BLOCK_CONTINUATION)
                    }
                    None => return Err(FlashError::UnknownSector { address }),
                },
            };

            steps.push(ChunkStep {
                offset,
                length,
                address,
                erase,
                block,
            });
        }

        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_plan() {
        let plan = FlashPlan::for_variant(BootloaderVariant::V2);
        let steps = plan.plan(2500).unwrap();

        assert_eq!(steps.len(), 3);
        let lengths: Vec<_> = steps.iter().map(|s| s.length).collect();
        assert_eq!(lengths, vec![1024, 1024, 452]);
        for step in &steps {
            assert_eq!(step.address, 0x0800_4000 + step.offset as u32);
            assert_eq!(step.erase, Some(EraseCommand::Page(step.address)));
            assert_eq!(step.block, BLOCK_DATA);
        }
    }

    #[test]
    fn test_empty_image_rejected() {
        let plan = FlashPlan::for_variant(BootloaderVariant::V3);
        assert!(matches!(plan.plan(0), Err(FlashError::EmptyImage)));
    }

    #[test]
    fn test_v3_erase_only_on_sector_starts() {
        let plan = FlashPlan::for_variant(BootloaderVariant::V3);
        // 0x08020000..0x08060400: spans sectors 5, 6 and the start of 7
        let len = 0x4_0400;
        let steps = plan.plan(len).unwrap();

        for step in &steps {
            let is_start = V3_SECTOR_STARTS.contains(&step.address);
            assert_eq!(step.erase.is_some(), is_start, "at 0x{:08X}", step.address);
            if is_start {
                assert_eq!(step.block, BLOCK_DATA);
            } else {
                assert_eq!(step.block, BLOCK_CONTINUATION);
            }
        }

        let erases: Vec<_> = steps.iter().filter_map(|s| s.erase).collect();
        assert_eq!(
            erases,
            vec![
                EraseCommand::Sector(5),
                EraseCommand::Sector(6),
                EraseCommand::Sector(7)
            ]
        );
    }

    #[test]
    fn test_v3_16k_boundary_inside_sector_is_continuation() {
        let plan = FlashPlan::for_variant(BootloaderVariant::V3);
        let steps = plan.plan(0x4400).unwrap();
        let at_16k = steps.iter().find(|s| s.address == 0x0802_4000).unwrap();
        assert_eq!(at_16k.erase, None);
        assert_eq!(at_16k.block, BLOCK_CONTINUATION);
    }

    #[test]
    fn test_v3_past_flash_end_is_fatal() {
        let plan = FlashPlan::for_variant(BootloaderVariant::V3);
        // Exactly fills 0x08020000..0x08080000
        assert!(plan.plan(0x6_0000).is_ok());
        assert!(matches!(
            plan.plan(0x6_0001),
            Err(FlashError::UnknownSector {
                address: 0x0808_0000
            })
        ));
    }

    #[test]
    fn test_sector_lookup() {
        let plan = FlashPlan::for_variant(BootloaderVariant::V3);
        assert_eq!(plan.sector_index(0x0800_0000), Some(0));
        assert_eq!(plan.sector_index(0x0806_0000), Some(7));
        assert_eq!(plan.sector_index(0x0802_4000), None);
        assert_eq!(plan.sector_index(0x0802_0400), None);
        assert_eq!(plan.sector_containing(0x0802_4000), Some(5));
        assert_eq!(plan.sector_containing(0x0807_FFFF), Some(7));
        assert_eq!(plan.sector_containing(0x0808_0000), None);

        let v2 = FlashPlan::for_variant(BootloaderVariant::V2);
        assert_eq!(v2.sector_index(0x0800_4000), None);
    }
}
