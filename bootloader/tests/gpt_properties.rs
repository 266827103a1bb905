//! GPT header validation and partition array compaction

mod common;

use common::*;
use proptest::prelude::*;
use trident_bootloader::firmware::disk_reader::{DiskReader, MemoryDisk};
use trident_bootloader::firmware::gpt_handler::{
    compact_entries, find_partition, get_partition_array, read_gpt_header, GptHeader, Guid, PartitionEntry,
};
use trident_bootloader::{BootConfig, BootError};

const STRIDE: usize = 128;

fn entry(tag: u8) -> PartitionEntry {
    PartitionEntry {
        type_guid: Guid([tag; 16]),
        unique_guid: Guid([tag ^ 0xFF; 16]),
        start_lba: 100 * tag as u64,
        end_lba: 100 * tag as u64 + 9,
        attributes: tag as u64,
    }
}

fn slots_buffer(pattern: &[bool]) -> (Vec<u8>, Vec<PartitionEntry>) {
    let mut buffer = vec![0u8; pattern.len() * STRIDE];
    let mut occupied = Vec::new();
    for (i, &used) in pattern.iter().enumerate() {
        if used {
            let e = entry(i as u8 + 1);
            e.write_to(&mut buffer[i * STRIDE..(i + 1) * STRIDE]);
            // Bytes past the logical entry travel with it
            buffer[i * STRIDE + 100] = i as u8;
            occupied.push(e);
        }
    }
    (buffer, occupied)
}

proptest! {
    #[test]
    fn test_compaction_keeps_order(pattern in prop::collection::vec(any::<bool>(), 0..40)) {
        let (mut buffer, occupied) = slots_buffer(&pattern);
        let count = compact_entries(&mut buffer, pattern.len(), STRIDE);
        prop_assert_eq!(count, occupied.len());

        for (i, expected) in occupied.iter().enumerate() {
            let raw = &buffer[i * STRIDE..(i + 1) * STRIDE];
            prop_assert_eq!(PartitionEntry::from_bytes(raw), *expected);
            prop_assert_eq!(raw[100] as u64 + 1, expected.attributes);
        }
        prop_assert!(buffer[count * STRIDE..].iter().all(|&b| b == 0));

        // Compacting again changes nothing
        let before = buffer.clone();
        prop_assert_eq!(compact_entries(&mut buffer, pattern.len(), STRIDE), count);
        prop_assert_eq!(buffer, before);
    }

    #[test]
    fn test_any_single_bit_flip_is_detected(byte in (8usize..12).prop_union(20usize..92), bit in 0u8..8) {
        let array = partition_array(&[Some(entry(1))]);
        let mut sector = gpt_header(&array, ENTRY_COUNT as u32, 0x1_0000);
        prop_assert!(GptHeader::parse(&sector).is_ok());

        sector[byte] ^= 1 << bit;
        prop_assert_eq!(GptHeader::parse(&sector), Err(BootError::GptHeaderChecksum));
    }

    #[test]
    fn test_signature_flip_is_rejected(byte in 0usize..8, bit in 0u8..8) {
        let array = partition_array(&[]);
        let mut sector = gpt_header(&array, ENTRY_COUNT as u32, 0x1_0000);
        sector[byte] ^= 1 << bit;
        prop_assert_eq!(GptHeader::parse(&sector), Err(BootError::InvalidGptSignature));
    }
}

/// Disk with a four-slot array: [empty, A, empty, B]
fn sparse_disk() -> (Vec<u8>, PartitionEntry, PartitionEntry) {
    let a = entry(0xA);
    let b = PartitionEntry {
        type_guid: Guid::BIOS_BOOT,
        ..entry(0xB)
    };
    let array = partition_array(&[None, Some(a), None, Some(b)]);
    let mut image = vec![0u8; 4 * SECTOR];
    image[SECTOR..2 * SECTOR].copy_from_slice(&gpt_header(&array, 4, 0x1_0000));
    image[2 * SECTOR..3 * SECTOR].copy_from_slice(&array[..4 * ENTRY_SIZE]);
    (image, a, b)
}

#[test]
fn test_sparse_array_is_compacted() {
    let (image, a, b) = sparse_disk();
    let mut disk = DiskReader::new(MemoryDisk::new(image), &BootConfig::DEFAULT);
    let header = read_gpt_header(&mut disk).unwrap();
    assert_eq!(header.entries_count, 4);

    let partitions = get_partition_array(&header, &mut disk).unwrap();
    assert_eq!(partitions.len(), 2);
    assert_eq!(partitions.iter().collect::<Vec<_>>(), vec![a, b]);
    assert_eq!(partitions.get(2), None);
    assert_eq!(find_partition(&partitions, &Guid::BIOS_BOOT), Some(b));
    assert_eq!(find_partition(&partitions, &Guid::EFI_SYSTEM), None);
}

#[test]
fn test_corrupted_array_is_rejected() {
    let (mut image, _, _) = sparse_disk();
    image[2 * SECTOR + ENTRY_SIZE + 40] ^= 0x01;
    let mut disk = DiskReader::new(MemoryDisk::new(image), &BootConfig::DEFAULT);
    let header = read_gpt_header(&mut disk).unwrap();
    assert_eq!(
        get_partition_array(&header, &mut disk).err(),
        Some(BootError::GptArrayChecksum)
    );
}

#[test]
fn test_full_disk_finds_boot_partition() {
    let payload = vec![0xC3u8; 3 * SECTOR + 17];
    let (image, boot) = gpt_disk(&payload);
    let mut disk = DiskReader::new(MemoryDisk::new(image), &BootConfig::DEFAULT);
    let header = read_gpt_header(&mut disk).unwrap();
    let partitions = get_partition_array(&header, &mut disk).unwrap();
    assert_eq!(partitions.len(), 2);
    assert_eq!(partitions.get(0).map(|p| p.type_guid), Some(Guid::EFI_SYSTEM));
    assert_eq!(find_partition(&partitions, &Guid::BIOS_BOOT), Some(boot));
    assert_eq!(boot.sector_count(), 4);
}
