//! Firmware Interface - disk reads and the GPT

pub mod crc32;
pub mod disk_reader;
pub mod gpt_handler;
