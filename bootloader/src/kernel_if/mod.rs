//! Kernel Interface - archive, PE images, Boot-Info

pub mod archive;
pub mod boot_info_builder;
pub mod image_registry;
pub mod pe64;
pub mod pe_loader;
pub mod physical;
