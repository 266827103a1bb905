//! Trident Bootloader Build Script
//!
//! Hands the per-stage linker scripts to the linker for target builds.
//! Host builds (unit and integration tests) link normally.

use std::env;

const STAGES: &[(&str, &str)] = &[("ssl", "linker/ssl.ld"), ("tsl", "linker/tsl.ld")];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_default();
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let is_test = env::var("CARGO_CFG_TEST").is_ok();

    for (bin, script) in STAGES {
        println!("cargo:rerun-if-changed={}", script);
        if os == "none" && !is_test {
            println!("cargo:rustc-link-arg-bin={}=-T{}/{}", bin, manifest_dir, script);
        }
    }
}
