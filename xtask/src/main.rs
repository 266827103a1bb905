use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use trident_api::layout::{SSL_SIZE, TSL_SIZE};

struct Stage {
    name: &'static str,
    target: &'static str,
    features: &'static str,
    limit: u32,
}

const SSL: Stage = Stage {
    name: "ssl",
    target: "i386-code16-ssl",
    features: "baremetal,stage-ssl",
    limit: SSL_SIZE,
};

const TSL: Stage = Stage {
    name: "tsl",
    target: "i686-tsl",
    features: "baremetal,stage-tsl",
    limit: TSL_SIZE,
};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let task = args.next().unwrap_or_else(|| "help".to_string());
    let release = args.any(|a| a == "--release");
    match task.as_str() {
        "ssl" => build_stage(&SSL, release).map(drop),
        "tsl" => build_stage(&TSL, release).map(drop),
        "image" => build_image(release),
        _ => {
            print_help();
            Ok(())
        }
    }
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Cross-build one stage and strip it to a flat binary
fn build_stage(stage: &Stage, release: bool) -> Result<PathBuf> {
    let root = workspace_root();
    let target_json = root.join("bootloader/targets").join(format!("{}.json", stage.target));
    let mut cmd = Command::new("cargo");
    cmd.current_dir(&root)
        .arg("+nightly")
        .arg("build")
        .arg("-p").arg("trident-bootloader")
        .arg("--bin").arg(stage.name)
        .arg("--target").arg(&target_json)
        .arg("-Z").arg("build-std=core,alloc")
        .arg("-Z").arg("build-std-features=compiler-builtins-mem")
        .arg("-Z").arg("json-target-spec")
        .arg("--features").arg(stage.features);
    if release {
        cmd.arg("--release");
    }
    run(&mut cmd, &format!("{} build", stage.name))?;

    let profile = if release { "release" } else { "debug" };
    let elf = root.join("target").join(stage.target).join(profile).join(stage.name);
    let flat = elf.with_extension("bin");
    let mut objcopy = Command::new("rust-objcopy");
    objcopy.arg("-O").arg("binary").arg(&elf).arg(&flat);
    run(&mut objcopy, &format!("{} objcopy", stage.name))?;

    let size = fs::metadata(&flat).with_context(|| format!("reading {}", flat.display()))?.len();
    if size > stage.limit as u64 {
        bail!("{} is {} bytes, the slot holds {}", stage.name, size, stage.limit);
    }
    println!("[xtask] {}: {} bytes -> {}", stage.name, size, flat.display());
    Ok(flat)
}

/// Both stages padded to their slots, as the boot sector loads them
fn build_image(release: bool) -> Result<()> {
    let ssl = fs::read(build_stage(&SSL, release)?)?;
    let tsl = fs::read(build_stage(&TSL, release)?)?;

    let mut image = Vec::with_capacity((SSL_SIZE + TSL_SIZE) as usize);
    image.extend_from_slice(&ssl);
    image.resize(SSL_SIZE as usize, 0);
    image.extend_from_slice(&tsl);
    image.resize((SSL_SIZE + TSL_SIZE) as usize, 0);

    let out = workspace_root().join("target/stages.bin");
    fs::write(&out, &image).with_context(|| format!("writing {}", out.display()))?;
    println!("[xtask] image: {} bytes -> {}", image.len(), out.display());
    Ok(())
}

fn run(cmd: &mut Command, name: &str) -> Result<()> {
    println!("[xtask] {}: {:?}", name, cmd);
    let status = cmd.status().with_context(|| format!("failed to run {}", name))?;
    if !status.success() {
        bail!("{} failed with status {:?}", name, status);
    }
    Ok(())
}

fn print_help() {
    println!("xtask usage:\n  cargo run -p xtask -- ssl [--release]\n  cargo run -p xtask -- tsl [--release]\n  cargo run -p xtask -- image [--release]");
}
