use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");

    // Host test builds never link against cortex-m-rt's link.x
    let target = env::var("TARGET").unwrap_or_default();
    if !target.starts_with("thumb") {
        return;
    }

    // memory.x has to sit on the linker search path for link.x to include it
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    fs::copy("memory.x", out_dir.join("memory.x")).expect("memory.x is readable");
    println!("cargo:rustc-link-search={}", out_dir.display());
}
