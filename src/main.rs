#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]

#[cfg(target_os = "none")]
extern crate rlibc;

#[cfg(target_os = "none")]
mod boot;
#[cfg(target_os = "none")]
mod trampolines;

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("kernel: build for a bare-metal target such as x86_64-unknown-none");
    std::process::exit(1);
}
