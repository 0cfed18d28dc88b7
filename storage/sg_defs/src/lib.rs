// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Constants and kernel structures for the Linux SCSI generic, bsg and NVMe
//! passthrough interfaces.
//!
//! Nothing in this crate performs I/O. The structures are laid out to match
//! the kernel UAPI headers so they can be handed directly to `ioctl`.

#![expect(missing_docs)]
#![forbid(unsafe_code)]

pub mod nvme;
pub mod scsi;
pub mod sg;

/// Character device major of the `sg` driver (`SCSI_GENERIC_MAJOR`).
pub const SCSI_GENERIC_MAJOR: u32 = 21;

/// Block device major handed out dynamically to extended block devices
/// (`BLOCK_EXT_MAJOR`). NVMe namespaces are registered here.
pub const BLOCK_EXT_MAJOR: u32 = 259;

/// The textual device registry listing driver majors.
pub const PROC_DEVICES: &str = "/proc/devices";

pub const S_IFCHR: u32 = 0x2000;
pub const S_IFBLK: u32 = 0x6000;
pub const S_IFREG: u32 = 0x8000;
pub const S_IFMT: u32 = 0xf000;

pub fn s_ischr(mode: u32) -> bool {
    mode & S_IFMT == S_IFCHR
}

pub fn s_isblk(mode: u32) -> bool {
    mode & S_IFMT == S_IFBLK
}

/// Extracts the major number from a glibc-encoded 64-bit `dev_t`.
pub fn major(dev: u64) -> u32 {
    (((dev >> 32) & 0xfffff000) | ((dev >> 8) & 0xfff)) as u32
}

pub fn make_dev(major: u32, minor: u32) -> u64 {
    let major = major as u64;
    let minor = minor as u64;
    ((major & 0xfffff000) << 32)
        | ((major & 0xfff) << 8)
        | ((minor & 0xffffff00) << 12)
        | (minor & 0xff)
}
