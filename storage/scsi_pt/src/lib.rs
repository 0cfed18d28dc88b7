// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A single entry point for issuing SCSI commands, SCSI task management
//! functions and NVMe commands to Linux device nodes.
//!
//! A [`ScsiPt`] request is populated with a command and borrowed buffers and
//! executed with [`ScsiPt::do_scsi_pt`]. The request picks the kernel
//! interface from the type of the bound device node:
//!
//! * `sg` nodes and unrecognized nodes (e.g. `/dev/sdX`) use the v3 `SG_IO`
//!   header.
//! * `bsg` nodes use the v4 `SG_IO` header.
//! * NVMe controllers and namespaces use the NVMe passthrough ioctls. SCSI
//!   commands sent to NVMe devices are translated.
//!
//! Completions from every path are reported through the same fields and
//! reduced to a [`ResultCategory`].

#![cfg(target_os = "linux")]

mod category;
mod device;
mod dispatch;
mod ioctls;
mod majors;
mod nvme;
mod probe;
mod request;
pub mod sense;
mod sntl;
mod transport;

pub use category::ResultCategory;
pub use device::DeviceOpenError;
pub use device::PtDevice;
pub use dispatch::Transport;
pub use dispatch::select_transport;
pub use majors::DeviceMajors;
pub use majors::device_majors;
pub use majors::reprobe_device_majors;
pub use nix::errno::Errno;
pub use nvme::NvmeQueue;
pub use probe::Classification;
pub use probe::DeviceKind;
pub use probe::check_pt_file_handle;
pub use request::Completion;
pub use request::Metadata;
pub use request::PtCommand;
pub use request::ScsiPt;
pub use sg_defs::nvme::NvmeStatus;
pub use sg_defs::sg::QueueFlags;
pub use transport::TransportError;

use std::os::fd::RawFd;
use std::time::Duration;
use thiserror::Error;

/// The timeout used when a caller does not supply one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Legacy return code for [`PtError::BadParams`].
pub const SCSI_PT_DO_BAD_PARAMS: i32 = 1;
/// Legacy return code for [`PtError::Timeout`].
pub const SCSI_PT_DO_TIMEOUT: i32 = 2;
/// Legacy return code for [`PtError::NvmeStatus`].
pub const SCSI_PT_DO_NVME_STATUS: i32 = 48;

/// Per-request settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtConfig {
    /// Timeout applied when [`ScsiPt::do_scsi_pt`] is called without one.
    pub default_timeout: Duration,
    /// Translate SCSI commands sent to NVMe devices. When disabled, only raw
    /// 64-byte NVMe commands are accepted by NVMe devices.
    pub sntl: bool,
}

impl Default for PtConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            sntl: true,
        }
    }
}

/// Why a request was rejected before reaching the kernel.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[expect(missing_docs)]
pub enum BadParamsReason {
    #[error("request fields were set more than once ({0} extra sets)")]
    FieldSetTwice(u32),
    #[error("no device file descriptor")]
    NoDevice,
    #[error("file descriptor {call} does not match the bound descriptor {bound}")]
    FdMismatch { bound: RawFd, call: RawFd },
    #[error("no command bytes")]
    NoCommand,
    #[error("command of {0} bytes is too long for the transport")]
    CommandTooLong(usize),
    #[error("bidirectional data transfer is not supported")]
    Bidirectional,
    #[error("data buffer of {0} bytes is too large for the transport")]
    BufferTooLarge(usize),
    #[error("data buffer of {provided} bytes is smaller than the {needed} bytes required")]
    BufferTooSmall { needed: u64, provided: usize },
    #[error("task management functions are not supported by this transport")]
    TaskManagementUnsupported,
    #[error("scsi translation is disabled and the command is not an nvme command")]
    NotNvmeCommand,
}

/// The outcome of [`ScsiPt::do_scsi_pt`] when no usable response was
/// obtained, or when the device completed an NVMe command with an error.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[expect(missing_docs)]
pub enum PtError {
    #[error("bad parameters")]
    BadParams(#[source] BadParamsReason),
    #[error("command timed out")]
    Timeout,
    #[error("nvme command failed: sct {:#x} sc {:#x}", .0.sct(), .0.sc())]
    NvmeStatus(NvmeStatus),
    #[error("os error")]
    Os(#[source] Errno),
}

impl From<BadParamsReason> for PtError {
    fn from(reason: BadParamsReason) -> Self {
        Self::BadParams(reason)
    }
}

impl PtError {
    /// Returns the integer convention used by C callers: small positive
    /// values for rejections and negated `errno` values for OS failures.
    pub fn raw_code(&self) -> i32 {
        match self {
            Self::BadParams(_) => SCSI_PT_DO_BAD_PARAMS,
            Self::Timeout => SCSI_PT_DO_TIMEOUT,
            Self::NvmeStatus(_) => SCSI_PT_DO_NVME_STATUS,
            Self::Os(err) => -(*err as i32),
        }
    }
}
