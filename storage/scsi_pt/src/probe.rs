// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Classification of open file descriptors into passthrough device types.

use crate::ioctls;
use crate::majors::DeviceMajors;
use crate::majors::device_majors;
use nix::errno::Errno;
use sg_defs::BLOCK_EXT_MAJOR;
use sg_defs::SCSI_GENERIC_MAJOR;
use std::mem::MaybeUninit;
use std::os::fd::RawFd;

/// The kind of device node behind a file descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// A `sg` character device.
    ScsiGeneric,
    /// A `bsg` character device.
    Bsg,
    /// An NVMe controller character device.
    NvmeChar,
    /// An NVMe namespace block device.
    NvmeBlock,
    /// Anything else, including SCSI block devices such as `/dev/sda` and
    /// regular files.
    Other,
}

impl DeviceKind {
    /// Whether commands to this node use the NVMe passthrough ioctls.
    pub fn is_nvme(self) -> bool {
        matches!(self, Self::NvmeChar | Self::NvmeBlock)
    }
}

/// The result of probing a file descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The node type.
    pub kind: DeviceKind,
    /// The namespace id of an NVMe namespace. Zero for controllers and for
    /// every non-NVMe node.
    pub nsid: u32,
    /// The error that prevented classification, if any. `kind` is
    /// [`DeviceKind::Other`] whenever this is set.
    pub os_err: Option<Errno>,
}

impl Classification {
    fn other(os_err: Option<Errno>) -> Self {
        Self {
            kind: DeviceKind::Other,
            nsid: 0,
            os_err,
        }
    }

    fn of(kind: DeviceKind) -> Self {
        Self {
            kind,
            nsid: 0,
            os_err: None,
        }
    }

    /// Whether the node is an NVMe controller or namespace.
    pub fn is_nvme(&self) -> bool {
        self.kind.is_nvme()
    }
}

/// Classifies a node from its `st_mode` and `st_rdev`.
///
/// `namespace_id` is only invoked for extended-major block devices.
pub(crate) fn classify_node(
    mode: u32,
    rdev: u64,
    majors: &DeviceMajors,
    namespace_id: impl FnOnce() -> Result<u32, Errno>,
) -> Classification {
    let major = sg_defs::major(rdev);
    if sg_defs::s_ischr(mode) {
        if major == SCSI_GENERIC_MAJOR {
            Classification::of(DeviceKind::ScsiGeneric)
        } else if majors.bsg != 0 && major == majors.bsg {
            Classification::of(DeviceKind::Bsg)
        } else if majors.nvme_char != 0 && major == majors.nvme_char {
            Classification::of(DeviceKind::NvmeChar)
        } else {
            Classification::other(None)
        }
    } else if sg_defs::s_isblk(mode) && major == BLOCK_EXT_MAJOR {
        match namespace_id() {
            Ok(nsid) => Classification {
                kind: DeviceKind::NvmeBlock,
                nsid,
                os_err: None,
            },
            Err(err) => Classification::other(Some(err)),
        }
    } else {
        Classification::other(None)
    }
}

fn fstat(fd: RawFd) -> Result<libc::stat, Errno> {
    let mut stat = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: fstat writes a complete stat structure to the provided pointer
    // on success and nothing is read from it otherwise.
    Errno::result(unsafe { libc::fstat(fd, stat.as_mut_ptr()) })?;
    // SAFETY: fstat succeeded.
    Ok(unsafe { stat.assume_init() })
}

fn namespace_id(fd: RawFd) -> Result<u32, Errno> {
    // SAFETY: NVME_IOCTL_ID takes no argument. A -1 return, which is also the
    // all-ones namespace id, is reported as an error by the ioctl wrapper.
    let nsid = unsafe { ioctls::nvme_id(fd) }?;
    Ok(nsid as u32)
}

/// Classifies the node behind `fd`, probing the device registry on first
/// use.
///
/// This never fails: problems are reported through
/// [`Classification::os_err`].
pub fn check_pt_file_handle(fd: RawFd) -> Classification {
    if fd < 0 {
        return Classification::other(Some(Errno::EBADF));
    }
    let stat = match fstat(fd) {
        Ok(stat) => stat,
        Err(err) => {
            tracing::debug!(fd, error = &err as &dyn std::error::Error, "fstat failed");
            return Classification::other(Some(err));
        }
    };
    let class = classify_node(stat.st_mode, stat.st_rdev, &device_majors(), || {
        namespace_id(fd)
    });
    tracing::debug!(
        fd,
        major = sg_defs::major(stat.st_rdev),
        kind = ?class.kind,
        nsid = class.nsid,
        "classified device"
    );
    class
}
