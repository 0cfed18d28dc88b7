// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Opening passthrough device nodes.

use crate::ioctls;
use crate::probe::Classification;
use crate::probe::DeviceKind;
use crate::probe::check_pt_file_handle;
use nix::errno::Errno;
use std::fs::File;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::IntoRawFd;
use std::os::fd::RawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

/// Error returned by [`PtDevice::open`].
#[derive(Debug, Error)]
pub enum DeviceOpenError {
    /// The node could not be opened.
    #[error("failed to open {}", path.display())]
    Open {
        /// The node.
        path: PathBuf,
        /// The open failure.
        #[source]
        source: std::io::Error,
    },
    /// The node was opened but could not be classified.
    #[error("failed to classify {}", path.display())]
    Classify {
        /// The node.
        path: PathBuf,
        /// The stat or ioctl failure.
        #[source]
        source: Errno,
    },
}

/// An open, classified device node. Dropping it closes the descriptor.
#[derive(Debug)]
pub struct PtDevice {
    file: File,
    class: Classification,
}

impl PtDevice {
    /// Opens `path` non-blocking, read-only or read-write, and classifies
    /// it.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self, DeviceOpenError> {
        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(!read_only)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| DeviceOpenError::Open {
                path: path.to_owned(),
                source,
            })?;

        let class = check_pt_file_handle(file.as_raw_fd());
        if let Some(source) = class.os_err {
            return Err(DeviceOpenError::Classify {
                path: path.to_owned(),
                source,
            });
        }
        tracing::debug!(path = %path.display(), kind = ?class.kind, nsid = class.nsid, "opened device");
        Ok(Self { file, class })
    }

    /// The classification made when the node was opened.
    pub fn classification(&self) -> Classification {
        self.class
    }

    /// The node type.
    pub fn kind(&self) -> DeviceKind {
        self.class.kind
    }

    /// Whether the node is an NVMe controller or namespace.
    pub fn is_nvme(&self) -> bool {
        self.class.is_nvme()
    }

    /// The NVMe namespace id, zero unless the node is a namespace.
    pub fn nsid(&self) -> u32 {
        self.class.nsid
    }

    /// Resets the NVMe controller behind a controller character device.
    pub fn reset_nvme_controller(&self) -> Result<(), Errno> {
        if self.class.kind != DeviceKind::NvmeChar {
            return Err(Errno::ENOTTY);
        }
        tracing::info!(fd = self.file.as_raw_fd(), "resetting nvme controller");
        // SAFETY: NVME_IOCTL_RESET takes no argument.
        unsafe { ioctls::nvme_reset(self.file.as_raw_fd()) }?;
        Ok(())
    }

    /// Closes the descriptor, reporting any error from `close`.
    pub fn close(self) -> Result<(), Errno> {
        let fd = self.file.into_raw_fd();
        // SAFETY: `fd` was released by the file and is closed exactly once.
        Errno::result(unsafe { libc::close(fd) })?;
        Ok(())
    }
}

impl AsRawFd for PtDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for PtDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PtError;
    use crate::request::ScsiPt;

    #[test]
    fn open_null_device() {
        let device = PtDevice::open("/dev/null", true).unwrap();
        assert_eq!(device.kind(), DeviceKind::Other);
        assert!(!device.is_nvme());
        assert_eq!(device.nsid(), 0);
        assert_eq!(device.reset_nvme_controller(), Err(Errno::ENOTTY));

        let mut pt = ScsiPt::for_device(&device);
        assert_eq!(pt.fd(), Some(device.as_raw_fd()));
        assert_eq!(pt.classification(), Some(device.classification()));
        pt.set_cdb(&[0; 6]);
        // /dev/null does not implement SG_IO.
        assert!(matches!(pt.do_scsi_pt(None, None), Err(PtError::Os(_))));
        drop(pt);

        device.close().unwrap();
    }

    #[test]
    fn open_missing_node() {
        let err = PtDevice::open("/dev/does-not-exist-scsi-pt", false).unwrap_err();
        let DeviceOpenError::Open { path, source } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(path, Path::new("/dev/does-not-exist-scsi-pt"));
        assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        assert!(err.to_string().contains("does-not-exist-scsi-pt"));
    }

    #[test]
    fn open_regular_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let device = PtDevice::open(file.path(), false).unwrap();
        assert_eq!(device.kind(), DeviceKind::Other);
        assert_eq!(device.classification().os_err, None);
    }
}
