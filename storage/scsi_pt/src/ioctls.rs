// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ioctl entry points for the sg, bsg and NVMe drivers.

use sg_defs::nvme::NVME_IOCTL_ADMIN_CMD_NR;
use sg_defs::nvme::NVME_IOCTL_ID_NR;
use sg_defs::nvme::NVME_IOCTL_IO_CMD_NR;
use sg_defs::nvme::NVME_IOCTL_RESET_NR;
use sg_defs::nvme::NVME_IOCTL_TYPE;
use sg_defs::nvme::nvme_passthru_cmd;
use sg_defs::sg::SG_IO;
use sg_defs::sg::sg_io_hdr;
use sg_defs::sg::sg_io_v4;

nix::ioctl_readwrite_bad!(
    /// `SG_IO` with a v3 header.
    sg_io3,
    SG_IO,
    sg_io_hdr
);

nix::ioctl_readwrite_bad!(
    /// `SG_IO` with a v4 header. Only bsg nodes accept this form.
    sg_io4,
    SG_IO,
    sg_io_v4
);

nix::ioctl_none!(
    /// `NVME_IOCTL_ID`: returns the namespace id of a namespace block device.
    nvme_id,
    NVME_IOCTL_TYPE,
    NVME_IOCTL_ID_NR
);

nix::ioctl_readwrite!(
    /// `NVME_IOCTL_ADMIN_CMD`. A positive return is the completion status.
    nvme_admin_cmd,
    NVME_IOCTL_TYPE,
    NVME_IOCTL_ADMIN_CMD_NR,
    nvme_passthru_cmd
);

nix::ioctl_readwrite!(
    /// `NVME_IOCTL_IO_CMD`. A positive return is the completion status.
    nvme_io_cmd,
    NVME_IOCTL_TYPE,
    NVME_IOCTL_IO_CMD_NR,
    nvme_passthru_cmd
);

nix::ioctl_none!(
    /// `NVME_IOCTL_RESET`: resets the controller behind a character device.
    nvme_reset,
    NVME_IOCTL_TYPE,
    NVME_IOCTL_RESET_NR
);
