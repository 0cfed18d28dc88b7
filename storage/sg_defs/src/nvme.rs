// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! NVMe passthrough definitions from `<linux/nvme_ioctl.h>` and the subset of
//! the NVMe command set the translation layer needs.

use bitfield_struct::bitfield;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// ioctl type letter of the NVMe driver.
pub const NVME_IOCTL_TYPE: u8 = b'N';
pub const NVME_IOCTL_ID_NR: u8 = 0x40;
pub const NVME_IOCTL_ADMIN_CMD_NR: u8 = 0x41;
pub const NVME_IOCTL_IO_CMD_NR: u8 = 0x43;
pub const NVME_IOCTL_RESET_NR: u8 = 0x44;

/// Size of a submission queue entry, which is also the length of a CDB that
/// carries a raw NVMe command.
pub const SQE_LEN: usize = 64;

/// Size of an IDENTIFY response.
pub const IDENTIFY_LEN: usize = 4096;

/// `struct nvme_passthru_cmd`, aka `nvme_admin_cmd`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
#[expect(non_camel_case_types)]
pub struct nvme_passthru_cmd {
    pub opcode: u8,
    pub flags: u8,
    pub rsvd1: u16,
    pub nsid: u32,
    pub cdw2: u32,
    pub cdw3: u32,
    pub metadata: u64,
    pub addr: u64,
    pub metadata_len: u32,
    pub data_len: u32,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
    pub timeout_ms: u32,
    pub result: u32,
}

const_assert_eq!(size_of::<nvme_passthru_cmd>(), 72);

/// Admin command opcodes.
pub mod admin {
    pub const IDENTIFY: u8 = 0x06;
}

/// NVM command set opcodes.
pub mod nvm {
    pub const FLUSH: u8 = 0x00;
    pub const WRITE: u8 = 0x01;
    pub const READ: u8 = 0x02;
}

/// IDENTIFY CNS values.
pub mod cns {
    pub const NAMESPACE: u32 = 0x00;
    pub const CONTROLLER: u32 = 0x01;
    pub const ACTIVE_NAMESPACES: u32 = 0x02;
}

/// Data transfer direction encoded in the low two bits of an opcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataDirection {
    None,
    HostToController,
    ControllerToHost,
    Bidirectional,
}

impl DataDirection {
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode & 0x3 {
            0 => Self::None,
            1 => Self::HostToController,
            2 => Self::ControllerToHost,
            _ => Self::Bidirectional,
        }
    }
}

/// Status code types.
pub mod sct {
    pub const GENERIC: u8 = 0x0;
    pub const COMMAND_SPECIFIC: u8 = 0x1;
    pub const MEDIA_ERROR: u8 = 0x2;
    pub const PATH_RELATED: u8 = 0x3;
    pub const VENDOR_SPECIFIC: u8 = 0x7;
}

/// Generic command status codes.
pub mod generic_sc {
    pub const SUCCESS: u8 = 0x00;
    pub const INVALID_OPCODE: u8 = 0x01;
    pub const INVALID_FIELD: u8 = 0x02;
    pub const DATA_TRANSFER_ERROR: u8 = 0x04;
    pub const INTERNAL_ERROR: u8 = 0x06;
    pub const ABORT_REQUESTED: u8 = 0x07;
    pub const INVALID_NAMESPACE: u8 = 0x0b;
    pub const LBA_OUT_OF_RANGE: u8 = 0x80;
    pub const CAPACITY_EXCEEDED: u8 = 0x81;
    pub const NAMESPACE_NOT_READY: u8 = 0x82;
}

/// Media and data integrity status codes.
pub mod media_sc {
    pub const WRITE_FAULT: u8 = 0x80;
    pub const UNRECOVERED_READ_ERROR: u8 = 0x81;
    pub const COMPARE_FAILURE: u8 = 0x85;
    pub const ACCESS_DENIED: u8 = 0x86;
}

/// The completion status as returned by the passthrough ioctls: the CQE
/// status field shifted right by one to drop the phase tag.
#[bitfield(u16)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct NvmeStatus {
    pub sc: u8,
    #[bits(3)]
    pub sct: u8,
    #[bits(2)]
    pub crd: u8,
    pub more: bool,
    pub dnr: bool,
    _reserved: bool,
}

impl NvmeStatus {
    pub fn is_success(&self) -> bool {
        self.sct() == sct::GENERIC && self.sc() == generic_sc::SUCCESS
    }
}

/// Byte offsets into the IDENTIFY CONTROLLER response.
pub mod id_ctrl {
    pub const SN: std::ops::Range<usize> = 4..24;
    pub const MN: std::ops::Range<usize> = 24..64;
    pub const FR: std::ops::Range<usize> = 64..72;
}

/// Byte offsets into the IDENTIFY NAMESPACE response.
pub mod id_ns {
    pub const NSZE: usize = 0;
    pub const FLBAS: usize = 26;
    pub const LBAF: usize = 128;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn passthru_layout() {
        assert_eq!(offset_of!(nvme_passthru_cmd, nsid), 4);
        assert_eq!(offset_of!(nvme_passthru_cmd, metadata), 16);
        assert_eq!(offset_of!(nvme_passthru_cmd, addr), 24);
        assert_eq!(offset_of!(nvme_passthru_cmd, cdw10), 40);
        assert_eq!(offset_of!(nvme_passthru_cmd, timeout_ms), 64);
        assert_eq!(offset_of!(nvme_passthru_cmd, result), 68);
    }

    #[test]
    fn status_fields() {
        // Invalid field in command with DNR set.
        let status = NvmeStatus::from_bits(0x4002);
        assert_eq!(status.sct(), sct::GENERIC);
        assert_eq!(status.sc(), generic_sc::INVALID_FIELD);
        assert!(status.dnr());
        assert!(!status.is_success());

        // Unrecovered read error.
        let status = NvmeStatus::from_bits(0x0281);
        assert_eq!(status.sct(), sct::MEDIA_ERROR);
        assert_eq!(status.sc(), media_sc::UNRECOVERED_READ_ERROR);
        assert!(!status.dnr());

        assert!(NvmeStatus::new().is_success());
    }

    #[test]
    fn direction_bits() {
        assert_eq!(DataDirection::from_opcode(nvm::FLUSH), DataDirection::None);
        assert_eq!(
            DataDirection::from_opcode(nvm::WRITE),
            DataDirection::HostToController
        );
        assert_eq!(
            DataDirection::from_opcode(nvm::READ),
            DataDirection::ControllerToHost
        );
        assert_eq!(
            DataDirection::from_opcode(admin::IDENTIFY),
            DataDirection::ControllerToHost
        );
        assert_eq!(
            DataDirection::from_opcode(0x0b),
            DataDirection::Bidirectional
        );
    }
}
