// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! SCSI status, sense and opcode values used by the passthrough layer, and
//! the big-endian layouts of the commands and responses it translates.

use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::big_endian::U16;
use zerocopy::big_endian::U32;
use zerocopy::big_endian::U64;

/// SAM status codes.
pub mod status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
    pub const CONDITION_MET: u8 = 0x04;
    pub const BUSY: u8 = 0x08;
    pub const INTERMEDIATE: u8 = 0x10;
    pub const INTERMEDIATE_CONDITION_MET: u8 = 0x14;
    pub const RESERVATION_CONFLICT: u8 = 0x18;
    pub const COMMAND_TERMINATED: u8 = 0x22;
    pub const TASK_SET_FULL: u8 = 0x28;
    pub const ACA_ACTIVE: u8 = 0x30;
    pub const TASK_ABORTED: u8 = 0x40;

    /// Bits of the status byte that carry the status code.
    pub const MASK: u8 = 0x7e;
}

/// Sense keys.
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x0;
    pub const RECOVERED_ERROR: u8 = 0x1;
    pub const NOT_READY: u8 = 0x2;
    pub const MEDIUM_ERROR: u8 = 0x3;
    pub const HARDWARE_ERROR: u8 = 0x4;
    pub const ILLEGAL_REQUEST: u8 = 0x5;
    pub const UNIT_ATTENTION: u8 = 0x6;
    pub const DATA_PROTECT: u8 = 0x7;
    pub const BLANK_CHECK: u8 = 0x8;
    pub const VENDOR_SPECIFIC: u8 = 0x9;
    pub const COPY_ABORTED: u8 = 0xa;
    pub const ABORTED_COMMAND: u8 = 0xb;
    pub const VOLUME_OVERFLOW: u8 = 0xd;
    pub const MISCOMPARE: u8 = 0xe;
}

/// Additional sense codes.
pub mod asc {
    pub const NO_ADDITIONAL_SENSE: u8 = 0x00;
    pub const LOGICAL_UNIT_NOT_READY: u8 = 0x04;
    pub const WRITE_ERROR: u8 = 0x0c;
    pub const UNRECOVERED_READ_ERROR: u8 = 0x11;
    pub const PARAMETER_LIST_LENGTH_ERROR: u8 = 0x1a;
    pub const INVALID_COMMAND_OPERATION_CODE: u8 = 0x20;
    pub const LBA_OUT_OF_RANGE: u8 = 0x21;
    pub const INVALID_FIELD_IN_CDB: u8 = 0x24;
    pub const LOGICAL_UNIT_NOT_SUPPORTED: u8 = 0x25;
    pub const WRITE_PROTECTED: u8 = 0x27;
    pub const INTERNAL_TARGET_FAILURE: u8 = 0x44;
    pub const MISCOMPARE_DURING_VERIFY: u8 = 0x1d;
}

/// Sense data response codes.
pub mod response_code {
    pub const FIXED_CURRENT: u8 = 0x70;
    pub const FIXED_DEFERRED: u8 = 0x71;
    pub const DESCRIPTOR_CURRENT: u8 = 0x72;
    pub const DESCRIPTOR_DEFERRED: u8 = 0x73;
}

/// Length of fixed-format sense data without additional bytes.
pub const FIXED_SENSE_LEN: usize = 18;

/// Operation codes.
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2a;
    pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;
    pub const READ_16: u8 = 0x88;
    pub const WRITE_16: u8 = 0x8a;
    pub const SYNCHRONIZE_CACHE_16: u8 = 0x91;
    pub const SERVICE_ACTION_IN_16: u8 = 0x9e;
    pub const REPORT_LUNS: u8 = 0xa0;

    /// SERVICE ACTION IN (16) service action for READ CAPACITY (16).
    pub const SA_READ_CAPACITY_16: u8 = 0x10;
}

/// CDB byte 1 bits.
pub mod cdb_flags {
    /// INQUIRY enable vital product data.
    pub const EVPD: u8 = 0x01;
    /// REQUEST SENSE descriptor format.
    pub const DESC: u8 = 0x01;
    /// READ and WRITE force unit access.
    pub const FUA: u8 = 0x08;
    /// Service action field of SERVICE ACTION IN.
    pub const SERVICE_ACTION_MASK: u8 = 0x1f;
}

/// A six byte CDB with a one byte allocation length (TEST UNIT READY,
/// REQUEST SENSE).
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Cdb6 {
    pub operation_code: u8,
    pub flags: u8,
    pub reserved: [u8; 2],
    pub allocation_length: u8,
    pub control: u8,
}

const_assert_eq!(size_of::<Cdb6>(), 6);

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct InquiryCdb {
    pub operation_code: u8,
    pub flags: u8,
    pub page_code: u8,
    pub allocation_length: U16,
    pub control: u8,
}

const_assert_eq!(size_of::<InquiryCdb>(), 6);

/// READ (10), WRITE (10), READ CAPACITY (10), SYNCHRONIZE CACHE (10).
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Cdb10 {
    pub operation_code: u8,
    pub flags: u8,
    pub logical_block: U32,
    pub group_number: u8,
    pub transfer_blocks: U16,
    pub control: u8,
}

const_assert_eq!(size_of::<Cdb10>(), 10);

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReportLunsCdb {
    pub operation_code: u8,
    pub reserved: u8,
    pub select_report: u8,
    pub reserved2: [u8; 3],
    pub allocation_length: U32,
    pub reserved3: u8,
    pub control: u8,
}

const_assert_eq!(size_of::<ReportLunsCdb>(), 12);

/// READ (16), WRITE (16), SYNCHRONIZE CACHE (16).
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Cdb16 {
    pub operation_code: u8,
    pub flags: u8,
    pub logical_block: U64,
    pub transfer_blocks: U32,
    pub group_number: u8,
    pub control: u8,
}

const_assert_eq!(size_of::<Cdb16>(), 16);

/// SERVICE ACTION IN (16), used for READ CAPACITY (16).
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ServiceActionIn16 {
    pub operation_code: u8,
    pub service_action: u8,
    pub logical_block: U64,
    pub allocation_length: U32,
    pub flags: u8,
    pub control: u8,
}

const_assert_eq!(size_of::<ServiceActionIn16>(), 16);

/// Standard INQUIRY data.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct InquiryData {
    pub peripheral: u8,
    pub removable: u8,
    pub version: u8,
    pub response_data_format: u8,
    pub additional_length: u8,
    pub sccs: u8,
    pub flags6: u8,
    pub flags7: u8,
    pub vendor_id: [u8; 8],
    pub product_id: [u8; 16],
    pub product_revision: [u8; 4],
}

const_assert_eq!(size_of::<InquiryData>(), 36);

/// INQUIRY `flags7` command queuing bit.
pub const INQUIRY_CMDQUE: u8 = 0x02;

/// The header of a VPD page.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct VpdPageHeader {
    pub peripheral: u8,
    pub page_code: u8,
    pub page_length: U16,
}

/// The header of REPORT LUNS parameter data.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReportLunsHeader {
    pub lun_list_length: U32,
    pub reserved: [u8; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReadCapacityData {
    pub last_lba: U32,
    pub block_length: U32,
}

const_assert_eq!(size_of::<ReadCapacityData>(), 8);

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct ReadCapacity16Data {
    pub last_lba: U64,
    pub block_length: U32,
    pub protection: u8,
    pub exponents: u8,
    pub lowest_aligned_lba: U16,
    pub reserved: [u8; 16],
}

const_assert_eq!(size_of::<ReadCapacity16Data>(), 32);

/// VPD page codes.
pub mod vpd {
    pub const SUPPORTED_PAGES: u8 = 0x00;
    pub const UNIT_SERIAL_NUMBER: u8 = 0x80;
}

/// Task management function codes accepted by bsg.
pub mod tmf {
    pub const ABORT_TASK: u8 = 0x01;
    pub const ABORT_TASK_SET: u8 = 0x02;
    pub const CLEAR_ACA: u8 = 0x03;
    pub const CLEAR_TASK_SET: u8 = 0x04;
    pub const LOGICAL_UNIT_RESET: u8 = 0x05;
    pub const I_T_NEXUS_RESET: u8 = 0x06;
    pub const QUERY_TASK: u8 = 0x07;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn cdb_layout() {
        let read10 = [0x28, 0x08, 0x00, 0x01, 0x02, 0x03, 0, 0x00, 0x08, 0];
        let cdb = Cdb10::read_from_bytes(&read10).unwrap();
        assert_eq!(cdb.logical_block.get(), 0x010203);
        assert_eq!(cdb.transfer_blocks.get(), 8);
        assert_eq!(cdb.flags & cdb_flags::FUA, cdb_flags::FUA);

        assert_eq!(offset_of!(Cdb16, transfer_blocks), 10);
        assert_eq!(offset_of!(ServiceActionIn16, allocation_length), 10);
        assert_eq!(offset_of!(ReportLunsCdb, allocation_length), 6);
        assert_eq!(offset_of!(InquiryData, product_id), 16);
    }
}
