// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The `SG_IO` interfaces: the v3 header used by the `sg` driver and the v4
//! header used by `bsg` nodes.

use bitfield_struct::bitfield;
use libc::c_int;
use libc::c_uint;
use libc::c_void;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// `SG_IO`. Not encoded with `_IOWR`; the same request number serves both
/// header versions.
pub const SG_IO: u32 = 0x2285;

/// Interface id of a v3 header (`'S'`).
pub const SG_INTERFACE_ID_ORIG: c_int = b'S' as c_int;

pub const SG_DXFER_NONE: c_int = -1;
pub const SG_DXFER_TO_DEV: c_int = -2;
pub const SG_DXFER_FROM_DEV: c_int = -3;

pub const SG_FLAG_Q_AT_TAIL: u32 = 0x10;
pub const SG_FLAG_Q_AT_HEAD: u32 = 0x20;

/// Guard value of a v4 header (`'Q'`).
pub const BSG_GUARD: i32 = b'Q' as i32;
pub const BSG_PROTOCOL_SCSI: u32 = 0;
pub const BSG_SUB_PROTOCOL_SCSI_CMD: u32 = 0;
pub const BSG_SUB_PROTOCOL_SCSI_TMF: u32 = 1;

pub const BSG_FLAG_Q_AT_TAIL: u32 = 0x10;
pub const BSG_FLAG_Q_AT_HEAD: u32 = 0x20;

/// Queue ordering flags shared by the v3 and v4 headers.
#[bitfield(u32)]
#[derive(IntoBytes, Immutable, KnownLayout, FromBytes, PartialEq, Eq)]
pub struct QueueFlags {
    #[bits(4)]
    _reserved: u8,
    pub at_tail: bool, // SG_FLAG_Q_AT_TAIL, BSG_FLAG_Q_AT_TAIL
    pub at_head: bool, // SG_FLAG_Q_AT_HEAD, BSG_FLAG_Q_AT_HEAD
    #[bits(26)]
    _reserved2: u32,
}

const_assert_eq!(SG_FLAG_Q_AT_TAIL, QueueFlags::new().with_at_tail(true).into_bits());
const_assert_eq!(BSG_FLAG_Q_AT_HEAD, QueueFlags::new().with_at_head(true).into_bits());

/// The v3 `sg_io_hdr` from `<scsi/sg.h>`.
#[repr(C)]
#[derive(Debug)]
#[expect(non_camel_case_types)]
pub struct sg_io_hdr {
    pub interface_id: c_int,
    pub dxfer_direction: c_int,
    pub cmd_len: u8,
    pub mx_sb_len: u8,
    pub iovec_count: u16,
    pub dxfer_len: c_uint,
    pub dxferp: *mut c_void,
    pub cmdp: *const u8,
    pub sbp: *mut u8,
    pub timeout: c_uint,
    pub flags: c_uint,
    pub pack_id: c_int,
    pub usr_ptr: *mut c_void,
    pub status: u8,
    pub masked_status: u8,
    pub msg_status: u8,
    pub sb_len_wr: u8,
    pub host_status: u16,
    pub driver_status: u16,
    pub resid: c_int,
    pub duration: c_uint,
    pub info: c_uint,
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(size_of::<sg_io_hdr>(), 88);

impl Default for sg_io_hdr {
    fn default() -> Self {
        Self {
            interface_id: SG_INTERFACE_ID_ORIG,
            dxfer_direction: SG_DXFER_NONE,
            cmd_len: 0,
            mx_sb_len: 0,
            iovec_count: 0,
            dxfer_len: 0,
            dxferp: std::ptr::null_mut(),
            cmdp: std::ptr::null(),
            sbp: std::ptr::null_mut(),
            timeout: 0,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        }
    }
}

/// The v4 `sg_io_v4` from `<linux/bsg.h>`. Pointers are carried as `u64`.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, FromBytes)]
#[expect(non_camel_case_types)]
pub struct sg_io_v4 {
    pub guard: i32,
    pub protocol: u32,
    pub subprotocol: u32,
    pub request_len: u32,
    pub request: u64,
    pub request_tag: u64,
    pub request_attr: u32,
    pub request_priority: u32,
    pub request_extra: u32,
    pub max_response_len: u32,
    pub response: u64,
    pub dout_iovec_count: u32,
    pub dout_xfer_len: u32,
    pub din_iovec_count: u32,
    pub din_xfer_len: u32,
    pub dout_xferp: u64,
    pub din_xferp: u64,
    pub timeout: u32,
    pub flags: u32,
    pub usr_ptr: u64,
    pub spare_in: u32,
    pub driver_status: u32,
    pub transport_status: u32,
    pub device_status: u32,
    pub retry_delay: u32,
    pub info: u32,
    pub duration: u32,
    pub response_len: u32,
    pub din_resid: i32,
    pub dout_resid: i32,
    pub generated_tag: u64,
    pub spare_out: u32,
    pub padding: u32,
}

const_assert_eq!(size_of::<sg_io_v4>(), 160);

/// Host (transport) status bytes, `DID_*`.
pub mod host {
    pub const DID_OK: u16 = 0x00;
    pub const DID_NO_CONNECT: u16 = 0x01;
    pub const DID_BUS_BUSY: u16 = 0x02;
    pub const DID_TIME_OUT: u16 = 0x03;
    pub const DID_BAD_TARGET: u16 = 0x04;
    pub const DID_ABORT: u16 = 0x05;
    pub const DID_PARITY: u16 = 0x06;
    pub const DID_ERROR: u16 = 0x07;
    pub const DID_RESET: u16 = 0x08;
    pub const DID_BAD_INTR: u16 = 0x09;
    pub const DID_PASSTHROUGH: u16 = 0x0a;
    pub const DID_SOFT_ERROR: u16 = 0x0b;
    pub const DID_IMM_RETRY: u16 = 0x0c;
    pub const DID_REQUEUE: u16 = 0x0d;
    pub const DID_TRANSPORT_DISRUPTED: u16 = 0x0e;
    pub const DID_TRANSPORT_FAILFAST: u16 = 0x0f;
    pub const DID_TARGET_FAILURE: u16 = 0x10;
    pub const DID_NEXUS_FAILURE: u16 = 0x11;
    pub const DID_ALLOC_FAILURE: u16 = 0x12;
    pub const DID_MEDIUM_ERROR: u16 = 0x13;
}

/// Driver status bytes, `DRIVER_*` in the low nibble and `SUGGEST_*` in the
/// high nibble.
pub mod driver {
    pub const DRIVER_OK: u16 = 0x00;
    pub const DRIVER_BUSY: u16 = 0x01;
    pub const DRIVER_SOFT: u16 = 0x02;
    pub const DRIVER_MEDIA: u16 = 0x03;
    pub const DRIVER_ERROR: u16 = 0x04;
    pub const DRIVER_INVALID: u16 = 0x05;
    pub const DRIVER_TIMEOUT: u16 = 0x06;
    pub const DRIVER_HARD: u16 = 0x07;
    pub const DRIVER_SENSE: u16 = 0x08;
    pub const DRIVER_MASK: u16 = 0x0f;

    pub const SUGGEST_RETRY: u16 = 0x10;
    pub const SUGGEST_ABORT: u16 = 0x20;
    pub const SUGGEST_REMAP: u16 = 0x30;
    pub const SUGGEST_DIE: u16 = 0x40;
    pub const SUGGEST_SENSE: u16 = 0x80;
    pub const SUGGEST_MASK: u16 = 0xf0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;
    use zerocopy::FromZeros;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn v3_layout() {
        assert_eq!(offset_of!(sg_io_hdr, dxfer_len), 12);
        assert_eq!(offset_of!(sg_io_hdr, dxferp), 16);
        assert_eq!(offset_of!(sg_io_hdr, timeout), 40);
        assert_eq!(offset_of!(sg_io_hdr, usr_ptr), 56);
        assert_eq!(offset_of!(sg_io_hdr, status), 64);
        assert_eq!(offset_of!(sg_io_hdr, host_status), 68);
        assert_eq!(offset_of!(sg_io_hdr, resid), 72);
        assert_eq!(offset_of!(sg_io_hdr, info), 80);
    }

    #[test]
    fn v4_layout() {
        assert_eq!(offset_of!(sg_io_v4, request), 16);
        assert_eq!(offset_of!(sg_io_v4, response), 48);
        assert_eq!(offset_of!(sg_io_v4, dout_xferp), 72);
        assert_eq!(offset_of!(sg_io_v4, timeout), 88);
        assert_eq!(offset_of!(sg_io_v4, driver_status), 108);
        assert_eq!(offset_of!(sg_io_v4, din_resid), 136);
        assert_eq!(offset_of!(sg_io_v4, generated_tag), 144);

        let hdr = sg_io_v4::new_zeroed();
        assert_eq!(hdr.as_bytes().len(), 160);
    }

    #[test]
    fn queue_flags() {
        let flags = QueueFlags::from_bits(SG_FLAG_Q_AT_HEAD | SG_FLAG_Q_AT_TAIL);
        assert!(flags.at_head());
        assert!(flags.at_tail());
        assert_eq!(QueueFlags::new().into_bits(), 0);
    }
}
