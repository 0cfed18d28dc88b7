// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Translation of SCSI commands to NVMe commands for requests bound to NVMe
//! devices.
//!
//! Parsing and response building are pure functions over byte slices; the
//! request methods at the bottom issue the NVMe commands.

use crate::BadParamsReason;
use crate::PtError;
use crate::dispatch::buffer_len;
use crate::nvme;
use crate::nvme::NvmeQueue;
use crate::request::ScsiPt;
use crate::sense::SenseInfo;
use nix::errno::Errno;
use sg_defs::nvme::IDENTIFY_LEN;
use sg_defs::nvme::NvmeStatus;
use sg_defs::nvme::cns;
use sg_defs::nvme::id_ctrl;
use sg_defs::nvme::id_ns;
use sg_defs::nvme::nvm;
use sg_defs::nvme::nvme_passthru_cmd;
use sg_defs::scsi::Cdb6;
use sg_defs::scsi::Cdb10;
use sg_defs::scsi::Cdb16;
use sg_defs::scsi::INQUIRY_CMDQUE;
use sg_defs::scsi::InquiryCdb;
use sg_defs::scsi::InquiryData;
use sg_defs::scsi::ReadCapacity16Data;
use sg_defs::scsi::ReadCapacityData;
use sg_defs::scsi::ReportLunsCdb;
use sg_defs::scsi::ReportLunsHeader;
use sg_defs::scsi::ServiceActionIn16;
use sg_defs::scsi::VpdPageHeader;
use sg_defs::scsi::asc;
use sg_defs::scsi::cdb_flags;
use sg_defs::scsi::opcode;
use sg_defs::scsi::sense_key;
use sg_defs::scsi::vpd;
use std::os::fd::RawFd;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;
use zerocopy::big_endian;
use zerocopy::little_endian;

/// Largest transfer of a single READ or WRITE, in logical blocks.
const MAX_TRANSFER_BLOCKS: u32 = 0x10000;

/// NVMe read/write CDW12 force unit access bit.
const CDW12_FUA: u32 = 1 << 30;

/// Maximum number of entries in an active namespace id list.
const MAX_NAMESPACE_LIST: usize = IDENTIFY_LEN / 4;

const VENDOR_ID: &[u8; 8] = b"NVMe    ";

/// A SCSI command the translation layer understands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SntlCommand {
    TestUnitReady,
    RequestSense { descriptor: bool, alloc_len: usize },
    Inquiry { page: Option<u8>, alloc_len: usize },
    ReportLuns { alloc_len: usize },
    ReadCapacity10,
    ReadCapacity16 { alloc_len: usize },
    SynchronizeCache,
    Read(Transfer),
    Write(Transfer),
}

/// The block range of a READ or WRITE.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Transfer {
    pub lba: u64,
    pub blocks: u32,
    pub fua: bool,
}

/// Reads the fixed part of a CDB, failing if it is truncated.
fn read_cdb<T: FromBytes>(cdb: &[u8]) -> Result<T, SenseInfo> {
    T::read_from_prefix(cdb)
        .map(|(cdb, _)| cdb)
        .map_err(|_| SenseInfo::INVALID_FIELD_IN_CDB)
}

/// Decodes `cdb`, or returns the sense describing why it is not supported.
pub(crate) fn parse_cdb(cdb: &[u8]) -> Result<SntlCommand, SenseInfo> {
    let op = *cdb.first().ok_or(SenseInfo::INVALID_OPCODE)?;
    let command = match op {
        opcode::TEST_UNIT_READY => {
            read_cdb::<Cdb6>(cdb)?;
            SntlCommand::TestUnitReady
        }
        opcode::REQUEST_SENSE => {
            let cdb: Cdb6 = read_cdb(cdb)?;
            SntlCommand::RequestSense {
                descriptor: cdb.flags & cdb_flags::DESC != 0,
                alloc_len: cdb.allocation_length.into(),
            }
        }
        opcode::INQUIRY => {
            let cdb: InquiryCdb = read_cdb(cdb)?;
            let evpd = cdb.flags & cdb_flags::EVPD != 0;
            if !evpd && cdb.page_code != 0 {
                return Err(SenseInfo::INVALID_FIELD_IN_CDB);
            }
            SntlCommand::Inquiry {
                page: evpd.then_some(cdb.page_code),
                alloc_len: cdb.allocation_length.get().into(),
            }
        }
        opcode::REPORT_LUNS => {
            let cdb: ReportLunsCdb = read_cdb(cdb)?;
            // Only the logical units accessible to the initiator are known.
            if cdb.select_report > 2 {
                return Err(SenseInfo::INVALID_FIELD_IN_CDB);
            }
            let alloc_len = cdb.allocation_length.get() as usize;
            if alloc_len < 16 {
                return Err(SenseInfo::INVALID_FIELD_IN_CDB);
            }
            SntlCommand::ReportLuns { alloc_len }
        }
        opcode::READ_CAPACITY_10 => {
            read_cdb::<Cdb10>(cdb)?;
            SntlCommand::ReadCapacity10
        }
        opcode::SERVICE_ACTION_IN_16 => {
            let cdb: ServiceActionIn16 = read_cdb(cdb)?;
            if cdb.service_action & cdb_flags::SERVICE_ACTION_MASK != opcode::SA_READ_CAPACITY_16
            {
                return Err(SenseInfo::INVALID_FIELD_IN_CDB);
            }
            SntlCommand::ReadCapacity16 {
                alloc_len: cdb.allocation_length.get() as usize,
            }
        }
        opcode::SYNCHRONIZE_CACHE_10 => {
            read_cdb::<Cdb10>(cdb)?;
            SntlCommand::SynchronizeCache
        }
        opcode::SYNCHRONIZE_CACHE_16 => {
            read_cdb::<Cdb16>(cdb)?;
            SntlCommand::SynchronizeCache
        }
        opcode::READ_10 | opcode::WRITE_10 => {
            let cdb: Cdb10 = read_cdb(cdb)?;
            let transfer = Transfer {
                lba: cdb.logical_block.get().into(),
                blocks: cdb.transfer_blocks.get().into(),
                fua: cdb.flags & cdb_flags::FUA != 0,
            };
            if op == opcode::READ_10 {
                SntlCommand::Read(transfer)
            } else {
                SntlCommand::Write(transfer)
            }
        }
        opcode::READ_16 | opcode::WRITE_16 => {
            let cdb: Cdb16 = read_cdb(cdb)?;
            let transfer = Transfer {
                lba: cdb.logical_block.get(),
                blocks: cdb.transfer_blocks.get(),
                fua: cdb.flags & cdb_flags::FUA != 0,
            };
            if op == opcode::READ_16 {
                SntlCommand::Read(transfer)
            } else {
                SntlCommand::Write(transfer)
            }
        }
        _ => return Err(SenseInfo::INVALID_OPCODE),
    };
    Ok(command)
}

/// Copies an ASCII identify field into `dst`, padding with spaces.
fn copy_ascii(dst: &mut [u8], src: &[u8]) {
    dst.fill(b' ');
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = if s.is_ascii_graphic() || s == b' ' { s } else { b' ' };
    }
}

fn trim_ascii(field: &[u8]) -> &[u8] {
    let end = field
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    &field[..end]
}

/// Standard INQUIRY data for a direct access block device.
pub(crate) fn standard_inquiry(identify: &[u8; IDENTIFY_LEN]) -> InquiryData {
    let mut data = InquiryData {
        version: 0x06, // SPC-4
        response_data_format: 0x02,
        additional_length: (size_of::<InquiryData>() - 5) as u8,
        flags7: INQUIRY_CMDQUE,
        vendor_id: *VENDOR_ID,
        ..FromZeros::new_zeroed()
    };
    copy_ascii(&mut data.product_id, &identify[id_ctrl::MN]);
    copy_ascii(&mut data.product_revision, trim_ascii(&identify[id_ctrl::FR]));
    data
}

fn vpd_page(page_code: u8, payload: &[u8]) -> Vec<u8> {
    let header = VpdPageHeader {
        peripheral: 0,
        page_code,
        page_length: big_endian::U16::new(payload.len() as u16),
    };
    [header.as_bytes(), payload].concat()
}

pub(crate) fn vpd_supported_pages() -> Vec<u8> {
    vpd_page(
        vpd::SUPPORTED_PAGES,
        &[vpd::SUPPORTED_PAGES, vpd::UNIT_SERIAL_NUMBER],
    )
}

pub(crate) fn vpd_unit_serial(identify: &[u8; IDENTIFY_LEN]) -> Vec<u8> {
    vpd_page(vpd::UNIT_SERIAL_NUMBER, trim_ascii(&identify[id_ctrl::SN]))
}

/// Encodes a logical unit number as an 8-byte SAM LUN: peripheral device
/// addressing below 256, flat space addressing above.
fn encode_lun(lun: u32) -> Option<[u8; 8]> {
    let mut bytes = [0; 8];
    match lun {
        0..=0xff => bytes[1] = lun as u8,
        0x100..=0x3fff => {
            bytes[0] = 0x40 | (lun >> 8) as u8;
            bytes[1] = lun as u8;
        }
        _ => return None,
    }
    Some(bytes)
}

/// REPORT LUNS parameter data. Namespace `n` is LUN `n - 1`.
pub(crate) fn report_luns(nsids: &[u32]) -> Vec<u8> {
    let luns: Vec<[u8; 8]> = nsids
        .iter()
        .filter_map(|&nsid| encode_lun(nsid.checked_sub(1)?))
        .collect();
    let header = ReportLunsHeader {
        lun_list_length: big_endian::U32::new((luns.len() * 8) as u32),
        reserved: [0; 4],
    };
    let mut data = Vec::with_capacity(size_of::<ReportLunsHeader>() + luns.len() * 8);
    data.extend_from_slice(header.as_bytes());
    for lun in &luns {
        data.extend_from_slice(lun);
    }
    data
}

/// The size and logical block length of a namespace.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct NamespaceGeometry {
    pub blocks: u64,
    pub block_size: u32,
}

impl NamespaceGeometry {
    /// Parses an IDENTIFY NAMESPACE response. Returns `None` for an
    /// inactive namespace or an unusable LBA format.
    pub fn parse(identify: &[u8; IDENTIFY_LEN]) -> Option<Self> {
        let (blocks, _) = little_endian::U64::read_from_prefix(&identify[id_ns::NSZE..]).ok()?;
        let blocks = blocks.get();
        let format = usize::from(identify[id_ns::FLBAS] & 0xf);
        let lbads = identify[id_ns::LBAF + format * 4 + 2];
        if blocks == 0 || !(9..32).contains(&lbads) {
            return None;
        }
        Some(Self {
            blocks,
            block_size: 1 << lbads,
        })
    }

    fn last_lba(&self) -> u64 {
        self.blocks - 1
    }
}

pub(crate) fn read_capacity10(geometry: &NamespaceGeometry) -> ReadCapacityData {
    ReadCapacityData {
        last_lba: u32::try_from(geometry.last_lba())
            .unwrap_or(u32::MAX)
            .into(),
        block_length: geometry.block_size.into(),
    }
}

pub(crate) fn read_capacity16(geometry: &NamespaceGeometry) -> ReadCapacity16Data {
    ReadCapacity16Data {
        last_lba: geometry.last_lba().into(),
        block_length: geometry.block_size.into(),
        ..FromZeros::new_zeroed()
    }
}

/// Parses an active namespace id list: little-endian ids up to the first
/// zero entry.
pub(crate) fn parse_namespace_list(list: &[u8]) -> Vec<u32> {
    list.chunks_exact(4)
        .take(MAX_NAMESPACE_LIST)
        .map(|id| little_endian::U32::read_from_bytes(id).map_or(0, |id| id.get()))
        .take_while(|&id| id != 0)
        .collect()
}

/// REQUEST SENSE parameter data reporting no pending condition.
pub(crate) fn request_sense_response(descriptor: bool) -> Vec<u8> {
    let none = SenseInfo::new(sense_key::NO_SENSE, asc::NO_ADDITIONAL_SENSE, 0);
    if descriptor {
        none.to_descriptor().to_vec()
    } else {
        none.to_fixed().to_vec()
    }
}

#[derive(Debug, Error)]
pub(crate) enum SntlError {
    #[error("check condition")]
    Check(SenseInfo),
    #[error("nvme status {0:?}")]
    Nvme(NvmeStatus),
    #[error("os error")]
    Os(#[from] Errno),
    #[error("bad parameters")]
    BadParams(#[from] BadParamsReason),
}

fn check_status(status: NvmeStatus) -> Result<(), SntlError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SntlError::Nvme(status))
    }
}

impl ScsiPt<'_> {
    pub(crate) fn do_sntl(&mut self, fd: RawFd, cdb: &[u8], timeout_ms: u32) -> Result<(), PtError> {
        let command = match parse_cdb(cdb) {
            Ok(command) => command,
            Err(sense) => {
                tracing::debug!(fd, ?cdb, "scsi command not translated");
                self.set_check_condition(sense);
                return Ok(());
            }
        };
        tracing::debug!(fd, ?command, "translating scsi command");

        match self.execute_sntl(fd, command, timeout_ms) {
            Ok(()) => Ok(()),
            Err(SntlError::Check(sense)) => {
                self.set_check_condition(sense);
                Ok(())
            }
            Err(SntlError::Nvme(status)) => {
                self.completion.nvme_status = status;
                self.set_check_condition(SenseInfo::from_nvme_status(status));
                Ok(())
            }
            Err(SntlError::Os(err)) => Err(self.os_error(err)),
            Err(SntlError::BadParams(reason)) => Err(reason.into()),
        }
    }

    /// The namespace addressed by namespace-scoped commands. A controller
    /// handle addresses namespace 1.
    fn sntl_nsid(&self) -> u32 {
        match self.nvme_nsid() {
            0 => 1,
            nsid => nsid,
        }
    }

    fn execute_sntl(
        &mut self,
        fd: RawFd,
        command: SntlCommand,
        timeout_ms: u32,
    ) -> Result<(), SntlError> {
        let nsid = self.sntl_nsid();
        match command {
            SntlCommand::TestUnitReady => {
                self.identify_controller(fd, timeout_ms)?;
            }
            SntlCommand::RequestSense {
                descriptor,
                alloc_len,
            } => {
                self.respond(&request_sense_response(descriptor), alloc_len);
            }
            SntlCommand::Inquiry {
                page: None,
                alloc_len,
            } => {
                let data = standard_inquiry(self.identify_controller(fd, timeout_ms)?);
                self.respond(data.as_bytes(), alloc_len);
            }
            SntlCommand::Inquiry {
                page: Some(vpd::SUPPORTED_PAGES),
                alloc_len,
            } => {
                self.respond(&vpd_supported_pages(), alloc_len);
            }
            SntlCommand::Inquiry {
                page: Some(vpd::UNIT_SERIAL_NUMBER),
                alloc_len,
            } => {
                let data = vpd_unit_serial(self.identify_controller(fd, timeout_ms)?);
                self.respond(&data, alloc_len);
            }
            SntlCommand::Inquiry { page: Some(_), .. } => {
                return Err(SntlError::Check(SenseInfo::INVALID_FIELD_IN_CDB));
            }
            SntlCommand::ReportLuns { alloc_len } => {
                let mut list = Box::new([0u8; IDENTIFY_LEN]);
                check_status(nvme::identify(
                    fd,
                    cns::ACTIVE_NAMESPACES,
                    0,
                    &mut list,
                    timeout_ms,
                )?)?;
                self.respond(&report_luns(&parse_namespace_list(&list[..])), alloc_len);
            }
            SntlCommand::ReadCapacity10 => {
                let geometry = self.namespace_geometry(fd, nsid, timeout_ms)?;
                self.respond(read_capacity10(&geometry).as_bytes(), usize::MAX);
            }
            SntlCommand::ReadCapacity16 { alloc_len } => {
                let geometry = self.namespace_geometry(fd, nsid, timeout_ms)?;
                self.respond(read_capacity16(&geometry).as_bytes(), alloc_len);
            }
            SntlCommand::SynchronizeCache => {
                let mut cmd = nvme_passthru_cmd {
                    opcode: nvm::FLUSH,
                    nsid,
                    timeout_ms,
                    ..Default::default()
                };
                // SAFETY: FLUSH transfers no data.
                check_status(unsafe { nvme::submit(fd, NvmeQueue::Io, &mut cmd) }?)?;
            }
            SntlCommand::Read(transfer) => {
                self.read_write(fd, nsid, transfer, false, timeout_ms)?;
            }
            SntlCommand::Write(transfer) => {
                self.read_write(fd, nsid, transfer, true, timeout_ms)?;
            }
        }
        Ok(())
    }

    /// Returns the controller's IDENTIFY data, fetching it on first use.
    fn identify_controller(
        &mut self,
        fd: RawFd,
        timeout_ms: u32,
    ) -> Result<&[u8; IDENTIFY_LEN], SntlError> {
        let identify = match self.id_ctrl.take() {
            Some(identify) => identify,
            None => {
                let mut identify = Box::new([0u8; IDENTIFY_LEN]);
                check_status(nvme::identify(
                    fd,
                    cns::CONTROLLER,
                    0,
                    &mut identify,
                    timeout_ms,
                )?)?;
                tracing::debug!(fd, "cached controller identify data");
                identify
            }
        };
        let identify: &[u8; IDENTIFY_LEN] = self.id_ctrl.insert(identify);
        Ok(identify)
    }

    fn namespace_geometry(
        &self,
        fd: RawFd,
        nsid: u32,
        timeout_ms: u32,
    ) -> Result<NamespaceGeometry, SntlError> {
        let mut identify = Box::new([0u8; IDENTIFY_LEN]);
        check_status(nvme::identify(fd, cns::NAMESPACE, nsid, &mut identify, timeout_ms)?)?;
        NamespaceGeometry::parse(&identify).ok_or(SntlError::Check(SenseInfo::new(
            sense_key::ILLEGAL_REQUEST,
            asc::LOGICAL_UNIT_NOT_SUPPORTED,
            0,
        )))
    }

    /// Copies response data into the data-in buffer, limited by the
    /// allocation length, and records the residual.
    fn respond(&mut self, data: &[u8], alloc_len: usize) {
        let Some(buf) = self.data_in.as_deref_mut() else {
            return;
        };
        let len = data.len().min(alloc_len).min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        self.completion.din_resid = i32::try_from(buf.len() - len).unwrap_or(i32::MAX);
    }

    fn read_write(
        &mut self,
        fd: RawFd,
        nsid: u32,
        transfer: Transfer,
        write: bool,
        timeout_ms: u32,
    ) -> Result<(), SntlError> {
        let Transfer { lba, blocks, fua } = transfer;
        if blocks == 0 {
            return Ok(());
        }
        if blocks > MAX_TRANSFER_BLOCKS {
            return Err(SntlError::Check(SenseInfo::INVALID_FIELD_IN_CDB));
        }

        let geometry = self.namespace_geometry(fd, nsid, timeout_ms)?;
        if lba
            .checked_add(blocks.into())
            .is_none_or(|end| end > geometry.blocks)
        {
            return Err(SntlError::Check(SenseInfo::new(
                sense_key::ILLEGAL_REQUEST,
                asc::LBA_OUT_OF_RANGE,
                0,
            )));
        }

        let needed = u64::from(blocks) * u64::from(geometry.block_size);
        let (addr, provided) = if write {
            self.data_out
                .map_or((0, 0), |buf| (buf.as_ptr() as u64, buf.len()))
        } else {
            self.data_in
                .as_deref_mut()
                .map_or((0, 0), |buf| (buf.as_mut_ptr() as u64, buf.len()))
        };
        if (provided as u64) < needed {
            return Err(BadParamsReason::BufferTooSmall { needed, provided }.into());
        }

        let mut cmd = nvme_passthru_cmd {
            opcode: if write { nvm::WRITE } else { nvm::READ },
            nsid,
            addr,
            data_len: buffer_len(needed as usize)?,
            cdw10: lba as u32,
            cdw11: (lba >> 32) as u32,
            cdw12: (blocks - 1) | if fua { CDW12_FUA } else { 0 },
            timeout_ms,
            ..Default::default()
        };
        tracing::trace!(fd, nsid, lba, blocks, write, "nvm read/write");
        // SAFETY: the data address is a buffer borrowed by this request that
        // holds at least `data_len` bytes.
        check_status(unsafe { nvme::submit(fd, NvmeQueue::Io, &mut cmd) }?)?;

        let resid = provided - needed as usize;
        let resid = i32::try_from(resid).unwrap_or(i32::MAX);
        if write {
            self.completion.dout_resid = resid;
        } else {
            self.completion.din_resid = resid;
        }
        Ok(())
    }
}
