// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The NVMe passthrough path.

use crate::BadParamsReason;
use crate::PtError;
use crate::dispatch::buffer_len;
use crate::ioctls;
use crate::request::PtCommand;
use crate::request::ScsiPt;
use crate::sense::SenseInfo;
use nix::errno::Errno;
use sg_defs::nvme::DataDirection;
use sg_defs::nvme::IDENTIFY_LEN;
use sg_defs::nvme::NvmeStatus;
use sg_defs::nvme::SQE_LEN;
use sg_defs::nvme::admin;
use sg_defs::nvme::nvme_passthru_cmd;
use sg_defs::scsi::status;
use std::os::fd::RawFd;
use std::time::Instant;
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::U32;

/// The queue a raw NVMe command is submitted to.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum NvmeQueue {
    /// The admin queue, `NVME_IOCTL_ADMIN_CMD`.
    #[default]
    Admin,
    /// An I/O queue, `NVME_IOCTL_IO_CMD`.
    Io,
}

/// Submits `cmd` and returns its completion status. The kernel reports the
/// status as a positive return value; negative returns are OS errors.
///
/// # Safety
///
/// The data and metadata addresses in `cmd` must be valid for the lengths
/// beside them, for reads or writes as the opcode requires.
pub(crate) unsafe fn submit(
    fd: RawFd,
    queue: NvmeQueue,
    cmd: &mut nvme_passthru_cmd,
) -> Result<NvmeStatus, Errno> {
    // SAFETY: guaranteed by the caller.
    let ret = unsafe {
        match queue {
            NvmeQueue::Admin => ioctls::nvme_admin_cmd(fd, cmd),
            NvmeQueue::Io => ioctls::nvme_io_cmd(fd, cmd),
        }
    }?;
    Ok(NvmeStatus::from_bits(ret as u16))
}

/// Issues IDENTIFY with the given CNS into `buf`.
pub(crate) fn identify(
    fd: RawFd,
    cns: u32,
    nsid: u32,
    buf: &mut [u8; IDENTIFY_LEN],
    timeout_ms: u32,
) -> Result<NvmeStatus, Errno> {
    let mut cmd = nvme_passthru_cmd {
        opcode: admin::IDENTIFY,
        nsid,
        addr: buf.as_mut_ptr() as u64,
        data_len: IDENTIFY_LEN as u32,
        cdw10: cns,
        timeout_ms,
        ..Default::default()
    };
    tracing::trace!(fd, cns, nsid, "nvme identify");
    // SAFETY: the data address is `buf`, which is IDENTIFY_LEN bytes and
    // mutably borrowed for the duration of the call.
    unsafe { submit(fd, NvmeQueue::Admin, &mut cmd) }
}

/// Maps a raw submission queue entry to a passthrough command. Data and
/// metadata pointers in the entry are ignored.
pub(crate) fn nvme_command(sqe: &[u8]) -> Result<nvme_passthru_cmd, BadParamsReason> {
    let dw = <[U32; SQE_LEN / 4]>::read_from_bytes(sqe)
        .map_err(|_| BadParamsReason::CommandTooLong(sqe.len()))?
        .map(|dw| dw.get());
    Ok(nvme_passthru_cmd {
        opcode: dw[0] as u8,
        flags: (dw[0] >> 8) as u8,
        nsid: dw[1],
        cdw2: dw[2],
        cdw3: dw[3],
        cdw10: dw[10],
        cdw11: dw[11],
        cdw12: dw[12],
        cdw13: dw[13],
        cdw14: dw[14],
        cdw15: dw[15],
        ..Default::default()
    })
}

impl ScsiPt<'_> {
    pub(crate) fn do_nvm_pt(&mut self, fd: RawFd, timeout_ms: u32) -> Result<(), PtError> {
        let cdb = match self.command {
            Some(PtCommand::Cdb(cdb)) if !cdb.is_empty() => cdb,
            Some(PtCommand::TaskManagement(_)) => {
                return Err(BadParamsReason::TaskManagementUnsupported.into());
            }
            _ => return Err(BadParamsReason::NoCommand.into()),
        };
        if self.data_in.is_some() && self.data_out.is_some() {
            return Err(BadParamsReason::Bidirectional.into());
        }

        let start = Instant::now();
        let result = if cdb.len() == SQE_LEN {
            self.do_nvme_command(fd, cdb, timeout_ms)
        } else if self.config.sntl {
            self.do_sntl(fd, cdb, timeout_ms)
        } else {
            return Err(BadParamsReason::NotNvmeCommand.into());
        };
        self.completion.duration = start.elapsed();
        result
    }

    fn do_nvme_command(&mut self, fd: RawFd, sqe: &[u8], timeout_ms: u32) -> Result<(), PtError> {
        let mut cmd = nvme_command(sqe)?;
        let direction = DataDirection::from_opcode(cmd.opcode);
        let buffer_direction = match (self.data_in.as_deref_mut(), self.data_out) {
            (Some(buf), None) => {
                cmd.data_len = buffer_len(buf.len())?;
                cmd.addr = buf.as_mut_ptr() as u64;
                DataDirection::ControllerToHost
            }
            (None, Some(buf)) => {
                cmd.data_len = buffer_len(buf.len())?;
                cmd.addr = buf.as_ptr() as u64;
                DataDirection::HostToController
            }
            (None, None) => DataDirection::None,
            (Some(_), Some(_)) => return Err(BadParamsReason::Bidirectional.into()),
        };
        if buffer_direction != direction {
            tracing::debug!(
                opcode = cmd.opcode,
                ?direction,
                ?buffer_direction,
                "data buffer does not match the opcode's transfer direction"
            );
        }
        if let Some(metadata) = self.metadata.as_mut() {
            cmd.metadata_len = buffer_len(metadata.len())?;
            cmd.metadata = metadata.addr();
        }
        cmd.timeout_ms = timeout_ms;

        tracing::trace!(
            fd,
            opcode = cmd.opcode,
            nsid = cmd.nsid,
            data_len = cmd.data_len,
            queue = ?self.nvme_queue,
            "nvme passthrough"
        );
        // SAFETY: the data and metadata addresses come from buffers borrowed
        // by this request and the lengths beside them are their lengths.
        let status = unsafe { submit(fd, self.nvme_queue, &mut cmd) }
            .map_err(|err| self.os_error(err))?;

        self.completion.nvme_result = cmd.result;
        self.completion.nvme_status = status;
        if !status.is_success() {
            tracing::debug!(
                opcode = cmd.opcode,
                sct = status.sct(),
                sc = status.sc(),
                "nvme command failed"
            );
            self.set_check_condition(SenseInfo::from_nvme_status(status));
            return Err(PtError::NvmeStatus(status));
        }
        Ok(())
    }

    /// Reports CHECK CONDITION with fixed-format sense, as far as the sense
    /// buffer allows.
    pub(crate) fn set_check_condition(&mut self, sense: SenseInfo) {
        self.completion.device_status = status::CHECK_CONDITION;
        self.completion.sense_len = match self.sense.as_deref_mut() {
            Some(buf) => sense.write_fixed(buf) as u32,
            None => 0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PtConfig;
    use crate::category::ResultCategory;
    use crate::request::Metadata;
    use sg_defs::nvme::nvm;
    use sg_defs::scsi::sense_key;
    use sg_defs::scsi::tmf;
    use std::os::fd::AsRawFd;
    use zerocopy::IntoBytes;

    fn sqe(dwords: [u32; 16]) -> [u8; SQE_LEN] {
        let mut sqe = [0; SQE_LEN];
        sqe.copy_from_slice(dwords.map(U32::new).as_bytes());
        sqe
    }

    #[test]
    fn sqe_mapping() {
        let mut dw = [0; 16];
        dw[0] = 0xabcd_4002; // cid 0xabcd, flags 0x40, READ
        dw[1] = 3;
        dw[2] = 0x22;
        dw[3] = 0x33;
        dw[6] = 0xdead_beef; // PRP1 is not used
        for (i, dw) in dw.iter_mut().enumerate().skip(10) {
            *dw = i as u32 * 0x100;
        }
        let cmd = nvme_command(&sqe(dw)).unwrap();
        assert_eq!(cmd.opcode, nvm::READ);
        assert_eq!(cmd.flags, 0x40);
        assert_eq!(cmd.nsid, 3);
        assert_eq!((cmd.cdw2, cmd.cdw3), (0x22, 0x33));
        assert_eq!(cmd.addr, 0);
        assert_eq!(
            [cmd.cdw10, cmd.cdw11, cmd.cdw12, cmd.cdw13, cmd.cdw14, cmd.cdw15],
            [0xa00, 0xb00, 0xc00, 0xd00, 0xe00, 0xf00]
        );
    }

    #[test]
    fn sqe_length() {
        assert_eq!(
            nvme_command(&[0; 16]).unwrap_err(),
            BadParamsReason::CommandTooLong(16)
        );
    }

    #[test]
    fn default_queue() {
        assert_eq!(NvmeQueue::default(), NvmeQueue::Admin);
        assert_eq!(ScsiPt::new().nvme_queue, NvmeQueue::Admin);
    }

    #[test]
    fn task_management_rejected() {
        let file = tempfile::tempfile().unwrap();
        let mut pt = ScsiPt::new();
        pt.set_task_management(tmf::ABORT_TASK);
        assert_eq!(
            pt.do_nvm_pt(file.as_raw_fd(), 1000),
            Err(PtError::BadParams(
                BadParamsReason::TaskManagementUnsupported
            ))
        );
    }

    #[test]
    fn bidirectional_rejected() {
        let file = tempfile::tempfile().unwrap();
        let identify = sqe([admin::IDENTIFY as u32, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0]);
        let mut din = [0u8; 16];
        let dout = [0u8; 16];
        let mut pt = ScsiPt::new();
        pt.set_cdb(&identify);
        pt.set_data_in(&mut din);
        pt.set_data_out(&dout);
        assert_eq!(
            pt.do_nvm_pt(file.as_raw_fd(), 1000),
            Err(PtError::BadParams(BadParamsReason::Bidirectional))
        );
        assert_eq!(pt.os_err(), None);
    }

    #[test]
    fn translation_disabled() {
        let file = tempfile::tempfile().unwrap();
        let mut pt = ScsiPt::new().with_config(PtConfig {
            sntl: false,
            ..Default::default()
        });
        pt.set_cdb(&[0; 6]);
        assert_eq!(
            pt.do_nvm_pt(file.as_raw_fd(), 1000),
            Err(PtError::BadParams(BadParamsReason::NotNvmeCommand))
        );
    }

    #[test]
    fn raw_command_ioctl_failure() {
        // A regular file rejects the NVMe ioctls.
        let file = tempfile::tempfile().unwrap();
        let flush = sqe([nvm::FLUSH as u32, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let mut meta = [0u8; 8];
        let mut pt = ScsiPt::new();
        pt.set_cdb(&flush);
        pt.set_metadata(Metadata::In(&mut meta));
        pt.set_nvme_queue(NvmeQueue::Io);
        let err = pt.do_nvm_pt(file.as_raw_fd(), 1000).unwrap_err();
        assert!(matches!(err, PtError::Os(_)));
        assert_eq!(pt.result_category(), ResultCategory::OsErr);
    }

    #[test]
    fn check_condition_sense() {
        let mut sense = [0u8; 32];
        let mut pt = ScsiPt::new();
        pt.set_sense(&mut sense);
        pt.set_check_condition(SenseInfo::INVALID_OPCODE);
        assert_eq!(pt.status_response(), status::CHECK_CONDITION);
        assert_eq!(pt.sense_len(), 18);
        assert_eq!(pt.result_category(), ResultCategory::Sense);
        assert_eq!(
            SenseInfo::parse(pt.sense()).map(|info| info.key),
            Some(sense_key::ILLEGAL_REQUEST)
        );

        let mut pt = ScsiPt::new();
        pt.set_check_condition(SenseInfo::INVALID_OPCODE);
        assert_eq!(pt.sense_len(), 0);
        assert_eq!(pt.result_category(), ResultCategory::Sense);
    }
}
