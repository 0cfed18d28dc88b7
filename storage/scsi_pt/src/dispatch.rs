// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Transport selection and the `SG_IO` execution paths.

use crate::BadParamsReason;
use crate::PtError;
use crate::ioctls;
use crate::majors::device_majors;
use crate::probe::DeviceKind;
use crate::request::PtCommand;
use crate::request::ScsiPt;
use sg_defs::sg::BSG_GUARD;
use sg_defs::sg::BSG_PROTOCOL_SCSI;
use sg_defs::sg::BSG_SUB_PROTOCOL_SCSI_CMD;
use sg_defs::sg::BSG_SUB_PROTOCOL_SCSI_TMF;
use sg_defs::sg::SG_DXFER_FROM_DEV;
use sg_defs::sg::SG_DXFER_TO_DEV;
use sg_defs::sg::driver;
use sg_defs::sg::host;
use sg_defs::sg::sg_io_hdr;
use sg_defs::sg::sg_io_v4;
use std::os::fd::RawFd;
use std::time::Duration;
use zerocopy::FromZeros;

/// The kernel interface a request is issued through.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transport {
    /// NVMe admin and I/O passthrough ioctls.
    Nvme,
    /// `SG_IO` with a v4 (bsg) header.
    V4,
    /// `SG_IO` with a v3 header.
    V3,
}

/// Picks the transport for a node of type `kind`. Without a known bsg major
/// every SCSI command goes through the v3 interface.
pub fn select_transport(kind: DeviceKind, bsg_known: bool) -> Transport {
    if kind.is_nvme() {
        Transport::Nvme
    } else if bsg_known && kind == DeviceKind::Bsg {
        Transport::V4
    } else {
        Transport::V3
    }
}

pub(crate) fn buffer_len(len: usize) -> Result<u32, BadParamsReason> {
    u32::try_from(len).map_err(|_| BadParamsReason::BufferTooLarge(len))
}

pub(crate) fn timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

impl ScsiPt<'_> {
    /// Executes the request on `fd`, or on the bound descriptor if `fd` is
    /// `None`.
    ///
    /// `timeout` of `None` or zero uses the configured default. `Ok(())`
    /// means the command reached the device and a response was obtained,
    /// which may itself report an error; see [`Self::result_category`].
    pub fn do_scsi_pt(
        &mut self,
        fd: Option<RawFd>,
        timeout: Option<Duration>,
    ) -> Result<(), PtError> {
        self.partial_clear();
        if self.setter_errors() != 0 {
            return Err(BadParamsReason::FieldSetTwice(self.setter_errors()).into());
        }

        // A negative descriptor at call time means "use the bound one".
        let fd = match (self.fd(), fd.filter(|&fd| fd >= 0)) {
            (Some(bound), Some(call)) if bound != call => {
                return Err(BadParamsReason::FdMismatch { bound, call }.into());
            }
            (Some(fd), _) | (None, Some(fd)) => fd,
            (None, None) => return Err(BadParamsReason::NoDevice.into()),
        };
        if fd < 0 {
            return Err(BadParamsReason::NoDevice.into());
        }

        let class = self.bind_lazily(fd);
        if let Some(err) = class.os_err {
            return Err(self.os_error(err));
        }

        let timeout = timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(self.config.default_timeout);
        let timeout_ms = timeout_ms(timeout);

        let transport = select_transport(class.kind, device_majors().bsg_known());
        tracing::debug!(fd, kind = ?class.kind, ?transport, timeout_ms, "dispatching request");
        match transport {
            Transport::Nvme => self.do_nvm_pt(fd, timeout_ms),
            Transport::V4 => self.do_v4(fd, timeout_ms),
            Transport::V3 => self.do_v3(fd, timeout_ms),
        }
    }

    /// Builds the v3 header. The header borrows the request's buffers by
    /// raw pointer and must not outlive them.
    pub(crate) fn v3_header(&mut self, timeout_ms: u32) -> Result<sg_io_hdr, BadParamsReason> {
        let cdb = match self.command {
            Some(PtCommand::Cdb(cdb)) if !cdb.is_empty() => cdb,
            Some(PtCommand::TaskManagement(_)) => {
                return Err(BadParamsReason::TaskManagementUnsupported);
            }
            _ => return Err(BadParamsReason::NoCommand),
        };
        let cmd_len =
            u8::try_from(cdb.len()).map_err(|_| BadParamsReason::CommandTooLong(cdb.len()))?;

        let mut hdr = sg_io_hdr {
            cmd_len,
            cmdp: cdb.as_ptr(),
            timeout: timeout_ms,
            flags: self.flags.into_bits(),
            pack_id: self.packet_id,
            ..Default::default()
        };

        match (self.data_in.as_deref_mut(), self.data_out) {
            (Some(_), Some(_)) => return Err(BadParamsReason::Bidirectional),
            (Some(buf), None) => {
                hdr.dxfer_direction = SG_DXFER_FROM_DEV;
                hdr.dxfer_len = buffer_len(buf.len())?;
                hdr.dxferp = buf.as_mut_ptr().cast();
            }
            (None, Some(buf)) => {
                hdr.dxfer_direction = SG_DXFER_TO_DEV;
                hdr.dxfer_len = buffer_len(buf.len())?;
                hdr.dxferp = buf.as_ptr().cast_mut().cast();
            }
            (None, None) => {}
        }

        if let Some(sense) = self.sense.as_deref_mut() {
            hdr.mx_sb_len = sense.len().min(u8::MAX.into()) as u8;
            hdr.sbp = sense.as_mut_ptr();
        }
        Ok(hdr)
    }

    pub(crate) fn apply_v3_completion(&mut self, hdr: &sg_io_hdr) {
        let completion = &mut self.completion;
        completion.device_status = hdr.status;
        completion.transport_status = hdr.host_status;
        completion.driver_status = hdr.driver_status;
        completion.sense_len = hdr.sb_len_wr.into();
        completion.duration = Duration::from_millis(hdr.duration.into());
        match hdr.dxfer_direction {
            SG_DXFER_FROM_DEV => completion.din_resid = hdr.resid,
            SG_DXFER_TO_DEV => completion.dout_resid = hdr.resid,
            _ => {}
        }
    }

    fn do_v3(&mut self, fd: RawFd, timeout_ms: u32) -> Result<(), PtError> {
        let mut hdr = self.v3_header(timeout_ms)?;
        tracing::trace!(
            fd,
            cmd_len = hdr.cmd_len,
            direction = hdr.dxfer_direction,
            dxfer_len = hdr.dxfer_len,
            mx_sb_len = hdr.mx_sb_len,
            "sg v3 request"
        );

        // SAFETY: the command, data and sense pointers in the header come
        // from buffers borrowed by this request and the lengths beside them
        // are their lengths. The buffers outlive the call.
        if let Err(err) = unsafe { ioctls::sg_io3(fd, &mut hdr) } {
            tracing::debug!(fd, error = &err as &dyn std::error::Error, "sg v3 ioctl failed");
            return Err(self.os_error(err));
        }

        self.apply_v3_completion(&hdr);
        self.check_timeout()
    }

    /// Builds the v4 header. The header borrows the request's buffers by
    /// address and must not outlive them.
    pub(crate) fn v4_header(&mut self, timeout_ms: u32) -> Result<sg_io_v4, BadParamsReason> {
        let mut hdr = sg_io_v4::new_zeroed();
        hdr.guard = BSG_GUARD;
        hdr.protocol = BSG_PROTOCOL_SCSI;

        match &self.command {
            Some(PtCommand::Cdb(cdb)) if !cdb.is_empty() => {
                hdr.subprotocol = BSG_SUB_PROTOCOL_SCSI_CMD;
                hdr.request_len = u32::try_from(cdb.len())
                    .map_err(|_| BadParamsReason::CommandTooLong(cdb.len()))?;
                hdr.request = cdb.as_ptr() as u64;
            }
            Some(PtCommand::TaskManagement(tmf)) => {
                hdr.subprotocol = BSG_SUB_PROTOCOL_SCSI_TMF;
                hdr.request_len = 1;
                hdr.request = std::ptr::from_ref(tmf) as u64;
            }
            _ => return Err(BadParamsReason::NoCommand),
        }

        match (self.data_in.as_deref_mut(), self.data_out) {
            (Some(_), Some(_)) => return Err(BadParamsReason::Bidirectional),
            (Some(buf), None) => {
                hdr.din_xfer_len = buffer_len(buf.len())?;
                hdr.din_xferp = buf.as_mut_ptr() as u64;
            }
            (None, Some(buf)) => {
                hdr.dout_xfer_len = buffer_len(buf.len())?;
                hdr.dout_xferp = buf.as_ptr() as u64;
            }
            (None, None) => {}
        }

        if let Some(sense) = self.sense.as_deref_mut() {
            hdr.max_response_len = buffer_len(sense.len())?;
            hdr.response = sense.as_mut_ptr() as u64;
        }

        hdr.request_tag = self.tag;
        hdr.request_attr = self.task_attr;
        hdr.request_priority = self.task_priority;
        hdr.request_extra = self.packet_id as u32;
        hdr.timeout = timeout_ms;
        hdr.flags = self.flags.into_bits();
        Ok(hdr)
    }

    pub(crate) fn apply_v4_completion(&mut self, hdr: &sg_io_v4) {
        let completion = &mut self.completion;
        completion.device_status = hdr.device_status as u8;
        completion.transport_status = hdr.transport_status as u16;
        completion.driver_status = hdr.driver_status as u16;
        completion.sense_len = hdr.response_len;
        completion.din_resid = hdr.din_resid;
        completion.dout_resid = hdr.dout_resid;
        completion.duration = Duration::from_millis(hdr.duration.into());
    }

    fn do_v4(&mut self, fd: RawFd, timeout_ms: u32) -> Result<(), PtError> {
        let mut hdr = self.v4_header(timeout_ms)?;
        tracing::trace!(
            fd,
            subprotocol = hdr.subprotocol,
            request_len = hdr.request_len,
            din_xfer_len = hdr.din_xfer_len,
            dout_xfer_len = hdr.dout_xfer_len,
            "sg v4 request"
        );

        // SAFETY: the request, response and transfer addresses in the header
        // come from buffers borrowed by this request, or from the command
        // slot itself, and the lengths beside them are their lengths.
        if let Err(err) = unsafe { ioctls::sg_io4(fd, &mut hdr) } {
            tracing::debug!(fd, error = &err as &dyn std::error::Error, "sg v4 ioctl failed");
            return Err(self.os_error(err));
        }

        self.apply_v4_completion(&hdr);
        self.check_timeout()
    }

    /// Reports a command the kernel gave up on. The completion stays
    /// populated.
    fn check_timeout(&self) -> Result<(), PtError> {
        let completion = &self.completion;
        if completion.transport_status == host::DID_TIME_OUT
            || completion.driver_status & driver::DRIVER_MASK == driver::DRIVER_TIMEOUT
        {
            return Err(PtError::Timeout);
        }
        Ok(())
    }
}
