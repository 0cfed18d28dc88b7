// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The passthrough request object.

use crate::PtConfig;
use crate::category::ResultCategory;
use crate::device::PtDevice;
use crate::nvme::NvmeQueue;
use crate::probe::Classification;
use crate::probe::check_pt_file_handle;
use crate::transport::TransportError;
use nix::errno::Errno;
use sg_defs::nvme::IDENTIFY_LEN;
use sg_defs::nvme::NvmeStatus;
use sg_defs::sg::QueueFlags;
use std::os::fd::AsRawFd;
use std::os::fd::RawFd;
use std::time::Duration;

/// The command carried by a request. A request holds either command bytes
/// or a task management function, never both.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PtCommand<'a> {
    /// A SCSI CDB, or a 64-byte NVMe submission queue entry for NVMe
    /// devices.
    Cdb(&'a [u8]),
    /// A SCSI task management function code, see [`sg_defs::scsi::tmf`].
    TaskManagement(u8),
}

/// A metadata buffer and its transfer direction. Only used by the NVMe
/// passthrough path.
#[derive(Debug)]
pub enum Metadata<'a> {
    /// Metadata read from the device.
    In(&'a mut [u8]),
    /// Metadata written to the device.
    Out(&'a [u8]),
}

impl Metadata<'_> {
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::In(buf) => buf.len(),
            Self::Out(buf) => buf.len(),
        }
    }

    pub(crate) fn addr(&mut self) -> u64 {
        match self {
            Self::In(buf) => buf.as_mut_ptr() as u64,
            Self::Out(buf) => buf.as_ptr() as u64,
        }
    }
}

/// Completion state of the last execution, identical in shape for every
/// transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// OS error from classification or from the last system call.
    pub os_err: Option<Errno>,
    /// SCSI status byte.
    pub device_status: u8,
    /// Host (transport) status, `DID_*`.
    pub transport_status: u16,
    /// Driver status, `DRIVER_*` and `SUGGEST_*`.
    pub driver_status: u16,
    /// Bytes of sense data written.
    pub sense_len: u32,
    /// Data-in bytes not transferred.
    pub din_resid: i32,
    /// Data-out bytes not transferred.
    pub dout_resid: i32,
    /// Time taken by the command.
    pub duration: Duration,
    /// Completion queue entry DW0 of an NVMe command.
    pub nvme_result: u32,
    /// Completion status of an NVMe command.
    pub nvme_status: NvmeStatus,
}

/// A passthrough request: one command, its buffers and, after execution, its
/// completion.
///
/// Buffers are borrowed, never copied, so they must outlive the request. The
/// request never closes its file descriptor.
#[derive(Debug)]
pub struct ScsiPt<'a> {
    fd: Option<RawFd>,
    class: Option<Classification>,
    pub(crate) config: PtConfig,
    pub(crate) command: Option<PtCommand<'a>>,
    pub(crate) sense: Option<&'a mut [u8]>,
    pub(crate) data_in: Option<&'a mut [u8]>,
    pub(crate) data_out: Option<&'a [u8]>,
    pub(crate) metadata: Option<Metadata<'a>>,
    pub(crate) packet_id: i32,
    pub(crate) tag: u64,
    pub(crate) task_attr: u32,
    pub(crate) task_priority: u32,
    pub(crate) flags: QueueFlags,
    pub(crate) nvme_queue: NvmeQueue,
    in_err: u32,
    pub(crate) completion: Completion,
    /// Cached IDENTIFY CONTROLLER response of the bound NVMe device.
    pub(crate) id_ctrl: Option<Box<[u8; IDENTIFY_LEN]>>,
}

impl Default for ScsiPt<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ScsiPt<'a> {
    /// Creates an empty request not bound to any device.
    pub fn new() -> Self {
        Self {
            fd: None,
            class: None,
            config: PtConfig::default(),
            command: None,
            sense: None,
            data_in: None,
            data_out: None,
            metadata: None,
            packet_id: 0,
            tag: 0,
            task_attr: 0,
            task_priority: 0,
            flags: QueueFlags::new(),
            nvme_queue: NvmeQueue::Admin,
            in_err: 0,
            completion: Completion::default(),
            id_ctrl: None,
        }
    }

    /// Creates a request bound to `fd`, classifying it immediately. A
    /// classification failure is available from [`Self::os_err`].
    pub fn with_fd(fd: RawFd) -> Self {
        let mut pt = Self::new();
        pt.set_fd(Some(fd));
        pt
    }

    /// Creates a request bound to an open device, reusing the classification
    /// made when it was opened.
    pub fn for_device(device: &PtDevice) -> Self {
        let mut pt = Self::new();
        pt.fd = Some(device.as_raw_fd());
        pt.class = Some(device.classification());
        pt
    }

    /// Replaces the request's settings.
    pub fn with_config(mut self, config: PtConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the request to `fd` and classifies it, or unbinds it.
    ///
    /// Any previous classification and OS error are overwritten. Unbinding
    /// performs no I/O.
    pub fn set_fd(&mut self, fd: Option<RawFd>) -> Option<Classification> {
        self.fd = fd;
        self.id_ctrl = None;
        self.class = fd.map(check_pt_file_handle);
        self.completion.os_err = self.class.and_then(|class| class.os_err);
        self.class
    }

    pub(crate) fn bind_lazily(&mut self, fd: RawFd) -> Classification {
        if self.fd != Some(fd) {
            self.fd = Some(fd);
            self.id_ctrl = None;
            self.class = None;
        }
        *self
            .class
            .get_or_insert_with(|| check_pt_file_handle(fd))
    }

    /// The bound file descriptor.
    pub fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    /// The classification of the bound descriptor.
    pub fn classification(&self) -> Option<Classification> {
        self.class
    }

    /// Whether the bound descriptor is an NVMe controller or namespace.
    pub fn is_nvme(&self) -> bool {
        self.class.is_some_and(|class| class.is_nvme())
    }

    /// The NVMe namespace id of the bound descriptor; zero for controllers
    /// and non-NVMe devices.
    pub fn nvme_nsid(&self) -> u32 {
        self.class.map_or(0, |class| class.nsid)
    }

    /// Sets the command bytes. Setting a command twice without clearing is
    /// recorded as a caller error and fails the next execution.
    pub fn set_cdb(&mut self, cdb: &'a [u8]) {
        self.set_command(PtCommand::Cdb(cdb));
    }

    /// Selects a task management function, replacing any command bytes.
    pub fn set_task_management(&mut self, tmf: u8) {
        self.command = Some(PtCommand::TaskManagement(tmf));
    }

    /// Sets the command slot. Replacing existing command bytes counts as a
    /// caller error; see [`Self::set_cdb`].
    pub fn set_command(&mut self, command: PtCommand<'a>) {
        match command {
            PtCommand::Cdb(_) => {
                if self.command.is_some() {
                    self.in_err += 1;
                }
                self.command = Some(command);
            }
            PtCommand::TaskManagement(tmf) => self.set_task_management(tmf),
        }
    }

    /// Sets the sense buffer, zero-filling it.
    pub fn set_sense(&mut self, sense: &'a mut [u8]) {
        if sense.is_empty() {
            return;
        }
        if self.sense.is_some() {
            self.in_err += 1;
        }
        sense.fill(0);
        self.sense = Some(sense);
    }

    /// Sets the buffer receiving data from the device. An empty buffer is
    /// ignored.
    pub fn set_data_in(&mut self, buf: &'a mut [u8]) {
        if buf.is_empty() {
            return;
        }
        if self.data_in.is_some() {
            self.in_err += 1;
        }
        self.data_in = Some(buf);
    }

    /// Sets the buffer sent to the device. An empty buffer is ignored.
    pub fn set_data_out(&mut self, buf: &'a [u8]) {
        if buf.is_empty() {
            return;
        }
        if self.data_out.is_some() {
            self.in_err += 1;
        }
        self.data_out = Some(buf);
    }

    /// Sets the NVMe metadata buffer. An empty buffer is ignored.
    pub fn set_metadata(&mut self, metadata: Metadata<'a>) {
        if metadata.len() == 0 {
            return;
        }
        if self.metadata.is_some() {
            self.in_err += 1;
        }
        self.metadata = Some(metadata);
    }

    /// Sets the packet id (v3 `pack_id`, v4 `request_extra`).
    pub fn set_packet_id(&mut self, packet_id: i32) {
        self.packet_id = packet_id;
    }

    /// Sets the v4 request tag.
    pub fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }

    /// Sets the v4 task attribute.
    pub fn set_task_attr(&mut self, attr: u32) {
        self.task_attr = attr;
    }

    /// Sets the v4 task priority.
    pub fn set_task_priority(&mut self, priority: u32) {
        self.task_priority = priority;
    }

    /// Sets the queue ordering flags.
    pub fn set_flags(&mut self, flags: QueueFlags) {
        self.flags = flags;
    }

    /// Selects the queue raw NVMe commands are submitted to.
    pub fn set_nvme_queue(&mut self, queue: NvmeQueue) {
        self.nvme_queue = queue;
    }

    /// Resets everything except the bound descriptor, its classification
    /// and the cached controller identify data, so the request can carry a
    /// new command to the same device.
    pub fn clear(&mut self) {
        *self = Self {
            fd: self.fd,
            class: self.class,
            config: self.config,
            id_ctrl: self.id_ctrl.take(),
            ..Self::new()
        };
    }

    /// Resets only the completion state so the same command can be
    /// resubmitted.
    pub fn partial_clear(&mut self) {
        self.completion = Completion::default();
    }

    /// The number of extra field sets recorded since the last clear.
    pub fn setter_errors(&self) -> u32 {
        self.in_err
    }

    /// The command currently bound.
    pub fn command(&self) -> Option<PtCommand<'a>> {
        self.command
    }

    /// Whether the request carries a task management function.
    pub fn is_task_management(&self) -> bool {
        matches!(self.command, Some(PtCommand::TaskManagement(_)))
    }

    /// The bound command bytes, if the command is not a task management
    /// function.
    pub fn cdb(&self) -> Option<&'a [u8]> {
        match self.command {
            Some(PtCommand::Cdb(cdb)) => Some(cdb),
            _ => None,
        }
    }

    /// The completion state of the last execution.
    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    /// Reduces the completion state to a [`ResultCategory`].
    pub fn result_category(&self) -> ResultCategory {
        self.completion.category()
    }

    /// The residual count of the data transfer direction in use.
    pub fn resid(&self) -> i32 {
        if self.data_out.is_some() && self.data_in.is_none() {
            self.completion.dout_resid
        } else {
            self.completion.din_resid
        }
    }

    /// The SCSI status byte.
    pub fn status_response(&self) -> u8 {
        self.completion.device_status
    }

    /// Bytes of sense data written.
    pub fn sense_len(&self) -> usize {
        self.completion.sense_len as usize
    }

    /// The sense data written by the last execution.
    pub fn sense(&self) -> &[u8] {
        match &self.sense {
            Some(sense) => &sense[..self.sense_len().min(sense.len())],
            None => &[],
        }
    }

    /// The time the last command took.
    pub fn duration(&self) -> Duration {
        self.completion.duration
    }

    /// The host (transport) status.
    pub fn transport_err(&self) -> u16 {
        self.completion.transport_status
    }

    /// The driver status.
    pub fn driver_status(&self) -> u16 {
        self.completion.driver_status
    }

    /// Describes the host and driver status.
    pub fn transport_err_str(&self) -> String {
        TransportError {
            host_status: self.completion.transport_status,
            driver_status: self.completion.driver_status,
        }
        .to_string()
    }

    /// The OS error recorded by classification or by the last system call.
    pub fn os_err(&self) -> Option<Errno> {
        self.completion.os_err
    }

    /// Describes [`Self::os_err`].
    pub fn os_err_str(&self) -> String {
        self.completion
            .os_err
            .map_or_else(String::new, |err| err.to_string())
    }

    /// DW0 of the last NVMe completion.
    pub fn nvme_result(&self) -> u32 {
        self.completion.nvme_result
    }

    /// Status of the last NVMe completion.
    pub fn nvme_status(&self) -> NvmeStatus {
        self.completion.nvme_status
    }

    /// The requested data-in and data-out lengths.
    pub fn req_lengths(&self) -> (usize, usize) {
        (
            self.data_in.as_ref().map_or(0, |buf| buf.len()),
            self.data_out.map_or(0, |buf| buf.len()),
        )
    }

    /// The data-in and data-out lengths actually transferred.
    pub fn actual_lengths(&self) -> (usize, usize) {
        let (din, dout) = self.req_lengths();
        let done = |len: usize, resid: i32| len.saturating_sub(resid.max(0) as usize);
        (
            done(din, self.completion.din_resid),
            done(dout, self.completion.dout_resid),
        )
    }

    pub(crate) fn os_error(&mut self, err: Errno) -> crate::PtError {
        self.completion.os_err = Some(err);
        crate::PtError::Os(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BadParamsReason;
    use crate::PtError;
    use crate::probe::DeviceKind;
    use sg_defs::scsi::tmf;

    const TUR: [u8; 6] = [0; 6];

    #[test]
    fn sense_is_zeroed_on_set() {
        let mut sense = [0xffu8; 32];
        let mut pt = ScsiPt::new();
        pt.set_sense(&mut sense);
        assert_eq!(pt.setter_errors(), 0);
        assert_eq!(pt.sense(), &[] as &[u8]);
        drop(pt);
        assert!(sense.iter().all(|&b| b == 0));
    }

    #[test]
    fn double_set_counts_each_extra_set() {
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        let mut c = [0u8; 8];
        let mut pt = ScsiPt::new();
        pt.set_data_in(&mut a);
        assert_eq!(pt.setter_errors(), 0);
        pt.set_data_in(&mut b);
        assert_eq!(pt.setter_errors(), 1);
        pt.set_data_in(&mut c);
        assert_eq!(pt.setter_errors(), 2);

        // Fails before looking at the (missing) descriptor.
        assert_eq!(
            pt.do_scsi_pt(None, None),
            Err(PtError::BadParams(BadParamsReason::FieldSetTwice(2)))
        );
    }

    #[test]
    fn double_set_of_each_field() {
        let mut s1 = [0u8; 18];
        let mut s2 = [0u8; 18];
        let out = [0u8; 4];
        let mut m1 = [0u8; 4];
        let mut pt = ScsiPt::new();
        pt.set_cdb(&TUR);
        pt.set_cdb(&TUR);
        pt.set_sense(&mut s1);
        pt.set_sense(&mut s2);
        pt.set_data_out(&out);
        pt.set_data_out(&out);
        pt.set_metadata(Metadata::In(&mut m1));
        pt.set_metadata(Metadata::Out(&out));
        assert_eq!(pt.setter_errors(), 4);
    }

    #[test]
    fn empty_buffers_ignored() {
        let mut empty_in: [u8; 0] = [];
        let mut pt = ScsiPt::new();
        pt.set_data_in(&mut empty_in);
        pt.set_data_out(&[]);
        pt.set_data_out(&[]);
        pt.set_metadata(Metadata::Out(&[]));
        assert_eq!(pt.setter_errors(), 0);
        assert_eq!(pt.req_lengths(), (0, 0));
    }

    #[test]
    fn task_management_replaces_cdb() {
        let mut pt = ScsiPt::new();
        pt.set_cdb(&TUR);
        pt.set_task_management(tmf::LOGICAL_UNIT_RESET);
        assert_eq!(pt.setter_errors(), 0);
        assert_eq!(
            pt.command(),
            Some(PtCommand::TaskManagement(tmf::LOGICAL_UNIT_RESET))
        );
        assert_eq!(pt.cdb(), None);
        assert!(pt.is_task_management());

        // Command bytes after a task management function are a double set.
        pt.set_cdb(&TUR);
        assert_eq!(pt.setter_errors(), 1);
        assert_eq!(pt.cdb(), Some(&TUR[..]));
    }

    #[test]
    fn clear_keeps_binding() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        let mut data = [0u8; 16];
        let mut pt = ScsiPt::with_fd(fd);
        pt.set_cdb(&TUR);
        pt.set_cdb(&TUR);
        pt.set_data_in(&mut data);
        pt.set_packet_id(7);
        pt.completion.device_status = 2;
        let class = pt.classification();
        assert!(class.is_some());

        pt.clear();
        assert_eq!(pt.fd(), Some(fd));
        assert_eq!(pt.classification(), class);
        assert_eq!(pt.setter_errors(), 0);
        assert_eq!(pt.command(), None);
        assert_eq!(pt.req_lengths(), (0, 0));
        assert_eq!(pt.packet_id, 0);
        assert_eq!(pt.completion(), &Completion::default());

        // The command was cleared, so resubmitting without setting it fails.
        assert_eq!(
            pt.do_scsi_pt(None, None),
            Err(PtError::BadParams(BadParamsReason::NoCommand))
        );
    }

    #[test]
    fn partial_clear_keeps_inputs() {
        let mut pt = ScsiPt::new();
        pt.set_cdb(&TUR);
        pt.completion.device_status = 8;
        pt.completion.os_err = Some(Errno::EINTR);
        pt.partial_clear();
        assert_eq!(pt.cdb(), Some(&TUR[..]));
        assert_eq!(pt.status_response(), 0);
        assert_eq!(pt.os_err(), None);
    }

    #[test]
    fn rebind() {
        let file = tempfile::tempfile().unwrap();
        let mut pt = ScsiPt::with_fd(-1);
        assert_eq!(pt.os_err(), Some(Errno::EBADF));
        assert!(!pt.is_nvme());

        let class = pt.set_fd(Some(file.as_raw_fd())).unwrap();
        assert_eq!(class.kind, DeviceKind::Other);
        assert_eq!(pt.os_err(), None);

        assert_eq!(pt.set_fd(None), None);
        assert_eq!(pt.classification(), None);
        assert_eq!(pt.fd(), None);
        assert!(!pt.is_nvme());
        assert_eq!(pt.nvme_nsid(), 0);
    }

    #[test]
    fn lengths() {
        let mut data = [0u8; 512];
        let mut pt = ScsiPt::new();
        pt.set_data_in(&mut data);
        pt.completion.din_resid = 12;
        assert_eq!(pt.req_lengths(), (512, 0));
        assert_eq!(pt.actual_lengths(), (500, 0));
        assert_eq!(pt.resid(), 12);

        let out = [0u8; 64];
        let mut pt = ScsiPt::new();
        pt.set_data_out(&out);
        pt.completion.dout_resid = 4;
        pt.completion.din_resid = 99;
        assert_eq!(pt.resid(), 4);
        assert_eq!(pt.actual_lengths(), (0, 60));
    }

    #[test]
    fn sense_view_is_bounded() {
        let mut sense = [0u8; 8];
        let mut pt = ScsiPt::new();
        pt.set_sense(&mut sense);
        pt.completion.sense_len = 32;
        assert_eq!(pt.sense().len(), 8);
        pt.completion.sense_len = 3;
        assert_eq!(pt.sense_len(), 3);
        assert_eq!(pt.sense().len(), 3);
    }

    #[test]
    fn os_err_string() {
        let mut pt = ScsiPt::new();
        assert_eq!(pt.os_err_str(), "");
        let err = pt.os_error(Errno::EIO);
        assert_eq!(err, PtError::Os(Errno::EIO));
        assert!(pt.os_err_str().contains("EIO"));
    }
}
