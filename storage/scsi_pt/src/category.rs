// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reduction of completion state to a single outcome.

use crate::request::Completion;
use sg_defs::scsi::status;
use sg_defs::sg::driver;

/// The outcome of a command, ordered by precedence: when several apply, the
/// highest one is reported.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResultCategory {
    /// GOOD status and no transport complaint.
    Good = 0,
    /// A non-GOOD status without sense data, e.g. BUSY or RESERVATION
    /// CONFLICT.
    Status = 1,
    /// Sense data is available.
    Sense = 2,
    /// The host adapter or driver reported an error.
    TransportErr = 3,
    /// A system call failed.
    OsErr = 4,
}

impl Completion {
    /// Categorizes this completion. OS errors win over transport errors,
    /// which win over sense data, which wins over any other status.
    pub fn category(&self) -> ResultCategory {
        let driver_status = self.driver_status & driver::DRIVER_MASK;
        let device_status = self.device_status & status::MASK;

        if self.os_err.is_some() {
            ResultCategory::OsErr
        } else if self.transport_status != 0 {
            ResultCategory::TransportErr
        } else if driver_status != 0 && driver_status != driver::DRIVER_SENSE {
            ResultCategory::TransportErr
        } else if driver_status == driver::DRIVER_SENSE
            || device_status == status::CHECK_CONDITION
            || device_status == status::COMMAND_TERMINATED
        {
            ResultCategory::Sense
        } else if device_status != 0 {
            ResultCategory::Status
        } else {
            ResultCategory::Good
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;
    use sg_defs::sg::host;

    fn completion(
        os_err: Option<Errno>,
        transport_status: u16,
        driver_status: u16,
        device_status: u8,
    ) -> Completion {
        Completion {
            os_err,
            transport_status,
            driver_status,
            device_status,
            ..Default::default()
        }
    }

    #[test]
    fn single_conditions() {
        let cases = [
            (completion(None, 0, 0, 0), ResultCategory::Good),
            (completion(None, 0, 0, status::BUSY), ResultCategory::Status),
            (
                completion(None, 0, 0, status::RESERVATION_CONFLICT),
                ResultCategory::Status,
            ),
            (
                completion(None, 0, 0, status::CHECK_CONDITION),
                ResultCategory::Sense,
            ),
            (
                completion(None, 0, 0, status::COMMAND_TERMINATED),
                ResultCategory::Sense,
            ),
            (
                completion(None, 0, driver::DRIVER_SENSE, 0),
                ResultCategory::Sense,
            ),
            (
                completion(None, 0, driver::DRIVER_TIMEOUT, 0),
                ResultCategory::TransportErr,
            ),
            (
                completion(None, host::DID_NO_CONNECT, 0, 0),
                ResultCategory::TransportErr,
            ),
            (
                completion(Some(Errno::EIO), 0, 0, 0),
                ResultCategory::OsErr,
            ),
        ];
        for (completion, expected) in cases {
            assert_eq!(completion.category(), expected, "{completion:?}");
        }
    }

    #[test]
    fn os_error_beats_everything() {
        let c = completion(
            Some(Errno::EINTR),
            host::DID_ERROR,
            driver::DRIVER_SENSE,
            status::CHECK_CONDITION,
        );
        assert_eq!(c.category(), ResultCategory::OsErr);

        let c = completion(Some(Errno::EINTR), 0, driver::DRIVER_SENSE, 0);
        assert_eq!(c.category(), ResultCategory::OsErr);
    }

    #[test]
    fn transport_beats_sense() {
        let c = completion(None, host::DID_TIME_OUT, 0, status::CHECK_CONDITION);
        assert_eq!(c.category(), ResultCategory::TransportErr);

        // A stale device status does not hide a transport failure.
        let c = completion(None, host::DID_BAD_TARGET, 0, status::BUSY);
        assert_eq!(c.category(), ResultCategory::TransportErr);

        let c = completion(None, 0, driver::DRIVER_ERROR, status::CHECK_CONDITION);
        assert_eq!(c.category(), ResultCategory::TransportErr);
    }

    #[test]
    fn sense_beats_status() {
        let c = completion(None, 0, driver::DRIVER_SENSE, status::BUSY);
        assert_eq!(c.category(), ResultCategory::Sense);
    }

    #[test]
    fn driver_suggestions_ignored() {
        // Only the low nibble of the driver status is a complaint.
        let c = completion(None, 0, driver::SUGGEST_RETRY, 0);
        assert_eq!(c.category(), ResultCategory::Good);

        let c = completion(None, 0, driver::SUGGEST_SENSE | driver::DRIVER_SENSE, 0);
        assert_eq!(c.category(), ResultCategory::Sense);
    }

    #[test]
    fn status_masking() {
        // Vendor and reserved bits outside the mask are ignored.
        let c = completion(None, 0, 0, 0x80 | status::CHECK_CONDITION);
        assert_eq!(c.category(), ResultCategory::Sense);

        let c = completion(None, 0, 0, 0x81);
        assert_eq!(c.category(), ResultCategory::Good);
    }

    #[test]
    fn ordinal_values() {
        assert!(ResultCategory::OsErr > ResultCategory::TransportErr);
        assert!(ResultCategory::TransportErr > ResultCategory::Sense);
        assert!(ResultCategory::Sense > ResultCategory::Status);
        assert!(ResultCategory::Status > ResultCategory::Good);
        assert_eq!(ResultCategory::OsErr as i32, 4);
    }
}
