// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Descriptions of host and driver status values.

use sg_defs::sg::driver;
use sg_defs::sg::host;
use std::fmt;

/// The host and driver status of a completion, displayed with the kernel's
/// symbolic names.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// `DID_*` host status.
    pub host_status: u16,
    /// `DRIVER_*` status with `SUGGEST_*` in the high nibble.
    pub driver_status: u16,
}

fn host_status_name(status: u16) -> Option<&'static str> {
    let name = match status {
        host::DID_OK => "DID_OK",
        host::DID_NO_CONNECT => "DID_NO_CONNECT",
        host::DID_BUS_BUSY => "DID_BUS_BUSY",
        host::DID_TIME_OUT => "DID_TIME_OUT",
        host::DID_BAD_TARGET => "DID_BAD_TARGET",
        host::DID_ABORT => "DID_ABORT",
        host::DID_PARITY => "DID_PARITY",
        host::DID_ERROR => "DID_ERROR",
        host::DID_RESET => "DID_RESET",
        host::DID_BAD_INTR => "DID_BAD_INTR",
        host::DID_PASSTHROUGH => "DID_PASSTHROUGH",
        host::DID_SOFT_ERROR => "DID_SOFT_ERROR",
        host::DID_IMM_RETRY => "DID_IMM_RETRY",
        host::DID_REQUEUE => "DID_REQUEUE",
        host::DID_TRANSPORT_DISRUPTED => "DID_TRANSPORT_DISRUPTED",
        host::DID_TRANSPORT_FAILFAST => "DID_TRANSPORT_FAILFAST",
        host::DID_TARGET_FAILURE => "DID_TARGET_FAILURE",
        host::DID_NEXUS_FAILURE => "DID_NEXUS_FAILURE",
        host::DID_ALLOC_FAILURE => "DID_ALLOC_FAILURE",
        host::DID_MEDIUM_ERROR => "DID_MEDIUM_ERROR",
        _ => return None,
    };
    Some(name)
}

fn driver_name(status: u16) -> Option<&'static str> {
    let name = match status & driver::DRIVER_MASK {
        driver::DRIVER_OK => "DRIVER_OK",
        driver::DRIVER_BUSY => "DRIVER_BUSY",
        driver::DRIVER_SOFT => "DRIVER_SOFT",
        driver::DRIVER_MEDIA => "DRIVER_MEDIA",
        driver::DRIVER_ERROR => "DRIVER_ERROR",
        driver::DRIVER_INVALID => "DRIVER_INVALID",
        driver::DRIVER_TIMEOUT => "DRIVER_TIMEOUT",
        driver::DRIVER_HARD => "DRIVER_HARD",
        driver::DRIVER_SENSE => "DRIVER_SENSE",
        _ => return None,
    };
    Some(name)
}

fn suggestion_name(status: u16) -> Option<&'static str> {
    let name = match status & driver::SUGGEST_MASK {
        0 => return None,
        driver::SUGGEST_RETRY => "SUGGEST_RETRY",
        driver::SUGGEST_ABORT => "SUGGEST_ABORT",
        driver::SUGGEST_REMAP => "SUGGEST_REMAP",
        driver::SUGGEST_DIE => "SUGGEST_DIE",
        driver::SUGGEST_SENSE => "SUGGEST_SENSE",
        _ => "SUGGEST_UNKNOWN",
    };
    Some(name)
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host_status={:#04x} [{}], driver_status={:#04x} [{}",
            self.host_status,
            host_status_name(self.host_status).unwrap_or("unknown"),
            self.driver_status,
            driver_name(self.driver_status).unwrap_or("unknown"),
        )?;
        if let Some(suggestion) = suggestion_name(self.driver_status) {
            write!(f, ", {suggestion}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = TransportError {
            host_status: host::DID_TIME_OUT,
            driver_status: driver::DRIVER_TIMEOUT | driver::SUGGEST_RETRY,
        };
        assert_eq!(
            err.to_string(),
            "host_status=0x03 [DID_TIME_OUT], driver_status=0x16 [DRIVER_TIMEOUT, SUGGEST_RETRY]"
        );

        let ok = TransportError {
            host_status: 0,
            driver_status: 0,
        };
        assert_eq!(
            ok.to_string(),
            "host_status=0x00 [DID_OK], driver_status=0x00 [DRIVER_OK]"
        );
    }

    #[test]
    fn unknown_values() {
        let err = TransportError {
            host_status: 0x7f,
            driver_status: 0x0e,
        };
        assert_eq!(
            err.to_string(),
            "host_status=0x7f [unknown], driver_status=0x0e [unknown]"
        );
    }
}
