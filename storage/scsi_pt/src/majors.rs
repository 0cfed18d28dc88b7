// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide cache of the dynamically assigned character device majors of
//! the bsg and NVMe drivers.

use parking_lot::RwLock;
use sg_defs::PROC_DEVICES;
use std::path::Path;

static MAJORS: RwLock<Option<DeviceMajors>> = parking_lot::const_rwlock(None);

/// Character device majors read from the device registry. Zero means the
/// driver was not listed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeviceMajors {
    /// Major of `bsg` nodes.
    pub bsg: u32,
    /// Major of NVMe controller character devices (`/dev/nvmeN`).
    pub nvme_char: u32,
}

impl DeviceMajors {
    /// Parses the contents of `/proc/devices`.
    ///
    /// Only the `Character devices:` section is considered. Scanning stops
    /// once both majors are found or the section ends.
    pub fn parse(registry: &str) -> Self {
        let mut majors = Self::default();
        let lines = registry
            .lines()
            .skip_while(|line| line.trim() != "Character devices:")
            .skip(1);

        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.ends_with(':') {
                break;
            }
            let mut fields = line.split_whitespace();
            let (Some(number), Some(name)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Ok(number) = number.parse::<u32>() else {
                continue;
            };
            match name {
                "bsg" if majors.bsg == 0 => majors.bsg = number,
                "nvme" if majors.nvme_char == 0 => majors.nvme_char = number,
                _ => {}
            }
            if majors.bsg != 0 && majors.nvme_char != 0 {
                break;
            }
        }
        majors
    }

    /// Reads and parses a device registry file.
    pub fn probe_from(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let registry = fs_err::read_to_string(path.as_ref())?;
        Ok(Self::parse(&registry))
    }

    /// Whether a bsg major was found. Without one, every SCSI command uses
    /// the v3 interface.
    pub fn bsg_known(&self) -> bool {
        self.bsg != 0
    }
}

fn probe_system() -> DeviceMajors {
    let majors = DeviceMajors::probe_from(PROC_DEVICES).unwrap_or_else(|err| {
        tracing::warn!(
            error = &err as &dyn std::error::Error,
            path = PROC_DEVICES,
            "failed to read device registry, bsg and nvme nodes will not be recognized"
        );
        DeviceMajors::default()
    });
    tracing::debug!(bsg = majors.bsg, nvme = majors.nvme_char, "probed device majors");
    majors
}

/// Returns the cached device majors, probing the system on first use.
///
/// A failed probe is cached as "no majors" and is not retried automatically;
/// call [`reprobe_device_majors`] to retry, e.g. after a controller is
/// hot-plugged.
pub fn device_majors() -> DeviceMajors {
    if let Some(majors) = *MAJORS.read() {
        return majors;
    }
    let mut majors = MAJORS.write();
    *majors.get_or_insert_with(probe_system)
}

/// Probes the system again and replaces the cached majors.
pub fn reprobe_device_majors() -> DeviceMajors {
    let majors = probe_system();
    *MAJORS.write() = Some(majors);
    majors
}
