// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Minimal sense data helpers: building fixed-format sense, extracting the
//! sense key and additional sense code, and mapping NVMe completion status to
//! SCSI sense.

use sg_defs::nvme::NvmeStatus;
use sg_defs::nvme::generic_sc;
use sg_defs::nvme::media_sc;
use sg_defs::nvme::sct;
use sg_defs::scsi::FIXED_SENSE_LEN;
use sg_defs::scsi::asc;
use sg_defs::scsi::response_code;
use sg_defs::scsi::sense_key;

/// The sense key, additional sense code and qualifier of sense data.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SenseInfo {
    /// Sense key.
    pub key: u8,
    /// Additional sense code.
    pub asc: u8,
    /// Additional sense code qualifier.
    pub ascq: u8,
}

impl SenseInfo {
    /// Creates sense info from its parts.
    pub const fn new(key: u8, asc: u8, ascq: u8) -> Self {
        Self { key, asc, ascq }
    }

    pub(crate) const INVALID_OPCODE: Self = Self::new(
        sense_key::ILLEGAL_REQUEST,
        asc::INVALID_COMMAND_OPERATION_CODE,
        0,
    );

    pub(crate) const INVALID_FIELD_IN_CDB: Self =
        Self::new(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB, 0);

    pub(crate) const INTERNAL_TARGET_FAILURE: Self =
        Self::new(sense_key::HARDWARE_ERROR, asc::INTERNAL_TARGET_FAILURE, 0);

    /// Extracts sense info from fixed or descriptor format sense data.
    /// Returns `None` if the data is too short or of an unknown format.
    pub fn parse(sense: &[u8]) -> Option<Self> {
        let code = *sense.first()? & 0x7f;
        match code {
            response_code::FIXED_CURRENT | response_code::FIXED_DEFERRED => {
                if sense.len() < 14 {
                    return None;
                }
                Some(Self::new(sense[2] & 0xf, sense[12], sense[13]))
            }
            response_code::DESCRIPTOR_CURRENT | response_code::DESCRIPTOR_DEFERRED => {
                if sense.len() < 4 {
                    return None;
                }
                Some(Self::new(sense[1] & 0xf, sense[2], sense[3]))
            }
            _ => None,
        }
    }

    /// Builds current, fixed-format sense data.
    pub fn to_fixed(&self) -> [u8; FIXED_SENSE_LEN] {
        let mut sense = [0; FIXED_SENSE_LEN];
        sense[0] = response_code::FIXED_CURRENT;
        sense[2] = self.key & 0xf;
        sense[7] = (FIXED_SENSE_LEN - 8) as u8;
        sense[12] = self.asc;
        sense[13] = self.ascq;
        sense
    }

    /// Builds current, descriptor-format sense data with no descriptors.
    pub fn to_descriptor(&self) -> [u8; 8] {
        [
            response_code::DESCRIPTOR_CURRENT,
            self.key & 0xf,
            self.asc,
            self.ascq,
            0,
            0,
            0,
            0,
        ]
    }

    /// Writes fixed-format sense into `buf`, truncating to its length.
    /// Returns the number of bytes written.
    pub fn write_fixed(&self, buf: &mut [u8]) -> usize {
        let sense = self.to_fixed();
        let len = sense.len().min(buf.len());
        buf[..len].copy_from_slice(&sense[..len]);
        len
    }

    /// Translates a failed NVMe completion status to SCSI sense.
    pub fn from_nvme_status(status: NvmeStatus) -> Self {
        match (status.sct(), status.sc()) {
            (sct::GENERIC, generic_sc::SUCCESS) => Self::new(sense_key::NO_SENSE, 0, 0),
            (sct::GENERIC, generic_sc::INVALID_OPCODE) => Self::INVALID_OPCODE,
            (sct::GENERIC, generic_sc::INVALID_FIELD) => Self::INVALID_FIELD_IN_CDB,
            (sct::GENERIC, generic_sc::DATA_TRANSFER_ERROR) => {
                Self::new(sense_key::MEDIUM_ERROR, asc::NO_ADDITIONAL_SENSE, 0)
            }
            (sct::GENERIC, generic_sc::INTERNAL_ERROR) => Self::INTERNAL_TARGET_FAILURE,
            (sct::GENERIC, generic_sc::ABORT_REQUESTED) => {
                Self::new(sense_key::ABORTED_COMMAND, asc::NO_ADDITIONAL_SENSE, 0)
            }
            (sct::GENERIC, generic_sc::INVALID_NAMESPACE) => Self::new(
                sense_key::ILLEGAL_REQUEST,
                asc::LOGICAL_UNIT_NOT_SUPPORTED,
                0,
            ),
            (sct::GENERIC, generic_sc::LBA_OUT_OF_RANGE) => {
                Self::new(sense_key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE, 0)
            }
            (sct::GENERIC, generic_sc::CAPACITY_EXCEEDED) => {
                Self::new(sense_key::MEDIUM_ERROR, asc::NO_ADDITIONAL_SENSE, 0)
            }
            // LOGICAL UNIT NOT READY, CAUSE NOT REPORTABLE
            (sct::GENERIC, generic_sc::NAMESPACE_NOT_READY) => {
                Self::new(sense_key::NOT_READY, asc::LOGICAL_UNIT_NOT_READY, 0)
            }
            (sct::MEDIA_ERROR, media_sc::WRITE_FAULT) => {
                Self::new(sense_key::MEDIUM_ERROR, asc::WRITE_ERROR, 0)
            }
            (sct::MEDIA_ERROR, media_sc::UNRECOVERED_READ_ERROR) => {
                Self::new(sense_key::MEDIUM_ERROR, asc::UNRECOVERED_READ_ERROR, 0)
            }
            (sct::MEDIA_ERROR, media_sc::COMPARE_FAILURE) => {
                Self::new(sense_key::MISCOMPARE, asc::MISCOMPARE_DURING_VERIFY, 0)
            }
            (sct::MEDIA_ERROR, media_sc::ACCESS_DENIED) => {
                Self::new(sense_key::DATA_PROTECT, asc::WRITE_PROTECTED, 0)
            }
            (sct::MEDIA_ERROR, _) => {
                Self::new(sense_key::MEDIUM_ERROR, asc::NO_ADDITIONAL_SENSE, 0)
            }
            _ => Self::INTERNAL_TARGET_FAILURE,
        }
    }
}

/// Writes current, fixed-format sense data for `key`/`asc`/`ascq` into
/// `buf`, truncating to its length. Returns the number of bytes written.
pub fn build_fixed_sense(buf: &mut [u8], key: u8, asc: u8, ascq: u8) -> usize {
    SenseInfo::new(key, asc, ascq).write_fixed(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_format() {
        let info = SenseInfo::new(sense_key::ILLEGAL_REQUEST, 0x24, 0x01);
        let sense = info.to_fixed();
        assert_eq!(sense[0], 0x70);
        assert_eq!(sense[2], 0x05);
        assert_eq!(sense[7], 10);
        assert_eq!(&sense[12..14], &[0x24, 0x01]);
        assert_eq!(SenseInfo::parse(&sense), Some(info));
    }

    #[test]
    fn descriptor_format() {
        let sense = [0x72, 0x06, 0x29, 0x00, 0, 0, 0, 0];
        assert_eq!(
            SenseInfo::parse(&sense),
            Some(SenseInfo::new(sense_key::UNIT_ATTENTION, 0x29, 0))
        );
        let info = SenseInfo::new(sense_key::NOT_READY, 0x04, 0x02);
        assert_eq!(SenseInfo::parse(&info.to_descriptor()), Some(info));
    }

    #[test]
    fn deferred_and_valid_bit() {
        let mut sense = SenseInfo::new(sense_key::MEDIUM_ERROR, 0x11, 0).to_fixed();
        sense[0] = 0xf1;
        assert_eq!(
            SenseInfo::parse(&sense),
            Some(SenseInfo::new(sense_key::MEDIUM_ERROR, 0x11, 0))
        );
    }

    #[test]
    fn unparseable() {
        assert_eq!(SenseInfo::parse(&[]), None);
        assert_eq!(SenseInfo::parse(&[0x70, 0, 5]), None);
        assert_eq!(SenseInfo::parse(&[0x72, 0]), None);
        assert_eq!(SenseInfo::parse(&[0x00; 18]), None);
    }

    #[test]
    fn free_builder() {
        let mut buf = [0u8; 18];
        assert_eq!(build_fixed_sense(&mut buf, sense_key::NOT_READY, 0x3a, 0), 18);
        assert_eq!(
            SenseInfo::parse(&buf),
            Some(SenseInfo::new(sense_key::NOT_READY, 0x3a, 0))
        );
    }

    #[test]
    fn truncated_write() {
        let mut buf = [0xaa; 8];
        let written = SenseInfo::INVALID_OPCODE.write_fixed(&mut buf);
        assert_eq!(written, 8);
        assert_eq!(buf[0], 0x70);
        assert_eq!(buf[2], sense_key::ILLEGAL_REQUEST);

        let mut buf = [0xaa; 32];
        assert_eq!(SenseInfo::INVALID_OPCODE.write_fixed(&mut buf), 18);
        assert_eq!(buf[18], 0xaa);
    }

    #[test]
    fn nvme_status_mapping() {
        let status = |sct: u8, sc: u8| NvmeStatus::new().with_sct(sct).with_sc(sc);
        assert_eq!(
            SenseInfo::from_nvme_status(status(sct::GENERIC, generic_sc::INVALID_OPCODE)),
            SenseInfo::INVALID_OPCODE
        );
        assert_eq!(
            SenseInfo::from_nvme_status(status(sct::GENERIC, generic_sc::LBA_OUT_OF_RANGE)),
            SenseInfo::new(sense_key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE, 0)
        );
        assert_eq!(
            SenseInfo::from_nvme_status(status(
                sct::MEDIA_ERROR,
                media_sc::UNRECOVERED_READ_ERROR
            )),
            SenseInfo::new(sense_key::MEDIUM_ERROR, asc::UNRECOVERED_READ_ERROR, 0)
        );
        assert_eq!(
            SenseInfo::from_nvme_status(status(sct::MEDIA_ERROR, 0x84)).key,
            sense_key::MEDIUM_ERROR
        );
        assert_eq!(
            SenseInfo::from_nvme_status(status(sct::VENDOR_SPECIFIC, 0x01)),
            SenseInfo::INTERNAL_TARGET_FAILURE
        );
        // DNR does not change the translation.
        assert_eq!(
            SenseInfo::from_nvme_status(
                status(sct::GENERIC, generic_sc::INVALID_FIELD).with_dnr(true)
            ),
            SenseInfo::INVALID_FIELD_IN_CDB
        );
    }
}
