use crate::error::{Error, Result};

/// Options controlling how framing is read and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// LIS only: after each physical record, skip to the next multiple of this offset.
    /// 0 and 1 mean no padding.
    pub padding_modulo: u64,
    /// LIS only: accept non-zero bytes in padding.
    pub padding_allow_non_null: bool,
    /// Validate checksums whenever payload bytes are materialized.
    pub checksum_enabled: bool,
    /// Largest frame accepted. `None` selects the format maximum.
    pub max_frame_length: Option<u64>,
    /// Record recoverable faults as anomalies instead of raising them.
    pub keep_going: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            padding_modulo: 0,
            padding_allow_non_null: false,
            checksum_enabled: true,
            max_frame_length: None,
            keep_going: false,
        }
    }
}

impl ReadOptions {
    pub fn padding(mut self, modulo: u64, allow_non_null: bool) -> Self {
        self.padding_modulo = modulo;
        self.padding_allow_non_null = allow_non_null;
        self
    }

    pub fn checksum_enabled(mut self, enabled: bool) -> Self {
        self.checksum_enabled = enabled;
        self
    }

    pub fn max_frame_length(mut self, length: u64) -> Self {
        self.max_frame_length = Some(length);
        self
    }

    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    #[inline(always)]
    pub(crate) fn frame_limit(&self, format_max: u64) -> u64 {
        self.max_frame_length.map_or(format_max, |l| l.min(format_max))
    }
}

/// Options controlling how framing is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub max_frame_length: u64,
    pub checksum_enabled: bool,
    /// LIS: write an incrementing record number in every trailer.
    pub record_numbers: bool,
    /// LIS: write this file number in every trailer.
    pub file_number: Option<i16>,
    /// LIS: null-pad after each physical record to this modulo.
    pub padding_modulo: u64,
    /// LIS: wrap physical records in TIF markers.
    pub tif_markers: bool,
    /// RP66V1: append the trailing length to every segment.
    pub trailing_length: bool,
    /// RP66V1: storage set identifier for the storage unit label.
    pub storage_set_identifier: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            max_frame_length: 8192,
            checksum_enabled: false,
            record_numbers: false,
            file_number: None,
            padding_modulo: 0,
            tif_markers: false,
            trailing_length: false,
            storage_set_identifier: String::new(),
        }
    }
}

impl WriteOptions {
    pub fn max_frame_length(mut self, length: u64) -> Self {
        self.max_frame_length = length;
        self
    }

    pub fn checksum_enabled(mut self, enabled: bool) -> Self {
        self.checksum_enabled = enabled;
        self
    }

    pub fn record_numbers(mut self, enabled: bool) -> Self {
        self.record_numbers = enabled;
        self
    }

    pub fn file_number(mut self, number: i16) -> Self {
        self.file_number = Some(number);
        self
    }

    pub fn padding_modulo(mut self, modulo: u64) -> Self {
        self.padding_modulo = modulo;
        self
    }

    pub fn tif_markers(mut self, enabled: bool) -> Self {
        self.tif_markers = enabled;
        self
    }

    pub fn trailing_length(mut self, enabled: bool) -> Self {
        self.trailing_length = enabled;
        self
    }

    pub fn storage_set_identifier<S: Into<String>>(mut self, identifier: S) -> Self {
        self.storage_set_identifier = identifier.into();
        self
    }

    pub(crate) fn check_frame_length(&self, min: u64, max: u64) -> Result<()> {
        if self.max_frame_length < min || self.max_frame_length > max {
            return Err(Error::Config(format!(
                "max_frame_length {} outside [{}, {}]",
                self.max_frame_length, min, max
            )));
        }
        Ok(())
    }
}
