use std::fmt;

use crate::Format;

/// A reassembled logical record.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LogicalRecord {
    pub format: Format,
    pub type_code: u8,
    /// RP66V1 explicitly formatted record. Always false for LIS.
    pub explicit: bool,
    pub payload: Vec<u8>,
    /// Start offsets of every frame or segment the record was assembled from.
    pub source_positions: Vec<u64>,
}

impl LogicalRecord {
    #[inline(always)]
    pub fn kind(&self) -> RecordKind {
        RecordKind::new(self.format, self.type_code, self.explicit)
    }

    /// Offset of the first frame or segment.
    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.source_positions.first().copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RecordKind {
    Lis(LisRecordType),
    Dlis(DlisRecordType),
}

impl RecordKind {
    pub fn new(format: Format, type_code: u8, explicit: bool) -> RecordKind {
        match format {
            Format::Lis => RecordKind::Lis(LisRecordType::from(type_code)),
            Format::Dlis => RecordKind::Dlis(DlisRecordType::new(type_code, explicit)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::Lis(t) => t.name(),
            RecordKind::Dlis(t) => t.name(),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Lis(LisRecordType::Unknown(code)) => write!(f, "Unknown LIS type {}", code),
            RecordKind::Dlis(t) => match t.code() {
                Some(code) if t.name().is_empty() => write!(f, "Type {}", code),
                _ => write!(f, "{}", t.name()),
            },
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// LIS79 logical record types.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LisRecordType {
    NormalData,
    AlternateData,
    JobIdentification,
    WellsiteData,
    ToolStringInfo,
    EncryptedTableDump,
    TableDump,
    DataFormatSpecification,
    DataDescriptor,
    Picture,
    Image,
    Tu10SoftwareBoot,
    BootstrapLoader,
    CpKernelLoaderBoot,
    ProgramFileHeader,
    ProgramOverlayHeader,
    ProgramOverlayLoad,
    FileHeader,
    FileTrailer,
    TapeHeader,
    TapeTrailer,
    ReelHeader,
    ReelTrailer,
    LogicalEof,
    LogicalBot,
    LogicalEot,
    LogicalEom,
    OperatorCommandInputs,
    OperatorResponseInputs,
    SystemOutputsToOperator,
    FlicComment,
    BlankRecord,
    Unknown(u8),
}

impl From<u8> for LisRecordType {
    fn from(code: u8) -> Self {
        use LisRecordType::*;

        match code {
            0 => NormalData,
            1 => AlternateData,
            32 => JobIdentification,
            34 => WellsiteData,
            39 => ToolStringInfo,
            42 => EncryptedTableDump,
            47 => TableDump,
            64 => DataFormatSpecification,
            65 => DataDescriptor,
            85 => Picture,
            86 => Image,
            95 => Tu10SoftwareBoot,
            96 => BootstrapLoader,
            97 => CpKernelLoaderBoot,
            100 => ProgramFileHeader,
            101 => ProgramOverlayHeader,
            102 => ProgramOverlayLoad,
            128 => FileHeader,
            129 => FileTrailer,
            130 => TapeHeader,
            131 => TapeTrailer,
            132 => ReelHeader,
            133 => ReelTrailer,
            137 => LogicalEof,
            138 => LogicalBot,
            139 => LogicalEot,
            141 => LogicalEom,
            224 => OperatorCommandInputs,
            225 => OperatorResponseInputs,
            227 => SystemOutputsToOperator,
            232 => FlicComment,
            234 => BlankRecord,
            other => Unknown(other),
        }
    }
}

impl LisRecordType {
    pub fn name(&self) -> &'static str {
        use LisRecordType::*;

        match self {
            NormalData => "Normal data",
            AlternateData => "Alternate data",
            JobIdentification => "Job identification",
            WellsiteData => "Wellsite data",
            ToolStringInfo => "Tool string info",
            EncryptedTableDump => "Encrypted table dump",
            TableDump => "Table dump",
            DataFormatSpecification => "Data format specification",
            DataDescriptor => "Data descriptor",
            Picture => "Picture",
            Image => "Image",
            Tu10SoftwareBoot => "TU10 software boot",
            BootstrapLoader => "Bootstrap loader",
            CpKernelLoaderBoot => "CP-kernel loader boot",
            ProgramFileHeader => "Program file header",
            ProgramOverlayHeader => "Program overlay header",
            ProgramOverlayLoad => "Program overlay load",
            FileHeader => "File header",
            FileTrailer => "File trailer",
            TapeHeader => "Tape header",
            TapeTrailer => "Tape trailer",
            ReelHeader => "Reel header",
            ReelTrailer => "Reel trailer",
            LogicalEof => "Logical EOF",
            LogicalBot => "Logical BOT",
            LogicalEot => "Logical EOT",
            LogicalEom => "Logical EOM",
            OperatorCommandInputs => "Operator command inputs",
            OperatorResponseInputs => "Operator response inputs",
            SystemOutputsToOperator => "System outputs to operator",
            FlicComment => "FLIC comment",
            BlankRecord => "Blank record/CSU comment",
            Unknown(_) => "Unknown",
        }
    }

    /// Records that delimit files, tapes and reels rather than carry log content.
    pub fn is_marker(&self) -> bool {
        use LisRecordType::*;

        matches!(
            self,
            FileHeader
                | FileTrailer
                | TapeHeader
                | TapeTrailer
                | ReelHeader
                | ReelTrailer
                | LogicalEof
                | LogicalBot
                | LogicalEot
                | LogicalEom
        )
    }
}

/// RP66V1 logical record types, split by explicit (EFLR) and indirect (IFLR) formatting.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DlisRecordType {
    FileHeader,
    Origin,
    Axis,
    Channel,
    Frame,
    Static,
    Script,
    Update,
    UnformattedDataIdentifier,
    LongName,
    Specification,
    Dictionary,
    PrivateExplicit(u8),
    UnknownExplicit(u8),
    FrameData,
    NoFormat,
    EndOfData,
    PrivateIndirect(u8),
    UnknownIndirect(u8),
}

impl DlisRecordType {
    pub fn new(code: u8, explicit: bool) -> DlisRecordType {
        use DlisRecordType::*;

        if explicit {
            match code {
                0 => FileHeader,
                1 => Origin,
                2 => Axis,
                3 => Channel,
                4 => Frame,
                5 => Static,
                6 => Script,
                7 => Update,
                8 => UnformattedDataIdentifier,
                9 => LongName,
                10 => Specification,
                11 => Dictionary,
                128..=255 => PrivateExplicit(code),
                other => UnknownExplicit(other),
            }
        } else {
            match code {
                0 => FrameData,
                1 => NoFormat,
                127 => EndOfData,
                128..=255 => PrivateIndirect(code),
                other => UnknownIndirect(other),
            }
        }
    }

    pub fn is_explicit(&self) -> bool {
        use DlisRecordType::*;

        !matches!(
            self,
            FrameData | NoFormat | EndOfData | PrivateIndirect(_) | UnknownIndirect(_)
        )
    }

    /// Raw type code for the catch-all arms.
    pub fn code(&self) -> Option<u8> {
        use DlisRecordType::*;

        match self {
            PrivateExplicit(c) | UnknownExplicit(c) | PrivateIndirect(c) | UnknownIndirect(c) => {
                Some(*c)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        use DlisRecordType::*;

        match self {
            FileHeader => "FHLR",
            Origin => "OLR",
            Axis => "AXIS",
            Channel => "CHANNL",
            Frame => "FRAME",
            Static => "STATIC",
            Script => "SCRIPT",
            Update => "UPDATE",
            UnformattedDataIdentifier => "UDI",
            LongName => "LNAME",
            Specification => "SPEC",
            Dictionary => "DICT",
            FrameData => "FDATA",
            NoFormat => "NOFORMAT",
            EndOfData => "EOD",
            PrivateExplicit(_) | UnknownExplicit(_) | PrivateIndirect(_) | UnknownIndirect(_) => "",
        }
    }
}
