//! Static metadata field declarations
//!
//! Fields are declared on two axes: tier (required / recommended /
//! optional) and scope (one category, or common to all categories of the
//! format). Which template and default govern a field name is decided by
//! the manufacturer tables, with the "Unknown" table as fallback.

use crate::catalog::UNKNOWN_MANUFACTURER;
use crate::value::Value;

/// Scope name for fields common to every category of a format.
pub const COMMON_SCOPE: &str = "__common__";

/// Const-friendly default value for a declared field.
#[derive(Debug, Clone, Copy)]
pub enum DefaultVal {
    None,
    Int(i64),
    Float(f64),
    Str(&'static str),
}

impl DefaultVal {
    pub fn to_value(self) -> Option<Value> {
        match self {
            DefaultVal::None => None,
            DefaultVal::Int(i) => Some(Value::Int(i)),
            DefaultVal::Float(f) => Some(Value::Float(f)),
            DefaultVal::Str(s) => Some(Value::Str(s.to_string())),
        }
    }
}

/// Field names declared for one scope.
#[derive(Debug)]
pub struct ScopeDecl {
    pub scope: &'static str,
    pub fields: &'static [&'static str],
}

/// `(field name, template, default)` rows for one manufacturer.
pub type FieldTable = &'static [(&'static str, &'static str, DefaultVal)];

#[derive(Debug)]
pub struct FormatMetaDecl {
    pub required: &'static [ScopeDecl],
    pub recommended: &'static [ScopeDecl],
    pub optional: &'static [ScopeDecl],
    /// Manufacturer name -> field table; must contain "Unknown"
    pub tables: &'static [(&'static str, FieldTable)],
}

impl FormatMetaDecl {
    /// Template/default row for a field, preferring the manufacturer
    /// table and falling back to the "Unknown" table.
    pub fn field_row(
        &self,
        manufacturer: &str,
        field: &str,
    ) -> Option<(&'static str, DefaultVal)> {
        let lookup = |table_name: &str| {
            self.tables
                .iter()
                .find(|(name, _)| *name == table_name)
                .and_then(|(_, rows)| rows.iter().find(|(name, _, _)| *name == field))
                .map(|(_, template, default)| (*template, *default))
        };
        lookup(manufacturer).or_else(|| lookup(UNKNOWN_MANUFACTURER))
    }
}

static MRI_UNKNOWN: FieldTable = &[
    ("Manufacturer", "<Manufacturer>", DefaultVal::None),
    ("ManufacturersModelName", "<ManufacturerModelName>", DefaultVal::None),
    ("DeviceSerialNumber", "<DeviceSerialNumber>", DefaultVal::None),
    ("StationName", "<StationName>", DefaultVal::None),
    ("SoftwareVersions", "<SoftwareVersions>", DefaultVal::None),
    ("MagneticFieldStrength", "<float:MagneticFieldStrength>", DefaultVal::None),
    ("ReceiveCoilName", "<ReceiveCoilName>", DefaultVal::None),
    ("ScanningSequence", "<ScanningSequence>", DefaultVal::None),
    ("SequenceVariant", "<SequenceVariant>", DefaultVal::None),
    ("SequenceName", "<SequenceName>", DefaultVal::None),
    ("EchoTime", "<div1000:EchoTime>", DefaultVal::None),
    ("InversionTime", "<div1000:InversionTime>", DefaultVal::None),
    ("FlipAngle", "<float:FlipAngle>", DefaultVal::None),
    ("RepetitionTime", "<div1000:RepetitionTime>", DefaultVal::None),
    ("TaskName", "<<bids:task>>", DefaultVal::None),
    ("InstitutionName", "<InstitutionName>", DefaultVal::None),
    ("InstitutionAddress", "<InstitutionAddress>", DefaultVal::None),
];

static MRI_SIEMENS: FieldTable = &[
    ("ReceiveCoilName", "<ReceiveCoilName>", DefaultVal::None),
    ("SoftwareVersions", "<SoftwareVersions>", DefaultVal::None),
    // CSA header keeps the active coil element under a vendor block
    ("CoilCombinationMethod", "<CSA/CoilCombination>", DefaultVal::Str("rSOS")),
];

static MRI_PHILIPS: FieldTable = &[
    ("ReceiveCoilName", "<Private/CoilString>", DefaultVal::None),
    ("SoftwareVersions", "<SoftwareVersions/0>", DefaultVal::None),
];

static MRI_GE: FieldTable = &[
    ("ReceiveCoilName", "<CoilName>", DefaultVal::None),
];

static MRI_DECL: FormatMetaDecl = FormatMetaDecl {
    required: &[
        ScopeDecl { scope: "func", fields: &["RepetitionTime", "TaskName"] },
        ScopeDecl { scope: "fmap", fields: &["EchoTime"] },
    ],
    recommended: &[
        ScopeDecl { scope: "anat", fields: &["InversionTime"] },
        ScopeDecl {
            scope: COMMON_SCOPE,
            fields: &[
                "Manufacturer",
                "ManufacturersModelName",
                "DeviceSerialNumber",
                "StationName",
                "SoftwareVersions",
                "MagneticFieldStrength",
                "ReceiveCoilName",
                "ScanningSequence",
                "SequenceVariant",
                "SequenceName",
                "EchoTime",
                "FlipAngle",
            ],
        },
    ],
    optional: &[
        ScopeDecl {
            scope: COMMON_SCOPE,
            fields: &["InstitutionName", "InstitutionAddress", "CoilCombinationMethod"],
        },
    ],
    tables: &[
        ("Siemens", MRI_SIEMENS),
        ("Philips", MRI_PHILIPS),
        ("GE", MRI_GE),
        (UNKNOWN_MANUFACTURER, MRI_UNKNOWN),
    ],
};

static EEG_UNKNOWN: FieldTable = &[
    ("TaskName", "<<bids:task>>", DefaultVal::None),
    ("Manufacturer", "<Manufacturer>", DefaultVal::None),
    ("SamplingFrequency", "<float:SamplingFrequency>", DefaultVal::None),
    ("EEGChannelCount", "<int:ChannelCount>", DefaultVal::None),
    ("EEGReference", "<Reference>", DefaultVal::Str("n/a")),
    ("PowerLineFrequency", "<int:PowerLineFrequency>", DefaultVal::Int(50)),
    ("RecordingDuration", "<float:Duration>", DefaultVal::None),
    ("SoftwareVersions", "<SoftwareVersions>", DefaultVal::None),
];

static EEG_BRAINPRODUCTS: FieldTable = &[
    ("SamplingFrequency", "<div1000000:SamplingInterval>", DefaultVal::None),
    ("EEGChannelCount", "<int:NumberOfChannels>", DefaultVal::None),
];

static EEG_DECL: FormatMetaDecl = FormatMetaDecl {
    required: &[
        ScopeDecl {
            scope: "eeg",
            fields: &["TaskName", "SamplingFrequency", "EEGChannelCount", "EEGReference", "PowerLineFrequency"],
        },
    ],
    recommended: &[
        ScopeDecl {
            scope: COMMON_SCOPE,
            fields: &["Manufacturer", "RecordingDuration", "SoftwareVersions"],
        },
    ],
    optional: &[],
    tables: &[
        ("BrainProducts", EEG_BRAINPRODUCTS),
        (UNKNOWN_MANUFACTURER, EEG_UNKNOWN),
    ],
};

pub fn meta_decl(format: &str) -> Option<&'static FormatMetaDecl> {
    match format {
        "mri" => Some(&MRI_DECL),
        "eeg" => Some(&EEG_DECL),
        _ => None,
    }
}
