use serde::{Deserialize, Serialize};

/// A string that does not name any variant of the enum it was parsed as.
#[derive(Debug, thiserror::Error)]
#[error("invalid {field} value: {value}")]
pub struct InvalidEnumValue {
    pub field: String,
    pub value: String,
}

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnumValue {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(TreatmentStatus {
    Planned => "planned",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

str_enum!(TreatmentCategory {
    Preventive => "preventive",
    Restorative => "restorative",
    Endodontic => "endodontic",
    Periodontal => "periodontal",
    Prosthodontic => "prosthodontic",
    Orthodontic => "orthodontic",
    Surgical => "surgical",
    Cosmetic => "cosmetic",
    Pediatric => "pediatric",
});
