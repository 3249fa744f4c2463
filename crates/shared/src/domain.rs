use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(ControlId);
id_newtype!(SubitemId);
id_newtype!(FileId);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0} is not one of the available choices")]
pub struct UnknownChoice(pub String);

/// Declares a closed set of text choices whose stored value is also its label.
macro_rules! text_choices {
    ($name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $value)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownChoice;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw {
                    $($value => Ok($name::$variant),)+
                    other => Err(UnknownChoice(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_choices!(Status {
    Draft => "Draft",
    InReview => "In Review",
    Approved => "Approved",
    Deprecated => "Deprecated",
});

text_choices!(NiceRole {
    SecurelyProvision => "Securely Provision",
    OperateAndMaintain => "Operate and Maintain",
    OverseeAndGovern => "Oversee and Govern",
    ProtectAndDefend => "Protect and Defend",
    Analyze => "Analyze",
    CollectAndOperate => "Collect and Operate",
    Investigate => "Investigate",
});

text_choices!(CsfFunction {
    Identify => "Identify",
    Protect => "Protect",
    Detect => "Detect",
    Respond => "Respond",
    Recover => "Recover",
});

text_choices!(Detection {
    Atomic => "Atomic",
    BehavioralAtomic => "Behavioral, Atomic",
    Statistical => "Statistical",
});

text_choices!(Signals {
    Baggage => "Baggage",
    Traces => "Traces",
});

text_choices!(Span {
    Unset => "Unset",
    Data => "Data",
});

text_choices!(Metric {
    Counter => "Counter",
    Measure => "Measure",
    Observer => "Observer",
});

/// Statuses matched by the "active" manager query. "Active" is not a
/// `Status` variant, so only approved rows can match it in practice.
pub const ACTIVE_STATUS_VALUES: &[&str] = &["Approved", "Active"];
pub const DRAFT_STATUS_VALUES: &[&str] = &["Draft"];

/// Integer-valued priority; lower numbers are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Priority {
    High = 1,
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub const ALL: &'static [Priority] = &[Priority::High, Priority::Medium, Priority::Low];

    pub fn value(self) -> i64 {
        self as i64
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

impl From<Priority> for i64 {
    fn from(value: Priority) -> Self {
        value.value()
    }
}

impl TryFrom<i64> for Priority {
    type Error = UnknownChoice;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            other => Err(UnknownChoice(other.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Scalar columns of a control, everything except identity, timestamps and
/// relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFields {
    pub name: String,
    pub control_short_number: String,
    pub description: String,
    pub tags: serde_json::Value,
    pub status: Status,
    pub priority: Priority,
    pub selected: bool,
    pub project_timeline_start: NaiveDate,
    pub project_timeline_end: NaiveDate,
    pub responsible_team: String,
    pub exception_required: bool,
    pub exception_for: Option<String>,
    pub exception_duration_start: Option<NaiveDate>,
    pub exception_duration_end: Option<NaiveDate>,
    pub csf_function: CsfFunction,
    pub csf_category: String,
    pub responsible: NiceRole,
    pub accountable: NiceRole,
    pub consulted: NiceRole,
    pub informed: NiceRole,
    pub visibility: String,
    pub alerting: String,
    pub detection: Detection,
    pub telemetry: String,
    pub signals: Signals,
    pub components: serde_json::Value,
    pub span: Span,
    pub metric: Metric,
    pub report: String,
    pub discussion: String,
}

impl ControlFields {
    pub fn label(&self) -> String {
        format!("{} - {}", self.control_short_number, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub username: String,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
