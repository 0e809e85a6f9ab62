use std::fmt;

use serde::{Deserialize, Serialize};

/// The four consultation shapes. Selects the prompt template and the result contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationKind {
    Base,
    Target,
    Partner,
    Child,
}

impl ConsultationKind {
    #[cfg(test)]
    pub const ALL: [ConsultationKind; 4] = [
        ConsultationKind::Base,
        ConsultationKind::Target,
        ConsultationKind::Partner,
        ConsultationKind::Child,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsultationKind::Base => "base",
            ConsultationKind::Target => "target",
            ConsultationKind::Partner => "partner",
            ConsultationKind::Child => "child",
        }
    }
}

impl fmt::Display for ConsultationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

/// The person a consultation is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub birthdate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
}

/// Second participant of a partner consultation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerSubject {
    pub name: String,
    pub birthdate: String,
}

/// Kind-specific request fields, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsultationDetails {
    Base,
    Target {
        request: String,
    },
    Partner {
        partner: PartnerSubject,
        goal: String,
    },
    Child {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<String>,
    },
}

/// A request to generate one consultation document.
///
/// Wire form is flat: `{"kind": "target", "name": "...", "birthdate": "...", "request": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationRequest {
    #[serde(flatten)]
    pub subject: Subject,
    #[serde(flatten)]
    pub details: ConsultationDetails,
}

impl ConsultationRequest {
    pub fn kind(&self) -> ConsultationKind {
        match self.details {
            ConsultationDetails::Base => ConsultationKind::Base,
            ConsultationDetails::Target { .. } => ConsultationKind::Target,
            ConsultationDetails::Partner { .. } => ConsultationKind::Partner,
            ConsultationDetails::Child { .. } => ConsultationKind::Child,
        }
    }

    pub fn partner(&self) -> Option<&PartnerSubject> {
        match &self.details {
            ConsultationDetails::Partner { partner, .. } => Some(partner),
            _ => None,
        }
    }

    /// Rejects requests with blank required fields. Birth date syntax is
    /// checked later by the code calculator so that a placeholder exists first.
    pub fn check_required(&self) -> Result<(), String> {
        if self.subject.name.trim().is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if self.subject.birthdate.trim().is_empty() {
            return Err("birthdate cannot be empty".to_string());
        }
        match &self.details {
            ConsultationDetails::Target { request } if request.trim().is_empty() => {
                Err("request cannot be empty for a target consultation".to_string())
            }
            ConsultationDetails::Partner { partner, goal } => {
                if partner.name.trim().is_empty() {
                    Err("partner.name cannot be empty".to_string())
                } else if partner.birthdate.trim().is_empty() {
                    Err("partner.birthdate cannot be empty".to_string())
                } else if goal.trim().is_empty() {
                    Err("goal cannot be empty for a partner consultation".to_string())
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}
