use serde::{Deserialize, Serialize};

use crate::aircraft::MISSING_CALLSIGN;

pub const UNKNOWN_LABEL: &str = "Unknown";
/// Stands in for the hidden answer while a question is open.
pub const HIDDEN_LABEL: &str = "???";

/// Route metadata scraped for one callsign. Empty strings mean "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDetails {
    pub destination: String,
    pub real_destination: String,
    pub model: String,
    pub origin: String,
}

impl RouteDetails {
    pub fn has_destination(&self) -> bool {
        is_known_label(&self.real_destination)
    }

    pub fn has_origin(&self) -> bool {
        is_known_label(&self.origin)
    }

    /// Copy with every leg equal to `answer` replaced by [`HIDDEN_LABEL`].
    pub fn redacted(&self, answer: &str) -> Self {
        let answer = answer.trim();
        let hide = |label: &str| {
            if label.trim() == answer {
                HIDDEN_LABEL.to_string()
            } else {
                label.to_string()
            }
        };
        Self {
            destination: hide(&self.destination),
            real_destination: hide(&self.real_destination),
            model: self.model.clone(),
            origin: hide(&self.origin),
        }
    }
}

/// True unless the label is blank, "Unknown" or the "N/A" placeholder.
pub fn is_known_label(label: &str) -> bool {
    let trimmed = label.trim();
    !trimmed.is_empty() && trimmed != UNKNOWN_LABEL && trimmed != MISSING_CALLSIGN
}

#[cfg(test)]
mod tests {
    use super::{HIDDEN_LABEL, RouteDetails, is_known_label};

    #[test]
    fn blank_and_unknown_labels_are_not_known() {
        assert!(!is_known_label(""));
        assert!(!is_known_label("   "));
        assert!(!is_known_label("Unknown"));
        assert!(!is_known_label("N/A"));
        assert!(is_known_label("Paris"));
    }

    #[test]
    fn redaction_hides_every_leg_matching_the_answer() {
        let details = RouteDetails {
            destination: "Paris".to_string(),
            real_destination: "Paris".to_string(),
            model: "Airbus A320".to_string(),
            origin: "Helsinki".to_string(),
        };
        let hidden = details.redacted("Paris");
        assert_eq!(hidden.destination, HIDDEN_LABEL);
        assert_eq!(hidden.real_destination, HIDDEN_LABEL);
        assert_eq!(hidden.origin, "Helsinki");
        assert_eq!(hidden.model, "Airbus A320");

        let inbound = details.redacted("Helsinki");
        assert_eq!(inbound.origin, HIDDEN_LABEL);
        assert_eq!(inbound.real_destination, "Paris");
    }

    #[test]
    fn details_report_missing_legs() {
        let details = RouteDetails {
            destination: "Paris".to_string(),
            real_destination: "Paris".to_string(),
            model: String::new(),
            origin: "Unknown".to_string(),
        };
        assert!(details.has_destination());
        assert!(!details.has_origin());
    }
}
