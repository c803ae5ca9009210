//! Diagram generation requests proxied to the analysis service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Diagram kinds the analysis service can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramType {
    Class,
    Sequence,
    Usecase,
    State,
    Activity,
    Component,
    Communication,
    Deployment,
}

impl DiagramType {
    pub const ALL: [DiagramType; 8] = [
        DiagramType::Class,
        DiagramType::Sequence,
        DiagramType::Usecase,
        DiagramType::State,
        DiagramType::Activity,
        DiagramType::Component,
        DiagramType::Communication,
        DiagramType::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramType::Class => "class",
            DiagramType::Sequence => "sequence",
            DiagramType::Usecase => "usecase",
            DiagramType::State => "state",
            DiagramType::Activity => "activity",
            DiagramType::Component => "component",
            DiagramType::Communication => "communication",
            DiagramType::Deployment => "deployment",
        }
    }
}

impl fmt::Display for DiagramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagramType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        DiagramType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "diagram_type".to_string(),
                reason: format!(
                    "unsupported diagram type '{}' (expected one of: {})",
                    s,
                    DiagramType::ALL.map(|k| k.as_str()).join(", ")
                ),
            })
    }
}

/// Body of a PlantUML generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantUmlRequest {
    pub schema: Value,
    pub diagram_type: DiagramType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl PlantUmlRequest {
    /// Validate a raw JSON body.
    pub fn from_value(body: &Value) -> Result<Self, ValidationError> {
        let root = body.as_object().ok_or_else(|| ValidationError::InvalidValue {
            field: "body".to_string(),
            reason: "expected a JSON object".to_string(),
        })?;

        let schema = match root.get("schema") {
            Some(schema @ Value::Object(_)) => schema.clone(),
            Some(_) => {
                return Err(ValidationError::InvalidValue {
                    field: "schema".to_string(),
                    reason: "expected an object".to_string(),
                })
            }
            None => {
                return Err(ValidationError::RequiredFieldMissing {
                    field: "schema".to_string(),
                })
            }
        };

        let diagram_type = match root.get("diagram_type") {
            Some(Value::String(kind)) => kind.parse()?,
            Some(_) => {
                return Err(ValidationError::InvalidValue {
                    field: "diagram_type".to_string(),
                    reason: "expected a string".to_string(),
                })
            }
            None => {
                return Err(ValidationError::RequiredFieldMissing {
                    field: "diagram_type".to_string(),
                })
            }
        };

        let language_filter = match root.get("language_filter") {
            None | Some(Value::Null) => None,
            Some(filter @ (Value::String(_) | Value::Array(_))) => Some(filter.clone()),
            Some(_) => {
                return Err(ValidationError::InvalidValue {
                    field: "language_filter".to_string(),
                    reason: "expected a string or an array of strings".to_string(),
                })
            }
        };

        let config = match root.get("config") {
            None | Some(Value::Null) => None,
            Some(config @ Value::Object(_)) => Some(config.clone()),
            Some(_) => {
                return Err(ValidationError::InvalidValue {
                    field: "config".to_string(),
                    reason: "expected an object".to_string(),
                })
            }
        };

        Ok(Self {
            schema,
            diagram_type,
            language_filter,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_diagram_types_parse() {
        for kind in DiagramType::ALL {
            assert_eq!(kind.as_str().parse::<DiagramType>().unwrap(), kind);
        }
        assert_eq!("  Class ".parse::<DiagramType>().unwrap(), DiagramType::Class);
        assert!("gantt".parse::<DiagramType>().is_err());
    }

    #[test]
    fn test_request_from_value() {
        let body = json!({
            "schema": {"python": []},
            "diagram_type": "sequence",
            "language_filter": ["python"],
        });
        let request = PlantUmlRequest::from_value(&body).unwrap();
        assert_eq!(request.diagram_type, DiagramType::Sequence);
        assert_eq!(request.config, None);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["diagram_type"], "sequence");
        assert!(json.get("config").is_none());
    }

    #[test]
    fn test_request_rejects_missing_or_bad_fields() {
        assert!(matches!(
            PlantUmlRequest::from_value(&json!({"diagram_type": "class"})),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(PlantUmlRequest::from_value(&json!({"schema": {}, "diagram_type": "pie"})).is_err());
        assert!(PlantUmlRequest::from_value(&json!({"schema": {}, "diagram_type": 3})).is_err());
        assert!(PlantUmlRequest::from_value(&json!({
            "schema": {}, "diagram_type": "class", "config": "dark"
        }))
        .is_err());
    }
}
