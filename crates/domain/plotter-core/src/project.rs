use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ProjectId = String;

/// A plot job: source images plus the parameters the device plots them with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default, alias = "imageRefs", alias = "images")]
    pub image_refs: Vec<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `POST /projects`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl NewProject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: serde_json::Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_accepts_camel_case_aliases() {
        let json = r#"{
            "id": "p-1",
            "name": "Spiral",
            "parameters": { "pen_width": 0.3 },
            "imageRefs": ["a.png", "b.png"],
            "createdAt": "2024-05-01T10:00:00Z"
        }"#;
        let p: Project = serde_json::from_str(json).unwrap();
        assert_eq!(p.image_refs, vec!["a.png", "b.png"]);
        assert!(p.created_at.is_some());
        assert_eq!(p.parameters["pen_width"], serde_json::json!(0.3));
    }

    #[test]
    fn project_tolerates_missing_optional_fields() {
        let p: Project = serde_json::from_str(r#"{"id":"p-2","name":"Bare"}"#).unwrap();
        assert!(p.image_refs.is_empty());
        assert!(p.parameters.is_empty());
        assert_eq!(p.created_at, None);
    }
}
