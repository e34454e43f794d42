//! Processor argument schemas.

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;

use crate::model::ProcessorStep;

/// Declared inputs and outputs of one processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessorSchema {
    /// Keys that must be present in the step arguments or the environment.
    pub required: Vec<String>,
    pub optional: Vec<String>,
    /// Keys the processor adds to the environment.
    pub outputs: Vec<String>,
}

impl ProcessorSchema {
    pub fn new(required: &[&str], optional: &[&str]) -> Self {
        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
            outputs: Vec::new(),
        }
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    fn accepts(&self, key: &str) -> bool {
        self.required.iter().chain(self.optional.iter()).any(|k| k == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Processor '{processor}' is not declared")]
    UndeclaredProcessor { processor: String },

    #[error("Processor '{processor}' is missing required argument '{key}'")]
    MissingArgument { processor: String, key: String },

    #[error("Processor '{processor}' does not accept argument '{key}'")]
    UnknownArgument { processor: String, key: String },
}

/// Schemas keyed by bare processor name, matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, ProcessorSchema>,
}

impl SchemaRegistry {
    pub fn new(schemas: HashMap<String, ProcessorSchema>) -> Self {
        let mut registry = Self::default();
        for (processor, schema) in schemas {
            registry.register(processor, schema);
        }
        registry
    }

    pub fn register(&mut self, processor: impl Into<String>, schema: ProcessorSchema) {
        self.schemas
            .insert(processor.into().to_ascii_lowercase(), schema);
    }

    pub fn get(&self, processor: &str) -> Option<&ProcessorSchema> {
        self.schemas.get(&processor.to_ascii_lowercase())
    }

    /// Check `steps` in order. `available` holds the keys present before the
    /// first step runs; each step's declared outputs become available to the
    /// steps after it.
    pub fn validate(&self, steps: &[ProcessorStep], available: impl IntoIterator<Item = String>) -> Result<(), SchemaError> {
        let mut available: BTreeSet<String> = available.into_iter().collect();

        for step in steps {
            let schema = self
                .get(step.name())
                .ok_or_else(|| SchemaError::UndeclaredProcessor {
                    processor: step.processor.clone(),
                })?;

            if let Some(key) = step.arguments.keys().find(|k| !schema.accepts(k)) {
                return Err(SchemaError::UnknownArgument {
                    processor: step.processor.clone(),
                    key: key.clone(),
                });
            }

            for key in &schema.required {
                if !step.arguments.contains_key(key) && !available.contains(key) {
                    return Err(SchemaError::MissingArgument {
                        processor: step.processor.clone(),
                        key: key.clone(),
                    });
                }
            }

            available.extend(step.arguments.keys().cloned());
            available.extend(schema.outputs.iter().cloned());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::default();
        registry.register(
            "URLDownloader",
            ProcessorSchema::new(&["url"], &["filename"]).with_outputs(&["pathname"]),
        );
        registry.register("PkgCreator", ProcessorSchema::new(&["pathname"], &[]));
        registry
    }

    #[test]
    fn test_valid_steps_pass() {
        let steps = vec![
            ProcessorStep::new("URLDownloader").with_argument("url", "https://example.invalid"),
            ProcessorStep::new("PkgCreator"),
        ];
        assert!(registry().validate(&steps, Vec::new()).is_ok());
    }

    #[test]
    fn test_required_key_satisfied_by_environment() {
        let steps = vec![ProcessorStep::new("URLDownloader")];
        assert!(registry().validate(&steps, vec!["url".to_string()]).is_ok());
    }

    #[test]
    fn test_unknown_argument_rejected() {
        let steps = vec![ProcessorStep::new("URLDownloader")
            .with_argument("url", "https://example.invalid")
            .with_argument("colour", "blue")];
        assert_eq!(
            registry().validate(&steps, Vec::new()),
            Err(SchemaError::UnknownArgument {
                processor: "URLDownloader".into(),
                key: "colour".into()
            })
        );
    }

    #[test]
    fn test_missing_argument_rejected() {
        let steps = vec![ProcessorStep::new("PkgCreator")];
        assert!(matches!(
            registry().validate(&steps, Vec::new()),
            Err(SchemaError::MissingArgument { key, .. }) if key == "pathname"
        ));
    }

    #[test]
    fn test_undeclared_processor_rejected() {
        let steps = vec![ProcessorStep::new("com.example.shared/Mystery")];
        assert_eq!(
            registry().validate(&steps, Vec::new()),
            Err(SchemaError::UndeclaredProcessor {
                processor: "com.example.shared/Mystery".into()
            })
        );
    }

    #[test]
    fn test_shared_processor_resolved_by_bare_name() {
        let mut registry = registry();
        registry.register("VersionSplitter", ProcessorSchema::default());
        let steps = vec![ProcessorStep::new("com.example.shared/VersionSplitter")];
        assert!(registry.validate(&steps, Vec::new()).is_ok());
    }
}
