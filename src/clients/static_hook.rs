//! Validation hook with signals fixed in configuration.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::interfaces::{HookError, ValidationHook, ValidationSignal};
use crate::model::{CatalogRing, PackageVersion};

/// Answers from a table keyed by `name-version` or `name`, falling back to a
/// default. Keys match case-insensitively.
pub struct StaticValidationHook {
    default: ValidationSignal,
    overrides: HashMap<String, ValidationSignal>,
}

impl StaticValidationHook {
    pub fn new(default: ValidationSignal, overrides: &HashMap<String, ValidationSignal>) -> Self {
        Self {
            default,
            overrides: overrides
                .iter()
                .map(|(key, signal)| (key.to_lowercase(), *signal))
                .collect(),
        }
    }
}

#[async_trait]
impl ValidationHook for StaticValidationHook {
    async fn check(
        &self,
        version: &PackageVersion,
        _ring: &CatalogRing,
    ) -> Result<ValidationSignal, HookError> {
        let exact = version.key.to_string().to_lowercase();
        let name = version.key.name.to_lowercase();
        Ok(self
            .overrides
            .get(&exact)
            .or_else(|| self.overrides.get(&name))
            .copied()
            .unwrap_or(self.default))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{PackageKey, RecipeId};

    fn version(name: &str, v: &str) -> PackageVersion {
        PackageVersion::imported(
            PackageKey::new(name, v),
            "abc123",
            RecipeId::from("r"),
            "pkgs",
            Utc::now(),
            "test",
        )
    }

    #[tokio::test]
    async fn test_exact_beats_name_beats_default() {
        let mut overrides = HashMap::new();
        overrides.insert("Firefox-132.0".to_string(), ValidationSignal::Fail);
        overrides.insert("firefox".to_string(), ValidationSignal::Pass);
        let hook = StaticValidationHook::new(ValidationSignal::NoSignal, &overrides);
        let ring = CatalogRing::new("testing");

        assert_eq!(
            hook.check(&version("Firefox", "132.0"), &ring).await.unwrap(),
            ValidationSignal::Fail
        );
        assert_eq!(
            hook.check(&version("Firefox", "131.0"), &ring).await.unwrap(),
            ValidationSignal::Pass
        );
        assert_eq!(
            hook.check(&version("GoogleChrome", "130.0"), &ring).await.unwrap(),
            ValidationSignal::NoSignal
        );
    }
}
