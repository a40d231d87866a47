//! Aggregated result of one analysis pass.

use super::module::ModuleOutput;
use serde::Serialize;
use std::collections::BTreeMap;

/// A module that produced no output in this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletenessFault {
    pub module: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultBundle {
    /// Modules that produced output, in execution order.
    pub modules: Vec<String>,
    pub fragments: Vec<String>,
    pub bullish: Vec<String>,
    pub bearish: Vec<String>,
    pub neutral: Vec<String>,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub faults: Vec<CompletenessFault>,
}

impl ResultBundle {
    /// Later modules overwrite same-named fields.
    pub(crate) fn merge(&mut self, module: &str, output: &ModuleOutput) {
        self.modules.push(module.to_string());
        self.fragments.extend(output.fragments.iter().cloned());
        self.bullish.extend(output.bullish.iter().cloned());
        self.bearish.extend(output.bearish.iter().cloned());
        self.neutral.extend(output.neutral.iter().cloned());
        for (k, v) in &output.fields {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    pub(crate) fn fault(&mut self, module: &str, reason: impl Into<String>) {
        self.faults.push(CompletenessFault {
            module: module.to_string(),
            reason: reason.into(),
        });
    }

    /// Sorts and dedups the factor lists.
    pub(crate) fn finish(&mut self) {
        for list in [&mut self.bullish, &mut self.bearish, &mut self.neutral] {
            list.sort();
            list.dedup();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.faults.is_empty()
    }

    /// Looks up a field; `a.b` walks into object fields.
    pub fn field(&self, path: &str) -> Option<&serde_json::Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn field_f64(&self, path: &str) -> Option<f64> {
        self.field(path).and_then(serde_json::Value::as_f64)
    }

    /// Content hash of the whole bundle, hex-encoded.
    ///
    /// Maps are `BTreeMap`s, so identical bundles serialize identically.
    /// Serialization of these plain data types cannot fail; should it ever, the
    /// hash covers empty input.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }
}
