//! # State Views
//!
//! A handler sees agent state as a snapshot keyed by variable name. The
//! view layers uncommitted mutations from the current stabilization over
//! the stored values, and is the only state surface an evaluator gets -
//! never the shared map itself.
//!
//! `exists` semantics: a variable stored as JSON `null` IS present.
//! [`StateView::exists`] therefore answers true for null values; this
//! matches deployed behavior and interacts with `otherwise`-style
//! fallbacks in handler scripts, surprising as it reads. Do not "fix" it.

use bc_02_object_store::{Store, StoreError};
use serde_json::Value;
use shared_types::Address;
use std::collections::BTreeMap;

/// Snapshot of one agent's variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateView {
    aa_address: Address,
    /// Stored values overlaid with this-transaction mutations.
    vars: BTreeMap<String, Value>,
}

impl StateView {
    /// Build the view for `aa_address`: stored vars overlaid with the
    /// `overlay` of mutations staged earlier in this stabilization.
    pub fn load(
        store: &Store,
        aa_address: &Address,
        overlay: &BTreeMap<String, Option<Value>>,
    ) -> Result<Self, StoreError> {
        let mut vars = BTreeMap::new();
        let prefix = bc_02_object_store::keys::kv_state_vars_of(aa_address);
        for (key, value) in store.kv_scan(&prefix, 100_000)? {
            let name = bc_02_object_store::keys::last_part(&key);
            let parsed: Value = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Corrupt {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    detail: e.to_string(),
                })?;
            vars.insert(name, parsed);
        }
        for (name, staged) in overlay {
            match staged {
                Some(value) => {
                    vars.insert(name.clone(), value.clone());
                }
                None => {
                    vars.remove(name);
                }
            }
        }
        Ok(Self {
            aa_address: aa_address.clone(),
            vars,
        })
    }

    /// The agent this view belongs to.
    pub fn aa_address(&self) -> &str {
        &self.aa_address
    }

    /// Value of a variable. A stored `null` comes back as
    /// `Some(Value::Null)`.
    pub fn get(&self, var: &str) -> Option<&Value> {
        self.vars.get(var)
    }

    /// Presence check. Null values are present.
    pub fn exists(&self, var: &str) -> bool {
        self.vars.contains_key(var)
    }

    /// Independent copy for estimation runs: the estimate mutates the
    /// copy and the shared view stays untouched.
    pub fn estimation_copy(&self) -> StateView {
        self.clone()
    }

    /// All variables, for response metadata.
    pub fn vars(&self) -> &BTreeMap<String, Value> {
        &self.vars
    }

    /// Assemble a view from explicit variables (estimation results).
    pub fn from_vars(aa_address: Address, vars: BTreeMap<String, Value>) -> Self {
        Self { aa_address, vars }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_values_are_present() {
        let mut view = StateView::default();
        view.vars.insert("maybe".into(), Value::Null);
        assert!(view.exists("maybe"));
        assert_eq!(view.get("maybe"), Some(&Value::Null));
        assert!(!view.exists("absent"));
    }

    #[test]
    fn estimation_copy_is_independent() {
        let mut view = StateView::default();
        view.vars.insert("x".into(), json!(1));
        let mut copy = view.estimation_copy();
        copy.vars.insert("x".into(), json!(2));
        assert_eq!(view.get("x"), Some(&json!(1)));
    }
}
