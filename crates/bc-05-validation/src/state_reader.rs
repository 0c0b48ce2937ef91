//! Store-backed state view for definition evaluation.

use bc_02_object_store::Store;
use bc_04_definitions::{DefinitionError, SeenFilter, StateReader};
use serde_json::Value;
use shared_types::{Address, FeedValue};

/// Stable-state reader fixed to whatever MCI the evaluation passes in.
pub struct StoreStateReader<'a> {
    store: &'a Store,
}

impl<'a> StoreStateReader<'a> {
    /// Wrap a store handle.
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }
}

fn state_err(e: impl std::fmt::Display) -> DefinitionError {
    DefinitionError::State(e.to_string())
}

impl StateReader for StoreStateReader<'_> {
    fn data_feed_exists(
        &self,
        oracles: &[Address],
        feed: &str,
        rel_op: &str,
        value: &FeedValue,
        max_mci: u64,
    ) -> Result<bool, DefinitionError> {
        self.store
            .data_feed_exists(oracles, feed, rel_op, value, max_mci)
            .map_err(state_err)
    }

    fn definition_at(
        &self,
        address: &str,
        max_mci: u64,
    ) -> Result<Option<Value>, DefinitionError> {
        let chash = self
            .store
            .definition_chash_at(address, max_mci)
            .map_err(state_err)?;
        match self.store.definition(&chash).map_err(state_err)? {
            Some(row) => serde_json::from_str(&row.definition_json)
                .map(Some)
                .map_err(state_err),
            None => Ok(None),
        }
    }

    fn is_attested(
        &self,
        address: &str,
        attestors: &[Address],
        _max_mci: u64,
    ) -> Result<bool, DefinitionError> {
        for attestor in attestors {
            if self
                .store
                .has_attestation(attestor, address)
                .map_err(state_err)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn seen_unit_matching(
        &self,
        filter: &SeenFilter,
        _max_mci: u64,
    ) -> Result<bool, DefinitionError> {
        // Output-side filter: any stored output to the address (amount
        // constrained when given). Input-side: any unit authored by the
        // address that spends.
        match filter.what {
            bc_04_definitions::HasWhat::Output => {
                let rows = self
                    .store
                    .outputs_of_address(&filter.address, 1000)
                    .map_err(state_err)?;
                if filter.amount.is_none() {
                    return Ok(!rows.is_empty());
                }
                Ok(rows
                    .iter()
                    .any(|(_, row)| filter.amount.is_some_and(|a| a == row.amount)))
            }
            bc_04_definitions::HasWhat::Input => {
                let units = self
                    .store
                    .units_by_author(&filter.address)
                    .map_err(state_err)?;
                Ok(!units.is_empty())
            }
        }
    }

    fn address_age_mcis(
        &self,
        address: &str,
        max_mci: u64,
    ) -> Result<Option<u64>, DefinitionError> {
        let units = self.store.units_by_author(address).map_err(state_err)?;
        let mut first_mci: Option<u64> = None;
        for unit in units {
            let Some(props) = self.store.unit_props(&unit).map_err(state_err)? else {
                continue;
            };
            if !props.is_stable {
                continue;
            }
            if let Some(mci) = props.main_chain_index {
                if mci <= max_mci {
                    first_mci = Some(first_mci.map_or(mci, |f| f.min(mci)));
                }
            }
        }
        Ok(first_mci.map(|f| max_mci - f))
    }
}
