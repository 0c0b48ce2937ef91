//! # Network Parameters
//!
//! Genesis identity and protocol upgrade activation points, installable
//! exactly once at startup. Private networks override the defaults from
//! configuration; installing two different parameter sets in one process
//! is a hard error, since two independently derived genesis units with
//! different timestamps produce incompatible unit ids.

use crate::entities::{Address, UnitId};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Network-defining constants: genesis identity and upgrade MCIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Unit id of the genesis unit.
    pub genesis_unit: UnitId,
    /// Initial operator committee listed by the genesis unit, sorted.
    pub genesis_operators: Vec<Address>,
    /// MCI from which version-4 rules (keyed canonical form, vote-derived
    /// operator sets) apply.
    pub v4_upgrade_mci: u64,
    /// MCI from which unit timestamps are validated against the parent
    /// window.
    pub timestamp_upgrade_mci: u64,
    /// MCI from which the witnessed level must not retreat below any
    /// parent.
    pub wl_retreat_upgrade_mci: u64,
    /// MCI from which TPS fees are charged and checked.
    pub tps_fee_upgrade_mci: u64,
}

impl NetworkParams {
    /// Parameters for a fresh private network: every rule active from
    /// genesis.
    pub fn private_network(genesis_unit: UnitId, genesis_operators: Vec<Address>) -> Self {
        Self {
            genesis_unit,
            genesis_operators,
            v4_upgrade_mci: 0,
            timestamp_upgrade_mci: 0,
            wl_retreat_upgrade_mci: 0,
            tps_fee_upgrade_mci: 0,
        }
    }

    /// Whether witnessed-level retreat rules apply at `mci`.
    pub fn wl_retreat_active(&self, mci: u64) -> bool {
        mci >= self.wl_retreat_upgrade_mci
    }

    /// Whether TPS fees are checked at `mci`.
    pub fn tps_fees_active(&self, mci: u64) -> bool {
        mci >= self.tps_fee_upgrade_mci
    }

    /// Whether the operator set is derived from votes at `mci` (as opposed
    /// to an inline list).
    pub fn vote_derived_ops_active(&self, mci: u64) -> bool {
        mci >= self.v4_upgrade_mci
    }

    /// Whether the timestamp window is enforced at `mci`.
    pub fn timestamp_window_active(&self, mci: u64) -> bool {
        mci >= self.timestamp_upgrade_mci
    }
}

static PARAMS: OnceLock<NetworkParams> = OnceLock::new();

/// Raised when startup tries to install conflicting network parameters.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("network parameters already installed with different values")]
pub struct ParamsConflict;

/// Install the network parameters. Idempotent for identical values;
/// conflicting values are refused.
pub fn install_network_params(params: NetworkParams) -> Result<(), ParamsConflict> {
    let installed = PARAMS.get_or_init(|| params.clone());
    if *installed == params {
        Ok(())
    } else {
        Err(ParamsConflict)
    }
}

/// The installed parameters. Panics if called before installation, which
/// is a startup-ordering bug, not a runtime condition.
pub fn network_params() -> &'static NetworkParams {
    PARAMS
        .get()
        .expect("network parameters must be installed at startup")
}

/// Whether parameters have been installed (startup assertions, tests).
pub fn network_params_installed() -> bool {
    PARAMS.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinstall_same_params_is_idempotent() {
        let p = NetworkParams::private_network("G".into(), vec!["OP".into()]);
        install_network_params(p.clone()).unwrap();
        assert!(install_network_params(p.clone()).is_ok());

        let mut other = p;
        other.genesis_unit = "H".into();
        assert_eq!(install_network_params(other), Err(ParamsConflict));
        assert!(network_params_installed());
    }

    #[test]
    fn private_network_activates_everything() {
        let p = NetworkParams::private_network("G".into(), vec![]);
        assert!(p.wl_retreat_active(0));
        assert!(p.tps_fees_active(0));
        assert!(p.vote_derived_ops_active(0));
        assert!(p.timestamp_window_active(0));
    }
}
