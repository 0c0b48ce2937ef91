//! # Parenthood Graph
//!
//! DAG traversal primitives over the object store: ancestry and inclusion
//! checks with level/witnessed-level cut-offs, best-parent selection and
//! the witnessed-level walk. These are the only pieces of the system that
//! walk parent edges; everything above reasons in terms of them.

pub mod best_parent;
pub mod errors;
pub mod inclusion;
pub mod props;

pub use best_parent::{pick_best_parent, witnessed_level_via_best_parent};
pub use errors::DagError;
pub use inclusion::{
    determine_if_included, determine_if_included_or_equal, determine_if_stable_in_later_units,
    included_in_all,
};
pub use props::{latest_included_mc_index, read_unit_props};
