//! Public API: typed table and queue handles, query-by-example, paginated
//! queries, partition batching and iterate-and-update.

pub mod batch;
pub mod filter;
pub mod iterate;
pub mod predicate;
pub mod projection;
pub mod query;
pub mod queue;
pub mod table;

pub use batch::{BatchReport, FailureMode, SliceSpec, plan_slices};
pub use filter::{Comparison, FilterExpr};
pub use predicate::{Combinator, build_filter, build_selection};
pub use projection::apply_selection;
pub use query::{EntityQuery, QueryDescriptor};
pub use queue::EntityQueue;
pub use table::EntityTable;
