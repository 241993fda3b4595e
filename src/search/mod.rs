//! Query construction, ranked lookup, fallback scanning and index upkeep.

pub mod cache;
pub mod fallback;
pub mod filter;
pub mod index;
pub mod manager;
pub mod model;
pub mod policy;
mod predicates;
pub mod query;

pub use fallback::FallbackSearch;
pub use filter::{Facets, Page, SortDirection, SortField};
pub use index::{IndexManager, IndexState, IndexStats, OptimizeReport};
pub use manager::{
    CompiledQuery, IndexHook, PageRequest, PrimarySearch, RecoveryStatus, SearchBackend,
    SearchManager, SearchPage, SearchRequest,
};
pub use model::{
    FieldWeight, MatchProvenance, QueryMode, QueryOptions, SearchFilters, SearchResult,
    TagMatch, YearRange,
};
pub use query::{QueryBuilder, QueryValidation, WeightedQuery};
