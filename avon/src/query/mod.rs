//! Listing parameters and the handlers they drive
//!
//! [`QueryParams`] carries what a caller asked for; a [`Matcher`] turns the
//! `filters` and `orders` entries into conditions through registered
//! [`Filter`] and [`Ordering`] handlers.

mod filter;
mod matcher;
mod ordering;
mod params;

pub use filter::{
    BooleanFilter, ExactFilter, Filter, FilterFn, RangeFilter, SelectFilter, TextFilter,
    TrashedFilter,
};
pub use matcher::Matcher;
pub use ordering::{ColumnOrdering, Ordering, OrderingFn};
pub use params::QueryParams;
