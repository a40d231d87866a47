//! Domain types shared by the data, cache and analysis layers.

pub mod request;
pub mod segment;
pub mod table;

pub use request::{FetchRequest, Operation, UnknownOperation};
pub use segment::{MarketSegment, UnknownSegment};
pub use table::{row, Row, Table, Value};
