pub mod error;
pub mod ident;

pub use error::{Error, Result};
pub use ident::is_sql_identifier;
