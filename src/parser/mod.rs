pub mod id;
pub mod title;

pub use id::{IdNamespace, MediaKind, ParsedId};
pub use title::parse_title;
