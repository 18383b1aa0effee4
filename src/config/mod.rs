//! Configuration loading.
//!
//! Files are read into a generic [`IniDocument`] first. Typed records
//! ([`crate::server::ServerRegistry`], [`crate::component::Component`],
//! [`crate::tasks::ReleaseTask`]) are built from it afterwards, with
//! [`Substitutions`] applied in one explicit pass.

pub mod ini;
pub mod substitution;

pub use ini::{split_list, IniDocument, IniSection, DEFAULT_SECTION};
pub use substitution::Substitutions;
