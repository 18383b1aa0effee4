//! Archive location resolution and remote repository updates for SDK installers.
//!
//! The crate covers two halves of an installer release:
//!
//! - **Component validation** - target configurations declare components and
//!   their archives; every archive URI is resolved against local templates
//!   and named archive servers, and components whose archives cannot be
//!   found are skipped or reported.
//! - **Repository publishing** - online repositories built for release tasks
//!   are uploaded to a repository host and either initialise or update the
//!   staging and production repositories there, with safety checks and a
//!   backup before every change.
//!
//! # Architecture
//!
//! ```text
//! config (INI documents, substitutions)
//!     │
//!     ├── server    ServerRegistry: named archive servers
//!     ├── resolver  ArchiveLocationResolver: template / server / URL
//!     └── component Component, ArchiveDescriptor, ComponentCatalog
//!
//! tasks (release configuration)
//!     │
//!     ├── layout    <root>/<license>/<pending|staging|production>/<domain>
//!     ├── ifw       installer-framework tools (repogen)
//!     ├── publish   per-task publish flow, RTA triggers
//!     ├── sync      production mirrors (s3, ext)
//!     └── remote    RemoteRepository over LocalHost or SshRemote
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sdk_packager::component::{CatalogOptions, ComponentCatalog};
//! use sdk_packager::config::{IniDocument, Substitutions};
//! use sdk_packager::resolver::{ArchiveLocationResolver, HttpProbe};
//!
//! let doc = IniDocument::load(Path::new("configurations/linux/qt6.ini"))?;
//! let resolver = ArchiveLocationResolver::from_config(
//!     &doc, None, "configurations", Substitutions::new(), Box::new(HttpProbe::new()?),
//! )?;
//! let catalog = ComponentCatalog::parse(&doc, &resolver, &CatalogOptions::from_config(&doc)?)?;
//! println!("{}", catalog.report().to_json()?);
//! ```

pub mod component;
pub mod config;
pub mod error;
pub mod ifw;
pub mod layout;
pub mod manifest;
pub mod platform;
pub mod preflight;
pub mod publish;
pub mod remote;
pub mod resolver;
pub mod runner;
pub mod server;
pub mod stamp;
pub mod sync;
pub mod tasks;

pub use error::{Error, Result};
pub use platform::PlatformInfo;
