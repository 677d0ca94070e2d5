//! Output generation for a finished run.
//!
//! # Submodules
//!
//! - [`json`]: writes the [`EventDigest`](crate::models::EventDigest) as one
//!   pretty-printed JSON file
//!
//! # Output Structure
//!
//! ```text
//! data/
//! ├── events.json               # the digest (path configurable)
//! └── html_dumps/
//!     ├── listing_peatix_page_1.html
//!     └── listing_luma.html
//! ```

pub mod json;
