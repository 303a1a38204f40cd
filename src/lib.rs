//! # Trueno-MLRepo: Versioned ML Artifact Repository
//!
//! **Version**: 0.1.0
//!
//! Trueno-MLRepo stores every artifact of a machine-learning workflow (raw
//! data, data sets, parameters, model definitions, calibrated models,
//! evaluations, measures and labels) as immutable, versioned objects. Each
//! object records the exact input versions it was derived from, so results can
//! be traced, checked for staleness and recomputed.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: Multi-object commits validate versions, categories and
//!   lineage before any write
//! - **Poka-Yoke**: Append-only versions; labels can never be silently rebound
//! - **Genchi Genbutsu**: Lineage records the versions actually consumed
//! - **Muda elimination**: Stages skip targets whose inputs did not change
//!
//! ## Example Usage
//!
//! ```rust
//! use trueno_mlrepo::array::NumericArray;
//! use trueno_mlrepo::object::{Category, Payload, RawData, RepoObject};
//! use trueno_mlrepo::store::{Fetch, VersionSelector};
//! use trueno_mlrepo::Repository;
//!
//! # async fn example() -> trueno_mlrepo::Result<()> {
//! let repo = Repository::in_memory().await?;
//!
//! let x = NumericArray::from_rows(&[vec![0.0], vec![1.0]])?;
//! let data = RawData::new(x, vec!["x".into()], None)?;
//! repo.add(RepoObject::new("sensor", Category::RawData, Payload::RawData(data))?, "import").await?;
//!
//! // Grow the data by a new version instead of rewriting it
//! repo.append_rows("sensor", NumericArray::from_rows(&[vec![2.0]])?, None, "more rows").await?;
//!
//! let latest = repo.get("sensor", VersionSelector::Latest, Fetch::Full).await?;
//! assert_eq!(latest.version(), 1);
//! assert_eq!(latest.as_raw_data().map(RawData::n_rows), Some(3));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod array;
pub mod config;
pub mod error;
pub mod job;
pub mod kv;
pub mod label;
pub mod lineage;
pub mod logging;
pub mod measure;
pub mod naming;
pub mod object;
pub mod payload;
pub mod registry;
pub mod repository;
pub mod store;
pub mod sync;

pub use config::{RepoConfig, RepoConfigBuilder};
pub use error::{Error, Result};
pub use job::{BatchReport, Stage, StageFailure, Targets};
pub use lineage::VersionRef;
pub use naming::DerivedName;
pub use object::{Category, RepoObject};
pub use repository::Repository;
pub use store::{Fetch, ModifierFilter, VersionSelector};
