//! # livetable - Live paginated table feeds
//!
//! livetable keeps a client-side table in sync with a mutable document
//! collection. A subscription opens a live query (selector plus sort, skip
//! and limit), publishes the initial rows, and afterwards emits only the
//! difference between what it last published and what the window looks like
//! now.
//!
//! ## Core Concepts
//!
//! - **ChangeSource**: Something that opens live queries and pushes
//!   added/removed/changed notifications
//! - **Subscription**: One feed's snapshot and lifecycle
//!   (`Initializing -> Active -> Stopped`)
//! - **VisibleRow**: A projected document tagged with its subscription id and
//!   its rank in the window
//! - **EventSink**: Where `Added`/`Changed`/`Removed`/`Count`/`Ready` go
//! - **Publication**: A named feed definition resolved per subscribe request
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use livetable::{ChannelSink, CollectionProvider, MemoryCollection, Provider, Publication,
//!     Selector, SubscribeRequest};
//!
//! let people = MemoryCollection::new("people");
//! people.insert(serde_json::json!({"_id": "1", "name": "Ann"}))?;
//!
//! let publication = Publication::new(
//!     "people",
//!     CollectionProvider::collection(people.clone()),
//!     Provider::Value(Selector::new()),
//! )?;
//!
//! let (sink, stream) = ChannelSink::new(256);
//! let handle = publication.subscribe(&SubscribeRequest::new("table-1"), Arc::new(sink))?;
//! // count, added(1), ready
//! for event in stream.drain() { println!("{event:?}"); }
//! handle.stop();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod document;
pub mod error;
pub mod query;
pub mod selector;

// Sources and sinks
pub mod sink;
pub mod source;

// Engine
pub mod feed;
pub mod filter;
pub mod publish;

// Re-export primary types at crate root for convenience
pub use config::FeedConfig;
pub use document::{DocumentId, PublicationId, RawDocument, ID_FIELD};
pub use error::{ExecutionError, FeedError, FeedResult, ProjectionError, ValidationError};
pub use query::{QueryOptions, SortDirection, SortSpec};
pub use selector::Selector;

pub use sink::{ChannelSink, EventSink, FeedEnvelope, FeedEvent, FeedStream};
pub use source::{ChangeNotification, ChangeSource, LiveQuery, MemoryCollection, NotificationSender};

pub use feed::{
	DeltaEvent, DiffEngine, FeedHandle, FeedStats, LifecycleState, RowProjector, SnapshotStore,
	Subscription, VisibleRow,
};
pub use filter::{FieldDescriptor, FilterSelectorBuilder, FilterSettings, ProjectionSpec, TermFilterBuilder};
pub use publish::{CollectionProvider, PreparedFeed, Provider, Publication, SubscribeRequest};
