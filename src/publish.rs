//! Named feed definitions.
//!
//! A `Publication` describes one table feed a server offers: which
//! collection it reads, a base selector that always applies, and optional
//! filter/projection settings. Each client subscribe request resolves the
//! definition into a concrete selector and query options and opens a
//! `Subscription` for it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::FeedConfig;
use crate::document::PublicationId;
use crate::error::{FeedResult, ValidationError};
use crate::feed::{FeedHandle, Subscription};
use crate::filter::{FieldDescriptor, FilterSelectorBuilder, FilterSettings, TermFilterBuilder};
use crate::query::QueryOptions;
use crate::selector::Selector;
use crate::sink::EventSink;
use crate::source::ChangeSource;

/// A value fixed at definition time or produced per subscription.
pub enum Provider<T> {
    /// The same value for every subscription.
    Value(T),
    /// Invoked once when a subscription opens.
    Factory(Arc<dyn Fn(&SubscribeRequest) -> T + Send + Sync>),
}

impl<T: Clone> Provider<T> {
    /// Wrap a closure.
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&SubscribeRequest) -> T + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(f))
    }

    /// Produce the value for one subscription.
    pub fn resolve(&self, request: &SubscribeRequest) -> T {
        match self {
            Self::Value(v) => v.clone(),
            Self::Factory(f) => f(request),
        }
    }
}

impl<T> fmt::Debug for Provider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Provider::Value"),
            Self::Factory(_) => f.write_str("Provider::Factory"),
        }
    }
}

/// Where a publication's documents come from. `None` yields an empty feed.
pub type CollectionProvider = Provider<Option<Arc<dyn ChangeSource>>>;

impl CollectionProvider {
    /// A fixed collection.
    pub fn collection<C: ChangeSource + 'static>(source: C) -> Self {
        let source: Arc<dyn ChangeSource> = Arc::new(source);
        Self::Value(Some(source))
    }
}

/// A client's request to open a feed.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub publication_id: PublicationId,
    /// Free-text filter typed by the user.
    #[serde(default)]
    pub filter: String,
    /// Columns shown by the table.
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub options: QueryOptions,
    /// Page size the client renders; carried for transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_per_page: Option<usize>,
}

impl SubscribeRequest {
    /// A request with no filter, no columns and default options.
    #[must_use]
    pub fn new(publication_id: impl Into<String>) -> Self {
        Self {
            publication_id: PublicationId::new(publication_id),
            filter: String::new(),
            fields: Vec::new(),
            options: QueryOptions::default(),
            rows_per_page: None,
        }
    }

    /// Set the free-text filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Set the displayed columns.
    #[must_use]
    pub fn with_fields(mut self, fields: Vec<FieldDescriptor>) -> Self {
        self.fields = fields;
        self
    }

    /// Set sort, skip, limit and projection.
    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

/// A request resolved against its publication.
#[allow(missing_docs)]
pub struct PreparedFeed {
    pub source: Arc<dyn ChangeSource>,
    pub selector: Selector,
    pub options: QueryOptions,
}

impl fmt::Debug for PreparedFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedFeed")
            .field("source", &self.source.name())
            .field("selector", &self.selector)
            .field("options", &self.options)
            .finish()
    }
}

/// A named, subscribable table feed.
pub struct Publication {
    name: String,
    collection: CollectionProvider,
    selector: Provider<Selector>,
    settings: Option<FilterSettings>,
    builder: Arc<dyn FilterSelectorBuilder>,
    config: FeedConfig,
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("selector", &self.selector)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Publication {
    /// Define a publication using the default filter builder and config.
    pub fn new(
        name: impl Into<String>,
        collection: CollectionProvider,
        selector: Provider<Selector>,
    ) -> FeedResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyPublicationName.into());
        }
        Ok(Self {
            name,
            collection,
            selector,
            settings: None,
            builder: Arc::new(TermFilterBuilder),
            config: FeedConfig::default(),
        })
    }

    /// Attach filter and projection overrides.
    #[must_use]
    pub fn with_settings(mut self, settings: FilterSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Replace the filter selector builder.
    #[must_use]
    pub fn with_builder(mut self, builder: Arc<dyn FilterSelectorBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Replace the feed config after validating it.
    pub fn with_config(mut self, config: FeedConfig) -> FeedResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// The publication name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The channel name a transport registers this publication under.
    #[must_use]
    pub fn feed_name(&self) -> String {
        format!("livetable-{}", self.name)
    }

    /// Config used for every subscription of this publication.
    #[must_use]
    pub const fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Resolve providers and build the query for one request.
    ///
    /// Returns `None` when the collection provider yields no collection.
    /// Filter-builder errors are returned unchanged.
    pub fn prepare(&self, request: &SubscribeRequest) -> FeedResult<Option<PreparedFeed>> {
        let Some(source) = self.collection.resolve(request) else {
            tracing::warn!(
                publication = %self.name,
                "no collection to publish; serving an empty feed"
            );
            return Ok(None);
        };

        let base = self.selector.resolve(request);
        let selector = self
            .builder
            .build(&request.filter, &request.fields, self.settings.as_ref())?
            .merge(&base);

        let mut options = request.options.clone();
        if let Some(fields) = self.settings.as_ref().and_then(|s| s.fields.clone()) {
            options.fields = Some(fields);
        }

        tracing::debug!(
            publication = %self.name,
            source = source.name(),
            selector = ?selector.as_map(),
            "prepared feed query"
        );
        Ok(Some(PreparedFeed {
            source,
            selector,
            options,
        }))
    }

    /// Open a subscription driven by the caller.
    ///
    /// For an empty feed the sink receives a zero count and the ready signal
    /// and `None` is returned.
    pub fn open(
        &self,
        request: &SubscribeRequest,
        sink: Arc<dyn EventSink>,
    ) -> FeedResult<Option<Subscription>> {
        if request.publication_id.is_blank() {
            return Err(ValidationError::EmptyPublicationId.into());
        }

        let Some(prepared) = self.prepare(request)? else {
            sink.emit_count(&request.publication_id, 0);
            sink.signal_ready(&request.publication_id);
            return Ok(None);
        };

        Subscription::open(
            request.publication_id.clone(),
            prepared.source.as_ref(),
            &prepared.selector,
            &prepared.options,
            sink,
            &self.config,
        )
        .map(Some)
    }

    /// Open a subscription on its own dispatch worker.
    pub fn subscribe(&self, request: &SubscribeRequest, sink: Arc<dyn EventSink>) -> FeedResult<FeedHandle> {
        match self.open(request, sink)? {
            Some(sub) => FeedHandle::spawn(sub, self.config.control_queue_capacity),
            None => Ok(FeedHandle::detached(request.publication_id.clone())),
        }
    }
}
