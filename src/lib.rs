//! # a3s-edfs
//!
//! Event-driven federated subscriptions for the A3S gateway.
//!
//! ## Overview
//!
//! `a3s-edfs` backs GraphQL fields with message brokers. A subscription
//! field streams messages from Kafka topics, NATS subjects (core or
//! JetStream), Redis channels or SQS queues; a mutation field publishes to
//! one of them; a query field performs a NATS request/reply. User hooks can
//! rewrite, filter or reject events on their way in and out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_edfs::{
//!     build_providers_and_data_sources, DataSourceConfiguration, EventsConfiguration,
//!     FieldRequest, Hooks, InstanceIdentity, ProviderRegistry,
//! };
//!
//! # async fn example(data_sources: Vec<DataSourceConfiguration>) -> a3s_edfs::Result<()> {
//! let config = EventsConfiguration::from_yaml(
//!     r#"
//! providers:
//!   nats:
//!     - id: default
//!       url: nats://localhost:4222
//! "#,
//! )?;
//!
//! let (providers, plan_data_sources) = build_providers_and_data_sources(
//!     &config,
//!     &Hooks::new(),
//!     &data_sources,
//!     &InstanceIdentity::detect(":3002"),
//! )?;
//!
//! let registry = ProviderRegistry::new();
//! registry.register_all(providers).await?;
//! registry.startup_all().await?;
//!
//! let fetch = plan_data_sources[0].configure_fetch(FieldRequest {
//!     type_name: "Mutation",
//!     field_name: "updateEmployee",
//!     argument_names: &["id".to_string()],
//! })?;
//! let input = fetch.render_input(&serde_json::json!({"id": 7}))?;
//! # let _ = input;
//!
//! registry.shutdown_all().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Adapter** trait: broker plumbing of one backend
//! - **PubSubProvider**: one configured broker connection with hooks applied
//! - **EngineDataSourceFactory**: per-field input rendering and data source selection
//! - **PlanDataSource**: planner glue turning argument templates into variables
//! - **ProviderRegistry**: startup and shutdown of every provider

pub mod builder;
pub mod config;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod plan;
pub mod provider;
pub mod registry;
pub mod types;

#[cfg(test)]
mod test_support;

pub use builder::{build, build_providers_and_data_sources, DataSourceEvents, ProviderBuilder};
pub use config::{
    EventProviders, EventsConfiguration, InstanceIdentity, KafkaEventSource, NatsEventSource,
    ProviderSource, RedisEventSource, SqsEventSource,
};
pub use datasource::{
    EngineDataSourceFactory, EventUpdater, PubSubPublishDataSource, PubSubRequestDataSource,
    PubSubSubscriptionDataSource, SubscriptionEventUpdater,
};
pub use engine::{DataSource, SubscriptionCloseKind, SubscriptionDataSource, SubscriptionUpdater};
pub use error::{EventError, HookError, PublicError, Result};
pub use hooks::{
    publish_hook, receive_hook, start_hook, HookContext, Hooks, OnPublishEvents,
    OnReceiveEvents, StartupHookContext, SubscriptionOnStart,
};
pub use plan::{
    FetchConfiguration, FieldRequest, PlanDataSource, SubscriptionConfiguration, Variables,
};
pub use provider::{
    Adapter, EventConfiguration, Provider, PubSubProvider, PublishEventConfiguration,
};
pub use registry::ProviderRegistry;
pub use types::{
    CustomEvents, DataSourceConfiguration, EngineEventConfiguration, EventMetadata, EventType,
    ProviderType, StreamEvent, TypeField,
};
