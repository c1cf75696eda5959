//! Building providers and planner data sources from configuration
//!
//! Only providers that at least one schema event references are built. An
//! event referencing an undefined provider is a configuration error, and
//! any error yields no partial output.

use crate::config::{EventsConfiguration, InstanceIdentity, ProviderSource};
use crate::datasource::EngineDataSourceFactory;
use crate::error::{EventError, Result};
use crate::hooks::Hooks;
use crate::plan::{FactoryResolver, PlanDataSource};
use crate::provider::kafka::KafkaProviderBuilder;
use crate::provider::nats::NatsProviderBuilder;
use crate::provider::redis::RedisProviderBuilder;
use crate::provider::sqs::SqsProviderBuilder;
use crate::provider::Provider;
use crate::types::{CustomEvents, DataSourceConfiguration, EventDefinition, ProviderType, TypeField};
use std::sync::Arc;

/// Per-backend construction of providers and field factories
pub trait ProviderBuilder: Send + Sync + 'static {
    type Source: ProviderSource;
    type Event: EventDefinition;

    fn type_id(&self) -> ProviderType;

    /// Create the provider of one configured source; must not connect
    fn build_provider(&self, source: &Self::Source) -> Result<Arc<dyn Provider>>;

    /// Create the factory of one event-backed field
    fn build_engine_data_source_factory(
        &self,
        event: &Self::Event,
    ) -> Result<Box<dyn EngineDataSourceFactory>>;
}

/// The events of one backend declared by one data source
#[derive(Debug, Clone)]
pub struct DataSourceEvents<E> {
    pub id: String,
    pub events: Vec<E>,
}

impl<E: Clone> DataSourceEvents<E> {
    /// Select one backend's events from every data source
    pub fn collect(
        data_sources: &[DataSourceConfiguration],
        select: impl Fn(&CustomEvents) -> &Vec<E>,
    ) -> Vec<Self> {
        data_sources
            .iter()
            .map(|ds| Self {
                id: ds.id.clone(),
                events: select(&ds.custom_events).clone(),
            })
            .collect()
    }
}

struct EventFactoryResolver<B: ProviderBuilder> {
    builder: Arc<B>,
    events: Vec<B::Event>,
}

impl<B: ProviderBuilder> FactoryResolver for EventFactoryResolver<B> {
    fn resolve(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Result<Option<Box<dyn EngineDataSourceFactory>>> {
        self.events
            .iter()
            .find(|event| {
                let engine = event.engine();
                engine.type_name == type_name && engine.field_name == field_name
            })
            .map(|event| self.builder.build_engine_data_source_factory(event))
            .transpose()
    }
}

/// Root nodes served by a set of events, grouped by type in first-seen order
fn event_root_nodes<E: EventDefinition>(events: &[E]) -> Vec<TypeField> {
    let mut nodes: Vec<TypeField> = Vec::new();
    for event in events {
        let engine = event.engine();
        match nodes.iter_mut().find(|n| n.type_name == engine.type_name) {
            Some(node) => {
                if !node.field_names.contains(&engine.field_name) {
                    node.field_names.push(engine.field_name.clone());
                }
            }
            None => nodes.push(TypeField::new(
                engine.type_name.clone(),
                vec![engine.field_name.clone()],
            )),
        }
    }
    nodes
}

/// Build the providers and planner data sources of one backend
pub fn build<B: ProviderBuilder>(
    builder: Arc<B>,
    sources: &[B::Source],
    data_sources: &[DataSourceEvents<B::Event>],
) -> Result<(Vec<Arc<dyn Provider>>, Vec<PlanDataSource>)> {
    let provider_type = builder.type_id();

    let mut used_ids: Vec<&str> = Vec::new();
    for event in data_sources.iter().flat_map(|ds| ds.events.iter()) {
        let id = event.provider_id();
        if !used_ids.contains(&id) {
            used_ids.push(id);
        }
    }

    if let Some(missing) = used_ids
        .iter()
        .find(|id| !sources.iter().any(|s| s.id() == **id))
    {
        return Err(EventError::ProviderNotDefined {
            provider_id: (*missing).to_string(),
            provider_type,
        });
    }

    let providers = sources
        .iter()
        .filter(|source| used_ids.contains(&source.id()))
        .map(|source| builder.build_provider(source))
        .collect::<Result<Vec<_>>>()?;

    let plan_data_sources: Vec<PlanDataSource> = data_sources
        .iter()
        .filter(|ds| !ds.events.is_empty())
        .map(|ds| {
            PlanDataSource::new(
                ds.id.clone(),
                provider_type,
                event_root_nodes(&ds.events),
                Arc::new(EventFactoryResolver {
                    builder: builder.clone(),
                    events: ds.events.clone(),
                }),
            )
        })
        .collect();

    if !providers.is_empty() {
        tracing::info!(
            provider_type = %provider_type,
            providers = providers.len(),
            data_sources = plan_data_sources.len(),
            "Built event providers"
        );
    }

    Ok((providers, plan_data_sources))
}

/// Build every backend's providers and data sources
pub fn build_providers_and_data_sources(
    config: &EventsConfiguration,
    hooks: &Hooks,
    data_sources: &[DataSourceConfiguration],
    instance: &InstanceIdentity,
) -> Result<(Vec<Arc<dyn Provider>>, Vec<PlanDataSource>)> {
    let mut providers = Vec::new();
    let mut plan_data_sources = Vec::new();

    let (p, d) = build(
        Arc::new(KafkaProviderBuilder::new(hooks.clone())),
        &config.providers.kafka,
        &DataSourceEvents::collect(data_sources, |events| &events.kafka),
    )?;
    providers.extend(p);
    plan_data_sources.extend(d);

    let (p, d) = build(
        Arc::new(NatsProviderBuilder::new(hooks.clone(), instance.clone())),
        &config.providers.nats,
        &DataSourceEvents::collect(data_sources, |events| &events.nats),
    )?;
    providers.extend(p);
    plan_data_sources.extend(d);

    let (p, d) = build(
        Arc::new(RedisProviderBuilder::new(hooks.clone())),
        &config.providers.redis,
        &DataSourceEvents::collect(data_sources, |events| &events.redis),
    )?;
    providers.extend(p);
    plan_data_sources.extend(d);

    let (p, d) = build(
        Arc::new(SqsProviderBuilder::new(hooks.clone())),
        &config.providers.sqs,
        &DataSourceEvents::collect(data_sources, |events| &events.sqs),
    )?;
    providers.extend(p);
    plan_data_sources.extend(d);

    Ok((providers, plan_data_sources))
}
