//! Entry point that wires the member registry, symbol resolver, activity
//! invoker and template renderer from an [`EngineConfig`].

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    adapters::{HandlebarsRenderer, RenderOutput, SystemClock, TracingTelemetrySink},
    config::EngineConfig,
    core::{
        Error as CoreError, Result as CoreResult,
        ports::{Clock, ConfigurationProvider, TelemetrySink},
    },
    expressions::{
        ExpressionContext, MemberAccessRegistry, MemberAccessRegistryBuilder, Resolution,
        SymbolResolver, VariableTypeCatalog,
    },
    runtime::{
        Activity, ActivityCatalog, ActivityId, ActivityInvocationOptions, ActivityInvoker,
        WorkflowExecutionContext, WorkflowSnapshot,
    },
};

pub struct EngineBuilder {
    config: EngineConfig,
    members: MemberAccessRegistryBuilder,
    catalog: ActivityCatalog,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn TelemetrySink>,
    configuration: Option<Arc<dyn ConfigurationProvider>>,
}

impl EngineBuilder {
    pub fn with_activity(mut self, activity: Arc<dyn Activity>) -> Self {
        self.catalog.register(activity);
        self
    }

    /// Registers member resolvers for the variable types a host declares.
    pub fn with_variable_types(mut self, catalog: &dyn VariableTypeCatalog) -> Self {
        self.members.register_catalog(catalog);
        self
    }

    /// Direct access to the registry while it is still being written.
    pub fn with_members(mut self, configure: impl FnOnce(&mut MemberAccessRegistryBuilder)) -> Self {
        configure(&mut self.members);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Replaces the provider built from the `configuration:` tree.
    pub fn with_configuration(mut self, provider: Arc<dyn ConfigurationProvider>) -> Self {
        self.configuration = Some(provider);
        self
    }

    pub fn build(mut self) -> anyhow::Result<Engine> {
        self.config.validate()?;
        let options = self.config.resolver_options();
        if options.allow_configuration_access {
            self.members.with_configuration_access();
        }
        let registry = Arc::new(self.members.build());

        let configuration = match self.configuration {
            Some(provider) => provider,
            None => Arc::new(
                self.config
                    .configuration_provider()
                    .context("Failed to load the configuration tree")?,
            ),
        };
        let resolver = SymbolResolver::new(registry.clone(), options).with_configuration(configuration);
        let invoker = ActivityInvoker::new(resolver.clone(), self.clock, self.telemetry);
        let renderer = HandlebarsRenderer::new(resolver.clone())
            .with_strict_members(self.config.expressions.strict_members);

        info!(
            activities = self.catalog.len(),
            allow_configuration_access = options.allow_configuration_access,
            strict_members = self.config.expressions.strict_members,
            "Engine ready"
        );
        Ok(Engine {
            config: self.config,
            registry,
            resolver,
            invoker,
            renderer,
            catalog: self.catalog,
        })
    }
}

pub struct Engine {
    config: EngineConfig,
    registry: Arc<MemberAccessRegistry>,
    resolver: SymbolResolver,
    invoker: ActivityInvoker,
    renderer: HandlebarsRenderer,
    catalog: ActivityCatalog,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            members: MemberAccessRegistry::builder(),
            catalog: ActivityCatalog::new(),
            clock: Arc::new(SystemClock::new()),
            telemetry: Arc::new(TracingTelemetrySink::new()),
            configuration: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MemberAccessRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    pub fn invoker(&self) -> &ActivityInvoker {
        &self.invoker
    }

    pub fn catalog(&self) -> &ActivityCatalog {
        &self.catalog
    }

    /// Invokes the registered activity `activity_id`.
    pub async fn invoke(
        &self,
        workflow: &mut WorkflowExecutionContext,
        activity_id: &str,
        options: ActivityInvocationOptions,
    ) -> CoreResult<ActivityId> {
        let activity = self
            .catalog
            .get(activity_id)
            .ok_or_else(|| CoreError::UnregisteredActivity(activity_id.to_string()))?;
        self.invoker.invoke(workflow, activity, options).await
    }

    pub async fn resume(
        &self,
        workflow: &mut WorkflowExecutionContext,
        id: ActivityId,
        cancellation: CancellationToken,
    ) -> CoreResult<ActivityId> {
        self.invoker.resume(workflow, id, cancellation).await
    }

    pub async fn resolve(&self, path: &str, context: ExpressionContext<'_>) -> Resolution {
        self.resolver.resolve(path, context).await
    }

    pub async fn render(&self, template: &str, context: ExpressionContext<'_>) -> CoreResult<RenderOutput> {
        self.renderer.render(template, context).await
    }

    /// Renders one of the templates declared in the engine configuration.
    pub async fn render_named(&self, name: &str, context: ExpressionContext<'_>) -> CoreResult<RenderOutput> {
        let template = self
            .config
            .template(name)
            .ok_or_else(|| CoreError::TemplateRendering(format!("Unknown template '{name}'")))?;
        self.renderer.render(template, context).await
    }

    /// Restores a workflow from `snapshot`, binding activities from this engine's catalog.
    pub fn rehydrate(&self, snapshot: WorkflowSnapshot) -> CoreResult<WorkflowExecutionContext> {
        WorkflowExecutionContext::rehydrate(snapshot, &self.catalog)
    }
}
