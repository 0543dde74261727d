use thiserror::Error;
use tracing::{debug, error};

use crate::config::{Compression, Config, ConfigError};
use crate::convert::{ConvertError, Converter, Shape};
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::models::{LogGroup, PipelineGroupEvents};
use crate::request::{RequestBuilder, RequestUnit, compress_gzip};
use crate::splitter::{SplitOutcome, split_group_events, split_log_groups};
use crate::template::QueryPlan;
use crate::transport::{HttpTransport, Transport, TransportError};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid convert settings: {0}")]
    Convert(#[from] ConvertError),

    #[error("failed to build HTTP client: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum FlushError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("converter does not accept {0} input")]
    UnsupportedShape(Shape),

    #[error("gzip compression failed: {0}")]
    Compression(#[source] std::io::Error),
}

/// Lifecycle wrapper around the dispatch engine.
///
/// Everything derived from configuration (converter, query plan, request
/// builder, worker pool settings) is built once here and shared by every
/// `flush`/`export` call.
pub struct HttpFlusher<T: Transport = HttpTransport> {
    converter: Converter,
    plan: QueryPlan,
    builder: RequestBuilder,
    dispatcher: Dispatcher<T>,
}

impl HttpFlusher<HttpTransport> {
    pub fn new(config: &Config) -> Result<Self, InitError> {
        Self::with_transport(config, HttpTransport::new()?)
    }
}

impl<T: Transport> HttpFlusher<T> {
    pub fn with_transport(config: &Config, transport: T) -> Result<Self, InitError> {
        config.validate()?;
        let converter = Converter::new(&config.convert)?;
        let plan = QueryPlan::compile(&config.query);
        let builder = RequestBuilder::new(
            config.remote_url.clone(),
            converter.content_type(),
            &config.headers,
            config.compression,
        );
        let dispatcher = Dispatcher::new(
            transport,
            config.concurrency,
            config.timeout,
            config.retry.clone(),
        );
        debug!(
            url = %config.remote_url,
            scope = ?converter.scope(),
            variables = ?plan.variable_keys(),
            concurrency = config.concurrency,
            "http flusher initialized"
        );
        Ok(Self {
            converter,
            plan,
            builder,
            dispatcher,
        })
    }

    /// Deliver legacy log groups. Returns once every request has been
    /// delivered or has failed for good.
    pub async fn flush(&self, groups: &[LogGroup]) -> Result<(), FlushError> {
        self.require_shape(Shape::Legacy)?;
        let outcome = split_log_groups(groups, &self.converter, &self.plan);
        self.deliver(outcome).await
    }

    /// Deliver generic pipeline event groups.
    pub async fn export(&self, groups: &[PipelineGroupEvents]) -> Result<(), FlushError> {
        self.require_shape(Shape::Generic)?;
        let outcome = split_group_events(groups, &self.converter, &self.plan);
        self.deliver(outcome).await
    }

    /// Input shape this flusher's converter accepts.
    pub fn shape(&self) -> Shape {
        self.converter.shape()
    }

    /// Stop accepting calls and wait for in-flight work to wind down.
    pub async fn stop(&self) {
        self.dispatcher.stop().await;
    }

    fn require_shape(&self, shape: Shape) -> Result<(), FlushError> {
        if self.shape() == shape {
            Ok(())
        } else {
            Err(FlushError::UnsupportedShape(shape))
        }
    }

    async fn deliver(&self, outcome: SplitOutcome) -> Result<(), FlushError> {
        for skipped in &outcome.skipped {
            error!(
                group = skipped.group,
                record = skipped.record,
                error = %skipped.error,
                "record skipped"
            );
        }

        let units = outcome
            .drafts
            .into_iter()
            .map(|draft| {
                let body = match self.builder.compression() {
                    Compression::Gzip => compress_gzip(&draft.body)
                        .map(Into::into)
                        .map_err(FlushError::Compression)?,
                    Compression::None => draft.body,
                };
                Ok(self.builder.build(&draft.query, body))
            })
            .collect::<Result<Vec<RequestUnit>, FlushError>>()?;

        self.dispatcher.dispatch(units).await?;
        Ok(())
    }
}
