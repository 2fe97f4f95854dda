//! Stage trait and the continuation handed to each stage.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

use super::Context;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One step of request processing.
///
/// A stage may answer by setting `ctx.response` and returning without
/// calling `next`, or run logic around `next.run(ctx).await`.
pub trait Stage: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>>;
}

/// A stage error tagged with the stage that raised it.
#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {source}")]
pub struct StageFailure {
    pub stage: &'static str,
    #[source]
    pub source: BoxError,
}

impl StageFailure {
    /// Keep the innermost attribution when an error bubbles through outer stages.
    pub(crate) fn attribute(stage: &'static str, error: BoxError) -> Self {
        match error.downcast::<StageFailure>() {
            Ok(inner) => *inner,
            Err(source) => Self { stage, source },
        }
    }
}

/// Continuation invoking the remaining stages.
///
/// `run` consumes the continuation, so it can be driven at most once.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [Arc<dyn Stage>]) -> Self {
        Self { stages }
    }

    /// Run the rest of the chain. A no-op past the last stage.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b, Result<(), StageFailure>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            let Some((stage, rest)) = self.stages.split_first() else {
                return Ok(());
            };
            let name = stage.name();
            // Restored on return so post-`next` logic is attributed to its own stage.
            let outer = ctx.current_stage.replace(name);
            let result = stage.handle(ctx, Next { stages: rest }).await;
            ctx.current_stage = outer;
            result.map_err(|e| StageFailure::attribute(name, e))
        })
    }
}
