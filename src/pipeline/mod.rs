//! Request processing pipeline.
//!
//! # Data Flow
//! ```text
//! HTTP handler builds Context
//!     → Pipeline::execute
//!     → stage 0 → next.run → stage 1 → ... → proxy (terminal)
//!     → ctx.response (404 if nobody answered, 500 if a stage failed)
//! ```
//!
//! # Design Decisions
//! - Stages are registered once at boot and shared by every request
//! - Continuation passing: a stage that does not call `next` ends the chain
//! - Failures and panics are contained at the pipeline boundary

pub mod context;
pub mod stage;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use futures_util::FutureExt;

pub use context::Context;
pub use stage::{BoxError, Next, Stage, StageFailure};

use crate::http::response::synthetic;

/// Ordered list of stages shared by every request.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Names of the registered stages, outermost first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage for one request and produce the response.
    pub async fn execute(&self, ctx: &mut Context) -> Response<Body> {
        let outcome = AssertUnwindSafe(Next::new(&self.stages).run(ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => ctx
                .response
                .take()
                .unwrap_or_else(|| synthetic(StatusCode::NOT_FOUND, "Not Found")),
            Ok(Err(failure)) => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    stage = failure.stage,
                    error = %failure.source,
                    "Stage failed"
                );
                synthetic(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                tracing::error!(
                    request_id = %ctx.request_id,
                    stage = ctx.current_stage().unwrap_or("unknown"),
                    panic = %message,
                    "Stage panicked"
                );
                synthetic(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

/// Incremental construction of a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Add a stage only when `enabled`.
    pub fn stage_if(self, enabled: bool, stage: impl Stage + 'static) -> Self {
        if enabled {
            self.stage(stage)
        } else {
            self
        }
    }

    pub fn build(self) -> Pipeline {
        Pipeline::new(self.stages)
    }
}
