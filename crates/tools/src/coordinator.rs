//! Tool execution coordinator
//!
//! Tracks the single outstanding tool call of a session. The coordinator
//! never spawns anything itself: [`ToolCoordinator::dispatch`] hands back a
//! [`ToolExecution`] for the session loop to run, and the loop reports the
//! result through [`ToolCoordinator::complete`].

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use voice_loop_config::ToolsConfig;
use voice_loop_core::{ToolCallRequest, ToolCallResult, ToolDefinition};

use crate::registry::{run_tool, ToolRegistry};
use crate::tool::{render_template, Tool, ToolContext};
use crate::ToolError;

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub default_timeout: Duration,
    pub filler_enabled: bool,
    /// A handler finishing within this delay gets no filler
    pub filler_delay: Duration,
    /// Record the spoken filler as an assistant turn
    pub filler_in_context: bool,
    /// Bound on holding back a new reply for a suppressed call
    pub superseded_wait: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&ToolsConfig::default())
    }
}

impl From<&ToolsConfig> for CoordinatorConfig {
    fn from(config: &ToolsConfig) -> Self {
        Self {
            default_timeout: Duration::from_secs(config.timeout_secs),
            filler_enabled: config.filler_enabled,
            filler_delay: Duration::from_millis(config.filler_delay_ms),
            filler_in_context: config.filler_in_context,
            superseded_wait: Duration::from_millis(config.superseded_wait_ms),
        }
    }
}

/// A filler that may be spoken while a call is pending
#[derive(Debug, Clone, PartialEq)]
pub struct FillerPlan {
    pub call_id: String,
    pub text: String,
    pub delay: Duration,
    pub add_to_history: bool,
}

/// One handler invocation, ready to run on its own task
pub struct ToolExecution {
    tool: Arc<dyn Tool>,
    request: ToolCallRequest,
    ctx: ToolContext,
    timeout: Duration,
}

impl ToolExecution {
    pub fn request(&self) -> &ToolCallRequest {
        &self.request
    }

    /// Run the handler; always yields a result matched to the request
    pub async fn run(self) -> ToolCallResult {
        let started = Instant::now();
        let outcome = run_tool(self.tool, &self.request, &self.ctx, self.timeout).await;
        let duration = started.elapsed();
        match outcome {
            Ok(text) => ToolCallResult::success(&self.request, text, duration),
            Err(e) => ToolCallResult::failure(&self.request, e.to_string(), duration),
        }
    }
}

pub struct Dispatch {
    pub call_id: String,
    pub filler: Option<FillerPlan>,
    pub execution: ToolExecution,
}

/// A finished call, released from the pending slot
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCall {
    pub request: ToolCallRequest,
    pub result: ToolCallResult,
    /// Interrupted while pending; no answer should be spoken
    pub suppressed: bool,
    pub filler_played: bool,
}

#[derive(Debug)]
struct PendingCall {
    request: ToolCallRequest,
    suppressed: bool,
    filler_claimed: bool,
}

pub struct ToolCoordinator {
    registry: Arc<ToolRegistry>,
    config: CoordinatorConfig,
    pending: Option<PendingCall>,
    rng: StdRng,
}

impl ToolCoordinator {
    pub fn new(registry: Arc<ToolRegistry>, config: CoordinatorConfig) -> Self {
        Self {
            registry,
            config,
            pending: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic filler choice
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn pending(&self) -> Option<&ToolCallRequest> {
        self.pending.as_ref().map(|p| &p.request)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Accept a request as the session's outstanding call.
    ///
    /// `filler_eligible` is the caller's one-shot check that the agent has
    /// not already said something for this turn.
    pub fn dispatch(
        &mut self,
        request: ToolCallRequest,
        ctx: ToolContext,
        filler_eligible: bool,
    ) -> Result<Dispatch, ToolError> {
        if let Some(pending) = &self.pending {
            tracing::warn!(
                rejected = %request.id,
                pending = %pending.request.id,
                "Tool call rejected while another is outstanding"
            );
            return Err(ToolError::Busy {
                pending: pending.request.id.clone(),
            });
        }

        let tool = self.registry.validate(&request)?;

        let filler = if filler_eligible && self.config.filler_enabled {
            self.plan_filler(tool.as_ref(), &request)
        } else {
            None
        };

        tracing::info!(
            tool = %request.name,
            call_id = %request.id,
            filler = filler.is_some(),
            "Dispatching tool call"
        );

        self.pending = Some(PendingCall {
            request: request.clone(),
            suppressed: false,
            filler_claimed: false,
        });

        Ok(Dispatch {
            call_id: request.id.clone(),
            filler,
            execution: ToolExecution {
                tool,
                request,
                ctx,
                timeout: self.config.default_timeout,
            },
        })
    }

    fn plan_filler(&mut self, tool: &dyn Tool, request: &ToolCallRequest) -> Option<FillerPlan> {
        let templates = tool.filler_templates();
        let template = templates.choose(&mut self.rng)?;
        Some(FillerPlan {
            call_id: request.id.clone(),
            text: render_template(template, &tool.filler_arguments(&request.arguments)),
            delay: self.config.filler_delay,
            add_to_history: self.config.filler_in_context,
        })
    }

    /// Re-check right before a filler starts playing.
    ///
    /// Succeeds at most once per call, and only while the call is still
    /// pending and not suppressed.
    pub fn claim_filler(&mut self, call_id: &str) -> bool {
        match self.pending.as_mut() {
            Some(p) if p.request.id == call_id && !p.suppressed && !p.filler_claimed => {
                p.filler_claimed = true;
                true
            },
            _ => false,
        }
    }

    /// Interruption: the handler keeps running but nothing more is spoken for it
    pub fn suppress(&mut self) -> bool {
        match self.pending.as_mut() {
            Some(p) if !p.suppressed => {
                tracing::debug!(call_id = %p.request.id, "Suppressing pending tool call");
                p.suppressed = true;
                true
            },
            _ => false,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.pending.as_ref().map(|p| p.suppressed).unwrap_or(false)
    }

    /// Release the pending call with its result
    pub fn complete(&mut self, result: ToolCallResult) -> Result<CompletedCall, ToolError> {
        match self.pending.take() {
            Some(p) if p.request.id == result.call_id => Ok(CompletedCall {
                request: p.request,
                result,
                suppressed: p.suppressed,
                filler_played: p.filler_claimed,
            }),
            other => {
                self.pending = other;
                tracing::error!(call_id = %result.call_id, "Tool result without an outstanding request");
                Err(ToolError::Unmatched(result.call_id))
            },
        }
    }
}
