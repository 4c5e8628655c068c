//! Stage handlers: what happens to a ticket in each lifecycle stage.
//!
//! Handlers are selected by the detected state; workflow specialization is
//! data (the [`WorkflowDefinition`]), not a subtype. Every handler returns
//! a `(status, detail)` outcome; mutations go through the injected
//! collaborators, and dry-run short-circuits before the first one.

use tracing::{debug, instrument};

use vigil_shared::{
    ProcessingStatus, Result, SPECIALIST_PREFIX, StateTag, Ticket, VigilError, WorkflowDefinition,
};
use vigil_workflow::TransitionPlan;

use crate::orchestrator::{BatchOptions, Engine};
use crate::render::render_context;

type Outcome = (ProcessingStatus, String);

impl Engine {
    /// Route a ticket to its stage handler.
    #[instrument(skip_all, fields(ticket_id = %ticket.id, stage = %stage))]
    pub(crate) async fn dispatch(
        &self,
        ticket: &Ticket,
        stage: StateTag,
        opts: &BatchOptions,
    ) -> Result<Outcome> {
        if let Some(wanted) = opts.stage {
            if stage != wanted {
                return Ok((
                    ProcessingStatus::Skipped,
                    format!("in stage {stage}, batch is limited to {wanted}"),
                ));
            }
        }

        match stage {
            StateTag::Discovery => self.stage_analysis(ticket, opts).await,
            StateTag::Analysis => self.stage_preparation(ticket, opts).await,
            StateTag::Assigned => self.stage_handoff(ticket, opts).await,
            StateTag::Processing => self.stage_processing(ticket, opts).await,
            StateTag::Ready => self.stage_completion(ticket, opts).await,
            StateTag::Complete => Ok((ProcessingStatus::Skipped, "already complete".into())),
            StateTag::Unknown => Ok((
                ProcessingStatus::Skipped,
                "no recognized state labels".into(),
            )),
        }
    }

    /// Discovery: match the ticket to a workflow.
    async fn stage_analysis(&self, ticket: &Ticket, opts: &BatchOptions) -> Result<Outcome> {
        let text = format!("{}\n{}", ticket.title, ticket.body);
        let decision = self
            .matcher
            .match_ticket(&ticket.id, &ticket.labels, Some(&text))
            .await;

        match decision.action {
            vigil_shared::AssignmentAction::Assign => {
                let workflow = decision.matched.as_ref().ok_or_else(|| {
                    VigilError::validation("assign decision carries no workflow")
                })?;
                let plan =
                    self.state
                        .plan_transition(ticket, StateTag::Assigned, Some(workflow))?;
                let detail = format!(
                    "assigned workflow {} (confidence {:.2})",
                    workflow.id, decision.confidence
                );
                if opts.dry_run {
                    return Ok((ProcessingStatus::Success, format!("dry-run: would have {detail}")));
                }
                self.apply_plan(ticket, &plan).await?;
                Ok((ProcessingStatus::Success, detail))
            }
            vigil_shared::AssignmentAction::Clarify => {
                if opts.dry_run {
                    return Ok((
                        ProcessingStatus::Skipped,
                        format!("dry-run: would request clarification: {}", decision.rationale),
                    ));
                }
                self.tracker
                    .add_comment(&ticket.id, &decision.rationale)
                    .await?;
                let plan = self.state.plan_transition(ticket, StateTag::Analysis, None)?;
                self.apply_plan(ticket, &plan).await?;
                Ok((
                    ProcessingStatus::Skipped,
                    format!("clarification requested: {}", decision.rationale),
                ))
            }
            vigil_shared::AssignmentAction::Skip => {
                Ok((ProcessingStatus::NoMatch, decision.rationale))
            }
            vigil_shared::AssignmentAction::Error => {
                Ok((ProcessingStatus::Error, decision.rationale))
            }
        }
    }

    /// Analysis: re-run the matcher after human clarification.
    async fn stage_preparation(&self, ticket: &Ticket, opts: &BatchOptions) -> Result<Outcome> {
        let text = format!("{}\n{}", ticket.title, ticket.body);
        let decision = self
            .matcher
            .match_ticket(&ticket.id, &ticket.labels, Some(&text))
            .await;

        match decision.action {
            vigil_shared::AssignmentAction::Assign => {
                let workflow = decision.matched.as_ref().ok_or_else(|| {
                    VigilError::validation("assign decision carries no workflow")
                })?;
                let plan =
                    self.state
                        .plan_transition(ticket, StateTag::Assigned, Some(workflow))?;
                let detail = format!("assigned workflow {} after clarification", workflow.id);
                if opts.dry_run {
                    return Ok((ProcessingStatus::Success, format!("dry-run: would have {detail}")));
                }
                self.apply_plan(ticket, &plan).await?;
                Ok((ProcessingStatus::Success, detail))
            }
            vigil_shared::AssignmentAction::Error => {
                Ok((ProcessingStatus::Error, decision.rationale))
            }
            _ => Ok((
                ProcessingStatus::Skipped,
                format!("still ambiguous: {}", decision.rationale),
            )),
        }
    }

    /// Assigned: hand the ticket to the workflow's actor.
    async fn stage_handoff(&self, ticket: &Ticket, opts: &BatchOptions) -> Result<Outcome> {
        let workflow = self.resolve_assigned_workflow(ticket)?;
        let actor = workflow.assignee.as_deref();
        let detail = match actor {
            Some(actor) => format!("handed off {} to {actor}", workflow.id),
            None => format!("handed off {} (no actor configured)", workflow.id),
        };
        if opts.dry_run {
            return Ok((ProcessingStatus::Success, format!("dry-run: would have {detail}")));
        }

        if let Some(actor) = actor {
            self.tracker.assign(&ticket.id, actor).await?;
        }
        let plan = self
            .state
            .plan_transition(ticket, StateTag::Processing, None)?;
        self.apply_plan(ticket, &plan).await?;
        Ok((ProcessingStatus::Success, detail))
    }

    /// Processing: render and commit the workflow's deliverables.
    ///
    /// Commit failure is reported as this ticket's error; transitions
    /// already applied in earlier stages stay applied.
    async fn stage_processing(&self, ticket: &Ticket, opts: &BatchOptions) -> Result<Outcome> {
        let workflow = self.resolve_assigned_workflow(ticket)?;
        let context = render_context(ticket, &workflow);

        let mut files = Vec::with_capacity(workflow.deliverables.len());
        for spec in &workflow.deliverables {
            files.push(self.renderer.render(spec, &context)?);
        }
        debug!(ticket_id = %ticket.id, files = files.len(), "deliverables rendered");

        if opts.dry_run {
            return Ok((
                ProcessingStatus::Success,
                format!("dry-run: would commit {} deliverable(s)", files.len()),
            ));
        }

        let branch = format!("vigil/{}", ticket.id);
        let message = format!("Add {} deliverables for ticket {}", workflow.id, ticket.id);
        self.committer.commit(&branch, &files, &message).await?;

        let plan = self.state.plan_transition(ticket, StateTag::Ready, None)?;
        self.apply_plan(ticket, &plan).await?;
        Ok((
            ProcessingStatus::Success,
            format!("committed {} deliverable(s) on {branch}", files.len()),
        ))
    }

    /// Ready: close the loop with a comment and the final transition.
    async fn stage_completion(&self, ticket: &Ticket, opts: &BatchOptions) -> Result<Outcome> {
        if opts.dry_run {
            return Ok((
                ProcessingStatus::Success,
                "dry-run: would mark complete".into(),
            ));
        }
        self.tracker
            .add_comment(
                &ticket.id,
                "Processing complete. Deliverables are committed and ready for review.",
            )
            .await?;
        let plan = self.state.plan_transition(ticket, StateTag::Complete, None)?;
        self.apply_plan(ticket, &plan).await?;
        Ok((ProcessingStatus::Success, "completed".into()))
    }

    /// The workflow a ticket was assigned to, resolved from its
    /// `specialist/` label.
    fn resolve_assigned_workflow(
        &self,
        ticket: &Ticket,
    ) -> Result<std::sync::Arc<WorkflowDefinition>> {
        let label = ticket.specialist_labels().into_iter().next().ok_or_else(|| {
            VigilError::validation(format!("ticket {} carries no specialist label", ticket.id))
        })?;
        let id = label.trim_start_matches(SPECIALIST_PREFIX);
        self.registry.find_by_id(id).ok_or_else(|| {
            VigilError::validation(format!("no workflow definition for specialist label {label}"))
        })
    }

    /// Apply a transition plan's label sets against the tracker as one
    /// `set_labels` call.
    async fn apply_plan(&self, ticket: &Ticket, plan: &TransitionPlan) -> Result<()> {
        let next = plan.apply_to(&ticket.labels);
        self.tracker.set_labels(&ticket.id, &next).await
    }
}
