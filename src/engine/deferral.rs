#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Tool-call disposition: approval-gated calls and delay-scheduled
//! calls become pending entries; everything else executes immediately.
//! The model always receives a structured result, never silence.

use super::TurnRequest;
use crate::budget::ResponseStats;
use crate::config::OrchestratorConfig;
use crate::domain::{
    MessageState, PendingToolCallEntry, SchedulingPolicy, ToolCallDisposition, ToolCallRecord,
};
use crate::error::Result;
use crate::ports::{
    BotStatusKind, LiveEvent, PushNotification, ToolContext, ToolRunOutcome, TurnPorts,
};
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

pub(super) async fn dispatch_tool_call<P>(
    ports: &P,
    settings: &OrchestratorConfig,
    request: &TurnRequest,
    call_id: &str,
    tool_name: &str,
    raw_arguments: &str,
    stats: &mut ResponseStats,
) -> Result<(ToolCallRecord, MessageState)>
where
    P: TurnPorts + Send + Sync,
{
    let arguments: serde_json::Value =
        serde_json::from_str(raw_arguments).unwrap_or_else(|_| json!({}));

    // Absent configuration means no approvals and no delay.
    let policy: SchedulingPolicy = {
        let config = request.config.lock().await;
        config.scheduling.clone().unwrap_or_default()
    };

    if policy.requires_approval(tool_name) {
        return defer_for_approval(
            ports, settings, request, &policy, call_id, tool_name, raw_arguments, arguments,
        )
        .await;
    }

    let delay_ms = policy.delay_for(tool_name);
    if delay_ms > 0 {
        return defer_for_schedule(request, call_id, tool_name, raw_arguments, arguments, delay_ms)
            .await;
    }

    execute_immediately(ports, request, call_id, tool_name, arguments, stats).await
}

#[allow(clippy::too_many_arguments)]
async fn defer_for_approval<P>(
    ports: &P,
    settings: &OrchestratorConfig,
    request: &TurnRequest,
    policy: &SchedulingPolicy,
    call_id: &str,
    tool_name: &str,
    raw_arguments: &str,
    arguments: serde_json::Value,
) -> Result<(ToolCallRecord, MessageState)>
where
    P: TurnPorts + Send + Sync,
{
    let timeout_ms = policy
        .approval_timeout_ms
        .unwrap_or(settings.default_approval_timeout_ms);
    let timeout_at = Utc::now() + Duration::milliseconds(i64::try_from(timeout_ms).unwrap_or(0));
    let approver = request.session.as_ref().map(|s| s.user_id.clone());

    let entry = PendingToolCallEntry::awaiting_approval(
        request.conversation_id.clone(),
        request.bot.id.clone(),
        call_id,
        tool_name,
        raw_arguments,
        approver,
        timeout_at,
    );

    {
        let mut config = request.config.lock().await;
        config.pending_tool_calls.push(entry.clone());
    }

    info!(
        tool = %tool_name,
        pending_id = %entry.pending_id,
        "Tool call deferred for approval"
    );

    request.cancel.guard()?;
    let live = ports
        .has_active_connection(&request.conversation_id)
        .await
        .unwrap_or(false);
    if live {
        if let Err(e) = ports
            .emit_live(
                &request.conversation_id,
                LiveEvent::ToolApprovalRequired {
                    entry: entry.clone(),
                },
            )
            .await
        {
            debug!("Approval notification emit failed: {e}");
        }
    } else if let Some(user) = &entry.user_id_to_approve {
        let notification = PushNotification {
            title: "Tool approval required".to_string(),
            body: format!("{} wants to run '{tool_name}'", request.bot.name),
        };
        if let Err(e) = ports.push_notify(user, notification).await {
            warn!(user = %user, "Push notification failed: {e}");
        }
    }

    let payload = deferred_payload(&entry, "awaiting human approval");
    Ok(deferred_result(request, call_id, tool_name, arguments, entry, &payload))
}

async fn defer_for_schedule(
    request: &TurnRequest,
    call_id: &str,
    tool_name: &str,
    raw_arguments: &str,
    arguments: serde_json::Value,
    delay_ms: u64,
) -> Result<(ToolCallRecord, MessageState)> {
    let execute_at = Utc::now() + Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(0));
    let entry = PendingToolCallEntry::scheduled(
        request.conversation_id.clone(),
        request.bot.id.clone(),
        call_id,
        tool_name,
        raw_arguments,
        execute_at,
    );

    {
        let mut config = request.config.lock().await;
        config.pending_tool_calls.push(entry.clone());
    }

    info!(
        tool = %tool_name,
        pending_id = %entry.pending_id,
        delay_ms = delay_ms,
        "Tool call scheduled for delayed execution"
    );

    let payload = deferred_payload(&entry, "scheduled for delayed execution");
    Ok(deferred_result(request, call_id, tool_name, arguments, entry, &payload))
}

async fn execute_immediately<P>(
    ports: &P,
    request: &TurnRequest,
    call_id: &str,
    tool_name: &str,
    arguments: serde_json::Value,
    stats: &mut ResponseStats,
) -> Result<(ToolCallRecord, MessageState)>
where
    P: TurnPorts + Send + Sync,
{
    let is_async = arguments
        .get("is_async")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    emit_status(ports, request, BotStatusKind::ToolCalling, tool_name).await;
    request.cancel.guard()?;

    let context = ToolContext {
        conversation_id: request.conversation_id.clone(),
        caller_bot_id: request.bot.id.clone(),
        session: request.session.clone(),
        cancel: request.cancel.clone(),
    };
    let outcome = ports.run_tool(tool_name, arguments.clone(), context).await?;
    request.cancel.guard()?;

    stats.add_credits(outcome.credits_used());

    let status = if outcome.success() {
        BotStatusKind::ToolCompleted
    } else {
        BotStatusKind::ToolFailed
    };
    emit_status(ports, request, status, tool_name).await;

    // Failure is data the agent can react to, not an exception.
    let payload = match &outcome {
        ToolRunOutcome::Succeeded { output, .. } => {
            if is_async {
                json!({"success": true, "accepted": true, "async": true, "tool": tool_name})
            } else {
                json!({"success": true, "output": output})
            }
        }
        ToolRunOutcome::Failed { code, message, .. } => {
            warn!(tool = %tool_name, code = %code, "Tool execution failed: {message}");
            json!({"success": false, "error": {"code": code, "message": message}})
        }
    };

    let record = ToolCallRecord {
        call_id: call_id.to_string(),
        tool_name: tool_name.to_string(),
        arguments,
        disposition: ToolCallDisposition::Executed {
            success: outcome.success(),
        },
    };
    let message = MessageState::tool_result(&request.bot.id, None, &payload);
    Ok((record, message))
}

/// Structured acknowledgment so the model can reason about pending
/// work. Deferred calls cost zero credits at deferral time.
fn deferred_payload(entry: &PendingToolCallEntry, detail: &str) -> serde_json::Value {
    json!({
        "success": true,
        "deferred": true,
        "status": entry.status.as_str(),
        "pending_id": entry.pending_id.value(),
        "tool": entry.tool_name,
        "detail": detail,
    })
}

fn deferred_result(
    request: &TurnRequest,
    call_id: &str,
    tool_name: &str,
    arguments: serde_json::Value,
    entry: PendingToolCallEntry,
    payload: &serde_json::Value,
) -> (ToolCallRecord, MessageState) {
    let record = ToolCallRecord {
        call_id: call_id.to_string(),
        tool_name: tool_name.to_string(),
        arguments,
        disposition: ToolCallDisposition::Deferred {
            pending_id: entry.pending_id,
        },
    };
    let message = MessageState::tool_result(&request.bot.id, None, payload);
    (record, message)
}

async fn emit_status<P>(ports: &P, request: &TurnRequest, status: BotStatusKind, tool_name: &str)
where
    P: TurnPorts + Send + Sync,
{
    let event = LiveEvent::BotStatus {
        bot_id: request.bot.id.clone(),
        status,
        detail: json!({"tool": tool_name}),
    };
    if let Err(e) = ports.emit_live(&request.conversation_id, event).await {
        debug!("Status event emit failed: {e}");
    }
}
