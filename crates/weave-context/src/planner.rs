//! Context Window Planner (§4.8): picks the ordered subset of prior
//! messages and summaries that fits the token budget
//! `budget = context_limit - output_reserve - system_prompt_tokens
//!  - tool_def_tokens - safety_margin`.

use weave_core::model::{ConversationSummary, Message, Role, SummaryStatus};

const SAFETY_MARGIN: u32 = 64;

#[derive(Debug, Clone)]
pub enum PlannedEntry {
    Message(Message),
    /// A completed summary standing in for the `[from_position, to_position]`
    /// range it covers.
    Summary(ConversationSummary),
}

impl PlannedEntry {
    fn position(&self) -> u32 {
        match self {
            PlannedEntry::Message(m) => m.position,
            PlannedEntry::Summary(s) => s.from_position,
        }
    }

    fn token_count(&self) -> u32 {
        match self {
            PlannedEntry::Message(m) => m.token_count,
            PlannedEntry::Summary(s) => s.token_count,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("the most recent user message alone exceeds the context budget")]
    BudgetExceeded,
}

/// One assistant message plus any tool-result messages that correlate to
/// its tool calls, kept together so step 5 never orphans a tool result
/// (§4.8 step 5, §3 invariant).
struct Unit {
    entries: Vec<PlannedEntry>,
}

impl Unit {
    fn last_position(&self) -> u32 {
        self.entries.iter().map(PlannedEntry::position).max().unwrap_or(0)
    }

    fn token_count(&self) -> u32 {
        self.entries.iter().map(PlannedEntry::token_count).sum()
    }
}

pub fn plan(
    messages: &[Message],
    summaries: &[ConversationSummary],
    context_limit: u32,
    output_reserve: u32,
    tool_def_tokens: u32,
    system_prompt_tokens: u32,
) -> Result<Vec<PlannedEntry>, PlannerError> {
    let budget = context_limit
        .saturating_sub(output_reserve)
        .saturating_sub(system_prompt_tokens)
        .saturating_sub(tool_def_tokens)
        .saturating_sub(SAFETY_MARGIN);

    let Some(last_user_pos) = messages.iter().rev().find(|m| m.role == Role::User).map(|m| m.position) else {
        return Ok(Vec::new());
    };

    // Step 2: the trigger message and everything newer are mandatory.
    let mandatory: Vec<&Message> = messages.iter().filter(|m| m.position >= last_user_pos).collect();
    let mandatory_tokens: u32 = mandatory.iter().map(|m| m.token_count).sum();
    if mandatory_tokens > budget {
        return Err(PlannerError::BudgetExceeded);
    }

    // Step 3: messages covered by a completed summary are replaced wholesale.
    let completed: Vec<&ConversationSummary> = summaries
        .iter()
        .filter(|s| s.status == SummaryStatus::Completed)
        .collect();
    let covered = |pos: u32| completed.iter().any(|s| pos >= s.from_position && pos <= s.to_position);

    let older: Vec<&Message> = messages
        .iter()
        .filter(|m| m.position < last_user_pos && !covered(m.position))
        .collect();

    let mut units = build_units(&older);
    for summary in &completed {
        units.push(Unit {
            entries: vec![PlannedEntry::Summary((*summary).clone())],
        });
    }
    units.sort_by_key(|u| std::cmp::Reverse(u.last_position()));

    // Step 4/5: newest to oldest, keep adding while it fits; once a unit
    // doesn't fit, everything older than it is implicitly dropped too,
    // which is exactly "drop oldest first" (§4.8 step 5).
    let mut used = mandatory_tokens;
    let mut included: Vec<PlannedEntry> = Vec::new();
    for unit in units {
        let cost = unit.token_count();
        if used + cost <= budget {
            used += cost;
            included.extend(unit.entries);
        }
    }

    included.extend(mandatory.into_iter().map(|m| PlannedEntry::Message(m.clone())));
    included.sort_by_key(PlannedEntry::position);
    Ok(included)
}

/// Groups each assistant message together with any tool-result messages
/// that correlate to its tool calls.
fn build_units(messages: &[&Message]) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let m = messages[i];
        if m.role == Role::Assistant && !m.tool_calls.is_empty() {
            let call_ids: std::collections::HashSet<&str> =
                m.tool_calls.iter().map(|c| c.id.as_str()).collect();
            let mut entries = vec![PlannedEntry::Message((*m).clone())];
            let mut j = i + 1;
            while j < messages.len() {
                let next = messages[j];
                let correlates = next.role == Role::Tool
                    && next
                        .tool_call_id
                        .as_deref()
                        .map(|id| call_ids.contains(id))
                        .unwrap_or(false);
                if !correlates {
                    break;
                }
                entries.push(PlannedEntry::Message((*next).clone()));
                j += 1;
            }
            units.push(Unit { entries });
            i = j;
        } else {
            units.push(Unit {
                entries: vec![PlannedEntry::Message((*m).clone())],
            });
            i += 1;
        }
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::ids::{ConversationId, MessageId};

    fn msg(position: u32, role: Role, tokens: u32) -> Message {
        Message {
            id: MessageId::new(),
            conversation_id: ConversationId::new(),
            position,
            role,
            content: format!("msg {position}"),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            thinking: None,
            token_count: tokens,
            images: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn always_includes_most_recent_user_message() {
        let messages = vec![msg(0, Role::User, 10), msg(1, Role::Assistant, 10)];
        let planned = plan(&messages, &[], 1000, 0, 0, 0).unwrap();
        assert!(planned.iter().any(|e| matches!(e, PlannedEntry::Message(m) if m.role == Role::User)));
    }

    #[test]
    fn trigger_alone_over_budget_errors() {
        let messages = vec![msg(0, Role::User, 5000)];
        let err = plan(&messages, &[], 100, 0, 0, 0).unwrap_err();
        assert!(matches!(err, PlannerError::BudgetExceeded));
    }

    #[test]
    fn drops_oldest_messages_when_over_budget() {
        let messages = vec![
            msg(0, Role::User, 50),
            msg(1, Role::Assistant, 50),
            msg(2, Role::User, 50),
        ];
        let planned = plan(&messages, &[], 120, 0, 0, 0).unwrap();
        let positions: Vec<u32> = planned.iter().map(PlannedEntry::position).collect();
        assert!(positions.contains(&2));
        assert!(!positions.contains(&0));
    }
}
