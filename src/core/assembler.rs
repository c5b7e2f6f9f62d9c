//! Deterministic assembly of a bounded context window.
//!
//! Emits the persona system prompt, then prior turns oldest-first, then the
//! new user message with its attachment text. When the character budget is
//! exceeded, trimming follows a fixed priority: drop the oldest history
//! turns, then truncate the longest attachment texts, then (never reached
//! in practice, see `assemble`) the user's own message. The system prompt
//! and the newest user turn are never dropped.

use crate::core::error::{ChatError, ChatResult};
use crate::core::message::{AttachmentRef, Message};

const ATTACHMENTS_HEADER: &str = "\n\nAttached files:\n";

fn chars(s: &str) -> usize {
    s.chars().count()
}

/// Assemble the ordered message list for one turn.
///
/// Fails with `BudgetExceeded` only when the system prompt plus the bare
/// user message alone do not fit; everything else can be trimmed away, so
/// the user's own text is never cut.
pub fn assemble(
    system_prompt: &str,
    history: &[Message],
    user_text: &str,
    attachments: &[AttachmentRef],
    budget: usize,
) -> ChatResult<Vec<Message>> {
    let fixed = chars(system_prompt) + chars(user_text);
    if fixed > budget {
        return Err(ChatError::BudgetExceeded {
            required: fixed,
            budget,
        });
    }

    let mut attachments: Vec<AttachmentRef> = attachments.to_vec();
    let attachment_cost = |attachments: &[AttachmentRef]| -> usize {
        if attachments.is_empty() {
            0
        } else {
            chars(ATTACHMENTS_HEADER) + attachments.iter().map(|a| chars(&a.render())).sum::<usize>()
        }
    };

    // Attachments outrank history: history only gets what is left after
    // the fixed parts and the (untrimmed) attachment text.
    let mut kept_history: Vec<&Message> = Vec::new();
    let history_budget = budget.saturating_sub(fixed + attachment_cost(&attachments));
    let mut history_cost = 0usize;
    for turn in history.iter().rev() {
        if turn.role == crate::core::message::Role::System {
            continue;
        }
        let cost = turn.size_estimate();
        if history_cost + cost > history_budget {
            break;
        }
        history_cost += cost;
        kept_history.push(turn);
    }
    kept_history.reverse();

    // With all history dropped the attachments themselves may still not
    // fit; cut the longest texts first, dropping a block entirely once its
    // text is gone so the label overhead goes with it.
    loop {
        let total = fixed + attachment_cost(&attachments);
        if total <= budget || attachments.is_empty() {
            break;
        }
        let over = total - budget;
        let longest_idx = attachments
            .iter()
            .enumerate()
            .max_by_key(|(_, a)| chars(&a.extracted_text))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let text_len = chars(&attachments[longest_idx].extracted_text);
        if text_len == 0 {
            attachments.remove(longest_idx);
            continue;
        }
        let keep = text_len.saturating_sub(over);
        attachments[longest_idx].extracted_text = attachments[longest_idx]
            .extracted_text
            .chars()
            .take(keep)
            .collect();
    }

    let mut messages = Vec::with_capacity(kept_history.len() + 2);
    if !system_prompt.is_empty() {
        messages.push(Message::system(system_prompt));
    }
    for turn in kept_history {
        messages.push(Message::new(turn.role, turn.content.clone()));
    }

    let mut user_content = user_text.to_string();
    if !attachments.is_empty() {
        user_content.push_str(ATTACHMENTS_HEADER);
        for attachment in &attachments {
            user_content.push_str(&attachment.render());
        }
    }
    messages.push(Message::user(user_content).with_attachments(attachments));

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;
    use std::path::PathBuf;

    fn attachment(name: &str, text: &str) -> AttachmentRef {
        AttachmentRef {
            filename: name.to_string(),
            extracted_text: text.to_string(),
            size_bytes: text.len() as u64,
            source_path: PathBuf::from(name),
        }
    }

    fn turns(sizes: &[usize]) -> Vec<Message> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                Message::new(role, "x".repeat(size))
            })
            .collect()
    }

    #[test]
    fn order_is_system_then_history_then_user() {
        let history = vec![Message::user("first"), Message::assistant("second")];
        let messages = assemble("persona", &history, "newest", &[], 1000).unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "persona");
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[2].content, "second");
        assert_eq!(messages[3].role, Role::User);
        assert_eq!(messages[3].content, "newest");
    }

    #[test]
    fn sliding_window_keeps_exactly_two_trailing_turns() {
        // budget 100, persona 20, 5 turns of 30, user message 10
        let history = turns(&[30, 30, 30, 30, 30]);
        let messages = assemble("p".repeat(20).as_str(), &history, "u".repeat(10).as_str(), &[], 100)
            .unwrap();
        // system + 2 trailing history turns + user
        assert_eq!(messages.len(), 4);
        let total: usize = messages.iter().map(|m| m.size_estimate()).sum();
        assert_eq!(total, 90);
        // The retained turns are the two newest.
        assert_eq!(messages[1].content, history[3].content);
        assert_eq!(messages[2].content, history[4].content);
    }

    #[test]
    fn budget_exceeded_only_when_nothing_left_to_trim() {
        let err = assemble("p".repeat(60).as_str(), &[], "u".repeat(50).as_str(), &[], 100)
            .unwrap_err();
        match err {
            ChatError::BudgetExceeded { required, budget } => {
                assert_eq!(required, 110);
                assert_eq!(budget, 100);
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
    }

    #[test]
    fn attachments_render_into_the_user_message() {
        let attachments = vec![attachment("a.txt", "alpha")];
        let messages = assemble("sys", &[], "look at this", &attachments, 1000).unwrap();
        let user = messages.last().unwrap();
        assert!(user.content.starts_with("look at this"));
        assert!(user.content.contains("Attached files:"));
        assert!(user.content.contains("File: a.txt"));
        assert!(user.content.contains("alpha"));
        assert_eq!(user.attachments.len(), 1);
    }

    #[test]
    fn attachments_displace_history_before_being_truncated() {
        let history = turns(&[40, 40]);
        let big = "b".repeat(200);
        let attachments = vec![attachment("big.txt", &big)];
        // budget leaves room for system+user+attachment but no history
        let messages = assemble("sys", &history, "hi", &attachments, 280).unwrap();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert!(messages[1].content.contains(&big));
    }

    #[test]
    fn longest_attachment_is_truncated_first() {
        let attachments = vec![
            attachment("short.txt", &"s".repeat(20)),
            attachment("long.txt", &"l".repeat(500)),
        ];
        let messages = assemble("sys", &[], "hi", &attachments, 200).unwrap();
        let user = messages.last().unwrap();
        let total: usize = messages.iter().map(|m| m.size_estimate()).sum();
        assert!(total <= 200, "assembled {total} chars over budget");
        // The short attachment survived intact; the long one was cut.
        let short = user
            .attachments
            .iter()
            .find(|a| a.filename == "short.txt")
            .unwrap();
        assert_eq!(short.extracted_text.len(), 20);
        let long = user
            .attachments
            .iter()
            .find(|a| a.filename == "long.txt")
            .unwrap();
        assert!(long.extracted_text.len() < 500);
    }

    #[test]
    fn system_and_user_survive_the_tightest_viable_budget() {
        let history = turns(&[50, 50, 50]);
        let attachments = vec![attachment("a.txt", &"a".repeat(100))];
        let budget = chars("sys") + chars("keep me");
        let messages = assemble("sys", &history, "keep me", &attachments, budget).unwrap();
        assert_eq!(messages.first().unwrap().content, "sys");
        let user = messages.last().unwrap();
        assert!(user.content.starts_with("keep me"));
    }

    #[test]
    fn system_history_turns_in_input_are_ignored() {
        let history = vec![Message::system("stale system"), Message::user("kept")];
        let messages = assemble("fresh", &history, "hi", &[], 1000).unwrap();
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.role == Role::System)
                .count(),
            1
        );
        assert_eq!(messages[0].content, "fresh");
    }
}
